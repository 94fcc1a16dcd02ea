use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use super::syscall;

/// An owned file descriptor. Closes the fd on drop; nothing above this
/// type is allowed to `libc::close` directly.
#[derive(Debug)]
pub struct FileDesc(RawFd);

impl FileDesc {
    /// # Safety
    /// `fd` must be a valid, currently-open file descriptor not already
    /// owned by another `FileDesc`.
    pub unsafe fn new(fd: RawFd) -> Self {
        FileDesc(fd)
    }

    pub fn raw(&self) -> RawFd {
        self.0
    }

    pub fn set_cloexec(&self) -> io::Result<()> {
        let flags = syscall!(fcntl(self.0, libc::F_GETFD))?;
        syscall!(fcntl(self.0, libc::F_SETFD, flags | libc::FD_CLOEXEC))?;
        Ok(())
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let flags = syscall!(fcntl(self.0, libc::F_GETFL))?;
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        syscall!(fcntl(self.0, libc::F_SETFL, flags))?;
        Ok(())
    }
}

impl AsRawFd for FileDesc {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl FromRawFd for FileDesc {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        FileDesc(fd)
    }
}

impl IntoRawFd for FileDesc {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.0;
        std::mem::forget(self);
        fd
    }
}

impl Drop for FileDesc {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe {
                libc::close(self.0);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn into_raw_fd_does_not_close_on_drop() {
        let (r, w) = unsafe {
            let mut fds = [0; 2];
            assert_eq!(libc::pipe(fds.as_mut_ptr()), 0);
            (FileDesc::new(fds[0]), FileDesc::new(fds[1]))
        };
        let raw = r.into_raw_fd();
        // still valid: fcntl should succeed on it.
        assert!(unsafe { libc::fcntl(raw, libc::F_GETFD) } >= 0);
        unsafe {
            libc::close(raw);
        }
        drop(w);
    }
}
