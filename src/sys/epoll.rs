use std::cmp;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use libc::{c_int, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT};

use crate::event::EventMask;

use super::syscall;

/// Default scratch size for one `epoll_wait` call and the poll loop's
/// blocking timeout, matching the poll thread's run loop.
pub const MAX_EVENTS: usize = 64;
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

fn mask_to_epoll(mask: EventMask) -> u32 {
    let mut bits = 0;
    if mask.is_readable() {
        bits |= EPOLLIN;
    }
    if mask.is_writable() {
        bits |= EPOLLOUT;
    }
    if mask.is_et() {
        bits |= EPOLLET;
    }
    bits as u32
}

fn epoll_to_mask(bits: u32) -> EventMask {
    let bits = bits as c_int;
    let mut mask = EventMask::EMPTY;
    if bits & EPOLLIN != 0 {
        mask.insert(EventMask::READABLE);
    }
    if bits & EPOLLOUT != 0 {
        mask.insert(EventMask::WRITABLE);
    }
    if bits & (EPOLLERR | EPOLLHUP) != 0 {
        mask.insert(EventMask::ERROR);
    }
    mask
}

/// A single `epoll` instance. Registration keys events by raw fd, same as
/// the poll thread's callback map, rather than by an indirect token.
pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Epoll { epfd })
    }

    pub fn add(&self, fd: RawFd, interest: EventMask) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: mask_to_epoll(interest),
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event))?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, interest: EventMask) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: mask_to_epoll(interest),
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut event))?;
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut event))?;
        Ok(())
    }

    /// Blocks for at most `timeout` (rounding up to the platform's `c_int`
    /// millisecond range), filling `events` with whatever fired.
    pub fn wait(&self, events: &mut Events, timeout: Duration) -> io::Result<()> {
        let timeout_ms =
            cmp::min(timeout.as_millis(), c_int::MAX as u128) as c_int;

        let count = loop {
            match syscall!(epoll_wait(
                self.epfd,
                events.raw.as_mut_ptr(),
                events.raw.capacity() as i32,
                timeout_ms
            )) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        }?;

        unsafe { events.raw.set_len(count as usize) };
        Ok(())
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

/// Fixed-capacity scratch space for one `epoll_wait` call.
pub struct Events {
    raw: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            raw: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The fd and readiness mask for the `idx`th fired event.
    pub fn get(&self, idx: usize) -> Option<(RawFd, EventMask)> {
        self.raw
            .get(idx)
            .map(|e| (e.u64 as RawFd, epoll_to_mask(e.events)))
    }
}
