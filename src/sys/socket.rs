use std::io;
use std::mem;
use std::net::{Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, RawFd};

use libc::{c_int, c_void, sockaddr, socklen_t, MSG_NOSIGNAL, SOCK_CLOEXEC};

use super::fd::FileDesc;
use super::syscall;

/// Default `SO_SNDBUF`/`SO_RCVBUF` applied to client and UDP sockets.
pub const DEFAULT_BUF_SIZE: i32 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Udp,
}

impl SocketKind {
    fn raw_type(self) -> c_int {
        match self {
            SocketKind::Tcp => libc::SOCK_STREAM,
            SocketKind::Udp => libc::SOCK_DGRAM,
        }
    }
}

fn setsockopt<T>(fd: RawFd, level: c_int, name: c_int, value: T) -> io::Result<()> {
    let payload = &value as *const T as *const c_void;
    syscall!(setsockopt(
        fd,
        level,
        name,
        payload,
        mem::size_of::<T>() as socklen_t
    ))?;
    Ok(())
}

fn getsockopt<T: Copy>(fd: RawFd, level: c_int, name: c_int) -> io::Result<T> {
    let mut slot: T = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<T>() as socklen_t;
    syscall!(getsockopt(
        fd,
        level,
        name,
        &mut slot as *mut _ as *mut _,
        &mut len
    ))?;
    Ok(slot)
}

fn addr_to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, socklen_t) {
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let len = match *addr {
            SocketAddr::V4(ref a) => {
                let raw = &mut storage as *mut _ as *mut libc::sockaddr_in;
                (*raw).sin_family = libc::AF_INET as _;
                (*raw).sin_port = a.port().to_be();
                (*raw).sin_addr.s_addr = u32::from_be_bytes(a.ip().octets());
                mem::size_of::<libc::sockaddr_in>()
            }
            SocketAddr::V6(ref a) => {
                let raw = &mut storage as *mut _ as *mut libc::sockaddr_in6;
                (*raw).sin6_family = libc::AF_INET6 as _;
                (*raw).sin6_port = a.port().to_be();
                (*raw).sin6_addr.s6_addr = a.ip().octets();
                (*raw).sin6_flowinfo = a.flowinfo();
                (*raw).sin6_scope_id = a.scope_id();
                mem::size_of::<libc::sockaddr_in6>()
            }
        };
        (storage, len as socklen_t)
    }
}

fn sockaddr_to_addr(storage: &libc::sockaddr_storage, len: usize) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            assert!(len >= mem::size_of::<libc::sockaddr_in>());
            let addr: libc::sockaddr_in =
                unsafe { *(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            Ok(SocketAddr::V4(SocketAddrV4::new(
                ip,
                u16::from_be(addr.sin_port),
            )))
        }
        libc::AF_INET6 => {
            assert!(len >= mem::size_of::<libc::sockaddr_in6>());
            let addr: libc::sockaddr_in6 =
                unsafe { *(storage as *const _ as *const libc::sockaddr_in6) };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "unsupported address family",
        )),
    }
}

/// An owned, raw (IPv4/IPv6) TCP or UDP socket. Every option-setting method
/// mirrors a helper from the original socket utility layer; the bitwise
/// translation to/from `epoll` events lives in [`super::epoll`].
pub struct RawSocket {
    fd: FileDesc,
    kind: SocketKind,
}

impl RawSocket {
    pub fn new(kind: SocketKind, family_hint: SocketAddr) -> io::Result<Self> {
        let family = match family_hint {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };
        Self::new_raw(family, kind)
    }

    fn new_raw(family: c_int, kind: SocketKind) -> io::Result<Self> {
        let ty = kind.raw_type();
        match syscall!(socket(family, ty | SOCK_CLOEXEC, 0)) {
            Ok(fd) => Ok(RawSocket {
                fd: unsafe { FileDesc::new(fd) },
                kind,
            }),
            Err(ref e) if e.raw_os_error() == Some(libc::EINVAL) => {
                let fd = syscall!(socket(family, ty, 0))?;
                let fd = unsafe { FileDesc::new(fd) };
                fd.set_cloexec()?;
                Ok(RawSocket { fd, kind })
            }
            Err(e) => Err(e),
        }
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn set_nonblocking(&self, on: bool) -> io::Result<()> {
        self.fd.set_nonblocking(on)
    }

    pub fn set_reuseaddr(&self, on: bool) -> io::Result<()> {
        setsockopt(
            self.fd.raw(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            on as c_int,
        )
    }

    pub fn set_nodelay(&self, on: bool) -> io::Result<()> {
        setsockopt(
            self.fd.raw(),
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            on as c_int,
        )
    }

    pub fn set_send_buf(&self, size: i32) -> io::Result<()> {
        if size <= 0 {
            return Ok(());
        }
        setsockopt(self.fd.raw(), libc::SOL_SOCKET, libc::SO_SNDBUF, size)
    }

    pub fn set_recv_buf(&self, size: i32) -> io::Result<()> {
        if size <= 0 {
            return Ok(());
        }
        setsockopt(self.fd.raw(), libc::SOL_SOCKET, libc::SO_RCVBUF, size)
    }

    /// `seconds == 0` disables lingering: a close drops the connection
    /// immediately instead of waiting for queued data to drain.
    pub fn set_linger(&self, seconds: i32) -> io::Result<()> {
        let linger = libc::linger {
            l_onoff: (seconds > 0) as c_int,
            l_linger: seconds,
        };
        setsockopt(self.fd.raw(), libc::SOL_SOCKET, libc::SO_LINGER, linger)
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        let (storage, len) = addr_to_sockaddr(&addr);
        syscall!(bind(
            self.fd.raw(),
            &storage as *const _ as *const sockaddr,
            len
        ))?;
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        syscall!(listen(self.fd.raw(), backlog))?;
        Ok(())
    }

    /// Issues a nonblocking `connect`. Returns `true` if it completed
    /// synchronously (observed e.g. connecting to a loopback listener),
    /// `false` if it is still in progress and completion must be observed
    /// as a writable poll event followed by [`RawSocket::take_error`].
    pub fn connect(&self, addr: SocketAddr) -> io::Result<bool> {
        let (storage, len) = addr_to_sockaddr(&addr);
        match syscall!(connect(
            self.fd.raw(),
            &storage as *const _ as *const sockaddr,
            len
        )) {
            Ok(_) => Ok(true),
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn accept(&self) -> io::Result<(RawSocket, SocketAddr)> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&storage) as socklen_t;
        let fd = loop {
            match syscall!(accept4(
                self.fd.raw(),
                &mut storage as *mut _ as *mut sockaddr,
                &mut len,
                SOCK_CLOEXEC
            )) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        }?;
        let addr = sockaddr_to_addr(&storage, len as usize)?;
        Ok((
            RawSocket {
                fd: unsafe { FileDesc::new(fd) },
                kind: SocketKind::Tcp,
            },
            addr,
        ))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&storage) as socklen_t;
        syscall!(getsockname(
            self.fd.raw(),
            &mut storage as *mut _ as *mut sockaddr,
            &mut len
        ))?;
        sockaddr_to_addr(&storage, len as usize)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&storage) as socklen_t;
        syscall!(getpeername(
            self.fd.raw(),
            &mut storage as *mut _ as *mut sockaddr,
            &mut len
        ))?;
        sockaddr_to_addr(&storage, len as usize)
    }

    /// Reads into `buf`. On a nonblocking socket, returns `WouldBlock` once
    /// the kernel has nothing left to deliver.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = syscall!(recv(
            self.fd.raw(),
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            0
        ))?;
        Ok(n as usize)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&storage) as socklen_t;
        let n = syscall!(recvfrom(
            self.fd.raw(),
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            0,
            &mut storage as *mut _ as *mut sockaddr,
            &mut len
        ))?;
        Ok((n as usize, sockaddr_to_addr(&storage, len as usize)?))
    }

    /// Sends with `MSG_NOSIGNAL` set. Linux has no `SO_NOSIGPIPE` socket
    /// option (that's BSD/macOS only), so a write to a peer that reset the
    /// connection is kept from raising `SIGPIPE` per-call instead, and
    /// simply surfaces as `EPIPE`.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let n = syscall!(send(
            self.fd.raw(),
            buf.as_ptr() as *const c_void,
            buf.len(),
            MSG_NOSIGNAL
        ))?;
        Ok(n as usize)
    }

    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let (storage, len) = addr_to_sockaddr(&addr);
        let n = syscall!(sendto(
            self.fd.raw(),
            buf.as_ptr() as *const c_void,
            buf.len(),
            MSG_NOSIGNAL,
            &storage as *const _ as *const sockaddr,
            len
        ))?;
        Ok(n as usize)
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        let how = match how {
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        syscall!(shutdown(self.fd.raw(), how))?;
        Ok(())
    }

    /// Queries and clears `SO_ERROR` — the standard way to retrieve the
    /// result of an async `connect()` once the fd becomes writable, and of
    /// translating an `EPOLLERR` notification into a concrete cause.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        let raw: c_int = getsockopt(self.fd.raw(), libc::SOL_SOCKET, libc::SO_ERROR)?;
        if raw == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(raw)))
        }
    }
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.raw()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn tcp_accept_connect_roundtrip() {
        let listener = RawSocket::new(SocketKind::Tcp, loopback(0)).unwrap();
        listener.set_reuseaddr(true).unwrap();
        listener.bind(loopback(0)).unwrap();
        listener.listen(128).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = RawSocket::new(SocketKind::Tcp, addr).unwrap();
        let completed = client.connect(addr).unwrap();
        assert!(completed, "loopback connect should complete synchronously");

        let (server_side, _peer) = listener.accept().unwrap();

        let sent = client.send(b"ping").unwrap();
        assert_eq!(sent, 4);

        let mut buf = [0u8; 16];
        let n = server_side.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn udp_send_to_recv_from_roundtrip() {
        let a = RawSocket::new(SocketKind::Udp, loopback(0)).unwrap();
        a.bind(loopback(0)).unwrap();
        let a_addr = a.local_addr().unwrap();

        let b = RawSocket::new(SocketKind::Udp, loopback(0)).unwrap();
        b.bind(loopback(0)).unwrap();
        let b_addr = b.local_addr().unwrap();

        b.send_to(b"hello", a_addr).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = a.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, b_addr);
    }

    #[test]
    fn take_error_is_none_on_healthy_socket() {
        let sock = RawSocket::new(SocketKind::Tcp, loopback(0)).unwrap();
        assert!(sock.take_error().unwrap().is_none());
    }
}
