//! Thin wrappers around the raw Linux syscalls the reactor needs: socket
//! creation and options, epoll registration, and an fd-owning RAII guard.
//! Everything above this module works in terms of these types and never
//! calls `libc` directly.

/// Turns a `-1` return into `io::Error::last_os_error()`. Callers that can
/// receive `EINTR` (`accept`, blocking `connect`, etc.) loop on it themselves
/// at the call site rather than here, since not every wrapped syscall should
/// be retried (e.g. a nonblocking `connect` returning `EINPROGRESS` is not an
/// error at all).
macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub(crate) use syscall;

mod epoll;
mod fd;
mod socket;

pub use epoll::{Epoll, Events, MAX_EVENTS, WAIT_TIMEOUT};
pub use fd::FileDesc;
pub use socket::{RawSocket, SocketKind, DEFAULT_BUF_SIZE};
