//! A small epoll-based reactor for TCP and UDP sockets on Linux.
//!
//! Each [`Socket`] owns one fd and is pinned to a single [`PollThread`] for
//! its lifetime; a process-wide [`PollThreadPool`] hands sockets their
//! thread round-robin. Reads are dispatched as borrowed byte views straight
//! off a poll thread's shared buffer; writes go through a FIFO send queue
//! that drains opportunistically and re-arms kernel writability interest
//! only when it has to.
//!
//! [`Session`] and [`TcpServer`] are optional higher layers: a `TcpServer`
//! accepts connections and wraps each one in a `Session`, which survives
//! its socket's close and gives protocol code a stable handle to hang
//! state off of.
//!
//! ```no_run
//! use reactor_socket::{PollThreadPool, Socket, SocketType, TimerManager};
//! use std::sync::Arc;
//!
//! let pool = PollThreadPool::initialize(-1).unwrap();
//! let timers = TimerManager::new();
//!
//! let server = Socket::new("echo-server", pool.acquire(), timers.clone());
//! server.initialize(SocketType::TcpServer, true).unwrap();
//! server.bind(1234, "127.0.0.1").unwrap();
//! server.set_on_accept(|child: Arc<Socket>, _addr| {
//!     let echo = child.clone();
//!     child.set_on_read(move |data, _| {
//!         echo.send(data, true);
//!     });
//! });
//! server.listen(1024).unwrap();
//! ```

pub mod buffer;
pub mod error;
pub mod event;
pub mod poll_thread;
pub mod poll_thread_pool;
pub mod session;
mod sys;
pub mod socket;
pub mod tcp_server;
pub mod timer;

pub use buffer::{CopyBuffer, MutableBuffer, SendEnvelope};
pub use error::{Error, ErrorCode, Result};
pub use event::EventMask;
pub use poll_thread::PollThread;
pub use poll_thread_pool::PollThreadPool;
pub use session::{Session, SessionHandler};
pub use socket::{Socket, SocketType};
pub use tcp_server::TcpServer;
pub use timer::{TimerHandle, TimerManager};

/// Shared `tracing` setup for in-crate unit tests, mirroring the
/// `Once`-guarded subscriber every test in a suite should install exactly
/// once so `trace!`/`debug!`/`info!`/`warn!`/`error!` calls become visible
/// under `cargo test -- --nocapture`.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Once;

    static TRACING: Once = Once::new();

    pub(crate) fn init_tracing() {
        TRACING.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
                .with_test_writer()
                .init();
        });
    }
}
