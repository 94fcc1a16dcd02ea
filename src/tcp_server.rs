//! A bound, listening TCP acceptor with session-aware accept handling:
//! each accepted connection is wrapped in a [`Session`] via a configurable
//! factory before being handed to the caller's new-session callback.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::{Error, ErrorCode, Result};
use crate::poll_thread_pool::PollThreadPool;
use crate::session::Session;
use crate::socket::{Socket, SocketType};
use crate::timer::TimerManager;

const DEFAULT_BACKLOG: i32 = 1024;

pub type SessionCreator = dyn Fn(String, Arc<Socket>) -> Arc<Session> + Send + Sync;
pub type NewSessionCallback = dyn Fn(Arc<Session>) + Send + Sync;

fn default_session_creator(id: String, socket: Arc<Socket>) -> Arc<Session> {
    Session::new(id, socket)
}

struct Inner {
    id: String,
    pool: PollThreadPool,
    timers: TimerManager,
    listener: Mutex<Option<Arc<Socket>>>,
    next_session_index: AtomicU64,
    session_creator: Mutex<Arc<SessionCreator>>,
    new_session_callback: Mutex<Option<Arc<NewSessionCallback>>>,
}

/// Accepts inbound TCP connections on a bound port, wraps each in a
/// [`Session`], and hands it off via [`TcpServer::set_new_session_callback`].
pub struct TcpServer(Arc<Inner>);

impl TcpServer {
    pub fn new(id: impl Into<String>, pool: PollThreadPool, timers: TimerManager) -> Self {
        TcpServer(Arc::new(Inner {
            id: id.into(),
            pool,
            timers,
            listener: Mutex::new(None),
            next_session_index: AtomicU64::new(0),
            session_creator: Mutex::new(Arc::new(default_session_creator)),
            new_session_callback: Mutex::new(None),
        }))
    }

    /// Overrides how an accepted connection's [`Session`] is constructed.
    /// Takes the generated session id and the accepted [`Socket`].
    pub fn set_session_creator<F>(&self, cb: F)
    where
        F: Fn(String, Arc<Socket>) -> Arc<Session> + Send + Sync + 'static,
    {
        *self.0.session_creator.lock().unwrap() = Arc::new(cb);
    }

    /// Invoked once per accepted connection with its freshly constructed,
    /// address-populated [`Session`].
    pub fn set_new_session_callback<F>(&self, cb: F)
    where
        F: Fn(Arc<Session>) + Send + Sync + 'static,
    {
        *self.0.new_session_callback.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Binds and listens on `host:port` with the given `backlog`
    /// (`<= 0` uses [`DEFAULT_BACKLOG`]). Fails with
    /// [`ErrorCode::AlreadyInitialized`] if already started. `host` of
    /// `""` binds `INADDR_ANY`; `port` of `0` picks a kernel-assigned port,
    /// retrievable afterward via [`TcpServer::local_addr`].
    pub fn start(&self, host: &str, port: u16, backlog: i32) -> Result<SocketAddr> {
        let mut listener_guard = self.0.listener.lock().unwrap();
        if listener_guard.is_some() {
            return Err(Error::new(ErrorCode::AlreadyInitialized));
        }

        let socket = Socket::new(self.0.id.clone(), self.0.pool.acquire(), self.0.timers.clone());
        socket.initialize(SocketType::TcpServer, true)?;
        socket.set_on_error(|err| warn!(error = %err, "tcp server listener error"));

        let inner = self.0.clone();
        socket.set_on_accept(move |child, peer_addr| {
            let index = inner.next_session_index.fetch_add(1, Ordering::SeqCst);
            let session_id = format!("{}-{}", inner.id, index);
            let creator = inner.session_creator.lock().unwrap().clone();
            let session = creator(session_id, child);
            session.set_address(peer_addr);

            let callback = inner.new_session_callback.lock().unwrap().clone();
            if let Some(cb) = callback {
                cb(session);
            }
        });

        socket.bind(port, host)?;

        let backlog = if backlog <= 0 { DEFAULT_BACKLOG } else { backlog };
        if let Err(e) = socket.listen(backlog) {
            socket.close();
            return Err(e);
        }

        let addr = socket.local_addr().expect("bound listener has a local address");
        info!(%addr, backlog, "tcp server started");

        *listener_guard = Some(socket);
        Ok(addr)
    }

    /// Closes and releases the listening socket. A no-op if not running.
    pub fn stop(&self) {
        if let Some(socket) = self.0.listener.lock().unwrap().take() {
            socket.close();
            info!("tcp server stopped");
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.0.listener.lock().unwrap().as_ref()?.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.0.listener.lock().unwrap().is_some()
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn start_then_stop_releases_the_port() {
        let pool = PollThreadPool::initialize(1).unwrap();
        let timers = TimerManager::new();
        let server = TcpServer::new("srv", pool, timers);

        let addr = server.start("127.0.0.1", 0, 0).unwrap();
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));

        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn starting_twice_fails_with_already_initialized() {
        let pool = PollThreadPool::initialize(1).unwrap();
        let timers = TimerManager::new();
        let server = TcpServer::new("srv", pool, timers);

        server.start("127.0.0.1", 0, 0).unwrap();
        let err = server.start("127.0.0.1", 0, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyInitialized);
    }

    #[test]
    fn accepted_connections_produce_sessions_with_peer_address() {
        crate::test_support::init_tracing();
        let pool = PollThreadPool::initialize(2).unwrap();
        let timers = TimerManager::new();
        let server = TcpServer::new("srv", pool, timers.clone());

        let addr = server.start("127.0.0.1", 0, 0).unwrap();

        let (tx, rx) = mpsc::channel();
        server.set_new_session_callback(move |session| {
            tx.send(session.address()).unwrap();
        });

        let client_pool = PollThreadPool::initialize(1).unwrap();
        let client = Socket::new("client", client_pool.acquire(), timers);
        client.initialize(SocketType::TcpClient, true).unwrap();
        let (done_tx, done_rx) = mpsc::channel();
        client.connect(&addr.ip().to_string(), addr.port(), Duration::from_secs(1), move |code| {
            done_tx.send(code).unwrap();
        });

        done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let peer_addr = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(peer_addr.is_some());
    }
}
