//! An optional per-connection adapter: owns a [`Socket`] and survives its
//! fd's lifetime, so protocol state (a cached peer address, partially
//! parsed frames) outlives any individual close/reconnect. Receive and
//! sent-result dispatch go through [`SessionHandler`], the idiomatic
//! stand-in for the virtual methods a subclass would override; error and
//! disconnect notification are plain settable callbacks, matching the
//! public surface a caller actually needs day to day.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

use crate::buffer::SendEnvelope;
use crate::error::Error;
use crate::socket::Socket;

pub type OnErrorCallback = dyn Fn(&Session, Error) + Send + Sync;
pub type OnDisconnectedCallback = dyn Fn(&Session) + Send + Sync;

/// Override points for a session's application-level behavior. Both
/// methods default to no-ops; [`Session::new`] uses a handler that does
/// nothing, so a plain `Session` is a valid (silent) connection wrapper and
/// callers that want actual protocol logic supply their own handler via
/// [`Session::with_handler`].
pub trait SessionHandler: Send + Sync {
    fn on_received(&self, _session: &Session, _data: &[u8], _addr: Option<SocketAddr>) {}
    fn on_sent_result(&self, _session: &Session, _envelope: &SendEnvelope, _success: bool) {}
}

struct NoopHandler;
impl SessionHandler for NoopHandler {}

fn invoke_guarded(session_id: &str, what: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        error!(session = session_id, what, "callback panicked");
    }
}

/// A connection-scoped wrapper around one [`Socket`]. Created once per
/// accepted (or user-established) connection; `close` releases the
/// underlying fd but the `Session` value itself lives until its last `Arc`
/// reference is dropped.
pub struct Session {
    id: String,
    socket: Arc<Socket>,
    address: Mutex<Option<SocketAddr>>,
    handler: Arc<dyn SessionHandler>,
    error_callback: Mutex<Option<Arc<OnErrorCallback>>>,
    disconnected_callback: Mutex<Option<Arc<OnDisconnectedCallback>>>,
}

impl Session {
    pub fn new(id: impl Into<String>, socket: Arc<Socket>) -> Arc<Session> {
        Session::with_handler(id, socket, Arc::new(NoopHandler))
    }

    pub fn with_handler(id: impl Into<String>, socket: Arc<Socket>, handler: Arc<dyn SessionHandler>) -> Arc<Session> {
        let id = id.into();

        Arc::new_cyclic(|weak: &Weak<Session>| {
            wire_socket_callbacks(&socket, weak.clone());

            Session {
                id,
                socket,
                address: Mutex::new(None),
                handler,
                error_callback: Mutex::new(None),
                disconnected_callback: Mutex::new(None),
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> Option<SocketAddr> {
        *self.address.lock().unwrap()
    }

    pub fn set_address(&self, addr: SocketAddr) {
        *self.address.lock().unwrap() = Some(addr);
    }

    pub fn set_error_callback<F>(&self, cb: F)
    where
        F: Fn(&Session, Error) + Send + Sync + 'static,
    {
        *self.error_callback.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_disconnected_callback<F>(&self, cb: F)
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        *self.disconnected_callback.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Sends to the cached peer address if one was set via
    /// [`Session::set_address`] and the underlying socket is UDP;
    /// otherwise forwards to connected-mode `Socket::send`.
    pub fn send(&self, bytes: &[u8]) -> usize {
        match self.address() {
            Some(addr) => self.socket.send_to(bytes, &addr.ip().to_string(), addr.port(), true),
            None => self.socket.send(bytes, true),
        }
    }

    pub fn close(&self) {
        self.socket.close();
    }

    fn dispatch_received(&self, data: &[u8], addr: Option<SocketAddr>) {
        invoke_guarded(&self.id, "on_received", || {
            self.handler.on_received(self, data, addr);
        });
    }

    fn dispatch_sent_result(&self, envelope: &SendEnvelope, success: bool) {
        invoke_guarded(&self.id, "on_sent_result", || {
            self.handler.on_sent_result(self, envelope, success);
        });
    }

    fn dispatch_error(&self, err: Error) {
        let cb = self.error_callback.lock().unwrap().clone();
        if let Some(cb) = cb {
            invoke_guarded(&self.id, "error callback", || cb(self, err));
        }
    }

    fn dispatch_closed(&self) {
        self.unregister_from_socket();

        let cb = self.disconnected_callback.lock().unwrap().clone();
        if let Some(cb) = cb {
            invoke_guarded(&self.id, "disconnected callback", || cb(self));
        }
    }

    /// Overwrites the socket's callback slots with no-ops, dropping the
    /// weak-capturing closures installed in [`wire_socket_callbacks`] so no
    /// further socket event can reach this (already-closing) session.
    fn unregister_from_socket(&self) {
        self.socket.set_on_read(|_, _| {});
        self.socket.set_on_sent_result(|_, _| {});
        self.socket.set_on_error(|_| {});
        self.socket.set_on_closed(|| {});
    }
}

fn wire_socket_callbacks(socket: &Arc<Socket>, weak: Weak<Session>) {
    let w = weak.clone();
    socket.set_on_read(move |data, addr| {
        if let Some(session) = w.upgrade() {
            session.dispatch_received(data, addr);
        }
    });

    let w = weak.clone();
    socket.set_on_sent_result(move |envelope, success| {
        if let Some(session) = w.upgrade() {
            session.dispatch_sent_result(envelope, success);
        }
    });

    let w = weak.clone();
    socket.set_on_error(move |err| {
        if let Some(session) = w.upgrade() {
            session.dispatch_error(err);
        }
    });

    socket.set_on_closed(move || {
        if let Some(session) = weak.upgrade() {
            session.dispatch_closed();
        }
    });
}
