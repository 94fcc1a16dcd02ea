//! The per-fd state machine: owns a raw socket, a FIFO send queue with a
//! partial-send cursor, and the discipline for arming/disarming interest
//! in writability. Every instance is pinned to one [`PollThread`] for its
//! lifetime.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::buffer::SendEnvelope;
use crate::error::{Error, ErrorCode, Result};
use crate::event::EventMask;
use crate::poll_thread::PollThread;
use crate::sys::{RawSocket, SocketKind, DEFAULT_BUF_SIZE};
use crate::timer::{TimerHandle, TimerManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Invalid,
    TcpServer,
    TcpClient,
    Udp,
}

pub type OnReadCallback = dyn Fn(&[u8], Option<SocketAddr>) + Send + Sync;
pub type OnErrorCallback = dyn Fn(Error) + Send + Sync;
pub type OnAcceptCallback = dyn Fn(Arc<Socket>, SocketAddr) + Send + Sync;
pub type OnBeforeCreateCallback = dyn Fn() -> Arc<Socket> + Send + Sync;
pub type OnSentResultCallback = dyn Fn(&SendEnvelope, bool) + Send + Sync;
pub type OnClosedCallback = dyn Fn() + Send + Sync;

struct Inner {
    socket_type: SocketType,
    raw: Option<RawSocket>,
    is_async: bool,
    connecting: bool,
    connect_callback: Option<Box<dyn FnOnce(ErrorCode) + Send>>,
    connect_timeout: Option<TimerHandle>,
    next_accepted_id: u64,
}

/// A per-fd socket: TCP listener, TCP client/accepted connection, or UDP
/// endpoint. Always held behind an `Arc` so event callbacks registered with
/// a [`PollThread`] can hold a [`Weak`] back-reference without creating a
/// cycle (see module docs on [`crate::poll_thread`]).
pub struct Socket {
    id: String,
    poll_thread: PollThread,
    timers: TimerManager,
    inner: Mutex<Inner>,
    send_queue: Mutex<VecDeque<SendEnvelope>>,
    sending_envelope: Mutex<Option<SendEnvelope>>,
    available_send: AtomicBool,
    self_weak: Weak<Socket>,
    on_read: Mutex<Option<Arc<OnReadCallback>>>,
    on_error: Mutex<Option<Arc<OnErrorCallback>>>,
    on_accept: Mutex<Option<Arc<OnAcceptCallback>>>,
    on_before_create: Mutex<Option<Arc<OnBeforeCreateCallback>>>,
    on_sent_result: Mutex<Option<Arc<OnSentResultCallback>>>,
    on_closed: Mutex<Option<Arc<OnClosedCallback>>>,
}

fn invoke_guarded(socket_id: &str, what: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        error!(socket = socket_id, what, "callback panicked");
    }
}

fn apply_standard_options(raw: &RawSocket, socket_type: SocketType, is_async: bool) -> Result<()> {
    let wrap = |e: io::Error| Error::from_io(ErrorCode::SocketCreateFailed, e);

    raw.set_reuseaddr(true).map_err(wrap)?;
    raw.set_nonblocking(is_async).map_err(wrap)?;

    // Linux has no `SO_NOSIGPIPE`; SIGPIPE suppression happens per-send via
    // `MSG_NOSIGNAL` in `RawSocket::send`/`send_to` instead of here.
    if socket_type == SocketType::TcpClient {
        raw.set_nodelay(true).map_err(wrap)?;
    }

    if matches!(socket_type, SocketType::TcpClient | SocketType::Udp) {
        raw.set_send_buf(DEFAULT_BUF_SIZE).map_err(wrap)?;
        raw.set_recv_buf(DEFAULT_BUF_SIZE).map_err(wrap)?;
    }

    raw.set_linger(0).map_err(wrap)?;
    Ok(())
}

impl Socket {
    pub fn new(id: impl Into<String>, poll_thread: PollThread, timers: TimerManager) -> Arc<Socket> {
        Arc::new_cyclic(|weak| Socket {
            id: id.into(),
            poll_thread,
            timers,
            inner: Mutex::new(Inner {
                socket_type: SocketType::Invalid,
                raw: None,
                is_async: true,
                connecting: false,
                connect_callback: None,
                connect_timeout: None,
                next_accepted_id: 0,
            }),
            send_queue: Mutex::new(VecDeque::new()),
            sending_envelope: Mutex::new(None),
            available_send: AtomicBool::new(false),
            self_weak: weak.clone(),
            on_read: Mutex::new(None),
            on_error: Mutex::new(None),
            on_accept: Mutex::new(None),
            on_before_create: Mutex::new(None),
            on_sent_result: Mutex::new(None),
            on_closed: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.inner.lock().unwrap().raw.as_ref().map(|r| r.as_raw_fd())
    }

    pub fn socket_type(&self) -> SocketType {
        self.inner.lock().unwrap().socket_type
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().unwrap().raw.as_ref()?.local_addr().ok()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().unwrap().raw.as_ref()?.peer_addr().ok()
    }

    pub fn set_on_read<F>(&self, cb: F)
    where
        F: Fn(&[u8], Option<SocketAddr>) + Send + Sync + 'static,
    {
        *self.on_read.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_on_error<F>(&self, cb: F)
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        *self.on_error.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_on_accept<F>(&self, cb: F)
    where
        F: Fn(Arc<Socket>, SocketAddr) + Send + Sync + 'static,
    {
        *self.on_accept.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_on_before_create<F>(&self, cb: F)
    where
        F: Fn() -> Arc<Socket> + Send + Sync + 'static,
    {
        *self.on_before_create.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_on_sent_result<F>(&self, cb: F)
    where
        F: Fn(&SendEnvelope, bool) + Send + Sync + 'static,
    {
        *self.on_sent_result.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_on_closed<F>(&self, cb: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_closed.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Invalid -> Unbound. Creates the fd and applies the options standard
    /// for `socket_type`.
    pub fn initialize(&self, socket_type: SocketType, is_async: bool) -> Result<()> {
        let kind = match socket_type {
            SocketType::TcpServer | SocketType::TcpClient => SocketKind::Tcp,
            SocketType::Udp => SocketKind::Udp,
            SocketType::Invalid => return Err(Error::new(ErrorCode::SocketCreateFailed)),
        };

        let family_hint = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let raw = RawSocket::new(kind, family_hint).map_err(|e| {
            error!(socket = %self.id, error = %e, "socket create failed");
            Error::from_io(ErrorCode::SocketCreateFailed, e)
        })?;

        apply_standard_options(&raw, socket_type, is_async)?;

        let mut inner = self.inner.lock().unwrap();
        inner.socket_type = socket_type;
        inner.is_async = is_async;
        inner.raw = Some(raw);
        debug!(socket = %self.id, ?socket_type, "socket initialized");
        Ok(())
    }

    /// Unbound -> Bound. `ip` of `""` or `"0.0.0.0"` means `INADDR_ANY`;
    /// `port` of `0` means kernel-assigned.
    pub fn bind(&self, port: u16, ip: &str) -> Result<()> {
        let ip_addr: Ipv4Addr = if ip.is_empty() || ip == "0.0.0.0" {
            Ipv4Addr::UNSPECIFIED
        } else {
            ip.parse().map_err(|_| Error::new(ErrorCode::SocketBindFailed))?
        };
        let addr = SocketAddr::new(IpAddr::V4(ip_addr), port);

        let inner = self.inner.lock().unwrap();
        let raw = inner
            .raw
            .as_ref()
            .ok_or_else(|| Error::new(ErrorCode::SocketBindFailed))?;
        raw.bind(addr).map_err(|e| {
            error!(socket = %self.id, %addr, error = %e, "bind failed");
            Error::from_io(ErrorCode::SocketBindFailed, e)
        })
    }

    /// Bound (TcpServer) -> Listening, or registers a Udp socket's events.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        let socket_type = self.inner.lock().unwrap().socket_type;
        match socket_type {
            SocketType::TcpServer => {
                {
                    let inner = self.inner.lock().unwrap();
                    let raw = inner
                        .raw
                        .as_ref()
                        .ok_or_else(|| Error::new(ErrorCode::SocketListenFailed))?;
                    raw.listen(backlog).map_err(|e| {
                        error!(socket = %self.id, error = %e, "listen failed");
                        Error::from_io(ErrorCode::SocketListenFailed, e)
                    })?;
                }
                debug!(socket = %self.id, backlog, "socket listening");
                self.register_event(EventMask::READABLE | EventMask::ERROR);
            }
            SocketType::Udp => {
                self.register_event(EventMask::READABLE | EventMask::WRITABLE | EventMask::ERROR);
            }
            _ => {}
        }
        Ok(())
    }

    /// Unbound (TcpClient) -> issues a non-blocking connect. `host` must be
    /// a literal IPv4 address; DNS resolution is out of scope. Arms a
    /// connect-timeout timer when the connect does not complete
    /// synchronously.
    pub fn connect<F>(&self, host: &str, port: u16, timeout: Duration, callback: F)
    where
        F: FnOnce(ErrorCode) + Send + 'static,
    {
        debug!(socket = %self.id, host, port, "connecting");

        let ip: Ipv4Addr = match host.parse() {
            Ok(ip) => ip,
            Err(_) => {
                callback(ErrorCode::SocketConnectFailed);
                return;
            }
        };
        let addr = SocketAddr::new(IpAddr::V4(ip), port);

        let completed = {
            let inner = self.inner.lock().unwrap();
            match inner.raw.as_ref() {
                Some(raw) => raw.connect(addr),
                None => {
                    drop(inner);
                    callback(ErrorCode::SocketConnectFailed);
                    return;
                }
            }
        };

        match completed {
            Ok(true) => {
                self.register_event(EventMask::READABLE | EventMask::WRITABLE | EventMask::ERROR);
                callback(ErrorCode::Success);
            }
            Ok(false) => {
                debug!(socket = %self.id, "connect in progress");
                let weak = self.self_weak.clone();
                let handle = self.timers.add_timer(timeout, None, move || {
                    if let Some(strong) = weak.upgrade() {
                        strong.on_connect_timeout();
                    }
                });
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.connecting = true;
                    inner.connect_callback = Some(Box::new(callback));
                    inner.connect_timeout = Some(handle);
                }
                self.register_event(EventMask::READABLE | EventMask::WRITABLE | EventMask::ERROR);
            }
            Err(e) => {
                error!(socket = %self.id, %addr, error = %e, "connect failed");
                callback(ErrorCode::SocketConnectFailed);
            }
        }
    }

    fn on_connect_timeout(&self) {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.connecting {
                return;
            }
            inner.connecting = false;
            inner.connect_timeout = None;
            inner.connect_callback.take()
        };

        warn!(socket = %self.id, "connect timed out");
        if let Some(cb) = callback {
            invoke_guarded(&self.id, "connect timeout callback", || {
                cb(ErrorCode::SocketConnectFailed)
            });
        }
        self.close();
    }

    fn register_event(&self, mask: EventMask) {
        let Some(fd) = self.raw_fd() else { return };
        let weak = self.self_weak.clone();
        let _ = self.poll_thread.add_event(fd, mask, move |event_mask| {
            if let Some(strong) = weak.upgrade() {
                strong.on_poll_event(event_mask);
            }
        });
    }

    fn start_writable_event(&self) {
        self.available_send.store(false, Ordering::SeqCst);
        if let Some(fd) = self.raw_fd() {
            let _ = self.poll_thread.modify_event(
                fd,
                EventMask::READABLE | EventMask::WRITABLE | EventMask::ERROR,
                None,
            );
        }
    }

    fn stop_writable_event(&self) {
        if let Some(fd) = self.raw_fd() {
            let _ = self
                .poll_thread
                .modify_event(fd, EventMask::READABLE | EventMask::ERROR, None);
        }
    }

    fn on_poll_event(&self, mask: EventMask) {
        let socket_type = self.inner.lock().unwrap().socket_type;

        if mask.is_readable() {
            if socket_type == SocketType::TcpServer {
                self.on_accept_event();
            } else {
                self.on_readable_event();
            }
        }

        if mask.is_writable() {
            self.on_writable_event();
        }

        if mask.is_error() {
            self.on_error_event();
        }
    }

    fn on_accept_event(&self) {
        let accepted = {
            let inner = self.inner.lock().unwrap();
            match inner.raw.as_ref() {
                Some(raw) => raw.accept(),
                None => return,
            }
        };

        let (raw, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(socket = %self.id, error = %e, "accept failed");
                return;
            }
        };

        if let Err(e) = apply_standard_options(&raw, SocketType::TcpClient, true) {
            error!(socket = %self.id, error = %e, "applying options to accepted socket failed");
            return;
        }

        let child_id = {
            let mut inner = self.inner.lock().unwrap();
            inner.next_accepted_id += 1;
            format!("{}-{}", self.id, inner.next_accepted_id)
        };

        let factory = self.on_before_create.lock().unwrap().clone();
        let child = match factory {
            Some(factory) => factory(),
            None => Socket::new(child_id, self.poll_thread.clone(), self.timers.clone()),
        };

        {
            let mut child_inner = child.inner.lock().unwrap();
            child_inner.socket_type = SocketType::TcpClient;
            child_inner.is_async = true;
            child_inner.raw = Some(raw);
        }
        child.register_event(EventMask::READABLE | EventMask::WRITABLE | EventMask::ERROR);

        info!(socket = %self.id, child = %child.id, %peer_addr, "accepted connection");

        let on_accept = self.on_accept.lock().unwrap().clone();
        if let Some(cb) = on_accept {
            invoke_guarded(&self.id, "accept callback", || cb(child, peer_addr));
        }
    }

    fn on_readable_event(&self) {
        let socket_type = self.inner.lock().unwrap().socket_type;
        let mut buf = self.poll_thread.shared_read_buffer();

        loop {
            let recv_result = {
                let inner = self.inner.lock().unwrap();
                match inner.raw.as_ref() {
                    Some(raw) => raw.recv_from(buf.writable_tail()),
                    None => return,
                }
            };

            match recv_result {
                Ok((0, _)) if socket_type != SocketType::Udp => {
                    drop(buf);
                    info!(socket = %self.id, "remote closed connection");
                    self.close();
                    return;
                }
                Ok((n, addr)) => {
                    if buf.increase_content_size(n).is_err() {
                        warn!(socket = %self.id, "shared read buffer exhausted");
                        break;
                    }

                    let on_read = self.on_read.lock().unwrap().clone();
                    if let Some(cb) = on_read {
                        let data = buf.data();
                        let addr_opt = (socket_type == SocketType::Udp).then_some(addr);
                        invoke_guarded(&self.id, "read callback", || cb(data, addr_opt));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(socket = %self.id, error = %e, "read failed");
                    drop(buf);
                    self.close();
                    return;
                }
            }
        }
    }

    fn on_writable_event(&self) {
        let connecting = self.inner.lock().unwrap().connecting;

        if connecting {
            let (callback, timer) = {
                let mut inner = self.inner.lock().unwrap();
                inner.connecting = false;
                (inner.connect_callback.take(), inner.connect_timeout.take())
            };
            if let Some(t) = timer {
                t.cancel();
            }

            let so_error = {
                let inner = self.inner.lock().unwrap();
                inner.raw.as_ref().and_then(|r| r.take_error().ok()).flatten()
            };

            match so_error {
                Some(e) => {
                    warn!(socket = %self.id, error = %e, "connect failed");
                    if let Some(cb) = callback {
                        invoke_guarded(&self.id, "connect callback", || {
                            cb(ErrorCode::SocketConnectFailed)
                        });
                    }
                    self.close();
                }
                None => {
                    debug!(socket = %self.id, "connect completed");
                    if let Some(cb) = callback {
                        invoke_guarded(&self.id, "connect callback", || cb(ErrorCode::Success));
                    }
                }
            }
            return;
        }

        self.available_send.store(true, Ordering::SeqCst);
        self.flush(true);
    }

    fn on_error_event(&self) {
        let so_error = {
            let inner = self.inner.lock().unwrap();
            inner.raw.as_ref().and_then(|r| r.take_error().ok()).flatten()
        };

        let reported = match so_error {
            Some(io_err) => {
                warn!(socket = %self.id, error = %io_err, "socket error event");
                Error::from_io(ErrorCode::Success, io_err)
            }
            None => Error::new(ErrorCode::Success),
        };

        let on_error = self.on_error.lock().unwrap().clone();
        if let Some(cb) = on_error {
            invoke_guarded(&self.id, "error callback", || cb(reported));
        }
    }

    fn flush(&self, by_poll_thread: bool) {
        let mut sending = self.sending_envelope.lock().unwrap();

        if matches!(sending.as_ref(), Some(e) if e.is_finished()) {
            let envelope = sending.take().unwrap();
            let on_sent = self.on_sent_result.lock().unwrap().clone();
            if let Some(cb) = on_sent {
                invoke_guarded(&self.id, "sent result callback", || cb(&envelope, true));
            }
        }

        if sending.is_none() {
            let mut queue = self.send_queue.lock().unwrap();
            *sending = queue.pop_front();
        }

        if sending.is_none() {
            self.stop_writable_event();
            return;
        }

        let socket_type = self.inner.lock().unwrap().socket_type;

        loop {
            let envelope = sending.as_mut().unwrap();
            if envelope.is_finished() {
                break;
            }

            let result = {
                let inner = self.inner.lock().unwrap();
                match inner.raw.as_ref() {
                    Some(raw) => match (socket_type, envelope.addr()) {
                        (SocketType::Udp, Some(addr)) => raw.send_to(envelope.remaining(), addr),
                        _ => raw.send(envelope.remaining()),
                    },
                    None => return,
                }
            };

            match result {
                Ok(n) => sending.as_mut().unwrap().advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(socket = %self.id, error = %e, "send failed, closing socket");
                    let finished = sending.take().unwrap();
                    let on_sent = self.on_sent_result.lock().unwrap().clone();
                    if let Some(cb) = on_sent {
                        invoke_guarded(&self.id, "sent result callback", || cb(&finished, false));
                    }
                    drop(sending);
                    self.available_send.store(false, Ordering::SeqCst);
                    self.close();
                    return;
                }
            }
        }

        self.available_send.store(false, Ordering::SeqCst);

        if !by_poll_thread {
            self.start_writable_event();
        }
    }

    /// Enqueues `bytes` for connected-mode delivery. Returns the number of
    /// bytes queued (`0` if the socket is invalid or `bytes` is empty).
    pub fn send(&self, bytes: &[u8], try_flush: bool) -> usize {
        self.send_generic(bytes, None, try_flush)
    }

    /// Enqueues `bytes` addressed to `host:port` (UDP). `host` must be a
    /// literal IPv4 address.
    pub fn send_to(&self, bytes: &[u8], host: &str, port: u16, try_flush: bool) -> usize {
        let addr = host
            .parse::<Ipv4Addr>()
            .ok()
            .map(|ip| SocketAddr::new(IpAddr::V4(ip), port));
        self.send_generic(bytes, addr, try_flush)
    }

    fn send_generic(&self, bytes: &[u8], addr: Option<SocketAddr>, try_flush: bool) -> usize {
        if self.raw_fd().is_none() || bytes.is_empty() {
            return 0;
        }

        let size = bytes.len();
        {
            let mut queue = self.send_queue.lock().unwrap();
            queue.push_back(SendEnvelope::new(bytes, addr));
        }

        if try_flush && self.available_send.load(Ordering::SeqCst) {
            self.flush(false);
        }

        size
    }

    /// Any state -> Invalid. Idempotent: the closed callback fires exactly
    /// once per transition into Invalid.
    pub fn close(&self) {
        let already_closed = {
            let inner = self.inner.lock().unwrap();
            inner.socket_type == SocketType::Invalid && inner.raw.is_none()
        };
        if already_closed {
            return;
        }

        debug!(socket = %self.id, "closing socket");

        if let Some(fd) = self.raw_fd() {
            let _ = self.poll_thread.del_event(fd, None);
        }

        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(timer) = inner.connect_timeout.take() {
                timer.cancel();
            }
            inner.connect_callback = None;
            inner.connecting = false;
            inner.socket_type = SocketType::Invalid;
            inner.raw = None;
        }

        self.available_send.store(false, Ordering::SeqCst);

        let dropped_queue: Vec<SendEnvelope> = self.send_queue.lock().unwrap().drain(..).collect();
        let dropped_sending = self.sending_envelope.lock().unwrap().take();

        let on_sent = self.on_sent_result.lock().unwrap().clone();
        if let Some(cb) = &on_sent {
            for envelope in dropped_sending.into_iter().chain(dropped_queue) {
                invoke_guarded(&self.id, "sent result callback (close)", || cb(&envelope, false));
            }
        }

        let on_closed = self.on_closed.lock().unwrap().clone();
        if let Some(cb) = on_closed {
            invoke_guarded(&self.id, "closed callback", || cb());
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::poll_thread_pool::PollThreadPool;
    use std::sync::mpsc;
    use std::time::Duration;

    fn pool() -> PollThreadPool {
        PollThreadPool::initialize(2).unwrap()
    }

    #[test]
    fn tcp_echo_roundtrip() {
        crate::test_support::init_tracing();
        let pool = pool();
        let timers = TimerManager::new();

        let server = Socket::new("server", pool.acquire(), timers.clone());
        server.initialize(SocketType::TcpServer, true).unwrap();
        server.bind(0, "127.0.0.1").unwrap();
        let addr = server.local_addr().unwrap();

        let (accepted_tx, accepted_rx) = mpsc::channel();
        server.set_on_accept(move |child, _addr| {
            let echo_child = child.clone();
            child.set_on_read(move |data, _| {
                echo_child.send(data, true);
            });
            accepted_tx.send(child).unwrap();
        });
        server.listen(128).unwrap();

        let client = Socket::new("client", pool.acquire(), timers.clone());
        client.initialize(SocketType::TcpClient, true).unwrap();

        let (recv_tx, recv_rx) = mpsc::channel();
        client.set_on_read(move |data, _| {
            recv_tx.send(data.to_vec()).unwrap();
        });

        let (connect_tx, connect_rx) = mpsc::channel();
        client.connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(1),
            move |code| {
                connect_tx.send(code).unwrap();
            },
        );

        assert_eq!(
            connect_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            ErrorCode::Success
        );
        let _server_side = accepted_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        client.send(b"abcdefg", true);

        let echoed = recv_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(echoed, b"abcdefg");
    }

    #[test]
    fn udp_echo_roundtrip() {
        crate::test_support::init_tracing();
        let pool = pool();
        let timers = TimerManager::new();

        let server = Socket::new("udp-server", pool.acquire(), timers.clone());
        server.initialize(SocketType::Udp, true).unwrap();
        server.bind(0, "127.0.0.1").unwrap();
        let server_addr = server.local_addr().unwrap();
        let server_for_echo = server.clone();
        server.set_on_read(move |data, addr| {
            let addr = addr.unwrap();
            server_for_echo.send_to(data, &addr.ip().to_string(), addr.port(), true);
        });
        server.listen(0).unwrap();

        let client = Socket::new("udp-client", pool.acquire(), timers.clone());
        client.initialize(SocketType::Udp, true).unwrap();
        client.bind(0, "127.0.0.1").unwrap();
        client.listen(0).unwrap();

        let (tx, rx) = mpsc::channel();
        client.set_on_read(move |data, _| {
            tx.send(data.to_vec()).unwrap();
        });

        client.send_to(b"abcdefg", &server_addr.ip().to_string(), server_addr.port(), true);

        let echoed = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(echoed, b"abcdefg");
    }

    #[test]
    fn connect_to_unreachable_port_reports_failure() {
        let pool = pool();
        let timers = TimerManager::new();

        // A listening socket we immediately close frees its port while
        // guaranteeing nothing else grabbed it between the two calls is not
        // airtight, but connecting to an address nothing listens on
        // reliably yields ECONNREFUSED on loopback, which is what this test
        // exercises.
        let probe = Socket::new("probe", pool.acquire(), timers.clone());
        probe.initialize(SocketType::TcpServer, true).unwrap();
        probe.bind(0, "127.0.0.1").unwrap();
        let addr = probe.local_addr().unwrap();
        probe.close();

        let client = Socket::new("client", pool.acquire(), timers.clone());
        client.initialize(SocketType::TcpClient, true).unwrap();

        let (tx, rx) = mpsc::channel();
        client.connect(&addr.ip().to_string(), addr.port(), Duration::from_secs(2), move |code| {
            tx.send(code).unwrap();
        });

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(3)).unwrap(),
            ErrorCode::SocketConnectFailed
        );
    }

    #[test]
    fn send_with_empty_buffer_is_a_noop() {
        let pool = pool();
        let timers = TimerManager::new();
        let socket = Socket::new("s", pool.acquire(), timers);
        socket.initialize(SocketType::Udp, true).unwrap();
        assert_eq!(socket.send(b"", true), 0);
    }

    #[test]
    fn connect_timeout_fires_when_nothing_responds() {
        crate::test_support::init_tracing();
        let pool = pool();
        let timers = TimerManager::new();

        // 192.0.2.0/24 is TEST-NET-1 (RFC 5737): reserved for documentation,
        // routed nowhere, guaranteed not to answer.
        let client = Socket::new("client", pool.acquire(), timers);
        client.initialize(SocketType::TcpClient, true).unwrap();

        let (tx, rx) = mpsc::channel();
        client.connect("192.0.2.1", 9, Duration::from_millis(200), move |code| {
            tx.send(code).unwrap();
        });

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            ErrorCode::SocketConnectFailed
        );
    }
}
