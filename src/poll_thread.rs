//! A single dispatch loop bound to one `epoll` instance: owns the
//! multiplexer fd, a per-fd callback registry, and a shared read buffer
//! reused by every read callback dispatched on this thread.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{error, info, trace, warn};

use crate::buffer::MutableBuffer;
use crate::error::{Error, ErrorCode, Result};
use crate::event::EventMask;
use crate::sys::{Epoll, Events, MAX_EVENTS, WAIT_TIMEOUT};

const SHARED_READ_BUFFER_SIZE: usize = 1024 * 1024;

pub type PollEventCallback = dyn Fn(EventMask) + Send + Sync;
pub type PollCompleteCallback = Box<dyn FnOnce(bool) + Send>;

struct Shared {
    epoll: Epoll,
    callbacks: Mutex<HashMap<RawFd, Arc<PollEventCallback>>>,
    read_buffer: Mutex<MutableBuffer>,
    stop: std::sync::atomic::AtomicBool,
}

/// One poll thread. Cheap to clone: clones share the same worker and
/// registry, matching [`crate::poll_thread_pool::PollThreadPool`]'s use of a
/// shared handle per pooled thread.
#[derive(Clone)]
pub struct PollThread {
    id: usize,
    shared: Arc<Shared>,
}

struct WorkerGuard(Option<JoinHandle<()>>);

/// A running poll thread plus the join handle for [`PollThread::release`].
pub struct PollThreadHandle {
    thread: PollThread,
    worker: Mutex<WorkerGuard>,
}

impl PollThreadHandle {
    /// Creates the multiplexer, allocates the shared read buffer, and
    /// starts the dispatch loop on a new OS thread.
    pub fn initialize(id: usize) -> Result<Self> {
        let epoll = Epoll::new().map_err(|e| {
            error!(poll_thread = id, error = %e, "create epoll failed");
            Error::from_io(ErrorCode::CreateEpollFailed, e)
        })?;

        let shared = Arc::new(Shared {
            epoll,
            callbacks: Mutex::new(HashMap::new()),
            read_buffer: Mutex::new(MutableBuffer::with_capacity(SHARED_READ_BUFFER_SIZE)),
            stop: std::sync::atomic::AtomicBool::new(false),
        });

        let thread = PollThread {
            id,
            shared: shared.clone(),
        };

        let worker_thread = thread.clone();
        let join = std::thread::Builder::new()
            .name(format!("poll-thread-{id}"))
            .spawn(move || worker_thread.run_loop())
            .expect("spawning poll thread worker");

        info!(poll_thread = id, "poll thread initialized");

        Ok(PollThreadHandle {
            thread,
            worker: Mutex::new(WorkerGuard(Some(join))),
        })
    }

    pub fn handle(&self) -> PollThread {
        self.thread.clone()
    }

    /// Signals stop and joins the worker. Idempotent.
    pub fn release(&self) {
        self.thread
            .shared
            .stop
            .store(true, std::sync::atomic::Ordering::SeqCst);

        if let Some(join) = self.worker.lock().unwrap().0.take() {
            let _ = join.join();
        }

        self.thread.shared.callbacks.lock().unwrap().clear();
        info!(poll_thread = self.thread.id, "poll thread released");
    }
}

impl Drop for PollThreadHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl PollThread {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Registers `fd` with `interest`. Must not be called twice for the
    /// same fd without an intervening [`PollThread::del_event`].
    pub fn add_event<F>(&self, fd: RawFd, interest: EventMask, callback: F) -> Result<()>
    where
        F: Fn(EventMask) + Send + Sync + 'static,
    {
        let mut callbacks = self.shared.callbacks.lock().unwrap();

        self.shared.epoll.add(fd, interest).map_err(|e| {
            error!(poll_thread = self.id, fd, error = %e, "epoll add failed");
            Error::from_io(ErrorCode::AddEpollEventFailed, e)
        })?;

        callbacks.insert(fd, Arc::new(callback));
        Ok(())
    }

    pub fn modify_event(
        &self,
        fd: RawFd,
        interest: EventMask,
        completion: Option<PollCompleteCallback>,
    ) -> Result<()> {
        let result = self.shared.epoll.modify(fd, interest);

        let ok = result.is_ok();
        if let Err(ref e) = result {
            error!(poll_thread = self.id, fd, error = %e, "epoll modify failed");
        }

        if let Some(cb) = completion {
            invoke_guarded(self.id, "modify_event completion", || cb(ok));
        }

        result.map_err(|e| Error::from_io(ErrorCode::ModifyEpollEventFailed, e))
    }

    /// Deregisters `fd`, evicting its callback before returning so a
    /// del_event issued from within that fd's own callback is safe.
    pub fn del_event(&self, fd: RawFd, completion: Option<PollCompleteCallback>) -> Result<()> {
        let mut callbacks = self.shared.callbacks.lock().unwrap();
        let result = self.shared.epoll.delete(fd);
        callbacks.remove(&fd);
        drop(callbacks);

        let ok = result.is_ok();
        if let Err(ref e) = result {
            error!(poll_thread = self.id, fd, error = %e, "epoll delete failed");
        }

        if let Some(cb) = completion {
            invoke_guarded(self.id, "del_event completion", || cb(ok));
        }

        result.map_err(|e| Error::from_io(ErrorCode::DeleteEpollEventFailed, e))
    }

    /// A reset view of this thread's shared read buffer. Must only be
    /// called from code running on this poll thread's worker.
    pub fn shared_read_buffer(&self) -> std::sync::MutexGuard<'_, MutableBuffer> {
        let mut buf = self.shared.read_buffer.lock().unwrap();
        buf.reset();
        buf
    }

    fn run_loop(self) {
        let mut events = Events::with_capacity(MAX_EVENTS);

        loop {
            match self.shared.epoll.wait(&mut events, WAIT_TIMEOUT) {
                Ok(()) => {}
                Err(e) => {
                    warn!(poll_thread = self.id, error = %e, "epoll wait failed");
                    continue;
                }
            }

            if self.shared.stop.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }

            trace!(poll_thread = self.id, count = events.len(), "epoll wait returned");

            for i in 0..events.len() {
                let Some((fd, mask)) = events.get(i) else {
                    continue;
                };

                let callback = {
                    let callbacks = self.shared.callbacks.lock().unwrap();
                    callbacks.get(&fd).cloned()
                };

                match callback {
                    Some(cb) => {
                        trace!(poll_thread = self.id, fd, ?mask, "dispatching event");
                        invoke_guarded(self.id, "poll event callback", || cb(mask));
                    }
                    None => {
                        warn!(poll_thread = self.id, fd, "fd with no registered callback, deregistering");
                        let _ = self.del_event(fd, None);
                    }
                }
            }

            if self.shared.stop.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }
        }
    }
}

fn invoke_guarded(poll_thread: usize, what: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        error!(poll_thread, what, "callback panicked");
    }
}
