//! Process-wide set of poll threads with round-robin acquisition. Sockets
//! pick a thread once via [`PollThreadPool::acquire`] and keep it for their
//! lifetime; there is no rebalancing or migration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use tracing::info;

use crate::error::{Error, ErrorCode, Result};
use crate::poll_thread::{PollThread, PollThreadHandle};

/// A fixed-size, once-initialized pool of poll threads. Modeled as an
/// explicit struct rather than free functions over a hidden global so it
/// can also be constructed directly in tests without touching the
/// process-wide singleton in [`global`].
pub struct PollThreadPool {
    threads: Vec<PollThreadHandle>,
    next: AtomicUsize,
}

impl PollThreadPool {
    /// `size < 0` uses [`std::thread::available_parallelism`] in place of
    /// the source's `hardware_concurrency()`.
    pub fn initialize(size: isize) -> Result<Self> {
        let size = if size < 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            size as usize
        };

        let mut threads = Vec::with_capacity(size);
        for id in 0..size {
            threads.push(PollThreadHandle::initialize(id)?);
        }

        info!(size, "poll thread pool initialized");

        Ok(PollThreadPool {
            threads,
            next: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Returns the next thread in round-robin order.
    pub fn acquire(&self) -> PollThread {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.threads.len();
        self.threads[idx].handle()
    }
}

static GLOBAL: OnceLock<PollThreadPool> = OnceLock::new();

/// Process-wide singleton, the idiomatic-Rust replacement for the source's
/// `static TimerManager *instance` pattern (see also [`crate::timer`]).
/// `initialize` may be called exactly once; subsequent calls fail with
/// [`ErrorCode::AlreadyInitialized`].
pub mod global {
    use super::*;

    pub fn initialize(size: isize) -> Result<()> {
        let pool = PollThreadPool::initialize(size)?;
        GLOBAL
            .set(pool)
            .map_err(|_| Error::new(ErrorCode::AlreadyInitialized))
    }

    pub fn get() -> Option<&'static PollThreadPool> {
        GLOBAL.get()
    }

    pub fn acquire() -> Option<PollThread> {
        GLOBAL.get().map(PollThreadPool::acquire)
    }
}
