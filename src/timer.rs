//! Deadline-driven callback scheduling, used by [`crate::socket::Socket`] to
//! enforce `connect`'s `timeout_sec`. A single background thread services a
//! min-heap of pending timers rather than the one-`std::thread`-per-timer
//! model of the source this was distilled from; the public contract
//! (`add_timer`/`TimerHandle::cancel`) is unchanged.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

/// How long the worker sleeps with an empty heap before re-checking whether
/// it still has a live owner. Bounds how long a dropped [`TimerManager`]'s
/// thread can outlive it.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

type Callback = Box<dyn FnMut() + Send>;

struct Entry {
    deadline: Instant,
    seq: u64,
    id: u64,
    repeat: Option<Duration>,
    callback: Callback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct State {
    heap: BinaryHeap<Reverse<Entry>>,
    cancelled: HashSet<u64>,
}

/// A background-thread-backed scheduler for one-shot and repeating
/// callbacks. Cloning shares the same underlying thread and heap.
#[derive(Clone)]
pub struct TimerManager {
    inner: Arc<(Mutex<State>, Condvar)>,
}

/// A handle to a scheduled timer. Dropping it does not cancel the timer;
/// call [`TimerHandle::cancel`] explicitly.
pub struct TimerHandle {
    id: u64,
    inner: Arc<(Mutex<State>, Condvar)>,
}

impl TimerHandle {
    /// Prevents the timer from firing if it has not already. Idempotent;
    /// cancelling an already-fired or already-cancelled timer is a no-op.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        state.cancelled.insert(self.id);
        cvar.notify_all();
    }
}

impl TimerManager {
    pub fn new() -> Self {
        let inner = Arc::new((
            Mutex::new(State {
                heap: BinaryHeap::new(),
                cancelled: HashSet::new(),
            }),
            Condvar::new(),
        ));

        // The worker only ever holds a `Weak` reference: it re-upgrades once
        // per loop iteration and exits as soon as that fails, so it never
        // keeps itself alive on its own.
        let worker_inner = Arc::downgrade(&inner);
        std::thread::spawn(move || run_loop(worker_inner));

        TimerManager { inner }
    }

    /// Schedules `callback` to run after `delay`, repeating every `repeat`
    /// interval thereafter if given.
    pub fn add_timer<F>(&self, delay: Duration, repeat: Option<Duration>, callback: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;

        let (lock, cvar) = &*self.inner;
        {
            let mut state = lock.lock().unwrap();
            state.heap.push(Reverse(Entry {
                deadline,
                seq,
                id,
                repeat,
                callback: Box::new(callback),
            }));
        }
        cvar.notify_all();

        debug!(timer = id, ?delay, "timer scheduled");

        TimerHandle {
            id,
            inner: self.inner.clone(),
        }
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        // The worker holds only a `Weak`, so it never shows up in this
        // count; wake it so it re-checks `Weak::upgrade` promptly instead of
        // waiting out `IDLE_POLL_INTERVAL`. Harmless if other clones or
        // `TimerHandle`s are still alive: it just upgrades successfully and
        // keeps running.
        self.inner.1.notify_all();
    }
}

fn run_loop(weak: Weak<(Mutex<State>, Condvar)>) {
    loop {
        let inner = match weak.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        let (lock, cvar) = &*inner;
        let mut state = lock.lock().unwrap();

        let due = loop {
            match state.heap.peek() {
                None => break None,
                Some(Reverse(entry)) => {
                    let now = Instant::now();
                    if entry.deadline <= now {
                        break Some(());
                    }
                    let wait_for = entry.deadline - now;
                    let (guard, _timeout) = cvar.wait_timeout(state, wait_for).unwrap();
                    state = guard;
                    continue;
                }
            }
        };

        if due.is_none() {
            // Nothing scheduled; wake periodically rather than blocking
            // forever so a dropped `TimerManager` is noticed promptly.
            let _ = cvar.wait_timeout(state, IDLE_POLL_INTERVAL).unwrap();
            continue;
        }

        let Reverse(mut entry) = state.heap.pop().unwrap();

        if state.cancelled.remove(&entry.id) {
            trace!(timer = entry.id, "cancelled timer skipped");
            continue;
        }

        drop(state);

        trace!(timer = entry.id, "timer fired");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (entry.callback)();
        }));
        if result.is_err() {
            error!(timer = entry.id, "timer callback panicked");
        }

        if let Some(repeat) = entry.repeat {
            entry.deadline = Instant::now() + repeat;
            let mut state = lock.lock().unwrap();
            if !state.cancelled.contains(&entry.id) {
                let id = entry.id;
                let seq = entry.seq;
                state.heap.push(Reverse(entry));
                trace!(timer = id, seq, "repeating timer rescheduled");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn one_shot_fires_after_delay() {
        crate::test_support::init_tracing();
        let manager = TimerManager::new();
        let (tx, rx) = mpsc::channel();
        manager.add_timer(Duration::from_millis(20), None, move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn cancel_before_deadline_prevents_firing() {
        crate::test_support::init_tracing();
        let manager = TimerManager::new();
        let (tx, rx) = mpsc::channel();
        let handle = manager.add_timer(Duration::from_millis(100), None, move || {
            tx.send(()).unwrap();
        });
        handle.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn repeating_timer_fires_multiple_times() {
        crate::test_support::init_tracing();
        let manager = TimerManager::new();
        let (tx, rx) = mpsc::channel();
        let handle = manager.add_timer(Duration::from_millis(10), Some(Duration::from_millis(10)), move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        handle.cancel();
    }
}
