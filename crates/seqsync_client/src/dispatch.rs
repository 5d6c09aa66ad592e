//! Single-consumer handler queue.

use crate::error::HandlerError;
use crate::monitor::FatalMarker;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, trace};

/// A bound handler call.
pub type Thunk = Box<dyn FnOnce() -> Result<(), HandlerError> + Send>;

/// The cooperative yield point of the drain loop.
pub trait Yielder: Send + Sync {
    /// Gives the host a chance to run before the next batch.
    fn yield_now(&self) -> impl Future<Output = ()> + Send;
}

/// Yields to the tokio scheduler, optionally sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskYielder {
    pause: Duration,
}

impl TaskYielder {
    /// Creates a yielder that sleeps for `pause` (or plainly yields if zero).
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

impl Yielder for TaskYielder {
    async fn yield_now(&self) {
        if self.pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.pause).await;
        }
    }
}

/// Counters for the dispatch queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Thunks that ran and succeeded.
    pub executed: u64,
    /// Thunks that returned an error or panicked.
    pub failed: u64,
    /// Thunks dropped because the session was fatal.
    pub skipped: u64,
    /// Cooperative yields taken.
    pub yields: u64,
}

struct Inner {
    items: Mutex<VecDeque<Thunk>>,
    wake: Notify,
    idle: Notify,
    draining: AtomicBool,
    closed: AtomicBool,
    batch_size: usize,
    marker: FatalMarker,
    stats: Mutex<DispatchStats>,
}

/// FIFO of thunks drained by exactly one loop.
///
/// Producers call [`enqueue`](Self::enqueue) from anywhere; one task runs
/// [`run`](Self::run). Handlers execute one at a time in enqueue order. A
/// failing handler is logged and counted, and the loop moves on. Once the
/// fatal marker is set, remaining thunks are dropped without running.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<Inner>,
}

impl DispatchQueue {
    /// Creates a queue that yields after every `batch_size` handlers.
    pub fn new(batch_size: usize, marker: FatalMarker) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                idle: Notify::new(),
                draining: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                batch_size: batch_size.max(1),
                marker,
                stats: Mutex::new(DispatchStats::default()),
            }),
        }
    }

    /// Appends a thunk to the tail of the queue.
    pub fn enqueue(&self, thunk: Thunk) {
        self.inner.items.lock().push_back(thunk);
        self.inner.wake.notify_one();
    }

    /// Returns the number of pending thunks.
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// Returns true while a drain is in progress.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> DispatchStats {
        *self.inner.stats.lock()
    }

    /// Stops [`run`](Self::run) once the queue is empty.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.wake.notify_one();
    }

    /// Runs pending thunks until the queue is empty.
    ///
    /// Returns at once if another drain is already in progress.
    pub async fn drain<Y: Yielder>(&self, yielder: &Y) {
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut since_yield = 0usize;
        loop {
            let next = self.inner.items.lock().pop_front();
            let Some(thunk) = next else {
                break;
            };

            self.execute(thunk);
            since_yield += 1;

            if since_yield >= self.inner.batch_size && !self.is_empty() {
                trace!(batch = since_yield, "yielding");
                yielder.yield_now().await;
                self.inner.stats.lock().yields += 1;
                since_yield = 0;
            }
        }

        self.inner.draining.store(false, Ordering::Release);
        self.inner.idle.notify_waiters();
    }

    /// Drains whenever thunks arrive, until closed.
    pub async fn run<Y: Yielder>(self, yielder: Y) {
        loop {
            self.drain(&yielder).await;
            if self.inner.closed.load(Ordering::Acquire) && self.is_empty() {
                debug!("dispatch queue closed");
                break;
            }
            self.inner.wake.notified().await;
        }
    }

    /// Waits until nothing is pending and no drain is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_empty() && !self.is_draining() {
                return;
            }
            notified.await;
        }
    }

    fn execute(&self, thunk: Thunk) {
        if self.inner.marker.is_set() {
            self.inner.stats.lock().skipped += 1;
            return;
        }

        let result = match catch_unwind(AssertUnwindSafe(thunk)) {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        };

        let mut stats = self.inner.stats.lock();
        match result {
            Ok(()) => stats.executed += 1,
            Err(err) => {
                stats.failed += 1;
                error!(error = %err, "handler failed");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
