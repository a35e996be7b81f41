//! A single background thread that runs callbacks at their deadline.
//!
//! Bounded [`Wait`](crate::Wait) sessions schedule their expiry here. The
//! queue is a min-heap of deadlines; the thread parks on a condition
//! variable until the earliest deadline or until a sooner entry arrives.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::EngineConfig;
use crate::error::panic_message;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    callback: Callback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Queue {
    heap: BinaryHeap<Entry>,
    /// Entries in `heap` cancelled since the last purge.
    cancelled: usize,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

impl Shared {
    fn new(shutdown: bool) -> Self {
        Self {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                cancelled: 0,
                shutdown,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Drops cancelled entries once they make up more than half the heap.
    fn note_cancelled(&self) {
        let mut queue = self.queue.lock();
        queue.cancelled += 1;
        if queue.cancelled * 2 > queue.heap.len() {
            queue
                .heap
                .retain(|entry| !entry.cancelled.load(Ordering::Acquire));
            queue.cancelled = 0;
        }
    }
}

/// Handle to a scheduled callback.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    shared: Weak<Shared>,
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl TimerHandle {
    fn detached(cancelled: bool) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(cancelled)),
            shared: Weak::new(),
        }
    }

    /// Prevents the callback from running and lets the timer drop its
    /// entry. Returns false if it was already cancelled or has run.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.note_cancelled();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub struct Timer {
    shared: Arc<Shared>,
    seq: AtomicU64,
    running: bool,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("pending", &self.pending())
            .field("running", &self.running)
            .finish()
    }
}

impl Timer {
    /// Starts a timer thread named after `config.timer_thread_name`.
    pub fn spawn(config: &EngineConfig) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::new(false));
        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name(config.timer_thread_name.clone())
            .spawn(move || run(&worker))?;
        Ok(Self {
            shared,
            seq: AtomicU64::new(0),
            running: true,
        })
    }

    /// The process-wide timer, started on first use with the default
    /// configuration. Contexts built without their own timer share it.
    pub fn global() -> Arc<Timer> {
        static GLOBAL: OnceLock<Arc<Timer>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| {
            let timer = Timer::spawn(&EngineConfig::default()).unwrap_or_else(|err| {
                tracing::error!(error = %err, "failed to start timer thread, bounded waits will not expire");
                Timer::inert()
            });
            Arc::new(timer)
        }))
    }

    fn inert() -> Self {
        Self {
            shared: Arc::new(Shared::new(true)),
            seq: AtomicU64::new(0),
            running: false,
        }
    }

    /// Schedules `callback` after `delay`. A delay too long to represent as
    /// a deadline never fires; the returned handle is already cancelled.
    pub fn schedule_after(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        match Instant::now().checked_add(delay) {
            Some(deadline) => self.schedule(deadline, callback),
            None => {
                tracing::trace!(?delay, "delay exceeds the clock range, never firing");
                TimerHandle::detached(true)
            }
        }
    }

    pub fn schedule(
        &self,
        deadline: Instant,
        callback: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        let handle = TimerHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            shared: Arc::downgrade(&self.shared),
        };
        let entry = Entry {
            deadline,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            cancelled: Arc::clone(&handle.cancelled),
            callback: Box::new(callback),
        };
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            drop(queue);
            tracing::warn!("timer is not running, dropping scheduled callback");
            return TimerHandle::detached(false);
        }
        let earliest = queue
            .heap
            .peek()
            .map_or(true, |head| entry.deadline < head.deadline);
        queue.heap.push(entry);
        drop(queue);
        if earliest {
            self.shared.wakeup.notify_one();
        }
        handle
    }

    /// Number of entries still queued. Cancelled entries are purged in
    /// batches, so a few may still be counted.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.wakeup.notify_one();
    }
}

fn run(shared: &Shared) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            return;
        }
        let now = Instant::now();
        let next = queue.heap.peek().map(|head| head.deadline);
        match next {
            None => shared.wakeup.wait(&mut queue),
            Some(deadline) if deadline > now => {
                shared.wakeup.wait_until(&mut queue, deadline);
            }
            Some(_) => {
                let Some(entry) = queue.heap.pop() else {
                    continue;
                };
                if entry.cancelled.swap(true, Ordering::AcqRel) {
                    continue;
                }
                // Callbacks run without the queue lock so they may schedule.
                drop(queue);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(entry.callback)) {
                    tracing::warn!(
                        panic = %panic_message(payload.as_ref()),
                        "timer callback panicked"
                    );
                }
                queue = shared.queue.lock();
            }
        }
    }
}
