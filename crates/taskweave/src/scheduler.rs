//! Deferred execution
//!
//! The orchestrator never calls a task from inside its own call stack. Every
//! start is handed to a [`Scheduler`], which runs it in a fresh turn after at
//! least the requested delay. Two schedulers are provided:
//!
//! - [`EventLoop`]: a deterministic, single-threaded loop driven by virtual
//!   time. Nothing happens until the owner calls [`EventLoop::run`],
//!   [`EventLoop::run_ready`] or [`EventLoop::advance`].
//! - [`TokioScheduler`]: spawns every job onto the current
//!   [`tokio::task::LocalSet`] and waits with [`tokio::time::sleep`].

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// A unit of deferred work
pub type Job = Box<dyn FnOnce()>;

/// Runs jobs in later turns of a single-threaded event loop
pub trait Scheduler {
    /// Run `job` in a fresh turn, no sooner than `delay` from now
    ///
    /// Implementations must never run the job before returning.
    fn defer(&self, delay: Duration, job: Job) -> Timer;
}

/// Handle to a deferred job
///
/// Dropping the handle leaves the job scheduled; [`Timer::clear`] prevents it
/// from running if it has not run yet.
pub struct Timer {
    clear: Option<Box<dyn FnOnce()>>,
}

impl Timer {
    pub fn new(clear: impl FnOnce() + 'static) -> Self {
        Self {
            clear: Some(Box::new(clear)),
        }
    }

    /// A timer that cannot be cleared
    pub fn detached() -> Self {
        Self { clear: None }
    }

    pub fn clear(mut self) {
        if let Some(clear) = self.clear.take() {
            clear()
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("clearable", &self.clear.is_some())
            .finish()
    }
}

struct Entry {
    due: Duration,
    seq: u64,
    cleared: Rc<Cell<bool>>,
    job: Job,
}

impl Eq for Entry {}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest due time first, then scheduling order
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct LoopState {
    now: Duration,
    next_seq: u64,
    queue: BinaryHeap<Entry>,
}

/// Deterministic virtual-time event loop
///
/// Jobs due at the same instant run in the order they were scheduled. Clones
/// share the same loop.
#[derive(Clone, Default)]
pub struct EventLoop {
    state: Rc<RefCell<LoopState>>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time, measured from the creation of the loop
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Number of scheduled jobs that have not run or been cleared
    pub fn pending(&self) -> usize {
        self.state
            .borrow()
            .queue
            .iter()
            .filter(|entry| !entry.cleared.get())
            .count()
    }

    /// Run every job that is due now, including jobs they schedule without delay
    pub fn run_ready(&self) -> usize {
        let now = self.now();
        self.run_until(now)
    }

    /// Move virtual time forward by `by`, running due jobs in order
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().saturating_add(by);
        let ran = self.run_until(target);
        self.state.borrow_mut().now = target;
        ran
    }

    /// Run until no jobs are left, jumping time forward to each due job
    pub fn run(&self) -> usize {
        self.run_until(Duration::MAX)
    }

    fn run_until(&self, until: Duration) -> usize {
        let mut ran = 0;
        while let Some(job) = self.pop_due(until) {
            job();
            ran += 1;
        }
        ran
    }

    fn pop_due(&self, until: Duration) -> Option<Job> {
        let mut state = self.state.borrow_mut();
        loop {
            if state.queue.peek()?.due > until {
                return None;
            }
            let entry = state.queue.pop()?;
            if entry.cleared.get() {
                continue;
            }
            state.now = state.now.max(entry.due);
            return Some(entry.job);
        }
    }
}

impl Scheduler for EventLoop {
    fn defer(&self, delay: Duration, job: Job) -> Timer {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        let cleared = Rc::new(Cell::new(false));
        let due = state.now.saturating_add(delay);
        state.queue.push(Entry {
            due,
            seq,
            cleared: cleared.clone(),
            job,
        });
        Timer::new(move || cleared.set(true))
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Scheduler backed by the tokio runtime
///
/// Jobs are spawned with [`tokio::task::spawn_local`], so every call to
/// [`Scheduler::defer`] must happen inside a [`tokio::task::LocalSet`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn defer(&self, delay: Duration, job: Job) -> Timer {
        let handle = tokio::task::spawn_local(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            job();
        });
        Timer::new(move || handle.abort())
    }
}
