//! Progress reporting for orchestration runs
//!
//! Every run started by an [`crate::Executor`] reports its lifecycle to the
//! executor's [`RunReporter`]. A host application can use this to visualize
//! which tasks are running, which succeeded, and which were cancelled.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::Reason;
use crate::task::RunId;
use crate::types::RunSummary;

/// Terminal outcome of a run, as seen by a reporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run delivered a success value
    Succeeded,
    /// The run delivered a failure reason
    Failed(Reason),
    /// The run was cancelled without delivering anything
    Cancelled(Reason),
}

/// Event types that can be reported during a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// A run was started
    RunStarted {
        run_id: RunId,
        factory: &'static str,
        total: usize,
    },
    /// A task of the run was started
    TaskStarted {
        run_id: RunId,
        index: usize,
        name: String,
    },
    /// A task reported success
    TaskSucceeded { run_id: RunId, index: usize },
    /// A task reported failure
    TaskFailed {
        run_id: RunId,
        index: usize,
        reason: Reason,
    },
    /// An in-flight task was cancelled because the run finished
    TaskCancelled { run_id: RunId, index: usize },
    /// The run reached a terminal state
    RunFinished {
        run_id: RunId,
        factory: &'static str,
        outcome: RunOutcome,
        summary: RunSummary,
    },
}

impl RunEvent {
    /// The run this event belongs to
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::TaskStarted { run_id, .. }
            | RunEvent::TaskSucceeded { run_id, .. }
            | RunEvent::TaskFailed { run_id, .. }
            | RunEvent::TaskCancelled { run_id, .. }
            | RunEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}

/// Trait for reporting run progress
pub trait RunReporter {
    /// Report a run event
    fn report_event(&mut self, event: RunEvent);

    /// Called when the reporter is no longer needed
    fn finish(&mut self) {}
}

/// Shared, single-threaded handle to a reporter
pub type SharedReporter = Rc<RefCell<dyn RunReporter>>;

/// A no-op reporter that discards all events
#[derive(Debug, Default)]
pub struct NoOpReporter;

impl RunReporter for NoOpReporter {
    fn report_event(&mut self, _event: RunEvent) {}
}

/// Forwards events to `tracing`
#[derive(Debug, Default)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn report_event(&mut self, event: RunEvent) {
        match event {
            RunEvent::RunStarted {
                run_id,
                factory,
                total,
            } => debug!(%run_id, factory, total, "Run started"),
            RunEvent::TaskStarted {
                run_id,
                index,
                name,
            } => trace!(%run_id, index, task_name = %name, "Task started"),
            RunEvent::TaskSucceeded { run_id, index } => {
                trace!(%run_id, index, "Task succeeded")
            }
            RunEvent::TaskFailed {
                run_id,
                index,
                reason,
            } => debug!(%run_id, index, %reason, "Task failed"),
            RunEvent::TaskCancelled { run_id, index } => {
                trace!(%run_id, index, "Task cancelled")
            }
            RunEvent::RunFinished {
                run_id,
                factory,
                outcome,
                summary,
            } => debug!(
                %run_id,
                factory,
                outcome = ?outcome,
                successes = summary.successes,
                failures = summary.failures,
                cancelled = summary.cancelled,
                "Run finished"
            ),
        }
    }
}

/// Keeps every event in a shared log
///
/// Clones share the same log, so one clone can be given to the executor and
/// another kept for inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    events: Rc<RefCell<Vec<RunEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear()
    }
}

impl RunReporter for RecordingReporter {
    fn report_event(&mut self, event: RunEvent) {
        self.events.borrow_mut().push(event);
    }
}

/// A multi-reporter that broadcasts events to multiple reporters
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn RunReporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reporter<R: RunReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn with_reporter<R: RunReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Box::new(reporter));
    }
}

impl RunReporter for MultiReporter {
    fn report_event(&mut self, event: RunEvent) {
        for reporter in &mut self.reporters {
            reporter.report_event(event.clone());
        }
    }

    fn finish(&mut self) {
        for reporter in &mut self.reporters {
            reporter.finish();
        }
    }
}
