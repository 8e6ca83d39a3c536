//! Core task abstractions
//!
//! A [`Task`] is started with a [`Callback`] and an input [`Value`]. It reports
//! exactly once through the callback and may hand back a [`Cancel`] handle that
//! asks it to abandon its work.

use std::cell::Cell;
use std::fmt::{self, Debug, Display};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::Reason;
use crate::Value;

/// Outcome delivered through a [`Callback`]
pub type TaskResult = Result<Value, Reason>;

/// Unique identifier for one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new unique run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion callback handed to a task when it is started
///
/// Consumed on use, so a callback can report at most once.
pub struct Callback {
    inner: Box<dyn FnOnce(TaskResult)>,
}

impl Callback {
    pub fn new(f: impl FnOnce(TaskResult) + 'static) -> Self {
        Self { inner: Box::new(f) }
    }

    /// Report the outcome of the task
    pub fn complete(self, result: TaskResult) {
        (self.inner)(result)
    }

    /// Report success with `value`
    pub fn succeed(self, value: Value) {
        self.complete(Ok(value))
    }

    /// Report failure with `reason`
    pub fn fail(self, reason: Reason) {
        self.complete(Err(reason))
    }
}

impl Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// Cancellation capability returned by a started task
///
/// Cancelling is advisory: the task may ignore the request and may still
/// report later. Only the first invocation of a handle (or any of its clones)
/// reaches the task.
#[derive(Clone)]
pub struct Cancel {
    inner: Rc<dyn Fn(Option<Reason>, bool)>,
    fired: Rc<Cell<bool>>,
}

impl Cancel {
    /// Create a handle from a function that receives the cancellation reason
    ///
    /// A missing reason is replaced by a generic cancellation reason.
    pub fn new(f: impl Fn(Reason) + 'static) -> Self {
        Self::conveying(move |reason, _report| {
            f(reason.unwrap_or_else(|| Reason::cancelled("task", "Cancel.")))
        })
    }

    /// Create a handle whose function also learns whether the caller wants the
    /// task to deliver its outcome right away
    pub fn conveying(f: impl Fn(Option<Reason>, bool) + 'static) -> Self {
        Self {
            inner: Rc::new(f),
            fired: Rc::new(Cell::new(false)),
        }
    }

    /// Ask the task to stop working
    pub fn cancel(&self, reason: Option<Reason>) {
        self.fire(reason, false)
    }

    /// Ask the task to stop working and to report its outcome now
    pub fn cancel_and_report(&self, reason: Option<Reason>) {
        self.fire(reason, true)
    }

    /// Check if this handle has already been used
    pub fn is_fired(&self) -> bool {
        self.fired.get()
    }

    fn fire(&self, reason: Option<Reason>, report: bool) {
        if self.fired.replace(true) {
            return;
        }
        (self.inner)(reason, report)
    }

    /// Fire the handle, swallowing any panic raised by the task's cancel code
    pub(crate) fn fire_quietly(&self, reason: Reason, report: bool) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.fire(Some(reason), report)));
        if let Err(payload) = outcome {
            warn!(
                error = %crate::error::panic_message(payload.as_ref()),
                "Cancel capability panicked, ignoring"
            );
        }
    }
}

impl Debug for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancel")
            .field("fired", &self.fired.get())
            .finish()
    }
}

type TaskFn = dyn Fn(Callback, Value) -> Option<Cancel>;

/// An asynchronous unit of work
///
/// Tasks are cheap to clone; clones share the same underlying function. The
/// combinators in [`crate::Executor`] take lists of tasks and return a new task,
/// so task trees nest arbitrarily.
#[derive(Clone)]
pub struct Task {
    name: Rc<str>,
    inner: Rc<TaskFn>,
}

impl Task {
    /// Create a task from its start function
    ///
    /// The function must report through the callback exactly once, now or
    /// later, and must not panic. It may return a [`Cancel`] handle.
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(Callback, Value) -> Option<Cancel> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name.into()),
            inner: Rc::new(f),
        }
    }

    /// Get a human-readable name for this task (used for logging and reasons)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the task
    pub fn start(&self, callback: Callback, input: Value) -> Option<Cancel> {
        (self.inner)(callback, input)
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}
