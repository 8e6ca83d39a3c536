//! Adapters that turn other things into tasks
//!
//! - [`Task::from_fn`] lifts a plain `Value -> Result<Value, E>` function.
//! - [`Task::from_future`] lifts an async function onto the current
//!   [`tokio::task::LocalSet`].
//! - [`objectify`] turns a factory over task lists into one over named tasks.
//! - [`deadline`] races a task against a timer; it backs
//!   [`crate::Executor::time_limit`].

use std::cell::RefCell;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use futures::future::{abortable, FutureExt};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{panic_message, ConfigResult, Reason};
use crate::scheduler::{Scheduler, Timer};
use crate::task::{Callback, Cancel, Task, TaskResult};
use crate::Value;

impl Task {
    /// Lift a synchronous function into a task
    ///
    /// The task reports `f(input)` in the turn it was started and never returns
    /// a cancel handle. An error becomes a failure whose message is the error's
    /// `Display` output, or the task name when that output is empty. A panic
    /// inside `f` becomes a [`crate::ReasonKind::Panicked`] failure.
    pub fn from_fn<F, E>(name: impl Into<String>, f: F) -> Task
    where
        F: Fn(Value) -> Result<Value, E> + 'static,
        E: Display,
    {
        let name: Rc<str> = Rc::from(name.into());
        let origin = name.clone();
        Task::new(name.to_string(), move |callback, input| {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| f(input))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => {
                    let message = error.to_string();
                    let message = if message.is_empty() {
                        origin.to_string()
                    } else {
                        message
                    };
                    Err(Reason::new(origin.to_string(), message))
                }
                Err(payload) => {
                    warn!(
                        task_name = %origin,
                        error = %panic_message(payload.as_ref()),
                        "Function panicked, reporting failure"
                    );
                    Err(Reason::panicked(origin.to_string(), payload.as_ref()))
                }
            };
            callback.complete(result);
            None
        })
    }

    /// Lift an async function into a task
    ///
    /// Each start spawns `f(input)` with [`tokio::task::spawn_local`], so the
    /// task must be started inside a [`tokio::task::LocalSet`]. Cancelling
    /// aborts the future and reports the cancellation reason as a failure.
    pub fn from_future<F, Fut>(name: impl Into<String>, f: F) -> Task
    where
        F: Fn(Value) -> Fut + 'static,
        Fut: Future<Output = TaskResult> + 'static,
    {
        let name: Rc<str> = Rc::from(name.into());
        let origin = name.clone();
        Task::new(name.to_string(), move |callback, input| {
            let (future, handle) = abortable(AssertUnwindSafe(f(input)).catch_unwind());
            let slot = Rc::new(RefCell::new(Some(callback)));

            let on_done = slot.clone();
            let origin = origin.clone();
            tokio::task::spawn_local(async move {
                let result = match future.await {
                    Ok(Ok(result)) => result,
                    Ok(Err(payload)) => {
                        warn!(
                            task_name = %origin,
                            error = %panic_message(payload.as_ref()),
                            "Future panicked, reporting failure"
                        );
                        Err(Reason::panicked(origin.to_string(), payload.as_ref()))
                    }
                    Err(_aborted) => return,
                };
                let callback = on_done.borrow_mut().take();
                if let Some(callback) = callback {
                    callback.complete(result);
                }
            });

            Some(Cancel::new(move |reason| {
                handle.abort();
                let callback = slot.borrow_mut().take();
                if let Some(callback) = callback {
                    callback.fail(reason);
                }
            }))
        })
    }
}

/// Turn a factory over task lists into a factory over named tasks
///
/// The returned factory takes an ordered map from name to task, builds the
/// task list in key order and hands it to `factory`. When the resulting run
/// succeeds with an array of one value per key, the array is turned back into
/// an object with the original keys. Any other outcome is passed through
/// unchanged.
///
/// Extra factory arguments are captured by the closure:
///
/// ```rust
/// # use taskweave::{objectify, EventLoop, Executor};
/// let executor = Executor::new(EventLoop::new());
/// let at_least_two = objectify(move |tasks| executor.parallel(tasks, None, Some(2)));
/// ```
pub fn objectify<F>(factory: F) -> impl Fn(IndexMap<String, Task>) -> ConfigResult<Task>
where
    F: Fn(Vec<Task>) -> ConfigResult<Task>,
{
    move |entries| {
        let (keys, tasks): (Vec<String>, Vec<Task>) = entries.into_iter().unzip();
        let inner = factory(tasks)?;
        let keys: Rc<[String]> = Rc::from(keys);
        Ok(Task::new(inner.name().to_string(), move |callback, input| {
            let keys = keys.clone();
            let rekeyed = Callback::new(move |result: TaskResult| {
                callback.complete(result.map(|value| rekey(&keys, value)))
            });
            inner.start(rekeyed, input)
        }))
    }
}

fn rekey(keys: &[String], value: Value) -> Value {
    match value {
        Value::Array(values) if values.len() == keys.len() => {
            Value::Object(keys.iter().cloned().zip(values).collect())
        }
        other => other,
    }
}

#[derive(Default)]
struct Deadline {
    callback: Option<Callback>,
    timer: Option<Timer>,
    inner_cancel: Option<Cancel>,
}

/// Race `task` against a timer of `limit`
///
/// Whichever finishes first decides the outcome. On expiry the task is asked
/// to stop and report (so a run that already has enough successes can still
/// deliver them); if it does not, the caller receives a timeout failure.
pub(crate) fn deadline(scheduler: Rc<dyn Scheduler>, task: Task, limit: Duration) -> Task {
    Task::new("time_limit", move |callback, input| {
        let state = Rc::new(RefCell::new(Deadline {
            callback: Some(callback),
            ..Deadline::default()
        }));

        let on_expiry = state.clone();
        let timer = scheduler.defer(limit, Box::new(move || expire(&on_expiry, limit)));
        state.borrow_mut().timer = Some(timer);

        let on_report = state.clone();
        let finish = move |result: TaskResult| {
            let (callback, timer, inner_cancel) = {
                let mut deadline = on_report.borrow_mut();
                (
                    deadline.callback.take(),
                    deadline.timer.take(),
                    deadline.inner_cancel.take(),
                )
            };
            drop(inner_cancel);
            if let Some(timer) = timer {
                timer.clear();
            }
            if let Some(callback) = callback {
                callback.complete(result);
            }
        };
        let finish = Rc::new(finish);

        let report = finish.clone();
        let started = panic::catch_unwind(AssertUnwindSafe(|| {
            task.start(Callback::new(move |result| report(result)), input)
        }));
        match started {
            Ok(Some(inner_cancel)) => {
                let mut deadline = state.borrow_mut();
                if deadline.callback.is_some() {
                    deadline.inner_cancel = Some(inner_cancel);
                }
            }
            Ok(None) => {}
            Err(payload) => finish(Err(Reason::panicked(task.name().to_string(), payload.as_ref()))),
        }

        Some(Cancel::conveying(move |reason, _report| {
            let (callback, timer, inner_cancel) = {
                let mut deadline = state.borrow_mut();
                (
                    deadline.callback.take(),
                    deadline.timer.take(),
                    deadline.inner_cancel.take(),
                )
            };
            let Some(callback) = callback else {
                return;
            };
            let reason = reason.unwrap_or_else(|| Reason::cancelled("time_limit", "Cancel."));
            if let Some(inner_cancel) = inner_cancel {
                inner_cancel.fire_quietly(reason.clone(), false);
            }
            if let Some(timer) = timer {
                timer.clear();
            }
            callback.fail(reason);
        }))
    })
}

fn expire(state: &Rc<RefCell<Deadline>>, limit: Duration) {
    let inner_cancel = {
        let mut deadline = state.borrow_mut();
        if deadline.callback.is_none() {
            return;
        }
        deadline.timer = None;
        deadline.inner_cancel.take()
    };

    let reason = Reason::timed_out("time_limit", limit);
    debug!(?limit, "Time limit expired");
    if let Some(inner_cancel) = inner_cancel {
        inner_cancel.fire_quietly(reason.clone(), true);
    }

    let callback = state.borrow_mut().callback.take();
    if let Some(callback) = callback {
        callback.fail(reason);
    }
}
