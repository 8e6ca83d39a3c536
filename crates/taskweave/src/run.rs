//! The orchestrator behind every combinator
//!
//! One parameterized engine starts an ordered list of tasks, keeps at most
//! `throttle` of them in flight, counts successes and failures, and decides
//! when the run is over. The combinators only differ in the [`RunPlan`] they
//! hand to it:
//!
//! | combinator | throttle | needed | shape | advance | early |
//! |---|---|---|---|---|---|
//! | sequence | 1 | all | single | yes | no |
//! | fallback | 1 | 1 | single | no | yes |
//! | parallel | limit or all | need | collection | no | no |
//! | race | limit or all | need | single or collection | no | yes |
//!
//! A run moves through `Running → Succeeded | Failed | Cancelled` exactly once.
//! Task starts, including the start that follows each completion, always go
//! through the scheduler, so no task is ever invoked from inside the call that
//! started the run or from inside another task's callback.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{panic_message, ConfigError, ConfigResult, Reason};
use crate::reporter::{RunEvent, RunOutcome, SharedReporter};
use crate::scheduler::Scheduler;
use crate::task::{Callback, Cancel, RunId, Task, TaskResult};
use crate::types::{EmptyDelivery, RunSummary};
use crate::Value;

/// Shape of the value delivered by a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// The most recent success value
    Single,
    /// An array indexed by task position; failed or unfinished slots are `null`
    Collection,
}

/// Parameters of one orchestration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    factory: &'static str,
    throttle: usize,
    needed: usize,
    shape: ResultShape,
    advance: bool,
    early: bool,
}

impl RunPlan {
    /// Create a plan that needs `needed` successes and keeps at most
    /// `throttle` tasks in flight
    ///
    /// Defaults to a collection result, no value threading, and no early stop.
    pub fn new(factory: &'static str, throttle: usize, needed: usize) -> ConfigResult<Self> {
        if throttle == 0 {
            return Err(ConfigError::invalid_throttle(factory, throttle));
        }
        Ok(Self {
            factory,
            throttle,
            needed,
            shape: ResultShape::Collection,
            advance: false,
            early: false,
        })
    }

    /// A plan that starts one task at a time
    pub(crate) fn one_at_a_time(factory: &'static str, needed: usize) -> Self {
        Self {
            factory,
            throttle: 1,
            needed,
            shape: ResultShape::Collection,
            advance: false,
            early: false,
        }
    }

    pub fn with_shape(mut self, shape: ResultShape) -> Self {
        self.shape = shape;
        self
    }

    /// Thread each success value into the tasks started after it
    pub fn with_advance(mut self, advance: bool) -> Self {
        self.advance = advance;
        self
    }

    /// Finish as soon as enough tasks have succeeded
    pub fn with_early(mut self, early: bool) -> Self {
        self.early = early;
        self
    }

    pub fn factory(&self) -> &'static str {
        self.factory
    }

    pub fn throttle(&self) -> usize {
        self.throttle
    }

    pub fn needed(&self) -> usize {
        self.needed
    }

    pub fn shape(&self) -> ResultShape {
        self.shape
    }

    pub fn advance(&self) -> bool {
        self.advance
    }

    pub fn early(&self) -> bool {
        self.early
    }

    /// Check that the plan can be satisfied by `total` tasks
    pub fn validate_for(&self, total: usize) -> ConfigResult<()> {
        if self.needed > total {
            return Err(ConfigError::invalid_need(self.factory, self.needed, total));
        }
        Ok(())
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Succeeded,
    Failed,
    /// Cancelled from outside without delivering an outcome
    Cancelled,
}

/// Everything a run needs from the executor that launched it
#[derive(Clone)]
pub(crate) struct RunEnv {
    pub(crate) scheduler: Rc<dyn Scheduler>,
    pub(crate) reporter: SharedReporter,
    pub(crate) start_delay: Duration,
    pub(crate) empty_delivery: EmptyDelivery,
}

impl RunEnv {
    fn report(&self, event: RunEvent) {
        self.reporter.borrow_mut().report_event(event);
    }
}

enum Slot {
    Waiting,
    InFlight(Option<Cancel>),
    Done,
    /// Was in flight when the run finished
    Abandoned,
}

enum Results {
    Single(Option<Value>),
    Collection(Vec<Option<Value>>),
}

impl Results {
    fn new(shape: ResultShape, total: usize) -> Self {
        match shape {
            ResultShape::Single => Results::Single(None),
            ResultShape::Collection => Results::Collection(vec![None; total]),
        }
    }

    fn record(&mut self, index: usize, value: Value) {
        match self {
            Results::Single(slot) => *slot = Some(value),
            Results::Collection(slots) => slots[index] = Some(value),
        }
    }

    fn take_value(&mut self) -> Value {
        match self {
            Results::Single(slot) => slot.take().unwrap_or(Value::Null),
            Results::Collection(slots) => Value::Array(
                std::mem::take(slots)
                    .into_iter()
                    .map(|slot| slot.unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }
}

struct RunState {
    id: RunId,
    plan: RunPlan,
    tasks: Rc<[Task]>,
    cursor: usize,
    slots: Vec<Slot>,
    pending: usize,
    successes: usize,
    failures: usize,
    strikes: usize,
    results: Results,
    carried: Value,
    phase: Phase,
    callback: Option<Callback>,
    closing_reason: Option<Reason>,
}

impl RunState {
    fn summary(&self, cancelled: usize) -> RunSummary {
        RunSummary {
            total: self.tasks.len(),
            started: self.cursor,
            successes: self.successes,
            failures: self.failures,
            cancelled,
        }
    }
}

enum Step {
    StartNext,
    Finish(Option<Reason>),
}

/// Handle on the shared state of one live run
#[derive(Clone)]
struct Run {
    state: Rc<RefCell<RunState>>,
    env: Rc<RunEnv>,
}

/// Start a run of `tasks` under `plan`
///
/// Returns the run's cancel capability, or `None` for an empty task list,
/// which delivers `initial` without starting anything.
pub(crate) fn launch(
    env: Rc<RunEnv>,
    plan: RunPlan,
    tasks: Rc<[Task]>,
    callback: Callback,
    initial: Value,
) -> Option<Cancel> {
    if tasks.is_empty() {
        debug!(factory = plan.factory, "Empty task list, delivering initial value");
        match env.empty_delivery {
            EmptyDelivery::Immediate => callback.succeed(initial),
            EmptyDelivery::Deferred => {
                env.scheduler
                    .defer(Duration::ZERO, Box::new(move || callback.succeed(initial)));
            }
        }
        return None;
    }

    let total = tasks.len();
    let id = RunId::new();
    let state = RunState {
        id,
        plan,
        tasks,
        cursor: 0,
        slots: (0..total).map(|_| Slot::Waiting).collect(),
        pending: total,
        successes: 0,
        failures: 0,
        strikes: total.saturating_sub(plan.needed),
        results: Results::new(plan.shape, total),
        carried: initial,
        phase: Phase::Running,
        callback: Some(callback),
        closing_reason: None,
    };
    let run = Run {
        state: Rc::new(RefCell::new(state)),
        env,
    };

    debug!(
        run_id = %id,
        factory = plan.factory,
        total,
        throttle = plan.throttle,
        needed = plan.needed,
        "Starting run"
    );
    run.env.report(RunEvent::RunStarted {
        run_id: id,
        factory: plan.factory,
        total,
    });

    for _ in 0..plan.throttle.min(total) {
        run.schedule_start();
    }

    let handle = run.clone();
    Some(Cancel::conveying(move |reason, report| {
        handle.terminate(reason, report)
    }))
}

impl Run {
    fn schedule_start(&self) {
        let run = self.clone();
        self.env
            .scheduler
            .defer(self.env.start_delay, Box::new(move || run.start_next()));
    }

    fn start_next(&self) {
        let (id, index, task, input) = {
            let mut state = self.state.borrow_mut();
            if state.phase != Phase::Running || state.cursor >= state.tasks.len() {
                return;
            }
            let index = state.cursor;
            state.cursor += 1;
            state.slots[index] = Slot::InFlight(None);
            (state.id, index, state.tasks[index].clone(), state.carried.clone())
        };

        trace!(run_id = %id, index, task_name = task.name(), "Starting task");
        self.env.report(RunEvent::TaskStarted {
            run_id: id,
            index,
            name: task.name().to_string(),
        });

        let run = self.clone();
        let callback = Callback::new(move |result| run.complete(index, result));
        match panic::catch_unwind(AssertUnwindSafe(|| task.start(callback, input))) {
            Ok(Some(cancel)) => self.store_cancel(index, cancel),
            Ok(None) => {}
            Err(payload) => {
                warn!(
                    run_id = %id,
                    index,
                    task_name = task.name(),
                    error = %panic_message(payload.as_ref()),
                    "Task panicked while starting, treating as failure"
                );
                let reason = Reason::panicked(task.name().to_string(), payload.as_ref());
                self.complete(index, Err(reason));
            }
        }
    }

    fn store_cancel(&self, index: usize, cancel: Cancel) {
        let late = {
            let mut state = self.state.borrow_mut();
            let closing_reason = state.closing_reason.clone();
            match &mut state.slots[index] {
                Slot::InFlight(slot) => {
                    *slot = Some(cancel);
                    None
                }
                // The run finished while this task was still starting
                Slot::Abandoned => closing_reason.map(|reason| (cancel, reason)),
                Slot::Waiting | Slot::Done => None,
            }
        };
        if let Some((cancel, reason)) = late {
            cancel.fire_quietly(reason, false);
        }
    }

    fn complete(&self, index: usize, result: TaskResult) {
        let (id, strikes, event, step) = {
            let mut state = self.state.borrow_mut();
            if state.phase != Phase::Running || !matches!(state.slots[index], Slot::InFlight(_)) {
                trace!(run_id = %state.id, index, "Ignoring completion of a finished task");
                return;
            }
            state.slots[index] = Slot::Done;
            state.pending -= 1;
            let id = state.id;

            match result {
                Ok(value) => {
                    state.successes += 1;
                    if state.plan.advance {
                        state.carried = value.clone();
                    }
                    state.results.record(index, value);
                    let step = if state.pending == 0
                        || (state.plan.early && state.successes >= state.plan.needed)
                    {
                        Step::Finish(None)
                    } else {
                        Step::StartNext
                    };
                    (id, state.strikes, RunEvent::TaskSucceeded { run_id: id, index }, step)
                }
                Err(reason) => {
                    state.failures += 1;
                    let event = RunEvent::TaskFailed {
                        run_id: id,
                        index,
                        reason: reason.clone(),
                    };
                    let step = if state.strikes == 0 || state.pending == 0 {
                        Step::Finish(Some(reason))
                    } else {
                        state.strikes -= 1;
                        Step::StartNext
                    };
                    (id, state.strikes, event, step)
                }
            }
        };

        trace!(run_id = %id, index, strikes, "Task completed");
        self.env.report(event);
        match step {
            Step::StartNext => self.schedule_start(),
            Step::Finish(reason) => self.terminate(reason, true),
        }
    }

    /// Move the run to its terminal state, cancel whatever is still in flight,
    /// and deliver the outcome if `convey` is set
    fn terminate(&self, reason: Option<Reason>, convey: bool) {
        let (id, factory, phase, reason, cancels, abandoned, delivery, dropped, summary) = {
            let mut state = self.state.borrow_mut();
            if state.phase != Phase::Running {
                return;
            }
            let factory = state.plan.factory;
            let reason = reason.unwrap_or_else(|| Reason::cancelled(factory, "Cancel."));
            let met = state.successes >= state.plan.needed;

            state.phase = match (convey, met) {
                (false, _) => Phase::Cancelled,
                (true, true) => Phase::Succeeded,
                (true, false) => Phase::Failed,
            };

            let mut cancels = Vec::new();
            let mut abandoned = Vec::new();
            for (index, slot) in state.slots.iter_mut().enumerate() {
                if let Slot::InFlight(cancel) = slot {
                    if let Some(cancel) = cancel.take() {
                        cancels.push(cancel);
                    }
                    *slot = Slot::Abandoned;
                    abandoned.push(index);
                }
            }

            let sweep_reason = if reason.is_cancelled() {
                reason.clone()
            } else {
                Reason::cancelled(factory, "Cancel.").with_cause(reason.clone())
            };
            state.closing_reason = Some(sweep_reason.clone());

            let callback = state.callback.take();
            let (delivery, dropped) = if convey {
                let result = if met {
                    Ok(state.results.take_value())
                } else {
                    Err(reason.clone())
                };
                (callback.map(|callback| (callback, result)), None)
            } else {
                (None, callback)
            };

            let summary = state.summary(abandoned.len());
            (
                state.id,
                factory,
                state.phase,
                sweep_reason,
                cancels,
                abandoned,
                delivery,
                dropped,
                summary,
            )
        };
        drop(dropped);

        for cancel in &cancels {
            cancel.fire_quietly(reason.clone(), false);
        }
        for index in abandoned {
            self.env.report(RunEvent::TaskCancelled { run_id: id, index });
        }

        let outcome = match (&phase, &delivery) {
            (Phase::Succeeded, _) => RunOutcome::Succeeded,
            (_, Some((_, Err(failure)))) => RunOutcome::Failed(failure.clone()),
            _ => RunOutcome::Cancelled(reason.clone()),
        };
        debug!(
            run_id = %id,
            factory,
            phase = ?phase,
            successes = summary.successes,
            failures = summary.failures,
            cancelled = summary.cancelled,
            "Run finished"
        );
        self.env.report(RunEvent::RunFinished {
            run_id: id,
            factory,
            outcome,
            summary,
        });

        if let Some((callback, result)) = delivery {
            callback.complete(result);
        }
    }
}
