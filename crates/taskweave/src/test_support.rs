//! Scripted tasks shared by the unit tests

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::error::Reason;
use crate::scheduler::{EventLoop, Scheduler};
use crate::task::{Callback, Cancel, Task, TaskResult};
use crate::Value;

#[derive(Default)]
struct ProbeState {
    callback: Option<Callback>,
    inputs: Vec<Value>,
    cancels: Vec<Reason>,
}

/// A task that stays in flight until the test resolves it
#[derive(Clone)]
pub(crate) struct Probe {
    name: String,
    state: Rc<RefCell<ProbeState>>,
}

impl Probe {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Rc::default(),
        }
    }

    pub(crate) fn task(&self) -> Task {
        let state = self.state.clone();
        Task::new(self.name.clone(), move |callback, input| {
            {
                let mut probe = state.borrow_mut();
                probe.inputs.push(input);
                probe.callback = Some(callback);
            }
            let state = state.clone();
            Some(Cancel::new(move |reason| {
                state.borrow_mut().cancels.push(reason)
            }))
        })
    }

    pub(crate) fn started(&self) -> bool {
        !self.state.borrow().inputs.is_empty()
    }

    pub(crate) fn input(&self) -> Option<Value> {
        self.state.borrow().inputs.last().cloned()
    }

    pub(crate) fn cancel_reasons(&self) -> Vec<Reason> {
        self.state.borrow().cancels.clone()
    }

    pub(crate) fn succeed(&self, value: Value) {
        self.complete(Ok(value))
    }

    pub(crate) fn fail(&self, message: &str) {
        self.complete(Err(Reason::new(self.name.clone(), message)))
    }

    fn complete(&self, result: TaskResult) {
        let callback = self.state.borrow_mut().callback.take();
        if let Some(callback) = callback {
            callback.complete(result)
        }
    }
}

/// A callback that records every outcome it receives
pub(crate) fn outcome_sink() -> (Rc<RefCell<Vec<TaskResult>>>, Callback) {
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let sink = outcomes.clone();
    let callback = Callback::new(move |result| sink.borrow_mut().push(result));
    (outcomes, callback)
}

/// A task that reports `result` after `delay` of virtual time and keeps track
/// of how many tasks sharing `gauge` are in flight
pub(crate) fn timed(
    event_loop: &EventLoop,
    name: &str,
    delay: Duration,
    result: TaskResult,
    gauge: &Gauge,
) -> Task {
    let event_loop = event_loop.clone();
    let gauge = gauge.clone();
    Task::new(name, move |callback, _input| {
        gauge.enter();
        let gauge = gauge.clone();
        let result = result.clone();
        let timer = event_loop.defer(
            delay,
            Box::new(move || {
                gauge.leave();
                callback.complete(result);
            }),
        );
        let timer = RefCell::new(Some(timer));
        Some(Cancel::new(move |_reason| {
            if let Some(timer) = timer.borrow_mut().take() {
                timer.clear();
            }
        }))
    })
}

/// A task that appends `.name` to its string input, like the demo widgets
pub(crate) fn appender(name: &'static str) -> Task {
    Task::new(name, move |callback, input| {
        let prefix = input.as_str().unwrap_or_default().to_string();
        callback.succeed(Value::String(format!("{prefix}.{name}")));
        None
    })
}

/// Current and peak number of tasks in flight
#[derive(Clone, Default)]
pub(crate) struct Gauge {
    state: Rc<RefCell<(usize, usize)>>,
}

impl Gauge {
    fn enter(&self) {
        let mut state = self.state.borrow_mut();
        state.0 += 1;
        state.1 = state.1.max(state.0);
    }

    fn leave(&self) {
        self.state.borrow_mut().0 -= 1;
    }

    pub(crate) fn peak(&self) -> usize {
        self.state.borrow().1
    }
}
