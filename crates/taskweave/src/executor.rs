//! Main executor: combinator factories and the future bridge

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::adapters::deadline;
use crate::error::{ConfigError, ConfigResult, Reason};
use crate::limits::Limit;
use crate::reporter::{NoOpReporter, RunReporter, SharedReporter};
use crate::run::{launch, ResultShape, RunEnv, RunPlan};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::task::{Callback, Cancel, Task, TaskResult};
use crate::types::ExecutorConfig;
use crate::Value;

/// Builds orchestrated tasks that share one scheduler, configuration and
/// reporter
///
/// Executors are cheap to clone.
#[derive(Clone)]
pub struct Executor {
    env: Rc<RunEnv>,
    config: ExecutorConfig,
}

impl Executor {
    /// Create a new executor with default configuration
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self::with_config(scheduler, ExecutorConfig::default())
    }

    /// Create a new executor with custom configuration
    pub fn with_config(scheduler: impl Scheduler + 'static, config: ExecutorConfig) -> Self {
        Self {
            env: Rc::new(RunEnv {
                scheduler: Rc::new(scheduler),
                reporter: Rc::new(RefCell::new(NoOpReporter)),
                start_delay: config.start_delay,
                empty_delivery: config.empty_delivery,
            }),
            config,
        }
    }

    /// Create an executor that schedules onto the current tokio `LocalSet`
    pub fn tokio() -> Self {
        Self::new(TokioScheduler)
    }

    /// Report the lifecycle of every run started from now on to `reporter`
    pub fn with_reporter(mut self, reporter: impl RunReporter + 'static) -> Self {
        let reporter: SharedReporter = Rc::new(RefCell::new(reporter));
        let mut env = (*self.env).clone();
        env.reporter = reporter;
        self.env = Rc::new(env);
        self
    }

    /// Get the current configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.env.scheduler.clone()
    }

    /// Build a task that runs `tasks` under a custom plan
    pub fn orchestrate(
        &self,
        plan: RunPlan,
        tasks: impl IntoIterator<Item = Task>,
    ) -> ConfigResult<Task> {
        let tasks: Rc<[Task]> = tasks.into_iter().collect();
        plan.validate_for(tasks.len())?;
        Ok(self.weave(plan, tasks))
    }

    /// Run `tasks` one at a time, feeding each success into the next task
    ///
    /// Succeeds with the last task's value; the first failure fails the whole
    /// sequence and later tasks never start.
    pub fn sequence(&self, tasks: impl IntoIterator<Item = Task>) -> Task {
        let tasks: Rc<[Task]> = tasks.into_iter().collect();
        let plan = RunPlan::one_at_a_time("sequence", tasks.len())
            .with_shape(ResultShape::Single)
            .with_advance(true);
        self.weave(plan, tasks)
    }

    /// Try `tasks` one at a time until one succeeds
    pub fn fallback(&self, tasks: impl IntoIterator<Item = Task>) -> Task {
        let tasks: Rc<[Task]> = tasks.into_iter().collect();
        let needed = tasks.len().min(1);
        let plan = RunPlan::one_at_a_time("fallback", needed)
            .with_shape(ResultShape::Single)
            .with_early(true);
        self.weave(plan, tasks)
    }

    /// Run every task, at most `limit` at a time, and succeed if at least
    /// `need` of them succeed (all of them by default)
    ///
    /// The result is an array indexed by task position with `null` for tasks
    /// that failed.
    pub fn parallel(
        &self,
        tasks: impl IntoIterator<Item = Task>,
        limit: Option<usize>,
        need: Option<usize>,
    ) -> ConfigResult<Task> {
        let tasks: Rc<[Task]> = tasks.into_iter().collect();
        let total = tasks.len();
        let needed = need.unwrap_or(total);
        if needed > total {
            return Err(ConfigError::invalid_need("parallel", needed, total));
        }
        let throttle = self.throttle("parallel", total, limit)?;
        let plan = RunPlan::new("parallel", throttle, needed)?;
        Ok(self.weave(plan, tasks))
    }

    /// Start tasks, at most `limit` at a time, and stop as soon as `need` of
    /// them have succeeded
    ///
    /// Without `need` the first success wins and is delivered on its own.
    /// With an explicit `need` the result is an array indexed by task position.
    pub fn race(
        &self,
        tasks: impl IntoIterator<Item = Task>,
        limit: Option<usize>,
        need: Option<usize>,
    ) -> ConfigResult<Task> {
        let tasks: Rc<[Task]> = tasks.into_iter().collect();
        let total = tasks.len();
        let (needed, shape) = match need {
            None => (total.min(1), ResultShape::Single),
            Some(need) if total > 0 && !(1..=total).contains(&need) => {
                return Err(ConfigError::invalid_need("race", need, total));
            }
            Some(need) => (need.min(total), ResultShape::Collection),
        };
        let throttle = self.throttle("race", total, limit)?;
        let plan = RunPlan::new("race", throttle, needed)?
            .with_shape(shape)
            .with_early(true);
        Ok(self.weave(plan, tasks))
    }

    /// Fail `task` with a timeout reason if it has not reported within `limit`
    pub fn time_limit(&self, task: Task, limit: Duration) -> ConfigResult<Task> {
        if limit.is_zero() {
            return Err(ConfigError::invalid_time_limit("time_limit", limit));
        }
        Ok(deadline(self.env.scheduler.clone(), task, limit))
    }

    /// Start `task` with `input` and return a future of its outcome
    pub fn request(&self, task: &Task, input: Value) -> Completion {
        let (sender, receiver) = oneshot::channel();
        let sender = Rc::new(RefCell::new(Some(sender)));
        let slot = Rc::downgrade(&sender);

        debug!(task_name = task.name(), "Starting request");
        let callback = Callback::new(move |result| {
            if let Some(sender) = sender.borrow_mut().take() {
                // The receiver may already be gone
                let _ = sender.send(result);
            }
        });
        let cancel = task.start(callback, input);

        Completion {
            origin: task.name().to_string(),
            receiver,
            sender: slot,
            cancel,
        }
    }

    fn throttle(
        &self,
        factory: &'static str,
        total: usize,
        limit: Option<usize>,
    ) -> ConfigResult<usize> {
        let limit = match limit {
            Some(0) => return Err(ConfigError::invalid_throttle(factory, 0)),
            Some(limit) => Limit::from(limit),
            None => self.config.default_limit,
        };
        Ok(limit.resolve(total).max(1))
    }

    fn weave(&self, plan: RunPlan, tasks: Rc<[Task]>) -> Task {
        let env = self.env.clone();
        Task::new(plan.factory(), move |callback, input| {
            launch(env.clone(), plan, tasks.clone(), callback, input)
        })
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Pending outcome of a task started with [`Executor::request`]
pub struct Completion {
    origin: String,
    receiver: oneshot::Receiver<TaskResult>,
    sender: Weak<RefCell<Option<oneshot::Sender<TaskResult>>>>,
    cancel: Option<Cancel>,
}

impl Completion {
    /// Cancel the task and resolve with `reason` unless it reports first
    ///
    /// The task gets a chance to deliver its own outcome (a run that already
    /// has enough successes will). Otherwise the completion resolves to a
    /// cancellation failure.
    pub fn cancel(&self, reason: Option<Reason>) {
        let reason = reason.unwrap_or_else(|| Reason::cancelled("request", "Cancel."));
        if let Some(cancel) = &self.cancel {
            cancel.fire_quietly(reason.clone(), true);
        }
        let sender = self
            .sender
            .upgrade()
            .and_then(|sender| sender.borrow_mut().take());
        if let Some(sender) = sender {
            let _ = sender.send(Err(reason));
        }
    }

    /// Whether the task returned a cancel handle
    pub fn is_cancellable(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Future for Completion {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let origin = self.origin.clone();
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(Reason::cancelled(
                    origin,
                    "Task dropped its callback without reporting.",
                ))
            })
        })
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("origin", &self.origin)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::objectify;
    use crate::reporter::{RecordingReporter, RunEvent, RunOutcome};
    use crate::scheduler::EventLoop;
    use crate::test_support::{appender, outcome_sink, timed, Gauge, Probe};
    use crate::types::EmptyDelivery;
    use futures::FutureExt;
    use indexmap::IndexMap;
    use serde_json::json;

    fn millis(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn failure(name: &str) -> TaskResult {
        Err(Reason::new(name.to_string(), "failed"))
    }

    #[test]
    fn test_empty_list_succeeds_with_input() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());

        let tasks = vec![
            executor.sequence(Vec::new()),
            executor.fallback(Vec::new()),
            executor.parallel(Vec::new(), None, None).unwrap(),
            executor.race(Vec::new(), None, None).unwrap(),
            executor.race(Vec::new(), None, Some(3)).unwrap(),
        ];
        for task in tasks {
            let (outcomes, callback) = outcome_sink();
            assert!(task.start(callback, json!("X")).is_none());
            // Delivered inside the starting call
            assert_eq!(*outcomes.borrow(), vec![Ok(json!("X"))]);
        }
        assert_eq!(event_loop.pending(), 0);
    }

    #[test]
    fn test_empty_list_deferred_mode() {
        let event_loop = EventLoop::new();
        let executor = Executor::with_config(event_loop.clone(), ExecutorConfig::for_testing());
        assert_eq!(executor.config().empty_delivery, EmptyDelivery::Deferred);

        let (outcomes, callback) = outcome_sink();
        executor.sequence(Vec::new()).start(callback, json!("X"));
        assert!(outcomes.borrow().is_empty());

        event_loop.run();
        assert_eq!(*outcomes.borrow(), vec![Ok(json!("X"))]);
    }

    #[test]
    fn test_configuration_errors() {
        let executor = Executor::new(EventLoop::new());
        let three = || (0..3).map(|i| Probe::new(format!("t{i}")).task()).collect::<Vec<_>>();

        assert_eq!(
            executor.parallel(three(), None, Some(4)).unwrap_err(),
            ConfigError::invalid_need("parallel", 4, 3)
        );
        assert_eq!(
            executor.parallel(three(), Some(0), None).unwrap_err(),
            ConfigError::invalid_throttle("parallel", 0)
        );
        assert_eq!(
            executor.race(three(), None, Some(0)).unwrap_err(),
            ConfigError::invalid_need("race", 0, 3)
        );
        assert_eq!(
            executor.race(three(), None, Some(4)).unwrap_err(),
            ConfigError::invalid_need("race", 4, 3)
        );
        assert_eq!(
            executor.race(three(), Some(0), None).unwrap_err(),
            ConfigError::invalid_throttle("race", 0)
        );
        assert_eq!(
            executor.time_limit(three().remove(0), Duration::ZERO).unwrap_err(),
            ConfigError::invalid_time_limit("time_limit", Duration::ZERO)
        );
        assert!(executor.parallel(three(), Some(10), Some(0)).is_ok());
        assert!(executor.race(three(), None, Some(3)).is_ok());
    }

    #[test]
    fn test_at_most_once_delivery() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let probes: Vec<Probe> = (0..4).map(|i| Probe::new(format!("t{i}"))).collect();
        let race = executor
            .race(probes.iter().map(Probe::task), None, None)
            .unwrap();

        let (outcomes, callback) = outcome_sink();
        let cancel = race.start(callback, Value::Null).expect("cancel handle");
        event_loop.run();

        probes[0].fail("lost");
        probes[1].succeed(json!("first"));
        probes[2].succeed(json!("second"));
        probes[3].fail("late");
        cancel.cancel_and_report(None);
        event_loop.run();

        assert_eq!(*outcomes.borrow(), vec![Ok(json!("first"))]);
    }

    #[test]
    fn test_concurrency_bound() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let gauge = Gauge::default();
        let tasks: Vec<Task> = (0..6u64)
            .map(|i| timed(&event_loop, "job", millis(10 + i * 3), Ok(json!(i)), &gauge))
            .collect();

        let (outcomes, callback) = outcome_sink();
        executor
            .parallel(tasks, Some(2), None)
            .unwrap()
            .start(callback, Value::Null);
        event_loop.run();

        assert_eq!(gauge.peak(), 2);
        assert_eq!(*outcomes.borrow(), vec![Ok(json!([0, 1, 2, 3, 4, 5]))]);
    }

    #[test]
    fn test_default_limit_from_config() {
        let event_loop = EventLoop::new();
        let config = ExecutorConfig::new().with_default_limit(3).unwrap();
        let executor = Executor::with_config(event_loop.clone(), config);
        let gauge = Gauge::default();
        let tasks: Vec<Task> = (0..7)
            .map(|_| timed(&event_loop, "job", millis(5), Ok(Value::Null), &gauge))
            .collect();

        let (_outcomes, callback) = outcome_sink();
        executor
            .race(tasks, None, Some(7))
            .unwrap()
            .start(callback, Value::Null);
        event_loop.run();

        assert_eq!(gauge.peak(), 3);
    }

    #[test]
    fn test_order_preserved_under_reverse_completion() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let gauge = Gauge::default();
        let tasks: Vec<Task> = (0..5u64)
            .map(|i| timed(&event_loop, "job", millis(50 - i * 10), Ok(json!(i)), &gauge))
            .collect();

        let (outcomes, callback) = outcome_sink();
        executor
            .parallel(tasks, None, None)
            .unwrap()
            .start(callback, Value::Null);
        event_loop.run();

        assert_eq!(*outcomes.borrow(), vec![Ok(json!([0, 1, 2, 3, 4]))]);
    }

    #[test]
    fn test_sequence_threads_values() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let sequence = executor.sequence([appender("A"), appender("B"), appender("C")]);

        let (outcomes, callback) = outcome_sink();
        sequence.start(callback, json!("X"));
        event_loop.run();

        assert_eq!(*outcomes.borrow(), vec![Ok(json!("X.A.B.C"))]);
    }

    #[test]
    fn test_sequence_stops_at_first_failure() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let t2 = Task::from_fn("B", |_input| Err::<Value, _>("B broke"));
        let t3 = Probe::new("C");
        let sequence = executor.sequence([appender("A"), t2, t3.task()]);

        let (outcomes, callback) = outcome_sink();
        sequence.start(callback, json!("X"));
        event_loop.run();

        let reason = outcomes.borrow()[0].clone().unwrap_err();
        assert_eq!(reason.origin(), "B");
        assert_eq!(reason.message(), "B broke");
        assert!(!t3.started());
    }

    #[test]
    fn test_fallback_tries_in_turn() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let probes: Vec<Probe> = (1..=3).map(|i| Probe::new(format!("t{i}"))).collect();
        let fallback = executor.fallback(probes.iter().map(Probe::task));

        let (outcomes, callback) = outcome_sink();
        fallback.start(callback, json!("in"));
        event_loop.run();
        assert!(probes[0].started() && !probes[1].started());

        probes[0].fail("t1");
        event_loop.run();
        assert!(probes[1].started() && !probes[2].started());

        probes[1].fail("t2");
        event_loop.run();
        assert_eq!(probes[2].input(), Some(json!("in")));
        probes[2].succeed(json!("V"));

        assert_eq!(*outcomes.borrow(), vec![Ok(json!("V"))]);
    }

    #[test]
    fn test_fallback_all_fail() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let fallback = executor.fallback([
            Task::from_fn("t1", |_input| Err::<Value, _>("one")),
            Task::from_fn("t2", |_input| Err::<Value, _>("two")),
        ]);

        let (outcomes, callback) = outcome_sink();
        fallback.start(callback, Value::Null);
        event_loop.run();

        let reason = outcomes.borrow()[0].clone().unwrap_err();
        assert_eq!(reason.message(), "two");
    }

    #[test]
    fn test_race_early_stop_cancels_the_rest() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let probes: Vec<Probe> = (1..=5).map(|i| Probe::new(format!("t{i}"))).collect();
        let race = executor
            .race(probes.iter().map(Probe::task), None, None)
            .unwrap();

        let (outcomes, callback) = outcome_sink();
        race.start(callback, Value::Null);
        event_loop.run();
        probes[2].succeed(json!("W"));

        assert_eq!(*outcomes.borrow(), vec![Ok(json!("W"))]);
        for (index, probe) in probes.iter().enumerate() {
            let cancels = probe.cancel_reasons();
            if index == 2 {
                assert!(cancels.is_empty());
            } else {
                assert_eq!(cancels.len(), 1);
                assert!(cancels[0].is_cancelled());
            }
        }
    }

    #[test]
    fn test_race_with_need_collects() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let probes: Vec<Probe> = (0..4).map(|i| Probe::new(format!("t{i}"))).collect();
        let race = executor
            .race(probes.iter().map(Probe::task), None, Some(2))
            .unwrap();

        let (outcomes, callback) = outcome_sink();
        race.start(callback, Value::Null);
        event_loop.run();
        probes[3].succeed(json!("d"));
        probes[1].succeed(json!("b"));

        assert_eq!(*outcomes.borrow(), vec![Ok(json!([null, "b", null, "d"]))]);
    }

    #[test]
    fn test_parallel_partial_success() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let gauge = Gauge::default();
        let results = [
            Ok(json!("a")),
            failure("t2"),
            Ok(json!("c")),
            failure("t4"),
            Ok(json!("e")),
        ];
        let tasks: Vec<Task> = results
            .into_iter()
            .enumerate()
            .map(|(i, result)| timed(&event_loop, "job", millis(5 * (i as u64 + 1)), result, &gauge))
            .collect();

        let (outcomes, callback) = outcome_sink();
        executor
            .parallel(tasks, None, Some(3))
            .unwrap()
            .start(callback, Value::Null);
        event_loop.run();

        assert_eq!(*outcomes.borrow(), vec![Ok(json!(["a", null, "c", null, "e"]))]);
    }

    #[test]
    fn test_parallel_fails_when_need_unreachable() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let probes: Vec<Probe> = (0..3).map(|i| Probe::new(format!("t{i}"))).collect();
        let parallel = executor
            .parallel(probes.iter().map(Probe::task), None, None)
            .unwrap();

        let (outcomes, callback) = outcome_sink();
        parallel.start(callback, Value::Null);
        event_loop.run();
        probes[1].fail("broken");

        let reason = outcomes.borrow()[0].clone().unwrap_err();
        assert_eq!(reason.origin(), "t1");
        assert_eq!(probes[0].cancel_reasons().len(), 1);
        assert_eq!(probes[2].cancel_reasons().len(), 1);
    }

    #[test]
    fn test_time_limit_timeout() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let stuck = Probe::new("stuck");
        let limited = executor.time_limit(stuck.task(), millis(100)).unwrap();

        let (outcomes, callback) = outcome_sink();
        limited.start(callback, Value::Null);
        event_loop.run();

        assert_eq!(event_loop.now(), millis(100));
        let reason = outcomes.borrow()[0].clone().unwrap_err();
        assert!(reason.is_timeout());
        assert_eq!(stuck.cancel_reasons().len(), 1);
    }

    #[test]
    fn test_time_limit_lets_met_need_win() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let fast = Probe::new("fast");
        let stuck = Probe::new("stuck");
        let parallel = executor
            .parallel([fast.task(), stuck.task()], None, Some(1))
            .unwrap();
        let limited = executor.time_limit(parallel, millis(100)).unwrap();

        let (outcomes, callback) = outcome_sink();
        limited.start(callback, Value::Null);
        event_loop.run_ready();
        fast.succeed(json!("F"));
        event_loop.run();

        assert_eq!(*outcomes.borrow(), vec![Ok(json!(["F", null]))]);
        assert!(stuck.cancel_reasons()[0].is_cancelled());
    }

    #[test]
    fn test_keyed_round_trip() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let factory = executor.clone();
        let keyed = objectify(move |tasks| factory.parallel(tasks, None, None));

        let mut entries = IndexMap::new();
        entries.insert("a".to_string(), Task::from_fn("a", |_| Ok::<_, String>(json!("A"))));
        entries.insert("b".to_string(), Task::from_fn("b", |_| Ok::<_, String>(json!("B"))));

        let (outcomes, callback) = outcome_sink();
        keyed(entries).unwrap().start(callback, Value::Null);
        event_loop.run();

        assert_eq!(*outcomes.borrow(), vec![Ok(json!({"a": "A", "b": "B"}))]);
    }

    #[test]
    fn test_nested_runs_compose() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let inner_failing = executor.sequence([
            appender("A"),
            Task::from_fn("broken", |_| Err::<Value, _>("nope")),
        ]);
        let inner_ok = executor.sequence([appender("B"), appender("C")]);
        let outer = executor
            .parallel([inner_failing, inner_ok], None, Some(1))
            .unwrap();

        let (outcomes, callback) = outcome_sink();
        outer.start(callback, json!("X"));
        event_loop.run();

        assert_eq!(*outcomes.borrow(), vec![Ok(json!([null, "X.B.C"]))]);
    }

    #[test]
    fn test_reporter_receives_run_events() {
        let event_loop = EventLoop::new();
        let recorder = RecordingReporter::new();
        let executor = Executor::new(event_loop.clone()).with_reporter(recorder.clone());
        let sequence = executor.sequence([appender("A"), appender("B")]);

        let (_outcomes, callback) = outcome_sink();
        sequence.start(callback, json!("X"));
        event_loop.run();

        let events = recorder.events();
        assert!(matches!(
            events.first(),
            Some(RunEvent::RunStarted {
                factory: "sequence",
                total: 2,
                ..
            })
        ));
        match events.last() {
            Some(RunEvent::RunFinished {
                outcome, summary, ..
            }) => {
                assert_eq!(*outcome, RunOutcome::Succeeded);
                assert_eq!(summary.successes, 2);
                assert_eq!(summary.unstarted(), 0);
            }
            other => panic!("Expected RunFinished, got {other:?}"),
        }
    }

    #[test]
    fn test_request_resolves_on_event_loop() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let sequence = executor.sequence([appender("A")]);

        let mut completion = executor.request(&sequence, json!("X"));
        assert!(completion.is_cancellable());
        assert!((&mut completion).now_or_never().is_none());

        event_loop.run();
        assert_eq!(completion.now_or_never(), Some(Ok(json!("X.A"))));
    }

    #[test]
    fn test_request_cancel_resolves() {
        let event_loop = EventLoop::new();
        let executor = Executor::new(event_loop.clone());
        let stuck = Probe::new("stuck");

        let completion = executor.request(&stuck.task(), Value::Null);
        completion.cancel(Some(Reason::cancelled("caller", "gave up")));

        let result = completion.now_or_never().expect("resolved");
        assert_eq!(result.unwrap_err().message(), "gave up");
        assert_eq!(stuck.cancel_reasons().len(), 1);
    }

    #[test]
    fn test_request_dropped_callback() {
        let executor = Executor::new(EventLoop::new());
        let forgetful = Task::new("forgetful", |callback, _input| {
            drop(callback);
            None
        });

        let completion = executor.request(&forgetful, Value::Null);
        assert!(!completion.is_cancellable());

        let result = completion.now_or_never().expect("resolved");
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_executor() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let executor = Executor::tokio();
                let slow = Task::from_future("slow", |input| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(input)
                });
                let quick = Task::from_future("quick", |_input| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(json!("quick"))
                });

                let race = executor.race([slow, quick], None, None).unwrap();
                assert_eq!(executor.request(&race, json!("slow")).await, Ok(json!("quick")));

                let stuck = Task::from_future("stuck", |_input| futures::future::pending());
                let limited = executor.time_limit(stuck, Duration::from_millis(100)).unwrap();
                let result = executor.request(&limited, Value::Null).await;
                assert!(result.unwrap_err().is_timeout());
            })
            .await;
    }
}
