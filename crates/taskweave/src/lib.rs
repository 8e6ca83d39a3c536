//! Taskweave - Callback-based Task Orchestration
//!
//! A small set of combinators for composing asynchronous units of work on a
//! single-threaded, cooperative event loop.
//!
//! # Overview
//!
//! A [`Task`] is started with a [`Callback`] and an input [`Value`], reports
//! success or failure exactly once, and may hand back a [`Cancel`] handle.
//! The [`Executor`] builds new tasks out of lists of tasks:
//!
//! - [`Executor::sequence`] runs tasks one after another, threading each
//!   result into the next task
//! - [`Executor::fallback`] tries tasks one at a time until one succeeds
//! - [`Executor::parallel`] runs every task and succeeds if enough of them do
//! - [`Executor::race`] stops as soon as enough tasks have succeeded
//! - [`Executor::time_limit`] fails a task that takes too long
//!
//! All four list combinators are configurations of one orchestrator
//! ([`RunPlan`]), and the tasks they return can be nested freely. Task starts
//! are always deferred through a [`Scheduler`], so no task runs inside the
//! call that started its parent.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use taskweave::{Callback, EventLoop, Executor, Task, Value};
//!
//! let event_loop = EventLoop::new();
//! let executor = Executor::new(event_loop.clone());
//!
//! let shout = Task::from_fn("shout", |input: Value| {
//!     input
//!         .as_str()
//!         .map(|text| json!(text.to_uppercase()))
//!         .ok_or("expected a string")
//! });
//! let exclaim = Task::from_fn("exclaim", |input: Value| {
//!     Ok::<_, String>(json!(format!("{}!", input.as_str().unwrap_or_default())))
//! });
//!
//! let pipeline = executor.sequence([shout, exclaim]);
//! pipeline.start(
//!     Callback::new(|result| assert_eq!(result, Ok(json!("HELLO!")))),
//!     json!("hello"),
//! );
//! event_loop.run();
//! ```

pub mod adapters;
pub mod error;
pub mod executor;
pub mod limits;
pub mod reporter;
pub mod run;
pub mod scheduler;
pub mod task;
pub mod types;

#[cfg(test)]
mod test_support;

pub use adapters::objectify;
pub use error::{ConfigError, ConfigResult, Reason, ReasonKind};
pub use executor::{Completion, Executor};
pub use limits::Limit;
pub use reporter::{
    MultiReporter, NoOpReporter, RecordingReporter, RunEvent, RunOutcome, RunReporter,
    TracingReporter,
};
pub use run::{Phase, ResultShape, RunPlan};
pub use scheduler::{EventLoop, Scheduler, Timer, TokioScheduler};
pub use task::{Callback, Cancel, RunId, Task, TaskResult};
pub use types::{EmptyDelivery, ExecutorConfig, RunSummary};

/// The value passed between tasks
pub type Value = serde_json::Value;
