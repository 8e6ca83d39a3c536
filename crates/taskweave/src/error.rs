//! Error types for the taskweave orchestration framework
//!
//! There are two kinds of errors. A [`ConfigError`] is a programming mistake in
//! how a combinator was put together; it is returned synchronously from the
//! factory that detected it. A [`Reason`] is the cause of a task failure or
//! cancellation and only ever travels through a task's completion callback.

use std::any::Any;
use std::borrow::Cow;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while configuring a combinator or executor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{factory}: bad throttle {value} (must be > 0)")]
    InvalidThrottle { factory: &'static str, value: usize },

    #[error("{factory}: bad need {need} for {total} tasks")]
    InvalidNeed {
        factory: &'static str,
        need: usize,
        total: usize,
    },

    #[error("{factory}: bad time limit {limit:?} (must be > 0)")]
    InvalidTimeLimit {
        factory: &'static str,
        limit: Duration,
    },
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create an invalid throttle error
    pub fn invalid_throttle(factory: &'static str, value: usize) -> Self {
        ConfigError::InvalidThrottle { factory, value }
    }

    /// Create an invalid need error
    pub fn invalid_need(factory: &'static str, need: usize, total: usize) -> Self {
        ConfigError::InvalidNeed {
            factory,
            need,
            total,
        }
    }

    /// Create an invalid time limit error
    pub fn invalid_time_limit(factory: &'static str, limit: Duration) -> Self {
        ConfigError::InvalidTimeLimit { factory, limit }
    }

    /// Name of the combinator that rejected its arguments
    pub fn factory(&self) -> &'static str {
        match self {
            ConfigError::InvalidThrottle { factory, .. }
            | ConfigError::InvalidNeed { factory, .. }
            | ConfigError::InvalidTimeLimit { factory, .. } => factory,
        }
    }
}

/// Classification of a [`Reason`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonKind {
    /// The task reported a failure
    Failed,
    /// The task was cancelled, or abandoned its work on request
    Cancelled,
    /// A deadline elapsed before the task reported
    TimedOut,
    /// The task panicked instead of reporting through its callback
    Panicked,
}

/// The cause of a task failure or cancellation
///
/// A reason names the component it came from (a combinator such as
/// `"parallel"`, an adapter, or a task name), carries a human-readable message
/// and may wrap the reason that led to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{origin}: {message}")]
pub struct Reason {
    origin: Cow<'static, str>,
    message: String,
    kind: ReasonKind,
    #[source]
    cause: Option<Box<Reason>>,
}

impl Reason {
    fn with_kind(
        kind: ReasonKind,
        origin: impl Into<Cow<'static, str>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
            kind,
            cause: None,
        }
    }

    /// Create a failure reason
    pub fn new(origin: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::with_kind(ReasonKind::Failed, origin, message)
    }

    /// Create a cancellation reason
    pub fn cancelled(origin: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::with_kind(ReasonKind::Cancelled, origin, message)
    }

    /// Create a timeout reason for a deadline of `limit`
    pub fn timed_out(origin: impl Into<Cow<'static, str>>, limit: Duration) -> Self {
        Self::with_kind(
            ReasonKind::TimedOut,
            origin,
            format!("time expired after {limit:?}"),
        )
    }

    /// Create a reason from a panic payload
    pub fn panicked(origin: impl Into<Cow<'static, str>>, payload: &(dyn Any + Send)) -> Self {
        Self::with_kind(ReasonKind::Panicked, origin, panic_message(payload))
    }

    /// Attach the reason that led to this one
    pub fn with_cause(mut self, cause: Reason) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Name of the component that produced this reason
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ReasonKind {
        self.kind
    }

    /// The wrapped reason, if any
    pub fn cause(&self) -> Option<&Reason> {
        self.cause.as_deref()
    }

    /// Check if this reason indicates cancellation
    pub fn is_cancelled(&self) -> bool {
        self.kind == ReasonKind::Cancelled
    }

    /// Check if this reason indicates a timeout
    pub fn is_timeout(&self) -> bool {
        self.kind == ReasonKind::TimedOut
    }

    /// Check if this reason was produced by a panic
    pub fn is_panic(&self) -> bool {
        self.kind == ReasonKind::Panicked
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
