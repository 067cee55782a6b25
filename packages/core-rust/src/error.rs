//! Error taxonomy shared by every pipeline layer.

use crate::types::Value;

/// Result returned by handlers, middleware and the executor.
pub type HandlerResult = Result<Value, PipelineError>;

/// Errors produced anywhere in the request execution pipeline.
///
/// Expected conditions are always returned as values. Only a genuine runtime
/// fault (a panic) is converted into [`PipelineError::HandlerFault`], and only
/// at a recovery boundary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("not found: {name}")]
    NotFound { name: String },
    #[error("handler already registered: {name}")]
    DuplicateName { name: String },
    #[error("rate limit exceeded for {identifier}")]
    RateLimitExceeded { identifier: String },
    #[error("invocation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("handler fault: {message}")]
    HandlerFault { message: String },
    #[error("invalid schedule {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },
    #[error("invocation cancelled")]
    Cancelled,
    #[error("too many concurrent invocations, try again later")]
    Overloaded,
    #[error("scheduler is running; jobs can only be added while stopped")]
    SchedulerRunning,
    #[error("invalid value for config key {key}: {reason}")]
    InvalidConfig { key: String, reason: String },
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

/// Transport-neutral classification of an invocation's result.
///
/// Trigger adapters translate an `Outcome` into their own response format
/// (HTTP status, process exit code, queue nack, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    NotFound,
    Throttled,
    DeadlineExceeded,
    Unavailable,
    Invalid,
    Internal,
    Failed,
}

impl Outcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Unavailable => "unavailable",
            Self::Invalid => "invalid",
            Self::Internal => "internal",
            Self::Failed => "failed",
        }
    }

    /// Classifies a handler result.
    #[must_use]
    pub fn of(result: &HandlerResult) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.outcome(),
        }
    }
}

impl PipelineError {
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::NotFound { .. } => Outcome::NotFound,
            Self::RateLimitExceeded { .. } => Outcome::Throttled,
            Self::Timeout { .. } => Outcome::DeadlineExceeded,
            Self::Cancelled | Self::Overloaded => Outcome::Unavailable,
            Self::InvalidSchedule { .. } | Self::InvalidConfig { .. } => Outcome::Invalid,
            Self::HandlerFault { .. } | Self::DuplicateName { .. } | Self::SchedulerRunning => {
                Outcome::Internal
            }
            Self::Handler(_) => Outcome::Failed,
        }
    }

    /// Shorthand for a `NotFound` error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Shorthand for an `InvalidSchedule` error.
    pub fn invalid_schedule(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}
