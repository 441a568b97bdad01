//! Outcome model: what one execution attempt produced.
//!
//! The supervisor never decides retry-vs-terminal; it only classifies the
//! attempt. The store applies the retry policy when it records a failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// The task body returned an error.
    Execution,

    /// The execution deadline elapsed before the body returned.
    Timeout,

    /// No callable is registered under the task's name.
    NotFound,

    /// Stored parameters no longer decode into the task's input type.
    InvalidParameters,

    /// The task body panicked.
    Panic,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Execution => "EXECUTION",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::InvalidParameters => "INVALID_PARAMETERS",
            ErrorCategory::Panic => "PANIC",
        };
        f.write_str(s)
    }
}

/// Structured failure description, persisted as JSON in the `error` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{category}: {message}")]
pub struct TaskError {
    pub category: ErrorCategory,
    pub message: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl TaskError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for task bodies: `.map_err(TaskError::execution)?`.
    pub fn execution(message: impl fmt::Display) -> Self {
        Self::new(ErrorCategory::Execution, message.to_string())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(
            ErrorCategory::NotFound,
            format!("no task registered under '{name}'"),
        )
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The body returned normally. `None` when it produced no value.
    Success(Option<serde_json::Value>),

    Failure(TaskError),
}

impl Outcome {
    pub fn success(result: Option<serde_json::Value>) -> Self {
        Outcome::Success(result)
    }

    pub fn failure(error: TaskError) -> Self {
        Outcome::Failure(error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Outcome::Failure(err) => Some(err),
            Outcome::Success(_) => None,
        }
    }
}
