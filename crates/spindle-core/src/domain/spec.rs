//! Submission inputs.
//!
//! [`SubmitOptions`] is what a producer asks for; every field is optional and
//! falls back to the task type's defaults, then to process-wide settings.
//! [`NewTask`] is the fully-resolved insert spec the store receives.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::Tags;

/// Fully-resolved spec for a new `Pending` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub parameters: serde_json::Value,

    /// `scheduled_at = now + delay`.
    pub delay: Duration,
    pub priority: i64,
    pub tags: Tags,
    pub max_retries: u32,
    pub execution_deadline: Option<Duration>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            parameters,
            delay: Duration::ZERO,
            priority: 0,
            tags: Tags::new(),
            max_retries: 3,
            execution_deadline: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_execution_deadline(mut self, deadline: Duration) -> Self {
        self.execution_deadline = Some(deadline);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOptions {
    #[serde(default)]
    pub delay: Duration,

    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub tags: Tags,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
