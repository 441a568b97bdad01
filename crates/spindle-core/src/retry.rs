//! Retry policy: decides backoff delays and when a failure is terminal.
//!
//! Pure computation; the store applies the resulting [`FailureDecision`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::time;

/// Exponential backoff: `delay(attempt) = base_delay * multiplier^attempt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for each further attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 5s, 10s, 20s, ...
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Per-task-type overrides of the process-wide policy.
///
/// Resolution is two-level only: a set field replaces the default, an unset
/// field inherits it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverrides {
    pub base_delay: Option<Duration>,
    pub multiplier: Option<f64>,
}

/// What recording one more failure does to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureDecision {
    /// Eligible again at `next_retry_at`.
    Retry {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },

    /// Retry budget exhausted.
    Terminal { retry_count: u32 },
}

impl FailureDecision {
    pub fn retry_count(&self) -> u32 {
        match *self {
            FailureDecision::Retry { retry_count, .. } => retry_count,
            FailureDecision::Terminal { retry_count } => retry_count,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureDecision::Terminal { .. })
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
        }
    }

    pub fn with_overrides(&self, overrides: &RetryOverrides) -> Self {
        Self {
            base_delay: overrides.base_delay.unwrap_or(self.base_delay),
            multiplier: overrides.multiplier.unwrap_or(self.multiplier),
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (0-indexed).
    ///
    /// Example with base_delay=5s, multiplier=2.0:
    /// - attempt 0: 5s
    /// - attempt 1: 10s
    /// - attempt 2: 20s
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn next_retry_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        time::offset(now, self.delay(retry_count))
    }

    /// Decide the effect of a failure on a record with `retry_count` prior
    /// failures out of a budget of `max_retries`.
    ///
    /// The failure is always counted (capped at `max_retries`); the record is
    /// terminal once the count reaches the budget.
    pub fn decide(&self, retry_count: u32, max_retries: u32, now: DateTime<Utc>) -> FailureDecision {
        let counted = retry_count.saturating_add(1).min(max_retries);
        if retry_count.saturating_add(1) < max_retries {
            FailureDecision::Retry {
                retry_count: counted,
                next_retry_at: self.next_retry_at(now, retry_count),
            }
        } else {
            FailureDecision::Terminal {
                retry_count: counted,
            }
        }
    }
}
