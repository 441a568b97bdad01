//! Read-side views: listing filters and aggregate counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskState;

/// Filter for `list`. Results are newest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub name: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            state: None,
            name: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl TaskFilter {
    pub fn state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Record counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,

    /// All failed records, including permanent ones.
    pub failed: u64,

    /// Failed with the retry budget exhausted.
    pub failed_permanent: u64,
}

/// Running records grouped by lease holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub running: u64,
    pub earliest_lease_expiry: Option<DateTime<Utc>>,
}
