//! In-memory task store.
//!
//! A single `tokio::sync::Mutex` serializes every operation, which makes
//! `claim_next` trivially atomic. Nothing survives a restart; meant for tests
//! and local development.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Lease, QueueStats, TaskError, TaskFilter, TaskId, TaskRecord, TaskState, WorkerStats, time,
};
use crate::error::StoreError;
use crate::ports::TaskStore;
use crate::retry::{FailureDecision, RetryPolicy};

#[derive(Default)]
struct InMemoryState {
    /// Single source of truth.
    records: HashMap<TaskId, TaskRecord>,

    /// Next submission order to assign.
    next_seq: i64,
}

impl InMemoryState {
    fn allocate_seq(&mut self) -> i64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Highest priority first, then earliest submission.
    fn next_eligible(&mut self, now: DateTime<Utc>) -> Option<&mut TaskRecord> {
        self.records
            .values_mut()
            .filter(|r| r.is_claimable(now))
            .max_by_key(|r| (r.priority, Reverse(r.seq)))
    }

    /// The record `lease` refers to, if the lease is still current.
    fn leased_mut(&mut self, lease: &Lease) -> Option<&mut TaskRecord> {
        self.records
            .get_mut(&lease.task_id)
            .filter(|record| record.holds(lease))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, mut record: TaskRecord) -> Result<TaskId, StoreError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(&record.id) {
            return Err(StoreError::Corrupt(format!("duplicate task id {}", record.id)));
        }
        record.seq = state.allocate_seq();
        record.scheduled_at = time::truncate_millis(record.scheduled_at);
        record.created_at = time::truncate_millis(record.created_at);
        let id = record.id;
        state.records.insert(id, record);
        Ok(id)
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let now = time::truncate_millis(now);
        let mut state = self.state.lock().await;
        let Some(record) = state.next_eligible(now) else {
            return Ok(None);
        };
        record.claim(worker_id, now, lease_duration);
        Ok(Some(record.clone()))
    }

    async fn complete(
        &self,
        lease: &Lease,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.leased_mut(lease) {
            Some(record) => {
                record.complete(result, time::truncate_millis(now));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fail(
        &self,
        lease: &Lease,
        error: &TaskError,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureDecision>, StoreError> {
        let now = time::truncate_millis(now);
        let mut state = self.state.lock().await;
        let Some(record) = state.leased_mut(lease) else {
            return Ok(None);
        };
        let decision = policy.decide(record.retry_count, record.max_retries, now);
        record.apply_failure(error.clone(), &decision, now);
        Ok(Some(decision))
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<&TaskRecord> = state
            .records
            .values()
            .filter(|r| filter.state.is_none_or(|s| r.state == s))
            .filter(|r| filter.name.as_deref().is_none_or(|n| r.name == n))
            .collect();
        matching.sort_by_key(|r| Reverse(r.seq));
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for record in state.records.values() {
            stats.total += 1;
            match record.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => {
                    stats.failed += 1;
                    if record.is_terminal() {
                        stats.failed_permanent += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    async fn workers(&self) -> Result<Vec<WorkerStats>, StoreError> {
        let state = self.state.lock().await;
        let mut by_holder: BTreeMap<&str, WorkerStats> = BTreeMap::new();
        for record in state.records.values().filter(|r| r.is_running()) {
            let Some(holder) = record.lease_holder.as_deref() else {
                continue;
            };
            let entry = by_holder.entry(holder).or_insert_with(|| WorkerStats {
                worker_id: holder.to_string(),
                running: 0,
                earliest_lease_expiry: None,
            });
            entry.running += 1;
            entry.earliest_lease_expiry = match (entry.earliest_lease_expiry, record.lease_expires_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        Ok(by_holder.into_values().collect())
    }
}
