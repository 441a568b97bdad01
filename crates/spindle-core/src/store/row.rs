//! Row mapping shared by the SQL stores.
//!
//! Timestamps are INTEGER milliseconds; JSON payloads are TEXT.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{
    ErrorCategory, QueueStats, TaskError, TaskId, TaskRecord, TaskState, WorkerStats, time,
};
use crate::error::StoreError;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub seq: i64,
    pub id: String,
    pub name: String,
    pub parameters: String,
    pub state: String,
    pub scheduled_at: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub next_retry_at: Option<i64>,
    pub lease_holder: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub execution_deadline_ms: Option<i64>,
    pub priority: i64,
    pub tags: String,
}

/// Bind-ready form of a new record.
pub(crate) struct InsertParams {
    pub id: String,
    pub name: String,
    pub parameters: String,
    pub scheduled_at: i64,
    pub created_at: i64,
    pub max_retries: i64,
    pub execution_deadline_ms: Option<i64>,
    pub priority: i64,
    pub tags: String,
}

impl InsertParams {
    pub fn from_record(record: &TaskRecord) -> Result<Self, StoreError> {
        Ok(Self {
            id: record.id.to_storage(),
            name: record.name.clone(),
            parameters: serde_json::to_string(&record.parameters)?,
            scheduled_at: time::to_millis(record.scheduled_at),
            created_at: time::to_millis(record.created_at),
            max_retries: i64::from(record.max_retries),
            execution_deadline_ms: record
                .execution_deadline
                .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX)),
            priority: record.priority,
            tags: serde_json::to_string(&record.tags)?,
        })
    }
}

/// `Some(json text)` for a present value.
pub(crate) fn encode_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>, StoreError> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

fn timestamp(column: &str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    time::from_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("{column} out of range: {millis}")))
}

fn opt_timestamp(column: &str, millis: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    millis.map(|m| timestamp(column, m)).transpose()
}

fn count(column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let id: TaskId = row
            .id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?;
        let state: TaskState = row
            .state
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?;
        let error: Option<TaskError> = row.error.as_deref().map(serde_json::from_str).transpose()?;
        let result = row.result.as_deref().map(serde_json::from_str).transpose()?;
        let tags: BTreeMap<String, serde_json::Value> = serde_json::from_str(&row.tags)?;
        let execution_deadline = row
            .execution_deadline_ms
            .map(|ms| {
                u64::try_from(ms)
                    .map(Duration::from_millis)
                    .map_err(|_| StoreError::Corrupt(format!("execution_deadline_ms negative: {ms}")))
            })
            .transpose()?;

        Ok(TaskRecord {
            id,
            seq: row.seq,
            name: row.name,
            parameters: serde_json::from_str(&row.parameters)?,
            state,
            scheduled_at: timestamp("scheduled_at", row.scheduled_at)?,
            created_at: timestamp("created_at", row.created_at)?,
            started_at: opt_timestamp("started_at", row.started_at)?,
            completed_at: opt_timestamp("completed_at", row.completed_at)?,
            result,
            error,
            retry_count: count("retry_count", row.retry_count)?,
            max_retries: count("max_retries", row.max_retries)?,
            next_retry_at: opt_timestamp("next_retry_at", row.next_retry_at)?,
            lease_holder: row.lease_holder,
            lease_expires_at: opt_timestamp("lease_expires_at", row.lease_expires_at)?,
            execution_deadline,
            priority: row.priority,
            tags,
        })
    }
}

pub(crate) fn into_records(rows: Vec<TaskRow>) -> Result<Vec<TaskRecord>, StoreError> {
    rows.into_iter().map(TaskRecord::try_from).collect()
}

/// `(state, total, retry-exhausted)` rows into counts.
pub(crate) fn fold_stats(rows: Vec<(String, i64, i64)>) -> Result<QueueStats, StoreError> {
    let mut stats = QueueStats::default();
    for (state, total, exhausted) in rows {
        let total = u64::try_from(total).unwrap_or(0);
        let state: TaskState = state
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?;
        stats.total += total;
        match state {
            TaskState::Pending => stats.pending += total,
            TaskState::Running => stats.running += total,
            TaskState::Completed => stats.completed += total,
            TaskState::Failed => {
                stats.failed += total;
                stats.failed_permanent += u64::try_from(exhausted).unwrap_or(0);
            }
        }
    }
    Ok(stats)
}

/// `error` column for a claimed row that no longer maps into a record.
pub(crate) fn undecodable_row_error(err: &StoreError) -> Result<String, StoreError> {
    let error = TaskError::new(
        ErrorCategory::InvalidParameters,
        format!("stored task could not be decoded: {err}"),
    )
    .with_context("corrupt_row", true);
    Ok(serde_json::to_string(&error)?)
}

/// `(lease_holder, running, earliest lease expiry)` rows into per-worker views.
pub(crate) fn fold_workers(rows: Vec<(String, i64, Option<i64>)>) -> Vec<WorkerStats> {
    rows.into_iter()
        .map(|(worker_id, running, earliest)| WorkerStats {
            worker_id,
            running: u64::try_from(running).unwrap_or(0),
            earliest_lease_expiry: earliest.and_then(time::from_millis),
        })
        .collect()
}
