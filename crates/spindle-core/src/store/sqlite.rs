//! SQLite task store.
//!
//! `claim_next` is a single `UPDATE ... WHERE seq = (SELECT ...) RETURNING *`
//! statement. SQLite takes the write lock before evaluating the subquery, so
//! two connections can never select the same row; the loser waits on
//! `busy_timeout` and then sees the row already `running`.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, error, info};

use super::row::{
    InsertParams, TaskRow, encode_json, fold_stats, fold_workers, into_records,
    undecodable_row_error,
};
use crate::domain::{
    Lease, QueueStats, TaskError, TaskFilter, TaskId, TaskRecord, WorkerStats, time,
};
use crate::error::StoreError;
use crate::ports::TaskStore;
use crate::retry::{FailureDecision, RetryPolicy};

pub static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory DSNs only exist for the connection that opened them.
const SQLITE_MEMORY_PATTERNS: &[&str] = &[":memory:", "mode=memory"];

const CLAIM_SQL: &str = "
UPDATE tasks
SET state = 'running',
    lease_holder = ?2,
    lease_expires_at = ?3,
    started_at = ?1,
    next_retry_at = NULL
WHERE seq = (
    SELECT seq FROM tasks
    WHERE ((state = 'pending' AND scheduled_at <= ?1)
        OR (state = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1)
        OR (state = 'running' AND lease_expires_at < ?1))
      AND (lease_expires_at IS NULL OR lease_expires_at < ?1)
    ORDER BY priority DESC, seq ASC
    LIMIT 1
)
RETURNING *";

/// ?arks an undecodable claimed row as a permanent failure.
const QUARANTINE_SQL: &str = "
UPDATE tasks
SET state = 'failed',
    error = ?1,
    retry_count = max_retries,
    next_retry_at = NULL,
    completed_at = ?2,
    lease_holder = NULL,
    lease_expires_at = NULL
WHERE seq = ?3";

const COMPLETE_SQL: &str = "
UPDATE tasks
SET state = 'completed',
    result = ?1,
    error = NULL,
    completed_at = ?2,
    next_retry_at = NULL,
    lease_holder = NULL,
    lease_expires_at = NULL
WHERE id = ?3 AND state = 'running' AND lease_holder = ?4 AND lease_expires_at = ?5";

const LEASED_COUNTS_SQL: &str = "
SELECT retry_count, max_retries FROM tasks
WHERE id = ?1 AND state = 'running' AND lease_holder = ?2 AND lease_expires_at = ?3";

const FAIL_SQL: &str = "
UPDATE tasks
SET state = 'failed',
    error = ?1,
    retry_count = ?2,
    next_retry_at = ?3,
    completed_at = ?4,
    lease_holder = NULL,
    lease_expires_at = NULL
WHERE id = ?5 AND state = 'running' AND lease_holder = ?6 AND lease_expires_at = ?7
  AND retry_count = ?8";

const STATS_SQL: &str = "
SELECT state,
       COUNT(*) AS total,
       SUM(CASE WHEN retry_count >= max_retries THEN 1 ELSE 0 END) AS exhausted
FROM tasks
GROUP BY state";

const WORKERS_SQL: &str = "
SELECT lease_holder, COUNT(*) AS running, MIN(lease_expires_at) AS earliest
FROM tasks
WHERE state = 'running' AND lease_holder IS NOT NULL
GROUP BY lease_holder
ORDER BY lease_holder";

#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Connect to `url` (e.g. `sqlite://spindle.db`), creating the file if
    /// missing. Does not run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?;
        let in_memory = SQLITE_MEMORY_PATTERNS
            .iter()
            .any(|pattern| url.to_ascii_lowercase().contains(pattern));
        Self::with_options(options, max_connections, in_memory).await
    }

    pub async fn open_file(path: impl AsRef<Path>, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().filename(path.as_ref());
        Self::with_options(options, max_connections, false).await
    }

    async fn with_options(
        options: SqliteConnectOptions,
        max_connections: u32,
        in_memory: bool,
    ) -> Result<Self, StoreError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let mut pool_options = SqlitePoolOptions::new();
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        SQLITE_MIGRATOR.run(&self.pool).await?;
        info!("sqlite schema up to date");
        Ok(())
    }

    /// Mark a claimed row that cannot be decoded as permanently failed.
    async fn quarantine(
        &self,
        seq: i64,
        raw_id: &str,
        err: &StoreError,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        error!(seq, task_id = raw_id, error = %err, "claimed row could not be decoded, marking it failed");
        sqlx::query(QUARANTINE_SQL)
            .bind(undecodable_row_error(err)?)
            .bind(time::to_millis(now))
            .bind(seq)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<TaskId, StoreError> {
        let params = InsertParams::from_record(&record)?;
        sqlx::query(
            "INSERT INTO tasks (id, name, parameters, state, scheduled_at, created_at, \
             retry_count, max_retries, execution_deadline_ms, priority, tags) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, 0, ?6, ?7, ?8, ?9)",
        )
        .bind(&params.id)
        .bind(&params.name)
        .bind(&params.parameters)
        .bind(params.scheduled_at)
        .bind(params.created_at)
        .bind(params.max_retries)
        .bind(params.execution_deadline_ms)
        .bind(params.priority)
        .bind(&params.tags)
        .execute(&self.pool)
        .await?;
        Ok(record.id)
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let lease_expires_at = time::offset(now, lease_duration);
        loop {
            let row: Option<TaskRow> = sqlx::query_as(CLAIM_SQL)
                .bind(time::to_millis(now))
                .bind(worker_id)
                .bind(time::to_millis(lease_expires_at))
                .fetch_optional(&self.pool)
                .await?;

            let Some(row) = row else {
                return Ok(None);
            };
            let seq = row.seq;
            let raw_id = row.id.clone();
            match TaskRecord::try_from(row) {
                Ok(record) => {
                    debug!(task_id = %record.id, worker_id, "sqlite claim");
                    return Ok(Some(record));
                }
                // Each pass parks one row, so the loop ends.
                Err(err) => self.quarantine(seq, &raw_id, &err, now).await?,
            }
        }
    }

    async fn complete(
        &self,
        lease: &Lease,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let done = sqlx::query(COMPLETE_SQL)
            .bind(encode_json(result.as_ref())?)
            .bind(time::to_millis(now))
            .bind(lease.task_id.to_storage())
            .bind(&lease.holder)
            .bind(time::to_millis(lease.expires_at))
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn fail(
        &self,
        lease: &Lease,
        error: &TaskError,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureDecision>, StoreError> {
        let id = lease.task_id.to_storage();
        let expires_at = time::to_millis(lease.expires_at);

        let counts: Option<(i64, i64)> = sqlx::query_as(LEASED_COUNTS_SQL)
            .bind(&id)
            .bind(&lease.holder)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await?;
        let Some((retry_count, max_retries)) = counts else {
            return Ok(None);
        };

        let decision = policy.decide(
            u32::try_from(retry_count).unwrap_or(u32::MAX),
            u32::try_from(max_retries).unwrap_or(0),
            now,
        );
        let (next_retry_at, completed_at) = match decision {
            FailureDecision::Retry { next_retry_at, .. } => (Some(time::to_millis(next_retry_at)), None),
            FailureDecision::Terminal { .. } => (None, Some(time::to_millis(now))),
        };

        let done = sqlx::query(FAIL_SQL)
            .bind(serde_json::to_string(error)?)
            .bind(i64::from(decision.retry_count()))
            .bind(next_retry_at)
            .bind(completed_at)
            .bind(&id)
            .bind(&lease.holder)
            .bind(expires_at)
            .bind(retry_count)
            .execute(&self.pool)
            .await?;
        Ok((done.rows_affected() == 1).then_some(decision))
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?1")
            .bind(id.to_storage())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRecord::try_from).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM tasks WHERE 1 = 1");
        if let Some(state) = filter.state {
            query.push(" AND state = ").push_bind(state.as_str());
        }
        if let Some(name) = &filter.name {
            query.push(" AND name = ").push_bind(name.as_str());
        }
        query
            .push(" ORDER BY seq DESC LIMIT ")
            .push_bind(i64::try_from(filter.limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset).unwrap_or(i64::MAX));

        let rows: Vec<TaskRow> = query.build_query_as().fetch_all(&self.pool).await?;
        into_records(rows)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(STATS_SQL).fetch_all(&self.pool).await?;
        fold_stats(rows)
    }

    async fn workers(&self) -> Result<Vec<WorkerStats>, StoreError> {
        let rows: Vec<(String, i64, Option<i64>)> =
            sqlx::query_as(WORKERS_SQL).fetch_all(&self.pool).await?;
        Ok(fold_workers(rows))
    }
}
