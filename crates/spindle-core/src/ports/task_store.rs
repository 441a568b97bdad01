//! TaskStore port - 永続 task table 上の queue repository
//!
//! worker 間の協調はすべてこの trait を通る。
//! 実装は `claim_next` を分割不能な read-modify-write にすること（同時に呼んだ 2 者が同じ record を受け取らない）。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Lease, QueueStats, TaskError, TaskFilter, TaskId, TaskRecord, WorkerStats};
use crate::error::StoreError;
use crate::retry::{FailureDecision, RetryPolicy};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 新しい `Pending` record を保存。投入順（seq）は store が採番する
    async fn insert(&self, record: TaskRecord) -> Result<TaskId, StoreError>;

    /// priority が最も高く、投入が最も早い eligible な record を atomic に選び、
    /// `worker_id` の lease 付きで `Running` にする
    ///
    /// # Eligible
    /// - `Pending` かつ `scheduled_at <= now`
    /// - `Failed` かつ `next_retry_at <= now`
    /// - `Running` かつ lease 切れ
    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Running -> Completed
    /// - `lease` がもう現在の lease でなければ何も書かずに `false`
    async fn complete(
        &self,
        lease: &Lease,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Running -> Failed
    /// - `policy` に従って retry を予約するか terminal にする
    /// - lease を失っていたら `None`
    async fn fail(
        &self,
        lease: &Lease,
        error: &TaskError,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureDecision>, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// 新しい順
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;

    async fn stats(&self) -> Result<QueueStats, StoreError>;

    /// Running の record を lease holder ごとに集計
    async fn workers(&self) -> Result<Vec<WorkerStats>, StoreError>;
}
