//! TaskRecord - 1 件の task の唯一の正

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::spec::NewTask;
use super::{Lease, TaskError, TaskId, TaskState, time};
use crate::retry::FailureDecision;

/// submit 時に付ける任意の metadata
pub type Tags = BTreeMap<String, serde_json::Value>;

/// task table の 1 行
///
/// # 不変条件（[`TaskRecord::invariants_hold`] で確認）
/// - `lease_holder` と `lease_expires_at` は `state == Running` のときだけ両方セット
/// - `retry_count <= max_retries`
/// - `next_retry_at` は `state == Failed && retry_count < max_retries` のときだけセット
///
/// 下の遷移メソッドは in-memory store が使う。SQL store は同じ遷移を guard 付きの 1 文で表す。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    /// store が採番する投入順。priority が同じときの claim の tie-break
    pub seq: i64,

    /// resolver のキー
    pub name: String,
    pub parameters: serde_json::Value,
    pub state: TaskState,

    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,

    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,

    pub lease_holder: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// `None` は無制限
    pub execution_deadline: Option<Duration>,

    /// 大きいほど先に実行
    pub priority: i64,
    pub tags: Tags,
}

impl TaskRecord {
    /// 新しい `Pending` record。`seq` は insert 時に store が採番
    pub fn pending(id: TaskId, spec: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            seq: 0,
            name: spec.name,
            parameters: spec.parameters,
            state: TaskState::Pending,
            scheduled_at: time::offset(now, spec.delay),
            created_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: spec.max_retries,
            next_retry_at: None,
            lease_holder: None,
            lease_expires_at: None,
            execution_deadline: spec.execution_deadline,
            priority: spec.priority,
            tags: spec.tags,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    /// Failed（retry 待ち・確定失敗の両方）
    pub fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// operator が手を入れない限りこれ以上遷移しない
    pub fn is_terminal(&self) -> bool {
        match self.state {
            TaskState::Completed => true,
            TaskState::Failed => self.retry_count >= self.max_retries,
            TaskState::Pending | TaskState::Running => false,
        }
    }

    /// `now` の時点で `claim_next` が選べるか
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        let lease_free = self.lease_expires_at.is_none_or(|expires| expires < now);
        let due = match self.state {
            TaskState::Pending => self.scheduled_at <= now,
            TaskState::Failed => self.next_retry_at.is_some_and(|at| at <= now),
            TaskState::Running => self.lease_expires_at.is_some_and(|expires| expires < now),
            TaskState::Completed => false,
        };
        due && lease_free
    }

    /// running なら現在の lease
    pub fn lease(&self) -> Option<Lease> {
        match (&self.lease_holder, self.lease_expires_at) {
            (Some(holder), Some(expires_at)) if self.state == TaskState::Running => Some(Lease {
                task_id: self.id,
                holder: holder.clone(),
                expires_at,
            }),
            _ => None,
        }
    }

    /// `lease` が現在の lease と一致するか
    pub fn holds(&self, lease: &Lease) -> bool {
        self.state == TaskState::Running
            && self.id == lease.task_id
            && self.lease_holder.as_deref() == Some(lease.holder.as_str())
            && self.lease_expires_at == Some(lease.expires_at)
    }

    /// Pending/Failed/stale-Running -> Running.
    pub fn claim(&mut self, holder: &str, now: DateTime<Utc>, lease_duration: Duration) -> Lease {
        let lease = Lease::grant(self.id, holder, now, lease_duration);
        self.state = TaskState::Running;
        self.lease_holder = Some(lease.holder.clone());
        self.lease_expires_at = Some(lease.expires_at);
        self.started_at = Some(now);
        self.next_retry_at = None;
        lease
    }

    /// Running -> Completed.
    pub fn complete(&mut self, result: Option<serde_json::Value>, now: DateTime<Utc>) {
        self.state = TaskState::Completed;
        self.result = result;
        self.error = None;
        self.completed_at = Some(now);
        self.next_retry_at = None;
        self.clear_lease();
    }

    /// Running -> Failed, either scheduled for retry or terminal.
    pub fn apply_failure(&mut self, error: TaskError, decision: &FailureDecision, now: DateTime<Utc>) {
        self.state = TaskState::Failed;
        self.error = Some(error);
        self.clear_lease();
        match *decision {
            FailureDecision::Retry {
                retry_count,
                next_retry_at,
            } => {
                self.retry_count = retry_count;
                self.next_retry_at = Some(next_retry_at);
            }
            FailureDecision::Terminal { retry_count } => {
                self.retry_count = retry_count;
                self.next_retry_at = None;
                self.completed_at = Some(now);
            }
        }
    }

    fn clear_lease(&mut self) {
        self.lease_holder = None;
        self.lease_expires_at = None;
    }

    /// データモデルの不変条件（テストと debug assert 用）
    pub fn invariants_hold(&self) -> bool {
        let running = self.state == TaskState::Running;
        let lease_consistent = self.lease_holder.is_some() == self.lease_expires_at.is_some()
            && self.lease_holder.is_some() == running;
        let retry_bounded = self.retry_count <= self.max_retries;
        let awaiting_retry =
            self.state == TaskState::Failed && self.retry_count < self.max_retries;
        let next_retry_consistent = self.next_retry_at.is_some() == awaiting_retry;

        lease_consistent && retry_bounded && next_retry_consistent
    }
}
