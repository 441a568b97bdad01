//! Task の状態遷移

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Task の状態
///
/// # 状態遷移
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed -> Running -> ...（retry 予算が残っている間）
/// - Running -> Running（lease 切れで別 worker が再 claim）
///
/// `Failed` が terminal になるのは `retry_count == max_retries` のときだけ。
/// [`TaskRecord::is_terminal`](crate::domain::TaskRecord::is_terminal) を参照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// 投入済み、`scheduled_at` 待ち
    Pending,

    /// lease を持つ worker が claim 済み
    Running,

    /// 正常終了
    Completed,

    /// 直近の試行が失敗（retry 待ちの場合あり）
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task state '{0}'")]
pub struct ParseStateError(pub String);

impl FromStr for TaskState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}
