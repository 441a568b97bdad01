//! Lease - running 中の task に対する期限付きの所有権
//!
//! バックグラウンドの sweeper はない。`expires_at < now` で lease は stale になり、
//! store の claim 条件が stale な `Running` record を再び eligible として扱う。
//!
//! # 注意
//! - lease の長さは task 型の最悪実行時間より長くすること
//! - 短すぎると、最初の worker がまだ実行中の task を別の worker が再 claim する

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use super::time;

/// claim の証明。`complete` / `fail` のときに store へ渡す
///
/// store は holder と expiry の両方が現在の lease と一致する報告だけを受け付ける。
/// lease を取り返された worker は新しい owner の状態を上書きできない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub task_id: TaskId,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn grant(
        task_id: TaskId,
        holder: impl Into<String>,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            task_id,
            holder: holder.into(),
            expires_at: time::offset(now, duration),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
