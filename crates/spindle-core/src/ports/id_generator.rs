//! IdGenerator port - ID 生成の抽象化

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;
}

/// ULID ベースの IdGenerator
///
/// # ULID の特性
/// - timestamp 部分は注入された clock から取る
/// - [`ManualClock`](crate::ports::ManualClock) 下でも投入順にソート可能
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn task_id(&self) -> TaskId {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        TaskId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
