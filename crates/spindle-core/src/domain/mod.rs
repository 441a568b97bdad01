//! ドメインモデル（ids, task record, lease, outcome, submit spec）

pub mod ids;
pub mod lease;
pub mod outcome;
pub mod spec;
pub mod state;
pub mod stats;
pub mod task;
pub mod time;

pub use ids::{ParseTaskIdError, TaskId};
pub use lease::Lease;
pub use outcome::{ErrorCategory, Outcome, TaskError};
pub use spec::{NewTask, SubmitOptions};
pub use state::{ParseStateError, TaskState};
pub use stats::{QueueStats, TaskFilter, WorkerStats};
pub use task::{Tags, TaskRecord};
