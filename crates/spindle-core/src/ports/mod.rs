//! Ports - エンジンと外部コラボレータの境界（trait）

pub mod clock;
pub mod id_generator;
pub mod resolver;
pub mod task_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::resolver::{Resolver, Validator};
pub use self::task_store::TaskStore;
