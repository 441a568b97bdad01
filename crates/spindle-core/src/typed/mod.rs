//! 型付き Task API
//!
//! - 表側: [`Task`] と [`Handler<T>`]（コンパイル時に型チェック）
//! - 内側: [`DynHandler`]（registry が保持する object-safe な形）

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::registry::{RegistryError, TaskRegistry};
pub use self::task::{Task, TaskDefaults};
