//! spindle-core
//!
//! Durable, database-backed task queue.
//!
//! producer が名前付き task を投入し、worker が lease 付きで claim して
//! deadline 内で実行する。失敗は exponential backoff で retry。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（task record, ids, lease, outcome）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, Resolver, Validator）
//! - **store**: TaskStore 実装（in-memory, SQLite, PostgreSQL）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TaskRegistry）
//! - **app**: アプリケーションロジック（submit, supervisor, worker loop, builder）
//! - **retry**: backoff policy
//! - **config**: settings の読み込み

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod retry;
pub mod store;
pub mod typed;

pub use app::{App, AppBuilder, Submitter, Supervisor, Worker, WorkerConfig, WorkerHandle};
pub use config::Settings;
pub use domain::{
    ErrorCategory, Outcome, SubmitOptions, TaskError, TaskFilter, TaskId, TaskRecord, TaskState,
};
pub use error::{StoreError, SubmitError, ValidationError};
pub use retry::RetryPolicy;
pub use typed::{Handler, Task, TaskRegistry};
