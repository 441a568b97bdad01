//! アプリケーション層 - ports を組み合わせて submit・実行・worker loop を構成

pub mod builder;
pub mod submit;
pub mod supervisor;
pub mod worker;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::submit::{SubmitDefaults, Submitter};
pub use self::supervisor::Supervisor;
pub use self::worker::{Worker, WorkerConfig, WorkerHandle, WorkerSummary};
