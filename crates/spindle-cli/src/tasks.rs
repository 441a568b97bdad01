//! 組み込みのデモ task
//!
//! 追加の登録なしで `spindle submit` と `spindle worker` を試せるようにする。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_core::app::AppBuilder;
use spindle_core::typed::{Handler, RegistryError, Task};
use spindle_core::TaskError;

/// 組み込み task の名前一覧
pub const BUILTIN: &[&str] = &[Echo::NAME, Add::NAME, Sleep::NAME, Fail::NAME];

#[derive(Debug, Serialize, Deserialize)]
pub struct Echo {
    pub message: String,
}

impl Task for Echo {
    const NAME: &'static str = "echo";
}

pub struct EchoHandler;

#[async_trait]
impl Handler<Echo> for EchoHandler {
    type Output = String;

    async fn handle(&self, task: Echo) -> Result<String, TaskError> {
        tracing::info!(text = %task.message, "echo");
        Ok(task.message)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Add {
    pub a: f64,
    pub b: f64,
}

impl Task for Add {
    const NAME: &'static str = "add";
}

pub struct AddHandler;

#[async_trait]
impl Handler<Add> for AddHandler {
    type Output = f64;

    async fn handle(&self, task: Add) -> Result<f64, TaskError> {
        Ok(task.a + task.b)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Sleep {
    pub seconds: f64,
}

impl Task for Sleep {
    const NAME: &'static str = "sleep";
    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(300));
}

pub struct SleepHandler;

#[async_trait]
impl Handler<Sleep> for SleepHandler {
    type Output = ();

    async fn handle(&self, task: Sleep) -> Result<(), TaskError> {
        let period = Duration::try_from_secs_f64(task.seconds).map_err(TaskError::execution)?;
        tokio::time::sleep(period).await;
        Ok(())
    }
}

/// 常に失敗する。retry と backoff の様子を見る用
#[derive(Debug, Serialize, Deserialize)]
pub struct Fail {
    #[serde(default = "Fail::default_message")]
    pub message: String,
}

impl Fail {
    fn default_message() -> String {
        "intentional failure".to_string()
    }
}

impl Task for Fail {
    const NAME: &'static str = "fail";
    const MAX_RETRIES: Option<u32> = Some(2);
}

pub struct FailHandler;

#[async_trait]
impl Handler<Fail> for FailHandler {
    type Output = ();

    async fn handle(&self, task: Fail) -> Result<(), TaskError> {
        Err(TaskError::execution(task.message))
    }
}

pub fn register(builder: AppBuilder) -> Result<AppBuilder, RegistryError> {
    builder
        .register::<Echo, _>(EchoHandler)?
        .register::<Add, _>(AddHandler)?
        .register::<Sleep, _>(SleepHandler)?
        .register::<Fail, _>(FailHandler)
}
