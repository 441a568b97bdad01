//! Task trait - task 名と parameters 型の対応付け

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::retry::RetryOverrides;

/// 型付きの仕事の単位。実装する型そのものが parameters の payload
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail { to: String, subject: String }
///
/// impl Task for SendEmail {
///     const NAME: &'static str = "send_email";
///     const MAX_RETRIES: Option<u32> = Some(5);
/// }
/// ```
///
/// # デフォルト値
/// - 関連定数は task 型ごとのデフォルト
/// - submit 時の指定が優先、未設定ならプロセス全体の settings にフォールバック
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task record に保存される resolver のキー
    const NAME: &'static str;

    const MAX_RETRIES: Option<u32> = None;

    /// 実行 deadline。`None` ならプロセスのデフォルトを継承
    const TIMEOUT: Option<Duration> = None;

    fn retry_overrides() -> RetryOverrides {
        RetryOverrides::default()
    }
}

/// 型消去された handler から見た task 型ごとのデフォルト
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDefaults {
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub retry: RetryOverrides,
}

impl TaskDefaults {
    pub fn of<T: Task>() -> Self {
        Self {
            max_retries: T::MAX_RETRIES,
            timeout: T::TIMEOUT,
            retry: T::retry_overrides(),
        }
    }
}
