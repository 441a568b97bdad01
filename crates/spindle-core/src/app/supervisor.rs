//! Execution supervisor - claim 済みの task を 1 回実行して結果を分類
//!
//! supervisor は store に触らず、retry か terminal かも決めない。
//! task 本体の失敗（error, panic, deadline, decode できない parameters, handler なし）は
//! すべて別々の [`ErrorCategory`] を持つ [`Outcome::Failure`] になる。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::{ErrorCategory, Outcome, TaskError, TaskRecord};
use crate::ports::Resolver;
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct Supervisor {
    resolver: Arc<dyn Resolver>,
}

impl Supervisor {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    /// `record` を実行 deadline 付きで実行
    ///
    /// # 注意
    /// - 本体は専用の tokio task で動く（panic をここで止める）
    /// - timeout 時は abort するが、効くのは次の `.await` から
    /// - blocking code で止まっている本体は裏で動き続ける
    pub async fn execute(&self, record: &TaskRecord) -> Outcome {
        let Some(handler) = self.resolver.resolve(&record.name) else {
            return Outcome::failure(TaskError::not_found(&record.name));
        };

        let parameters = record.parameters.clone();
        let mut running = tokio::spawn(async move { handler.call(parameters).await });

        let joined = match record.execution_deadline {
            Some(deadline) => match tokio::time::timeout(deadline, &mut running).await {
                Ok(joined) => joined,
                Err(_) => {
                    running.abort();
                    warn!(task_id = %record.id, name = %record.name, ?deadline, "execution deadline exceeded");
                    return Outcome::failure(deadline_exceeded(deadline));
                }
            },
            None => running.await,
        };

        match joined {
            Ok(Ok(result)) => Outcome::success(result),
            Ok(Err(error)) => Outcome::failure(error),
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                Outcome::failure(TaskError::new(ErrorCategory::Panic, message))
            }
            Err(join_error) => Outcome::failure(TaskError::execution(format!(
                "task was cancelled: {join_error}"
            ))),
        }
    }

    /// プロセス全体の policy に `name` の型ごとの override を適用したもの
    pub fn retry_policy_for(&self, name: &str, base: &RetryPolicy) -> RetryPolicy {
        match self.resolver.resolve(name) {
            Some(handler) => base.with_overrides(&handler.defaults().retry),
            None => base.clone(),
        }
    }
}

fn deadline_exceeded(deadline: Duration) -> TaskError {
    TaskError::timeout(format!(
        "execution exceeded deadline of {:.3}s",
        deadline.as_secs_f64()
    ))
    .with_context("deadline_seconds", deadline.as_secs_f64())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskId};
    use crate::typed::{Handler, Task, TaskRegistry};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use ulid::Ulid;

    #[derive(Serialize, Deserialize)]
    struct Nap {
        millis: u64,
    }

    impl Task for Nap {
        const NAME: &'static str = "nap";
    }

    struct NapHandler;

    #[async_trait]
    impl Handler<Nap> for NapHandler {
        type Output = &'static str;

        async fn handle(&self, task: Nap) -> Result<&'static str, TaskError> {
            tokio::time::sleep(Duration::from_millis(task.millis)).await;
            Ok("rested")
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Explode {
        how: String,
    }

    impl Task for Explode {
        const NAME: &'static str = "explode";

        fn retry_overrides() -> crate::retry::RetryOverrides {
            crate::retry::RetryOverrides {
                base_delay: None,
                multiplier: Some(3.0),
            }
        }
    }

    struct ExplodeHandler;

    #[async_trait]
    impl Handler<Explode> for ExplodeHandler {
        type Output = ();

        async fn handle(&self, task: Explode) -> Result<(), TaskError> {
            match task.how.as_str() {
                "panic" => panic!("kaboom"),
                _ => Err(TaskError::execution("exploded").with_context("how", task.how)),
            }
        }
    }

    fn supervisor() -> Supervisor {
        let mut registry = TaskRegistry::new();
        registry.register::<Nap, _>(NapHandler).unwrap();
        registry.register::<Explode, _>(ExplodeHandler).unwrap();
        Supervisor::new(Arc::new(registry))
    }

    fn record(spec: NewTask) -> TaskRecord {
        TaskRecord::pending(TaskId::from_ulid(Ulid::new()), spec, Utc::now())
    }

    #[tokio::test]
    async fn normal_return_is_success() {
        let outcome = supervisor()
            .execute(&record(NewTask::new("nap", json!({"millis": 1}))))
            .await;
        assert_eq!(outcome, Outcome::Success(Some(json!("rested"))));
    }

    #[tokio::test]
    async fn raised_error_keeps_its_structure() {
        let outcome = supervisor()
            .execute(&record(NewTask::new("explode", json!({"how": "error"}))))
            .await;
        let error = outcome.error().unwrap();
        assert_eq!(error.category, ErrorCategory::Execution);
        assert_eq!(error.context["how"], json!("error"));
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let outcome = supervisor()
            .execute(&record(NewTask::new("explode", json!({"how": "panic"}))))
            .await;
        let error = outcome.error().unwrap();
        assert_eq!(error.category, ErrorCategory::Panic);
        assert!(error.message.contains("kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded_is_a_timeout() {
        let spec = NewTask::new("nap", json!({"millis": 60_000}))
            .with_execution_deadline(Duration::from_secs(1));
        let outcome = supervisor().execute(&record(spec)).await;
        let error = outcome.error().unwrap();
        assert_eq!(error.category, ErrorCategory::Timeout);
        assert_eq!(error.context["deadline_seconds"], json!(1.0));
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let outcome = supervisor()
            .execute(&record(NewTask::new("vanished", json!({}))))
            .await;
        assert_eq!(outcome.error().unwrap().category, ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn undecodable_parameters_are_reported() {
        let outcome = supervisor()
            .execute(&record(NewTask::new("nap", json!({"millis": "soon"}))))
            .await;
        assert_eq!(
            outcome.error().unwrap().category,
            ErrorCategory::InvalidParameters
        );
    }

    #[test]
    fn retry_policy_applies_type_overrides() {
        let base = RetryPolicy::default();
        let policy = supervisor().retry_policy_for("explode", &base);
        assert_eq!(policy.multiplier, 3.0);
        assert_eq!(policy.base_delay, base.base_delay);
        assert_eq!(supervisor().retry_policy_for("nap", &base), base);
    }
}
