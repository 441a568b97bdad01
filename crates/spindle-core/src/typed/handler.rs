//! Handler - task の実行側
//!
//! # 構成
//! - `Handler<T>`: task 作者が実装する型付きの trait
//! - `DynHandler`: registry が保持する object-safe な形
//! - `TypedHandler<T, H>`: 入口で JSON から decode、出口で結果を encode して型を消去

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;

use super::task::{Task, TaskDefaults};
use crate::domain::{ErrorCategory, TaskError};
use crate::error::{FieldError, ValidationError};

#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    type Output: Serialize + Send;

    async fn handle(&self, task: T) -> Result<Self::Output, TaskError>;
}

#[async_trait]
pub trait DynHandler: Send + Sync {
    fn name(&self) -> &str;

    fn defaults(&self) -> TaskDefaults;

    /// `raw` を task 型に decode して再 encode（正規化）
    fn validate(&self, raw: &serde_json::Value) -> Result<serde_json::Value, ValidationError>;

    /// task 本体を実行。`null` の結果は `None` として返す
    async fn call(&self, parameters: serde_json::Value)
    -> Result<Option<serde_json::Value>, TaskError>;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    fn name(&self) -> &str {
        T::NAME
    }

    fn defaults(&self) -> TaskDefaults {
        TaskDefaults::of::<T>()
    }

    fn validate(&self, raw: &serde_json::Value) -> Result<serde_json::Value, ValidationError> {
        let task: T = serde_json::from_value(raw.clone()).map_err(|e| to_validation_error(&e))?;
        serde_json::to_value(&task).map_err(|e| ValidationError::single("<root>", e.to_string()))
    }

    async fn call(
        &self,
        parameters: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, TaskError> {
        let task: T = serde_json::from_value(parameters).map_err(|e| {
            TaskError::new(ErrorCategory::InvalidParameters, format!("json decode: {e}"))
        })?;
        let output = self.handler.handle(task).await?;
        let value = serde_json::to_value(output)
            .map_err(|e| TaskError::execution(format!("json encode result: {e}")))?;
        Ok((!value.is_null()).then_some(value))
    }
}

/// serde_json はエラーを 1 件ずつ返す
/// - missing/unknown field のときは field 名が backtick で囲まれている
fn to_validation_error(err: &serde_json::Error) -> ValidationError {
    let message = err.to_string();
    let field = message
        .split('`')
        .nth(1)
        .filter(|_| message.starts_with("missing field") || message.starts_with("unknown field"))
        .unwrap_or("<root>")
        .to_string();
    ValidationError::new(vec![FieldError {
        field,
        reason: message,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::task::fixtures::{Add, SendEmail};
    use serde_json::json;

    struct AddHandler;

    #[async_trait]
    impl Handler<Add> for AddHandler {
        type Output = i64;

        async fn handle(&self, task: Add) -> Result<i64, TaskError> {
            Ok(task.a + task.b)
        }
    }

    struct SilentEmail;

    #[async_trait]
    impl Handler<SendEmail> for SilentEmail {
        type Output = ();

        async fn handle(&self, _task: SendEmail) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn typed_handler_decodes_and_encodes() {
        let handler = TypedHandler::<Add, _>::new(AddHandler);
        let out = handler.call(json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out, Some(json!(5)));
        assert_eq!(handler.name(), "add");
    }

    #[tokio::test]
    async fn unit_result_is_absent() {
        let handler = TypedHandler::<SendEmail, _>::new(SilentEmail);
        let out = handler.call(json!({"to": "a@b.c"})).await.unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn undecodable_parameters_are_categorized() {
        let handler = TypedHandler::<Add, _>::new(AddHandler);
        let err = handler.call(json!({"a": "two"})).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::InvalidParameters);
    }

    #[test]
    fn validate_normalizes_defaults() {
        let handler = TypedHandler::<SendEmail, _>::new(SilentEmail);
        let normalized = handler.validate(&json!({"to": "a@b.c"})).unwrap();
        assert_eq!(normalized, json!({"to": "a@b.c", "subject": ""}));
    }

    #[test]
    fn validate_names_the_missing_field() {
        let handler = TypedHandler::<SendEmail, _>::new(SilentEmail);
        let err = handler.validate(&json!({"subject": "hi"})).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].field, "to");
    }

    #[test]
    fn defaults_come_from_the_task_type() {
        let handler = TypedHandler::<SendEmail, _>::new(SilentEmail);
        let defaults = handler.defaults();
        assert_eq!(defaults.max_retries, Some(5));
        assert_eq!(defaults.timeout, Some(std::time::Duration::from_secs(30)));
        assert_eq!(defaults.retry.base_delay, Some(std::time::Duration::from_secs(1)));
    }
}
