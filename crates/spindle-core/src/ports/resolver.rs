//! Resolver / Validator port - task 名から callable への解決と parameters 検証
//!
//! name -> callable の対応はグローバルではなく注入する。テストでは fake に差し替え可能。
//! [`TaskRegistry`](crate::typed::TaskRegistry) が両方を実装する。

use std::sync::Arc;

use crate::error::ValidationError;
use crate::typed::DynHandler;

pub trait Resolver: Send + Sync {
    /// `None` は `NotFound`。submit 時と実行時の両方で確認される
    fn resolve(&self, name: &str) -> Option<Arc<dyn DynHandler>>;
}

pub trait Validator: Send + Sync {
    /// raw parameters を検証し、正規化した値を返す
    fn validate(
        &self,
        name: &str,
        raw: &serde_json::Value,
    ) -> Result<serde_json::Value, ValidationError>;
}
