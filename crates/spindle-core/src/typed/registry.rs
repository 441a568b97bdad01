//! TaskRegistry - Handler の登録と管理

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::error::ValidationError;
use crate::ports::{Resolver, Validator};

/// TaskRegistry は型付き Handler を [`Task::NAME`] をキーに管理
///
/// # 使用例
///
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<SendEmail, _>(SendEmailHandler)?;
/// let handler = registry.get("send_email");
/// ```
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a handler for task '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = T::NAME.to_string();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.handlers
            .insert(name, Arc::new(TypedHandler::<T, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    /// ソート済み
    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.registered_types())
            .finish()
    }
}

impl Resolver for TaskRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.get(name)
    }
}

impl Validator for TaskRegistry {
    fn validate(
        &self,
        name: &str,
        raw: &serde_json::Value,
    ) -> Result<serde_json::Value, ValidationError> {
        match self.handlers.get(name) {
            Some(handler) => handler.validate(raw),
            None => Err(ValidationError::single(
                "<name>",
                format!("no task registered under '{name}'"),
            )),
        }
    }
}
