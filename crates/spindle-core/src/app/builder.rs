//! AppBuilder - registry, store, clock, settings を組み立てて [`App`] を作る
//!
//! # Fail-fast
//! - `expect_tasks` でこのプロセスが実行できるべき task 型を宣言
//! - 1 つでも未登録なら `build()` は `App` を作らない

use std::sync::Arc;

use super::submit::Submitter;
use super::supervisor::Supervisor;
use super::worker::{Worker, WorkerConfig};
use crate::config::{ConfigError, Settings};
use crate::ports::{Clock, SystemClock, TaskStore};
use crate::typed::{Handler, RegistryError, Task, TaskRegistry};

/// ```ignore
/// let app = AppBuilder::new()
///     .register::<SendEmail, _>(SendEmailHandler)?
///     .expect_tasks(&["send_email"])
///     .store(Arc::new(store))
///     .build()?;
/// ```
pub struct AppBuilder {
    registry: TaskRegistry,
    expected_tasks: Option<Vec<String>>,
    store: Option<Arc<dyn TaskStore>>,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("no task store configured")]
    MissingStore,

    #[error(transparent)]
    Settings(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            expected_tasks: None,
            store: None,
            clock: Arc::new(SystemClock),
            settings: Settings::default(),
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected) = &self.expected_tasks {
            let registered = self.registry.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !registered.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }
        self.settings.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;

        Ok(App {
            registry: Arc::new(self.registry),
            store,
            clock: self.clock,
            settings: self.settings,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 組み立て済みのアプリケーション
/// - 各 accessor は `Arc` を clone するだけなので共有は安い
#[derive(Clone)]
pub struct App {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl App {
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn submitter(&self) -> Submitter {
        Submitter::new(
            Arc::clone(&self.store),
            self.registry.clone(),
            self.registry.clone(),
            Arc::clone(&self.clock),
            self.settings.submit_defaults(),
        )
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.registry.clone())
    }

    /// settings から設定した worker
    pub fn worker(&self) -> Worker {
        self.worker_with(self.settings.worker_config())
    }

    pub fn worker_with(&self, config: WorkerConfig) -> Worker {
        Worker::new(
            Arc::clone(&self.store),
            self.supervisor(),
            Arc::clone(&self.clock),
            config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskError;
    use crate::store::InMemoryTaskStore;
    use crate::typed::task::fixtures::{Add, SendEmail};
    use async_trait::async_trait;

    struct AddHandler;

    #[async_trait]
    impl Handler<Add> for AddHandler {
        type Output = i64;

        async fn handle(&self, task: Add) -> Result<i64, TaskError> {
            Ok(task.a + task.b)
        }
    }

    fn store() -> Arc<dyn TaskStore> {
        Arc::new(InMemoryTaskStore::new())
    }

    #[test]
    fn build_success() {
        let app = AppBuilder::new()
            .register::<Add, _>(AddHandler)
            .unwrap()
            .expect_tasks(&[Add::NAME])
            .store(store())
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn build_reports_missing_task_types() {
        let app = AppBuilder::new()
            .register::<Add, _>(AddHandler)
            .unwrap()
            .expect_tasks(&[Add::NAME, SendEmail::NAME])
            .store(store())
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec![SendEmail::NAME.to_string()]
        ));
    }

    #[test]
    fn build_requires_a_store() {
        let app = AppBuilder::new().register::<Add, _>(AddHandler).unwrap().build();
        assert!(matches!(app, Err(BuildError::MissingStore)));
    }

    #[test]
    fn build_rejects_invalid_settings() {
        let mut settings = Settings::default();
        settings.worker.concurrency = 0;
        let app = AppBuilder::new().store(store()).settings(settings).build();
        assert!(matches!(app, Err(BuildError::Settings(_))));
    }

    #[test]
    fn worker_uses_configured_id() {
        let mut settings = Settings::default();
        settings.worker.id = Some("w-7".into());
        let app = AppBuilder::new().store(store()).settings(settings).build().unwrap();
        assert_eq!(app.worker().config().worker_id, "w-7");
    }
}
