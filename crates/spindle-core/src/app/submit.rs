//! Submission API と読み取り系クエリ

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{
    NewTask, QueueStats, SubmitOptions, TaskFilter, TaskId, TaskRecord, WorkerStats,
};
use crate::error::{StoreError, SubmitError, ValidationError};
use crate::ports::{Clock, IdGenerator, Resolver, TaskStore, UlidGenerator, Validator};
use crate::typed::Task;

/// submit でも task 型でも指定されなかった値のプロセス全体のフォールバック
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitDefaults {
    pub max_retries: u32,

    /// `None` は無制限
    pub timeout: Option<Duration>,
}

impl Default for SubmitDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: None,
        }
    }
}

#[derive(Clone)]
pub struct Submitter {
    store: Arc<dyn TaskStore>,
    resolver: Arc<dyn Resolver>,
    validator: Arc<dyn Validator>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    defaults: SubmitDefaults,
}

impl Submitter {
    pub fn new(
        store: Arc<dyn TaskStore>,
        resolver: Arc<dyn Resolver>,
        validator: Arc<dyn Validator>,
        clock: Arc<dyn Clock>,
        defaults: SubmitDefaults,
    ) -> Self {
        Self {
            store,
            resolver,
            validator,
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            defaults,
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// 検証して新しい `Pending` task を保存
    ///
    /// # 拒否（何も書き込まない）
    /// - 未知の task 名
    /// - 不正な parameters
    /// - 0 秒の実行 deadline
    ///
    /// # 解決順
    /// `max_retries` と実行 deadline は submit の指定 → task 型のデフォルト → プロセスのデフォルト
    pub async fn submit(
        &self,
        name: &str,
        parameters: serde_json::Value,
        options: SubmitOptions,
    ) -> Result<TaskId, SubmitError> {
        let Some(handler) = self.resolver.resolve(name) else {
            warn!(name, "rejected submission of unknown task");
            return Err(SubmitError::UnknownTask(name.to_string()));
        };
        let parameters = self.validator.validate(name, &parameters).map_err(|err| {
            warn!(name, error = %err, "rejected submission with invalid parameters");
            err
        })?;

        let type_defaults = handler.defaults();
        let execution_deadline = options
            .timeout
            .or(type_defaults.timeout)
            .or(self.defaults.timeout);
        if execution_deadline.is_some_and(|deadline| deadline.is_zero()) {
            warn!(name, "rejected submission with a zero execution deadline");
            return Err(ValidationError::single("timeout", "must be positive").into());
        }

        let spec = NewTask {
            name: name.to_string(),
            parameters,
            delay: options.delay,
            priority: options.priority,
            tags: options.tags,
            max_retries: options
                .max_retries
                .or(type_defaults.max_retries)
                .unwrap_or(self.defaults.max_retries),
            execution_deadline,
        };

        let record = TaskRecord::pending(self.ids.task_id(), spec, self.clock.now());
        let scheduled_at = record.scheduled_at;
        let priority = record.priority;
        let id = self.store.insert(record).await?;
        info!(task_id = %id, name, priority, %scheduled_at, "task submitted");
        Ok(id)
    }

    pub async fn submit_typed<T: Task>(
        &self,
        task: &T,
        options: SubmitOptions,
    ) -> Result<TaskId, SubmitError> {
        let parameters = serde_json::to_value(task)?;
        self.submit(T::NAME, parameters, options).await
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.store.get(id).await
    }

    /// 新しい順
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        self.store.list(filter).await
    }

    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.store.stats().await
    }

    pub async fn workers(&self) -> Result<Vec<WorkerStats>, StoreError> {
        self.store.workers().await
    }
}
