//! Settings: built-in defaults < TOML file < `SPINDLE__*` environment.
//!
//! ```toml
//! [database]
//! url = "sqlite://spindle.db"
//!
//! [worker]
//! concurrency = 4
//! lease_seconds = 300
//! ```
//!
//! The same keys come from the environment with `__` between sections, e.g.
//! `SPINDLE__WORKER__CONCURRENCY=4`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::app::{SubmitDefaults, WorkerConfig};
use crate::retry::RetryPolicy;

const ENV_PREFIX: &str = "SPINDLE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub retry: RetrySettings,
    pub worker: WorkerSettings,
    pub task: TaskSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://spindle.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_seconds: f64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_seconds: 5.0,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Generated per process when unset.
    pub id: Option<String>,
    pub concurrency: usize,
    pub poll_interval_seconds: f64,
    pub lease_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub store_backoff_max_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            id: None,
            concurrency: 1,
            poll_interval_seconds: 1.0,
            lease_seconds: 600,
            shutdown_grace_seconds: 30,
            store_backoff_max_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Unbounded when unset.
    pub default_timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let settings: Settings = builder
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overlaid with `toml` only; the environment is ignored.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(invalid("worker.concurrency", "must be at least 1"));
        }
        if !positive(self.worker.poll_interval_seconds) {
            return Err(invalid("worker.poll_interval_seconds", "must be positive"));
        }
        if self.worker.lease_seconds == 0 {
            return Err(invalid("worker.lease_seconds", "must be positive"));
        }
        if !(self.retry.backoff_multiplier.is_finite() && self.retry.backoff_multiplier >= 1.0) {
            return Err(invalid("retry.backoff_multiplier", "must be at least 1.0"));
        }
        if !(self.retry.base_delay_seconds.is_finite() && self.retry.base_delay_seconds >= 0.0) {
            return Err(invalid("retry.base_delay_seconds", "must not be negative"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be at least 1"));
        }
        if self.task.default_timeout_seconds.is_some_and(|t| !positive(t)) {
            return Err(invalid("task.default_timeout_seconds", "must be positive"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            seconds(self.retry.base_delay_seconds),
            self.retry.backoff_multiplier,
        )
    }

    pub fn submit_defaults(&self) -> SubmitDefaults {
        SubmitDefaults {
            max_retries: self.retry.max_retries,
            timeout: self.task.default_timeout_seconds.map(seconds),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            worker_id: self.worker.id.clone().unwrap_or_else(generate_worker_id),
            concurrency: self.worker.concurrency,
            poll_interval: seconds(self.worker.poll_interval_seconds),
            lease_duration: Duration::from_secs(self.worker.lease_seconds),
            shutdown_grace: Duration::from_secs(self.worker.shutdown_grace_seconds),
            store_backoff_max: Duration::from_secs(self.worker.store_backoff_max_seconds),
            retry: self.retry_policy(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn positive(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// `<host>-<ulid>`, unique per process.
pub fn generate_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "worker".to_string());
    format!("{host}-{}", Ulid::new().to_string().to_lowercase())
}
