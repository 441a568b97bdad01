use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spindle_core::app::App;
use spindle_core::config::Settings;
use spindle_core::ports::TaskStore;
use spindle_core::{AppBuilder, SubmitOptions, TaskFilter, TaskId, TaskState, store};
use tracing::info;

mod logging;
mod tasks;

#[derive(Parser)]
#[command(name = "spindle")]
#[command(version)]
#[command(about = "Durable database-backed task queue")]
#[command(long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(short, long, global = true, env = "SPINDLE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides `database.url`
    #[arg(short = 'd', long, global = true, value_name = "URL")]
    database_url: Option<String>,

    /// Overrides `logging.level`
    #[arg(short = 'v', long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the task table
    Init,

    /// Run a worker until Ctrl-C
    Worker {
        #[arg(long)]
        worker_id: Option<String>,

        #[arg(long)]
        concurrency: Option<usize>,

        /// Seconds between polls when idle
        #[arg(long)]
        poll_interval: Option<f64>,

        #[arg(long)]
        lease_seconds: Option<u64>,
    },

    /// Submit a task; prints its id
    Submit {
        name: String,

        /// Parameter as key=value; values parse as JSON, else as a string
        #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        args: Vec<(String, serde_json::Value)>,

        /// Seconds to wait before the task becomes eligible
        #[arg(long)]
        delay: Option<f64>,

        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,

        #[arg(long)]
        max_retries: Option<u32>,

        /// Execution deadline in seconds
        #[arg(long)]
        timeout: Option<f64>,

        #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        tags: Vec<(String, serde_json::Value)>,
    },

    /// Show one task
    Get { id: TaskId },

    /// List tasks, newest first
    List {
        #[arg(long)]
        state: Option<TaskState>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Task counts by state
    Stats,

    /// Running tasks per lease holder
    Workers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(url) = cli.database_url {
        settings.database.url = url;
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    logging::init(&settings.logging.level, settings.logging.json)?;

    match cli.command {
        Command::Init => {
            store::connect(&settings.database.url, settings.database.max_connections)
                .await
                .context("initialising store")?;
            println!("schema ready at {}", settings.database.url);
        }
        Command::Worker {
            worker_id,
            concurrency,
            poll_interval,
            lease_seconds,
        } => {
            if worker_id.is_some() {
                settings.worker.id = worker_id;
            }
            if let Some(concurrency) = concurrency {
                settings.worker.concurrency = concurrency;
            }
            if let Some(poll_interval) = poll_interval {
                settings.worker.poll_interval_seconds = poll_interval;
            }
            if let Some(lease_seconds) = lease_seconds {
                settings.worker.lease_seconds = lease_seconds;
            }
            run_worker(build_app(settings).await?).await?;
        }
        Command::Submit {
            name,
            args,
            delay,
            priority,
            max_retries,
            timeout,
            tags,
        } => {
            let mut options = SubmitOptions::new().priority(priority);
            if let Some(delay) = delay {
                options = options.delay(seconds("--delay", delay)?);
            }
            if let Some(max_retries) = max_retries {
                options = options.max_retries(max_retries);
            }
            if let Some(timeout) = timeout {
                options = options.timeout(seconds("--timeout", timeout)?);
            }
            for (key, value) in tags {
                options = options.tag(key, value);
            }
            let parameters = serde_json::Value::Object(args.into_iter().collect());

            let app = build_app(settings).await?;
            let id = app.submitter().submit(&name, parameters, options).await?;
            println!("{id}");
        }
        Command::Get { id } => {
            let store = open_store(&settings).await?;
            match store.get(id).await? {
                Some(record) => print_json(&record)?,
                None => bail!("no task {id}"),
            }
        }
        Command::List {
            state,
            name,
            limit,
            offset,
        } => {
            let store = open_store(&settings).await?;
            let filter = TaskFilter {
                state,
                name,
                limit,
                offset,
            };
            print_json(&store.list(&filter).await?)?;
        }
        Command::Stats => {
            let store = open_store(&settings).await?;
            print_json(&store.stats().await?)?;
        }
        Command::Workers => {
            let store = open_store(&settings).await?;
            print_json(&store.workers().await?)?;
        }
    }
    Ok(())
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn TaskStore>> {
    store::connect(&settings.database.url, settings.database.max_connections)
        .await
        .with_context(|| format!("connecting to {}", settings.database.url))
}

async fn build_app(settings: Settings) -> anyhow::Result<App> {
    let store = open_store(&settings).await?;
    let app = tasks::register(AppBuilder::new())?
        .expect_tasks(tasks::BUILTIN)
        .store(store)
        .settings(settings)
        .build()?;
    Ok(app)
}

async fn run_worker(app: App) -> anyhow::Result<()> {
    let worker = app.worker();
    let worker_id = worker.config().worker_id.clone();
    let handle = worker.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!(worker_id = %worker_id, "shutdown requested");

    let summary = handle.shutdown_and_join().await;
    info!(
        worker_id = %worker_id,
        claimed = summary.claimed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        lost = summary.lost,
        abandoned = summary.abandoned,
        "worker exited"
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn seconds(flag: &str, secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("{flag} must be a non-negative number of seconds"))
}

/// `key=value` を parse
/// - `value` はまず JSON として読み、だめなら文字列（`n=3` は数値、`to=alice` は文字列）
fn parse_key_value(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
