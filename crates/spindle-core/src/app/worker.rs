//! Worker loop - claim → dispatch → report
//!
//! # フロー
//! 1. `TaskStore::claim_next()` で lease 付きの record を取得
//! 2. [`JoinSet`] 上で Supervisor に実行させる（最大 `concurrency` 件）
//! 3. 各実行は claim したときの lease で結果を store に報告
//!
//! 共有状態は store だけ。何プロセスの worker が同じ table を見ていてもよい。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::supervisor::Supervisor;
use crate::domain::{Lease, Outcome, TaskRecord};
use crate::ports::{Clock, TaskStore};
use crate::retry::{FailureDecision, RetryPolicy};

/// store が一時的に使えないときの、1 実行あたりの報告試行回数
const FINALIZE_ATTEMPTS: u32 = 5;
const FINALIZE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// claim した record に書く lease holder
    pub worker_id: String,

    /// 同時実行数の上限
    pub concurrency: usize,

    /// eligible な task がないときの poll 間隔
    pub poll_interval: Duration,

    /// この worker が実行する全 task 型の最悪実行時間より長くすること
    /// - lease は延長されない
    pub lease_duration: Duration,

    /// shutdown 時に実行中の task を abort するまで待つ時間
    pub shutdown_grace: Duration,

    /// store の連続失敗後の backoff の上限
    pub store_backoff_max: Duration,

    /// プロセス全体の retry policy（task 型が一部を override できる）
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker".to_string(),
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            lease_duration: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(30),
            store_backoff_max: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// What one worker run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub claimed: u64,
    pub succeeded: u64,

    /// Failures recorded, whether a retry was scheduled or not.
    pub failed: u64,

    /// Reports rejected because the lease had been reclaimed.
    pub lost: u64,

    /// 結果が store に届かなかった実行
    /// - shutdown の猶予切れで abort された
    /// - store が失敗し続けた
    pub abandoned: u64,
}

impl WorkerSummary {
    fn record(&mut self, finished: Result<Finished, JoinError>) {
        match finished {
            Ok(Finished::Succeeded) => self.succeeded += 1,
            Ok(Finished::Failed) => self.failed += 1,
            Ok(Finished::LeaseLost) => self.lost += 1,
            Ok(Finished::Unreported) | Err(_) => self.abandoned += 1,
        }
    }
}

/// What the store accepted for one report.
enum Recorded {
    Completed,
    Failed(FailureDecision),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    Succeeded,
    Failed,
    LeaseLost,
    Unreported,
}

pub struct Worker {
    config: WorkerConfig,
    reporter: Reporter,
}

/// 1 回の実行に必要なもの一式。dispatch ごとに clone する
#[derive(Clone)]
struct Reporter {
    store: Arc<dyn TaskStore>,
    supervisor: Supervisor,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

/// Worker handle.
/// - `request_shutdown()` で新しい claim を止める（実行中のものは drain）
/// - handle を drop しても shutdown 要求と同じ
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<WorkerSummary>,
}

impl WorkerHandle {
    pub fn request_shutdown(&self) {
        // loop が終わっていれば receiver はもういない
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the loop to exit on its own.
    pub async fn join(self) -> WorkerSummary {
        match self.join.await {
            Ok(summary) => summary,
            Err(err) => {
                error!(error = %err, "worker loop did not finish cleanly");
                WorkerSummary::default()
            }
        }
    }

    pub async fn shutdown_and_join(self) -> WorkerSummary {
        self.request_shutdown();
        self.join().await
    }
}

impl Worker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        supervisor: Supervisor,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        let reporter = Reporter {
            store,
            supervisor,
            clock,
            retry: config.retry.clone(),
        };
        Self { config, reporter }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the loop on a background tokio task.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle { shutdown_tx, join }
    }

    /// `shutdown` が `true` になる（または sender が drop される）まで poll し、
    /// その後は猶予時間まで実行中の task を drain する
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> WorkerSummary {
        let worker_id = self.config.worker_id.as_str();
        let concurrency = self.config.concurrency.max(1);
        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        let mut summary = WorkerSummary::default();
        let mut store_failures: u32 = 0;

        info!(worker_id, concurrency, "worker started");

        loop {
            while let Some(finished) = in_flight.try_join_next() {
                summary.record(finished);
            }
            if stop_requested(&shutdown) {
                break;
            }

            if in_flight.len() >= concurrency {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    Some(finished) = in_flight.join_next() => summary.record(finished),
                }
                continue;
            }

            let claimed = self
                .reporter
                .store
                .claim_next(self.reporter.clock.now(), worker_id, self.config.lease_duration)
                .await;

            match claimed {
                Ok(Some(record)) => {
                    store_failures = 0;
                    summary.claimed += 1;
                    debug!(
                        task_id = %record.id,
                        name = %record.name,
                        worker_id,
                        retry_count = record.retry_count,
                        "claimed task"
                    );
                    in_flight.spawn(self.reporter.clone().execute(record));
                }
                Ok(None) => {
                    store_failures = 0;
                    pause(&mut shutdown, self.config.poll_interval).await;
                }
                Err(err) => {
                    store_failures = store_failures.saturating_add(1);
                    let delay = store_backoff(
                        self.config.poll_interval,
                        store_failures,
                        self.config.store_backoff_max,
                    );
                    warn!(
                        worker_id,
                        error = %err,
                        transient = err.is_transient(),
                        failures = store_failures,
                        ?delay,
                        "store unavailable, backing off"
                    );
                    pause(&mut shutdown, delay).await;
                }
            }
        }

        self.drain(&mut in_flight, &mut summary).await;
        info!(
            worker_id,
            claimed = summary.claimed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "worker stopped"
        );
        summary
    }

    async fn drain(&self, in_flight: &mut JoinSet<Finished>, summary: &mut WorkerSummary) {
        if in_flight.is_empty() {
            return;
        }
        info!(
            worker_id = %self.config.worker_id,
            in_flight = in_flight.len(),
            grace = ?self.config.shutdown_grace,
            "waiting for in-flight tasks"
        );

        let grace = tokio::time::sleep(self.config.shutdown_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                finished = in_flight.join_next() => match finished {
                    Some(finished) => summary.record(finished),
                    None => return,
                },
                _ = &mut grace => {
                    warn!(
                        worker_id = %self.config.worker_id,
                        abandoned = in_flight.len(),
                        "shutdown grace elapsed, aborting in-flight tasks"
                    );
                    in_flight.abort_all();
                    while let Some(finished) = in_flight.join_next().await {
                        summary.record(finished);
                    }
                    return;
                }
            }
        }
    }
}

impl Reporter {
    async fn execute(self, record: TaskRecord) -> Finished {
        let Some(lease) = record.lease() else {
            error!(task_id = %record.id, "claimed record carries no lease");
            return Finished::Unreported;
        };

        let outcome = self.supervisor.execute(&record).await;
        let policy = self.supervisor.retry_policy_for(&record.name, &self.retry);
        self.report(&record, &lease, outcome, &policy).await
    }

    async fn report(
        &self,
        record: &TaskRecord,
        lease: &Lease,
        outcome: Outcome,
        policy: &RetryPolicy,
    ) -> Finished {
        let mut attempt = 0;
        loop {
            let now = self.clock.now();
            let reported = match &outcome {
                Outcome::Success(result) => self
                    .store
                    .complete(lease, result.clone(), now)
                    .await
                    .map(|accepted| accepted.then_some(Recorded::Completed)),
                Outcome::Failure(error) => self
                    .store
                    .fail(lease, error, policy, now)
                    .await
                    .map(|decision| decision.map(Recorded::Failed)),
            };

            match reported {
                Ok(Some(Recorded::Completed)) => {
                    info!(task_id = %record.id, name = %record.name, "task completed");
                    return Finished::Succeeded;
                }
                Ok(Some(Recorded::Failed(decision))) => {
                    log_failure(record, &outcome, &decision);
                    return Finished::Failed;
                }
                Ok(None) => {
                    warn!(
                        task_id = %record.id,
                        name = %record.name,
                        holder = %lease.holder,
                        "lease lost before reporting, outcome discarded"
                    );
                    return Finished::LeaseLost;
                }
                Err(err)
                    if err.is_transient()
                        && attempt + 1 < FINALIZE_ATTEMPTS
                        && !lease.is_expired(self.clock.now()) =>
                {
                    attempt += 1;
                    warn!(task_id = %record.id, error = %err, attempt, "report failed, retrying");
                    tokio::time::sleep(FINALIZE_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(err) => {
                    error!(
                        task_id = %record.id,
                        error = %err,
                        "could not report outcome; task will be reclaimed after its lease expires"
                    );
                    return Finished::Unreported;
                }
            }
        }
    }
}

fn log_failure(record: &TaskRecord, outcome: &Outcome, decision: &FailureDecision) {
    let reason = outcome.error().map(ToString::to_string).unwrap_or_default();
    match *decision {
        FailureDecision::Retry {
            retry_count,
            next_retry_at,
        } => warn!(
            task_id = %record.id,
            name = %record.name,
            retry_count,
            max_retries = record.max_retries,
            %next_retry_at,
            error = %reason,
            "task failed, retry scheduled"
        ),
        FailureDecision::Terminal { retry_count } => error!(
            task_id = %record.id,
            name = %record.name,
            retry_count,
            error = %reason,
            "task failed permanently"
        ),
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    let requested = *shutdown.borrow();
    // sender の drop も shutdown 要求として扱う
    requested || shutdown.has_changed().is_err()
}

/// `period` だけ待つ。shutdown 要求が来たら早めに戻る
async fn pause(shutdown: &mut watch::Receiver<bool>, period: Duration) {
    tokio::select! {
        _ = shutdown.changed() => {}
        _ = tokio::time::sleep(period) => {}
    }
}

/// `poll_interval * 2^(failures - 1)`, capped.
fn store_backoff(poll_interval: Duration, failures: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(failures.saturating_sub(1));
    poll_interval.saturating_mul(factor).min(max)
}
