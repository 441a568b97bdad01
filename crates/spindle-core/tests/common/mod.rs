//! Shared fixtures and the TaskStore contract every backend must satisfy.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::json;
use spindle_core::domain::{NewTask, TaskError, TaskFilter, TaskId, TaskRecord, TaskState};
use spindle_core::ports::TaskStore;
use spindle_core::retry::{FailureDecision, RetryPolicy};
use ulid::Ulid;

pub const LEASE: Duration = Duration::from_secs(30);

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn secs(n: i64) -> TimeDelta {
    TimeDelta::seconds(n)
}

pub fn record(spec: NewTask) -> TaskRecord {
    TaskRecord::pending(TaskId::from_ulid(Ulid::new()), spec, t0())
}

pub async fn insert(store: &dyn TaskStore, spec: NewTask) -> TaskId {
    store.insert(record(spec)).await.unwrap()
}

pub async fn fetch(store: &dyn TaskStore, id: TaskId) -> TaskRecord {
    store.get(id).await.unwrap().expect("record exists")
}

/// For N concurrent claimers and M eligible records, exactly min(N, M)
/// claims succeed and no record is handed out twice.
pub async fn claims_are_mutually_exclusive(store: Arc<dyn TaskStore>) {
    insert(store.as_ref(), NewTask::new("job", json!({}))).await;

    let mut claims = Vec::new();
    for n in 0..16 {
        let store = Arc::clone(&store);
        claims.push(tokio::spawn(async move {
            store.claim_next(t0(), &format!("w{n}"), LEASE).await.unwrap()
        }));
    }
    let mut winners = 0;
    for claim in claims {
        if claim.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one claimer wins a single record");

    for _ in 0..4 {
        insert(store.as_ref(), NewTask::new("job", json!({}))).await;
    }
    let mut claims = Vec::new();
    for n in 0..16 {
        let store = Arc::clone(&store);
        claims.push(tokio::spawn(async move {
            store.claim_next(t0(), &format!("v{n}"), LEASE).await.unwrap()
        }));
    }
    let mut ids = HashSet::new();
    for claim in claims {
        if let Some(record) = claim.await.unwrap() {
            assert!(ids.insert(record.id), "record {} claimed twice", record.id);
        }
    }
    assert_eq!(ids.len(), 4);
}

/// Higher priority first; equal priority in submission order.
pub async fn claims_follow_priority_then_submission(store: Arc<dyn TaskStore>) {
    let low = insert(store.as_ref(), NewTask::new("job", json!({})).with_priority(1)).await;
    let high_first = insert(store.as_ref(), NewTask::new("job", json!({})).with_priority(5)).await;
    let mid = insert(store.as_ref(), NewTask::new("job", json!({})).with_priority(3)).await;
    let high_second = insert(store.as_ref(), NewTask::new("job", json!({})).with_priority(5)).await;

    let mut order = Vec::new();
    while let Some(record) = store.claim_next(t0(), "w", LEASE).await.unwrap() {
        order.push(record.id);
    }
    assert_eq!(order, vec![high_first, high_second, mid, low]);
}

pub async fn future_tasks_are_not_eligible(store: Arc<dyn TaskStore>) {
    let id = insert(
        store.as_ref(),
        NewTask::new("job", json!({})).with_delay(Duration::from_secs(60)),
    )
    .await;

    assert!(store.claim_next(t0() + secs(59), "w", LEASE).await.unwrap().is_none());
    let claimed = store.claim_next(t0() + secs(60), "w", LEASE).await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
}

/// Claim fields, then success clears the lease and stores the result.
pub async fn success_completes_the_record(store: Arc<dyn TaskStore>) {
    let id = insert(store.as_ref(), NewTask::new("job", json!({"n": 1}))).await;
    let claimed = store.claim_next(t0(), "w1", LEASE).await.unwrap().unwrap();

    assert_eq!(claimed.state, TaskState::Running);
    assert_eq!(claimed.lease_holder.as_deref(), Some("w1"));
    assert_eq!(claimed.lease_expires_at, Some(t0() + secs(30)));
    assert_eq!(claimed.started_at, Some(t0()));
    assert!(claimed.invariants_hold());

    let lease = claimed.lease().unwrap();
    assert!(store.complete(&lease, Some(json!({"sum": 3})), t0() + secs(1)).await.unwrap());

    let done = fetch(store.as_ref(), id).await;
    assert!(done.is_completed());
    assert_eq!(done.result, Some(json!({"sum": 3})));
    assert_eq!(done.completed_at, Some(t0() + secs(1)));
    assert!(done.lease_holder.is_none() && done.lease_expires_at.is_none());
    assert!(done.invariants_hold());

    assert!(store.claim_next(t0() + secs(3600), "w2", LEASE).await.unwrap().is_none());
}

pub async fn unit_results_are_stored_as_absent(store: Arc<dyn TaskStore>) {
    let id = insert(store.as_ref(), NewTask::new("job", json!({}))).await;
    let lease = store.claim_next(t0(), "w1", LEASE).await.unwrap().unwrap().lease().unwrap();
    assert!(store.complete(&lease, None, t0()).await.unwrap());

    let done = fetch(store.as_ref(), id).await;
    assert!(done.is_completed());
    assert!(!done.has_result());
}

/// A crashed worker's task comes back only once its lease has expired.
pub async fn expired_leases_are_reclaimed(store: Arc<dyn TaskStore>) {
    let id = insert(store.as_ref(), NewTask::new("job", json!({}))).await;
    let first = store.claim_next(t0(), "w1", LEASE).await.unwrap().unwrap();
    let expires_at = first.lease_expires_at.unwrap();

    assert!(store.claim_next(t0() + secs(10), "w2", LEASE).await.unwrap().is_none());
    assert!(store.claim_next(expires_at, "w2", LEASE).await.unwrap().is_none());

    let after = expires_at + TimeDelta::milliseconds(1);
    let second = store.claim_next(after, "w2", LEASE).await.unwrap().unwrap();
    assert_eq!(second.id, id);
    assert_eq!(second.lease_holder.as_deref(), Some("w2"));
    assert_eq!(second.retry_count, 0);
    assert_eq!(second.started_at, Some(after));
}

/// Reports under a reclaimed lease change nothing.
pub async fn stale_lease_reports_are_ignored(store: Arc<dyn TaskStore>) {
    let id = insert(store.as_ref(), NewTask::new("job", json!({}))).await;
    let stale = store.claim_next(t0(), "w1", LEASE).await.unwrap().unwrap().lease().unwrap();
    let reclaimed_at = t0() + secs(31);
    let current = store
        .claim_next(reclaimed_at, "w2", LEASE)
        .await
        .unwrap()
        .unwrap()
        .lease()
        .unwrap();

    let policy = RetryPolicy::default();
    assert!(!store.complete(&stale, Some(json!("late")), reclaimed_at).await.unwrap());
    assert!(
        store
            .fail(&stale, &TaskError::execution("late"), &policy, reclaimed_at)
            .await
            .unwrap()
            .is_none()
    );

    let untouched = fetch(store.as_ref(), id).await;
    assert!(untouched.is_running());
    assert!(untouched.holds(&current));
    assert!(untouched.result.is_none() && untouched.error.is_none());

    assert!(store.complete(&current, Some(json!("on time")), reclaimed_at).await.unwrap());
    assert_eq!(fetch(store.as_ref(), id).await.result, Some(json!("on time")));
}

/// Fail, wait for `next_retry_at`, reclaim; returns the failure decision.
async fn fail_once(
    store: &dyn TaskStore,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> FailureDecision {
    let claimed = store.claim_next(now, "w", LEASE).await.unwrap().expect("eligible");
    store
        .fail(&claimed.lease().unwrap(), &TaskError::execution("boom"), policy, now)
        .await
        .unwrap()
        .expect("lease held")
}

/// With base 5s and multiplier 2, retries land 5s, 10s, 20s after each failure.
pub async fn backoff_doubles_between_retries(store: Arc<dyn TaskStore>) {
    let policy = RetryPolicy::new(Duration::from_secs(5), 2.0);
    let id = insert(store.as_ref(), NewTask::new("job", json!({})).with_max_retries(4)).await;

    let mut now = t0();
    for expected in [5, 10, 20] {
        let decision = fail_once(store.as_ref(), now, &policy).await;
        let FailureDecision::Retry { next_retry_at, .. } = decision else {
            panic!("expected a retry, got {decision:?}");
        };
        assert_eq!(next_retry_at - now, secs(expected));

        let failed = fetch(store.as_ref(), id).await;
        assert!(failed.is_failed() && !failed.is_terminal());
        assert_eq!(failed.next_retry_at, Some(next_retry_at));
        assert!(failed.invariants_hold());

        let just_before = next_retry_at - TimeDelta::milliseconds(1);
        assert!(store.claim_next(just_before, "w", LEASE).await.unwrap().is_none());
        now = next_retry_at;
    }
}

/// `max_retries = 3`: three failures, then terminal with `retry_count = 3`.
pub async fn failures_exhaust_the_retry_budget(store: Arc<dyn TaskStore>) {
    let policy = RetryPolicy::default();
    let id = insert(store.as_ref(), NewTask::new("job", json!({})).with_max_retries(3)).await;

    let mut now = t0();
    let mut decisions = Vec::new();
    for _ in 0..3 {
        let decision = fail_once(store.as_ref(), now, &policy).await;
        if let FailureDecision::Retry { next_retry_at, .. } = decision {
            now = next_retry_at;
        }
        decisions.push(decision);
    }
    assert_eq!(
        decisions.iter().map(FailureDecision::is_terminal).collect::<Vec<_>>(),
        vec![false, false, true]
    );

    let dead = fetch(store.as_ref(), id).await;
    assert_eq!(dead.state, TaskState::Failed);
    assert_eq!(dead.retry_count, 3);
    assert!(dead.next_retry_at.is_none());
    assert_eq!(dead.completed_at, Some(now));
    assert_eq!(dead.error.as_ref().map(|e| e.message.as_str()), Some("boom"));
    assert!(dead.is_terminal());
    assert!(dead.invariants_hold());
    assert!(store.claim_next(now + secs(86_400), "w", LEASE).await.unwrap().is_none());
}

pub async fn listing_and_stats(store: Arc<dyn TaskStore>) {
    let a = insert(store.as_ref(), NewTask::new("alpha", json!({}))).await;
    let b = insert(store.as_ref(), NewTask::new("beta", json!({}))).await;
    let c = insert(store.as_ref(), NewTask::new("alpha", json!({}))).await;
    let d = insert(store.as_ref(), NewTask::new("alpha", json!({})).with_max_retries(1)).await;

    let all = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![d, c, b, a]);

    let alphas = store.list(&TaskFilter::default().name("alpha")).await.unwrap();
    assert_eq!(alphas.len(), 3);

    let page = store.list(&TaskFilter::default().limit(2).offset(1)).await.unwrap();
    assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![c, b]);

    // a completes, d fails permanently, b stays running.
    let policy = RetryPolicy::default();
    let claimed_a = store.claim_next(t0(), "w1", LEASE).await.unwrap().unwrap();
    assert_eq!(claimed_a.id, a);
    store.complete(&claimed_a.lease().unwrap(), None, t0()).await.unwrap();
    let claimed_b = store.claim_next(t0(), "w2", LEASE).await.unwrap().unwrap();
    assert_eq!(claimed_b.id, b);
    let claimed_c = store.claim_next(t0(), "w1", LEASE).await.unwrap().unwrap();
    assert_eq!(claimed_c.id, c);
    let claimed_d = store.claim_next(t0(), "w1", LEASE).await.unwrap().unwrap();
    store
        .fail(&claimed_d.lease().unwrap(), &TaskError::execution("x"), &policy, t0())
        .await
        .unwrap();

    let running = store.list(&TaskFilter::default().state(TaskState::Running)).await.unwrap();
    assert_eq!(running.iter().map(|r| r.id).collect::<Vec<_>>(), vec![c, b]);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.running, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.failed_permanent, 1);

    let workers = store.workers().await.unwrap();
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0].worker_id, "w1");
    assert_eq!(workers[0].running, 1);
    assert_eq!(workers[1].worker_id, "w2");
    assert_eq!(workers[1].earliest_lease_expiry, Some(t0() + secs(30)));
}
