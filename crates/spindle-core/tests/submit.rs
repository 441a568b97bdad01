mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use spindle_core::app::{App, AppBuilder};
use spindle_core::config::Settings;
use spindle_core::ports::{ManualClock, TaskStore};
use spindle_core::store::InMemoryTaskStore;
use spindle_core::typed::{Handler, Task};
use spindle_core::{SubmitError, SubmitOptions, TaskError};

#[derive(Serialize, Deserialize)]
struct SendEmail {
    to: String,
    #[serde(default)]
    subject: String,
}

impl Task for SendEmail {
    const NAME: &'static str = "send_email";
    const MAX_RETRIES: Option<u32> = Some(5);
    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(30));
}

struct SendEmailHandler;

#[async_trait]
impl Handler<SendEmail> for SendEmailHandler {
    type Output = ();

    async fn handle(&self, _task: SendEmail) -> Result<(), TaskError> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Cleanup {}

impl Task for Cleanup {
    const NAME: &'static str = "cleanup";
}

struct CleanupHandler;

#[async_trait]
impl Handler<Cleanup> for CleanupHandler {
    type Output = ();

    async fn handle(&self, _task: Cleanup) -> Result<(), TaskError> {
        Ok(())
    }
}

fn app(settings: Settings) -> (App, Arc<dyn TaskStore>, ManualClock) {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let clock = ManualClock::new(common::t0());
    let app = AppBuilder::new()
        .register::<SendEmail, _>(SendEmailHandler)
        .unwrap()
        .register::<Cleanup, _>(CleanupHandler)
        .unwrap()
        .store(Arc::clone(&store))
        .clock(Arc::new(clock.clone()))
        .settings(settings)
        .build()
        .unwrap();
    (app, store, clock)
}

#[tokio::test]
async fn unknown_names_are_rejected_before_persisting() {
    let (app, store, _) = app(Settings::default());
    let err = app
        .submitter()
        .submit("no_such_task", json!({}), SubmitOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(&err, SubmitError::UnknownTask(name) if name == "no_such_task"));
    assert!(err.is_rejection());
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn invalid_parameters_are_rejected_before_persisting() {
    let (app, store, _) = app(Settings::default());
    let err = app
        .submitter()
        .submit("send_email", json!({"subject": "hi"}), SubmitOptions::new())
        .await
        .unwrap_err();

    let validation = match err {
        SubmitError::Validation(validation) => validation,
        other => panic!("expected a validation error, got {other:?}"),
    };
    assert_eq!(validation.errors[0].field, "to");
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn zero_deadline_is_rejected_before_persisting() {
    let (app, store, _) = app(Settings::default());
    let err = app
        .submitter()
        .submit(
            "cleanup",
            json!({}),
            SubmitOptions::new().timeout(Duration::ZERO),
        )
        .await
        .unwrap_err();

    let validation = match err {
        SubmitError::Validation(validation) => validation,
        other => panic!("expected a validation error, got {other:?}"),
    };
    assert_eq!(validation.errors[0].field, "timeout");
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn accepted_tasks_are_pending_with_normalized_parameters() {
    let (app, _, clock) = app(Settings::default());
    clock.advance(Duration::from_secs(10));
    let submitter = app.submitter();
    let id = submitter
        .submit(
            "send_email",
            json!({"to": "a@b.c"}),
            SubmitOptions::new()
                .delay(Duration::from_secs(60))
                .priority(7)
                .tag("tenant", "acme"),
        )
        .await
        .unwrap();

    let record = submitter.get(id).await.unwrap().unwrap();
    assert!(record.is_pending());
    assert_eq!(record.parameters, json!({"to": "a@b.c", "subject": ""}));
    assert_eq!(record.created_at, common::t0() + common::secs(10));
    assert_eq!(record.scheduled_at, common::t0() + common::secs(70));
    assert_eq!(record.priority, 7);
    assert_eq!(record.tags["tenant"], json!("acme"));
    assert_eq!(record.retry_count, 0);
    assert!(record.invariants_hold());
}

#[tokio::test]
async fn limits_resolve_submission_then_type_then_settings() {
    let mut settings = Settings::default();
    settings.retry.max_retries = 7;
    settings.task.default_timeout_seconds = Some(12.0);
    let (app, _, _) = app(settings);
    let submitter = app.submitter();

    let typed_defaults = submitter
        .submit("send_email", json!({"to": "x"}), SubmitOptions::new())
        .await
        .unwrap();
    let overridden = submitter
        .submit(
            "send_email",
            json!({"to": "x"}),
            SubmitOptions::new().max_retries(1).timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    let settings_defaults = submitter
        .submit("cleanup", json!({}), SubmitOptions::new())
        .await
        .unwrap();

    let typed_defaults = submitter.get(typed_defaults).await.unwrap().unwrap();
    assert_eq!(typed_defaults.max_retries, 5);
    assert_eq!(typed_defaults.execution_deadline, Some(Duration::from_secs(30)));

    let overridden = submitter.get(overridden).await.unwrap().unwrap();
    assert_eq!(overridden.max_retries, 1);
    assert_eq!(overridden.execution_deadline, Some(Duration::from_secs(2)));

    let settings_defaults = submitter.get(settings_defaults).await.unwrap().unwrap();
    assert_eq!(settings_defaults.max_retries, 7);
    assert_eq!(settings_defaults.execution_deadline, Some(Duration::from_secs(12)));
}

#[tokio::test]
async fn typed_submission_uses_the_task_name() {
    let (app, _, _) = app(Settings::default());
    let submitter = app.submitter();
    let id = submitter
        .submit_typed(
            &SendEmail {
                to: "t@example.com".into(),
                subject: "hello".into(),
            },
            SubmitOptions::new(),
        )
        .await
        .unwrap();

    let record = submitter.get(id).await.unwrap().unwrap();
    assert_eq!(record.name, "send_email");
    assert_eq!(record.parameters["subject"], json!("hello"));

    let listed = submitter
        .list(&spindle_core::TaskFilter::default().name("send_email"))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(submitter.stats().await.unwrap().pending, 1);
    assert!(submitter.workers().await.unwrap().is_empty());
}
