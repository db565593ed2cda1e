use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use pump_api::{MetricsReporter, PumpError, RunCounters};
use pump_engine::{LogReporter, Pump, RunConfig};
use pump_trigger::{AppState, TriggerConfig, short_subscription_id};
use sink_memory::{MemorySink, MemorySinkFactory};
use source_memory::{MemoryPublisher, MemorySource, MemorySourceFactory};

const TOKEN: &str = "s3cret";

struct Server {
    base: String,
    sink: Arc<MemorySink>,
    publisher: Option<MemoryPublisher>,
    shutdown: CancellationToken,
}

async fn start_with(run: RunConfig, pump: Pump, sink: Arc<MemorySink>, publisher: Option<MemoryPublisher>) -> Server {
    let shutdown = CancellationToken::new();
    let config = TriggerConfig {
        release: "v1.2.3".into(),
        access_token: TOKEN.into(),
        debug: true,
    };
    let state = AppState::new(Arc::new(pump), run, config, shutdown.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = shutdown.clone();
    tokio::spawn(async move {
        pump_trigger::serve(listener, state, token).await.unwrap();
    });

    Server {
        base: format!("http://{addr}"),
        sink,
        publisher,
        shutdown,
    }
}

/// Сервер над memory source с `messages` опубликованными сообщениями.
/// `close` — закрыть publisher, чтобы run закончился сам.
async fn start(messages: usize, close: bool) -> Server {
    let (publisher, source) = MemorySource::new("sub");
    for i in 0..messages {
        publisher.publish(format!(r#"{{"n":{i}}}"#));
    }
    let sink = Arc::new(MemorySink::new());
    let pump = Pump::new(
        Arc::new(MemorySourceFactory::new(source)),
        Arc::new(MemorySinkFactory::new(sink.clone())),
        Arc::new(LogReporter),
    );
    let run = RunConfig {
        batch_size: 2,
        stall_timeout: Duration::from_secs(60),
        ..RunConfig::new("sub", "ds", "tbl")
    };
    start_with(run, pump, sink, (!close).then_some(publisher)).await
}

fn notification(subscription: &str) -> Value {
    json!({
        "incident": {
            "incident_id": "0.abc",
            "resource": {"type": "pubsub_subscription", "labels": {"subscription_id": subscription}},
            "policy_name": "backlog",
            "state": "open",
            "started_at": 1546300800
        },
        "version": "1.2"
    })
}

async fn notify(base: &str, token: &str, body: String) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/notif"))
        .query(&[("token", token)])
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap();
    (status, body)
}

#[tokio::test]
async fn root_reports_release_and_caller() {
    let server = start(0, true).await;

    let body: Value = reqwest::get(format!("{}/", server.base)).await.unwrap().json().await.unwrap();

    assert_eq!(body["release"], "v1.2.3");
    assert!(body["request_from"].as_str().unwrap().starts_with("127.0.0.1:"));
    assert!(body["request_on"].as_str().is_some());
}

#[tokio::test]
async fn health_is_ok() {
    let server = start(0, true).await;
    let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let server = start(3, true).await;

    let (status, body) = notify(&server.base, "nope", notification("sub").to_string()).await;

    assert_eq!(status, 401);
    assert_eq!(body, json!({"message": "Invalid access token", "status": "Unauthorized"}));
    assert_eq!(server.sink.calls(), 0);
}

#[tokio::test]
async fn token_is_trimmed() {
    let server = start(1, true).await;
    let (status, _) = notify(&server.base, &format!(" {TOKEN} "), notification("sub").to_string()).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn malformed_notification_is_bad_request() {
    let server = start(3, true).await;

    let (status, body) = notify(&server.base, TOKEN, "{not json".into()).await;

    assert_eq!(status, 400);
    assert_eq!(body, json!({"message": "Invalid notification format", "status": "BadRequest"}));
}

#[tokio::test]
async fn foreign_subscription_is_rejected() {
    let server = start(3, true).await;

    let (status, body) = notify(&server.base, TOKEN, notification("other").to_string()).await;

    assert_eq!(status, 500);
    assert_eq!(body["message"], "Invalid incident subscriptionID");
    assert_eq!(body["status"], "InternalServerError");
    assert_eq!(server.sink.calls(), 0);
}

#[tokio::test]
async fn valid_notification_runs_pump() {
    let server = start(5, true).await;

    let (status, body) = notify(&server.base, TOKEN, notification("sub").to_string()).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"message": "Success", "status": "OK", "count": 5}));
    assert_eq!(server.sink.batch_sizes(), vec![2, 2, 1]);
}

#[test]
fn full_subscription_path_reduces_to_short_name() {
    assert_eq!(short_subscription_id("projects/p/subscriptions/sub"), "sub");
    assert_eq!(short_subscription_id("sub"), "sub");
}

#[tokio::test]
async fn full_path_subscription_matches_short_label() {
    let full = "projects/proj/subscriptions/sub";
    let (publisher, source) = MemorySource::new(full);
    publisher.publish(r#"{"n":1}"#);
    drop(publisher);
    let sink = Arc::new(MemorySink::new());
    let pump = Pump::new(
        Arc::new(MemorySourceFactory::new(source)),
        Arc::new(MemorySinkFactory::new(sink.clone())),
        Arc::new(LogReporter),
    );
    let server = start_with(RunConfig::new(full, "ds", "tbl"), pump, sink, None).await;

    let (status, body) = notify(&server.base, TOKEN, notification("sub").to_string()).await;

    assert_eq!(status, 200, "{body}");
    assert_eq!(body["count"], 1);
    assert_eq!(server.sink.batch_sizes(), vec![1]);
}

struct FailingReporter;

impl MetricsReporter for FailingReporter {
    fn report(
        &self,
        _source_id: &str,
        _counters: RunCounters,
    ) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>> {
        Box::pin(async { Err(PumpError::io("monitoring unavailable")) })
    }
}

#[tokio::test]
async fn pump_failure_is_internal_error() {
    let (publisher, source) = MemorySource::new("sub");
    publisher.publish(r#"{"n":1}"#);
    drop(publisher);
    let sink = Arc::new(MemorySink::new());
    let pump = Pump::new(
        Arc::new(MemorySourceFactory::new(source)),
        Arc::new(MemorySinkFactory::new(sink.clone())),
        Arc::new(FailingReporter),
    );
    let server = start_with(RunConfig::new("sub", "ds", "tbl"), pump, sink, None).await;

    let (status, body) = notify(&server.base, TOKEN, notification("sub").to_string()).await;

    assert_eq!(status, 500);
    assert_eq!(body, json!({"message": "Error processing request, see logs", "status": "InternalServerError"}));
}

#[tokio::test]
async fn concurrent_run_is_rejected_then_shutdown_drains() {
    let server = start(1, false).await;
    assert!(server.publisher.is_some());

    let base = server.base.clone();
    let first = tokio::spawn(async move { notify(&base, TOKEN, notification("sub").to_string()).await });

    // Первый run ждёт сообщений (publisher жив, stall 60s)
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (status, body) = notify(&server.base, TOKEN, notification("sub").to_string()).await;
    assert_eq!(status, 429);
    assert_eq!(body, json!({"message": "Pump run already in progress", "status": "TooManyRequests"}));

    server.shutdown.cancel();
    let (status, body) = first.await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["count"], 1);
    assert_eq!(server.sink.batch_sizes(), vec![1]);
}
