//! HTTP webhook, запускающий pump по alerting notification.
//!
//! `GET /` — release и данные запроса, `GET /health` — liveness,
//! `POST /v1/notif?token=…` — один run pump'а для настроенной подписки.

mod notification;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use pump_engine::{Pump, RunConfig};

pub use notification::{Incident, IncidentResource, Notification, ResourceLabels};

/// Параметры webhook'а (не pump'а).
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub release: String,
    /// Ожидаемое значение `?token=`, сравнивается после trim.
    pub access_token: String,
    /// Логировать тело каждого notification.
    pub debug: bool,
}

#[derive(Clone)]
pub struct AppState {
    pump: Arc<Pump>,
    run: Arc<RunConfig>,
    config: Arc<TriggerConfig>,
    /// Не более одного run'а одновременно.
    running: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl AppState {
    /// `shutdown` — токен сервера: его отмена штатно дренирует текущий run.
    pub fn new(pump: Arc<Pump>, run: RunConfig, config: TriggerConfig, shutdown: CancellationToken) -> Self {
        Self {
            pump,
            run: Arc::new(run),
            config: Arc::new(config),
            running: Arc::new(Mutex::new(())),
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/v1/notif", post(handle_notif))
        .with_state(state)
}

/// Поднять webhook на `0.0.0.0:{port}` до отмены `shutdown`.
pub async fn run(port: u16, state: AppState, shutdown: CancellationToken) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind :{port}: {e}"))?;
    tracing::info!(port, "server starting");
    serve(listener, state, shutdown).await
}

/// Обслуживать уже открытый listener (тесты биндят `127.0.0.1:0`).
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))
}

// --- GET / ---

async fn handle_root(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "release": state.config.release,
        "request_on": chrono::Utc::now().to_rfc3339(),
        "request_from": remote.to_string(),
    }))
}

// --- GET /health ---

async fn handle_health() -> &'static str {
    "OK"
}

// --- POST /v1/notif?token=X ---

/// Label `subscription_id` alert'а — короткое имя, а подписка может
/// быть задана полным путём `projects/{p}/subscriptions/{s}`.
pub fn short_subscription_id(subscription: &str) -> &str {
    subscription
        .rsplit_once("/subscriptions/")
        .map_or(subscription, |(_, short)| short)
}

#[derive(Deserialize)]
struct NotifParams {
    #[serde(default)]
    token: String,
}

fn reply(status: StatusCode, label: &str, message: &str) -> Response {
    (status, Json(serde_json::json!({ "message": message, "status": label }))).into_response()
}

async fn handle_notif(
    State(state): State<AppState>,
    Query(params): Query<NotifParams>,
    body: Bytes,
) -> Response {
    if state.config.debug {
        tracing::info!(body = %String::from_utf8_lossy(&body), "notification body");
    }

    if params.token.trim() != state.config.access_token.trim() {
        tracing::warn!("invalid access token");
        return reply(StatusCode::UNAUTHORIZED, "Unauthorized", "Invalid access token");
    }

    let notif: Notification = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "error binding notification");
            return reply(StatusCode::BAD_REQUEST, "BadRequest", "Invalid notification format");
        }
    };
    tracing::info!(
        incident = %notif.incident.incident_id,
        policy = %notif.incident.policy_name,
        state = %notif.incident.state,
        subscription = %notif.subscription_id(),
        "notification"
    );

    let expected = short_subscription_id(&state.run.subscription_id);
    if notif.subscription_id() != expected {
        tracing::warn!(
            got = %notif.subscription_id(),
            want = %expected,
            "invalid subscription"
        );
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalServerError",
            "Invalid incident subscriptionID",
        );
    }

    let Ok(_guard) = state.running.try_lock() else {
        tracing::warn!(subscription = %state.run.subscription_id, "pump run already in progress");
        return reply(StatusCode::TOO_MANY_REQUESTS, "TooManyRequests", "Pump run already in progress");
    };

    match state.pump.run_until(&state.run, &state.shutdown).await {
        Ok(report) => {
            tracing::info!(count = report.record_count, termination = ?report.termination, "pump run done");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "message": "Success",
                    "status": "OK",
                    "count": report.record_count,
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(stage = e.stage(), kind = %e.kind(), error = %e, "error on pump exec");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Error processing request, see logs",
            )
        }
    }
}
