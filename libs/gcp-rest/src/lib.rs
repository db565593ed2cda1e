//! REST plumbing для Google Cloud API: bearer token, project id, JSON POST.
//!
//! Общая часть коллабораторов `source-pubsub`, `sink-bigquery`,
//! `metrics-monitoring`. Все ошибки — [`PumpError`]: сетевые и HTTP-сбои
//! имеют kind `Io`, нераспарсенные ответы — `Format`.

mod auth;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use pump_api::PumpError;

pub use auth::TokenProvider;

/// Env-переменная с project id (та же, что у Google client libraries).
pub const PROJECT_ENV: &str = "GOOGLE_CLOUD_PROJECT";

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct GcpConfig {
    /// Без указания: `GOOGLE_CLOUD_PROJECT`, затем project из ADC.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Статический bearer token. Без указания — Application Default Credentials.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Таймаут одного HTTP запроса, секунды.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════
//  GcpClient
// ═══════════════════════════════════════════════════════════════

/// Авторизованный HTTP клиент одного GCP проекта. Дёшево клонируется.
#[derive(Clone)]
pub struct GcpClient {
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
    project_id: String,
}

impl GcpClient {
    /// Собрать клиент: HTTP, источник токена, project id.
    pub async fn connect(config: &GcpConfig) -> Result<Self, PumpError> {
        let timeout = config.timeout_secs.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PumpError::config(format!("HTTP client: {e}")))?;

        let (tokens, discovered) = match config.access_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => (TokenProvider::fixed(token), None),
            _ => TokenProvider::application_default().await?,
        };

        let env_project = std::env::var(PROJECT_ENV).ok();
        let project_id = resolve_project_id(
            config.project_id.as_deref(),
            env_project.as_deref(),
            discovered.as_deref(),
        )?;

        tracing::info!(project = %project_id, "gcp client ready");
        Ok(Self::new(http, tokens, project_id))
    }

    pub fn new(http: reqwest::Client, tokens: TokenProvider, project_id: impl Into<String>) -> Self {
        Self {
            http,
            tokens: Arc::new(tokens),
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// POST JSON body с bearer token, ответ разбирается как JSON.
    ///
    /// Сетевая ошибка и не-2xx статус → `Io` (тело ответа в сообщении),
    /// не-JSON ответ → `Format`. Пустое тело читается как `{}`.
    pub async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, PumpError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let authorization = self.tokens.authorization().await?;
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(body)
            .send()
            .await
            .map_err(|e| PumpError::io(format!("POST {url}: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PumpError::io(format!("POST {url}: read body: {e}")))?;
        if !status.is_success() {
            return Err(PumpError::io(format!("POST {url}: HTTP {status}: {}", text.trim())));
        }

        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| PumpError::format_err(format!("POST {url}: bad response: {e}")))
    }
}

// ═══════════════════════════════════════════════════════════════
//  SharedClient
// ═══════════════════════════════════════════════════════════════

/// GcpClient, собираемый при первом обращении и общий для всех
/// коллабораторов процесса (один кеш токена, один lookup project id).
pub struct SharedClient {
    config: GcpConfig,
    cell: OnceCell<GcpClient>,
}

impl SharedClient {
    pub fn new(config: GcpConfig) -> Self {
        Self { config, cell: OnceCell::new() }
    }

    /// Уже собранный клиент (эмулятор, тесты).
    pub fn ready(client: GcpClient) -> Self {
        Self {
            config: GcpConfig::default(),
            cell: OnceCell::from(client),
        }
    }

    /// Неудачная сборка не кешируется: следующий вызов попробует снова.
    pub async fn get(&self) -> Result<GcpClient, PumpError> {
        self.cell
            .get_or_try_init(|| GcpClient::connect(&self.config))
            .await
            .cloned()
    }
}

/// Project id: явный → env → из credentials (key file или metadata server).
/// Пустые значения пропускаются.
pub fn resolve_project_id(
    explicit: Option<&str>,
    env: Option<&str>,
    discovered: Option<&str>,
) -> Result<String, PumpError> {
    [explicit, env, discovered]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PumpError::config(format!("project id not set: use [gcp].project_id, {PROJECT_ENV} or credentials with a project")))
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    use super::*;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client() -> GcpClient {
        GcpClient::new(reqwest::Client::new(), TokenProvider::fixed("t0k"), "proj")
    }

    #[tokio::test]
    async fn post_json_sends_bearer_and_decodes() {
        async fn echo(headers: HeaderMap, body: String) -> String {
            let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
            serde_json::json!({ "auth": auth, "body": body }).to_string()
        }
        let base = spawn(Router::new().route("/echo", post(echo))).await;

        let resp: serde_json::Value = client()
            .post_json(&format!("{base}/echo"), &serde_json::json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(resp["auth"], "Bearer t0k");
        assert_eq!(resp["body"], r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn http_error_status_is_io() {
        let base = spawn(Router::new().route(
            "/fail",
            post(|| async { (StatusCode::FORBIDDEN, "permission denied") }),
        ))
        .await;

        let err = client()
            .post_json::<_, serde_json::Value>(&format!("{base}/fail"), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), pump_api::ErrorKind::Io);
        assert!(err.message().contains("403"), "{err}");
        assert!(err.message().contains("permission denied"), "{err}");
    }

    #[tokio::test]
    async fn non_json_response_is_format_error() {
        let base = spawn(Router::new().route("/html", post(|| async { "<html>" }))).await;

        let err = client()
            .post_json::<_, serde_json::Value>(&format!("{base}/html"), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), pump_api::ErrorKind::Format);
    }

    #[tokio::test]
    async fn empty_response_reads_as_object() {
        let base = spawn(Router::new().route("/empty", post(|| async { "" }))).await;

        let resp: serde_json::Value = client()
            .post_json(&format!("{base}/empty"), &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(resp, serde_json::json!({}));
    }

    #[test]
    fn project_id_resolution_order() {
        let adc = Some("from-credentials");
        assert_eq!(resolve_project_id(Some("explicit"), Some("env"), adc).unwrap(), "explicit");
        assert_eq!(resolve_project_id(Some("  "), Some("env"), adc).unwrap(), "env");
        assert_eq!(resolve_project_id(None, None, adc).unwrap(), "from-credentials");
    }

    #[test]
    fn missing_project_is_config_error() {
        let err = resolve_project_id(None, Some(""), None).unwrap_err();
        assert_eq!(err.kind(), pump_api::ErrorKind::Config);
    }

    #[tokio::test]
    async fn static_token_connect_skips_credentials_lookup() {
        let config = GcpConfig {
            project_id: Some("explicit".into()),
            access_token: Some("t0k".into()),
            timeout_secs: Some(5),
        };
        let client = GcpClient::connect(&config).await.unwrap();
        assert_eq!(client.project_id(), "explicit");
    }

    #[tokio::test]
    async fn shared_client_ready_skips_connect() {
        let shared = SharedClient::ready(client());
        assert_eq!(shared.get().await.unwrap().project_id(), "proj");
        assert_eq!(shared.get().await.unwrap().project_id(), "proj");
    }
}
