use std::sync::Arc;

use google_cloud_auth::project::Config;
use google_cloud_auth::token::DefaultTokenSourceProvider;
use google_cloud_token::{TokenSource, TokenSourceProvider};

use pump_api::PumpError;

/// OAuth scope для Pub/Sub, BigQuery и Cloud Monitoring REST API.
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

enum Source {
    Static(String),
    Adc(Arc<dyn TokenSource>),
}

/// Источник `Authorization` header'а для REST API Google Cloud.
///
/// Либо статический токен (эмулятор, локальный запуск), либо
/// Application Default Credentials: `GOOGLE_APPLICATION_CREDENTIALS`,
/// `gcloud auth application-default`, metadata server. Кеш и обновление
/// ADC-токена делает `google-cloud-auth`.
pub struct TokenProvider {
    source: Source,
}

impl TokenProvider {
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
        }
    }

    /// ADC provider и project id из найденных credentials (если есть).
    pub async fn application_default() -> Result<(Self, Option<String>), PumpError> {
        let config = Config::default().with_scopes(SCOPES);
        let provider = DefaultTokenSourceProvider::new(config)
            .await
            .map_err(|e| PumpError::config(format!("application default credentials: {e}")))?;
        let project_id = provider.project_id.clone();
        tracing::debug!(project = ?project_id, "application default credentials loaded");
        Ok((
            Self {
                source: Source::Adc(provider.token_source()),
            },
            project_id,
        ))
    }

    /// Значение `Authorization` header'а: `Bearer <token>`.
    pub async fn authorization(&self) -> Result<String, PumpError> {
        match &self.source {
            Source::Static(token) => Ok(bearer(token)),
            Source::Adc(ts) => ts
                .token()
                .await
                .map(|t| bearer(&t))
                .map_err(|e| PumpError::io(format!("access token: {e}"))),
        }
    }
}

fn bearer(token: &str) -> String {
    let token = token.trim();
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_gets_bearer_prefix() {
        let provider = TokenProvider::fixed(" secret ");
        assert_eq!(provider.authorization().await.unwrap(), "Bearer secret");
    }

    #[test]
    fn bearer_prefix_is_not_doubled() {
        assert_eq!(bearer("Bearer abc"), "Bearer abc");
        assert_eq!(bearer("abc"), "Bearer abc");
    }
}
