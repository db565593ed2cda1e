use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use gcp_rest::SharedClient;
use pump_api::{MetricsReporter, PumpError, RunCounters};

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Префикс типа метрики; итог — `{prefix}/{invocation|message|duration}`.
    #[serde(default = "default_prefix")]
    pub metric_prefix: String,
}

fn default_endpoint() -> String {
    "https://monitoring.googleapis.com".into()
}

fn default_prefix() -> String {
    "custom.googleapis.com/metric".into()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            metric_prefix: default_prefix(),
        }
    }
}

/// Тело `projects.timeSeries.create` с одной точкой.
///
/// `random_label` разводит точки одного source_id, попавшие в одну секунду:
/// иначе Cloud Monitoring отклоняет повторную запись в тот же интервал.
pub fn time_series_request(
    project_id: &str,
    metric_type: &str,
    source_id: &str,
    value: f64,
    at: DateTime<Utc>,
) -> Value {
    let ts = at.to_rfc3339_opts(SecondsFormat::Secs, true);
    let random_label = at.nanosecond() % 100;
    json!({
        "timeSeries": [{
            "metric": {
                "type": metric_type,
                "labels": {
                    "source_id": source_id,
                    "random_label": random_label.to_string(),
                },
            },
            "resource": {
                "type": "global",
                "labels": { "project_id": project_id },
            },
            "points": [{
                "interval": { "startTime": ts, "endTime": ts },
                "value": { "doubleValue": value },
            }],
        }],
    })
}

/// Cloud Monitoring reporter: три custom метрики на run
/// (invocation, message, duration) в этом порядке.
pub struct MonitoringReporter {
    client: Arc<SharedClient>,
    config: MonitoringConfig,
}

impl MonitoringReporter {
    pub fn new(client: Arc<SharedClient>, config: MonitoringConfig) -> Self {
        Self { client, config }
    }
}

impl MetricsReporter for MonitoringReporter {
    fn report(
        &self,
        source_id: &str,
        counters: RunCounters,
    ) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>> {
        let source_id = source_id.to_string();
        Box::pin(async move {
            if source_id.trim().is_empty() {
                return Err(PumpError::config("metrics source id not configured"));
            }
            let client = self.client.get().await?;
            let url = format!(
                "{}/v3/projects/{}/timeSeries",
                self.config.endpoint.trim_end_matches('/'),
                client.project_id()
            );
            let prefix = self.config.metric_prefix.trim_end_matches('/');

            let points = [
                ("invocation", counters.invocation as f64),
                ("message", counters.message as f64),
                ("duration", counters.duration),
            ];
            for (name, value) in points {
                let metric_type = format!("{prefix}/{name}");
                let body = time_series_request(client.project_id(), &metric_type, &source_id, value, Utc::now());
                let _: Value = client
                    .post_json(&url, &body)
                    .await
                    .map_err(|e| PumpError::io(format!("publish {metric_type}: {e}")))?;
                tracing::debug!(metric = %metric_type, source_id = %source_id, value, "metric published");
            }
            Ok(())
        })
    }
}
