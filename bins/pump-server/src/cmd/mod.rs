pub mod once;
pub mod serve;

use std::sync::Arc;

use gcp_rest::SharedClient;
use metrics_monitoring::MonitoringReporter;
use pump_api::MetricsReporter;
use pump_engine::{LogReporter, Pump};
use sink_bigquery::BigQuerySinkFactory;
use source_pubsub::PubSubSourceFactory;

use crate::config::{Effective, MetricsBackend};

/// Pub/Sub → BigQuery pump с общим GCP клиентом (собирается при первом run'е).
pub fn build_pump(eff: &Effective) -> Pump {
    let client = Arc::new(SharedClient::new(eff.gcp.clone()));

    let metrics: Arc<dyn MetricsReporter> = match eff.metrics {
        MetricsBackend::Monitoring => Arc::new(MonitoringReporter::new(client.clone(), eff.monitoring.clone())),
        MetricsBackend::Log => Arc::new(LogReporter),
    };

    Pump::new(
        Arc::new(PubSubSourceFactory::new(client.clone(), eff.pubsub.clone())),
        Arc::new(BigQuerySinkFactory::new(client, eff.bigquery.clone())),
        metrics,
    )
}

/// Ctrl+C или SIGTERM (Cloud Run останавливает инстанс через SIGTERM).
pub async fn shutdown_signal() -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
