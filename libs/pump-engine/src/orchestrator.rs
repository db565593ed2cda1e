use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pump_api::{MetricsReporter, RunCounters, SinkFactory, SourceFactory};

use crate::buffer::BatchBuffer;
use crate::config::RunConfig;
use crate::consumer::SubscriptionConsumer;
use crate::error::RunError;
use crate::state::{RunState, Termination};

/// Итог успешного run'а.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunReport {
    pub record_count: u64,
    pub batches_flushed: u64,
    pub elapsed: Duration,
    pub termination: Termination,
}

/// Orchestrator: config → source + sink → consumer → drain → metrics.
///
/// Коллабораторы подключаются заново на каждый run и освобождаются
/// при его завершении; сам `Pump` не хранит состояния между run'ами.
pub struct Pump {
    sources: Arc<dyn SourceFactory>,
    sinks: Arc<dyn SinkFactory>,
    metrics: Arc<dyn MetricsReporter>,
}

impl Pump {
    pub fn new(
        sources: Arc<dyn SourceFactory>,
        sinks: Arc<dyn SinkFactory>,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self { sources, sinks, metrics }
    }

    /// Entry point: subscription → dataset.table с параметрами по умолчанию.
    /// Возвращает количество обработанных записей.
    pub async fn run_pump(
        &self,
        subscription_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<u64, RunError> {
        let config = RunConfig::new(subscription_id, dataset_id, table_id);
        self.run(&config).await.map(|report| report.record_count)
    }

    pub async fn run(&self, config: &RunConfig) -> Result<RunReport, RunError> {
        self.run_until(config, &CancellationToken::new()).await
    }

    /// Run с внешним shutdown токеном. Отмена `shutdown` — штатный drain.
    pub async fn run_until(
        &self,
        config: &RunConfig,
        shutdown: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        config.validate().map_err(RunError::Configuration)?;

        let state = Arc::new(RunState::new(shutdown.child_token()));
        let subscription_id = config.subscription_id.as_str();

        tracing::info!(subscription = %subscription_id, "creating source client");
        let source = self.sources.connect().await.map_err(|e| RunError::SourceConnection {
            subscription: subscription_id.to_string(),
            source: e,
        })?;

        tracing::info!(dataset = %config.dataset_id, table = %config.table_id, "creating sink client");
        let sink = self
            .sinks
            .open(&config.dataset_id, &config.table_id)
            .await
            .map_err(|e| RunError::SinkConnection {
                dataset: config.dataset_id.clone(),
                table: config.table_id.clone(),
                source: e,
            })?;

        tracing::info!(subscription = %subscription_id, "creating subscription");
        let subscription = source.subscribe(subscription_id).await.map_err(|e| RunError::SourceConnection {
            subscription: subscription_id.to_string(),
            source: e,
        })?;

        let buffer = BatchBuffer::new(sink, format!("{}.{}", config.dataset_id, config.table_id));
        let consumer = SubscriptionConsumer::new(config.clone(), buffer, state.clone());
        let consumed = consumer.run(subscription).await.inspect_err(|e| {
            tracing::error!(subscription = %subscription_id, stage = e.stage(), kind = %e.kind(), error = %e, "pump run failed");
        })?;

        let elapsed = state.elapsed();
        self.metrics
            .report(subscription_id, RunCounters::new(consumed.total_processed, elapsed))
            .await
            .map_err(|e| RunError::Metrics {
                subscription: subscription_id.to_string(),
                source: e,
            })?;

        tracing::info!(
            subscription = %subscription_id,
            count = consumed.total_processed,
            elapsed_secs = elapsed.as_secs_f64(),
            "inserted records"
        );

        Ok(RunReport {
            record_count: consumed.total_processed,
            batches_flushed: consumed.batches_flushed,
            elapsed,
            termination: consumed.termination,
        })
    }
}
