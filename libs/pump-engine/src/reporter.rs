use std::future::Future;
use std::pin::Pin;

use pump_api::{MetricsReporter, PumpError, RunCounters};

/// MetricsReporter, который только пишет счётчики в лог.
/// Используется, когда внешний metrics backend не сконфигурирован.
pub struct LogReporter;

impl MetricsReporter for LogReporter {
    fn report(
        &self,
        source_id: &str,
        counters: RunCounters,
    ) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>> {
        tracing::info!(
            source_id = %source_id,
            invocation = counters.invocation,
            message = counters.message,
            duration = counters.duration,
            "run metrics"
        );
        Box::pin(async { Ok(()) })
    }
}
