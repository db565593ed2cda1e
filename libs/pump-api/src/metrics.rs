use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::PumpError;

/// Агрегированные счётчики одного run'а.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunCounters {
    /// Всегда 1 — один вызов pump'а.
    pub invocation: u64,
    /// Количество обработанных (buffered + acked) сообщений.
    pub message: u64,
    /// Длительность run'а в секундах.
    pub duration: f64,
}

impl RunCounters {
    pub fn new(message: u64, duration: std::time::Duration) -> Self {
        Self {
            invocation: 1,
            message,
            duration: duration.as_secs_f64(),
        }
    }
}

/// Получатель метрик run'а. Wire format — забота реализации.
pub trait MetricsReporter: Send + Sync {
    fn report(
        &self,
        source_id: &str,
        counters: RunCounters,
    ) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>>;
}
