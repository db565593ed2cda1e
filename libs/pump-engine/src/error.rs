use pump_api::{ErrorKind, PumpError};

/// Терминальная ошибка run'а. Каждый вариант — отдельная стадия,
/// с контекстом subscription / sink для вызывающей стороны.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("config: {0}")]
    Configuration(String),

    #[error("source client [{subscription}]: {source}")]
    SourceConnection { subscription: String, source: PumpError },

    #[error("sink client [{dataset}.{table}]: {source}")]
    SinkConnection { dataset: String, table: String, source: PumpError },

    #[error("subscription [{subscription}] receive: {source}")]
    Receive { subscription: String, source: PumpError },

    #[error("subscription [{subscription}] process error after {processed} records: {source}")]
    Parse { subscription: String, processed: u64, source: PumpError },

    #[error("sink insert [{subscription} -> {dataset}.{table}]: {source}")]
    Sink { subscription: String, dataset: String, table: String, source: PumpError },

    #[error("metrics [{subscription}]: {source}")]
    Metrics { subscription: String, source: PumpError },
}

impl RunError {
    /// Стадия, на которой упал run (для логов и ответов trigger'а).
    pub fn stage(&self) -> &'static str {
        match self {
            RunError::Configuration(_) => "config",
            RunError::SourceConnection { .. } => "source",
            RunError::SinkConnection { .. } => "sink-connect",
            RunError::Receive { .. } => "receive",
            RunError::Parse { .. } => "parse",
            RunError::Sink { .. } => "sink",
            RunError::Metrics { .. } => "metrics",
        }
    }

    /// Класс сбоя: `Config` для невалидного RunConfig, иначе kind
    /// ошибки коллаборатора.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Configuration(_) => ErrorKind::Config,
            RunError::SourceConnection { source, .. }
            | RunError::SinkConnection { source, .. }
            | RunError::Receive { source, .. }
            | RunError::Parse { source, .. }
            | RunError::Sink { source, .. }
            | RunError::Metrics { source, .. } => source.kind(),
        }
    }
}
