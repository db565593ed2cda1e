use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(900);
pub const DEFAULT_WATCHDOG_PERIOD: Duration = Duration::from_secs(5);

/// Параметры одного run'а. Неизменяемы на время run'а,
/// передаются явно — никакого process-wide состояния.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Подписка, из которой читаются сообщения.
    pub subscription_id: String,
    /// Dataset sink'а.
    pub dataset_id: String,
    /// Таблица sink'а.
    pub table_id: String,
    /// Сколько сообщений накопить перед промежуточным flush'ем.
    pub batch_size: usize,
    /// Максимальная пауза между сообщениями до самоостановки run'а.
    pub stall_timeout: Duration,
    /// Жёсткий потолок длительности run'а.
    pub max_duration: Duration,
    /// Период тика stall watchdog'а.
    pub watchdog_period: Duration,
}

impl RunConfig {
    pub fn new(
        subscription_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            max_duration: DEFAULT_MAX_DURATION,
            watchdog_period: DEFAULT_WATCHDOG_PERIOD,
        }
    }

    /// Validate: все идентификаторы заданы, все пороги ненулевые.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("subscription_id", &self.subscription_id),
            ("dataset_id", &self.dataset_id),
            ("table_id", &self.table_id),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{name} must not be empty"));
            }
        }
        if self.batch_size == 0 {
            return Err("batch_size must be positive".into());
        }
        for (name, value) in [
            ("stall_timeout", self.stall_timeout),
            ("max_duration", self.max_duration),
            ("watchdog_period", self.watchdog_period),
        ] {
            if value.is_zero() {
                return Err(format!("{name} must be positive"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = RunConfig::new("sub", "ds", "tbl");
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.stall_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_duration, Duration::from_secs(900));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn blank_identifiers_rejected() {
        let cfg = RunConfig::new("sub", "  ", "tbl");
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("dataset_id"), "{err}");

        let cfg = RunConfig::new("", "ds", "tbl");
        assert!(cfg.validate().unwrap_err().contains("subscription_id"));
    }

    #[test]
    fn zero_thresholds_rejected() {
        let base = RunConfig::new("sub", "ds", "tbl");

        let cfg = RunConfig { batch_size: 0, ..base.clone() };
        assert!(cfg.validate().unwrap_err().contains("batch_size"));

        let cfg = RunConfig { stall_timeout: Duration::ZERO, ..base.clone() };
        assert!(cfg.validate().unwrap_err().contains("stall_timeout"));

        let cfg = RunConfig { max_duration: Duration::ZERO, ..base };
        assert!(cfg.validate().unwrap_err().contains("max_duration"));
    }
}
