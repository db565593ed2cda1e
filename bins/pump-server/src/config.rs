use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use gcp_rest::GcpConfig;
use metrics_monitoring::MonitoringConfig;
use pump_engine::RunConfig;
use pump_engine::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_DURATION, DEFAULT_STALL_TIMEOUT, DEFAULT_WATCHDOG_PERIOD};
use sink_bigquery::BigQueryConfig;
use source_pubsub::PubSubConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "pump-server", about = "Pub/Sub → BigQuery pump")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Webhook сервер: run pump'а по alerting notification
    Serve(ServeArgs),
    /// Один run pump'а, печатает количество записей
    Run(PumpArgs),
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct PumpArgs {
    /// Путь к config.toml (отсутствующий файл по умолчанию не ошибка)
    #[arg(long, default_value = "config.toml", env = "PUMP_CONFIG")]
    pub config: String,

    /// GCP project (иначе GOOGLE_CLOUD_PROJECT / project из credentials)
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    /// Подписка Pub/Sub
    #[arg(long = "sub", env = "SUB")]
    pub subscription: Option<String>,

    /// BigQuery dataset
    #[arg(long, env = "DATASET")]
    pub dataset: Option<String>,

    /// BigQuery table
    #[arg(long, env = "TABLE")]
    pub table: Option<String>,

    /// Сообщений на промежуточный flush
    #[arg(long, env = "BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Stall timeout, секунды
    #[arg(long, env = "MAX_STALL")]
    pub max_stall: Option<u64>,

    /// Максимальная длительность run'а, секунды
    #[arg(long, env = "MAX_DURATION")]
    pub max_duration: Option<u64>,

    /// Только логировать метрики (без Cloud Monitoring)
    #[arg(long, env = "LOG_METRICS")]
    pub log_metrics: bool,
}

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    #[command(flatten)]
    pub pump: PumpArgs,

    /// HTTP порт
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Версия, отдаваемая на GET /
    #[arg(long, env = "RELEASE")]
    pub release: Option<String>,

    /// Access token webhook'а (?token=)
    #[arg(long, env = "TOKEN")]
    pub token: Option<String>,

    /// Логировать тела notification
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackend {
    #[default]
    Monitoring,
    Log,
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub port: Option<u16>,
    pub release: Option<String>,
    pub debug: Option<bool>,
    pub token: Option<String>,
    pub subscription: Option<String>,
    pub dataset: Option<String>,
    pub table: Option<String>,
    pub batch_size: Option<usize>,
    pub max_stall: Option<u64>,
    pub max_duration: Option<u64>,
    pub watchdog_period: Option<u64>,
    pub metrics: Option<MetricsBackend>,
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub bigquery: BigQueryConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

pub fn load_config(path: &str) -> Result<Config, ServerError> {
    let content = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
        context: "read",
        detail: format!("'{path}': {e}"),
    })?;
    toml::from_str(&content).map_err(|e| ServerError::Config {
        context: "parse",
        detail: format!("'{path}': {e}"),
    })
}

/// config.toml, если есть. Отсутствующий файл — пустой конфиг,
/// нечитаемый или невалидный — ошибка.
fn load_or_default(path: &str) -> Result<Config, ServerError> {
    match load_config(path) {
        Ok(c) => Ok(c),
        Err(e) => {
            if std::path::Path::new(path).exists() {
                return Err(e);
            }
            Ok(Config::default())
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Effective — merged config
// ═══════════════════════════════════════════════════════════════

/// Итоговая конфигурация run'а после мержа: config.toml < env/CLI
pub struct Effective {
    pub run: RunConfig,
    pub metrics: MetricsBackend,
    pub gcp: GcpConfig,
    pub pubsub: PubSubConfig,
    pub bigquery: BigQueryConfig,
    pub monitoring: MonitoringConfig,
}

/// Параметры webhook'а после мержа.
pub struct ServeSettings {
    pub port: u16,
    pub release: String,
    pub token: String,
    pub debug: bool,
}

fn trimmed(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

impl Effective {
    pub fn new(args: &PumpArgs) -> Result<Self, ServerError> {
        Ok(Self::merge(args, load_or_default(&args.config)?))
    }

    pub fn serve(args: &ServeArgs) -> Result<(Self, ServeSettings), ServerError> {
        let cfg = load_or_default(&args.pump.config)?;
        let settings = ServeSettings::merge(args, &cfg);
        Ok((Self::merge(&args.pump, cfg), settings))
    }

    pub fn merge(args: &PumpArgs, cfg: Config) -> Self {
        let secs = |v: Option<u64>, default: Duration| v.map(Duration::from_secs).unwrap_or(default);

        let run = RunConfig {
            subscription_id: trimmed(args.subscription.clone().or(cfg.subscription)),
            dataset_id: trimmed(args.dataset.clone().or(cfg.dataset)),
            table_id: trimmed(args.table.clone().or(cfg.table)),
            batch_size: args.batch_size.or(cfg.batch_size).unwrap_or(DEFAULT_BATCH_SIZE),
            stall_timeout: secs(args.max_stall.or(cfg.max_stall), DEFAULT_STALL_TIMEOUT),
            max_duration: secs(args.max_duration.or(cfg.max_duration), DEFAULT_MAX_DURATION),
            watchdog_period: secs(cfg.watchdog_period, DEFAULT_WATCHDOG_PERIOD),
        };

        let metrics = if args.log_metrics {
            MetricsBackend::Log
        } else {
            cfg.metrics.unwrap_or_default()
        };

        let mut gcp = cfg.gcp;
        if let Some(project) = &args.project_id {
            gcp.project_id = Some(project.clone());
        }

        Self {
            run,
            metrics,
            gcp,
            pubsub: cfg.pubsub,
            bigquery: cfg.bigquery,
            monitoring: cfg.monitoring,
        }
    }
}

impl ServeSettings {
    fn merge(args: &ServeArgs, cfg: &Config) -> Self {
        Self {
            port: args.port.or(cfg.port).unwrap_or(8080),
            release: args
                .release
                .clone()
                .or_else(|| cfg.release.clone())
                .unwrap_or_else(|| "v0.0.1-default".into()),
            token: trimmed(args.token.clone().or_else(|| cfg.token.clone())),
            debug: args.debug || cfg.debug.unwrap_or(false),
        }
    }
}
