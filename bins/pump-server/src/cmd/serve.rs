use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pump_trigger::{AppState, TriggerConfig};

use crate::config::{Effective, ServeArgs};
use crate::error::ServerError;

/// Сколько ждать in-flight run (финальный drain) после сигнала остановки.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("pump-server starting");

    // --- Config ---
    let (eff, settings) = Effective::serve(&args)?;
    eff.run.validate().map_err(|detail| ServerError::Config { context: "pump", detail })?;
    if settings.token.is_empty() {
        tracing::warn!("TOKEN is empty: webhook accepts requests without token");
    }
    tracing::info!(
        subscription = %eff.run.subscription_id,
        table = %format!("{}.{}", eff.run.dataset_id, eff.run.table_id),
        release = %settings.release,
        "pump configured"
    );

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    let state = AppState::new(
        Arc::new(super::build_pump(&eff)),
        eff.run.clone(),
        TriggerConfig {
            release: settings.release,
            access_token: settings.token,
            debug: settings.debug,
        },
        token.clone(),
    );

    let mut api_handle = tokio::spawn(pump_trigger::run(settings.port, state, token.clone()));

    tokio::select! {
        signal = super::shutdown_signal() => signal?,
        finished = &mut api_handle => {
            // Сервер упал сам (bind, accept)
            return match finished {
                Ok(result) => result.map_err(ServerError::Serve),
                Err(e) => Err(ServerError::Serve(format!("api task: {e}"))),
            };
        }
    }
    tracing::info!("shutting down...");

    // Signal webhook and in-flight run to stop; run drains its buffer
    token.cancel();

    match tokio::time::timeout(DRAIN_GRACE, &mut api_handle).await {
        Ok(Ok(result)) => result.map_err(ServerError::Serve)?,
        Ok(Err(e)) => return Err(ServerError::Serve(format!("api task: {e}"))),
        Err(_) => {
            tracing::warn!(grace_secs = DRAIN_GRACE.as_secs(), "drain timed out, aborting");
            api_handle.abort();
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
