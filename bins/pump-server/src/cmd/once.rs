use tokio_util::sync::CancellationToken;

use crate::config::{Effective, PumpArgs};
use crate::error::ServerError;

/// Один run: подписка → dataset.table, затем выход. Ctrl+C — штатный drain.
pub async fn run(args: PumpArgs) -> Result<(), ServerError> {
    let eff = Effective::new(&args)?;
    tracing::info!(
        subscription = %eff.run.subscription_id,
        dataset = %eff.run.dataset_id,
        table = %eff.run.table_id,
        batch_size = eff.run.batch_size,
        "pump run starting"
    );

    let pump = super::build_pump(&eff);
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if super::shutdown_signal().await.is_ok() {
            tracing::info!("interrupted, draining...");
            signal_token.cancel();
        }
    });

    let report = pump.run_until(&eff.run, &shutdown).await?;
    tracing::info!(
        count = report.record_count,
        batches = report.batches_flushed,
        termination = ?report.termination,
        elapsed_secs = report.elapsed.as_secs_f64(),
        "pump run finished"
    );
    println!("{}", report.record_count);
    Ok(())
}
