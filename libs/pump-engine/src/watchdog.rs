use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::state::{CancelReason, RunState};

/// Фоновый таймер, отменяющий run при отсутствии сообщений дольше
/// `stall_timeout`.
///
/// Срабатывает не более одного раза: после отмены run'а таймер
/// останавливается навсегда. Никогда не трогает BatchBuffer.
pub struct StallWatchdog {
    stop: CancellationToken,
    handle: JoinHandle<bool>,
}

impl StallWatchdog {
    /// Запустить watchdog. Первый тик — через один `period` после старта.
    pub fn start(state: Arc<RunState>, stall_timeout: Duration, period: Duration) -> Self {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(watch(state, stall_timeout, period, stop.clone()));
        Self { stop, handle }
    }

    /// Остановить watchdog и дождаться завершения таймера.
    /// Возвращает true, если watchdog успел отменить run.
    pub async fn stop(self) -> bool {
        self.stop.cancel();
        match self.handle.await {
            Ok(fired) => fired,
            Err(e) => {
                tracing::error!(error = %e, "stall watchdog task failed");
                false
            }
        }
    }
}

async fn watch(
    state: Arc<RunState>,
    stall_timeout: Duration,
    period: Duration,
    stop: CancellationToken,
) -> bool {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let idle = state.idle();
                if idle > stall_timeout {
                    tracing::info!(idle_secs = idle.as_secs(), "max stall time reached");
                    state.request_cancel(CancelReason::Stall);
                    return true;
                }
            }
            _ = stop.cancelled() => return false,
        }
    }
}
