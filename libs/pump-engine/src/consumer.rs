use std::sync::Arc;

use tokio::sync::Mutex;

use pump_api::{Message, PumpError, Subscription};

use crate::buffer::BatchBuffer;
use crate::config::RunConfig;
use crate::error::RunError;
use crate::state::{CancelReason, RunState, Termination};
use crate::watchdog::StallWatchdog;

// ═══════════════════════════════════════════════════════════════
//  Consumer State
// ═══════════════════════════════════════════════════════════════

/// Фазы consumer'а: Idle → Receiving → {Draining, Cancelled, Failed} → Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsumerState {
    Idle,
    Receiving,
    /// Receive loop отменён (stall / max duration / shutdown), переходит в Draining.
    Cancelled,
    /// Финальный flush остатка.
    Draining,
    Failed,
    Stopped,
}

/// Ошибка, зафиксированная handler'ом внутри critical section.
enum HandlerFailure {
    Parse(PumpError),
    Sink(PumpError),
}

/// Счётчики run'а, изменяемые только под critical section handler'а.
#[derive(Default)]
struct Tally {
    total_processed: u64,
    pending_since_flush: usize,
    batches_flushed: u64,
    terminal_error: Option<HandlerFailure>,
}

/// Итог успешного consumer'а.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    pub total_processed: u64,
    /// Все flush'и, включая финальный drain (если был непустым).
    pub batches_flushed: u64,
    pub termination: Termination,
}

/// Как закончился receive loop.
enum LoopEnd {
    Closed,
    Cancelled,
    Transport(PumpError),
}

// ═══════════════════════════════════════════════════════════════
//  SubscriptionConsumer
// ═══════════════════════════════════════════════════════════════

/// Receive loop: subscription.recv() → handler → BatchBuffer → sink.
///
/// Каждое сообщение обрабатывается целиком под одной critical section
/// (`tally`), отмена наблюдается только между сообщениями.
pub struct SubscriptionConsumer {
    config: RunConfig,
    buffer: BatchBuffer,
    state: Arc<RunState>,
    tally: Mutex<Tally>,
    phase: ConsumerState,
}

impl SubscriptionConsumer {
    pub fn new(config: RunConfig, buffer: BatchBuffer, state: Arc<RunState>) -> Self {
        Self {
            config,
            buffer,
            state,
            tally: Mutex::new(Tally::default()),
            phase: ConsumerState::Idle,
        }
    }

    fn transition(&mut self, next: ConsumerState) {
        tracing::debug!(
            subscription = %self.config.subscription_id,
            from = ?self.phase,
            to = ?next,
            "consumer state"
        );
        self.phase = next;
    }

    /// Прогнать подписку до конца. Подписка закрывается на всех путях выхода.
    pub async fn run(mut self, mut subscription: Box<dyn Subscription>) -> Result<ConsumerReport, RunError> {
        let watchdog = StallWatchdog::start(
            self.state.clone(),
            self.config.stall_timeout,
            self.config.watchdog_period,
        );
        self.transition(ConsumerState::Receiving);

        let token = self.state.token().clone();
        let end = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break LoopEnd::Cancelled,
                next = subscription.recv() => match next {
                    Ok(Some(message)) => self.handle(message).await,
                    Ok(None) => break LoopEnd::Closed,
                    Err(e) => break LoopEnd::Transport(e),
                },
            }
        };

        if watchdog.stop().await {
            tracing::debug!(subscription = %self.config.subscription_id, "receive loop stopped by stall watchdog");
        }
        if let Err(e) = subscription.close().await {
            tracing::warn!(subscription = %self.config.subscription_id, error = ?e, "subscription close error");
        }
        drop(subscription);

        let result = self.finish(end).await;
        self.transition(ConsumerState::Stopped);
        result
    }

    async fn finish(&mut self, end: LoopEnd) -> Result<ConsumerReport, RunError> {
        let subscription = self.config.subscription_id.clone();
        let mut tally = std::mem::take(self.tally.get_mut());

        let closed = match end {
            LoopEnd::Transport(source) => {
                self.transition(ConsumerState::Failed);
                return Err(RunError::Receive { subscription, source });
            }
            LoopEnd::Closed => true,
            LoopEnd::Cancelled => false,
        };

        match tally.terminal_error.take() {
            Some(HandlerFailure::Parse(source)) => {
                self.transition(ConsumerState::Failed);
                return Err(RunError::Parse {
                    subscription,
                    processed: tally.total_processed,
                    source,
                });
            }
            Some(HandlerFailure::Sink(source)) => {
                self.transition(ConsumerState::Failed);
                return Err(self.sink_error(source));
            }
            None => {}
        }

        let termination = if closed {
            Termination::SourceClosed
        } else {
            self.transition(ConsumerState::Cancelled);
            match self.state.cancel_reason() {
                Some(CancelReason::MaxDuration) => Termination::MaxDuration,
                Some(CancelReason::Stall) => Termination::Stall,
                _ => Termination::Shutdown,
            }
        };

        // Остаток ниже порога batch_size
        self.transition(ConsumerState::Draining);
        match self.buffer.flush().await {
            Ok(0) => {}
            Ok(_) => tally.batches_flushed += 1,
            Err(source) => {
                self.transition(ConsumerState::Failed);
                return Err(self.sink_error(source));
            }
        }

        tracing::info!(
            subscription = %subscription,
            processed = tally.total_processed,
            batches = tally.batches_flushed,
            termination = ?termination,
            "subscription drained"
        );

        Ok(ConsumerReport {
            total_processed: tally.total_processed,
            batches_flushed: tally.batches_flushed,
            termination,
        })
    }

    /// Обработать одно сообщение. Всё тело — под critical section.
    async fn handle(&self, message: Box<dyn Message>) {
        let mut tally = self.tally.lock().await;
        self.state.touch();

        // После терминальной ошибки сообщения не обрабатываются и не подтверждаются
        if tally.terminal_error.is_some() {
            return;
        }

        if let Err(e) = self.buffer.append(message.payload()).await {
            tracing::error!(
                subscription = %self.config.subscription_id,
                message_id = %message.id(),
                error = %e,
                "error on data append"
            );
            tally.terminal_error = Some(HandlerFailure::Parse(e));
            self.state.request_cancel(CancelReason::Failure);
            return;
        }

        // Ack до durable flush'а: at-most-once в пределах batch window
        message.ack();

        tally.total_processed += 1;
        tally.pending_since_flush += 1;

        if tally.pending_since_flush == self.config.batch_size {
            tracing::info!(subscription = %self.config.subscription_id, "batch size reached");
            tally.pending_since_flush = 0;
            match self.buffer.flush().await {
                Ok(_) => tally.batches_flushed += 1,
                Err(e) => {
                    tally.terminal_error = Some(HandlerFailure::Sink(e));
                    self.state.request_cancel(CancelReason::Failure);
                    return;
                }
            }
        }

        if self.state.elapsed() > self.config.max_duration {
            tracing::info!(subscription = %self.config.subscription_id, "max job exec time reached");
            self.state.request_cancel(CancelReason::MaxDuration);
        }
    }

    fn sink_error(&self, source: PumpError) -> RunError {
        RunError::Sink {
            subscription: self.config.subscription_id.clone(),
            dataset: self.config.dataset_id.clone(),
            table: self.config.table_id.clone(),
            source,
        }
    }
}
