use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ═══════════════════════════════════════════════════════════════
//  Cancellation
// ═══════════════════════════════════════════════════════════════

/// Почему был отменён receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Stall watchdog: нет сообщений дольше stall_timeout.
    Stall,
    /// Run длится дольше max_duration.
    MaxDuration,
    /// Ошибка в handler'е (parse / sink).
    Failure,
    /// Внешняя отмена (shutdown сервера).
    Shutdown,
}

/// Как закончился успешный run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Source закрыл подписку.
    SourceClosed,
    Stall,
    MaxDuration,
    Shutdown,
}

// ═══════════════════════════════════════════════════════════════
//  RunState
// ═══════════════════════════════════════════════════════════════

/// Разделяемое состояние run'а между consumer'ом и watchdog'ом.
///
/// `last_message_ms` — atomic (мс от `started_at`), watchdog читает его
/// без lock'а. Счётчики consumer'а живут отдельно, под его critical section.
pub struct RunState {
    started_at: Instant,
    last_message_ms: AtomicU64,
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
}

impl RunState {
    /// `token` — токен этого run'а (обычно child от shutdown токена сервера).
    pub fn new(token: CancellationToken) -> Self {
        Self {
            started_at: Instant::now(),
            last_message_ms: AtomicU64::new(0),
            token,
            reason: OnceLock::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Отметить приход сообщения.
    pub fn touch(&self) {
        let ms = self.started_at.elapsed().as_millis() as u64;
        self.last_message_ms.store(ms, Ordering::Release);
    }

    /// Сколько прошло с последнего сообщения (или со старта run'а).
    pub fn idle(&self) -> Duration {
        let last = self.started_at + Duration::from_millis(self.last_message_ms.load(Ordering::Acquire));
        Instant::now().saturating_duration_since(last)
    }

    /// Запросить отмену. Идемпотентно: первая причина выигрывает,
    /// повторная отмена — no-op. Возвращает true для первого вызова.
    pub fn request_cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Причина отмены. Токен, отменённый снаружи (parent), без явной
    /// причины трактуется как Shutdown.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self.reason.get() {
            Some(reason) => Some(*reason),
            None if self.token.is_cancelled() => Some(CancelReason::Shutdown),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_tracks_last_touch() {
        let state = RunState::new(CancellationToken::new());
        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(state.idle(), Duration::from_secs(7));

        state.touch();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(state.idle(), Duration::from_secs(2));
        assert_eq!(state.elapsed(), Duration::from_secs(9));
    }

    #[test]
    fn first_cancel_reason_wins() {
        let state = RunState::new(CancellationToken::new());
        assert_eq!(state.cancel_reason(), None);

        assert!(state.request_cancel(CancelReason::MaxDuration));
        assert!(!state.request_cancel(CancelReason::Stall));
        assert!(state.token().is_cancelled());
        assert_eq!(state.cancel_reason(), Some(CancelReason::MaxDuration));
    }

    #[test]
    fn parent_cancel_is_shutdown() {
        let parent = CancellationToken::new();
        let state = RunState::new(parent.child_token());
        parent.cancel();
        assert!(state.token().is_cancelled());
        assert_eq!(state.cancel_reason(), Some(CancelReason::Shutdown));
    }
}
