use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::PumpError;

// ════════════════════════════════════════════════════════════════
//  Message Source Traits
// ════════════════════════════════════════════════════════════════

/// Фабрика клиента message source'а.
///
/// Вызывается orchestrator'ом один раз на run, после валидации
/// RunConfig. Ошибка здесь — SourceConnection, никакой работы ещё не сделано.
pub trait SourceFactory: Send + Sync {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Arc<dyn MessageSource>, PumpError>> + Send + '_>>;
}

/// Publish/subscribe endpoint, из которого pump вытягивает сообщения.
pub trait MessageSource: Send + Sync {
    /// Открыть подписку по id. Подписка — scoped ресурс одного run'а.
    fn subscribe(
        &self,
        subscription_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, PumpError>> + Send + '_>>;
}

/// Активная подписка — асинхронный поток сообщений.
///
/// `recv()` должен быть cancel-safe в смысле `tokio::select!`: consumer
/// бросает future при отмене run'а. Сообщение, не успевшее вернуться,
/// не подтверждено и будет доставлено повторно.
pub trait Subscription: Send {
    /// Следующее сообщение.
    ///
    /// - `Ok(Some(msg))` — доставлено сообщение;
    /// - `Ok(None)` — подписка закрыта (natural exhaustion);
    /// - `Err(e)` — transport error, run завершается с ошибкой.
    #[allow(clippy::type_complexity)]
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Box<dyn Message>>, PumpError>> + Send + '_>>;

    /// Освободить подписку (отправить отложенные ack'и, закрыть stream).
    /// Вызывается на всех путях выхода run'а.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>>;
}

/// Одно доставленное сообщение.
pub trait Message: Send {
    /// Идентификатор сообщения на стороне source'а.
    fn id(&self) -> &str;

    /// Сырые байты payload'а.
    fn payload(&self) -> &[u8];

    /// Подтвердить обработку. Сообщение, дропнутое без `ack`,
    /// считается необработанным и будет доставлено повторно.
    fn ack(self: Box<Self>);
}
