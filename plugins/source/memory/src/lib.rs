use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use pump_api::{Message, MessageSource, PumpError, SourceFactory, Subscription};

type Delivery = Result<(String, Vec<u8>), PumpError>;

// ═══════════════════════════════════════════════════════════════
//  MemorySource
// ═══════════════════════════════════════════════════════════════

/// In-memory message source с одной именованной подпиской.
///
/// Сообщения публикуются через [`MemoryPublisher`]; закрытие publisher'а
/// (drop) завершает подписку как natural exhaustion. Ack'и пишутся в лог,
/// доступный через [`MemorySource::acked`].
pub struct MemorySource {
    subscription_id: String,
    feed: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    acks: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Publisher-сторона MemorySource.
pub struct MemoryPublisher {
    tx: mpsc::UnboundedSender<Delivery>,
    next_id: AtomicU64,
}

impl MemorySource {
    pub fn new(subscription_id: impl Into<String>) -> (MemoryPublisher, Arc<MemorySource>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(MemorySource {
            subscription_id: subscription_id.into(),
            feed: Mutex::new(Some(rx)),
            acks: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        });
        let publisher = MemoryPublisher {
            tx,
            next_id: AtomicU64::new(1),
        };
        (publisher, source)
    }

    /// Id подтверждённых сообщений в порядке ack'ов.
    pub fn acked(&self) -> Vec<String> {
        self.acks.lock().map(|acks| acks.clone()).unwrap_or_default()
    }

    /// Была ли подписка освобождена через `close()`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl MemoryPublisher {
    /// Опубликовать payload. Возвращает id сообщения ("1", "2", ...).
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let _ = self.tx.send(Ok((id.clone(), payload.into())));
        id
    }

    /// Доставить подписчику transport error вместо сообщения.
    pub fn fail(&self, error: PumpError) {
        let _ = self.tx.send(Err(error));
    }
}

impl MessageSource for MemorySource {
    fn subscribe(
        &self,
        subscription_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, PumpError>> + Send + '_>> {
        let requested = subscription_id.to_string();
        Box::pin(async move {
            if requested != self.subscription_id {
                return Err(PumpError::config(format!("subscription '{requested}' not found")));
            }
            let rx = self
                .feed
                .lock()
                .map_err(|_| PumpError::io("subscription feed poisoned"))?
                .take()
                .ok_or_else(|| PumpError::config(format!("subscription '{requested}' already consumed")))?;
            Ok(Box::new(MemorySubscription {
                rx,
                acks: self.acks.clone(),
                closed: self.closed.clone(),
            }) as Box<dyn Subscription>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySubscription
// ═══════════════════════════════════════════════════════════════

struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
    acks: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl Subscription for MemorySubscription {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Box<dyn Message>>, PumpError>> + Send + '_>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(Ok((id, payload))) => Ok(Some(Box::new(MemoryMessage {
                    id,
                    payload,
                    acks: self.acks.clone(),
                }) as Box<dyn Message>)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>> {
        Box::pin(async move {
            self.rx.close();
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}

struct MemoryMessage {
    id: String,
    payload: Vec<u8>,
    acks: Arc<Mutex<Vec<String>>>,
}

impl Message for MemoryMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn ack(self: Box<Self>) {
        let MemoryMessage { id, acks, .. } = *self;
        if let Ok(mut log) = acks.lock() {
            log.push(id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySourceFactory
// ═══════════════════════════════════════════════════════════════

/// SourceFactory поверх готового MemorySource (или заведомо недоступного).
pub struct MemorySourceFactory {
    source: Option<Arc<MemorySource>>,
}

impl MemorySourceFactory {
    pub fn new(source: Arc<MemorySource>) -> Self {
        Self { source: Some(source) }
    }

    /// Фабрика, у которой connect всегда падает.
    pub fn unavailable() -> Self {
        Self { source: None }
    }
}

impl SourceFactory for MemorySourceFactory {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Arc<dyn MessageSource>, PumpError>> + Send + '_>> {
        Box::pin(async move {
            match &self.source {
                Some(source) => Ok(source.clone() as Arc<dyn MessageSource>),
                None => Err(PumpError::io("memory source unavailable")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_then_closes() {
        let (publisher, source) = MemorySource::new("sub");
        publisher.publish("a");
        publisher.publish("b");
        drop(publisher);

        let mut sub = source.subscribe("sub").await.unwrap();
        let first = sub.recv().await.unwrap().unwrap();
        assert_eq!(first.id(), "1");
        assert_eq!(first.payload(), b"a");
        first.ack();

        let second = sub.recv().await.unwrap().unwrap();
        assert_eq!(second.payload(), b"b");
        drop(second);

        assert!(sub.recv().await.unwrap().is_none());
        assert_eq!(source.acked(), vec!["1".to_string()]);

        sub.close().await.unwrap();
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn unknown_or_reused_subscription_fails() {
        let (_publisher, source) = MemorySource::new("sub");
        assert!(source.subscribe("other").await.is_err());
        assert!(source.subscribe("sub").await.is_ok());
        assert!(source.subscribe("sub").await.is_err());
    }

    #[tokio::test]
    async fn transport_error_is_delivered() {
        let (publisher, source) = MemorySource::new("sub");
        publisher.fail(PumpError::io("connection reset"));

        let mut sub = source.subscribe("sub").await.unwrap();
        let err = sub.recv().await.err().unwrap();
        assert_eq!(err.kind(), pump_api::ErrorKind::Io);
    }
}
