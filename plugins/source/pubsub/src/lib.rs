use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use gcp_rest::{GcpClient, SharedClient};
use pump_api::{Message, MessageSource, PumpError, SourceFactory, Subscription};

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    /// Base URL API (или эмулятора).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// `maxMessages` одного pull'а.
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    /// Пауза после пустого pull'а, мс.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_endpoint() -> String {
    "https://pubsub.googleapis.com".into()
}

fn default_max_messages() -> u32 {
    100
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            max_messages: default_max_messages(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Wire format
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: WireMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AckRequest<'a> {
    ack_ids: &'a [String],
}

/// Полное имя подписки. Уже полный путь (`projects/…/subscriptions/…`)
/// используется как есть.
pub fn subscription_path(project_id: &str, subscription_id: &str) -> String {
    if subscription_id.starts_with("projects/") {
        subscription_id.to_string()
    } else {
        format!("projects/{project_id}/subscriptions/{subscription_id}")
    }
}

// ═══════════════════════════════════════════════════════════════
//  PubSubSource
// ═══════════════════════════════════════════════════════════════

/// Pub/Sub через REST pull API.
pub struct PubSubSource {
    client: GcpClient,
    config: PubSubConfig,
}

impl MessageSource for PubSubSource {
    fn subscribe(
        &self,
        subscription_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, PumpError>> + Send + '_>> {
        let subscription_id = subscription_id.trim().to_string();
        Box::pin(async move {
            if subscription_id.is_empty() {
                return Err(PumpError::config("empty subscription id"));
            }
            let path = subscription_path(self.client.project_id(), &subscription_id);
            let base = self.config.endpoint.trim_end_matches('/');
            let (ack_tx, ack_rx) = mpsc::unbounded_channel();
            tracing::debug!(subscription = %path, "pull subscription opened");
            Ok(Box::new(PubSubSubscription {
                client: self.client.clone(),
                pull_url: format!("{base}/v1/{path}:pull"),
                ack_url: format!("{base}/v1/{path}:acknowledge"),
                max_messages: self.config.max_messages.max(1),
                poll_interval: Duration::from_millis(self.config.poll_interval_ms),
                pending: VecDeque::new(),
                unsent_acks: Vec::new(),
                ack_tx,
                ack_rx,
            }) as Box<dyn Subscription>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  PubSubSubscription
// ═══════════════════════════════════════════════════════════════

struct Delivered {
    ack_id: String,
    message_id: String,
    payload: Vec<u8>,
}

/// Pull-подписка. Сообщения одного pull'а выдаются по одному; ack'и
/// копятся в канале и отправляются одним запросом перед следующим pull'ом
/// и при close. Неподтверждённые сообщения Pub/Sub доставит повторно.
///
/// `recv()` может быть брошен посреди запроса (select в consumer'е):
/// ack id остаются в `unsent_acks`, пока сервер не подтвердил запрос.
struct PubSubSubscription {
    client: GcpClient,
    pull_url: String,
    ack_url: String,
    max_messages: u32,
    poll_interval: Duration,
    pending: VecDeque<Delivered>,
    unsent_acks: Vec<String>,
    ack_tx: mpsc::UnboundedSender<String>,
    ack_rx: mpsc::UnboundedReceiver<String>,
}

impl PubSubSubscription {
    async fn flush_acks(&mut self) -> Result<(), PumpError> {
        while let Ok(id) = self.ack_rx.try_recv() {
            self.unsent_acks.push(id);
        }
        if self.unsent_acks.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = self.unsent_acks.len(), "acknowledging messages");
        let request = AckRequest {
            ack_ids: &self.unsent_acks,
        };
        let _: serde_json::Value = self.client.post_json(&self.ack_url, &request).await?;
        self.unsent_acks.clear();
        Ok(())
    }

    async fn pull(&mut self) -> Result<usize, PumpError> {
        let resp: PullResponse = self
            .client
            .post_json(&self.pull_url, &PullRequest { max_messages: self.max_messages })
            .await?;

        let count = resp.received_messages.len();
        for received in resp.received_messages {
            let payload = base64::engine::general_purpose::STANDARD
                .decode(received.message.data.as_bytes())
                .map_err(|e| {
                    PumpError::format_err(format!("message {}: bad base64 data: {e}", received.message.message_id))
                })?;
            self.pending.push_back(Delivered {
                ack_id: received.ack_id,
                message_id: received.message.message_id,
                payload,
            });
        }
        Ok(count)
    }
}

impl Subscription for PubSubSubscription {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Box<dyn Message>>, PumpError>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if let Some(next) = self.pending.pop_front() {
                    return Ok(Some(Box::new(PubSubMessage {
                        id: next.message_id,
                        ack_id: next.ack_id,
                        payload: next.payload,
                        acks: self.ack_tx.clone(),
                    }) as Box<dyn Message>));
                }

                self.flush_acks().await?;
                if self.pull().await? == 0 {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>> {
        Box::pin(async move {
            if !self.pending.is_empty() {
                tracing::debug!(count = self.pending.len(), "unreceived messages left for redelivery");
                self.pending.clear();
            }
            self.flush_acks().await
        })
    }
}

struct PubSubMessage {
    id: String,
    ack_id: String,
    payload: Vec<u8>,
    acks: mpsc::UnboundedSender<String>,
}

impl Message for PubSubMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn ack(self: Box<Self>) {
        let PubSubMessage { ack_id, acks, .. } = *self;
        // Подписка уже закрыта: сообщение уйдёт на повторную доставку
        let _ = acks.send(ack_id);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Factory
// ═══════════════════════════════════════════════════════════════

pub struct PubSubSourceFactory {
    client: Arc<SharedClient>,
    config: PubSubConfig,
}

impl PubSubSourceFactory {
    pub fn new(client: Arc<SharedClient>, config: PubSubConfig) -> Self {
        Self { client, config }
    }
}

impl SourceFactory for PubSubSourceFactory {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Arc<dyn MessageSource>, PumpError>> + Send + '_>> {
        Box::pin(async move {
            let client = self.client.get().await?;
            Ok(Arc::new(PubSubSource {
                client,
                config: self.config.clone(),
            }) as Arc<dyn MessageSource>)
        })
    }
}
