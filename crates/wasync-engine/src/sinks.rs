use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use crate::emitter::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("no subscriber left on the channel")]
    Closed,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound destination for notification envelopes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short label used in logs and metric labels.
    fn name(&self) -> &str;

    async fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError>;
}

/// Writes every envelope to the log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError> {
        let body = serde_json::to_string(envelope)?;
        info!(
            event = %envelope.event,
            session_id = %envelope.session_id,
            failed = envelope.error.is_some(),
            envelope = %body,
            "notification"
        );
        Ok(())
    }
}

/// In-process fan-out over a broadcast channel, the attach point for
/// socket-style subscribers.
pub struct ChannelSink {
    tx: broadcast::Sender<Envelope>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError> {
        self.tx
            .send(envelope.clone())
            .map(|_| ())
            .map_err(|_| SinkError::Closed)
    }
}

/// JSON POST of each envelope to a fixed URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        Ok(())
    }
}
