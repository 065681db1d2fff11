use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use wasync_core::{EntityKind, Operation, SessionId};
use wasync_telemetry::MetricsRecorder;

use crate::sinks::NotificationSink;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub message: String,
}

/// Normalized outcome of one processed batch or item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event: String,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl Envelope {
    pub fn success(kind: EntityKind, op: Operation, session_id: &SessionId, data: Value) -> Self {
        Self {
            event: kind.event_name(op),
            session_id: session_id.clone(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(
        kind: EntityKind,
        op: Operation,
        session_id: &SessionId,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self {
            event: kind.event_name(op),
            session_id: session_id.clone(),
            data: None,
            error: Some(EnvelopeError {
                message: format!("An error occurred during {} {}: {}", kind.prefix(), op, detail),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

enum Job {
    Deliver(Envelope),
    Flush(oneshot::Sender<()>),
}

/// One sink plus the ordered queue that feeds it. The worker task starts on
/// the first enqueue so sinks can be registered outside a runtime.
struct SinkWorker {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
    idle: Mutex<Option<(Arc<dyn NotificationSink>, mpsc::UnboundedReceiver<Job>)>>,
}

impl SinkWorker {
    fn new(sink: Arc<dyn NotificationSink>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            name: sink.name().to_string(),
            tx,
            idle: Mutex::new(Some((sink, rx))),
        })
    }

    fn enqueue(&self, envelope: Envelope, metrics: &Arc<MetricsRecorder>) {
        if let Some((sink, rx)) = self.idle.lock().take() {
            tokio::spawn(run_sink(sink, rx, metrics.clone()));
        }
        let labels = [("sink", self.name.as_str())];
        metrics.gauge_add("notify.queued", &labels, 1);
        if let Err(mpsc::error::SendError(job)) = self.tx.send(Job::Deliver(envelope)) {
            metrics.gauge_add("notify.queued", &labels, -1);
            metrics.counter_inc("notify.delivery_failures", &labels, 1);
            if let Job::Deliver(envelope) = job {
                error!(
                    sink = %self.name,
                    event = %envelope.event,
                    session_id = %envelope.session_id,
                    "notification worker gone, envelope dropped"
                );
            }
        }
    }

    /// Resolves once everything queued before the call has been delivered.
    async fn flush(&self) {
        if self.idle.lock().is_some() {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.tx.send(Job::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn run_sink(
    sink: Arc<dyn NotificationSink>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    metrics: Arc<MetricsRecorder>,
) {
    while let Some(job) = rx.recv().await {
        let envelope = match job {
            Job::Deliver(envelope) => envelope,
            Job::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        let labels = [("sink", sink.name())];
        metrics.gauge_add("notify.queued", &labels, -1);
        match sink.deliver(&envelope).await {
            Ok(()) => metrics.counter_inc("notify.delivered", &labels, 1),
            Err(e) => {
                warn!(
                    sink = sink.name(),
                    event = %envelope.event,
                    session_id = %envelope.session_id,
                    error = %e,
                    "notification delivery failed"
                );
                metrics.counter_inc("notify.delivery_failures", &labels, 1);
            }
        }
    }
}

/// Delivers envelopes to every global sink and to the sinks registered for
/// the envelope's session.
///
/// `emit` only enqueues: each sink drains its own queue in order on a
/// background task, so a slow sink delays neither the caller nor the other
/// sinks. Delivery failures are logged and counted, never returned.
pub struct Emitter {
    global: RwLock<Vec<Arc<SinkWorker>>>,
    per_session: DashMap<SessionId, Vec<Arc<SinkWorker>>>,
    metrics: Arc<MetricsRecorder>,
}

impl Emitter {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            global: RwLock::new(Vec::new()),
            per_session: DashMap::new(),
            metrics,
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.global.write().push(SinkWorker::new(sink));
    }

    pub fn add_session_sink(&self, session_id: SessionId, sink: Arc<dyn NotificationSink>) {
        self.per_session
            .entry(session_id)
            .or_default()
            .push(SinkWorker::new(sink));
    }

    /// Drop every sink registered for one session. Envelopes already queued
    /// for them are still delivered.
    pub fn remove_session_sinks(&self, session_id: &SessionId) -> usize {
        self.per_session
            .remove(session_id)
            .map_or(0, |(_, sinks)| sinks.len())
    }

    pub fn sink_count(&self, session_id: &SessionId) -> usize {
        self.global.read().len() + self.per_session.get(session_id).map_or(0, |s| s.len())
    }

    /// Queue an envelope for every matching sink. Must run inside a tokio
    /// runtime.
    pub fn emit(&self, envelope: Envelope) {
        let mut workers = self.global.read().clone();
        if let Some(extra) = self.per_session.get(&envelope.session_id) {
            workers.extend(extra.iter().cloned());
        }
        for worker in workers {
            worker.enqueue(envelope.clone(), &self.metrics);
        }
    }

    /// Wait until every sink has worked through what was queued so far.
    pub async fn flush(&self) {
        let mut workers = self.global.read().clone();
        for entry in self.per_session.iter() {
            workers.extend(entry.value().iter().cloned());
        }
        join_all(workers.iter().map(|w| w.flush())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{ChannelSink, SinkError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _envelope: &Envelope) -> Result<(), SinkError> {
            Err(SinkError::Status(503))
        }
    }

    struct StalledSink;

    #[async_trait]
    impl NotificationSink for StalledSink {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn deliver(&self, _envelope: &Envelope) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn session() -> SessionId {
        SessionId::from_raw("s1")
    }

    #[test]
    fn envelope_wire_shape() {
        let ok = Envelope::success(EntityKind::Chat, Operation::Set, &session(), json!({"chats": []}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"event": "chats.set", "sessionId": "s1", "data": {"chats": []}})
        );

        let failed = Envelope::failure(EntityKind::Contact, Operation::Upsert, &session(), "disk full");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "event": "contacts.upsert",
                "sessionId": "s1",
                "error": {"message": "An error occurred during contacts upsert: disk full"}
            })
        );
        assert!(failed.is_error());
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let metrics = Arc::new(MetricsRecorder::new());
        let emitter = Emitter::new(metrics.clone());
        let channel = Arc::new(ChannelSink::new(8));
        let mut rx = channel.subscribe();
        emitter.add_sink(Arc::new(FailingSink));
        emitter.add_sink(channel);

        emitter.emit(Envelope::success(EntityKind::Chat, Operation::Delete, &session(), json!({})));
        emitter.flush().await;

        assert_eq!(rx.recv().await.unwrap().event, "chats.delete");
        assert_eq!(metrics.counter_get("notify.delivery_failures", &[("sink", "failing")]), 1);
        assert_eq!(metrics.counter_get("notify.delivered", &[("sink", "channel")]), 1);
    }

    #[tokio::test]
    async fn session_sinks_only_see_their_session() {
        let emitter = Emitter::new(Arc::new(MetricsRecorder::new()));
        let channel = Arc::new(ChannelSink::new(8));
        let mut rx = channel.subscribe();
        emitter.add_session_sink(session(), channel);
        assert_eq!(emitter.sink_count(&session()), 1);

        let other = SessionId::from_raw("s2");
        emitter.emit(Envelope::success(EntityKind::Chat, Operation::Delete, &other, json!({})));
        emitter.emit(Envelope::success(EntityKind::Chat, Operation::Update, &session(), json!({})));
        emitter.flush().await;

        assert_eq!(rx.recv().await.unwrap().event, "chats.update");
        assert!(rx.try_recv().is_err());

        assert_eq!(emitter.remove_session_sinks(&session()), 1);
        assert_eq!(emitter.sink_count(&session()), 0);
    }

    #[tokio::test]
    async fn stalled_sink_neither_blocks_emit_nor_other_sinks() {
        let metrics = Arc::new(MetricsRecorder::new());
        let emitter = Emitter::new(metrics.clone());
        let channel = Arc::new(ChannelSink::new(64));
        let mut rx = channel.subscribe();
        emitter.add_sink(Arc::new(StalledSink));
        emitter.add_sink(channel);

        for _ in 0..10 {
            emitter.emit(Envelope::success(EntityKind::Chat, Operation::Upsert, &session(), json!({})));
        }

        for _ in 0..10 {
            let envelope = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("channel sink starved by stalled sink")
                .unwrap();
            assert_eq!(envelope.event, "chats.upsert");
        }
        assert!(metrics.gauge_get("notify.queued", &[("sink", "stalled")]) >= 9);
    }

    #[tokio::test]
    async fn flush_without_emits_returns_immediately() {
        let emitter = Emitter::new(Arc::new(MetricsRecorder::new()));
        emitter.add_sink(Arc::new(StalledSink));
        tokio::time::timeout(Duration::from_secs(1), emitter.flush())
            .await
            .unwrap();
    }
}
