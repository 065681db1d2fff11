use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use wasync_core::events::{MessagesDelete, ProtocolEvent};
use wasync_core::{EntityKind, EventSource, SessionId};
use wasync_store::SessionStore;
use wasync_telemetry::MetricsRecorder;

use crate::config::UpsertPolicy;
use crate::emitter::Emitter;
use crate::entities::{Chats, Contacts, Groups, Messages, SessionData};
use crate::handler::EntityHandler;

/// The five entity handlers of one session.
pub struct SessionHandlers {
    pub chats: EntityHandler<Chats>,
    pub contacts: EntityHandler<Contacts>,
    pub groups: EntityHandler<Groups>,
    pub messages: EntityHandler<Messages>,
    pub session: EntityHandler<SessionData>,
}

impl SessionHandlers {
    pub fn new(
        store: SessionStore,
        emitter: Arc<Emitter>,
        metrics: Arc<MetricsRecorder>,
        policy: UpsertPolicy,
    ) -> Self {
        Self {
            chats: EntityHandler::new(store.clone(), emitter.clone(), metrics.clone(), policy),
            contacts: EntityHandler::new(store.clone(), emitter.clone(), metrics.clone(), policy),
            groups: EntityHandler::new(store.clone(), emitter.clone(), metrics.clone(), policy),
            messages: EntityHandler::new(store.clone(), emitter.clone(), metrics.clone(), policy),
            session: EntityHandler::new(store, emitter, metrics, policy),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.chats.session_id()
    }

    /// Run every handler the event addresses, one kind after the other.
    pub async fn handle(&self, event: &ProtocolEvent) {
        for kind in event.entity_kinds() {
            self.dispatch(*kind, event).await;
        }
    }

    /// Run the part of `event` that belongs to the `kind` handler.
    pub async fn dispatch(&self, kind: EntityKind, event: &ProtocolEvent) {
        match (kind, event) {
            (EntityKind::Chat, ProtocolEvent::HistorySet(h)) => self.chats.set(&h.chats, h.is_latest).await,
            (EntityKind::Contact, ProtocolEvent::HistorySet(h)) => {
                self.contacts.set(&h.contacts, h.is_latest).await
            }
            (EntityKind::Message, ProtocolEvent::HistorySet(h)) => {
                self.messages.set(&h.messages, h.is_latest).await
            }
            (_, ProtocolEvent::HistorySet(_)) => {}

            (_, ProtocolEvent::ChatsUpsert(items)) => self.chats.upsert(items).await,
            (_, ProtocolEvent::ChatsUpdate(items)) => self.chats.update(items).await,
            (_, ProtocolEvent::ChatsDelete(ids)) => self.chats.delete(ids).await,

            (_, ProtocolEvent::ContactsUpsert(items)) => self.contacts.upsert(items).await,
            (_, ProtocolEvent::ContactsUpdate(items)) => self.contacts.update(items).await,
            (_, ProtocolEvent::ContactsDelete(ids)) => self.contacts.delete(ids).await,

            (_, ProtocolEvent::GroupsSet(g)) => self.groups.set(&g.groups, g.is_latest).await,
            (_, ProtocolEvent::GroupsUpsert(items)) => self.groups.upsert(items).await,
            (_, ProtocolEvent::GroupsUpdate(items)) => self.groups.update(items).await,
            (_, ProtocolEvent::GroupsDelete(ids)) => self.groups.delete(ids).await,
            (_, ProtocolEvent::GroupParticipantsUpdate(change)) => {
                self.groups.update_participants(change).await
            }

            (_, ProtocolEvent::MessagesUpsert(upsert)) => self.messages.upsert(&upsert.messages).await,
            (_, ProtocolEvent::MessagesUpdate(updates)) => self.messages.update(updates).await,
            (_, ProtocolEvent::MessagesDelete(MessagesDelete::Keys { keys })) => {
                self.messages.delete_keys(keys).await
            }
            (_, ProtocolEvent::MessagesDelete(MessagesDelete::Chat { jid, all })) => {
                if *all {
                    self.messages.delete_chat(jid).await;
                } else {
                    info!(session_id = %self.session_id(), jid, "chat delete without all flag ignored");
                }
            }

            (_, ProtocolEvent::SessionUpsert(items)) => self.session.upsert(items).await,
            (_, ProtocolEvent::SessionUpdate(items)) => self.session.update(items).await,
            (_, ProtocolEvent::SessionDelete(ids)) => self.session.delete(ids).await,
        }
    }
}

struct Listener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Attaches one session's handlers to its event source.
///
/// `listen` and `unlisten` are idempotent. While listening, a dispatcher task
/// fans events out to one ordered lane per entity kind: events for one kind
/// are handled in arrival order, different kinds never wait on each other.
pub struct HandlerRegistry {
    handlers: Arc<SessionHandlers>,
    source: EventSource,
    metrics: Arc<MetricsRecorder>,
    listener: Mutex<Option<Listener>>,
}

impl HandlerRegistry {
    pub fn new(handlers: SessionHandlers, source: EventSource, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            handlers: Arc::new(handlers),
            source,
            metrics,
            listener: Mutex::new(None),
        }
    }

    pub fn handlers(&self) -> &Arc<SessionHandlers> {
        &self.handlers
    }

    pub fn session_id(&self) -> &SessionId {
        self.handlers.session_id()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Subscribe to the event source. Returns false if already listening.
    pub fn listen(&self) -> bool {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            debug!(session_id = %self.session_id(), "registry already listening");
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(
            self.handlers.clone(),
            self.source.subscribe(),
            cancel.clone(),
            self.metrics.clone(),
        ));
        *listener = Some(Listener { cancel, task });

        self.metrics.gauge_add("registry.listening", &[], 1);
        info!(session_id = %self.session_id(), "registry listening");
        true
    }

    /// Stop consuming events. Events already published are still handled
    /// before this returns. Returns false if not listening.
    pub async fn unlisten(&self) -> bool {
        let Some(Listener { cancel, task }) = self.listener.lock().take() else {
            return false;
        };
        cancel.cancel();
        if let Err(e) = task.await {
            error!(session_id = %self.session_id(), error = %e, "dispatcher task failed");
        }

        self.metrics.gauge_add("registry.listening", &[], -1);
        info!(session_id = %self.session_id(), "registry detached");
        true
    }
}

type Lanes = HashMap<EntityKind, mpsc::UnboundedSender<Arc<ProtocolEvent>>>;

async fn run_dispatcher(
    handlers: Arc<SessionHandlers>,
    mut rx: mpsc::UnboundedReceiver<ProtocolEvent>,
    cancel: CancellationToken,
    metrics: Arc<MetricsRecorder>,
) {
    let session_id = handlers.session_id().clone();
    let mut lanes = Lanes::new();
    let mut workers = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
        let (tx, mut lane) = mpsc::unbounded_channel::<Arc<ProtocolEvent>>();
        let handlers = handlers.clone();
        workers.push(tokio::spawn(async move {
            while let Some(event) = lane.recv().await {
                handlers.dispatch(kind, &event).await;
            }
        }));
        lanes.insert(kind, tx);
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(event) => route(&session_id, &metrics, &lanes, event),
                None => {
                    info!(session_id = %session_id, "event source closed");
                    break;
                }
            },
        }
    }

    // Hand over whatever was published before the stop.
    rx.close();
    while let Ok(event) = rx.try_recv() {
        route(&session_id, &metrics, &lanes, event);
    }

    drop(lanes);
    for result in join_all(workers).await {
        if let Err(e) = result {
            error!(session_id = %session_id, error = %e, "lane worker failed");
        }
    }
}

fn route(session_id: &SessionId, metrics: &MetricsRecorder, lanes: &Lanes, event: ProtocolEvent) {
    debug!(event = event.event_name(), "dispatching");
    let event = Arc::new(event);
    for kind in event.entity_kinds() {
        let Some(lane) = lanes.get(kind) else {
            continue;
        };
        if lane.send(event.clone()).is_err() {
            error!(
                session_id = %session_id,
                entity = kind.prefix(),
                event = event.event_name(),
                "lane worker gone, event dropped"
            );
            metrics.counter_inc("dispatch.dropped", &[("entity", kind.prefix())], 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::ChannelSink;
    use serde_json::json;
    use wasync_core::payloads::ChatPayload;
    use wasync_store::{ChatRow, Database};

    fn registry(source: &EventSource) -> (HandlerRegistry, SessionStore, Arc<MetricsRecorder>) {
        let store = SessionStore::new(Database::in_memory().unwrap(), SessionId::from_raw("s1"));
        let metrics = Arc::new(MetricsRecorder::new());
        let emitter = Arc::new(Emitter::new(metrics.clone()));
        let handlers = SessionHandlers::new(store.clone(), emitter, metrics.clone(), UpsertPolicy::AwaitAll);
        (HandlerRegistry::new(handlers, source.clone(), metrics.clone()), store, metrics)
    }

    fn chat(id: &str) -> ChatPayload {
        ChatPayload {
            id: id.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn listen_and_unlisten_are_idempotent() {
        let source = EventSource::new();
        let (registry, _, metrics) = registry(&source);

        assert!(registry.listen());
        assert!(!registry.listen());
        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(metrics.gauge_get("registry.listening", &[]), 1);

        assert!(registry.unlisten().await);
        assert!(!registry.unlisten().await);
        assert!(!registry.is_listening());
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(metrics.gauge_get("registry.listening", &[]), 0);
    }

    #[tokio::test]
    async fn unlisten_drains_published_events() {
        let source = EventSource::new();
        let (registry, store, _) = registry(&source);
        registry.listen();

        source.publish(ProtocolEvent::ChatsUpsert(vec![chat("c1")]));
        source.publish(ProtocolEvent::ChatsUpdate(vec![ChatPayload {
            unread_count: Some(json!(3)),
            ..chat("c1")
        }]));
        source.publish(ProtocolEvent::ChatsDelete(vec!["c1".into()]));
        source.publish(ProtocolEvent::ChatsUpsert(vec![chat("c2")]));
        registry.unlisten().await;

        let ids: Vec<String> = store.list::<ChatRow>(10, 0).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c2"]);
    }

    #[tokio::test]
    async fn burst_before_dispatcher_runs_is_handled_in_full() {
        let source = EventSource::new();
        let (registry, store, metrics) = registry(&source);
        registry.listen();

        for i in 0..2_000 {
            source.publish(ProtocolEvent::ChatsUpsert(vec![chat(&format!("c{i}"))]));
        }
        registry.unlisten().await;

        assert_eq!(store.count::<ChatRow>().unwrap(), 2_000);
        assert_eq!(metrics.counter_get("sync.rows_upserted", &[("entity", "chats")]), 2_000);
    }

    #[test]
    fn send_to_dead_lane_is_counted() {
        let metrics = MetricsRecorder::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let lanes = Lanes::from([(EntityKind::Chat, tx)]);

        route(
            &SessionId::from_raw("s1"),
            &metrics,
            &lanes,
            ProtocolEvent::ChatsDelete(vec!["c1".into()]),
        );
        assert_eq!(metrics.counter_get("dispatch.dropped", &[("entity", "chats")]), 1);
    }

    #[tokio::test]
    async fn events_after_unlisten_are_ignored() {
        let source = EventSource::new();
        let (registry, store, _) = registry(&source);
        registry.listen();
        registry.unlisten().await;

        assert_eq!(source.publish(ProtocolEvent::ChatsUpsert(vec![chat("c1")])), 0);
        assert_eq!(store.count::<ChatRow>().unwrap(), 0);
    }

    #[tokio::test]
    async fn history_set_reaches_each_kind() {
        let store = SessionStore::new(Database::in_memory().unwrap(), SessionId::from_raw("s1"));
        let metrics = Arc::new(MetricsRecorder::new());
        let emitter = Arc::new(Emitter::new(metrics.clone()));
        let channel = Arc::new(ChannelSink::new(16));
        let mut rx = channel.subscribe();
        emitter.add_sink(channel);
        let handlers = SessionHandlers::new(store, emitter.clone(), metrics, UpsertPolicy::AwaitAll);

        let event: ProtocolEvent = serde_json::from_value(json!({
            "event": "messaging-history.set",
            "data": {"chats": [{"id": "c1"}], "contacts": [{"id": "a"}], "isLatest": false}
        }))
        .unwrap();
        handlers.handle(&event).await;
        emitter.flush().await;

        let mut names = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            names.push(envelope.event);
        }
        assert_eq!(names, vec!["chats.set", "contacts.set", "messages.set"]);
    }
}
