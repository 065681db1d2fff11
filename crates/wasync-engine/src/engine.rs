use std::sync::{Arc, OnceLock};

use tokio::sync::broadcast;
use tracing::info;

use wasync_core::{EventSource, SessionId};
use wasync_store::{Database, SessionStore};
use wasync_telemetry::MetricsRecorder;

use crate::config::EngineConfig;
use crate::emitter::{Emitter, Envelope};
use crate::error::EngineError;
use crate::registry::{HandlerRegistry, SessionHandlers};
use crate::sinks::{ChannelSink, LogSink, WebhookSink};

/// Shared wiring for every session: one database, one emitter, one metrics
/// recorder. Hands out per-session stores, handlers and registries.
pub struct SyncEngine {
    db: Database,
    config: EngineConfig,
    emitter: Arc<Emitter>,
    metrics: Arc<MetricsRecorder>,
    channel: OnceLock<Arc<ChannelSink>>,
}

impl SyncEngine {
    /// Open the configured database and build the engine around it.
    pub fn open(config: EngineConfig, metrics: Arc<MetricsRecorder>) -> Result<Self, EngineError> {
        config.validate()?;
        let db = Database::open(&config.db_path)?;
        Self::with_database(db, config, metrics)
    }

    pub fn with_database(
        db: Database,
        config: EngineConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let emitter = Arc::new(Emitter::new(metrics.clone()));
        if config.log_notifications {
            emitter.add_sink(Arc::new(LogSink));
        }
        if let Some(url) = &config.webhook_url {
            emitter.add_sink(Arc::new(WebhookSink::new(url.as_str(), config.webhook_timeout())?));
            info!(url = %url, "webhook notifications enabled");
        }

        info!(
            db = %db.path().display(),
            upsert_policy = ?config.upsert_policy,
            "sync engine ready"
        );
        Ok(Self {
            db,
            config,
            emitter,
            metrics,
            channel: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn store(&self, session_id: SessionId) -> SessionStore {
        SessionStore::new(self.db.clone(), session_id)
    }

    pub fn handlers(&self, session_id: SessionId) -> SessionHandlers {
        SessionHandlers::new(
            self.store(session_id),
            self.emitter.clone(),
            self.metrics.clone(),
            self.config.upsert_policy,
        )
    }

    pub fn event_source(&self) -> EventSource {
        EventSource::new()
    }

    /// A detached registry for one session. Call `listen` to attach it.
    pub fn registry(&self, session_id: SessionId, source: &EventSource) -> HandlerRegistry {
        HandlerRegistry::new(self.handlers(session_id), source.clone(), self.metrics.clone())
    }

    /// Receive every envelope the engine emits. The in-process channel sink
    /// is installed on first use.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Envelope> {
        self.channel
            .get_or_init(|| {
                let sink = Arc::new(ChannelSink::new(self.config.channel_capacity));
                self.emitter.add_sink(sink.clone());
                sink
            })
            .subscribe()
    }
}
