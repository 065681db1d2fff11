use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const LOG_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        session_id TEXT,
        entity TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);";

/// A persisted WARN+ log event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub entity: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    /// Substring match on the event target.
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub entity: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(LOG_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &PendingRecord) {
        let conn = self.conn.lock();
        // A logging layer has nowhere to report its own write failures.
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, session_id, entity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.session_id,
                record.entity,
            ],
        );
    }

    /// Newest first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, session_id, entity FROM logs WHERE 1=1",
        );
        let mut params: Vec<String> = Vec::new();
        let mut filter = |clause: &str, value: String| {
            params.push(value);
            sql.push_str(&format!(" AND {clause} ?{}", params.len()));
        };

        if let Some(level) = &q.level {
            filter("level =", level.to_uppercase());
        }
        if let Some(target) = &q.target {
            filter("target LIKE", format!("%{target}%"));
        }
        if let Some(session_id) = &q.session_id {
            filter("session_id =", session_id.clone());
        }
        if let Some(entity) = &q.entity {
            filter("entity =", entity.clone());
        }
        if let Some(since) = &q.since {
            filter("timestamp >=", since.clone());
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                session_id: row.get(6)?,
                entity: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct PendingRecord {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    session_id: Option<String>,
    entity: Option<String>,
}

/// Layer persisting WARN+ events to a [`SqliteLogSink`].
///
/// `session_id` and `entity` are taken from the event itself, falling back to
/// the nearest enclosing span that recorded them.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    scope: ScopeFields,
}

/// Correlation fields carried on spans.
#[derive(Clone, Default)]
struct ScopeFields {
    session_id: Option<String>,
    entity: Option<String>,
}

impl ScopeFields {
    fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.entity.is_none()
    }

    fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.entity.is_some()
    }

    fn fill_from(&mut self, other: &ScopeFields) {
        if self.session_id.is_none() {
            self.session_id.clone_from(&other.session_id);
        }
        if self.entity.is_none() {
            self.entity.clone_from(&other.entity);
        }
    }
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "session_id" => self.scope.session_id = Some(value),
            "entity" => self.scope.entity = Some(value),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}").trim_matches('"').to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if !visitor.scope.is_complete() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    if let Some(fields) = span.extensions().get::<ScopeFields>() {
                        visitor.scope.fill_from(fields);
                    }
                }
            }
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(&PendingRecord {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            session_id: visitor.scope.session_id,
            entity: visitor.scope.entity,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if visitor.scope.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture<F: FnOnce()>(f: F) -> Arc<SqliteLogSink> {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, f);
        sink
    }

    #[test]
    fn info_events_are_not_persisted() {
        let sink = capture(|| {
            tracing::info!("just chatter");
            tracing::debug!("noise");
        });
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[test]
    fn warn_event_fields_are_captured() {
        let sink = capture(|| {
            tracing::warn!(session_id = "s1", entity = "chats", count = 3_u64, "delivery failed");
        });
        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, "WARN");
        assert_eq!(record.message, "delivery failed");
        assert_eq!(record.session_id.as_deref(), Some("s1"));
        assert_eq!(record.entity.as_deref(), Some("chats"));
        let fields: serde_json::Value =
            serde_json::from_str(record.fields.as_deref().unwrap()).unwrap();
        assert_eq!(fields["count"], 3);
    }

    #[test]
    fn correlation_fields_come_from_enclosing_spans() {
        let sink = capture(|| {
            let outer = tracing::info_span!("session", session_id = "s9");
            let _outer = outer.enter();
            let inner = tracing::info_span!("handler", entity = "messages");
            let _inner = inner.enter();
            tracing::error!("write failed");
        });
        let records = sink
            .query(&LogQuery {
                session_id: Some("s9".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity.as_deref(), Some("messages"));
        assert_eq!(records[0].level, "ERROR");
    }

    #[test]
    fn query_filters_and_limits() {
        let sink = capture(|| {
            for i in 0..5 {
                tracing::warn!(session_id = "s1", entity = "chats", "chat warning {i}");
            }
            tracing::error!(session_id = "s2", entity = "contacts", "contact error");
        });

        let latest = sink
            .query(&LogQuery {
                entity: Some("chats".into()),
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].message, "chat warning 4");

        let errors = sink
            .query(&LogQuery {
                level: Some("error".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].session_id.as_deref(), Some("s2"));

        let by_target = sink
            .query(&LogQuery {
                target: Some("logging".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_target.len(), 6);

        let future = sink
            .query(&LogQuery {
                since: Some("2999-01-01T00:00:00Z".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(future.is_empty());
    }

    #[test]
    fn file_sink_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("wasync-logs-{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("logs.db");
        let sink = SqliteLogSink::open(&path).unwrap();
        assert_eq!(sink.count().unwrap(), 0);
        assert!(path.exists());
        drop(sink);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
