use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

/// A persisted metric value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: i64,
    pub timestamp: String,
    pub name: String,
    pub value: i64,
    pub labels: Option<String>,
    pub kind: MetricKind,
}

#[derive(Clone, Debug, Default)]
pub struct MetricsQuery {
    pub name: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// Current value of one counter series.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CounterValue {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: u64,
}

/// Metric series identity: name plus labels sorted by key.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort();
        Self {
            name: name.to_string(),
            labels: sorted,
        }
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }

    fn labels_json(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        serde_json::to_string(&self.label_map()).ok()
    }
}

/// Thread-safe counters and gauges with optional SQLite snapshots.
///
/// Recording never fails; persistence is only touched by [`snapshot`],
/// [`query`] and [`prune`].
///
/// [`snapshot`]: MetricsRecorder::snapshot
/// [`query`]: MetricsRecorder::query
/// [`prune`]: MetricsRecorder::prune
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<SeriesKey, AtomicU64>>,
    gauges: RwLock<HashMap<SeriesKey, AtomicI64>>,
    db: Option<Mutex<Connection>>,
}

impl MetricsRecorder {
    /// In-memory only; `snapshot` is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshots(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS metrics_snapshots (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 name TEXT NOT NULL,
                 value INTEGER NOT NULL,
                 labels TEXT,
                 kind TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_metrics_name ON metrics_snapshots(name, timestamp);",
        )?;
        Ok(Self {
            db: Some(Mutex::new(conn)),
            ..Self::default()
        })
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = SeriesKey::new(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            c.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = SeriesKey::new(name, labels);
        self.counters
            .read()
            .get(&key)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: i64) {
        self.with_gauge(name, labels, |g| g.store(value, Ordering::Relaxed));
    }

    pub fn gauge_add(&self, name: &str, labels: &[(&str, &str)], delta: i64) {
        self.with_gauge(name, labels, |g| {
            g.fetch_add(delta, Ordering::Relaxed);
        });
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> i64 {
        let key = SeriesKey::new(name, labels);
        self.gauges
            .read()
            .get(&key)
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    fn with_gauge(&self, name: &str, labels: &[(&str, &str)], f: impl FnOnce(&AtomicI64)) {
        let key = SeriesKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            f(g);
            return;
        }
        f(self.gauges.write().entry(key).or_default());
    }

    /// All counter series, sorted by name then labels.
    pub fn counters(&self) -> Vec<CounterValue> {
        let mut values: Vec<CounterValue> = self
            .counters
            .read()
            .iter()
            .map(|(key, c)| CounterValue {
                name: key.name.clone(),
                labels: key.label_map(),
                value: c.load(Ordering::Relaxed),
            })
            .collect();
        values.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        values
    }

    /// Persist every current series. Returns the number of rows written.
    pub fn snapshot(&self) -> Result<usize, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let now = Utc::now().to_rfc3339();
        let mut conn = db.lock();
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO metrics_snapshots (timestamp, name, value, labels, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (key, c) in self.counters.read().iter() {
                let value = i64::try_from(c.load(Ordering::Relaxed)).unwrap_or(i64::MAX);
                stmt.execute(rusqlite::params![
                    now,
                    key.name,
                    value,
                    key.labels_json(),
                    MetricKind::Counter.as_str()
                ])?;
                written += 1;
            }
            for (key, g) in self.gauges.read().iter() {
                stmt.execute(rusqlite::params![
                    now,
                    key.name,
                    g.load(Ordering::Relaxed),
                    key.labels_json(),
                    MetricKind::Gauge.as_str()
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Newest first. Empty when snapshots are disabled.
    pub fn query(&self, q: &MetricsQuery) -> Result<Vec<MetricsSnapshot>, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(Vec::new());
        };
        let conn = db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, timestamp, name, value, labels, kind FROM metrics_snapshots
             WHERE (?1 IS NULL OR name = ?1) AND (?2 IS NULL OR timestamp >= ?2)
             ORDER BY id DESC LIMIT {}",
            q.limit.unwrap_or(100)
        ))?;
        let rows = stmt.query_map(rusqlite::params![q.name, q.since], |row| {
            let kind: String = row.get(5)?;
            Ok(MetricsSnapshot {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                name: row.get(2)?,
                value: row.get(3)?,
                labels: row.get(4)?,
                kind: if kind == "gauge" {
                    MetricKind::Gauge
                } else {
                    MetricKind::Counter
                },
            })
        })?;
        rows.collect()
    }

    /// Drop snapshots older than `retention_days`.
    pub fn prune(&self, retention_days: u32) -> Result<usize, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let cutoff = Utc::now()
            .checked_sub_signed(chrono::Duration::days(i64::from(retention_days)))
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        db.lock().execute(
            "DELETE FROM metrics_snapshots WHERE timestamp <= ?1",
            rusqlite::params![cutoff],
        )
    }
}
