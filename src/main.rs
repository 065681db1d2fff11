use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use wasync_core::{EntityKind, ProtocolEvent, SessionId};
use wasync_engine::{EngineConfig, SyncEngine, UpsertPolicy};
use wasync_store::{ChatRow, ContactRow, GroupRow, MessageRow, Record, SessionDataRow, SessionStore};
use wasync_telemetry::{init_telemetry, LogQuery, MetricsQuery, MetricsRecorder, TelemetryConfig};

/// Reconcile messaging-protocol events into per-session SQLite storage.
#[derive(Parser)]
#[command(name = "wasync", version)]
struct Cli {
    /// JSON engine config. Flags below override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "WASYNC_DB")]
    db: Option<PathBuf>,

    /// POST every notification envelope to this URL.
    #[arg(long, global = true, env = "WASYNC_WEBHOOK_URL")]
    webhook_url: Option<String>,

    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    #[arg(long, global = true)]
    json_logs: bool,

    /// Also persist WARN+ log records to this SQLite file.
    #[arg(long, global = true)]
    log_db: Option<PathBuf>,

    /// Persist a metrics snapshot to this SQLite file after a replay.
    #[arg(long, global = true)]
    metrics_db: Option<PathBuf>,

    /// await-all or first-settled
    #[arg(long, global = true)]
    upsert_policy: Option<UpsertPolicy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed newline-delimited protocol events into one session.
    Replay {
        #[arg(long)]
        session: SessionId,
        /// Input file; stdin when absent.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print stored rows of one entity as JSON.
    Dump {
        #[arg(long)]
        session: SessionId,
        /// chats, contacts, groups, messages or session
        #[arg(long)]
        entity: EntityKind,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Print persisted WARN+ log records, newest first. Needs --log-db.
    Logs(LogArgs),
    /// Print persisted metric snapshots, newest first. Needs --metrics-db.
    Metrics {
        #[arg(long)]
        name: Option<String>,
        /// RFC 3339 lower bound on the snapshot time.
        #[arg(long)]
        since: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        /// Delete snapshots older than this many days first.
        #[arg(long)]
        prune_days: Option<u32>,
    },
}

#[derive(Args)]
struct LogArgs {
    #[arg(long)]
    session: Option<SessionId>,
    #[arg(long)]
    entity: Option<EntityKind>,
    /// warn or error
    #[arg(long)]
    level: Option<String>,
    /// Substring of the event target, e.g. wasync_engine::handler
    #[arg(long)]
    target: Option<String>,
    /// RFC 3339 lower bound on the record time.
    #[arg(long)]
    since: Option<String>,
    #[arg(long, default_value_t = 100)]
    limit: u32,
}

impl LogArgs {
    fn query(&self) -> LogQuery {
        LogQuery {
            level: self.level.clone(),
            target: self.target.clone(),
            session_id: self.session.as_ref().map(|s| s.as_str().to_string()),
            entity: self.entity.map(|kind| kind.prefix().to_string()),
            since: self.since.clone(),
            limit: Some(self.limit),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.json_logs,
        log_db_path: cli.log_db.clone(),
        ..Default::default()
    })?;

    let metrics = Arc::new(match &cli.metrics_db {
        Some(path) => MetricsRecorder::with_snapshots(path)
            .with_context(|| format!("opening metrics database {}", path.display()))?,
        None => MetricsRecorder::new(),
    });

    let output = match &cli.command {
        Command::Replay { session, file } => {
            let engine = SyncEngine::open(engine_config(&cli)?, metrics)?;
            let summary = match file {
                Some(path) => {
                    let file = tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("opening {}", path.display()))?;
                    replay(&engine, session.clone(), BufReader::new(file)).await?
                }
                None => replay(&engine, session.clone(), BufReader::new(tokio::io::stdin())).await?,
            };
            let persisted = engine.metrics().snapshot()?;
            if persisted > 0 {
                info!(series = persisted, "metrics snapshot written");
            }
            summary
        }
        Command::Dump {
            session,
            entity,
            limit,
            offset,
        } => {
            let engine = SyncEngine::open(engine_config(&cli)?, metrics)?;
            let store = engine.store(session.clone());
            match entity {
                EntityKind::Chat => dump::<ChatRow>(&store, *limit, *offset)?,
                EntityKind::Contact => dump::<ContactRow>(&store, *limit, *offset)?,
                EntityKind::Group => dump::<GroupRow>(&store, *limit, *offset)?,
                EntityKind::Message => dump::<MessageRow>(&store, *limit, *offset)?,
                EntityKind::Session => dump::<SessionDataRow>(&store, *limit, *offset)?,
            }
        }
        Command::Logs(args) => {
            let sink = telemetry.logs().context("the logs command needs --log-db")?;
            serde_json::to_value(sink.query(&args.query())?)?
        }
        Command::Metrics {
            name,
            since,
            limit,
            prune_days,
        } => {
            ensure!(cli.metrics_db.is_some(), "the metrics command needs --metrics-db");
            let query = MetricsQuery {
                name: name.clone(),
                since: since.clone(),
                limit: Some(*limit),
            };
            metrics_report(&metrics, &query, *prune_days)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(url) = &cli.webhook_url {
        config.webhook_url = Some(url.clone());
    }
    if let Some(policy) = cli.upsert_policy {
        config.upsert_policy = policy;
    }
    config.validate()?;
    Ok(config)
}

async fn replay<R>(engine: &SyncEngine, session: SessionId, input: R) -> Result<Value>
where
    R: AsyncBufRead + Unpin,
{
    let source = engine.event_source();
    let registry = engine.registry(session.clone(), &source);
    registry.listen();

    let mut published = 0usize;
    let mut skipped = 0usize;
    let mut lines = input.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ProtocolEvent>(line) {
            Ok(event) => {
                source.publish(event);
                published += 1;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed event");
                skipped += 1;
            }
        }
    }

    registry.unlisten().await;
    engine.emitter().flush().await;
    info!(session_id = %session, published, skipped, "replay finished");

    Ok(json!({
        "session": session,
        "events": published,
        "skipped": skipped,
        "counters": engine.metrics().counters(),
    }))
}

fn dump<R: Record>(store: &SessionStore, limit: u32, offset: u32) -> Result<Value> {
    let rows = store.list::<R>(limit, offset)?;
    Ok(serde_json::to_value(rows)?)
}

fn metrics_report(metrics: &MetricsRecorder, query: &MetricsQuery, prune_days: Option<u32>) -> Result<Value> {
    let pruned = match prune_days {
        Some(days) => metrics.prune(days)?,
        None => 0,
    };
    if pruned > 0 {
        info!(pruned, "old metric snapshots deleted");
    }
    Ok(json!({
        "pruned": pruned,
        "snapshots": metrics.query(query)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasync_store::Database;

    fn engine() -> SyncEngine {
        SyncEngine::with_database(
            Database::in_memory().unwrap(),
            EngineConfig {
                log_notifications: false,
                ..Default::default()
            },
            Arc::new(MetricsRecorder::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn replay_skips_malformed_lines() {
        let engine = engine();
        let input = concat!(
            "{\"event\":\"chats.upsert\",\"data\":[{\"id\":\"c1\",\"unreadCount\":4}]}\n",
            "not json\n",
            "\n",
            "{\"event\":\"chats.update\",\"data\":[{\"id\":\"c1\",\"unreadCount\":2}]}\n",
        );
        let summary = replay(&engine, SessionId::from_raw("s1"), input.as_bytes())
            .await
            .unwrap();

        assert_eq!(summary["events"], 2);
        assert_eq!(summary["skipped"], 1);
        let row: ChatRow = engine.store(SessionId::from_raw("s1")).find("c1").unwrap().unwrap();
        assert_eq!(row.unread_count, Some(6));

        let dumped = dump::<ChatRow>(&engine.store(SessionId::from_raw("s1")), 10, 0).unwrap();
        assert_eq!(dumped[0]["id"], "c1");
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "wasync",
            "--db",
            "/tmp/other.db",
            "--upsert-policy",
            "first-settled",
            "dump",
            "--session",
            "s1",
            "--entity",
            "chats",
        ]);
        let config = engine_config(&cli).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.upsert_policy, UpsertPolicy::FirstSettled);
        assert!(matches!(
            cli.command,
            Command::Dump { entity: EntityKind::Chat, limit: 100, .. }
        ));
    }

    #[test]
    fn log_flags_become_a_query() {
        let cli = Cli::parse_from([
            "wasync",
            "logs",
            "--session",
            "s1",
            "--entity",
            "messages",
            "--level",
            "error",
            "--limit",
            "5",
        ]);
        let Command::Logs(args) = &cli.command else {
            panic!("expected logs command");
        };
        let query = args.query();
        assert_eq!(query.session_id.as_deref(), Some("s1"));
        assert_eq!(query.entity.as_deref(), Some("messages"));
        assert_eq!(query.level.as_deref(), Some("error"));
        assert_eq!(query.limit, Some(5));
        assert!(query.target.is_none());
    }

    #[test]
    fn metrics_report_lists_and_prunes_snapshots() {
        let path = std::env::temp_dir()
            .join(format!("wasync-cli-{}", uuid::Uuid::now_v7()))
            .join("metrics.db");
        let metrics = MetricsRecorder::with_snapshots(&path).unwrap();
        metrics.counter_inc("sync.rows_inserted", &[("entity", "chats")], 3);
        assert_eq!(metrics.snapshot().unwrap(), 1);

        let query = MetricsQuery {
            name: Some("sync.rows_inserted".into()),
            ..Default::default()
        };
        let report = metrics_report(&metrics, &query, None).unwrap();
        assert_eq!(report["pruned"], 0);
        assert_eq!(report["snapshots"][0]["value"], 3);

        let report = metrics_report(&metrics, &query, Some(0)).unwrap();
        assert_eq!(report["pruned"], 1);
        assert_eq!(report["snapshots"], json!([]));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
