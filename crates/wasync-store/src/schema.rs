/// SQL DDL for the wasync store.
/// Every entity table is keyed by a hidden surrogate `pk` and addressed
/// externally only through `(session_id, id)`.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chats (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    id TEXT NOT NULL,
    name TEXT,
    unread_count INTEGER,
    last_message_timestamp INTEGER,
    archived INTEGER,
    pinned INTEGER,
    mute_end_time INTEGER,
    read_only INTEGER,
    contact_primary_identity_key BLOB,
    tc_token BLOB,
    UNIQUE (session_id, id)
);

CREATE TABLE IF NOT EXISTS contacts (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    id TEXT NOT NULL,
    name TEXT,
    notify TEXT,
    verified_name TEXT,
    img_url TEXT,
    status TEXT,
    UNIQUE (session_id, id)
);

CREATE TABLE IF NOT EXISTS group_metadata (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    id TEXT NOT NULL,
    subject TEXT,
    owner TEXT,
    description TEXT,
    creation INTEGER,
    restrict_settings INTEGER,
    announce INTEGER,
    size INTEGER,
    participants TEXT,
    UNIQUE (session_id, id)
);

CREATE TABLE IF NOT EXISTS messages (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    id TEXT NOT NULL,
    remote_jid TEXT NOT NULL,
    message_id TEXT NOT NULL,
    from_me INTEGER,
    participant TEXT,
    message_timestamp INTEGER,
    push_name TEXT,
    status INTEGER,
    starred INTEGER,
    content TEXT,
    UNIQUE (session_id, id)
);

CREATE TABLE IF NOT EXISTS session_data (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    UNIQUE (session_id, id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(session_id, remote_jid);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(session_id, message_timestamp);
CREATE INDEX IF NOT EXISTS idx_chats_timestamp ON chats(session_id, last_message_timestamp);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
