// Mlog - store/schema.rs
//
// Persisted schema. Every statement is idempotent (`IF NOT EXISTS`) so the
// batch runs on every open.
//
// `ssh_sessions`, `security_incidents`, `config` and `server_info` are
// reserved: created here, never written by this crate.

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT NOT NULL,
    server_id   TEXT NOT NULL,
    event_type  TEXT NOT NULL CHECK (event_type <> ''),
    severity    TEXT NOT NULL CHECK (severity <> ''),
    source_ip   TEXT,
    dest_ip     TEXT,
    source_port INTEGER,
    username    TEXT,
    message     TEXT,
    raw_log     TEXT NOT NULL,
    metadata    TEXT,
    created_at  TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_events_timestamp  ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_event_type ON events(event_type);
CREATE INDEX IF NOT EXISTS idx_events_source_ip  ON events(source_ip);
CREATE INDEX IF NOT EXISTS idx_events_username   ON events(username);
CREATE INDEX IF NOT EXISTS idx_events_severity   ON events(severity);

CREATE TABLE IF NOT EXISTS ssh_sessions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id       TEXT UNIQUE NOT NULL,
    username         TEXT NOT NULL,
    source_ip        TEXT NOT NULL,
    source_port      INTEGER,
    connected_at     TEXT NOT NULL,
    disconnected_at  TEXT,
    duration_seconds INTEGER,
    auth_method      TEXT,
    client_version   TEXT,
    status           TEXT DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS security_incidents (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    incident_type TEXT NOT NULL,
    severity      TEXT NOT NULL,
    source_ip     TEXT,
    start_time    TEXT NOT NULL,
    end_time      TEXT,
    event_count   INTEGER DEFAULT 1,
    description   TEXT,
    resolved      INTEGER DEFAULT 0,
    metadata      TEXT
);

CREATE TABLE IF NOT EXISTS config (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS server_info (
    id         TEXT PRIMARY KEY,
    hostname   TEXT,
    os_version TEXT,
    arch       TEXT,
    first_seen TEXT,
    last_seen  TEXT
);
";

/// Tables every open database must contain.
pub const TABLES: &[&str] = &[
    "events",
    "ssh_sessions",
    "security_incidents",
    "config",
    "server_info",
];
