// Mlog - store/mod.rs
//
// SQLite-backed event store.
//
// One connection per process: opened once by `init`, then passed explicitly
// (as `Arc<EventStore>`) to the watcher and to query callers. The connection
// sits behind a `Mutex`; every insert and query is an independent statement
// and no transaction spans several events.
//
// Timestamps are stored as RFC 3339 UTC with fixed nanosecond precision
// (`2024-01-15T14:30:22.000000000Z`), so string order equals time order.
// Metadata is stored as a JSON object string.

pub mod schema;

use crate::core::filter::{non_empty, EventQuery};
use crate::core::model::{format_timestamp, Event, EventType, Metadata, Severity, StoredEvent};
use crate::util::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const EVENT_COLUMNS: &str = "id, timestamp, server_id, event_type, severity, source_ip, \
                             dest_ip, source_port, username, message, raw_log, metadata";

// =============================================================================
// EventSink
// =============================================================================

/// Destination for parsed events. The watcher only depends on this trait.
pub trait EventSink: Send + Sync {
    /// Persist one event and return its row id.
    fn insert_event(&self, event: &Event) -> Result<i64, StoreError>;
}

// =============================================================================
// EventStore
// =============================================================================

pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open (or create) the database at `path`.
    ///
    /// Creates the parent directory, switches the journal to WAL and creates
    /// any missing tables and indexes.
    pub fn init(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(sqlite("set journal mode"))?;

        let store = Self::with_schema(conn)?;
        tracing::info!(
            path = %path.display(),
            journal_mode = %journal_mode,
            "Event store opened"
        );
        Ok(store)
    }

    /// Private in-memory database, for tests and one-shot tooling.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(|source| StoreError::Schema { source })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close()
            .map_err(|(_, source)| StoreError::Sqlite {
                operation: "close",
                source,
            })?;
        tracing::debug!("Event store closed");
        Ok(())
    }

    /// Append one event. Returns the new row id.
    ///
    /// Events with an empty `raw_log` are rejected before touching the
    /// database, so every stored row can be audited against its source line.
    pub fn insert_event(&self, event: &Event) -> Result<i64, StoreError> {
        if event.raw_log.is_empty() {
            return Err(StoreError::InvalidEvent {
                reason: "raw_log is empty",
            });
        }

        let conn = self.lock();
        conn.execute(
            "INSERT INTO events (timestamp, server_id, event_type, severity, source_ip, dest_ip, \
             source_port, username, message, raw_log, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                format_timestamp(&event.timestamp),
                event.server_id,
                event.event_type.as_str(),
                event.severity.as_str(),
                event.source_ip,
                event.dest_ip,
                event.source_port,
                event.username,
                event.message,
                event.raw_log,
                event.metadata_json(),
            ],
        )
        .map_err(sqlite("insert event"))?;
        Ok(conn.last_insert_rowid())
    }

    /// Run a filtered, paginated query. Newest first; ties broken by row id
    /// so pages are stable.
    pub fn query_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE 1=1");
        let mut args: Vec<Value> = Vec::new();

        if let Some(prefix) = non_empty(&query.event_type) {
            sql.push_str(" AND event_type LIKE ? ESCAPE '\\'");
            args.push(Value::Text(format!("{}%", escape_like(prefix))));
        }
        if let Some(ip) = non_empty(&query.source_ip) {
            sql.push_str(" AND source_ip = ?");
            args.push(Value::Text(ip.to_string()));
        }
        if let Some(user) = non_empty(&query.username) {
            sql.push_str(" AND username = ?");
            args.push(Value::Text(user.to_string()));
        }
        if let Some(severity) = query.severity {
            sql.push_str(" AND severity = ?");
            args.push(Value::Text(severity.as_str().to_string()));
        }
        if let Some(since) = query.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(Value::Text(format_timestamp(&since)));
        }
        if let Some(until) = query.until {
            sql.push_str(" AND timestamp <= ?");
            args.push(Value::Text(format_timestamp(&until)));
        }

        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");
        args.push(Value::Integer(query.effective_limit()));
        args.push(Value::Integer(query.effective_offset()));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql).map_err(sqlite("prepare query"))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), RawEvent::from_row)
            .map_err(sqlite("query events"))?;

        let mut events = Vec::new();
        for row in rows {
            let raw = row.map_err(sqlite("read event row"))?;
            events.push(raw.decode()?);
        }

        tracing::debug!(
            returned = events.len(),
            limit = query.effective_limit(),
            offset = query.effective_offset(),
            "Events queried"
        );
        Ok(events)
    }

    /// Delete events strictly older than `cutoff`. Returns the number removed.
    pub fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.lock()
            .execute(
                "DELETE FROM events WHERE timestamp < ?1",
                params![format_timestamp(&cutoff)],
            )
            .map_err(sqlite("delete old events"))
    }

    pub fn count_events(&self) -> Result<i64, StoreError> {
        self.lock()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(sqlite("count events"))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave the connection in a
        // half-written state; SQLite rolls back the failed statement.
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for EventStore {
    fn insert_event(&self, event: &Event) -> Result<i64, StoreError> {
        EventStore::insert_event(self, event)
    }
}

// =============================================================================
// Row decoding
// =============================================================================

/// Column values exactly as stored, before validation.
struct RawEvent {
    id: i64,
    timestamp: String,
    server_id: String,
    event_type: String,
    severity: String,
    source_ip: Option<String>,
    dest_ip: Option<String>,
    source_port: Option<i64>,
    username: Option<String>,
    message: Option<String>,
    raw_log: String,
    metadata: Option<String>,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            server_id: row.get(2)?,
            event_type: row.get(3)?,
            severity: row.get(4)?,
            source_ip: row.get(5)?,
            dest_ip: row.get(6)?,
            source_port: row.get(7)?,
            username: row.get(8)?,
            message: row.get(9)?,
            raw_log: row.get(10)?,
            metadata: row.get(11)?,
        })
    }

    fn decode(self) -> Result<StoredEvent, StoreError> {
        let row_id = self.id;
        let bad = |field: &'static str, reason: String| StoreError::Decode {
            row_id,
            field,
            reason,
        };

        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| bad("timestamp", e.to_string()))?
            .with_timezone(&Utc);
        let event_type: EventType = self.event_type.parse().map_err(|e| bad("event_type", e))?;
        let severity: Severity = self.severity.parse().map_err(|e| bad("severity", e))?;
        let source_port = self
            .source_port
            .map(u16::try_from)
            .transpose()
            .map_err(|e| bad("source_port", e.to_string()))?;
        let metadata: Metadata = match self.metadata.as_deref() {
            None | Some("") => Metadata::new(),
            Some(json) => serde_json::from_str(json).map_err(|e| bad("metadata", e.to_string()))?,
        };

        Ok(StoredEvent {
            id: row_id,
            event: Event {
                timestamp,
                server_id: self.server_id,
                event_type,
                severity,
                source_ip: self.source_ip,
                dest_ip: self.dest_ip,
                source_port,
                username: self.username,
                message: self.message.unwrap_or_default(),
                raw_log: self.raw_log,
                metadata,
            },
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Escape LIKE wildcards so a prefix is matched literally (`SSH_` must not
/// treat `_` as "any character").
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn sqlite(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |source| StoreError::Sqlite { operation, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn event(event_type: EventType, severity: Severity, ip: &str, user: &str, secs: i64) -> Event {
        Event::new(
            base() + Duration::seconds(secs),
            "web-1",
            event_type,
            severity,
            format!("{event_type} at {secs}"),
            &format!("raw line {secs}"),
        )
        .with_source(ip, Some(40000))
        .with_username(user)
    }

    fn sample_events() -> Vec<Event> {
        vec![
            event(EventType::SshConnected, Severity::Info, "10.0.0.5", "alice", 0),
            event(EventType::SshFailedAuth, Severity::Warning, "10.0.0.9", "root", 10),
            event(EventType::SshFailedAuth, Severity::Warning, "10.0.0.9", "admin", 20),
            event(EventType::NginxRequest, Severity::Info, "10.0.0.5", "", 30),
            event(EventType::NginxError, Severity::Error, "10.0.0.7", "", 40),
            event(EventType::ApacheRequest, Severity::Warning, "10.0.0.5", "bob", 50),
            event(EventType::Pm2Crash, Severity::Critical, "", "", 60),
            event(EventType::SshDisconnected, Severity::Info, "10.0.0.5", "alice", 70),
        ]
    }

    fn store_with(events: &[Event]) -> EventStore {
        let store = EventStore::open_in_memory().unwrap();
        for e in events {
            store.insert_event(e).unwrap();
        }
        store
    }

    #[test]
    fn test_init_creates_directory_schema_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mlog.db");
        let store = EventStore::init(&path).unwrap();
        assert!(path.exists());

        {
            let conn = store.lock();
            for table in schema::TABLES {
                let n: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                        params![table],
                        |row| row.get(0),
                    )
                    .unwrap();
                assert_eq!(n, 1, "missing table {table}");
            }
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .unwrap();
            assert_eq!(mode.to_lowercase(), "wal");
        }
        store.close().unwrap();
    }

    #[test]
    fn test_reopen_keeps_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlog.db");
        let store = EventStore::init(&path).unwrap();
        store.insert_event(&sample_events()[0]).unwrap();
        store.close().unwrap();

        let store = EventStore::init(&path).unwrap();
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let original = event(EventType::NginxRequest, Severity::Warning, "203.0.113.7", "bob", 5)
            .with_metadata("method", "POST")
            .with_metadata("status", 404)
            .with_metadata("bytes", 512u64);
        let store = store_with(std::slice::from_ref(&original));

        let found = store
            .query_events(&EventQuery {
                event_type: Some(original.event_type.as_str().to_string()),
                source_ip: original.source_ip.clone(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].event, original);
        assert!(found[0].id > 0);
    }

    #[test]
    fn test_insert_returns_increasing_ids() {
        let store = EventStore::open_in_memory().unwrap();
        let a = store.insert_event(&sample_events()[0]).unwrap();
        let b = store.insert_event(&sample_events()[1]).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_empty_raw_log_is_rejected() {
        let store = EventStore::open_in_memory().unwrap();
        let mut e = sample_events()[0].clone();
        e.raw_log.clear();
        let err = store.insert_event(&e).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEvent { .. }));
        assert_eq!(store.count_events().unwrap(), 0);
    }

    #[test]
    fn test_default_limit_and_descending_order() {
        let events: Vec<Event> = (0..150)
            .map(|i| event(EventType::Custom, Severity::Info, "", "", i))
            .collect();
        let store = store_with(&events);

        let page = store.query_events(&EventQuery::default()).unwrap();
        assert_eq!(page.len(), 100);
        assert!(page
            .windows(2)
            .all(|w| w[0].event.timestamp >= w[1].event.timestamp));
        assert_eq!(page[0].event.timestamp, base() + Duration::seconds(149));

        let page = store
            .query_events(&EventQuery {
                limit: -1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 100);

        let page = store
            .query_events(&EventQuery {
                limit: 7,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 7);
    }

    #[test]
    fn test_pages_do_not_overlap() {
        let events: Vec<Event> = (0..25)
            .map(|i| event(EventType::Custom, Severity::Info, "", "", i))
            .collect();
        let store = store_with(&events);

        let mut seen = Vec::new();
        for page_no in 0..3 {
            let page = store
                .query_events(&EventQuery {
                    limit: 10,
                    offset: page_no * 10,
                    ..Default::default()
                })
                .unwrap();
            seen.extend(page.into_iter().map(|e| e.id));
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn test_filters_agree_with_in_memory_matcher() {
        let events = sample_events();
        let store = store_with(&events);

        let queries = vec![
            EventQuery {
                event_type: Some("SSH_".into()),
                ..Default::default()
            },
            EventQuery {
                event_type: Some("ssh_failed".into()),
                ..Default::default()
            },
            EventQuery {
                source_ip: Some("10.0.0.5".into()),
                ..Default::default()
            },
            EventQuery {
                username: Some("alice".into()),
                event_type: Some("SSH".into()),
                ..Default::default()
            },
            EventQuery {
                severity: Some(Severity::Warning),
                ..Default::default()
            },
            EventQuery {
                since: Some(base() + Duration::seconds(20)),
                until: Some(base() + Duration::seconds(50)),
                ..Default::default()
            },
            EventQuery {
                source_ip: Some(String::new()),
                ..Default::default()
            },
        ];

        for q in queries {
            let mut expected: Vec<&Event> = events.iter().filter(|e| q.matches(e)).collect();
            expected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            let got = store.query_events(&q).unwrap();
            let got: Vec<&Event> = got.iter().map(|s| &s.event).collect();
            assert_eq!(got, expected, "query {q:?}");
        }
    }

    #[test]
    fn test_type_prefix_wildcards_are_literal() {
        let store = store_with(&sample_events());
        for prefix in ["%", "_", "SSH%", "S_H"] {
            let found = store
                .query_events(&EventQuery {
                    event_type: Some(prefix.to_string()),
                    ..Default::default()
                })
                .unwrap();
            assert!(found.is_empty(), "prefix {prefix:?} matched {}", found.len());
        }
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let store = store_with(&sample_events());
        let exact = base() + Duration::seconds(40);
        let found = store
            .query_events(&EventQuery {
                since: Some(exact),
                until: Some(exact),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].event.event_type, EventType::NginxError);
    }

    #[test]
    fn test_malformed_row_is_a_decode_error() {
        let store = EventStore::open_in_memory().unwrap();
        store
            .lock()
            .execute(
                "INSERT INTO events (timestamp, server_id, event_type, severity, raw_log) \
                 VALUES ('2024-01-15T12:00:00.000000000Z', 's', 'SSH_CONNECTED', 'loud', 'x')",
                [],
            )
            .unwrap();
        let err = store.query_events(&EventQuery::default()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Decode {
                field: "severity",
                ..
            }
        ));
    }

    #[test]
    fn test_delete_before_cutoff() {
        let store = store_with(&sample_events());
        let removed = store
            .delete_events_before(base() + Duration::seconds(30))
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.count_events().unwrap(), 5);
    }

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let a = format_timestamp(&base());
        let b = format_timestamp(&(base() + Duration::nanoseconds(1)));
        let c = format_timestamp(&(base() + Duration::seconds(1)));
        assert_eq!(a, "2024-01-15T12:00:00.000000000Z");
        assert!(a < b && b < c);
    }

    #[test]
    fn test_sub_microsecond_timestamps_round_trip() {
        let store = EventStore::open_in_memory().unwrap();
        let ts = base() + Duration::nanoseconds(123_456_789);
        let e = Event::new(ts, "web-1", EventType::Custom, Severity::Info, "m", "raw");
        store.insert_event(&e).unwrap();

        let found = store.query_events(&EventQuery::default()).unwrap();
        assert_eq!(found[0].event, e);

        // A bound one nanosecond later excludes the row; an exact bound keeps it.
        let after = EventQuery {
            since: Some(ts + Duration::nanoseconds(1)),
            ..Default::default()
        };
        assert!(store.query_events(&after).unwrap().is_empty());
        let exact = EventQuery {
            since: Some(ts),
            until: Some(ts),
            ..Default::default()
        };
        assert_eq!(store.query_events(&exact).unwrap().len(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("SSH_"), "SSH\\_");
        assert_eq!(escape_like("a%b\\c"), "a\\%b\\\\c");
    }
}
