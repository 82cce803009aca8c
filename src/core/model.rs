// Mlog - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no platform
// dependencies. These types are the shared vocabulary between the parsers,
// the watcher, and the event store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Sortable text form of an event timestamp: RFC 3339 UTC with fixed
/// nanosecond precision, so string order equals time order and every
/// `DateTime<Utc>` survives a store round trip unchanged.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Open key/value side channel attached to an event. The key set depends on
/// the event type (e.g. `method`/`uri`/`status` for HTTP requests).
pub type Metadata = BTreeMap<String, serde_json::Value>;

// =============================================================================
// Event (normalised output of parsing)
// =============================================================================

/// A single classified log event, normalised across all log families.
///
/// Built once by a parser and never mutated afterwards; the store persists
/// it verbatim. `raw_log` always carries the source line for audit/replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Ingestion instant supplied by the caller (never read from the line).
    pub timestamp: DateTime<Utc>,

    /// Identifier of the server the line was collected on.
    pub server_id: String,

    pub event_type: EventType,

    pub severity: Severity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Short human-readable summary.
    pub message: String,

    /// Verbatim source line.
    pub raw_log: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Event {
    pub fn new(
        timestamp: DateTime<Utc>,
        server_id: &str,
        event_type: EventType,
        severity: Severity,
        message: impl Into<String>,
        raw_log: &str,
    ) -> Self {
        Self {
            timestamp,
            server_id: server_id.to_string(),
            event_type,
            severity,
            source_ip: None,
            dest_ip: None,
            source_port: None,
            username: None,
            message: message.into(),
            raw_log: raw_log.to_string(),
            metadata: Metadata::new(),
        }
    }

    /// Set the source address. An empty `ip` leaves the field unset.
    pub fn with_source(mut self, ip: &str, port: Option<u16>) -> Self {
        if !ip.is_empty() {
            self.source_ip = Some(ip.to_string());
        }
        self.source_port = port;
        self
    }

    /// Set the username. Empty strings and the CLF placeholder `-` are ignored.
    pub fn with_username(mut self, username: &str) -> Self {
        if !username.is_empty() && username != "-" {
            self.username = Some(username.to_string());
        }
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Metadata encoded as a JSON object string (`{}` when empty).
    pub fn metadata_json(&self) -> String {
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string())
    }
}

/// An event read back from the store together with its row identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: Event,
}

// =============================================================================
// Event type
// =============================================================================

/// Closed set of event classifications. The text form (`as_str`) is what
/// the store persists and what query prefixes are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SshConnected,
    SshDisconnected,
    SshFailedAuth,
    NginxRequest,
    NginxError,
    ApacheRequest,
    ApacheError,
    Pm2Start,
    Pm2Stop,
    Pm2Restart,
    Pm2Error,
    Pm2Crash,
    Custom,
}

impl EventType {
    pub fn all() -> &'static [EventType] {
        &[
            EventType::SshConnected,
            EventType::SshDisconnected,
            EventType::SshFailedAuth,
            EventType::NginxRequest,
            EventType::NginxError,
            EventType::ApacheRequest,
            EventType::ApacheError,
            EventType::Pm2Start,
            EventType::Pm2Stop,
            EventType::Pm2Restart,
            EventType::Pm2Error,
            EventType::Pm2Crash,
            EventType::Custom,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SshConnected => "SSH_CONNECTED",
            EventType::SshDisconnected => "SSH_DISCONNECTED",
            EventType::SshFailedAuth => "SSH_FAILED_AUTH",
            EventType::NginxRequest => "NGINX_REQUEST",
            EventType::NginxError => "NGINX_ERROR",
            EventType::ApacheRequest => "APACHE_REQUEST",
            EventType::ApacheError => "APACHE_ERROR",
            EventType::Pm2Start => "PM2_START",
            EventType::Pm2Stop => "PM2_STOP",
            EventType::Pm2Restart => "PM2_RESTART",
            EventType::Pm2Error => "PM2_ERROR",
            EventType::Pm2Crash => "PM2_CRASH",
            EventType::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::all()
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Normalised severity levels, ordered from least to most severe so that
/// `Severity::Warning < Severity::Error` holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Returns all variants from least to most severe.
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Debug,
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
        ]
    }

    /// Stored/serialised text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Short label for compact display (e.g. table columns).
    pub fn short_label(&self) -> &'static str {
        match self {
            Severity::Critical => "CRIT",
            Severity::Error => "ERR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
            Severity::Debug => "DBG",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    /// Case-insensitive; accepts `warn` as an alias for `warning`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower == "warn" {
            return Ok(Severity::Warning);
        }
        Severity::all()
            .iter()
            .find(|sev| sev.as_str() == lower)
            .copied()
            .ok_or_else(|| format!("unknown severity '{lower}'"))
    }
}

// =============================================================================
// Reserved correlation entities
// =============================================================================
//
// Mirrors of the `ssh_sessions` and `security_incidents` tables. Nothing in
// this crate populates them; they exist for a session-tracking / incident
// correlation subsystem that consumes the event stream.

/// One SSH login session, from connect to disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshSession {
    pub session_id: String,
    pub username: String,
    pub source_ip: String,
    pub source_port: Option<u16>,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub auth_method: Option<String>,
    pub client_version: Option<String>,
    pub status: String,
}

/// A correlated security finding spanning several events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIncident {
    pub incident_type: String,
    pub severity: Severity,
    pub source_ip: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub event_count: u32,
    pub description: String,
    pub resolved: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

// =============================================================================
// Watch progress (for host/operator observation)
// =============================================================================

/// Outcome messages sent from the watcher's processing thread to the host.
///
/// Every failure path in the watcher produces one of these in addition to a
/// log line, so an operator-facing host can count and surface them.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchProgress {
    /// Processing loop started.
    Started { file_count: usize },

    /// New bytes were consumed from a file.
    Ingested {
        path: PathBuf,
        lines: usize,
        events: usize,
    },

    /// File shrank below the stored offset; offset was reset to 0.
    Rotated {
        path: PathBuf,
        previous_offset: u64,
        new_size: u64,
    },

    /// Reading new bytes failed; the offset was left unchanged.
    ReadFailed { path: PathBuf, message: String },

    /// Buffered bytes of an unterminated line were dropped unparsed.
    PartialLineDiscarded {
        path: PathBuf,
        bytes: usize,
        reason: DiscardReason,
    },

    /// A parsed event could not be stored and was discarded.
    StoreFailed { path: PathBuf, message: String },

    /// An OS subscription could not be established for a registered path.
    SubscribeFailed { path: PathBuf, message: String },

    /// Processing loop exited.
    Stopped,
}

/// Why a partial line was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The file was truncated or replaced before the line was completed.
    Rotated,
    /// The fragment grew past `MAX_PARTIAL_LINE_BYTES` without a newline.
    TooLong,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DiscardReason::Rotated => "file rotated",
            DiscardReason::TooLong => "line too long",
        })
    }
}
