// Mlog - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation: every error carries the path or
// operation it failed on and keeps its causal source for diagnostic logging.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all Mlog operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum MlogError {
    /// Watcher registration or lifecycle failed.
    Watch(WatchError),

    /// Event store operation failed.
    Store(StoreError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// Export operation failed.
    Export(ExportError),
}

impl fmt::Display for MlogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watch(e) => write!(f, "Watch error: {e}"),
            Self::Store(e) => write!(f, "Store error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Export(e) => write!(f, "Export error: {e}"),
        }
    }
}

impl std::error::Error for MlogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Watch(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Export(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Watch errors
// ---------------------------------------------------------------------------

/// Errors related to watcher registration and lifecycle.
///
/// Per-notification read failures are not errors here: they are reported
/// through `WatchProgress::ReadFailed` and retried on the next notification.
#[derive(Debug)]
pub enum WatchError {
    /// The registered path exists but is not a regular file.
    NotAFile { path: PathBuf },

    /// Stat failed for a reason other than "not found".
    Stat { path: PathBuf, source: io::Error },

    /// The OS notification backend could not be created.
    Notify { source: notify::Error },

    /// `start` was called on a watcher that is already running.
    AlreadyStarted,

    /// The processing thread panicked before `stop` could join it.
    WorkerPanicked,
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAFile { path } => {
                write!(f, "'{}' is a directory, not a file", path.display())
            }
            Self::Stat { path, source } => {
                write!(f, "Cannot stat '{}': {source}", path.display())
            }
            Self::Notify { source } => {
                write!(f, "Failed to create filesystem watcher: {source}")
            }
            Self::AlreadyStarted => write!(f, "Watcher is already running"),
            Self::WorkerPanicked => write!(f, "Watcher processing thread panicked"),
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stat { source, .. } => Some(source),
            Self::Notify { source } => Some(source),
            _ => None,
        }
    }
}

impl From<WatchError> for MlogError {
    fn from(e: WatchError) -> Self {
        Self::Watch(e)
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors related to the event store.
#[derive(Debug)]
pub enum StoreError {
    /// The database directory could not be created.
    Io { path: PathBuf, source: io::Error },

    /// The database file could not be opened.
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Schema creation failed.
    Schema { source: rusqlite::Error },

    /// A statement failed.
    Sqlite {
        operation: &'static str,
        source: rusqlite::Error,
    },

    /// The event violates a write-time invariant and was not stored.
    InvalidEvent { reason: &'static str },

    /// A stored row could not be decoded back into an event.
    Decode {
        row_id: i64,
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(
                f,
                "Failed to create database directory '{}': {source}",
                path.display()
            ),
            Self::Open { path, source } => {
                write!(f, "Failed to open database '{}': {source}", path.display())
            }
            Self::Schema { source } => write!(f, "Failed to create schema: {source}"),
            Self::Sqlite { operation, source } => {
                write!(f, "SQLite error during {operation}: {source}")
            }
            Self::InvalidEvent { reason } => write!(f, "Event rejected: {reason}"),
            Self::Decode {
                row_id,
                field,
                reason,
            } => write!(f, "Row {row_id}: cannot decode '{field}': {reason}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Open { source, .. } => Some(source),
            Self::Schema { source } => Some(source),
            Self::Sqlite { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for MlogError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for MlogError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors related to export operations.
#[derive(Debug)]
pub enum ExportError {
    /// I/O error flushing the export output.
    Io { target: String, source: io::Error },

    /// CSV serialisation error.
    Csv { target: String, source: csv::Error },

    /// JSON serialisation error.
    Json {
        target: String,
        source: serde_json::Error,
    },

    /// Export would exceed maximum event count.
    TooManyEvents { count: usize, max: usize },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { target, source } => write!(f, "Export I/O error '{target}': {source}"),
            Self::Csv { target, source } => write!(f, "CSV export error '{target}': {source}"),
            Self::Json { target, source } => {
                write!(f, "JSON export error '{target}': {source}")
            }
            Self::TooManyEvents { count, max } => write!(
                f,
                "Export of {count} events exceeds maximum of {max}. \
                 Apply filters to reduce the result set."
            ),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ExportError> for MlogError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

/// Convenience type alias for Mlog results.
pub type Result<T> = std::result::Result<T, MlogError>;
