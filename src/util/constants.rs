// Mlog - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every bound used by the watcher, store, and config loader lives here.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "Mlog";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "mlog";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Watcher limits
// =============================================================================

/// How long the processing loop blocks on the notification channel before
/// re-checking the cancel flag (ms). Bounds the latency of `Watcher::stop`.
pub const WATCH_CANCEL_CHECK_INTERVAL_MS: u64 = 100;

/// Maximum accumulated size of the partial (in-progress) line buffer for a
/// single watched file.
///
/// Guards against OOM when a watched file produces no newlines (binary
/// content, an extremely long single line, or a file registered by mistake).
/// When exceeded the fragment is discarded and a warning is logged.
pub const MAX_PARTIAL_LINE_BYTES: usize = 2 * 1024 * 1024; // 2 MiB

/// Default capacity of the bounded watcher progress channel.
/// When the host does not drain it, further progress messages are dropped
/// rather than stalling ingestion.
pub const DEFAULT_PROGRESS_CHANNEL_CAPACITY: usize = 1_024;

/// Minimum user-configurable progress channel capacity.
pub const MIN_PROGRESS_CHANNEL_CAPACITY: usize = 16;

/// Maximum user-configurable progress channel capacity.
pub const MAX_PROGRESS_CHANNEL_CAPACITY: usize = 1_000_000;

/// How often `mlog serve` drains the watcher progress channel (ms).
pub const SERVE_PROGRESS_DRAIN_INTERVAL_MS: u64 = 1_000;

/// Maximum number of progress messages handled per drain.
pub const MAX_PROGRESS_MESSAGES_PER_DRAIN: usize = 500;

// =============================================================================
// Store limits
// =============================================================================

/// Page size used by `query_events` when the caller's limit is unset or
/// non-positive.
pub const DEFAULT_QUERY_LIMIT: i64 = 100;

/// Default event retention (days). 0 disables pruning.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Maximum user-configurable retention (days).
pub const MAX_RETENTION_DAYS: u32 = 3_650;

/// Database file name (stored in the platform data directory).
pub const DATABASE_FILE_NAME: &str = "mlog.db";

// =============================================================================
// Default watch targets
// =============================================================================

/// Authentication logs watched when `[ssh] log_files` is not set.
/// Debian/Ubuntu use auth.log, RHEL/CentOS use secure.
pub const DEFAULT_SSH_LOG_FILES: &[&str] = &["/var/log/auth.log", "/var/log/secure"];

pub const DEFAULT_NGINX_ACCESS_LOG: &str = "/var/log/nginx/access.log";
pub const DEFAULT_NGINX_ERROR_LOG: &str = "/var/log/nginx/error.log";

pub const DEFAULT_APACHE_ACCESS_LOG: &str = "/var/log/apache2/access.log";
pub const DEFAULT_APACHE_ERROR_LOG: &str = "/var/log/apache2/error.log";
pub const DEFAULT_APACHE_RHEL_ACCESS_LOG: &str = "/var/log/httpd/access_log";
pub const DEFAULT_APACHE_RHEL_ERROR_LOG: &str = "/var/log/httpd/error_log";

/// PM2 log directory; `~` is expanded to the user's home directory.
pub const DEFAULT_PM2_LOG_DIR: &str = "~/.pm2/logs";

/// PM2 per-app stdout log file name pattern.
pub const PM2_STDOUT_PATTERN: &str = "*-out.log";

/// PM2 per-app stderr log file name pattern.
pub const PM2_STDERR_PATTERN: &str = "*-error.log";

// =============================================================================
// Security thresholds
// =============================================================================
//
// Declared and validated so config files carrying them stay valid. No
// correlation detector consumes them yet.

pub const DEFAULT_BRUTE_FORCE_THRESHOLD: u32 = 5;
pub const DEFAULT_BRUTE_FORCE_WINDOW_MINUTES: u32 = 5;
pub const DEFAULT_PORT_SCAN_THRESHOLD: u32 = 10;
pub const DEFAULT_PORT_SCAN_WINDOW_SECONDS: u32 = 5;

/// Upper bound for any event-count threshold.
pub const MAX_DETECTOR_THRESHOLD: u32 = 10_000;

/// Upper bound for any detector window (in its own unit).
pub const MAX_DETECTOR_WINDOW: u32 = 86_400;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
/// Prevents accidental exposure of sensitive data in long lines.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Export
// =============================================================================

/// Maximum number of events that can be exported in a single operation.
pub const MAX_EXPORT_EVENTS: usize = 5_000_000;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Server identifier used when neither config nor the OS provides one.
pub const FALLBACK_SERVER_ID: &str = "localhost";
