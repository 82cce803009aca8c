// Mlog - main.rs
//
// Application entry point. Handles:
// 1. CLI argument parsing
// 2. Config loading and logging initialisation (debug mode support)
// 3. `serve`: register configured log files and run the watcher
// 4. `query`: filtered, paginated reads from the event store

use clap::{Args, Parser, Subcommand, ValueEnum};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use mlog::app::watcher::Watcher;
use mlog::core::export;
use mlog::core::filter::EventQuery;
use mlog::core::model::{Severity, WatchProgress};
use mlog::platform::config::{self, AppConfig, PlatformPaths};
use mlog::platform::fs;
use mlog::store::EventStore;
use mlog::util::{self, constants, error::MlogError};
use std::path::PathBuf;
use std::sync::Arc;

/// Mlog - incremental log ingestion for Linux servers.
///
/// Tails SSH, Nginx, Apache and PM2 logs, classifies each new line into a
/// normalised event, and stores it in a local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "mlog", version, about)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory).
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the configured log files and store new events until terminated.
    Serve,

    /// Print stored events, newest first.
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Event type prefix, e.g. SSH_ or NGINX_REQUEST.
    #[arg(short = 't', long = "type")]
    event_type: Option<String>,

    /// Exact source IP.
    #[arg(long = "ip")]
    source_ip: Option<String>,

    /// Exact username.
    #[arg(short = 'u', long = "user")]
    username: Option<String>,

    /// Exact severity (debug, info, warning, error, critical).
    #[arg(short = 's', long = "severity")]
    severity: Option<Severity>,

    /// Inclusive lower bound (RFC 3339, or YYYY-MM-DD for midnight UTC).
    #[arg(long = "since", value_parser = parse_instant)]
    since: Option<DateTime<Utc>>,

    /// Inclusive upper bound (RFC 3339, or YYYY-MM-DD for midnight UTC).
    #[arg(long = "until", value_parser = parse_instant)]
    until: Option<DateTime<Utc>>,

    /// Page size.
    #[arg(short = 'n', long = "limit", default_value_t = constants::DEFAULT_QUERY_LIMIT)]
    limit: i64,

    /// Rows to skip.
    #[arg(long = "offset", default_value_t = 0)]
    offset: i64,

    #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PlatformPaths::resolve().config_file());
    let (config, warnings) = config::load_config(&config_path);

    // Initialise logging subsystem (config warnings are logged once it is up)
    util::logging::init(
        cli.debug,
        config.log_level.as_deref(),
        config.log_file.as_deref(),
    );
    for warning in &warnings {
        tracing::warn!(config = %config_path.display(), warning = %warning, "Config warning");
    }

    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        server_id = %config.server_id,
        database = %config.database_path.display(),
        "Mlog starting"
    );

    let result = match cli.command {
        Command::Serve => serve(&config),
        Command::Query(args) => query(&config, &args),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Mlog failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

// =============================================================================
// serve
// =============================================================================

fn serve(config: &AppConfig) -> Result<(), MlogError> {
    let store = Arc::new(EventStore::init(&config.database_path)?);
    prune_expired(&store, config.retention_days)?;

    let mut watcher = Watcher::with_progress_capacity(
        &config.server_id,
        config.classifier(),
        store.clone(),
        config.progress_capacity,
    );

    let mut targets = config.watch_targets();
    if config.pm2_enabled {
        match fs::list_pm2_logs(
            &config.pm2_log_dir,
            config.pm2_watch_stdout,
            config.pm2_watch_stderr,
        ) {
            Ok(files) => targets.extend(files),
            Err(e) => tracing::warn!(
                dir = %config.pm2_log_dir.display(),
                error = %e,
                "Cannot list PM2 log directory"
            ),
        }
    }

    let failures = watcher.add_paths(targets.iter().map(PathBuf::as_path));
    if !failures.is_empty() {
        tracing::warn!(count = failures.len(), "Some configured paths could not be watched");
    }
    let watched = watcher.watched_paths();
    if watched.is_empty() {
        tracing::warn!("No configured log file exists; waiting without any watched file");
    }
    for path in &watched {
        tracing::info!(path = %path.display(), "Watching");
    }

    let security = &config.security;
    tracing::debug!(
        brute_force_threshold = security.brute_force_threshold,
        brute_force_window_minutes = security.brute_force_window_minutes,
        port_scan_threshold = security.port_scan_threshold,
        port_scan_window_seconds = security.port_scan_window_seconds,
        "Security thresholds loaded (no detector consumes them)"
    );

    watcher.start()?;

    let interval = std::time::Duration::from_millis(constants::SERVE_PROGRESS_DRAIN_INTERVAL_MS);
    loop {
        std::thread::sleep(interval);
        for progress in watcher.poll_progress(constants::MAX_PROGRESS_MESSAGES_PER_DRAIN) {
            log_progress(&progress);
        }
    }
}

/// Delete events older than the retention window. 0 keeps everything.
fn prune_expired(store: &EventStore, retention_days: u32) -> Result<(), MlogError> {
    if retention_days == 0 {
        return Ok(());
    }
    let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
    let removed = store.delete_events_before(cutoff)?;
    if removed > 0 {
        tracing::info!(removed, retention_days, "Pruned expired events");
    }
    Ok(())
}

fn log_progress(progress: &WatchProgress) {
    match progress {
        WatchProgress::Started { file_count } => {
            tracing::info!(file_count, "Watcher started");
        }
        WatchProgress::Ingested {
            path,
            lines,
            events,
        } => {
            tracing::info!(path = %path.display(), lines, events, "Ingested");
        }
        WatchProgress::Rotated {
            path,
            previous_offset,
            new_size,
        } => {
            tracing::info!(
                path = %path.display(),
                previous_offset,
                new_size,
                "File rotated; reading from the start"
            );
        }
        WatchProgress::ReadFailed { path, message } => {
            tracing::warn!(path = %path.display(), error = %message, "Read failed");
        }
        WatchProgress::PartialLineDiscarded {
            path,
            bytes,
            reason,
        } => {
            tracing::warn!(path = %path.display(), bytes, reason = %reason, "Partial line discarded");
        }
        WatchProgress::StoreFailed { path, message } => {
            tracing::warn!(path = %path.display(), error = %message, "Event not stored");
        }
        WatchProgress::SubscribeFailed { path, message } => {
            tracing::warn!(path = %path.display(), error = %message, "Subscription failed");
        }
        WatchProgress::Stopped => tracing::info!("Watcher stopped"),
    }
}

// =============================================================================
// query
// =============================================================================

fn query(config: &AppConfig, args: &QueryArgs) -> Result<(), MlogError> {
    let store = EventStore::init(&config.database_path)?;

    let filter = EventQuery {
        event_type: args.event_type.clone(),
        source_ip: args.source_ip.clone(),
        username: args.username.clone(),
        severity: args.severity,
        since: args.since,
        until: args.until,
        limit: args.limit,
        offset: args.offset,
    };
    let events = store.query_events(&filter)?;
    tracing::debug!(count = events.len(), ?filter, "Query complete");

    let stdout = std::io::stdout().lock();
    match args.format {
        OutputFormat::Table => export::export_table(&events, stdout, "stdout")?,
        OutputFormat::Json => export::export_json(&events, stdout, "stdout")?,
        OutputFormat::Csv => export::export_csv(&events, stdout, "stdout")?,
    };

    store.close()?;
    Ok(())
}

/// Parse a CLI instant: full RFC 3339, or a bare date meaning 00:00:00 UTC.
fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{raw}' is not an RFC 3339 timestamp or YYYY-MM-DD date"))
}
