// Mlog - platform/config.rs
//
// Platform directory resolution and config.toml loading with startup
// validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows) and
// Library (macOS) locations. Every value is validated against the named
// constants in util::constants; an invalid value falls back to its default
// and produces a warning instead of aborting startup.

use crate::core::classify::{Classifier, ClassifierRule};
use crate::core::parser::ParserKind;
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::{BaseDirs, ProjectDirs};
use std::path::{Path, PathBuf};

/// Resolved platform paths for Mlog configuration and data.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/mlog/).
    pub config_dir: PathBuf,

    /// Data directory holding the event database (e.g. ~/.local/share/mlog/).
    pub data_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to the current directory if platform dirs cannot be
    /// determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            let data_dir = proj_dirs.data_dir().to_path_buf();
            tracing::debug!(
                config = %config_dir.display(),
                data = %data_dir.display(),
                "Platform paths resolved"
            );
            Self {
                config_dir,
                data_dir,
            }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
                data_dir: PathBuf::from("."),
            }
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join(constants::DATABASE_FILE_NAME)
    }
}

// =============================================================================
// Raw config.toml shape
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are ignored so an older binary accepts a newer file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub logging: LoggingSection,
    pub ssh: SshSection,
    pub nginx: NginxSection,
    pub apache: ApacheSection,
    pub pm2: Pm2Section,
    pub watch: WatchSection,
    pub security: SecuritySection,
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Identifier stamped on every event. Defaults to the hostname.
    pub id: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: Option<String>,
    /// Events older than this many days are pruned at startup (0 = keep all).
    pub retention_days: Option<u32>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub enabled: Option<bool>,
    pub log_files: Option<Vec<String>>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct NginxSection {
    pub enabled: Option<bool>,
    pub access_log: Option<String>,
    pub error_log: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ApacheSection {
    pub enabled: Option<bool>,
    pub access_log: Option<String>,
    pub error_log: Option<String>,
    pub rhel_access_log: Option<String>,
    pub rhel_error_log: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct Pm2Section {
    pub enabled: Option<bool>,
    pub log_dir: Option<String>,
    pub watch_stdout: Option<bool>,
    pub watch_stderr: Option<bool>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// `[[watch.custom]]` entries.
    pub custom: Vec<CustomLogSection>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct CustomLogSection {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub path: Option<String>,
    /// Parser name (`ssh`, `nginx_access`, ..., `custom`). Defaults to `custom`.
    pub parser: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub brute_force_threshold: Option<u32>,
    pub brute_force_window_minutes: Option<u32>,
    pub port_scan_threshold: Option<u32>,
    pub port_scan_window_seconds: Option<u32>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    /// Capacity of the watcher progress channel.
    pub buffer_size: Option<usize>,
}

// =============================================================================
// Validated config
// =============================================================================

/// A user-declared log file and the parser that reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomLog {
    pub name: String,
    pub path: PathBuf,
    pub parser: ParserKind,
}

/// Detector thresholds. Validated and carried, but no detector reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityThresholds {
    pub brute_force_threshold: u32,
    pub brute_force_window_minutes: u32,
    pub port_scan_threshold: u32,
    pub port_scan_window_seconds: u32,
}

impl Default for SecurityThresholds {
    fn default() -> Self {
        Self {
            brute_force_threshold: constants::DEFAULT_BRUTE_FORCE_THRESHOLD,
            brute_force_window_minutes: constants::DEFAULT_BRUTE_FORCE_WINDOW_MINUTES,
            port_scan_threshold: constants::DEFAULT_PORT_SCAN_THRESHOLD,
            port_scan_window_seconds: constants::DEFAULT_PORT_SCAN_WINDOW_SECONDS,
        }
    }
}

/// Validated application configuration derived from `config.toml`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- Server / storage --
    pub server_id: String,
    pub database_path: PathBuf,
    pub retention_days: u32,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,

    // -- Sources --
    pub ssh_enabled: bool,
    pub ssh_log_files: Vec<PathBuf>,

    pub nginx_enabled: bool,
    pub nginx_access_log: PathBuf,
    pub nginx_error_log: PathBuf,

    pub apache_enabled: bool,
    pub apache_access_log: PathBuf,
    pub apache_error_log: PathBuf,
    pub apache_rhel_access_log: PathBuf,
    pub apache_rhel_error_log: PathBuf,

    pub pm2_enabled: bool,
    pub pm2_log_dir: PathBuf,
    pub pm2_watch_stdout: bool,
    pub pm2_watch_stderr: bool,

    pub custom_logs: Vec<CustomLog>,

    // -- Other --
    pub security: SecurityThresholds,
    /// Capacity of the watcher progress channel.
    pub progress_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_id: default_server_id(),
            database_path: PlatformPaths::resolve().database_file(),
            retention_days: constants::DEFAULT_RETENTION_DAYS,
            log_level: None,
            log_file: None,
            ssh_enabled: true,
            ssh_log_files: constants::DEFAULT_SSH_LOG_FILES
                .iter()
                .map(PathBuf::from)
                .collect(),
            nginx_enabled: false,
            nginx_access_log: PathBuf::from(constants::DEFAULT_NGINX_ACCESS_LOG),
            nginx_error_log: PathBuf::from(constants::DEFAULT_NGINX_ERROR_LOG),
            apache_enabled: false,
            apache_access_log: PathBuf::from(constants::DEFAULT_APACHE_ACCESS_LOG),
            apache_error_log: PathBuf::from(constants::DEFAULT_APACHE_ERROR_LOG),
            apache_rhel_access_log: PathBuf::from(constants::DEFAULT_APACHE_RHEL_ACCESS_LOG),
            apache_rhel_error_log: PathBuf::from(constants::DEFAULT_APACHE_RHEL_ERROR_LOG),
            pm2_enabled: false,
            pm2_log_dir: expand_home(constants::DEFAULT_PM2_LOG_DIR),
            pm2_watch_stdout: true,
            pm2_watch_stderr: true,
            custom_logs: Vec::new(),
            security: SecurityThresholds::default(),
            progress_capacity: constants::DEFAULT_PROGRESS_CHANNEL_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Individual files to register with the watcher, in declaration order,
    /// without duplicates. PM2 app logs are listed separately because they
    /// are discovered by scanning `pm2_log_dir` (see platform::fs).
    pub fn watch_targets(&self) -> Vec<PathBuf> {
        let mut targets: Vec<PathBuf> = Vec::new();
        let mut push = |p: &PathBuf| {
            if !targets.contains(p) {
                targets.push(p.clone());
            }
        };

        if self.ssh_enabled {
            self.ssh_log_files.iter().for_each(&mut push);
        }
        if self.nginx_enabled {
            push(&self.nginx_access_log);
            push(&self.nginx_error_log);
        }
        if self.apache_enabled {
            push(&self.apache_access_log);
            push(&self.apache_error_log);
            push(&self.apache_rhel_access_log);
            push(&self.apache_rhel_error_log);
        }
        for custom in &self.custom_logs {
            push(&custom.path);
        }
        targets
    }

    /// Classifier for this configuration: custom log rules first, then
    /// explicit rules for configured paths the built-in patterns would miss,
    /// then the built-in table.
    pub fn classifier(&self) -> Classifier {
        let mut rules: Vec<ClassifierRule> = self
            .custom_logs
            .iter()
            .map(|c| ClassifierRule::exact(&c.path, c.parser))
            .collect();

        let builtin = Classifier::builtin();
        let mut pin = |path: &PathBuf, kind: ParserKind| {
            if builtin.classify(path) != Some(kind) {
                rules.push(ClassifierRule::exact(path, kind));
            }
        };
        if self.ssh_enabled {
            self.ssh_log_files.iter().for_each(|p| pin(p, ParserKind::Ssh));
        }
        if self.nginx_enabled {
            pin(&self.nginx_access_log, ParserKind::NginxAccess);
            pin(&self.nginx_error_log, ParserKind::NginxError);
        }
        if self.apache_enabled {
            pin(&self.apache_access_log, ParserKind::ApacheAccess);
            pin(&self.apache_error_log, ParserKind::ApacheError);
            pin(&self.apache_rhel_access_log, ParserKind::ApacheAccess);
            pin(&self.apache_rhel_error_log, ParserKind::ApacheError);
        }
        if self.pm2_enabled {
            rules.push(ClassifierRule::under_dir(&self.pm2_log_dir, ParserKind::Pm2));
        }

        Classifier::with_rules(rules)
    }
}

// =============================================================================
// Loading and validation
// =============================================================================

/// Load and validate the config file at `config_path`.
///
/// Returns the validated config and a list of non-fatal warnings.
/// A missing file yields defaults with no warnings (first run). An unreadable
/// or unparsable file yields defaults plus a warning.
pub fn load_config(config_path: &Path) -> (AppConfig, Vec<String>) {
    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), Vec::new());
    }

    let content = match std::fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(source) => {
            let err = ConfigError::Io {
                path: config_path.to_path_buf(),
                source,
            };
            return (AppConfig::default(), vec![format!("{err}. Using defaults.")]);
        }
    };

    parse_config(&content, config_path)
}

/// Parse and validate config text. `source` is only used in messages.
pub fn parse_config(content: &str, source: &Path) -> (AppConfig, Vec<String>) {
    let raw: RawConfig = match toml::from_str(content) {
        Ok(r) => r,
        Err(e) => {
            let err = ConfigError::TomlParse {
                path: source.to_path_buf(),
                source: e,
            };
            return (AppConfig::default(), vec![format!("{err}. Using defaults.")]);
        }
    };

    tracing::info!(path = %source.display(), "Loaded config.toml");

    let mut warnings: Vec<String> = Vec::new();
    let config = validate(raw, &mut warnings);

    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Config validation produced warnings");
    }
    (config, warnings)
}

fn validate(raw: RawConfig, warnings: &mut Vec<String>) -> AppConfig {
    let mut config = AppConfig::default();

    // -- Server --
    if let Some(id) = raw.server.id.filter(|s| !s.trim().is_empty()) {
        config.server_id = id.trim().to_string();
    }

    // -- Database --
    if let Some(path) = non_empty(raw.database.path) {
        config.database_path = expand_home(&path);
    }
    if let Some(days) = raw.database.retention_days {
        config.retention_days = in_range(
            "database.retention_days",
            days,
            0..=constants::MAX_RETENTION_DAYS,
            constants::DEFAULT_RETENTION_DAYS,
            warnings,
        );
    }

    // -- Logging --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }
    config.log_file = non_empty(raw.logging.file).map(|f| expand_home(&f));

    // -- SSH --
    if let Some(enabled) = raw.ssh.enabled {
        config.ssh_enabled = enabled;
    }
    if let Some(files) = raw.ssh.log_files {
        config.ssh_log_files = files
            .iter()
            .filter(|f| !f.trim().is_empty())
            .map(|f| expand_home(f))
            .collect();
    }

    // -- Nginx --
    if let Some(enabled) = raw.nginx.enabled {
        config.nginx_enabled = enabled;
    }
    override_path(&mut config.nginx_access_log, raw.nginx.access_log);
    override_path(&mut config.nginx_error_log, raw.nginx.error_log);

    // -- Apache --
    if let Some(enabled) = raw.apache.enabled {
        config.apache_enabled = enabled;
    }
    override_path(&mut config.apache_access_log, raw.apache.access_log);
    override_path(&mut config.apache_error_log, raw.apache.error_log);
    override_path(&mut config.apache_rhel_access_log, raw.apache.rhel_access_log);
    override_path(&mut config.apache_rhel_error_log, raw.apache.rhel_error_log);

    // -- PM2 --
    if let Some(enabled) = raw.pm2.enabled {
        config.pm2_enabled = enabled;
    }
    override_path(&mut config.pm2_log_dir, raw.pm2.log_dir);
    if let Some(v) = raw.pm2.watch_stdout {
        config.pm2_watch_stdout = v;
    }
    if let Some(v) = raw.pm2.watch_stderr {
        config.pm2_watch_stderr = v;
    }

    // -- Custom logs --
    for (i, entry) in raw.watch.custom.into_iter().enumerate() {
        if entry.enabled == Some(false) {
            continue;
        }
        let name = entry.name.unwrap_or_else(|| format!("custom-{}", i + 1));
        let Some(path) = non_empty(entry.path) else {
            warnings.push(format!("[[watch.custom]] '{name}' has no path. Skipping."));
            continue;
        };
        let parser = match entry.parser.as_deref().unwrap_or("custom").parse::<ParserKind>() {
            Ok(p) => p,
            Err(e) => {
                warnings.push(format!("[[watch.custom]] '{name}': {e}. Skipping."));
                continue;
            }
        };
        config.custom_logs.push(CustomLog {
            name,
            path: expand_home(&path),
            parser,
        });
    }

    // -- Security thresholds --
    let s = &raw.security;
    let threshold_range = 1..=constants::MAX_DETECTOR_THRESHOLD;
    let window_range = 1..=constants::MAX_DETECTOR_WINDOW;
    if let Some(v) = s.brute_force_threshold {
        config.security.brute_force_threshold = in_range(
            "security.brute_force_threshold",
            v,
            threshold_range.clone(),
            constants::DEFAULT_BRUTE_FORCE_THRESHOLD,
            warnings,
        );
    }
    if let Some(v) = s.brute_force_window_minutes {
        config.security.brute_force_window_minutes = in_range(
            "security.brute_force_window_minutes",
            v,
            window_range.clone(),
            constants::DEFAULT_BRUTE_FORCE_WINDOW_MINUTES,
            warnings,
        );
    }
    if let Some(v) = s.port_scan_threshold {
        config.security.port_scan_threshold = in_range(
            "security.port_scan_threshold",
            v,
            threshold_range,
            constants::DEFAULT_PORT_SCAN_THRESHOLD,
            warnings,
        );
    }
    if let Some(v) = s.port_scan_window_seconds {
        config.security.port_scan_window_seconds = in_range(
            "security.port_scan_window_seconds",
            v,
            window_range,
            constants::DEFAULT_PORT_SCAN_WINDOW_SECONDS,
            warnings,
        );
    }

    // -- Monitoring --
    if let Some(size) = raw.monitoring.buffer_size {
        config.progress_capacity = in_range(
            "monitoring.buffer_size",
            size,
            constants::MIN_PROGRESS_CHANNEL_CAPACITY..=constants::MAX_PROGRESS_CHANNEL_CAPACITY,
            constants::DEFAULT_PROGRESS_CHANNEL_CAPACITY,
            warnings,
        );
    }

    config
}

/// Returns `value` if it lies in `range`, otherwise records a warning and
/// returns `default`.
fn in_range<T>(
    field: &str,
    value: T,
    range: std::ops::RangeInclusive<T>,
    default: T,
    warnings: &mut Vec<String>,
) -> T
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if range.contains(&value) {
        return value;
    }
    let err = ConfigError::ValueOutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        expected: format!("{}-{}", range.start(), range.end()),
    };
    warnings.push(format!("{err}. Using default ({default})."));
    default
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn override_path(target: &mut PathBuf, value: Option<String>) {
    if let Some(v) = non_empty(value) {
        *target = expand_home(&v);
    }
}

/// Expand a leading `~` or `$HOME` to the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    let rest = if raw == "~" || raw == "$HOME" {
        Some("")
    } else {
        raw.strip_prefix("~/")
            .or_else(|| raw.strip_prefix("$HOME/"))
    };
    match (rest, BaseDirs::new()) {
        (Some(rest), Some(dirs)) if rest.is_empty() => dirs.home_dir().to_path_buf(),
        (Some(rest), Some(dirs)) => dirs.home_dir().join(rest),
        _ => PathBuf::from(raw),
    }
}

/// Hostname from `HOSTNAME` or `/etc/hostname`, else `localhost`.
fn default_server_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| constants::FALLBACK_SERVER_ID.to_string())
}
