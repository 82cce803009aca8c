// Mlog - core/parser/mod.rs
//
// Line parsers, one per log family. Every parser is a pure function
// `(line, ingestion timestamp, server id) -> Option<Event>`:
//   - A line matching no recognised pattern yields `None`. That is the normal
//     outcome for unrecognised text, not an error.
//   - No parser reads a timestamp embedded in the line. The caller-supplied
//     ingestion timestamp is always used, so stored order is arrival order.
//
// Core layer: no I/O. Regexes are compiled once into `OnceLock` statics.

pub mod custom;
pub mod http;
pub mod pm2;
pub mod ssh;

use crate::core::model::{Event, Severity};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::str::FromStr;

/// Tagged parser variant selected for a watched file by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    Ssh,
    NginxAccess,
    NginxError,
    ApacheAccess,
    ApacheError,
    Pm2,
    Custom,
}

impl ParserKind {
    pub fn all() -> &'static [ParserKind] {
        &[
            ParserKind::Ssh,
            ParserKind::NginxAccess,
            ParserKind::NginxError,
            ParserKind::ApacheAccess,
            ParserKind::ApacheError,
            ParserKind::Pm2,
            ParserKind::Custom,
        ]
    }

    /// Config-file spelling of the variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Ssh => "ssh",
            ParserKind::NginxAccess => "nginx_access",
            ParserKind::NginxError => "nginx_error",
            ParserKind::ApacheAccess => "apache_access",
            ParserKind::ApacheError => "apache_error",
            ParserKind::Pm2 => "pm2",
            ParserKind::Custom => "custom",
        }
    }

    /// Parse one line with the parser this variant selects.
    pub fn parse(&self, line: &str, timestamp: DateTime<Utc>, server_id: &str) -> Option<Event> {
        match self {
            ParserKind::Ssh => ssh::parse(line, timestamp, server_id),
            ParserKind::NginxAccess => http::parse_nginx_access(line, timestamp, server_id),
            ParserKind::NginxError => http::parse_nginx_error(line, timestamp, server_id),
            ParserKind::ApacheAccess => http::parse_apache_access(line, timestamp, server_id),
            ParserKind::ApacheError => http::parse_apache_error(line, timestamp, server_id),
            ParserKind::Pm2 => pm2::parse(line, timestamp, server_id),
            ParserKind::Custom => custom::parse(line, timestamp, server_id),
        }
    }
}

impl std::fmt::Display for ParserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParserKind::all()
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown parser '{s}'"))
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Severity for an HTTP status code: >=500 error, >=400 warning, else info.
pub fn severity_for_status(status: u16) -> Severity {
    if status >= 500 {
        Severity::Error
    } else if status >= 400 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Severity for a textual server error level (nginx/apache):
/// "error" -> error, crit/alert/emerg -> critical, anything else -> warning.
pub fn severity_for_level(level: &str) -> Severity {
    match level.to_ascii_lowercase().as_str() {
        "error" => Severity::Error,
        "crit" | "alert" | "emerg" => Severity::Critical,
        _ => Severity::Warning,
    }
}

/// Parse a decimal port; anything out of range is treated as absent.
pub(crate) fn parse_port(raw: &str) -> Option<u16> {
    raw.parse::<u16>().ok()
}

/// Compile a built-in regex.
///
/// Built-in patterns are exercised by the unit tests in each parser module,
/// so a mistake shows up as a failing test rather than a runtime panic.
pub(crate) fn re(pat: &str) -> Regex {
    Regex::new(pat).expect("built-in parser regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_severity_ranges() {
        for status in [100u16, 200, 204, 301, 304, 399] {
            assert_eq!(severity_for_status(status), Severity::Info, "status {status}");
        }
        for status in 400u16..=499 {
            assert_eq!(severity_for_status(status), Severity::Warning);
        }
        for status in 500u16..=599 {
            assert_eq!(severity_for_status(status), Severity::Error);
        }
    }

    #[test]
    fn test_level_severity_mapping() {
        assert_eq!(severity_for_level("error"), Severity::Error);
        assert_eq!(severity_for_level("crit"), Severity::Critical);
        assert_eq!(severity_for_level("alert"), Severity::Critical);
        assert_eq!(severity_for_level("emerg"), Severity::Critical);
        assert_eq!(severity_for_level("warn"), Severity::Warning);
        assert_eq!(severity_for_level("notice"), Severity::Warning);
        assert_eq!(severity_for_level("info"), Severity::Warning);
    }

    #[test]
    fn test_parser_kind_from_str() {
        for k in ParserKind::all() {
            assert_eq!(k.as_str().parse::<ParserKind>().unwrap(), *k);
        }
        assert!("syslog".parse::<ParserKind>().is_err());
    }

    #[test]
    fn test_dispatch_uses_supplied_timestamp() {
        let ts = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        let line = r#"10.0.0.1 - - [15/Jan/2024:14:30:22 +0000] "GET / HTTP/1.1" 200 5 "-" "curl""#;
        let event = ParserKind::NginxAccess.parse(line, ts, "srv").unwrap();
        assert_eq!(event.timestamp, ts);
    }
}
