// Mlog - core/parser/http.rs
//
// Nginx and Apache access/error logs.
//
// Access logs: one fixed pattern per server. Nginx uses the "combined"
// format (referer + user agent); Apache uses the common log format, where
// the byte count may be "-". The bracketed request time is matched but never
// parsed; the ingestion timestamp is used instead.
//
// Error logs: the level token is mapped via `severity_for_level`.

use super::{parse_port, re, severity_for_level, severity_for_status};
use crate::core::model::{Event, EventType};
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn nginx_access_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r#"^(?P<ip>\S+)\s+-\s+(?P<user>\S+)\s+\[[^\]]+\]\s+"(?P<method>\S+)\s+(?P<uri>\S+)\s+\S+"\s+(?P<status>\d{3})\s+(?P<bytes>\d+|-)\s+"(?P<referer>[^"]*)"\s+"(?P<ua>[^"]*)""#)
    })
}

fn apache_access_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r#"^(?P<ip>\S+)\s+\S+\s+(?P<user>\S+)\s+\[[^\]]+\]\s+"(?P<method>\S+)\s+(?P<uri>\S+)\s+\S+"\s+(?P<status>\d{3})\s+(?P<bytes>\d+|-)"#)
    })
}

/// `2024/01/15 14:30:22 [error] 1234#5678: *9 message`
fn nginx_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r"^\d{4}/\d{2}/\d{2}\s+\d{2}:\d{2}:\d{2}\s+\[(?P<level>\w+)\]\s+\d+#\d+:\s+(?P<message>.*)$")
    })
}

/// Apache 2.2 `[date] [level] message` and 2.4 `[date] [module:level] message`.
fn apache_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"^\[[^\]]+\]\s+\[(?:[\w.-]+:)?(?P<level>\w+)\]\s+(?P<message>.*)$"))
}

/// `client: 1.2.3.4,` in nginx error lines.
fn nginx_client_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"client: (?P<ip>[^,\s]+)"))
}

/// `[client 1.2.3.4:5678]` in apache error lines (port is optional in 2.2).
fn apache_client_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"\[client (?P<ip>\d{1,3}(?:\.\d{1,3}){3})(?::(?P<port>\d+))?\]"))
}

// =============================================================================
// Access logs
// =============================================================================

pub fn parse_nginx_access(line: &str, timestamp: DateTime<Utc>, server_id: &str) -> Option<Event> {
    let caps = nginx_access_re().captures(line)?;
    let event = access_event(&caps, EventType::NginxRequest, line, timestamp, server_id)?;
    Some(
        event
            .with_metadata("referer", &caps["referer"])
            .with_metadata("useragent", &caps["ua"]),
    )
}

pub fn parse_apache_access(line: &str, timestamp: DateTime<Utc>, server_id: &str) -> Option<Event> {
    let caps = apache_access_re().captures(line)?;
    access_event(&caps, EventType::ApacheRequest, line, timestamp, server_id)
}

/// Fields shared by both access formats.
fn access_event(
    caps: &Captures<'_>,
    event_type: EventType,
    line: &str,
    timestamp: DateTime<Utc>,
    server_id: &str,
) -> Option<Event> {
    let status: u16 = caps["status"].parse().ok()?;
    let method = &caps["method"];
    let uri = &caps["uri"];
    // "-" means no body was sent.
    let bytes: u64 = caps["bytes"].parse().unwrap_or(0);

    Some(
        Event::new(
            timestamp,
            server_id,
            event_type,
            severity_for_status(status),
            format!("{method} {uri} -> {status}"),
            line,
        )
        .with_source(&caps["ip"], None)
        .with_username(&caps["user"])
        .with_metadata("method", method)
        .with_metadata("uri", uri)
        .with_metadata("status", status)
        .with_metadata("bytes", bytes),
    )
}

// =============================================================================
// Error logs
// =============================================================================

pub fn parse_nginx_error(line: &str, timestamp: DateTime<Utc>, server_id: &str) -> Option<Event> {
    let caps = nginx_error_re().captures(line)?;
    let message = &caps["message"];
    let client = nginx_client_re()
        .captures(message)
        .map(|c| c["ip"].to_string())
        .unwrap_or_default();

    Some(error_event(
        EventType::NginxError,
        &caps["level"],
        message,
        line,
        timestamp,
        server_id,
    )
    .with_source(&client, None))
}

pub fn parse_apache_error(line: &str, timestamp: DateTime<Utc>, server_id: &str) -> Option<Event> {
    let caps = apache_error_re().captures(line)?;
    let message = &caps["message"];
    let (client, port) = match apache_client_re().captures(message) {
        Some(c) => (
            c["ip"].to_string(),
            c.name("port").and_then(|p| parse_port(p.as_str())),
        ),
        None => (String::new(), None),
    };

    Some(error_event(
        EventType::ApacheError,
        &caps["level"],
        message,
        line,
        timestamp,
        server_id,
    )
    .with_source(&client, port))
}

fn error_event(
    event_type: EventType,
    level: &str,
    message: &str,
    line: &str,
    timestamp: DateTime<Utc>,
    server_id: &str,
) -> Event {
    Event::new(
        timestamp,
        server_id,
        event_type,
        severity_for_level(level),
        message,
        line,
    )
    .with_metadata("level", level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Severity;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn nginx_line(status: u16) -> String {
        format!(
            r#"203.0.113.7 - bob [15/Jan/2024:14:30:22 +0000] "POST /api/login HTTP/1.1" {status} 512 "https://example.com/" "Mozilla/5.0 (X11)""#
        )
    }

    #[test]
    fn test_nginx_access_fields() {
        let e = parse_nginx_access(&nginx_line(200), ts(), "srv").unwrap();
        assert_eq!(e.event_type, EventType::NginxRequest);
        assert_eq!(e.severity, Severity::Info);
        assert_eq!(e.source_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(e.username.as_deref(), Some("bob"));
        assert_eq!(e.message, "POST /api/login -> 200");
        assert_eq!(e.metadata_value("method").unwrap(), "POST");
        assert_eq!(e.metadata_value("uri").unwrap(), "/api/login");
        assert_eq!(e.metadata_value("status").unwrap(), 200);
        assert_eq!(e.metadata_value("bytes").unwrap(), 512);
        assert_eq!(e.metadata_value("referer").unwrap(), "https://example.com/");
        assert_eq!(e.metadata_value("useragent").unwrap(), "Mozilla/5.0 (X11)");
    }

    #[test]
    fn test_access_status_property() {
        for status in (100u16..=599).step_by(7) {
            let expected = if status >= 500 {
                Severity::Error
            } else if status >= 400 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let e = parse_nginx_access(&nginx_line(status), ts(), "srv").unwrap();
            assert_eq!(e.severity, expected, "nginx status {status}");

            let apache = format!(r#"10.0.0.1 - - [15/Jan/2024:14:30:22 +0000] "GET / HTTP/1.1" {status} -"#);
            let e = parse_apache_access(&apache, ts(), "srv").unwrap();
            assert_eq!(e.severity, expected, "apache status {status}");
        }
    }

    #[test]
    fn test_embedded_timestamp_is_ignored() {
        let e = parse_nginx_access(&nginx_line(200), ts(), "srv").unwrap();
        assert_eq!(e.timestamp, ts());
        let e = parse_nginx_error(
            "2024/01/15 14:30:22 [error] 1#1: *1 open() failed",
            ts(),
            "srv",
        )
        .unwrap();
        assert_eq!(e.timestamp, ts());
    }

    #[test]
    fn test_apache_access_common_format() {
        let line = r#"198.51.100.4 - - [10/Oct/2023:13:55:36 -0700] "GET /missing.png HTTP/1.0" 404 -"#;
        let e = parse_apache_access(line, ts(), "srv").unwrap();
        assert_eq!(e.event_type, EventType::ApacheRequest);
        assert_eq!(e.severity, Severity::Warning);
        assert_eq!(e.username, None);
        assert_eq!(e.metadata_value("bytes").unwrap(), 0);
        assert!(e.metadata_value("referer").is_none());
    }

    #[test]
    fn test_access_rejects_garbage() {
        assert!(parse_nginx_access("not an access line", ts(), "srv").is_none());
        assert!(parse_apache_access("GET / 200", ts(), "srv").is_none());
    }

    #[test]
    fn test_nginx_error_levels() {
        let cases = [
            ("error", Severity::Error),
            ("crit", Severity::Critical),
            ("alert", Severity::Critical),
            ("emerg", Severity::Critical),
            ("warn", Severity::Warning),
            ("notice", Severity::Warning),
        ];
        for (level, expected) in cases {
            let line = format!(
                "2024/01/15 14:30:22 [{level}] 1234#0: *5 upstream timed out, client: 10.0.0.9, server: example.com"
            );
            let e = parse_nginx_error(&line, ts(), "srv").unwrap();
            assert_eq!(e.event_type, EventType::NginxError);
            assert_eq!(e.severity, expected, "level {level}");
            assert_eq!(e.metadata_value("level").unwrap(), level);
            assert_eq!(e.source_ip.as_deref(), Some("10.0.0.9"));
        }
    }

    #[test]
    fn test_apache_error_24_and_22_formats() {
        let line = "[Wed Oct 11 14:32:52.123456 2023] [core:crit] [pid 1234] [client 10.0.0.3:4455] AH00126: Invalid URI";
        let e = parse_apache_error(line, ts(), "srv").unwrap();
        assert_eq!(e.event_type, EventType::ApacheError);
        assert_eq!(e.severity, Severity::Critical);
        assert_eq!(e.source_ip.as_deref(), Some("10.0.0.3"));
        assert_eq!(e.source_port, Some(4455));

        let line = "[Wed Oct 11 14:32:52 2000] [error] [client 127.0.0.1] client denied by server configuration";
        let e = parse_apache_error(line, ts(), "srv").unwrap();
        assert_eq!(e.severity, Severity::Error);
        assert_eq!(e.source_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(e.source_port, None);

        let line = "[Wed Oct 11 14:32:52.1 2023] [mpm_event:notice] [pid 1:tid 2] AH00489: resuming";
        let e = parse_apache_error(line, ts(), "srv").unwrap();
        assert_eq!(e.severity, Severity::Warning);
        assert_eq!(e.metadata_value("level").unwrap(), "notice");
    }

    #[test]
    fn test_error_parsers_reject_garbage() {
        assert!(parse_nginx_error("something odd happened", ts(), "srv").is_none());
        assert!(parse_apache_error("something odd happened", ts(), "srv").is_none());
    }
}
