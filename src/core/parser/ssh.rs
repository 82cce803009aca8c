// Mlog - core/parser/ssh.rs
//
// sshd lines from auth.log / secure.
//
// Rules are tried in priority order and the first match wins. Later rules can
// be looser than earlier ones (e.g. "Invalid user" also appears inside
// "Failed password for invalid user"), so the order is part of the contract.
// Fields come from named capture groups: `user`, `ip`, `port`, `method`.
// A rule that does not capture a field leaves it unset.

use super::{parse_port, re};
use crate::core::model::{Event, EventType, Severity};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

struct SshRule {
    re: Regex,
    event_type: EventType,
    severity: Severity,
    message: &'static str,
}

fn rules() -> &'static [SshRule] {
    static RULES: OnceLock<Vec<SshRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            SshRule {
                re: re(
                    r"Accepted (?P<method>password|publickey) for (?P<user>\S+) from (?P<ip>\S+) port (?P<port>\d+)",
                ),
                event_type: EventType::SshConnected,
                severity: Severity::Info,
                message: "SSH login successful",
            },
            SshRule {
                re: re(
                    r"Failed (?P<method>password|keyboard-interactive) for (?:invalid user )?(?P<user>\S+) from (?P<ip>\S+) port (?P<port>\d+)",
                ),
                event_type: EventType::SshFailedAuth,
                severity: Severity::Warning,
                message: "SSH login failed",
            },
            SshRule {
                re: re(r"Invalid user (?P<user>\S+) from (?P<ip>\S+) port (?P<port>\d+)"),
                event_type: EventType::SshFailedAuth,
                severity: Severity::Warning,
                message: "SSH invalid user",
            },
            SshRule {
                re: re(r"Disconnected from user (?P<user>\S+) \[preauth\]"),
                event_type: EventType::SshDisconnected,
                severity: Severity::Info,
                message: "SSH disconnected",
            },
            SshRule {
                re: re(r"Received disconnect from (?P<ip>\S+) port (?P<port>\d+)"),
                event_type: EventType::SshDisconnected,
                severity: Severity::Info,
                message: "SSH disconnected",
            },
            // The port is present in the text but deliberately not captured.
            SshRule {
                re: re(r"Connection closed by (?P<ip>\S+) port \d+"),
                event_type: EventType::SshDisconnected,
                severity: Severity::Info,
                message: "SSH connection closed",
            },
        ]
    })
}

/// Classify one sshd line.
pub fn parse(line: &str, timestamp: DateTime<Utc>, server_id: &str) -> Option<Event> {
    rules().iter().find_map(|rule| {
        let caps = rule.re.captures(line)?;
        let field = |name: &str| caps.name(name).map(|m| m.as_str()).unwrap_or("");

        let mut event = Event::new(
            timestamp,
            server_id,
            rule.event_type,
            rule.severity,
            rule.message,
            line,
        )
        .with_username(field("user"))
        .with_source(field("ip"), parse_port(field("port")));

        if let Some(method) = caps.name("method") {
            event = event.with_metadata("auth_method", method.as_str());
        }
        Some(event)
    })
}
