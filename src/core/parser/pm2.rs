// Mlog - core/parser/pm2.rs
//
// PM2 daemon log (pm2.log) and per-app out/error logs.
//
// Lifecycle rules run against the lower-cased line, first match wins:
//   start -> stop -> restart -> exit -> crash -> generic error.
// Crash and error markers are matched against the original line: crash
// markers case-insensitively (signal names are upper-case in the source),
// error markers case-sensitively (`Error:` vs. the word "error" in prose).

use super::re;
use crate::core::model::{Event, EventType, Severity};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Start,
    Stop,
    Restart,
    Exit,
}

struct LifecycleRule {
    re: Regex,
    kind: Lifecycle,
}

/// Patterns are lower-case because they run against the lower-cased line.
/// Each captures the application name as `app`.
fn lifecycle_rules() -> &'static [LifecycleRule] {
    static RULES: OnceLock<Vec<LifecycleRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rule = |pat: &str, kind| LifecycleRule { re: re(pat), kind };
        vec![
            rule(
                r"\[\S+\]\s+(?:app name|pm2)\s+(?P<app>\S+)\s+(?:has been|being) (?:started|launched)",
                Lifecycle::Start,
            ),
            rule(
                r"app \[(?P<app>[^\]:\s]+)(?::\d+)?\] (?:starting in|online)",
                Lifecycle::Start,
            ),
            rule(
                r"\[\S+\]\s+(?:app name|pm2)\s+(?P<app>\S+)\s+has been (?:stopped|deleted)",
                Lifecycle::Stop,
            ),
            rule(r"stopping app:(?P<app>\S+)", Lifecycle::Stop),
            rule(
                r"\[\S+\]\s+(?:app name|pm2)\s+(?P<app>\S+)\s+(?:has been restarted|restarting)",
                Lifecycle::Restart,
            ),
            rule(
                r"applying action restartprocessid on app \[(?P<app>[^\]]+)\]",
                Lifecycle::Restart,
            ),
            rule(
                r"\[\S+\]\s+(?:app name|pm2)\s+(?P<app>\S+)\s+(?:exited with code|has exited)",
                Lifecycle::Exit,
            ),
            rule(
                r"app \[(?P<app>[^\]:\s]+)(?::\d+)?\] exited with code",
                Lifecycle::Exit,
            ),
        ]
    })
}

fn crash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"(?i)(SIGSEGV|SIGABRT|SIGBUS|segmentation fault|heap out of memory)"))
}

fn error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"(Error:|Exception:|ERR_|TypeError:|SyntaxError:)"))
}

/// Classify one PM2 log line.
pub fn parse(line: &str, timestamp: DateTime<Utc>, server_id: &str) -> Option<Event> {
    let lower = line.to_lowercase();

    for rule in lifecycle_rules() {
        let Some(caps) = rule.re.captures(&lower) else {
            continue;
        };
        let app = &caps["app"];
        let event = match rule.kind {
            Lifecycle::Start => Event::new(
                timestamp,
                server_id,
                EventType::Pm2Start,
                Severity::Info,
                format!("PM2 process started: {app}"),
                line,
            ),
            Lifecycle::Stop => Event::new(
                timestamp,
                server_id,
                EventType::Pm2Stop,
                Severity::Info,
                format!("PM2 process stopped: {app}"),
                line,
            ),
            Lifecycle::Restart => Event::new(
                timestamp,
                server_id,
                EventType::Pm2Restart,
                Severity::Info,
                format!("PM2 process restarted: {app}"),
                line,
            ),
            // An exit is a stop the operator did not ask for.
            Lifecycle::Exit => Event::new(
                timestamp,
                server_id,
                EventType::Pm2Stop,
                Severity::Warning,
                format!("PM2 process exited: {app}"),
                line,
            )
            .with_metadata("reason", "exited"),
        };
        return Some(event.with_metadata("app", app));
    }

    if let Some(m) = crash_re().find(line) {
        return Some(
            Event::new(
                timestamp,
                server_id,
                EventType::Pm2Crash,
                Severity::Critical,
                "PM2 process crashed",
                line,
            )
            .with_metadata("marker", m.as_str()),
        );
    }

    if let Some(m) = error_re().find(line) {
        return Some(
            Event::new(
                timestamp,
                server_id,
                EventType::Pm2Error,
                Severity::Error,
                "PM2 error",
                line,
            )
            .with_metadata("marker", m.as_str()),
        );
    }

    None
}
