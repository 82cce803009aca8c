// Mlog - core/parser/custom.rs
//
// Catch-all parser for user-declared log files with no dedicated format.
// Every non-empty line becomes a CUSTOM event; severity is inferred from
// keywords, most severe first.

use crate::core::model::{Event, EventType, Severity};
use chrono::{DateTime, Utc};

/// Keywords checked as case-insensitive substrings, most severe first.
const SEVERITY_KEYWORDS: &[(Severity, &[&str])] = &[
    (Severity::Critical, &["fatal", "panic", "emerg", "crit"]),
    (Severity::Error, &["error", "fail"]),
    (Severity::Warning, &["warn"]),
    (Severity::Debug, &["debug", "trace"]),
];

pub fn parse(line: &str, timestamp: DateTime<Utc>, server_id: &str) -> Option<Event> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(Event::new(
        timestamp,
        server_id,
        EventType::Custom,
        infer_severity(trimmed),
        trimmed,
        line,
    ))
}

/// Most severe keyword match, or Info when nothing matches.
pub fn infer_severity(message: &str) -> Severity {
    let lower = message.to_lowercase();
    SEVERITY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(severity, _)| *severity)
        .unwrap_or(Severity::Info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_keyword_inference_prefers_most_severe() {
        assert_eq!(infer_severity("FATAL: disk failure"), Severity::Critical);
        assert_eq!(infer_severity("request failed"), Severity::Error);
        assert_eq!(infer_severity("Warning: low memory"), Severity::Warning);
        assert_eq!(infer_severity("debug: cache warm"), Severity::Debug);
        assert_eq!(infer_severity("backup completed"), Severity::Info);
    }

    #[test]
    fn test_every_non_empty_line_is_an_event() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let e = parse("  job finished  ", ts, "srv").unwrap();
        assert_eq!(e.event_type, EventType::Custom);
        assert_eq!(e.message, "job finished");
        assert_eq!(e.raw_log, "  job finished  ");
        assert!(parse("   ", ts, "srv").is_none());
    }
}
