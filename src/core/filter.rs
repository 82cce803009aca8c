// Mlog - core/filter.rs
//
// Event query filter. All present fields are AND-combined.
// Core layer: pure data, no I/O. The store translates it into SQL and
// `matches` gives the same semantics in memory.

use crate::core::model::{Event, Severity};
use crate::util::constants::DEFAULT_QUERY_LIMIT;
use chrono::{DateTime, Utc};

/// Conjunctive filter over stored events, plus pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    /// Event type prefix (e.g. "SSH_" matches every SSH event), ASCII
    /// case-insensitive. None = all.
    pub event_type: Option<String>,

    /// Exact source IP.
    pub source_ip: Option<String>,

    /// Exact username.
    pub username: Option<String>,

    /// Exact severity.
    pub severity: Option<Severity>,

    /// Start of time range (inclusive). None = no lower bound.
    pub since: Option<DateTime<Utc>>,

    /// End of time range (inclusive). None = no upper bound.
    pub until: Option<DateTime<Utc>>,

    /// Page size. Values <= 0 mean DEFAULT_QUERY_LIMIT.
    pub limit: i64,

    /// Number of rows to skip. Values <= 0 mean no skip.
    pub offset: i64,
}

impl EventQuery {
    /// Page size actually applied.
    pub fn effective_limit(&self) -> i64 {
        if self.limit > 0 {
            self.limit
        } else {
            DEFAULT_QUERY_LIMIT
        }
    }

    /// Number of rows actually skipped.
    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }

    /// Check a single event against every filter field (pagination ignored).
    /// Empty strings are treated as "not set", matching the store.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(prefix) = non_empty(&self.event_type) {
            if !event
                .event_type
                .as_str()
                .starts_with(&prefix.to_ascii_uppercase())
            {
                return false;
            }
        }
        if let Some(ip) = non_empty(&self.source_ip) {
            if event.source_ip.as_deref() != Some(ip) {
                return false;
            }
        }
        if let Some(user) = non_empty(&self.username) {
            if event.username.as_deref() != Some(user) {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

pub(crate) fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::EventType;
    use chrono::TimeZone;

    fn make_event(event_type: EventType, ip: &str, hour: u32) -> Event {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap();
        Event::new(ts, "srv", event_type, Severity::Info, "m", "raw").with_source(ip, None)
    }

    #[test]
    fn test_default_limit_applies_when_unset_or_negative() {
        assert_eq!(EventQuery::default().effective_limit(), 100);
        let q = EventQuery {
            limit: -5,
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), 100);
        let q = EventQuery {
            limit: 7,
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), 7);
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let q = EventQuery::default();
        assert!(q.matches(&make_event(EventType::Custom, "", 1)));
    }

    #[test]
    fn test_event_type_is_prefix_match() {
        let q = EventQuery {
            event_type: Some("SSH_".to_string()),
            ..Default::default()
        };
        assert!(q.matches(&make_event(EventType::SshFailedAuth, "1.2.3.4", 1)));
        assert!(!q.matches(&make_event(EventType::NginxRequest, "1.2.3.4", 1)));

        let q = EventQuery {
            event_type: Some("pm2_".to_string()),
            ..Default::default()
        };
        assert!(q.matches(&make_event(EventType::Pm2Crash, "", 1)));
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let q = EventQuery {
            since: Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(!q.matches(&make_event(EventType::Custom, "", 9)));
        assert!(q.matches(&make_event(EventType::Custom, "", 10)));
        assert!(q.matches(&make_event(EventType::Custom, "", 12)));
        assert!(!q.matches(&make_event(EventType::Custom, "", 13)));
    }

    #[test]
    fn test_combined_filters() {
        let q = EventQuery {
            event_type: Some("NGINX".to_string()),
            source_ip: Some("10.0.0.5".to_string()),
            ..Default::default()
        };
        assert!(q.matches(&make_event(EventType::NginxRequest, "10.0.0.5", 1)));
        assert!(!q.matches(&make_event(EventType::NginxRequest, "10.0.0.6", 1)));
        assert!(!q.matches(&make_event(EventType::ApacheRequest, "10.0.0.5", 1)));
    }
}
