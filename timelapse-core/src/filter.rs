use serde::{Deserialize, Serialize};

use crate::models::CapturedExchange;

/// Active timeline filters. An empty/absent field does not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineFilter {
    /// Allow-list of status codes.
    pub statuses: Vec<u16>,
    /// Inclusive latency ceiling.
    pub max_latency_ms: Option<i64>,
    /// Case-insensitive substring of the response body.
    pub response_contains: Option<String>,
}

impl TimelineFilter {
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
            && self.max_latency_ms.is_none()
            && self.needle().is_none()
    }

    pub fn matches(&self, exchange: &CapturedExchange) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&exchange.status) {
            return false;
        }
        if let Some(max) = self.max_latency_ms {
            if exchange.latency_ms > max {
                return false;
            }
        }
        if let Some(needle) = self.needle() {
            if !exchange.response_body.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }

    fn needle(&self) -> Option<String> {
        self.response_contains
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEvent;
    use crate::normalize::normalize;

    fn exchange(status: u16, latency_ms: i64, body: &str) -> CapturedExchange {
        let mut e = normalize(&RawEvent::default(), body, 0);
        e.status = status;
        e.latency_ms = latency_ms;
        e
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = TimelineFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&exchange(500, 9_999, "")));
    }

    #[test]
    fn test_status_allow_list() {
        let filter = TimelineFilter {
            statuses: vec![200, 404],
            ..Default::default()
        };
        assert!(filter.matches(&exchange(404, 1, "")));
        assert!(!filter.matches(&exchange(500, 1, "")));
    }

    #[test]
    fn test_latency_ceiling_is_inclusive() {
        let filter = TimelineFilter {
            max_latency_ms: Some(100),
            ..Default::default()
        };
        assert!(filter.matches(&exchange(200, 100, "")));
        assert!(!filter.matches(&exchange(200, 101, "")));
    }

    #[test]
    fn test_response_substring_case_insensitive() {
        let filter = TimelineFilter {
            response_contains: Some("Alice".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&exchange(200, 1, r#"{"name":"ALICE"}"#)));
        assert!(!filter.matches(&exchange(200, 1, r#"{"name":"bob"}"#)));

        let blank = TimelineFilter {
            response_contains: Some(String::new()),
            ..Default::default()
        };
        assert!(blank.is_empty());
    }
}
