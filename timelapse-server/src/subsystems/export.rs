//! Export bundle: one endpoint's history, oldest first, each entry annotated
//! with the diff against its predecessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use timelapse_core::config::DiffConfig;
use timelapse_core::diff;
use timelapse_core::models::HeaderMap;
use timelapse_core::CapturedExchange;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub generated_at: DateTime<Utc>,
    pub endpoint: String,
    /// Number of exchanges for the endpoint, before sampling.
    pub total: usize,
    pub sample: Vec<ExportEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    pub id: Uuid,
    pub started_at: i64,
    pub status: u16,
    pub latency_ms: i64,
    pub environment: String,
    pub branch: String,
    pub method: String,
    pub url: String,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
    pub diff_summary: String,
}

/// `sample_size = 0` keeps every entry.
pub fn build_bundle(
    exchanges: &[CapturedExchange],
    endpoint: &str,
    config: &DiffConfig,
    sample_size: usize,
) -> ExportBundle {
    let mut entries: Vec<&CapturedExchange> =
        exchanges.iter().filter(|e| e.endpoint_key == endpoint).collect();
    entries.sort_by_key(|e| e.started_at);

    let annotated: Vec<ExportEntry> = entries
        .iter()
        .enumerate()
        .map(|(idx, exchange)| ExportEntry {
            id: exchange.id,
            started_at: exchange.started_at,
            status: exchange.status,
            latency_ms: exchange.latency_ms,
            environment: exchange.environment.clone(),
            branch: exchange.branch.clone(),
            method: exchange.method.clone(),
            url: exchange.url.clone(),
            request_headers: exchange.request_headers.clone(),
            response_headers: exchange.response_headers.clone(),
            diff_summary: if idx == 0 {
                diff::FIRST_CALL.to_string()
            } else {
                diff::report_text(exchanges, exchange, config)
            },
        })
        .collect();

    let total = annotated.len();
    let skip = match sample_size {
        0 => 0,
        n => total.saturating_sub(n),
    };

    ExportBundle {
        generated_at: Utc::now(),
        endpoint: endpoint.to_string(),
        total,
        sample: annotated.into_iter().skip(skip).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timelapse_core::normalize::normalize;
    use timelapse_core::RawEvent;

    fn exchange(key: &str, started_at: i64, body: &str) -> CapturedExchange {
        let mut e = normalize(&RawEvent::default(), body, started_at);
        e.endpoint_key = key.to_string();
        e
    }

    #[test]
    fn test_bundle_orders_oldest_first_and_annotates() {
        let exchanges = vec![
            exchange("GET /a", 3_000, r#"{"id":1,"extra":true}"#),
            exchange("GET /a", 1_000, r#"{"id":1}"#),
            exchange("GET /b", 2_000, ""),
        ];
        let bundle = build_bundle(&exchanges, "GET /a", &DiffConfig::default(), 20);

        assert_eq!(bundle.endpoint, "GET /a");
        assert_eq!(bundle.total, 2);
        assert_eq!(bundle.sample[0].started_at, 1_000);
        assert_eq!(bundle.sample[0].diff_summary, diff::FIRST_CALL);
        assert!(bundle.sample[1].diff_summary.contains("Added: extra (boolean)"));
    }

    #[test]
    fn test_bundle_keeps_latest_sample() {
        let exchanges: Vec<CapturedExchange> =
            (0..30).map(|i| exchange("GET /a", i * 1_000, "")).collect();

        let bundle = build_bundle(&exchanges, "GET /a", &DiffConfig::default(), 20);
        assert_eq!(bundle.total, 30);
        assert_eq!(bundle.sample.len(), 20);
        assert_eq!(bundle.sample[0].started_at, 10_000);

        let everything = build_bundle(&exchanges, "GET /a", &DiffConfig::default(), 0);
        assert_eq!(everything.sample.len(), 30);
    }

    #[test]
    fn test_bundle_serializes_camel_case() {
        let exchanges = vec![exchange("GET /a", 1_000, "")];
        let bundle = build_bundle(&exchanges, "GET /a", &DiffConfig::default(), 20);
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json["generatedAt"].is_string());
        assert_eq!(json["sample"][0]["diffSummary"], "First call.");
        assert_eq!(json["sample"][0]["latencyMs"], 0);
    }
}
