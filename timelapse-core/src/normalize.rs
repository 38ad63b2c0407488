//! Exchange normalizer: raw network event in, `CapturedExchange` out.
//!
//! Normalization never fails. Malformed URLs, bodies that are not JSON and
//! missing fields all degrade to defined fallbacks:
//!
//! | input                 | fallback                                   |
//! |-----------------------|--------------------------------------------|
//! | method                | `GET`                                      |
//! | status                | `0`                                        |
//! | start time            | capture time                               |
//! | URL does not parse    | path = raw URL, host = `unknown`, no query |
//! | body is not JSON      | empty schema map                           |
//! | no environment tag    | `unlabeled`                                |
//! | no branch tag         | `unknown-branch`                           |

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::error::TimelapseResult;
use crate::models::{CapturedExchange, HeaderMap, RawEvent, RawHeader};
use crate::schema::{self, SchemaMap};

/// Maximum stored body length, in characters.
pub const MAX_BODY_LENGTH: usize = 15_000;

/// Appended to bodies cut at `MAX_BODY_LENGTH`.
pub const TRUNCATION_MARKER: &str = "\n\n[truncated]";

pub const DEFAULT_METHOD: &str = "GET";
pub const UNKNOWN_HOST: &str = "unknown";
pub const DEFAULT_ENVIRONMENT: &str = "unlabeled";
pub const DEFAULT_BRANCH: &str = "unknown-branch";

/// Environment tag candidates, checked in this order.
const ENVIRONMENT_SOURCES: &[TagSource] = &[
    TagSource::Header("x-env"),
    TagSource::Header("x-environment"),
    TagSource::Header("x-deployment"),
    TagSource::Query("env"),
    TagSource::Query("stage"),
];

/// Branch tag candidates, checked in this order.
const BRANCH_SOURCES: &[TagSource] = &[
    TagSource::Header("x-branch"),
    TagSource::Header("x-git-branch"),
    TagSource::Query("branch"),
];

#[derive(Debug, Clone, Copy)]
enum TagSource {
    Header(&'static str),
    Query(&'static str),
}

// ============================================================================
// Body fetch seam
// ============================================================================

/// Asynchronous source of a response body, provided by the host bridge.
#[async_trait]
pub trait BodySource: Send + Sync {
    /// `Ok(None)` means the host had no content for this request.
    async fn fetch_body(&self) -> TimelapseResult<Option<String>>;
}

/// Body shipped together with the event.
#[derive(Debug, Clone, Default)]
pub struct InlineBody(pub Option<String>);

#[async_trait]
impl BodySource for InlineBody {
    async fn fetch_body(&self) -> TimelapseResult<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Fetch the body and normalize. A failed fetch is logged and the exchange
/// is recorded with an empty response body.
pub async fn capture(event: &RawEvent, source: &dyn BodySource, now_ms: i64) -> CapturedExchange {
    let body = match source.fetch_body().await {
        Ok(body) => body.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "Response body fetch failed, recording without body");
            String::new()
        }
    };
    normalize(event, &body, now_ms)
}

// ============================================================================
// Normalization
// ============================================================================

/// Outcome of best-effort JSON parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Parsed(Value),
    Unparseable,
}

impl ParsedBody {
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return ParsedBody::Unparseable;
        }
        match serde_json::from_str(text) {
            Ok(value) => ParsedBody::Parsed(value),
            Err(_) => ParsedBody::Unparseable,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ParsedBody::Parsed(value) => Some(value),
            ParsedBody::Unparseable => None,
        }
    }

    pub fn schema(&self) -> SchemaMap {
        self.value().map(schema::infer).unwrap_or_default()
    }
}

/// Build a `CapturedExchange` from a raw event and its resolved body text.
pub fn normalize(event: &RawEvent, response_body: &str, now_ms: i64) -> CapturedExchange {
    let request = event.request.clone().unwrap_or_default();
    let response = event.response.clone().unwrap_or_default();

    let raw_url = request.url.unwrap_or_default();
    let url = parse_url(&raw_url);
    let method = request
        .method
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_METHOD.to_string());
    let path = url
        .as_ref()
        .map(|u| u.path().to_string())
        .unwrap_or_else(|| raw_url.clone());

    let request_headers = headers_to_map(&request.headers);
    let response_headers = headers_to_map(&response.headers);

    let response_body = trim_body(response_body);
    let schema_map = ParsedBody::parse(&response_body).schema();
    let request_body = trim_body(
        request
            .post_data
            .and_then(|p| p.text)
            .as_deref()
            .unwrap_or(""),
    );

    CapturedExchange {
        id: Uuid::new_v4(),
        endpoint_key: endpoint_key(&method, &path),
        host: url.as_ref().map(url_host).unwrap_or_else(|| UNKNOWN_HOST.to_string()),
        query_signature: query_signature(url.as_ref()),
        environment: detect_environment(&request_headers, url.as_ref()),
        branch: detect_branch(&request_headers, url.as_ref()),
        status: response.status.unwrap_or(0),
        status_text: response.status_text.unwrap_or_default(),
        latency_ms: latency_ms(event.time),
        mime_type: response.content.and_then(|c| c.mime_type).unwrap_or_default(),
        payload_size: response_body.len(),
        started_at: started_at_ms(event.started_date_time.as_deref(), now_ms),
        method,
        url: raw_url,
        path,
        request_headers,
        request_body,
        response_headers,
        response_body,
        schema_map,
    }
}

/// Cut `body` to `MAX_BODY_LENGTH` characters and append the marker.
/// Idempotent: trimming a trimmed body returns it unchanged.
pub fn trim_body(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_LENGTH) {
        None => body.to_string(),
        Some((cut, _)) => format!("{}{}", &body[..cut], TRUNCATION_MARKER),
    }
}

pub fn endpoint_key(method: &str, path: &str) -> String {
    format!("{method} {path}")
}

pub fn parse_url(raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!(url = raw, error = %e, "Captured URL did not parse, using raw string");
            None
        }
    }
}

/// Host with a non-default port appended, `api.example.com:8443`.
fn url_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or(UNKNOWN_HOST);
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Sorted, deduplicated query parameter names joined with `&`.
pub fn query_signature(url: Option<&Url>) -> String {
    let Some(url) = url else {
        return String::new();
    };
    let names: std::collections::BTreeSet<String> =
        url.query_pairs().map(|(name, _)| name.into_owned()).collect();
    names.into_iter().collect::<Vec<_>>().join("&")
}

/// Lower-case header names; later entries override earlier ones.
pub fn headers_to_map(headers: &[RawHeader]) -> HeaderMap {
    headers
        .iter()
        .map(|h| (h.name.to_lowercase(), h.value.clone()))
        .collect()
}

pub fn detect_environment(headers: &HeaderMap, url: Option<&Url>) -> String {
    first_tag(ENVIRONMENT_SOURCES, headers, url).unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

pub fn detect_branch(headers: &HeaderMap, url: Option<&Url>) -> String {
    first_tag(BRANCH_SOURCES, headers, url).unwrap_or_else(|| DEFAULT_BRANCH.to_string())
}

fn first_tag(sources: &[TagSource], headers: &HeaderMap, url: Option<&Url>) -> Option<String> {
    sources.iter().find_map(|source| {
        let value = match source {
            TagSource::Header(name) => headers.get(*name).cloned(),
            TagSource::Query(name) => url.and_then(|u| query_param(u, name)),
        };
        value.filter(|v| !v.is_empty())
    })
}

/// First value of a query parameter.
fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Longest latency a record can carry, in milliseconds.
pub const MAX_LATENCY_MS: i64 = u32::MAX as i64;

/// Negative or non-finite timings count as zero; huge ones are capped.
fn latency_ms(time_seconds: Option<f64>) -> i64 {
    match time_seconds {
        Some(t) if t.is_finite() && t > 0.0 => {
            (t * 1000.0).round().min(MAX_LATENCY_MS as f64) as i64
        }
        _ => 0,
    }
}

fn started_at_ms(started: Option<&str>, now_ms: i64) -> i64 {
    started
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(now_ms)
}
