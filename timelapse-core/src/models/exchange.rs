use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::SchemaMap;

/// Lower-cased header name -> value.
pub type HeaderMap = BTreeMap<String, String>;

/// One observed request/response pair.
///
/// Created once by the normalizer; `endpoint_key` and `schema_map` are never
/// recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedExchange {
    pub id: Uuid,
    pub endpoint_key: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub query_signature: String,
    pub environment: String,
    pub branch: String,
    pub status: u16,
    pub status_text: String,
    pub latency_ms: i64,
    pub mime_type: String,
    pub request_headers: HeaderMap,
    pub request_body: String,
    pub response_headers: HeaderMap,
    pub response_body: String,
    /// UTF-8 byte length of the stored (possibly truncated) response body.
    pub payload_size: usize,
    pub schema_map: SchemaMap,
    /// Epoch milliseconds; the only ordering key within an endpoint.
    pub started_at: i64,
}

impl CapturedExchange {
    /// Status classes the UI renders as healthy.
    pub fn is_ok_status(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}
