//! Raw network events as delivered by the browser instrumentation bridge.
//!
//! The shape follows a HAR entry. Every field is optional because the
//! bridge forwards whatever devtools hands it; the normalizer owns the
//! fallbacks. A null or mistyped field reads as absent instead of
//! rejecting the whole event.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvent {
    /// RFC 3339 start time of the request.
    #[serde(deserialize_with = "lenient")]
    pub started_date_time: Option<String>,
    /// Total elapsed time in seconds.
    #[serde(deserialize_with = "lenient_seconds")]
    pub time: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub request: Option<RawRequest>,
    #[serde(deserialize_with = "lenient")]
    pub response: Option<RawResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawRequest {
    #[serde(deserialize_with = "lenient")]
    pub method: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub url: Option<String>,
    /// Ordered as received; names may repeat and differ in case.
    #[serde(deserialize_with = "lenient_headers")]
    pub headers: Vec<RawHeader>,
    #[serde(deserialize_with = "lenient")]
    pub post_data: Option<RawPostData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawResponse {
    #[serde(deserialize_with = "lenient_status")]
    pub status: Option<u16>,
    #[serde(deserialize_with = "lenient")]
    pub status_text: Option<String>,
    #[serde(deserialize_with = "lenient_headers")]
    pub headers: Vec<RawHeader>,
    #[serde(deserialize_with = "lenient")]
    pub content: Option<RawContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawHeader {
    #[serde(deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(deserialize_with = "lenient_text")]
    pub value: String,
}

impl RawHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPostData {
    #[serde(deserialize_with = "lenient")]
    pub mime_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawContent {
    #[serde(deserialize_with = "lenient")]
    pub mime_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub size: Option<i64>,
}

/// Any value that does not fit `T` (null included) becomes `T::default()`.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Numbers or numeric strings.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Integers in the `u16` range, given as numbers or strings.
fn lenient_status<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    })
}

/// Strings as-is, numbers and booleans in their JSON text.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Keeps the well-formed entries of a header list and skips the rest.
fn lenient_headers<'de, D>(deserializer: D) -> Result<Vec<RawHeader>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|item| RawHeader::deserialize(item).ok())
        .collect())
}
