//! Diff engine.
//!
//! Three independent primitives (schema diff, body diff, warning detection)
//! plus the two reports the session composes from them: an entry against its
//! chronological predecessor, and an explicit pair comparison.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::DiffConfig;
use crate::models::CapturedExchange;
use crate::normalize::ParsedBody;
use crate::schema::{join_key, SchemaMap, SchemaType, ROOT_PATH};

pub const SCHEMA_STABLE: &str = "Schema stable.";
pub const JSON_IDENTICAL: &str = "JSON identical.";
pub const NO_PREDECESSOR: &str = "No previous call to diff against.";
pub const PAYLOAD_UNAVAILABLE: &str = "Payload diff unavailable.";
pub const FIRST_CALL: &str = "First call.";
const NON_JSON_NOTE: &str = "Non-JSON bodies; showing head/tail instead.";
const FULL_PAYLOAD_HINT: &str = "See full payloads in the request/response details.";

// ============================================================================
// Schema diff
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAddition {
    pub path: String,
    pub schema_type: SchemaType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChange {
    pub path: String,
    pub from: SchemaType,
    pub to: SchemaType,
}

/// Flat key-set comparison of two schema maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub added: Vec<SchemaAddition>,
    pub removed: Vec<String>,
    pub changed: Vec<TypeChange>,
}

impl SchemaDiff {
    pub fn is_stable(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_stable() {
            return f.write_str(SCHEMA_STABLE);
        }

        let mut lines = Vec::new();
        if !self.added.is_empty() {
            let items: Vec<String> = self
                .added
                .iter()
                .map(|a| format!("{} ({})", a.path, a.schema_type))
                .collect();
            lines.push(format!("Added: {}", items.join(", ")));
        }
        if !self.removed.is_empty() {
            lines.push(format!("Removed: {}", self.removed.join(", ")));
        }
        if !self.changed.is_empty() {
            let items: Vec<String> = self
                .changed
                .iter()
                .map(|c| format!("{}: {} -> {}", c.path, c.from, c.to))
                .collect();
            lines.push(format!("Type changes: {}", items.join(", ")));
        }
        f.write_str(&lines.join("\n"))
    }
}

pub fn diff_schema(prev: &SchemaMap, next: &SchemaMap) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for (path, next_type) in next {
        match prev.get(path) {
            None => diff.added.push(SchemaAddition {
                path: path.clone(),
                schema_type: *next_type,
            }),
            Some(prev_type) if prev_type != next_type => diff.changed.push(TypeChange {
                path: path.clone(),
                from: *prev_type,
                to: *next_type,
            }),
            Some(_) => {}
        }
    }

    diff.removed = prev
        .keys()
        .filter(|path| !next.contains_key(*path))
        .cloned()
        .collect();

    diff
}

// ============================================================================
// Body diff
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyDiff {
    /// Canonical JSON texts are byte-identical.
    Identical,
    /// Flattened key sets differ (or only values changed, in which case both
    /// lists are empty). Lists are capped; totals are not.
    Keys {
        added: Vec<String>,
        removed: Vec<String>,
        added_total: usize,
        removed_total: usize,
    },
    /// At least one side is not JSON; heads of both texts.
    NonJson { prev_head: String, next_head: String },
}

impl BodyDiff {
    pub fn is_identical(&self) -> bool {
        matches!(self, BodyDiff::Identical)
    }
}

impl fmt::Display for BodyDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyDiff::Identical => f.write_str(JSON_IDENTICAL),
            BodyDiff::Keys { added, removed, .. } => {
                let mut lines = Vec::new();
                if !added.is_empty() {
                    lines.push(format!("+ {}", added.join(", ")));
                }
                if !removed.is_empty() {
                    lines.push(format!("- {}", removed.join(", ")));
                }
                lines.push(FULL_PAYLOAD_HINT.to_string());
                f.write_str(&lines.join("\n"))
            }
            BodyDiff::NonJson { prev_head, next_head } => write!(
                f,
                "{NON_JSON_NOTE}\n\nprev:\n{prev_head}\n\nnext:\n{next_head}"
            ),
        }
    }
}

pub fn diff_bodies(prev_body: &str, next_body: &str, config: &DiffConfig) -> BodyDiff {
    let (prev, next) = match (ParsedBody::parse(prev_body), ParsedBody::parse(next_body)) {
        (ParsedBody::Parsed(prev), ParsedBody::Parsed(next)) => (prev, next),
        _ => {
            return BodyDiff::NonJson {
                prev_head: clip(prev_body, config.clip_chars),
                next_head: clip(next_body, config.clip_chars),
            }
        }
    };

    if canonical(&prev) == canonical(&next) {
        return BodyDiff::Identical;
    }

    let prev_keys = flatten(&prev);
    let next_keys = flatten(&next);
    let added: Vec<String> = next_keys
        .keys()
        .filter(|k| !prev_keys.contains_key(*k))
        .cloned()
        .collect();
    let removed: Vec<String> = prev_keys
        .keys()
        .filter(|k| !next_keys.contains_key(*k))
        .cloned()
        .collect();

    BodyDiff::Keys {
        added_total: added.len(),
        removed_total: removed.len(),
        added: added.into_iter().take(config.max_key_changes).collect(),
        removed: removed.into_iter().take(config.max_key_changes).collect(),
    }
}

/// Compact serialization; object keys come out sorted.
fn canonical(value: &Value) -> String {
    value.to_string()
}

/// Flatten to terminal path -> scalar. Array elements are addressed by index
/// (`items.0.id`); empty containers produce no entry; a scalar root is `$`.
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(value, "", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                flatten_into(child, &join_key(prefix, key), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, &join_key(prefix, &index.to_string()), out);
            }
        }
        scalar => {
            let path = if prefix.is_empty() { ROOT_PATH } else { prefix };
            out.insert(path.to_string(), scalar.clone());
        }
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// ============================================================================
// Warnings
// ============================================================================

/// Heuristic flag on an exchange relative to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Warning {
    #[serde(rename = "schema change")]
    SchemaChange,
    #[serde(rename = "server error")]
    ServerError,
    #[serde(rename = "latency spike")]
    LatencySpike,
}

impl Warning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Warning::SchemaChange => "schema change",
            Warning::ServerError => "server error",
            Warning::LatencySpike => "latency spike",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strictly above `previous * multiplier + slack`.
pub fn is_latency_spike(latency_ms: i64, previous_ms: i64, config: &DiffConfig) -> bool {
    let threshold = previous_ms as f64 * config.latency_spike_multiplier + config.latency_spike_slack_ms;
    latency_ms as f64 > threshold
}

/// The first call of an endpoint (no predecessor) is never flagged.
pub fn detect_warnings(
    exchange: &CapturedExchange,
    previous: Option<&CapturedExchange>,
    config: &DiffConfig,
) -> Vec<Warning> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let mut warnings = Vec::new();
    if !diff_schema(&previous.schema_map, &exchange.schema_map).is_stable() {
        warnings.push(Warning::SchemaChange);
    }
    if exchange.is_server_error() {
        warnings.push(Warning::ServerError);
    }
    if is_latency_spike(exchange.latency_ms, previous.latency_ms, config) {
        warnings.push(Warning::LatencySpike);
    }
    warnings
}

/// Latest exchange of the same endpoint started strictly before `candidate`.
/// Among equal start times the one later in `exchanges` wins.
pub fn find_predecessor<'a>(
    exchanges: &'a [CapturedExchange],
    candidate: &CapturedExchange,
) -> Option<&'a CapturedExchange> {
    exchanges
        .iter()
        .filter(|e| e.endpoint_key == candidate.endpoint_key && e.started_at < candidate.started_at)
        .fold(None, |best: Option<&CapturedExchange>, e| match best {
            Some(b) if b.started_at > e.started_at => Some(b),
            _ => Some(e),
        })
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: u16,
    pub to: u16,
}

impl StatusChange {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyDelta {
    pub from: i64,
    pub to: i64,
}

impl LatencyDelta {
    pub fn delta(&self) -> i64 {
        self.to.saturating_sub(self.from)
    }
}

impl fmt::Display for LatencyDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let delta = self.delta();
        let sign = if delta >= 0 { "+" } else { "" };
        write!(f, "Latency: {}ms -> {}ms ({sign}{delta}ms)", self.from, self.to)
    }
}

/// An exchange against its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub previous_id: Uuid,
    pub status: StatusChange,
    pub latency: LatencyDelta,
    pub schema: SchemaDiff,
    /// `None` when either response body is empty.
    pub body: Option<BodyDiff>,
    pub warnings: Vec<Warning>,
}

impl DiffReport {
    pub fn between(previous: &CapturedExchange, entry: &CapturedExchange, config: &DiffConfig) -> Self {
        Self {
            previous_id: previous.id,
            status: StatusChange {
                from: previous.status,
                to: entry.status,
            },
            latency: LatencyDelta {
                from: previous.latency_ms,
                to: entry.latency_ms,
            },
            schema: diff_schema(&previous.schema_map, &entry.schema_map),
            body: body_diff_if_present(previous, entry, config),
            warnings: detect_warnings(entry, Some(previous), config),
        }
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.status.changed() {
            format!("Status changed: {} -> {}", self.status.from, self.status.to)
        } else {
            "Status unchanged.".to_string()
        };
        let body = match &self.body {
            Some(diff) => diff.to_string(),
            None => PAYLOAD_UNAVAILABLE.to_string(),
        };
        write!(f, "{status}\n\n{}\n\n{}\n\n{body}", self.latency, self.schema)
    }
}

/// Report for `entry` against its predecessor within `exchanges`.
pub fn report_for(
    exchanges: &[CapturedExchange],
    entry: &CapturedExchange,
    config: &DiffConfig,
) -> Option<DiffReport> {
    find_predecessor(exchanges, entry).map(|previous| DiffReport::between(previous, entry, config))
}

/// Human-readable form of `report_for`.
pub fn report_text(exchanges: &[CapturedExchange], entry: &CapturedExchange, config: &DiffConfig) -> String {
    report_for(exchanges, entry, config)
        .map(|report| report.to_string())
        .unwrap_or_else(|| NO_PREDECESSOR.to_string())
}

/// Two explicitly chosen exchanges, not necessarily adjacent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub reference_id: Uuid,
    pub candidate_id: Uuid,
    pub status: StatusChange,
    pub latency: LatencyDelta,
    pub schema: SchemaDiff,
    pub body: Option<BodyDiff>,
}

impl ComparisonReport {
    pub fn between(reference: &CapturedExchange, candidate: &CapturedExchange, config: &DiffConfig) -> Self {
        Self {
            reference_id: reference.id,
            candidate_id: candidate.id,
            status: StatusChange {
                from: reference.status,
                to: candidate.status,
            },
            latency: LatencyDelta {
                from: reference.latency_ms,
                to: candidate.latency_ms,
            },
            schema: diff_schema(&reference.schema_map, &candidate.schema_map),
            body: body_diff_if_present(reference, candidate, config),
        }
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = vec!["=== COMPARISON DIFF ===\n".to_string()];
        if self.status.changed() {
            lines.push(format!("Status: {} -> {}", self.status.from, self.status.to));
        }
        lines.push(self.latency.to_string());
        if !self.schema.is_stable() {
            lines.push(format!("\nSchema changes:\n{}", self.schema));
        }
        if let Some(body) = self.body.as_ref().filter(|b| !b.is_identical()) {
            lines.push(format!("\nPayload changes:\n{body}"));
        }
        f.write_str(&lines.join("\n"))
    }
}

fn body_diff_if_present(
    previous: &CapturedExchange,
    next: &CapturedExchange,
    config: &DiffConfig,
) -> Option<BodyDiff> {
    if previous.response_body.is_empty() || next.response_body.is_empty() {
        return None;
    }
    Some(diff_bodies(&previous.response_body, &next.response_body, config))
}
