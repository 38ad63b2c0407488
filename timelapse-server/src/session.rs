//! Session controller: the single owner of the in-memory working set.
//!
//! Every mutation (record, clear, load) replaces the endpoint aggregates with
//! a full rebuild before returning, so a caller holding the session lock
//! never observes a half-updated cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use timelapse_core::aggregate::{self, EndpointMap, EndpointQuery};
use timelapse_core::config::{DiffConfig, ExportConfig, TimelapseConfig, DEFAULT_QUOTA_BYTES};
use timelapse_core::diff::{self, ComparisonReport, DiffReport, Warning};
use timelapse_core::ipc::Direction;
use timelapse_core::{
    CaptureStore, CapturedExchange, EndpointAggregate, TimelapseError, TimelapseResult,
    TimelineFilter,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::subsystems::export::{self, ExportBundle};

/// Shared handle used by the IPC server, the HTTP API and the capture path.
pub type SharedSession = Arc<Mutex<SessionController>>;

/// Usage above this percentage of the quota is flagged.
const STORAGE_WARNING_PERCENT: u64 = 90;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub diff: DiffConfig,
    pub export: ExportConfig,
    pub quota_bytes: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            diff: DiffConfig::default(),
            export: ExportConfig::default(),
            quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }
}

impl From<&TimelapseConfig> for SessionSettings {
    fn from(config: &TimelapseConfig) -> Self {
        Self {
            diff: config.diff.clone(),
            export: config.export.clone(),
            quota_bytes: config.storage.quota_bytes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub endpoint_key: Option<String>,
    pub entry_id: Option<Uuid>,
    pub compare_id: Option<Uuid>,
}

/// One row of the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: Uuid,
    pub started_at: i64,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub status_ok: bool,
    pub latency_ms: i64,
    pub environment: String,
    pub branch: String,
    pub mime_type: String,
    pub payload_size: usize,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineView {
    pub endpoint: Option<String>,
    pub compare_mode: bool,
    pub selection: Selection,
    pub filters: TimelineFilter,
    /// Newest first.
    pub entries: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDetails {
    pub exchange: CapturedExchange,
    pub warnings: Vec<Warning>,
    pub report: Option<DiffReport>,
    pub diff_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonView {
    pub reference: CapturedExchange,
    pub candidate: CapturedExchange,
    pub report: ComparisonReport,
    pub diff_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub percent: u64,
    pub warning: bool,
}

pub struct SessionController {
    store: Arc<dyn CaptureStore>,
    settings: SessionSettings,
    exchanges: Vec<CapturedExchange>,
    endpoints: EndpointMap,
    selection: Selection,
    compare_mode: bool,
    filters: TimelineFilter,
}

impl SessionController {
    pub fn new(store: Arc<dyn CaptureStore>, settings: SessionSettings) -> Self {
        Self {
            store,
            settings,
            exchanges: Vec::new(),
            endpoints: EndpointMap::new(),
            selection: Selection::default(),
            compare_mode: false,
            filters: TimelineFilter::default(),
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Handle for store calls that should not hold the session lock.
    pub fn store_handle(&self) -> Arc<dyn CaptureStore> {
        Arc::clone(&self.store)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Replace the working set with the store contents in insertion order,
    /// so `last_status` matches what the live session reported.
    pub async fn load(&mut self) -> TimelapseResult<usize> {
        self.exchanges = self.store.get_all().await?;
        self.endpoints = aggregate::rebuild(&self.exchanges);

        if self.selection.endpoint_key.is_none() {
            self.selection.endpoint_key = self.exchanges.first().map(|e| e.endpoint_key.clone());
        }

        tracing::info!(
            store = self.store.name(),
            exchanges = self.exchanges.len(),
            endpoints = self.endpoints.len(),
            "Loaded captured exchanges"
        );
        Ok(self.exchanges.len())
    }

    /// Persist, append, rebuild. The exchange joins the working set only if
    /// the store accepted it.
    pub async fn record(&mut self, exchange: CapturedExchange) -> TimelapseResult<Uuid> {
        self.store.put(&exchange).await?;

        let id = exchange.id;
        tracing::debug!(endpoint = %exchange.endpoint_key, id = %id, status = exchange.status, "Recorded exchange");

        if self.selection.endpoint_key.is_none() {
            self.selection.endpoint_key = Some(exchange.endpoint_key.clone());
        }
        self.exchanges.push(exchange);
        self.endpoints = aggregate::rebuild(&self.exchanges);
        Ok(id)
    }

    /// Clear the store first; on failure the working set is left untouched.
    pub async fn clear(&mut self) -> TimelapseResult<()> {
        self.store.clear().await?;
        self.exchanges.clear();
        self.endpoints = aggregate::rebuild(&self.exchanges);
        self.selection = Selection::default();
        tracing::info!("Session data cleared");
        Ok(())
    }

    pub fn select_endpoint(&mut self, key: &str) -> TimelapseResult<()> {
        if !self.endpoints.contains_key(key) {
            return Err(TimelapseError::NotFound(format!("endpoint {key}")));
        }
        self.selection = Selection {
            endpoint_key: Some(key.to_string()),
            entry_id: None,
            compare_id: None,
        };
        Ok(())
    }

    /// In compare mode, picking a second entry sets the comparison target
    /// instead of moving the primary selection.
    pub fn select_entry(&mut self, id: Uuid) -> TimelapseResult<()> {
        let exchange = self
            .find(id)
            .ok_or_else(|| TimelapseError::NotFound(format!("exchange {id}")))?;
        let endpoint_key = exchange.endpoint_key.clone();

        match self.selection.entry_id {
            Some(current) if self.compare_mode && current != id => {
                self.selection.compare_id = Some(id);
            }
            _ => {
                self.selection.entry_id = Some(id);
                if self.selection.endpoint_key.as_deref() != Some(endpoint_key.as_str()) {
                    self.selection.endpoint_key = Some(endpoint_key);
                    self.selection.compare_id = None;
                }
            }
        }
        Ok(())
    }

    pub fn toggle_compare(&mut self) -> bool {
        self.compare_mode = !self.compare_mode;
        if !self.compare_mode {
            self.selection.compare_id = None;
        }
        tracing::info!(compare_mode = self.compare_mode, "Compare mode toggled");
        self.compare_mode
    }

    pub fn set_filters(&mut self, filters: TimelineFilter) {
        if filters.is_empty() {
            tracing::debug!("Timeline filters cleared");
        } else {
            tracing::debug!(statuses = ?filters.statuses, "Timeline filters applied");
        }
        self.filters = filters;
    }

    /// Move the entry selection within the filtered timeline.
    pub fn navigate(&mut self, direction: Direction) -> Option<Uuid> {
        let ids: Vec<Uuid> = self.filtered_timeline().iter().map(|e| e.id).collect();
        let current = self
            .selection
            .entry_id
            .and_then(|id| ids.iter().position(|candidate| *candidate == id));

        let next = match (direction, current) {
            (Direction::Up, Some(idx)) if idx > 0 => Some(idx - 1),
            (Direction::Down, Some(idx)) => Some(idx + 1),
            (Direction::Down, None) => Some(0),
            _ => None,
        };

        let id = next.and_then(|idx| ids.get(idx).copied())?;
        self.selection.entry_id = Some(id);
        Some(id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn exchanges(&self) -> &[CapturedExchange] {
        &self.exchanges
    }

    pub fn endpoint_map(&self) -> &EndpointMap {
        &self.endpoints
    }

    pub fn endpoints(&self, query: &EndpointQuery) -> Vec<EndpointAggregate> {
        aggregate::list(&self.endpoints, query)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn compare_mode(&self) -> bool {
        self.compare_mode
    }

    pub fn filters(&self) -> &TimelineFilter {
        &self.filters
    }

    pub fn find(&self, id: Uuid) -> Option<&CapturedExchange> {
        self.exchanges.iter().find(|e| e.id == id)
    }

    /// Exchanges of the selected endpoint passing the filters, newest first.
    /// Equal start times list the later-appended exchange first.
    pub fn filtered_timeline(&self) -> Vec<&CapturedExchange> {
        let Some(key) = self.selection.endpoint_key.as_deref() else {
            return Vec::new();
        };
        let mut entries: Vec<&CapturedExchange> = self
            .exchanges
            .iter()
            .rev()
            .filter(|e| e.endpoint_key == key)
            .filter(|e| self.filters.matches(e))
            .collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        entries
    }

    /// Timeline for the selected endpoint. Selects the newest entry when
    /// nothing is selected yet.
    pub fn timeline(&mut self) -> TimelineView {
        let entries: Vec<TimelineEntry> = self
            .filtered_timeline()
            .into_iter()
            .map(|exchange| {
                let previous = diff::find_predecessor(&self.exchanges, exchange);
                TimelineEntry {
                    id: exchange.id,
                    started_at: exchange.started_at,
                    method: exchange.method.clone(),
                    url: exchange.url.clone(),
                    status: exchange.status,
                    status_ok: exchange.is_ok_status(),
                    latency_ms: exchange.latency_ms,
                    environment: exchange.environment.clone(),
                    branch: exchange.branch.clone(),
                    mime_type: exchange.mime_type.clone(),
                    payload_size: exchange.payload_size,
                    warnings: diff::detect_warnings(exchange, previous, &self.settings.diff),
                }
            })
            .collect();

        if self.selection.entry_id.is_none() {
            self.selection.entry_id = entries.first().map(|e| e.id);
        }

        TimelineView {
            endpoint: self.selection.endpoint_key.clone(),
            compare_mode: self.compare_mode,
            selection: self.selection.clone(),
            filters: self.filters.clone(),
            entries,
        }
    }

    /// Full record plus diff against its predecessor. `None` means the
    /// currently selected entry.
    pub fn details(&self, id: Option<Uuid>) -> TimelapseResult<EntryDetails> {
        let id = id
            .or(self.selection.entry_id)
            .ok_or_else(|| TimelapseError::NotFound("no request selected".to_string()))?;
        let exchange = self
            .find(id)
            .ok_or_else(|| TimelapseError::NotFound(format!("exchange {id}")))?;

        let report = diff::report_for(&self.exchanges, exchange, &self.settings.diff);
        let diff_text = match &report {
            Some(r) => r.to_string(),
            None => diff::NO_PREDECESSOR.to_string(),
        };

        Ok(EntryDetails {
            exchange: exchange.clone(),
            warnings: report.as_ref().map(|r| r.warnings.clone()).unwrap_or_default(),
            report,
            diff_text,
        })
    }

    /// Compare two exchanges. Missing ids fall back to the entry and
    /// comparison selection.
    pub fn compare(&self, reference: Option<Uuid>, candidate: Option<Uuid>) -> TimelapseResult<ComparisonView> {
        let (Some(reference_id), Some(candidate_id)) = (
            reference.or(self.selection.entry_id),
            candidate.or(self.selection.compare_id),
        ) else {
            return Err(TimelapseError::NotFound(
                "select two snapshots to compare".to_string(),
            ));
        };

        let reference = self
            .find(reference_id)
            .ok_or_else(|| TimelapseError::NotFound(format!("exchange {reference_id}")))?;
        let candidate = self
            .find(candidate_id)
            .ok_or_else(|| TimelapseError::NotFound(format!("exchange {candidate_id}")))?;

        let report = ComparisonReport::between(reference, candidate, &self.settings.diff);
        Ok(ComparisonView {
            reference: reference.clone(),
            candidate: candidate.clone(),
            diff_text: report.to_string(),
            report,
        })
    }

    /// Serialized size of the working set against the configured quota.
    pub fn storage_usage(&self) -> StorageUsage {
        let used_bytes: u64 = self
            .exchanges
            .iter()
            .map(|e| serde_json::to_vec(e).map(|b| b.len() as u64).unwrap_or(0))
            .sum();
        let quota_bytes = self.settings.quota_bytes.max(1);
        let percent = (used_bytes as f64 / quota_bytes as f64 * 100.0).round() as u64;

        StorageUsage {
            used_bytes,
            quota_bytes,
            percent,
            warning: percent > STORAGE_WARNING_PERCENT,
        }
    }

    /// Export bundle for the selected endpoint. `limit` overrides the
    /// configured sample size; `Some(0)` keeps every entry.
    pub fn export_bundle(&self, limit: Option<usize>) -> TimelapseResult<ExportBundle> {
        let endpoint = self
            .selection
            .endpoint_key
            .as_deref()
            .ok_or_else(|| TimelapseError::NotFound("select an endpoint to export".to_string()))?;
        let sample_size = limit.unwrap_or(self.settings.export.sample_size);
        Ok(export::build_bundle(
            &self.exchanges,
            endpoint,
            &self.settings.diff,
            sample_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timelapse_core::normalize::normalize;
    use timelapse_core::{MemCaptureStore, RawEvent};

    fn controller() -> SessionController {
        SessionController::new(Arc::new(MemCaptureStore::new()), SessionSettings::default())
    }

    fn exchange(key: &str, started_at: i64, status: u16, latency_ms: i64, body: &str) -> CapturedExchange {
        let mut e = normalize(&RawEvent::default(), body, started_at);
        e.endpoint_key = key.to_string();
        e.status = status;
        e.latency_ms = latency_ms;
        e
    }

    #[tokio::test]
    async fn test_first_record_selects_endpoint() {
        let mut session = controller();
        session.record(exchange("GET /a", 1, 200, 10, "")).await.unwrap();
        session.record(exchange("GET /b", 2, 200, 10, "")).await.unwrap();
        assert_eq!(session.selection().endpoint_key.as_deref(), Some("GET /a"));
        assert_eq!(session.endpoint_map().len(), 2);
    }

    #[tokio::test]
    async fn test_timeline_newest_first_and_auto_select() {
        let mut session = controller();
        let old = exchange("GET /a", 1_000, 200, 10, "");
        let new = exchange("GET /a", 5_000, 200, 10, "");
        let mid = exchange("GET /a", 3_000, 200, 10, "");
        for e in [old.clone(), new.clone(), mid.clone()] {
            session.record(e).await.unwrap();
        }

        let view = session.timeline();
        let ids: Vec<Uuid> = view.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![new.id, mid.id, old.id]);
        assert_eq!(session.selection().entry_id, Some(new.id));
    }

    #[tokio::test]
    async fn test_timeline_filters_and_global_predecessor() {
        let mut session = controller();
        let a = exchange("GET /a", 1_000, 200, 100, r#"{"x":1}"#);
        let b = exchange("GET /a", 2_000, 500, 100, r#"{"x":1}"#);
        let c = exchange("GET /a", 3_000, 200, 300, r#"{"y":1}"#);
        for e in [a, b.clone(), c.clone()] {
            session.record(e).await.unwrap();
        }

        session.set_filters(TimelineFilter {
            statuses: vec![200],
            ..Default::default()
        });
        let view = session.timeline();
        assert_eq!(view.entries.len(), 2);
        // c is diffed against b even though b is filtered out
        assert_eq!(view.entries[0].id, c.id);
        assert_eq!(
            view.entries[0].warnings,
            vec![Warning::SchemaChange, Warning::LatencySpike]
        );
        assert!(view.entries[1].warnings.is_empty());
    }

    #[tokio::test]
    async fn test_details_and_compare() {
        let mut session = controller();
        let a = exchange("GET /a", 1_000, 200, 100, r#"{"id":1,"name":"x"}"#);
        let b = exchange("GET /a", 2_000, 200, 120, r#"{"id":1}"#);
        session.record(a.clone()).await.unwrap();
        session.record(b.clone()).await.unwrap();

        let first = session.details(Some(a.id)).unwrap();
        assert!(first.report.is_none());
        assert!(first.warnings.is_empty());
        assert_eq!(first.diff_text, diff::NO_PREDECESSOR);

        let second = session.details(Some(b.id)).unwrap();
        assert_eq!(second.warnings, vec![Warning::SchemaChange]);
        assert!(second.diff_text.contains("Removed: name"));

        assert!(session.compare(None, None).is_err());
        let view = session.compare(Some(b.id), Some(a.id)).unwrap();
        assert!(view.diff_text.contains("Added: name (string)"));
    }

    #[tokio::test]
    async fn test_compare_mode_selection() {
        let mut session = controller();
        let a = exchange("GET /a", 1_000, 200, 10, "");
        let b = exchange("GET /a", 2_000, 200, 10, "");
        session.record(a.clone()).await.unwrap();
        session.record(b.clone()).await.unwrap();

        session.select_entry(a.id).unwrap();
        assert!(session.toggle_compare());
        session.select_entry(b.id).unwrap();
        assert_eq!(session.selection().entry_id, Some(a.id));
        assert_eq!(session.selection().compare_id, Some(b.id));
        assert!(session.compare(None, None).is_ok());

        assert!(!session.toggle_compare());
        assert_eq!(session.selection().compare_id, None);
    }

    #[tokio::test]
    async fn test_navigate() {
        let mut session = controller();
        let a = exchange("GET /a", 1_000, 200, 10, "");
        let b = exchange("GET /a", 2_000, 200, 10, "");
        session.record(a.clone()).await.unwrap();
        session.record(b.clone()).await.unwrap();
        session.timeline();

        assert_eq!(session.navigate(Direction::Up), None);
        assert_eq!(session.navigate(Direction::Down), Some(a.id));
        assert_eq!(session.navigate(Direction::Down), None);
        assert_eq!(session.navigate(Direction::Up), Some(b.id));
    }

    #[tokio::test]
    async fn test_clear_resets_selection() {
        let mut session = controller();
        session.record(exchange("GET /a", 1, 200, 10, "")).await.unwrap();
        session.timeline();
        session.clear().await.unwrap();

        assert!(session.exchanges().is_empty());
        assert!(session.endpoint_map().is_empty());
        assert_eq!(session.selection(), &Selection::default());
        assert!(session.details(None).is_err());
    }

    #[tokio::test]
    async fn test_select_unknown_endpoint() {
        let mut session = controller();
        assert!(matches!(
            session.select_endpoint("GET /missing"),
            Err(TimelapseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_storage_usage() {
        let mut session = SessionController::new(
            Arc::new(MemCaptureStore::new()),
            SessionSettings {
                quota_bytes: 1_000,
                ..Default::default()
            },
        );
        assert_eq!(session.storage_usage().used_bytes, 0);
        session
            .record(exchange("GET /a", 1, 200, 10, &"x".repeat(2_000)))
            .await
            .unwrap();
        let usage = session.storage_usage();
        assert!(usage.used_bytes > 2_000);
        assert!(usage.warning);
    }
}
