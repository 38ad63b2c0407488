//! Capture pipeline: fetch body, normalize, record.
//!
//! The body fetch and normalization run without holding the session lock;
//! only persist + append + rebuild happen under it.

use serde::{Deserialize, Serialize};
use timelapse_core::diff::{self, Warning};
use timelapse_core::ipc::CaptureItem;
use timelapse_core::normalize;
use timelapse_core::{BodySource, InlineBody, RawEvent, TimelapseResult};
use uuid::Uuid;

use crate::session::SharedSession;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureOutcome {
    pub id: Uuid,
    pub endpoint_key: String,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub captured: Vec<CaptureOutcome>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub index: usize,
    pub error: String,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub async fn capture_event(
    session: &SharedSession,
    event: &RawEvent,
    source: &dyn BodySource,
) -> TimelapseResult<CaptureOutcome> {
    let exchange = normalize::capture(event, source, now_ms()).await;
    let endpoint_key = exchange.endpoint_key.clone();

    let mut guard = session.lock().await;
    let id = match guard.record(exchange).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(endpoint = %endpoint_key, error = %e, "Failed to save captured exchange");
            return Err(e);
        }
    };

    let warnings = match guard.find(id) {
        Some(recorded) => {
            let previous = diff::find_predecessor(guard.exchanges(), recorded);
            diff::detect_warnings(recorded, previous, &guard.settings().diff)
        }
        None => Vec::new(),
    };

    if !warnings.is_empty() {
        let labels: Vec<&str> = warnings.iter().map(Warning::as_str).collect();
        tracing::warn!(endpoint = %endpoint_key, id = %id, warnings = ?labels, "Capture flagged");
    }

    Ok(CaptureOutcome {
        id,
        endpoint_key,
        warnings,
    })
}

/// Each item is captured independently; one failure does not abort the rest.
pub async fn capture_batch(session: &SharedSession, items: Vec<CaptureItem>) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for (index, item) in items.into_iter().enumerate() {
        let source = InlineBody(item.body);
        match capture_event(session, &item.event, &source).await {
            Ok(captured) => outcome.captured.push(captured),
            Err(e) => outcome.failed.push(BatchFailure {
                index,
                error: e.to_string(),
            }),
        }
    }
    tracing::info!(
        captured = outcome.captured.len(),
        failed = outcome.failed.len(),
        "Batch capture finished"
    );
    outcome
}
