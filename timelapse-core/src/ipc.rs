use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::filter::TimelineFilter;
use crate::models::RawEvent;

/// Wire protocol identifier reported by `version`.
pub const PROTOCOL: &str = "timelapse/1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TimelapseRequest {
    Ping,
    Health,
    Capture {
        event: RawEvent,
        #[serde(default)]
        body: Option<String>,
    },
    CaptureBatch {
        captures: Vec<CaptureItem>,
    },
    Endpoints {
        #[serde(default)]
        search: Option<String>,
        #[serde(default)]
        environment: Option<String>,
    },
    SelectEndpoint {
        key: String,
    },
    SelectEntry {
        id: Uuid,
    },
    ToggleCompare,
    SetFilters {
        filters: TimelineFilter,
    },
    Timeline,
    Details {
        #[serde(default)]
        id: Option<Uuid>,
    },
    /// Missing ids fall back to the current entry/comparison selection.
    Compare {
        #[serde(default)]
        reference: Option<Uuid>,
        #[serde(default)]
        candidate: Option<Uuid>,
    },
    Navigate {
        direction: Direction,
    },
    Clear,
    /// Bundle for the selected endpoint; `limit = 0` includes every entry.
    Export {
        #[serde(default)]
        limit: Option<usize>,
    },
    Storage,
}

/// One event plus its already-fetched body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureItem {
    pub event: RawEvent,
    #[serde(default)]
    pub body: Option<String>,
}

/// Timeline navigation; the timeline is ordered newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Towards newer entries.
    Up,
    /// Towards older entries.
    Down,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimelapseResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub version: String,
}

impl TimelapseResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            error_kind: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self::err_kind(ErrorKind::Internal, msg)
    }

    pub fn err_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            error_kind: Some(kind),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
