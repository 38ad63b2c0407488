use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Rolling statistics for one endpoint. Derived only; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAggregate {
    pub key: String,
    pub method: String,
    pub path: String,
    pub count: u64,
    /// Status of the most recently appended exchange.
    pub last_status: u16,
    pub total_latency: i64,
    pub avg_latency: i64,
    pub environments: BTreeSet<String>,
}
