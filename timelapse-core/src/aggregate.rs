//! Endpoint aggregation.
//!
//! Aggregates are a derived cache: they are always rebuilt from the complete
//! exchange set and never patched in place.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{CapturedExchange, EndpointAggregate};

/// endpoint key -> aggregate
pub type EndpointMap = BTreeMap<String, EndpointAggregate>;

/// Single pass over `exchanges` in append order.
pub fn rebuild(exchanges: &[CapturedExchange]) -> EndpointMap {
    let mut map = EndpointMap::new();

    for exchange in exchanges {
        let current = map
            .entry(exchange.endpoint_key.clone())
            .or_insert_with(|| EndpointAggregate {
                key: exchange.endpoint_key.clone(),
                method: exchange.method.clone(),
                path: exchange.path.clone(),
                count: 0,
                last_status: exchange.status,
                total_latency: 0,
                avg_latency: 0,
                environments: BTreeSet::new(),
            });

        current.count += 1;
        current.last_status = exchange.status;
        current.total_latency = current.total_latency.saturating_add(exchange.latency_ms);
        current.environments.insert(exchange.environment.clone());
    }

    for aggregate in map.values_mut() {
        aggregate.avg_latency = average(aggregate.total_latency, aggregate.count);
    }

    map
}

fn average(total: i64, count: u64) -> i64 {
    if count == 0 {
        return 0;
    }
    (total as f64 / count as f64).round() as i64
}

/// Listing filter for the endpoint sidebar.
#[derive(Debug, Clone, Default)]
pub struct EndpointQuery {
    /// Case-insensitive substring of key or path.
    pub search: Option<String>,
    /// Case-insensitive substring of any environment tag.
    pub environment: Option<String>,
}

/// Matching aggregates, busiest first (ties by key).
pub fn list(map: &EndpointMap, query: &EndpointQuery) -> Vec<EndpointAggregate> {
    let search = normalized(query.search.as_deref());
    let environment = normalized(query.environment.as_deref());

    let mut entries: Vec<EndpointAggregate> = map
        .values()
        .filter(|endpoint| match &search {
            Some(term) => {
                endpoint.key.to_lowercase().contains(term)
                    || endpoint.path.to_lowercase().contains(term)
            }
            None => true,
        })
        .filter(|endpoint| match &environment {
            Some(term) => endpoint
                .environments
                .iter()
                .any(|env| env.to_lowercase().contains(term)),
            None => true,
        })
        .cloned()
        .collect();

    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    entries
}

fn normalized(term: Option<&str>) -> Option<String> {
    term.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}
