//! Capture Store: durable storage keyed by exchange id.
//!
//! The store only promises atomic `put`, `get_all` and `clear`. Ordering and
//! per-endpoint lookups are done by the session over the loaded set.

use async_trait::async_trait;

use crate::error::TimelapseResult;
use crate::models::CapturedExchange;

mod mem_store;
mod pg_store;

pub use mem_store::MemCaptureStore;
pub use pg_store::PgCaptureStore;

#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Insert or replace by `exchange.id`.
    async fn put(&self, exchange: &CapturedExchange) -> TimelapseResult<()>;

    /// Every stored exchange, in insertion order.
    async fn get_all(&self) -> TimelapseResult<Vec<CapturedExchange>>;

    /// Remove every exchange.
    async fn clear(&self) -> TimelapseResult<()>;

    /// Short liveness report, e.g. the server version for a database backend.
    async fn health(&self) -> TimelapseResult<String>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
