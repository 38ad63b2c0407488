pub mod http;
pub mod router;
pub mod server;
pub mod session;
pub mod subsystems;

use std::sync::Arc;

use timelapse_core::config::StoreBackend;
use timelapse_core::{CaptureStore, MemCaptureStore, PgCaptureStore, TimelapseConfig, TimelapseError, TimelapseResult};

/// Open the capture store selected by `[storage] backend`.
pub async fn open_store(config: &TimelapseConfig) -> TimelapseResult<Arc<dyn CaptureStore>> {
    match config.storage.backend {
        StoreBackend::Memory => Ok(Arc::new(MemCaptureStore::new())),
        StoreBackend::Postgres => {
            let database = config.database.as_ref().ok_or_else(|| {
                TimelapseError::Other("storage backend is postgres but [database] is missing".to_string())
            })?;
            Ok(Arc::new(PgCaptureStore::connect(database).await?))
        }
    }
}
