use serde::Serialize;
use timelapse_core::aggregate::EndpointQuery;
use timelapse_core::ipc::{TimelapseRequest, TimelapseResponse};
use timelapse_core::{InlineBody, TimelapseResult};

use crate::session::SharedSession;
use crate::subsystems::capture;

/// Dispatch one request against the shared session. Used by both the IPC
/// server and the HTTP API.
pub async fn handle_request(request: TimelapseRequest, session: &SharedSession) -> TimelapseResponse {
    match request {
        TimelapseRequest::Ping => TimelapseResponse::pong(),
        TimelapseRequest::Health => {
            let (store, exchanges, endpoints) = {
                let guard = session.lock().await;
                (guard.store_handle(), guard.exchanges().len(), guard.endpoint_map().len())
            };
            // checked outside the session lock so captures keep flowing
            let (status, detail) = match store.health().await {
                Ok(detail) => ("healthy", detail),
                Err(e) => {
                    tracing::warn!("Capture store health check failed: {}", e);
                    ("degraded", e.to_string())
                }
            };
            TimelapseResponse::ok(serde_json::json!({
                "status": status,
                "store": store.name(),
                "store_detail": detail,
                "exchanges": exchanges,
                "endpoints": endpoints,
            }))
        }
        TimelapseRequest::Capture { event, body } => {
            let source = InlineBody(body);
            respond(capture::capture_event(session, &event, &source).await)
        }
        TimelapseRequest::CaptureBatch { captures } => {
            respond(Ok(capture::capture_batch(session, captures).await))
        }
        TimelapseRequest::Endpoints { search, environment } => {
            let guard = session.lock().await;
            let endpoints = guard.endpoints(&EndpointQuery { search, environment });
            respond(Ok(serde_json::json!({
                "count": endpoints.len(),
                "selected": guard.selection().endpoint_key,
                "endpoints": endpoints,
            })))
        }
        TimelapseRequest::SelectEndpoint { key } => {
            let mut guard = session.lock().await;
            respond(guard.select_endpoint(&key).map(|_| guard.selection().clone()))
        }
        TimelapseRequest::SelectEntry { id } => {
            let mut guard = session.lock().await;
            respond(guard.select_entry(id).map(|_| guard.selection().clone()))
        }
        TimelapseRequest::ToggleCompare => {
            let mut guard = session.lock().await;
            let compare_mode = guard.toggle_compare();
            respond(Ok(serde_json::json!({ "compare_mode": compare_mode })))
        }
        TimelapseRequest::SetFilters { filters } => {
            let mut guard = session.lock().await;
            guard.set_filters(filters);
            respond(Ok(guard.filters().clone()))
        }
        TimelapseRequest::Timeline => {
            let mut guard = session.lock().await;
            respond(Ok(guard.timeline()))
        }
        TimelapseRequest::Details { id } => {
            let guard = session.lock().await;
            respond(guard.details(id))
        }
        TimelapseRequest::Compare { reference, candidate } => {
            let guard = session.lock().await;
            respond(guard.compare(reference, candidate))
        }
        TimelapseRequest::Navigate { direction } => {
            let mut guard = session.lock().await;
            let moved = guard.navigate(direction);
            respond(Ok(serde_json::json!({
                "moved": moved.is_some(),
                "selection": guard.selection(),
            })))
        }
        TimelapseRequest::Clear => {
            let mut guard = session.lock().await;
            respond(guard.clear().await.map(|_| serde_json::json!({ "cleared": true })))
        }
        TimelapseRequest::Export { limit } => {
            let guard = session.lock().await;
            respond(guard.export_bundle(limit))
        }
        TimelapseRequest::Storage => {
            let guard = session.lock().await;
            respond(Ok(guard.storage_usage()))
        }
    }
}

fn respond<T: Serialize>(result: TimelapseResult<T>) -> TimelapseResponse {
    match result.and_then(|data| serde_json::to_value(data).map_err(Into::into)) {
        Ok(data) => TimelapseResponse::ok(data),
        Err(e) => {
            if e.is_store_failure() {
                tracing::error!(error = %e, "Store operation failed");
            }
            TimelapseResponse::err_kind(e.kind(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionController, SessionSettings};
    use std::sync::Arc;
    use timelapse_core::ipc::Direction;
    use timelapse_core::models::{RawRequest, RawResponse};
    use async_trait::async_trait;
    use std::time::Duration;
    use timelapse_core::{CaptureStore, CapturedExchange, ErrorKind, MemCaptureStore, RawEvent};
    use tokio::sync::Notify;

    fn shared() -> SharedSession {
        SessionController::new(Arc::new(MemCaptureStore::new()), SessionSettings::default())
            .into_shared()
    }

    fn capture_request(url: &str, body: &str) -> TimelapseRequest {
        TimelapseRequest::Capture {
            event: RawEvent {
                request: Some(RawRequest {
                    method: Some("GET".to_string()),
                    url: Some(url.to_string()),
                    ..Default::default()
                }),
                response: Some(RawResponse {
                    status: Some(200),
                    ..Default::default()
                }),
                ..Default::default()
            },
            body: Some(body.to_string()),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let resp = handle_request(TimelapseRequest::Ping, &shared()).await;
        assert!(resp.is_ok());
        assert_eq!(resp.data.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn test_health_reports_store() {
        let resp = handle_request(TimelapseRequest::Health, &shared()).await;
        let data = resp.data.unwrap();
        assert_eq!(data["status"], "healthy");
        assert_eq!(data["store"], "memory");
        assert_eq!(data["store_detail"], "0 exchanges held in memory");
        assert_eq!(data["exchanges"], 0);
    }

    #[tokio::test]
    async fn test_capture_then_timeline() {
        let session = shared();
        let resp = handle_request(capture_request("https://api.test/users", r#"{"id":1}"#), &session).await;
        assert!(resp.is_ok(), "{:?}", resp.error);
        assert_eq!(resp.data.unwrap()["endpoint_key"], "GET /users");

        let timeline = handle_request(TimelapseRequest::Timeline, &session).await;
        let data = timeline.data.unwrap();
        assert_eq!(data["endpoint"], "GET /users");
        assert_eq!(data["entries"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_error() {
        let resp = handle_request(
            TimelapseRequest::SelectEndpoint {
                key: "GET /nope".to_string(),
            },
            &shared(),
        )
        .await;
        assert!(!resp.is_ok());
        assert_eq!(resp.error_kind, Some(ErrorKind::NotFound));
        assert!(resp.error.unwrap().contains("GET /nope"));
    }

    #[tokio::test]
    async fn test_compare_without_selection_is_error() {
        let resp = handle_request(
            TimelapseRequest::Compare {
                reference: None,
                candidate: None,
            },
            &shared(),
        )
        .await;
        assert!(!resp.is_ok());
    }

    #[tokio::test]
    async fn test_navigate_on_empty_timeline() {
        let resp = handle_request(
            TimelapseRequest::Navigate {
                direction: Direction::Down,
            },
            &shared(),
        )
        .await;
        assert_eq!(resp.data.unwrap()["moved"], false);
    }

    #[tokio::test]
    async fn test_clear_and_storage() {
        let session = shared();
        handle_request(capture_request("https://api.test/a", "{}"), &session).await;
        let storage = handle_request(TimelapseRequest::Storage, &session).await;
        assert!(storage.data.unwrap()["used_bytes"].as_u64().unwrap() > 0);

        let cleared = handle_request(TimelapseRequest::Clear, &session).await;
        assert!(cleared.is_ok());
        let storage = handle_request(TimelapseRequest::Storage, &session).await;
        assert_eq!(storage.data.unwrap()["used_bytes"], 0);
    }

    #[derive(Default)]
    struct StalledHealthStore {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CaptureStore for StalledHealthStore {
        async fn put(&self, _exchange: &CapturedExchange) -> TimelapseResult<()> {
            Ok(())
        }
        async fn get_all(&self) -> TimelapseResult<Vec<CapturedExchange>> {
            Ok(Vec::new())
        }
        async fn clear(&self) -> TimelapseResult<()> {
            Ok(())
        }
        async fn health(&self) -> TimelapseResult<String> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok("recovered".to_string())
        }
        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_slow_health_check_does_not_block_capture() {
        let store = Arc::new(StalledHealthStore::default());
        let session = SessionController::new(store.clone(), SessionSettings::default()).into_shared();

        let health_session = session.clone();
        let health = tokio::spawn(async move { handle_request(TimelapseRequest::Health, &health_session).await });
        store.entered.notified().await;

        let captured = tokio::time::timeout(
            Duration::from_secs(2),
            handle_request(capture_request("https://api.test/users", "{}"), &session),
        )
        .await
        .expect("capture waited on the health check");
        assert!(captured.is_ok(), "{:?}", captured.error);

        store.release.notify_one();
        let data = health.await.unwrap().data.unwrap();
        assert_eq!(data["status"], "healthy");
        assert_eq!(data["store"], "stalled");
        assert_eq!(data["store_detail"], "recovered");
    }
}
