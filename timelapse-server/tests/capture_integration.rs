//! End-to-end capture flows through the router against the in-memory store.

use std::sync::Arc;

use serde_json::json;
use timelapse_core::ipc::{CaptureItem, TimelapseRequest};
use timelapse_core::models::{RawHeader, RawRequest, RawResponse};
use timelapse_core::{CaptureStore, MemCaptureStore, RawEvent};
use timelapse_server::router;
use timelapse_server::session::{SessionController, SessionSettings, SharedSession};

fn event(url: &str, status: u16, seconds: f64, started: &str) -> RawEvent {
    RawEvent {
        started_date_time: Some(started.to_string()),
        time: Some(seconds),
        request: Some(RawRequest {
            method: Some("GET".to_string()),
            url: Some(url.to_string()),
            headers: vec![RawHeader::new("X-Env", "staging")],
            ..Default::default()
        }),
        response: Some(RawResponse {
            status: Some(status),
            ..Default::default()
        }),
    }
}

fn capture(event: RawEvent, body: &str) -> TimelapseRequest {
    TimelapseRequest::Capture {
        event,
        body: Some(body.to_string()),
    }
}

fn session_over(store: Arc<dyn CaptureStore>) -> SharedSession {
    SessionController::new(store, SessionSettings::default()).into_shared()
}

// ===========================================================================
// TEST 1: schema drift and latency spike are flagged on the second call
// ===========================================================================
#[tokio::test]
async fn test_drift_is_flagged() {
    let session = session_over(Arc::new(MemCaptureStore::new()));

    let first = router::handle_request(
        capture(
            event("https://api.test/users/1", 200, 0.1, "2024-05-01T10:00:00Z"),
            r#"{"id":1,"name":"Ada"}"#,
        ),
        &session,
    )
    .await;
    assert!(first.is_ok(), "{:?}", first.error);
    assert_eq!(first.data.unwrap()["warnings"], json!([]));

    let second = router::handle_request(
        capture(
            event("https://api.test/users/1", 200, 0.4, "2024-05-01T10:01:00Z"),
            r#"{"id":"1","name":"Ada"}"#,
        ),
        &session,
    )
    .await;
    assert_eq!(
        second.data.unwrap()["warnings"],
        json!(["schema change", "latency spike"])
    );

    let details = router::handle_request(TimelapseRequest::Details { id: None }, &session).await;
    // no entry selected until the timeline is produced
    assert!(!details.is_ok());

    let timeline = router::handle_request(TimelapseRequest::Timeline, &session).await;
    let data = timeline.data.unwrap();
    assert_eq!(data["entries"][0]["latency_ms"], 400);
    assert_eq!(data["entries"][0]["environment"], "staging");

    let details = router::handle_request(TimelapseRequest::Details { id: None }, &session).await;
    let text = details.data.unwrap()["diff_text"].as_str().unwrap().to_string();
    assert!(text.contains("Latency: 100ms -> 400ms (+300ms)"));
    assert!(text.contains("Type changes: id: number -> string"));
}

// ===========================================================================
// TEST 2: endpoint list aggregates and filters
// ===========================================================================
#[tokio::test]
async fn test_endpoint_listing() {
    let session = session_over(Arc::new(MemCaptureStore::new()));
    for (url, started) in [
        ("https://api.test/a", "2024-05-01T10:00:00Z"),
        ("https://api.test/a", "2024-05-01T10:00:01Z"),
        ("https://api.test/b", "2024-05-01T10:00:02Z"),
    ] {
        router::handle_request(capture(event(url, 200, 0.05, started), "{}"), &session).await;
    }

    let resp = router::handle_request(
        TimelapseRequest::Endpoints {
            search: None,
            environment: None,
        },
        &session,
    )
    .await;
    let data = resp.data.unwrap();
    assert_eq!(data["count"], 2);
    assert_eq!(data["endpoints"][0]["key"], "GET /a");
    assert_eq!(data["endpoints"][0]["count"], 2);
    assert_eq!(data["endpoints"][0]["avg_latency"], 50);

    let resp = router::handle_request(
        TimelapseRequest::Endpoints {
            search: Some("/B".to_string()),
            environment: Some("stag".to_string()),
        },
        &session,
    )
    .await;
    assert_eq!(resp.data.unwrap()["count"], 1);
}

// ===========================================================================
// TEST 3: a fresh session over the same store reloads the working set
// ===========================================================================
#[tokio::test]
async fn test_reload_from_store() {
    let store: Arc<dyn CaptureStore> = Arc::new(MemCaptureStore::new());
    let session = session_over(store.clone());
    router::handle_request(
        capture(event("https://api.test/a", 200, 0.01, "2024-05-01T10:00:05Z"), "{}"),
        &session,
    )
    .await;
    // appended last but started earlier
    router::handle_request(
        capture(event("https://api.test/a", 503, 0.01, "2024-05-01T10:00:01Z"), "{}"),
        &session,
    )
    .await;
    let live_status = session.lock().await.endpoint_map()["GET /a"].last_status;
    assert_eq!(live_status, 503);

    let mut reloaded = SessionController::new(store, SessionSettings::default());
    assert_eq!(reloaded.load().await.unwrap(), 2);
    assert_eq!(reloaded.endpoint_map()["GET /a"].count, 2);
    assert_eq!(reloaded.endpoint_map()["GET /a"].last_status, live_status);
    assert_eq!(reloaded.selection().endpoint_key.as_deref(), Some("GET /a"));
    let starts: Vec<i64> = reloaded.exchanges().iter().map(|e| e.started_at).collect();
    assert!(starts[0] > starts[1]);

    // the timeline still orders by start time
    let view = reloaded.timeline();
    assert!(view.entries[0].started_at > view.entries[1].started_at);
}

// ===========================================================================
// TEST 4: batch capture reports per-item results
// ===========================================================================
#[tokio::test]
async fn test_capture_batch() {
    let session = session_over(Arc::new(MemCaptureStore::new()));
    let captures = vec![
        CaptureItem {
            event: event("https://api.test/a", 200, 0.01, "2024-05-01T10:00:00Z"),
            body: None,
        },
        CaptureItem {
            event: event("https://api.test/b?z=1&a=2", 404, 0.01, "2024-05-01T10:00:01Z"),
            body: Some("not found".to_string()),
        },
    ];
    let resp = router::handle_request(TimelapseRequest::CaptureBatch { captures }, &session).await;
    let data = resp.data.unwrap();
    assert_eq!(data["captured"].as_array().unwrap().len(), 2);
    assert_eq!(data["failed"], json!([]));

    let guard = session.lock().await;
    let b = guard
        .exchanges()
        .iter()
        .find(|e| e.endpoint_key == "GET /b")
        .unwrap();
    assert_eq!(b.query_signature, "a&z");
    assert!(b.schema_map.is_empty());
}

// ===========================================================================
// TEST 5: clear empties store and session
// ===========================================================================
#[tokio::test]
async fn test_clear_empties_store() {
    let store = Arc::new(MemCaptureStore::new());
    let session = session_over(store.clone());
    router::handle_request(
        capture(event("https://api.test/a", 200, 0.01, "2024-05-01T10:00:00Z"), "{}"),
        &session,
    )
    .await;
    assert_eq!(store.len().await, 1);

    let resp = router::handle_request(TimelapseRequest::Clear, &session).await;
    assert!(resp.is_ok());
    assert_eq!(store.len().await, 0);

    let resp = router::handle_request(TimelapseRequest::Timeline, &session).await;
    assert_eq!(resp.data.unwrap()["entries"], json!([]));
}
