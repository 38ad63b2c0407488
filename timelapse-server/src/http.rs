//! Timelapse HTTP REST API
//!
//! Axum server exposing the session over HTTP, next to the Unix socket IPC
//! server. Every handler is a thin wrapper over an inner function that builds
//! a `TimelapseRequest` and goes through the shared router, so HTTP and IPC
//! behave identically.
//!
//! Endpoints:
//! - GET  /health         : store name and working-set counts
//! - GET  /version        : server version info
//! - POST /capture        : capture one raw event (+ body)
//! - POST /capture/batch  : capture many events, failures isolated
//! - GET  /endpoints      : endpoint list (`?search=&environment=`)
//! - POST /select         : select an endpoint (`key`) and/or entry (`id`)
//! - POST /compare/toggle : toggle compare mode
//! - POST /filters        : replace timeline filters
//! - GET  /timeline       : filtered timeline of the selected endpoint
//! - GET  /details        : details + diff of an entry (`?id=`)
//! - POST /compare        : comparison report of two entries
//! - POST /navigate       : move the entry selection up/down
//! - POST /clear          : drop every captured exchange
//! - GET  /export         : export bundle (`?limit=`)
//! - GET  /storage        : storage usage against the quota

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use timelapse_core::ipc::{CaptureItem, Direction, TimelapseRequest, TimelapseResponse, PROTOCOL};
use timelapse_core::{ErrorKind, RawEvent, TimelapseConfig, TimelineFilter};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::router;
use crate::session::SharedSession;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub session: SharedSession,
    pub config: TimelapseConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/capture", post(capture_handler))
        .route("/capture/batch", post(capture_batch_handler))
        .route("/endpoints", get(endpoints_handler))
        .route("/select", post(select_handler))
        .route("/compare/toggle", post(toggle_compare_handler))
        .route("/filters", post(filters_handler))
        .route("/timeline", get(timeline_handler))
        .route("/details", get(details_handler))
        .route("/compare", post(compare_handler))
        .route("/navigate", post(navigate_handler))
        .route("/clear", post(clear_handler))
        .route("/export", get(export_handler))
        .route("/storage", get(storage_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    session: SharedSession,
    config: TimelapseConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { session, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Timelapse HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub event: RawEvent,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CaptureBatchRequest {
    #[serde(default)]
    pub captures: Vec<CaptureItem>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EndpointsParams {
    pub search: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SelectRequest {
    pub key: Option<String>,
    pub id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DetailsParams {
    pub id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CompareRequest {
    pub reference: Option<Uuid>,
    pub candidate: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub direction: Direction,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExportParams {
    pub limit: Option<usize>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(session: &SharedSession, socket_path: &str) -> (StatusCode, serde_json::Value) {
    let (status, mut body) = dispatch(session, TimelapseRequest::Health).await;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
        obj.insert("socket".to_string(), serde_json::json!(socket_path));
    }
    (status, body)
}

/// Pure, no IO.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL,
    })
}

pub async fn capture_inner(session: &SharedSession, req: CaptureRequest) -> (StatusCode, serde_json::Value) {
    dispatch(
        session,
        TimelapseRequest::Capture {
            event: req.event,
            body: req.body,
        },
    )
    .await
}

pub async fn capture_batch_inner(
    session: &SharedSession,
    req: CaptureBatchRequest,
) -> (StatusCode, serde_json::Value) {
    if req.captures.is_empty() {
        return bad_request("captures must not be empty");
    }
    dispatch(session, TimelapseRequest::CaptureBatch { captures: req.captures }).await
}

pub async fn endpoints_inner(session: &SharedSession, params: EndpointsParams) -> (StatusCode, serde_json::Value) {
    dispatch(
        session,
        TimelapseRequest::Endpoints {
            search: params.search,
            environment: params.environment,
        },
    )
    .await
}

/// Endpoint selection is applied before entry selection.
pub async fn select_inner(session: &SharedSession, req: SelectRequest) -> (StatusCode, serde_json::Value) {
    if req.key.is_none() && req.id.is_none() {
        return bad_request("key or id is required");
    }

    let mut result = (StatusCode::OK, serde_json::json!({}));
    if let Some(key) = req.key {
        result = dispatch(session, TimelapseRequest::SelectEndpoint { key }).await;
        if result.0 != StatusCode::OK {
            return result;
        }
    }
    if let Some(id) = req.id {
        result = dispatch(session, TimelapseRequest::SelectEntry { id }).await;
    }
    result
}

pub async fn toggle_compare_inner(session: &SharedSession) -> (StatusCode, serde_json::Value) {
    dispatch(session, TimelapseRequest::ToggleCompare).await
}

pub async fn filters_inner(session: &SharedSession, filters: TimelineFilter) -> (StatusCode, serde_json::Value) {
    dispatch(session, TimelapseRequest::SetFilters { filters }).await
}

pub async fn timeline_inner(session: &SharedSession) -> (StatusCode, serde_json::Value) {
    dispatch(session, TimelapseRequest::Timeline).await
}

pub async fn details_inner(session: &SharedSession, params: DetailsParams) -> (StatusCode, serde_json::Value) {
    dispatch(session, TimelapseRequest::Details { id: params.id }).await
}

pub async fn compare_inner(session: &SharedSession, req: CompareRequest) -> (StatusCode, serde_json::Value) {
    dispatch(
        session,
        TimelapseRequest::Compare {
            reference: req.reference,
            candidate: req.candidate,
        },
    )
    .await
}

pub async fn navigate_inner(session: &SharedSession, req: NavigateRequest) -> (StatusCode, serde_json::Value) {
    dispatch(session, TimelapseRequest::Navigate { direction: req.direction }).await
}

pub async fn clear_inner(session: &SharedSession) -> (StatusCode, serde_json::Value) {
    dispatch(session, TimelapseRequest::Clear).await
}

pub async fn export_inner(session: &SharedSession, params: ExportParams) -> (StatusCode, serde_json::Value) {
    dispatch(session, TimelapseRequest::Export { limit: params.limit }).await
}

pub async fn storage_inner(session: &SharedSession) -> (StatusCode, serde_json::Value) {
    dispatch(session, TimelapseRequest::Storage).await
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let socket_path = state.config.service.expanded_socket_path();
    let (status, body) = health_inner(&state.session, &socket_path).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn capture_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<CaptureRequest>,
) -> impl IntoResponse {
    let (status, body) = capture_inner(&state.session, req).await;
    (status, Json(body))
}

pub async fn capture_batch_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<CaptureBatchRequest>,
) -> impl IntoResponse {
    let (status, body) = capture_batch_inner(&state.session, req).await;
    (status, Json(body))
}

pub async fn endpoints_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<EndpointsParams>,
) -> impl IntoResponse {
    let (status, body) = endpoints_inner(&state.session, params).await;
    (status, Json(body))
}

pub async fn select_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SelectRequest>,
) -> impl IntoResponse {
    let (status, body) = select_inner(&state.session, req).await;
    (status, Json(body))
}

pub async fn toggle_compare_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = toggle_compare_inner(&state.session).await;
    (status, Json(body))
}

pub async fn filters_handler(
    State(state): State<Arc<HttpState>>,
    Json(filters): Json<TimelineFilter>,
) -> impl IntoResponse {
    let (status, body) = filters_inner(&state.session, filters).await;
    (status, Json(body))
}

pub async fn timeline_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = timeline_inner(&state.session).await;
    (status, Json(body))
}

pub async fn details_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<DetailsParams>,
) -> impl IntoResponse {
    let (status, body) = details_inner(&state.session, params).await;
    (status, Json(body))
}

pub async fn compare_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<CompareRequest>,
) -> impl IntoResponse {
    let (status, body) = compare_inner(&state.session, req).await;
    (status, Json(body))
}

pub async fn navigate_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<NavigateRequest>,
) -> impl IntoResponse {
    let (status, body) = navigate_inner(&state.session, req).await;
    (status, Json(body))
}

pub async fn clear_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = clear_inner(&state.session).await;
    (status, Json(body))
}

pub async fn export_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<ExportParams>,
) -> impl IntoResponse {
    let (status, body) = export_inner(&state.session, params).await;
    (status, Json(body))
}

pub async fn storage_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = storage_inner(&state.session).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

async fn dispatch(session: &SharedSession, request: TimelapseRequest) -> (StatusCode, serde_json::Value) {
    match response_to_http(router::handle_request(request, session).await) {
        Ok(data) => (StatusCode::OK, data),
        Err((kind, message)) => (error_status(kind), error_body(message)),
    }
}

/// Convert an IPC `TimelapseResponse` into an HTTP body value, or the
/// error kind and message.
pub fn response_to_http(
    response: TimelapseResponse,
) -> std::result::Result<serde_json::Value, (ErrorKind, String)> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err((
            response.error_kind.unwrap_or(ErrorKind::Internal),
            response.error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

fn error_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Store | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": message.into(),
        "status": "error",
    })
}

fn bad_request(message: &str) -> (StatusCode, serde_json::Value) {
    (StatusCode::BAD_REQUEST, error_body(message))
}

// ============================================================================
// Unit tests, calling inner functions directly
// ============================================================================
