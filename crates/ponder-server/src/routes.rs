//! HTTP handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use ponder_core::SessionId;
use ponder_runtime::{SessionDetails, SessionOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use crate::errors::ApiError;
use crate::health::{self, HealthResponse};
use crate::server::AppState;
use crate::sse;

/// `POST /api/sessions` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// The question to reason about.
    pub query: String,
    /// Model identifier; the configured default when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// Per-session loop overrides.
    #[serde(flatten)]
    pub options: SessionOptions,
}

/// `POST /api/sessions` response.
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// New session ID.
    pub session_id: SessionId,
    /// Always `"created"`.
    pub status: &'static str,
    /// Model the session runs on.
    pub model: String,
    /// Where to stream the session's events.
    pub events_url: String,
}

/// `limit` / `offset` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// Page size.
    pub limit: Option<usize>,
    /// Entries to skip.
    pub offset: Option<usize>,
}

impl PageQuery {
    fn resolve(&self, state: &AppState) -> (usize, usize) {
        let limit = self
            .limit
            .unwrap_or(state.config.default_page_size)
            .clamp(1, state.config.max_page_size);
        (limit, self.offset.unwrap_or(0))
    }
}

/// `GET /api/sessions/{id}/events` query.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// First sequence to deliver.
    pub from: Option<u64>,
}

/// POST /api/sessions
#[instrument(skip_all)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let session_id = state
        .service
        .create_session(&req.query, req.model.as_deref(), req.options)?;
    let model = req
        .model
        .unwrap_or_else(|| state.service.config().default_model.clone());
    let events_url = format!("/api/sessions/{session_id}/events");
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            status: "created",
            model,
            events_url,
        }),
    ))
}

/// GET /api/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Json<serde_json::Value> {
    let (limit, offset) = page.resolve(&state);
    let sessions = state.service.list_active_sessions(limit, offset);
    Json(json!({
        "sessions": sessions,
        "total": state.service.broker().len(),
        "limit": limit,
        "offset": offset,
    }))
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetails>, ApiError> {
    let session_id = SessionId::from(session_id);
    Ok(Json(state.service.get_session(&session_id).await?))
}

/// GET /api/sessions/{id}/events
#[instrument(skip_all, fields(%session_id))]
pub async fn stream_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let from = sse::resolve_cursor(query.from, &headers)?;
    let session_id = SessionId::from(session_id);
    let timeout = state.config.attach_timeout;

    let subscription = tokio::time::timeout(timeout, state.service.subscribe(&session_id, from))
        .await
        .map_err(|_| ApiError::AttachTimeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })??;
    debug!(from, next_sequence = subscription.next_sequence(), "event stream attached");

    let stream = sse::event_stream(subscription, state.shutdown.token());
    let keep_alive = KeepAlive::new()
        .interval(state.config.keep_alive_interval)
        .text("keep-alive");
    Ok(Sse::new(stream).keep_alive(keep_alive).into_response())
}

/// DELETE /api/sessions/{id}
pub async fn terminate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let session_id = SessionId::from(session_id);
    state.service.terminate(&session_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "session_id": session_id, "status": "terminating" })),
    ))
}

/// GET /api/history
pub async fn list_history(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (limit, offset) = page.resolve(&state);
    let sessions = state.service.list_history(limit, offset).await?;
    Ok(Json(json!({
        "sessions": sessions,
        "limit": limit,
        "offset": offset,
    })))
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.service.broker().len(),
        state.service.runner().running_count(),
    ))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
