//! HTTP handlers for the control API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use super::api::{
    CommandResponse, CreateStreamRequest, CreateStreamResponse, HistoryResponse, LogsResponse,
    RemoveQuery, StreamListResponse,
};
use super::error::ApiError;
use crate::config::DestinationConfig;
use crate::supervisor::{MetricsSnapshot, StreamId, StreamRegistry, StreamRequest, StreamSnapshot};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Streams under supervision.
    pub registry: Arc<StreamRegistry>,
    /// Fills in destination fields the caller leaves out.
    pub destination: DestinationConfig,
}

impl AppState {
    #[must_use]
    pub fn new(registry: Arc<StreamRegistry>, destination: DestinationConfig) -> Self {
        Self {
            registry,
            destination,
        }
    }
}

/// GET /api/streams - State of every stream.
pub async fn list_streams(State(state): State<AppState>) -> Json<StreamListResponse> {
    Json(StreamListResponse {
        streams: state.registry.list_statuses(),
    })
}

/// POST /api/streams - Create and start a relay.
pub async fn create_stream(
    State(state): State<AppState>,
    Json(body): Json<CreateStreamRequest>,
) -> Result<(StatusCode, Json<CreateStreamResponse>), ApiError> {
    let destination = state
        .destination
        .resolve(body.host.as_deref(), body.port, &body.path);
    let request = StreamRequest::new(body.source_uri, destination);

    let stream = match body.id {
        Some(id) => state.registry.create_with_id(StreamId::from(id), request)?,
        None => state.registry.create(request)?,
    };

    let response = CreateStreamResponse {
        id: stream.id().clone(),
        state: stream.status(),
        destination_uri: stream.destination_uri(),
        last_error: stream.last_error(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/streams/:id - Full snapshot of one stream.
pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StreamSnapshot>, ApiError> {
    let stream = state.registry.get(&StreamId::from(id))?;
    Ok(Json(stream.snapshot()))
}

/// GET /api/streams/:id/metrics - Current metrics.
pub async fn get_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    Ok(Json(state.registry.get_metrics(&StreamId::from(id))?))
}

/// GET /api/streams/:id/history - Metric samples, oldest first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let id = StreamId::from(id);
    let samples = state.registry.get_metrics_history(&id)?;
    Ok(Json(HistoryResponse { id, samples }))
}

/// GET /api/streams/:id/logs - Recent diagnostic lines.
pub async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LogsResponse>, ApiError> {
    let id = StreamId::from(id);
    let stream = state.registry.get(&id)?;
    Ok(Json(LogsResponse {
        id,
        lines: stream.logs(),
        last_error: stream.last_error(),
    }))
}

/// POST /api/streams/:id/start - Begin a new episode.
pub async fn post_start(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let stream_state = state.registry.start(&StreamId::from(id))?;
    Ok(Json(CommandResponse::success(format!(
        "Stream is {stream_state}"
    ))))
}

/// POST /api/streams/:id/stop - Request graceful termination.
pub async fn post_stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let response = if state.registry.stop(&StreamId::from(id))? {
        CommandResponse::success("Stop requested")
    } else {
        CommandResponse::success("Stream was not running")
    };
    Ok(Json(response))
}

/// DELETE /api/streams/:id - Remove a stream, killing it if `force` is set.
pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<CommandResponse>, ApiError> {
    let stream = state
        .registry
        .remove(&StreamId::from(id), query.force)
        .await?;
    Ok(Json(CommandResponse::success(format!(
        "Stream {} removed",
        stream.id()
    ))))
}
