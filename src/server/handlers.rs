//! HTTP handlers for the chat endpoints.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::router::AppState;
use crate::error::ApiError;
use crate::metrics;
use crate::streaming::sse_headers;

const STREAM_ENDPOINT: &str = "chat_stream";
const ONCE_ENDPOINT: &str = "chat";

/// Body of both chat endpoints.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
}

/// Body of a successful `/api/chat` response.
#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Extract a usable message or explain why the request is rejected.
fn validate(
    payload: Result<Json<ChatRequest>, JsonRejection>,
    endpoint: &'static str,
) -> Result<String, ApiError> {
    let result = match payload {
        Ok(Json(ChatRequest {
            message: Some(message),
        })) if !message.trim().is_empty() => Ok(message),
        Ok(_) => Err(ApiError::InvalidRequest(
            "message must be a non-empty string".to_string(),
        )),
        Err(rejection) => Err(ApiError::InvalidRequest(rejection.body_text())),
    };

    if let Err(e) = &result {
        metrics::record_rejected(endpoint);
        tracing::debug!(endpoint, error = %e, "Rejected chat request");
    }
    result
}

/// POST /api/chat/stream
///
/// Validates the request, then commits to `text/event-stream` and relays
/// the completion as SSE frames. Failures after this point are reported
/// in-band as an error frame.
pub async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    metrics::record_request(STREAM_ENDPOINT);
    let message = validate(payload, STREAM_ENDPOINT)?;

    let request_id = Uuid::new_v4().to_string();
    tracing::info!(
        request_id = %request_id,
        backend = state.relay.backend_name(),
        message_len = message.len(),
        "Streaming chat request"
    );

    let guard = state.shutdown.register_stream();
    let frames = state.relay.stream(&message, guard, request_id);

    Ok((sse_headers(), Body::from_stream(frames)).into_response())
}

/// POST /api/chat
///
/// Fallback for clients that cannot consume SSE.
pub async fn chat_once(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    metrics::record_request(ONCE_ENDPOINT);
    let message = validate(payload, ONCE_ENDPOINT)?;

    let request_id = Uuid::new_v4().to_string();
    tracing::info!(request_id = %request_id, message_len = message.len(), "Chat request");

    match state.relay.complete(&message).await {
        Ok(reply) => Ok(Json(ChatReply { reply })),
        Err(e) => {
            let backend = state.relay.backend_name();
            metrics::record_upstream_error(backend);
            tracing::error!(request_id = %request_id, backend, error = %e, "Upstream completion failed");
            Err(ApiError::Upstream(e))
        }
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.relay.backend_name(),
    }))
}
