//! Error types for the chat relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Message returned by `/api/chat` whenever the upstream call fails.
pub const REPLY_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

/// Startup errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors from the upstream completion service.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("No access token configured for the upstream service")]
    MissingCredential,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_decode() {
            UpstreamError::Parse(e.to_string())
        } else {
            UpstreamError::Connection(e.to_string())
        }
    }
}

/// Reasons an SSE stream ends with an error frame instead of `[DONE]`.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upstream idle for longer than the configured timeout")]
    IdleTimeout,

    #[error("Stream exceeded its total duration limit")]
    DeadlineExceeded,

    #[error("Server shutting down")]
    Shutdown,
}

impl StreamError {
    /// Static label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            StreamError::Upstream(_) => "upstream",
            StreamError::Serialization(_) => "serialization",
            StreamError::IdleTimeout => "idle_timeout",
            StreamError::DeadlineExceeded => "deadline",
            StreamError::Shutdown => "shutdown",
        }
    }
}

/// Errors returned by HTTP handlers before (or instead of) streaming.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream failure: {0}")]
    Upstream(#[from] UpstreamError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            // Upstream detail stays in the logs.
            ApiError::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                REPLY_ERROR_MESSAGE.to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
