//! Router setup and shared state.

use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::shutdown::ShutdownCoordinator;
use crate::streaming::ChatRelay;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: ChatRelay,
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub fn new(relay: ChatRelay, shutdown: ShutdownCoordinator) -> Self {
        Self { relay, shutdown }
    }
}

/// Create the router: chat API routes, health check, and static files from
/// `static_dir` for everything else (`/` serves `index.html`).
pub fn create_router(state: AppState, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/api/chat/stream", post(handlers::chat_stream))
        .route("/api/chat", post(handlers::chat_once))
        .route("/health", get(handlers::health))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
