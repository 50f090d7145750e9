//! HTTP server: routes, handlers, and the serve loop.

mod handlers;
mod router;

pub use handlers::{ChatReply, ChatRequest};
pub use router::{create_router, AppState};

use axum::Router;
use tokio::net::TcpListener;

use crate::shutdown::ShutdownCoordinator;

/// Serve `app` until shutdown is signaled and open connections finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: ShutdownCoordinator,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.signalled().await })
        .await
}
