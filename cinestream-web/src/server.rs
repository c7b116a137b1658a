//! Router construction and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{delete, get, post};
use cinestream_core::StreamService;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{
    add_content, content_status, file_progress, health, playlist_artifact, prioritize,
    remove_content, seek_artifact, set_duration, stream_file,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StreamService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: Arc<StreamService>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }
}

/// Errors that stop the server itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// Builds the full route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/add", post(add_content))
        .route("/status/{id}", get(content_status))
        .route("/progress/{id}/{file_idx}", get(file_progress))
        .route("/prioritize", post(prioritize))
        .route("/duration", post(set_duration))
        .route("/hls/{id}/{file_idx}/{filename}", get(playlist_artifact))
        .route(
            "/hls/{id}/{file_idx}/seek/{seconds}/{filename}",
            get(seek_artifact),
        )
        .route("/stream/{id}/{file_idx}", get(stream_file))
        .route("/remove/{id}", delete(remove_content))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until Ctrl-C, then shuts the service down.
///
/// # Errors
///
/// - `ServerError::Bind` - The address is unavailable
/// - `ServerError::Serve` - The accept loop failed
pub async fn run_server(service: Arc<StreamService>, address: SocketAddr) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind { address, source })?;
    let local = listener.local_addr()?;
    info!(address = %local, "Cinestream server listening");

    let app = router(AppState::new(Arc::clone(&service)));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    service.shutdown().await;
    Ok(())
}
