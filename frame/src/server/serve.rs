//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::FrameError;
use crate::server::handlers::{
    apply_handler, check_handler, download_handler, enable_handler, health_handler,
    restart_handler, rollback_handler, update_page_handler, update_status_handler,
    update_widget_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::storage::settings::ServerSettings;

/// Build the application router
pub fn router(state: Arc<ServerState>) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    let mut app = Router::new()
        // Health and version
        .route("/api/health", get(health_handler))
        .route("/api/version", get(version_handler))
        .route("/api/restart", post(restart_handler));

    if state.updates.is_some() {
        app = app
            .route("/api/update/status", get(update_status_handler))
            .route("/api/update/check", post(check_handler))
            .route("/api/update/download", post(download_handler))
            .route("/api/update/apply", post(apply_handler))
            .route("/api/update/rollback", post(rollback_handler))
            .route("/api/update/enable", post(enable_handler))
            .route("/api/update/widget", get(update_widget_handler))
            .route("/update", get(update_page_handler));
    }

    app.nest_service("/static", static_files)
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerSettings,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), FrameError>>, FrameError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| FrameError::ServerError(format!("bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| FrameError::ServerError(e.to_string()))
    });

    Ok(handle)
}
