//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::FrameError;
use crate::models::status::UpdateStatus;
use crate::platform::Platform;
use crate::server::pages;
use crate::server::state::ServerState;
use crate::telemetry::{collect_process_metrics, process_memory_mb, ProcessMetrics};
use crate::update::UpdateManager;
use crate::utils::{version_info, VersionInfo};

/// Error body for failed requests
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// A `FrameError` rendered as JSON
#[derive(Debug)]
pub struct ApiError(pub FrameError);

impl From<FrameError> for ApiError {
    fn from(err: FrameError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            FrameError::Conflict(_) => StatusCode::CONFLICT,
            FrameError::PathSecurity(_) | FrameError::ConfigError(_) => StatusCode::BAD_REQUEST,
            FrameError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            success: false,
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn updates(state: &ServerState) -> Result<&Arc<UpdateManager>, ApiError> {
    state
        .updates
        .as_ref()
        .ok_or_else(|| ApiError(FrameError::NotFound("remote updates are not enabled".to_string())))
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.service.clone(),
        version: state.app_version.clone(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub app_version: String,
    pub framework: VersionInfo,
    pub platform: Platform,
    pub process: Option<ProcessMetrics>,
}

/// Version handler
pub async fn version_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(VersionResponse {
        app_version: state.app_version.clone(),
        framework: version_info(),
        platform: state.platform,
        process: collect_process_metrics(),
    })
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// Restart handler: answers first, then restarts
pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Restart requested");
    state.restarter.restart().await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Server is restarting".to_string(),
    }))
}

/// Update status with host details
#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    #[serde(flatten)]
    pub status: UpdateStatus,
    pub platform: Platform,
    pub memory_mb: Option<f64>,
    pub can_rollback: bool,
    pub repo: String,
    pub source: String,
}

/// Result of an update operation
#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: UpdateStatus,
}

impl From<UpdateStatus> for UpdateResponse {
    fn from(status: UpdateStatus) -> Self {
        Self {
            success: true,
            status,
        }
    }
}

/// Update status handler
pub async fn update_status_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    let manager = updates(&state)?;
    let options = manager.options();

    Ok(Json(UpdateStatusResponse {
        status: manager.status().await,
        platform: state.platform,
        memory_mb: process_memory_mb(),
        can_rollback: manager.can_rollback().await,
        repo: options.repo.clone(),
        source: options.pointer.clone(),
    }))
}

/// Check handler; the check runs in the background
pub async fn check_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let status = updates(&state)?.start_check().await?;
    Ok(Json(status.into()))
}

/// Download handler; the download runs in the background
pub async fn download_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let status = updates(&state)?.start_download().await?;
    Ok(Json(status.into()))
}

/// Apply handler; the apply runs to completion in the background
pub async fn apply_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let status = updates(&state)?.start_apply().await?;
    Ok(Json(status.into()))
}

/// Rollback handler
pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let status = updates(&state)?.start_rollback().await?;
    Ok(Json(status.into()))
}

/// Re-enable updates
pub async fn enable_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let status = updates(&state)?.enable().await?;
    Ok(Json(status.into()))
}

/// Update management page
pub async fn update_page_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Html<String>, ApiError> {
    let manager = updates(&state)?;
    Ok(Html(pages::update_page(
        &state.service,
        &manager.options().repo,
    )))
}

/// Embeddable status widget
pub async fn update_widget_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Html<String>, ApiError> {
    updates(&state)?;
    Ok(Html(pages::status_widget()))
}
