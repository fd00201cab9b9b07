//! Server state

use std::path::PathBuf;
use std::sync::Arc;

use crate::platform::Platform;
use crate::update::supervisor::ServiceSupervisor;
use crate::update::UpdateManager;

/// Server state shared across handlers
pub struct ServerState {
    /// Name reported by the health endpoint
    pub service: String,

    /// Version of the deployed application as of process start
    pub app_version: String,

    pub platform: Platform,

    pub static_dir: PathBuf,

    /// Present when remote updates are enabled
    pub updates: Option<Arc<UpdateManager>>,

    /// Handles `POST /api/restart`
    pub restarter: Arc<dyn ServiceSupervisor>,
}

impl ServerState {
    pub fn new(
        service: impl Into<String>,
        app_version: impl Into<String>,
        platform: Platform,
        static_dir: impl Into<PathBuf>,
        updates: Option<Arc<UpdateManager>>,
        restarter: Arc<dyn ServiceSupervisor>,
    ) -> Self {
        Self {
            service: service.into(),
            app_version: app_version.into(),
            platform,
            static_dir: static_dir.into(),
            updates,
            restarter,
        }
    }
}
