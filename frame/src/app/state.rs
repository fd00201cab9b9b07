//! Application state

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::errors::FrameError;
use crate::platform::{self, Platform};
use crate::update::UpdateManager;
use crate::utils::read_local_version;

/// Main application state
pub struct AppState {
    pub service: String,

    /// Deployed version as of process start
    pub app_version: String,

    pub platform: Platform,

    /// Present when remote updates are enabled
    pub updates: Option<Arc<UpdateManager>>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, FrameError> {
        info!("Initializing application state...");

        let settings = &options.settings;
        let layout = &options.layout;

        let platform = platform::detect();
        let app_version =
            read_local_version(&layout.version_file(&settings.update.version_file)).await;
        info!("{} {} on {}", options.service, app_version, platform);

        let updates = if settings.update.enabled {
            let manager =
                UpdateManager::from_settings(&settings.update, layout.clone(), settings.server.port)
                    .await?;
            Some(Arc::new(manager))
        } else {
            info!("Remote updates disabled");
            None
        };

        Ok(Self {
            service: options.service.clone(),
            app_version,
            platform,
            updates,
        })
    }
}
