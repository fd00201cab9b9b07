//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::checker;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Name reported by the health endpoint
    pub service: String,

    /// Loaded settings
    pub settings: Settings,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,
}

impl AppOptions {
    /// Options for `settings`, deriving the checker schedule from them
    pub fn new(service: impl Into<String>, settings: Settings, layout: StorageLayout) -> Self {
        Self {
            service: service.into(),
            settings,
            layout,
            lifecycle: LifecycleOptions::default(),
        }
    }

    /// Checker worker options from the update settings
    pub fn checker(&self) -> checker::Options {
        checker::Options {
            interval: Duration::from_secs(self.settings.update.check_interval_secs.max(60)),
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
