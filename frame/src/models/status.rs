//! The persisted update status record

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::release::{ReleaseDescriptor, VersionComparison};

/// Update process state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    #[default]
    Idle,
    Checking,
    UpdateAvailable,
    Downloading,
    Downloaded,
    Applying,
    Applied,
    RollingBack,
}

impl UpdateState {
    /// States in which an operation owns the update process
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UpdateState::Checking
                | UpdateState::Downloading
                | UpdateState::Applying
                | UpdateState::Applied
                | UpdateState::RollingBack
        )
    }

    /// States in which the executor owns the deployment tree
    pub fn owns_deployment(&self) -> bool {
        matches!(self, UpdateState::Applying | UpdateState::RollingBack)
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::UpdateAvailable => "update_available",
            UpdateState::Downloading => "downloading",
            UpdateState::Downloaded => "downloaded",
            UpdateState::Applying => "applying",
            UpdateState::Applied => "applied",
            UpdateState::RollingBack => "rolling_back",
        };
        f.write_str(name)
    }
}

/// The single source of truth for what the update process is doing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub state: UpdateState,

    /// Version of the running deployment
    pub current_version: String,

    #[serde(default)]
    pub target_version: Option<String>,

    /// Release selected by the last successful check
    #[serde(default)]
    pub target_release: Option<ReleaseDescriptor>,

    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_error: Option<String>,

    /// Downloaded but not yet applied archive
    #[serde(default)]
    pub download_path: Option<PathBuf>,

    #[serde(default)]
    pub download_sha256: Option<String>,

    #[serde(default)]
    pub version_comparison: Option<VersionComparison>,

    /// Backup taken by the apply in flight
    #[serde(default)]
    pub active_backup: Option<String>,

    /// A rollback failed; the deployment needs an operator
    #[serde(default)]
    pub degraded: bool,

    /// Consecutive failed applies
    #[serde(default)]
    pub failed_attempts: u32,

    #[serde(default)]
    pub updates_disabled: bool,

    pub updated_at: DateTime<Utc>,
}

impl UpdateStatus {
    /// Fresh-install record
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            state: UpdateState::Idle,
            current_version: current_version.into(),
            target_version: None,
            target_release: None,
            last_checked_at: None,
            last_error: None,
            download_path: None,
            download_sha256: None,
            version_comparison: None,
            active_backup: None,
            degraded: false,
            failed_attempts: 0,
            updates_disabled: false,
            updated_at: Utc::now(),
        }
    }

    pub fn update_available(&self) -> bool {
        self.target_version.is_some()
            && matches!(
                self.state,
                UpdateState::UpdateAvailable | UpdateState::Downloading | UpdateState::Downloaded
            )
    }
}
