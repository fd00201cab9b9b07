//! Finite state machine for the update process

use std::fmt;
use std::path::PathBuf;

use chrono::Utc;

use crate::errors::FrameError;
use crate::models::release::{ReleaseDescriptor, VersionComparison};
use crate::models::status::{UpdateState, UpdateStatus};

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// Consecutive failed applies before updates are disabled
    pub max_failed_attempts: u32,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: 3,
        }
    }
}

/// Update event
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// Start a check
    Check,

    /// The remote release is newer than the running version
    NewerFound(ReleaseDescriptor),

    /// Nothing to update to
    NoUpdate(VersionComparison),

    /// Remote unreachable or unusable
    CheckFailed(String),

    /// Start downloading the target release
    Download,

    /// Archive fully retrieved
    Downloaded { path: PathBuf, sha256: String },

    /// Network or size failure while downloading
    DownloadFailed(String),

    /// The downloaded archive vanished before it could be applied
    DownloadLost(String),

    /// Start applying the downloaded archive
    Apply,

    /// The pre-apply backup exists
    BackupTaken(String),

    /// New tree in place and healthy
    Applied,

    /// Apply failed after the backup was taken; restore follows
    ApplyFailed(String),

    /// Apply failed before the deployment was touched
    ApplyAborted(String),

    /// Applied release adopted as the running one
    Adopted,

    /// Manual rollback to a retained backup
    Rollback(String),

    /// Restore completed; the deployment runs `version`
    Restored { version: String },

    /// Restore failed; the deployment needs an operator
    RestoreFailed(String),

    /// The restored tree is in place but the service did not restart
    RestartFailed(String),

    /// A check or download was cut short by a process restart
    Interrupted,

    /// Re-enable updates after repeated failures or a failed restore
    Enable,
}

impl UpdateEvent {
    /// Events requested by a caller rather than produced by an operation
    fn is_request(&self) -> bool {
        matches!(
            self,
            UpdateEvent::Check
                | UpdateEvent::Download
                | UpdateEvent::Apply
                | UpdateEvent::Rollback(_)
        )
    }

    fn name(&self) -> &'static str {
        match self {
            UpdateEvent::Check => "check",
            UpdateEvent::NewerFound(_) => "newer_found",
            UpdateEvent::NoUpdate(_) => "no_update",
            UpdateEvent::CheckFailed(_) => "check_failed",
            UpdateEvent::Download => "download",
            UpdateEvent::Downloaded { .. } => "downloaded",
            UpdateEvent::DownloadFailed(_) => "download_failed",
            UpdateEvent::DownloadLost(_) => "download_lost",
            UpdateEvent::Apply => "apply",
            UpdateEvent::BackupTaken(_) => "backup_taken",
            UpdateEvent::Applied => "applied",
            UpdateEvent::ApplyFailed(_) => "apply_failed",
            UpdateEvent::ApplyAborted(_) => "apply_aborted",
            UpdateEvent::Adopted => "adopted",
            UpdateEvent::Rollback(_) => "rollback",
            UpdateEvent::Restored { .. } => "restored",
            UpdateEvent::RestoreFailed(_) => "restore_failed",
            UpdateEvent::RestartFailed(_) => "restart_failed",
            UpdateEvent::Interrupted => "interrupted",
            UpdateEvent::Enable => "enable",
        }
    }
}

impl fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Update FSM. Transitions mutate an `UpdateStatus` in place; a rejected
/// event leaves it untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateFsm {
    settings: FsmSettings,
}

impl UpdateFsm {
    pub fn new(settings: FsmSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FsmSettings {
        &self.settings
    }

    /// Process an event and transition state
    pub fn process(&self, status: &mut UpdateStatus, event: UpdateEvent) -> Result<(), FrameError> {
        if status.updates_disabled && event.is_request() {
            return Err(FrameError::Conflict(format!(
                "updates are disabled ({}); enable them first",
                status.last_error.as_deref().unwrap_or("too many failed attempts")
            )));
        }

        let new_state = match (status.state, event) {
            // From Idle
            (UpdateState::Idle, UpdateEvent::Check) => UpdateState::Checking,
            (UpdateState::Idle, UpdateEvent::Rollback(backup)) => {
                status.active_backup = Some(backup);
                UpdateState::RollingBack
            }
            (UpdateState::Idle, UpdateEvent::Enable) => {
                status.updates_disabled = false;
                status.degraded = false;
                status.failed_attempts = 0;
                status.last_error = None;
                UpdateState::Idle
            }
            (UpdateState::Idle, UpdateEvent::RestartFailed(err)) => {
                status.last_error = Some(err);
                status.degraded = true;
                status.updates_disabled = true;
                UpdateState::Idle
            }

            // From Checking
            (UpdateState::Checking, UpdateEvent::NewerFound(release)) => {
                status.target_version = Some(release.version.clone());
                status.target_release = Some(release);
                status.version_comparison = Some(VersionComparison::UpdateAvailable);
                status.last_checked_at = Some(Utc::now());
                status.last_error = None;
                UpdateState::UpdateAvailable
            }
            (UpdateState::Checking, UpdateEvent::NoUpdate(comparison)) => {
                clear_target(status);
                status.version_comparison = Some(comparison);
                status.last_checked_at = Some(Utc::now());
                status.last_error = None;
                UpdateState::Idle
            }
            (UpdateState::Checking, UpdateEvent::CheckFailed(err)) => {
                status.last_checked_at = Some(Utc::now());
                status.last_error = Some(err);
                UpdateState::Idle
            }
            (UpdateState::Checking, UpdateEvent::Interrupted) => UpdateState::Idle,

            // From UpdateAvailable
            (UpdateState::UpdateAvailable, UpdateEvent::Download) => {
                status.last_error = None;
                UpdateState::Downloading
            }

            // From Downloading
            (UpdateState::Downloading, UpdateEvent::Downloaded { path, sha256 }) => {
                status.download_path = Some(path);
                status.download_sha256 = Some(sha256);
                UpdateState::Downloaded
            }
            (UpdateState::Downloading, UpdateEvent::DownloadFailed(err)) => {
                status.download_path = None;
                status.download_sha256 = None;
                status.last_error = Some(err);
                UpdateState::UpdateAvailable
            }
            (UpdateState::Downloading, UpdateEvent::Interrupted) => {
                status.download_path = None;
                status.download_sha256 = None;
                UpdateState::UpdateAvailable
            }

            // From Downloaded
            (UpdateState::Downloaded, UpdateEvent::Apply) => {
                status.last_error = None;
                status.active_backup = None;
                UpdateState::Applying
            }
            (UpdateState::Downloaded, UpdateEvent::DownloadLost(err)) => {
                status.download_path = None;
                status.download_sha256 = None;
                status.last_error = Some(err);
                UpdateState::UpdateAvailable
            }

            // From Applying
            (UpdateState::Applying, UpdateEvent::BackupTaken(backup)) => {
                status.active_backup = Some(backup);
                UpdateState::Applying
            }
            (UpdateState::Applying, UpdateEvent::Applied) => {
                if let Some(version) = status.target_version.clone() {
                    status.current_version = version;
                }
                status.version_comparison = Some(VersionComparison::UpToDate);
                status.failed_attempts = 0;
                status.last_error = None;
                UpdateState::Applied
            }
            (UpdateState::Applying, UpdateEvent::ApplyFailed(err)) => {
                self.record_failure(status, err);
                UpdateState::RollingBack
            }
            (UpdateState::Applying, UpdateEvent::ApplyAborted(err)) => {
                self.record_failure(status, err);
                clear_target(status);
                status.active_backup = None;
                UpdateState::Idle
            }

            // From Applied
            (UpdateState::Applied, UpdateEvent::Adopted) => {
                clear_target(status);
                status.active_backup = None;
                UpdateState::Idle
            }

            // From RollingBack
            (UpdateState::RollingBack, UpdateEvent::Restored { version }) => {
                status.current_version = version;
                clear_target(status);
                status.active_backup = None;
                status.version_comparison = None;
                UpdateState::Idle
            }
            (UpdateState::RollingBack, UpdateEvent::RestoreFailed(err)) => {
                status.last_error = Some(err);
                status.degraded = true;
                status.updates_disabled = true;
                clear_target(status);
                UpdateState::Idle
            }

            // Invalid transitions
            (state, event) => {
                return Err(FrameError::Conflict(format!(
                    "cannot {} while {}",
                    event, state
                )));
            }
        };

        status.state = new_state;
        status.updated_at = Utc::now();
        Ok(())
    }

    fn record_failure(&self, status: &mut UpdateStatus, err: String) {
        status.last_error = Some(err);
        status.failed_attempts += 1;
        if status.failed_attempts >= self.settings.max_failed_attempts {
            status.updates_disabled = true;
        }
    }
}

fn clear_target(status: &mut UpdateStatus) {
    status.target_version = None;
    status.target_release = None;
    status.download_path = None;
    status.download_sha256 = None;
}
