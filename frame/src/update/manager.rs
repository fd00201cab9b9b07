//! Update manager
//!
//! Orchestrates check -> download -> apply -> rollback. The persisted
//! `UpdateStatus` is both the progress record and the lock: every operation
//! starts with a guarded transition (`begin_*`) that is written to disk before
//! the guard drops, then runs its I/O without the guard (`finish_*`) so
//! `status()` stays answerable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::errors::FrameError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::http::client::{FetchOptions, WebClient};
use crate::http::download::{discard_partials, ArchiveFetcher};
use crate::http::releases::{GitHubReleases, ReleaseSource, SourceMode};
use crate::models::release::{compare_versions, ReleaseDescriptor, VersionComparison};
use crate::models::status::{UpdateState, UpdateStatus};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{HealthCheckKind, UpdateSettings};
use crate::storage::status::StatusStore;
use crate::update::backup::{Backup, BackupStore};
use crate::update::executor::{ApplyExecutor, ExecutorOptions};
use crate::update::fsm::{FsmSettings, UpdateEvent, UpdateFsm};
use crate::update::health::{AlwaysHealthy, CommandHealthCheck, HealthCheck, HttpHealthCheck};
use crate::update::supervisor::{SelfRestart, ServiceSupervisor, SystemdSupervisor};
use crate::utils::{calc_exp_backoff, read_local_version, CooldownOptions};

/// Manager options
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// GitHub repository, "owner/name"
    pub repo: String,

    /// Release tag, "latest", or branch
    pub pointer: String,

    /// Version file name inside the deployment tree
    pub version_file: String,

    /// Attempts per check
    pub check_retries: u32,

    pub check_backoff: CooldownOptions,

    /// Backups retained after successful updates
    pub keep_backups: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            repo: String::new(),
            pointer: "latest".to_string(),
            version_file: "VERSION".to_string(),
            check_retries: 3,
            check_backoff: CooldownOptions::default(),
            keep_backups: 3,
        }
    }
}

/// Everything a manager is assembled from
pub struct ManagerParts {
    pub layout: StorageLayout,
    pub source: Arc<dyn ReleaseSource>,
    pub fetcher: ArchiveFetcher,
    pub executor: ApplyExecutor,
    pub fsm: UpdateFsm,
    pub options: ManagerOptions,
}

/// Single owner of the update process of one deployment
pub struct UpdateManager {
    status: RwLock<UpdateStatus>,
    store: StatusStore,
    fsm: UpdateFsm,
    source: Arc<dyn ReleaseSource>,
    fetcher: ArchiveFetcher,
    executor: ApplyExecutor,
    layout: StorageLayout,
    options: ManagerOptions,
}

impl UpdateManager {
    /// Load the persisted status (or bootstrap one from the VERSION file)
    pub async fn open(parts: ManagerParts) -> Result<Self, FrameError> {
        let ManagerParts {
            layout,
            source,
            fetcher,
            executor,
            fsm,
            options,
        } = parts;

        layout.setup().await?;
        let local_version = read_local_version(&layout.version_file(&options.version_file)).await;
        let store = StatusStore::new(layout.status_file(), local_version);
        let status = store.read().await?;
        info!(
            "Update status: {} (version {})",
            status.state, status.current_version
        );

        Ok(Self {
            status: RwLock::new(status),
            store,
            fsm,
            source,
            fetcher,
            executor,
            layout,
            options,
        })
    }

    /// Assemble a manager for the GitHub repository in `settings`.
    /// `local_port` is where this process serves `/api/health`.
    pub async fn from_settings(
        settings: &UpdateSettings,
        layout: StorageLayout,
        local_port: u16,
    ) -> Result<Self, FrameError> {
        let client = WebClient::new()?;

        let mode = if settings.use_releases {
            SourceMode::Releases
        } else {
            SourceMode::Branch {
                branch: settings.branch.clone(),
                version_path: match &settings.archive_subdir {
                    Some(subdir) if !subdir.is_empty() => {
                        format!("{}/{}", subdir, settings.version_file)
                    }
                    _ => settings.version_file.clone(),
                },
            }
        };
        let source = GitHubReleases::new(
            client.clone(),
            &settings.api_base_url,
            &settings.raw_base_url,
            mode,
            FetchOptions {
                timeout: Duration::from_secs(settings.request_timeout_secs),
                ..FetchOptions::default()
            },
        );

        let fetcher = ArchiveFetcher::new(
            client.clone(),
            settings.max_download_bytes,
            Duration::from_secs(settings.download_timeout_secs),
        );

        let supervisor: Arc<dyn ServiceSupervisor> = match &settings.service_name {
            Some(service) => Arc::new(SystemdSupervisor::new(service, settings.use_sudo)),
            None => Arc::new(SelfRestart::default()),
        };
        let health = build_health_check(settings, client, local_port)?;
        let executor = ApplyExecutor::new(
            BackupStore::new(layout.backups_dir()),
            layout.staging_dir(),
            supervisor,
            health,
            ExecutorOptions {
                archive_subdir: settings.archive_subdir.clone(),
                required_files: settings.required_files.clone(),
                health_timeout: Duration::from_secs(settings.health_check.timeout_secs),
            },
        );

        Self::open(ManagerParts {
            layout,
            source: Arc::new(source),
            fetcher,
            executor,
            fsm: UpdateFsm::new(FsmSettings {
                max_failed_attempts: settings.max_failed_attempts,
            }),
            options: ManagerOptions {
                repo: settings.github_repo.clone(),
                pointer: settings.target_pointer().to_string(),
                version_file: settings.version_file.clone(),
                check_retries: settings.check_retries.max(1),
                check_backoff: CooldownOptions::default(),
                keep_backups: settings.keep_backups,
            },
        })
        .await
    }

    /// Snapshot of the current status
    pub async fn status(&self) -> UpdateStatus {
        self.status.read().await.clone()
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Newest retained backup, if any
    pub async fn latest_backup(&self) -> Option<Backup> {
        match self.executor.backups().latest().await {
            Ok(backup) => backup,
            Err(e) => {
                warn!("Failed to list backups: {}", e);
                None
            }
        }
    }

    /// Whether a manual rollback would be accepted now
    pub async fn can_rollback(&self) -> bool {
        let status = self.status().await;
        status.state == UpdateState::Idle
            && !status.updates_disabled
            && self.latest_backup().await.is_some()
    }

    /// Apply `event` to the guarded status and persist it. The in-memory
    /// status only changes once the record is on disk.
    async fn commit(
        &self,
        current: &mut UpdateStatus,
        event: UpdateEvent,
    ) -> Result<UpdateStatus, FrameError> {
        let mut next = current.clone();
        let from = next.state;
        self.fsm.process(&mut next, event)?;
        self.store.write(&next).await?;
        debug!("Update state {} -> {}", from, next.state);
        *current = next.clone();
        Ok(next)
    }

    async fn transition(&self, event: UpdateEvent) -> Result<UpdateStatus, FrameError> {
        let mut guard = self.status.write().await;
        self.commit(&mut guard, event).await
    }

    // ---- check ----

    /// Check the remote for a newer release. Once begun, the check runs to
    /// completion even if the returned future is dropped.
    pub async fn check(self: &Arc<Self>) -> Result<UpdateStatus, FrameError> {
        self.begin_check().await?;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.finish_check().await }).await?
    }

    /// Begin a check and run it in the background
    pub async fn start_check(self: &Arc<Self>) -> Result<UpdateStatus, FrameError> {
        let status = self.begin_check().await?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.finish_check().await {
                error!("Update check failed to complete: {}", e);
            }
        });
        Ok(status)
    }

    async fn begin_check(&self) -> Result<UpdateStatus, FrameError> {
        if self.options.repo.is_empty() {
            return Err(FrameError::ConfigError("no GitHub repository configured".to_string()));
        }
        self.transition(UpdateEvent::Check).await
    }

    async fn finish_check(&self) -> Result<UpdateStatus, FrameError> {
        let current_version = self.status().await.current_version;

        let event = match self.resolve_with_retries().await {
            Ok(release) => match compare_versions(&current_version, &release.version) {
                VersionComparison::UpdateAvailable => {
                    info!("Update available: {} -> {}", current_version, release.version);
                    UpdateEvent::NewerFound(release)
                }
                comparison => {
                    info!(
                        "No update: local {} vs remote {} ({:?})",
                        current_version, release.version, comparison
                    );
                    UpdateEvent::NoUpdate(comparison)
                }
            },
            Err(e) => {
                warn!("Update check failed: {}", e);
                UpdateEvent::CheckFailed(e.to_string())
            }
        };

        self.transition(event).await
    }

    async fn resolve_with_retries(&self) -> Result<ReleaseDescriptor, FrameError> {
        let attempts = self.options.check_retries.max(1);
        let mut attempt = 0;
        loop {
            match self
                .source
                .resolve_target(&self.options.repo, &self.options.pointer)
                .await
            {
                Ok(release) => return Ok(release),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = calc_exp_backoff(&self.options.check_backoff, attempt);
                    warn!(
                        "Check attempt {}/{} failed: {}; retrying in {:?}",
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ---- download ----

    /// Download the archive of the release found by the last check. Once
    /// begun, the download runs to completion even if the returned future is
    /// dropped.
    pub async fn download(self: &Arc<Self>) -> Result<UpdateStatus, FrameError> {
        self.begin_download().await?;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.finish_download().await }).await?
    }

    /// Begin a download and run it in the background
    pub async fn start_download(self: &Arc<Self>) -> Result<UpdateStatus, FrameError> {
        let status = self.begin_download().await?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.finish_download().await {
                error!("Download failed to complete: {}", e);
            }
        });
        Ok(status)
    }

    async fn begin_download(&self) -> Result<UpdateStatus, FrameError> {
        self.transition(UpdateEvent::Download).await
    }

    async fn finish_download(&self) -> Result<UpdateStatus, FrameError> {
        let downloads = self.layout.downloads_dir();
        let Some(release) = self.status().await.target_release else {
            return self
                .transition(UpdateEvent::DownloadFailed("no target release".to_string()))
                .await;
        };

        let event = match self.fetcher.download(&release, downloads.path()).await {
            Ok(archive) => {
                discard_other_archives(&downloads, &archive.path).await;
                UpdateEvent::Downloaded {
                    path: archive.path,
                    sha256: archive.sha256,
                }
            }
            Err(e) => {
                warn!("Download of {} failed: {}", release.version, e);
                UpdateEvent::DownloadFailed(e.to_string())
            }
        };

        self.transition(event).await
    }

    // ---- apply ----

    /// Apply the downloaded archive. Once begun, the apply runs to completion
    /// even if the returned future is dropped.
    pub async fn apply(self: &Arc<Self>) -> Result<UpdateStatus, FrameError> {
        self.begin_apply().await?;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.finish_apply().await }).await?
    }

    /// Begin an apply and run it in the background
    pub async fn start_apply(self: &Arc<Self>) -> Result<UpdateStatus, FrameError> {
        let status = self.begin_apply().await?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.finish_apply().await {
                error!("Apply failed to complete: {}", e);
            }
        });
        Ok(status)
    }

    async fn begin_apply(&self) -> Result<UpdateStatus, FrameError> {
        let mut guard = self.status.write().await;

        if guard.state == UpdateState::Downloaded && !guard.updates_disabled {
            let present = match &guard.download_path {
                Some(path) => File::new(path).exists().await,
                None => false,
            };
            if !present {
                let message = "downloaded archive is missing; download again".to_string();
                self.commit(&mut guard, UpdateEvent::DownloadLost(message.clone()))
                    .await?;
                return Err(FrameError::Apply(message));
            }
        }

        self.commit(&mut guard, UpdateEvent::Apply).await
    }

    async fn finish_apply(&self) -> Result<UpdateStatus, FrameError> {
        let status = self.status().await;
        let deployment = self.layout.deployment_dir();
        let (Some(archive), Some(target)) = (status.download_path.clone(), status.target_version.clone())
        else {
            return self
                .transition(UpdateEvent::ApplyAborted("nothing to apply".to_string()))
                .await;
        };

        info!("Applying {} over {}", target, status.current_version);

        let backup = match self.executor.backup(&deployment, &status.current_version).await {
            Ok(backup) => backup,
            Err(e) => {
                error!("Apply aborted: {}", e);
                let result = self.transition(UpdateEvent::ApplyAborted(e.to_string())).await;
                discard_archive(&archive).await;
                return result;
            }
        };
        self.transition(UpdateEvent::BackupTaken(backup.id.clone()))
            .await?;

        let result = match self
            .executor
            .install_and_verify(&archive, &deployment, &target)
            .await
        {
            Ok(()) => self.finalize_apply(backup).await,
            Err(e) => {
                error!("Apply of {} failed: {}", target, e);
                self.transition(UpdateEvent::ApplyFailed(e.to_string())).await?;
                self.restore(backup).await
            }
        };
        discard_archive(&archive).await;
        result
    }

    async fn finalize_apply(&self, mut backup: Backup) -> Result<UpdateStatus, FrameError> {
        self.transition(UpdateEvent::Applied).await?;

        if let Err(e) = self.executor.mark_disposable(&mut backup).await {
            warn!("Failed to mark backup {} disposable: {}", backup.id, e);
        }
        if let Err(e) = self.executor.prune_backups(self.options.keep_backups).await {
            warn!("Failed to prune backups: {}", e);
        }

        let status = self.transition(UpdateEvent::Adopted).await?;
        info!("Update to {} complete", status.current_version);
        Ok(status)
    }

    // ---- rollback ----

    /// Restore the newest retained backup
    pub async fn rollback(self: &Arc<Self>) -> Result<UpdateStatus, FrameError> {
        let (_, backup) = self.begin_rollback().await?;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.restore(backup).await }).await?
    }

    /// Begin a rollback and run it in the background
    pub async fn start_rollback(self: &Arc<Self>) -> Result<UpdateStatus, FrameError> {
        let (status, backup) = self.begin_rollback().await?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.restore(backup).await {
                error!("Rollback failed to complete: {}", e);
            }
        });
        Ok(status)
    }

    async fn begin_rollback(&self) -> Result<(UpdateStatus, Backup), FrameError> {
        let mut guard = self.status.write().await;
        if guard.state != UpdateState::Idle || guard.updates_disabled {
            // Let the state machine phrase the rejection
            let mut probe = guard.clone();
            self.fsm
                .process(&mut probe, UpdateEvent::Rollback(String::new()))?;
        }

        let backup = self
            .executor
            .backups()
            .latest()
            .await?
            .ok_or_else(|| FrameError::Conflict("no backup to roll back to".to_string()))?;
        let status = self
            .commit(&mut guard, UpdateEvent::Rollback(backup.id.clone()))
            .await?;
        Ok((status, backup))
    }

    async fn restore(&self, backup: Backup) -> Result<UpdateStatus, FrameError> {
        let deployment = self.layout.deployment_dir();
        if let Err(e) = self.executor.restore(&backup, &deployment).await {
            error!("DEGRADED: {}. Manual intervention required.", e);
            return self.transition(UpdateEvent::RestoreFailed(e.to_string())).await;
        }

        // Recorded before the restart, which may end this process
        let status = self.settle_restored(backup).await?;

        if let Err(e) = self.executor.restart().await {
            error!("DEGRADED: {}. Manual intervention required.", e);
            return self.transition(UpdateEvent::RestartFailed(e.to_string())).await;
        }
        Ok(status)
    }

    async fn settle_restored(&self, mut backup: Backup) -> Result<UpdateStatus, FrameError> {
        info!("Restored version {} from backup {}", backup.version, backup.id);
        if let Err(e) = self.executor.mark_disposable(&mut backup).await {
            warn!("Failed to mark backup {} disposable: {}", backup.id, e);
        }
        self.transition(UpdateEvent::Restored {
            version: backup.version,
        })
        .await
    }

    // ---- enable ----

    /// Re-enable updates after repeated failures or a failed restore
    pub async fn enable(&self) -> Result<UpdateStatus, FrameError> {
        let status = self.transition(UpdateEvent::Enable).await?;
        info!("Updates re-enabled");
        Ok(status)
    }

    // ---- recovery ----

    /// Repair the status after a process restart. An apply or rollback cut
    /// short is resumed: an interrupted apply is health checked against its
    /// target and either adopted or rolled back.
    pub async fn recover(&self) -> Result<UpdateStatus, FrameError> {
        let pending = self.repair().await?;
        self.resume(pending).await
    }

    /// The guarded half of `recover`: reset an interrupted check or download
    /// and discard leftovers. Must run before any request reaches the manager.
    pub async fn repair(&self) -> Result<UpdateStatus, FrameError> {
        let mut guard = self.status.write().await;

        if let Err(e) = self.executor.backups().discard_incomplete().await {
            warn!("Failed to clean incomplete backups: {}", e);
        }
        match discard_partials(&self.layout.downloads_dir()).await {
            Ok(0) => {}
            Ok(n) => info!("Removed {} partial download(s)", n),
            Err(e) => warn!("Failed to clean partial downloads: {}", e),
        }

        match guard.state {
            UpdateState::Checking | UpdateState::Downloading => {
                info!("Resetting interrupted {}", guard.state);
                self.commit(&mut guard, UpdateEvent::Interrupted).await?;
            }
            UpdateState::Downloaded => {
                let present = match &guard.download_path {
                    Some(path) => File::new(path).exists().await,
                    None => false,
                };
                if !present {
                    self.commit(
                        &mut guard,
                        UpdateEvent::DownloadLost("downloaded archive is missing".to_string()),
                    )
                    .await?;
                }
            }
            UpdateState::Idle => {
                let deployed = read_local_version(
                    &self.layout.version_file(&self.options.version_file),
                )
                .await;
                if deployed != guard.current_version && deployed != "0.0.0" {
                    info!(
                        "Deployed version changed outside the updater: {} -> {}",
                        guard.current_version, deployed
                    );
                    let mut next = guard.clone();
                    next.current_version = deployed;
                    next.updated_at = chrono::Utc::now();
                    self.store.write(&next).await?;
                    *guard = next;
                }
            }
            _ => {}
        }

        Ok(guard.clone())
    }

    /// The second half of `recover`: finish an apply or rollback that `repair`
    /// found in flight. Needs this process serving `/api/health`.
    pub async fn resume(&self, pending: UpdateStatus) -> Result<UpdateStatus, FrameError> {
        match pending.state {
            UpdateState::Applying => self.resume_apply(pending).await,
            UpdateState::Applied => self.resume_applied(pending).await,
            UpdateState::RollingBack => self.resume_rollback(pending).await,
            _ => Ok(pending),
        }
    }

    async fn resume_apply(&self, status: UpdateStatus) -> Result<UpdateStatus, FrameError> {
        let archive = status.download_path.clone();

        let Some(backup_id) = status.active_backup.clone() else {
            warn!("Apply was interrupted before the backup was taken");
            let result = self
                .transition(UpdateEvent::ApplyAborted(
                    "apply interrupted by a restart".to_string(),
                ))
                .await;
            if let Some(archive) = archive {
                discard_archive(&archive).await;
            }
            return result;
        };

        let backup = match self.executor.backups().load(&backup_id).await {
            Ok(backup) => backup,
            Err(e) => {
                error!("Backup {} of the interrupted apply is gone: {}", backup_id, e);
                self.transition(UpdateEvent::ApplyFailed(format!(
                    "apply interrupted and backup {} is unavailable",
                    backup_id
                )))
                .await?;
                return self
                    .transition(UpdateEvent::RestoreFailed(format!(
                        "backup {} is unavailable: {}",
                        backup_id, e
                    )))
                    .await;
            }
        };

        let target = status.target_version.clone().unwrap_or_default();
        info!("Resuming interrupted apply of {}", target);

        let result = if !target.is_empty() && self.executor.verify(&target).await {
            self.finalize_apply(backup).await
        } else {
            self.transition(UpdateEvent::ApplyFailed(format!(
                "apply of {} interrupted and not healthy after restart",
                target
            )))
            .await?;
            self.restore(backup).await
        };

        if let Some(archive) = archive {
            discard_archive(&archive).await;
        }
        result
    }

    async fn resume_applied(&self, status: UpdateStatus) -> Result<UpdateStatus, FrameError> {
        if let Some(id) = status.active_backup.as_deref() {
            match self.executor.backups().load(id).await {
                Ok(mut backup) => {
                    if let Err(e) = self.executor.mark_disposable(&mut backup).await {
                        warn!("Failed to mark backup {} disposable: {}", backup.id, e);
                    }
                }
                Err(e) => warn!("Backup {} not found: {}", id, e),
            }
        }
        if let Some(archive) = &status.download_path {
            discard_archive(archive).await;
        }
        self.transition(UpdateEvent::Adopted).await
    }

    async fn resume_rollback(&self, status: UpdateStatus) -> Result<UpdateStatus, FrameError> {
        let Some(backup_id) = status.active_backup.clone() else {
            return self
                .transition(UpdateEvent::RestoreFailed(
                    "rollback interrupted and no backup is recorded".to_string(),
                ))
                .await;
        };

        match self.executor.backups().load(&backup_id).await {
            Ok(backup) => {
                let deployed =
                    read_local_version(&self.layout.version_file(&self.options.version_file)).await;
                if deployed == backup.version {
                    // Restored tree already in place and running
                    info!("Rollback to {} already in place", backup.id);
                    return self.settle_restored(backup).await;
                }
                info!("Resuming interrupted rollback to {}", backup.id);
                self.restore(backup).await
            }
            Err(e) => {
                self.transition(UpdateEvent::RestoreFailed(format!(
                    "backup {} is unavailable: {}",
                    backup_id, e
                )))
                .await
            }
        }
    }
}

fn build_health_check(
    settings: &UpdateSettings,
    client: WebClient,
    local_port: u16,
) -> Result<Arc<dyn HealthCheck>, FrameError> {
    let interval = Duration::from_secs(settings.health_check.interval_secs.max(1));

    let check: Arc<dyn HealthCheck> = match settings.health_check.kind {
        HealthCheckKind::Http => {
            let url = settings
                .health_check
                .url
                .clone()
                .unwrap_or_else(|| format!("http://127.0.0.1:{}/api/health", local_port));
            Arc::new(HttpHealthCheck::new(client, url, interval))
        }
        HealthCheckKind::Command => match (&settings.health_check.command, &settings.service_name) {
            (Some(command), _) => Arc::new(
                CommandHealthCheck::new(command.clone(), interval).ok_or_else(|| {
                    FrameError::ConfigError("health_check.command is empty".to_string())
                })?,
            ),
            (None, Some(service)) => Arc::new(CommandHealthCheck::systemd(service, interval)),
            (None, None) => {
                return Err(FrameError::ConfigError(
                    "health_check.kind \"command\" needs a command or a service_name".to_string(),
                ))
            }
        },
        HealthCheckKind::None => Arc::new(AlwaysHealthy),
    };
    Ok(check)
}

async fn discard_archive(path: &Path) {
    if let Err(e) = File::new(path).delete().await {
        warn!("Failed to remove archive {}: {}", path.display(), e);
    }
}

async fn discard_other_archives(downloads: &Dir, keep: &Path) {
    let files: Vec<PathBuf> = match downloads.list_files().await {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to list {}: {}", downloads.path().display(), e);
            return;
        }
    };
    for path in files.into_iter().filter(|p| p != keep) {
        debug!("Removing stale archive {}", path.display());
        discard_archive(&path).await;
    }
}
