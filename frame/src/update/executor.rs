//! Apply/rollback executor
//!
//! Owns the deployment tree while an apply or rollback runs. The tree is only
//! ever replaced by a rename swap, so it is either the old tree or the new
//! one, plus a short window in which the path does not exist.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::errors::FrameError;
use crate::filesys::dir::Dir;
use crate::update::archive::{content_root, open_archive};
use crate::update::backup::{Backup, BackupStore};
use crate::update::health::HealthCheck;
use crate::update::supervisor::ServiceSupervisor;

/// Executor options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Directory inside the archive holding the deployment tree
    pub archive_subdir: Option<String>,

    /// Entries that must exist in the new tree
    pub required_files: Vec<String>,

    /// Upper bound for the post-restart health check
    pub health_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            archive_subdir: Some("app".to_string()),
            required_files: vec!["VERSION".to_string()],
            health_timeout: Duration::from_secs(60),
        }
    }
}

/// Performs the filesystem side of apply and rollback
pub struct ApplyExecutor {
    backups: BackupStore,
    staging: Dir,
    supervisor: Arc<dyn ServiceSupervisor>,
    health: Arc<dyn HealthCheck>,
    options: ExecutorOptions,
}

impl ApplyExecutor {
    pub fn new(
        backups: BackupStore,
        staging: Dir,
        supervisor: Arc<dyn ServiceSupervisor>,
        health: Arc<dyn HealthCheck>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            backups,
            staging,
            supervisor,
            health,
            options,
        }
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Step 1: snapshot the running tree
    pub async fn backup(&self, deployment: &Dir, version: &str) -> Result<Backup, FrameError> {
        self.backups
            .create(deployment, version)
            .await
            .map_err(|e| FrameError::Apply(format!("backup failed: {}", e)))
    }

    /// Steps 2-6: extract, validate, swap, restart, health check
    pub async fn install_and_verify(
        &self,
        archive: &Path,
        deployment: &Dir,
        target_version: &str,
    ) -> Result<(), FrameError> {
        self.install(archive, deployment).await?;
        self.restart_and_verify(target_version).await
    }

    async fn install(&self, archive: &Path, deployment: &Dir) -> Result<(), FrameError> {
        let work = self.staging.subdir(&uuid::Uuid::new_v4().to_string());
        let result = self.install_from(archive, deployment, &work).await;
        if let Err(e) = work.delete().await {
            warn!("Failed to clean staging {}: {}", work.path().display(), e);
        }
        result
    }

    async fn install_from(&self, archive: &Path, deployment: &Dir, work: &Dir) -> Result<(), FrameError> {
        let reader = open_archive(archive)
            .await
            .map_err(|e| FrameError::Apply(format!("unreadable archive: {}", e)))?;

        let extract_dir = work.path().to_path_buf();
        tokio::task::spawn_blocking(move || reader.extract_to(&extract_dir))
            .await?
            .map_err(|e| FrameError::Apply(format!("extraction failed: {}", e)))?;

        let root = content_root(work.path(), self.options.archive_subdir.as_deref())?;
        self.validate(&root)?;

        swap_into_place(&root, deployment.path())
            .await
            .map_err(|e| FrameError::Apply(format!("swap failed: {}", e)))?;

        info!("Installed {} into {}", archive.display(), deployment.path().display());
        Ok(())
    }

    fn validate(&self, root: &Path) -> Result<(), FrameError> {
        let missing: Vec<&str> = self
            .options
            .required_files
            .iter()
            .map(String::as_str)
            .filter(|f| !root.join(f).exists())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Apply(format!(
                "release is missing required entries: {}",
                missing.join(", ")
            )))
        }
    }

    async fn restart_and_verify(&self, target_version: &str) -> Result<(), FrameError> {
        self.supervisor.restart().await?;

        if self
            .health
            .check(target_version, self.options.health_timeout)
            .await
        {
            Ok(())
        } else {
            Err(FrameError::Apply(format!(
                "health check failed: version {} not healthy within {:?}",
                target_version, self.options.health_timeout
            )))
        }
    }

    /// Health check only, for an apply interrupted by a process restart
    pub async fn verify(&self, target_version: &str) -> bool {
        self.health
            .check(target_version, self.options.health_timeout)
            .await
    }

    /// Put the tree of `backup` back in place of `deployment`. Never retried.
    /// The service is not restarted; see `restart`.
    pub async fn restore(&self, backup: &Backup, deployment: &Dir) -> Result<(), FrameError> {
        info!("Restoring {} from backup {}", deployment.path().display(), backup.id);

        let work = self.staging.subdir(&format!("restore-{}", uuid::Uuid::new_v4()));
        let swapped = match Dir::new(&backup.path).copy_to(work.path()).await {
            Ok(copy) => swap_into_place(copy.path(), deployment.path()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = work.delete().await {
            warn!("Failed to clean staging {}: {}", work.path().display(), e);
        }

        swapped.map_err(|e| {
            error!("Rollback from backup {} failed: {}", backup.id, e);
            FrameError::Rollback(format!("restore from backup {} failed: {}", backup.id, e))
        })
    }

    /// Restart the service onto the restored tree. May end this process.
    pub async fn restart(&self) -> Result<(), FrameError> {
        self.supervisor
            .restart()
            .await
            .map_err(|e| FrameError::Rollback(format!("restart after restore failed: {}", e)))
    }

    /// The backup passed its update; it may now be pruned
    pub async fn mark_disposable(&self, backup: &mut Backup) -> Result<(), FrameError> {
        self.backups.mark_disposable(backup).await
    }

    /// Delete disposable backups beyond the newest `keep_latest`
    pub async fn prune_backups(&self, keep_latest: usize) -> Result<Vec<String>, FrameError> {
        self.backups.prune(keep_latest).await
    }
}

/// Replace `target` with `source` by renames. `target` is moved aside first
/// and moved back if `source` cannot take its place.
async fn swap_into_place(source: &Path, target: &Path) -> Result<(), FrameError> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "app".to_string());
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let previous: PathBuf = parent.join(format!(".{}.previous-{}", name, uuid::Uuid::new_v4()));

    let had_target = tokio::fs::symlink_metadata(target).await.is_ok();
    if had_target {
        tokio::fs::rename(target, &previous).await?;
    }

    if let Err(e) = tokio::fs::rename(source, target).await {
        if had_target {
            if let Err(undo) = tokio::fs::rename(&previous, target).await {
                error!(
                    "Could not move {} back to {}: {}",
                    previous.display(),
                    target.display(),
                    undo
                );
            }
        }
        return Err(e.into());
    }

    if had_target {
        if let Err(e) = Dir::new(&previous).delete().await {
            warn!("Failed to remove {}: {}", previous.display(), e);
        }
    }
    Ok(())
}
