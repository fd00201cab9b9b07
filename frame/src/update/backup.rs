//! Pre-apply snapshots of the deployment tree

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::FrameError;
use crate::filesys::dir::Dir;
use crate::utils::sanitize_component;

/// A retained copy of the deployment tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,

    /// Version the tree was running when the backup was taken
    pub version: String,

    pub created_at: DateTime<Utc>,

    /// The update that replaced this tree passed its health check
    #[serde(default)]
    pub disposable: bool,

    #[serde(skip)]
    pub path: PathBuf,
}

/// Backups live as `<dir>/<id>/` with metadata in `<dir>/<id>.json`
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: Dir,
}

impl BackupStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    /// Copy `source` into a new backup. The backup only becomes visible once
    /// the copy is complete.
    pub async fn create(&self, source: &Dir, version: &str) -> Result<Backup, FrameError> {
        self.dir.create().await?;

        let created_at = Utc::now();
        let id = format!(
            "{}-{}",
            created_at.format("%Y%m%dT%H%M%S%3fZ"),
            sanitize_component(version)
        );
        let temp = self.dir.subdir(&format!(".tmp-{}", uuid::Uuid::new_v4()));

        if let Err(e) = source.copy_to(temp.path()).await {
            if let Err(cleanup) = temp.delete().await {
                warn!("Failed to remove {}: {}", temp.path().display(), cleanup);
            }
            return Err(e);
        }
        let final_dir = temp.rename_to(self.dir.path().join(&id)).await?;

        let backup = Backup {
            id: id.clone(),
            version: version.to_string(),
            created_at,
            disposable: false,
            path: final_dir.path().to_path_buf(),
        };
        self.save(&backup).await?;

        info!("Backed up {} (version {}) as {}", source.path().display(), version, id);
        Ok(backup)
    }

    async fn save(&self, backup: &Backup) -> Result<(), FrameError> {
        self.dir.file(&format!("{}.json", backup.id)).write_json(backup).await
    }

    /// Load a backup by id
    pub async fn load(&self, id: &str) -> Result<Backup, FrameError> {
        let meta = self.dir.file(&format!("{}.json", id));
        if !meta.exists().await {
            return Err(FrameError::NotFound(format!("backup {}", id)));
        }
        let mut backup: Backup = meta.read_json().await?;
        backup.path = self.dir.path().join(&backup.id);
        if !Dir::new(&backup.path).exists().await {
            return Err(FrameError::NotFound(format!("backup tree {}", backup.path.display())));
        }
        Ok(backup)
    }

    /// All complete backups, newest first
    pub async fn list(&self) -> Result<Vec<Backup>, FrameError> {
        if !self.dir.exists().await {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for path in self.dir.list_files().await? {
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            match self.load(id).await {
                Ok(backup) => backups.push(backup),
                Err(e) => warn!("Skipping backup {}: {}", id, e),
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(backups)
    }

    /// The newest backup, if any
    pub async fn latest(&self) -> Result<Option<Backup>, FrameError> {
        Ok(self.list().await?.into_iter().next())
    }

    pub async fn mark_disposable(&self, backup: &mut Backup) -> Result<(), FrameError> {
        backup.disposable = true;
        self.save(backup).await
    }

    /// Delete disposable backups beyond the newest `keep_latest`
    pub async fn prune(&self, keep_latest: usize) -> Result<Vec<String>, FrameError> {
        let mut removed = Vec::new();
        for backup in self.list().await?.into_iter().skip(keep_latest) {
            if !backup.disposable {
                continue;
            }
            self.remove(&backup).await?;
            removed.push(backup.id);
        }
        if !removed.is_empty() {
            info!("Pruned {} old backup(s)", removed.len());
        }
        Ok(removed)
    }

    async fn remove(&self, backup: &Backup) -> Result<(), FrameError> {
        // Metadata first: a tree without metadata is ignored by `list`
        self.dir.file(&format!("{}.json", backup.id)).delete().await?;
        Dir::new(&backup.path).delete().await
    }

    /// Remove copies left behind by an interrupted `create`: temp copies and
    /// trees whose metadata was never written
    pub async fn discard_incomplete(&self) -> Result<(), FrameError> {
        if !self.dir.exists().await {
            return Ok(());
        }
        for path in self.dir.list_dirs().await? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let incomplete = name.starts_with(".tmp-")
                || !self.dir.file(&format!("{}.json", name)).exists().await;
            if incomplete {
                debug!("Removing incomplete backup {}", path.display());
                Dir::new(&path).delete().await?;
            }
        }
        Ok(())
    }
}
