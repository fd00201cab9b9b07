//! Durable update status record

use tracing::{debug, warn};

use crate::errors::FrameError;
use crate::filesys::file::File;
use crate::models::status::UpdateStatus;

/// Reads and writes the single `UpdateStatus` record of a deployment
#[derive(Debug, Clone)]
pub struct StatusStore {
    file: File,
    bootstrap_version: String,
}

impl StatusStore {
    /// `bootstrap_version` seeds the record on first run
    pub fn new(file: File, bootstrap_version: impl Into<String>) -> Self {
        Self {
            file,
            bootstrap_version: bootstrap_version.into(),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Reconstruct the record from disk.
    ///
    /// A missing record yields a fresh idle one. An unreadable record is moved
    /// aside to `<name>.corrupt` and replaced by a fresh one.
    pub async fn read(&self) -> Result<UpdateStatus, FrameError> {
        if !self.file.exists().await {
            debug!("No status record at {}, starting fresh", self.file.path().display());
            return Ok(UpdateStatus::new(&self.bootstrap_version));
        }

        match self.file.read_json::<UpdateStatus>().await {
            Ok(status) => Ok(status),
            Err(FrameError::JsonError(e)) => {
                let mut corrupt = self.file.path().as_os_str().to_os_string();
                corrupt.push(".corrupt");
                warn!(
                    "Status record {} is unreadable ({}), moving it to {}",
                    self.file.path().display(),
                    e,
                    corrupt.to_string_lossy()
                );
                self.file.rename_to(&corrupt).await?;
                Ok(UpdateStatus::new(&self.bootstrap_version))
            }
            Err(e) => Err(FrameError::StorageError(format!(
                "failed to read {}: {}",
                self.file.path().display(),
                e
            ))),
        }
    }

    /// Persist the record atomically
    pub async fn write(&self, status: &UpdateStatus) -> Result<(), FrameError> {
        self.file.write_json(status).await.map_err(|e| {
            FrameError::StorageError(format!(
                "failed to write {}: {}",
                self.file.path().display(),
                e
            ))
        })
    }
}
