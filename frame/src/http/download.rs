//! Release archive download
//!
//! Archives are streamed to a request-scoped `.partial-<uuid>` file and only
//! renamed to their final name once complete and recognized. A final-named
//! archive is therefore always whole.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::FrameError;
use crate::filesys::dir::Dir;
use crate::filesys::file::{sync_dir, File};
use crate::http::client::{DownloadSummary, FetchOptions, WebClient};
use crate::models::release::ReleaseDescriptor;
use crate::update::archive::ArchiveFormat;
use crate::utils::sanitize_component;

const PARTIAL_PREFIX: &str = ".partial-";

/// A completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArchive {
    pub path: PathBuf,
    pub format: ArchiveFormat,
    pub bytes: u64,
    pub sha256: String,
}

/// Downloads release archives into a directory
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    client: WebClient,
    max_bytes: u64,
    timeout: Duration,
}

impl ArchiveFetcher {
    pub fn new(client: WebClient, max_bytes: u64, timeout: Duration) -> Self {
        Self {
            client,
            max_bytes,
            timeout,
        }
    }

    /// Download the archive of `release` into `dest_dir`
    pub async fn download(
        &self,
        release: &ReleaseDescriptor,
        dest_dir: &Path,
    ) -> Result<DownloadedArchive, FrameError> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let partial = File::new(dest_dir.join(format!("{}{}", PARTIAL_PREFIX, uuid::Uuid::new_v4())));
        info!(
            "Downloading {} ({}) to {}",
            release.version,
            release.download_url,
            partial.path().display()
        );

        match self.download_partial(release, &partial, dest_dir).await {
            Ok(archive) => {
                info!(
                    "Downloaded {} ({} bytes, sha256 {})",
                    archive.path.display(),
                    archive.bytes,
                    archive.sha256
                );
                Ok(archive)
            }
            Err(e) => {
                if let Err(cleanup) = partial.delete().await {
                    warn!("Failed to remove {}: {}", partial.path().display(), cleanup);
                }
                Err(e)
            }
        }
    }

    async fn download_partial(
        &self,
        release: &ReleaseDescriptor,
        partial: &File,
        dest_dir: &Path,
    ) -> Result<DownloadedArchive, FrameError> {
        let options = FetchOptions {
            timeout: self.timeout,
            max_bytes: self.max_bytes,
        };

        let mut file = tokio::fs::File::create(partial.path()).await?;
        let DownloadSummary { bytes, sha256 } = self
            .client
            .download_to(&release.download_url, &mut file, options)
            .await?;
        drop(file);

        if let Some(expected) = release.size_bytes {
            if expected != bytes {
                return Err(FrameError::Network(format!(
                    "incomplete download: expected {} bytes, got {}",
                    expected, bytes
                )));
            }
        }

        let format = ArchiveFormat::sniff(partial.path()).await?;
        let final_path = dest_dir.join(format!(
            "release-{}.{}",
            sanitize_component(&release.version),
            format.extension()
        ));
        partial.rename_to(&final_path).await?;
        sync_dir(dest_dir).await;

        Ok(DownloadedArchive {
            path: final_path,
            format,
            bytes,
            sha256,
        })
    }
}

/// Delete partial downloads left behind by an interrupted process
pub async fn discard_partials(dir: &Dir) -> Result<usize, FrameError> {
    if !dir.exists().await {
        return Ok(0);
    }

    let mut removed = 0;
    for path in dir.list_files().await? {
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(PARTIAL_PREFIX))
            .unwrap_or(false);
        if is_partial {
            debug!("Removing partial download {}", path.display());
            File::new(path).delete().await?;
            removed += 1;
        }
    }
    Ok(removed)
}
