//! Release archive readers.
//!
//! A downloaded archive is either a gzip'd tarball (GitHub source tarballs,
//! most release assets) or a zip. The format is chosen from the magic bytes,
//! never from the file name alone.

use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::errors::FrameError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Identify a format from the first bytes of a file
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(&GZIP_MAGIC) {
            Some(ArchiveFormat::TarGz)
        } else if header.starts_with(&ZIP_MAGIC) {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    /// Identify the format of a file on disk
    pub async fn sniff(path: &Path) -> Result<Self, FrameError> {
        use tokio::io::AsyncReadExt;

        let mut file = tokio::fs::File::open(path).await?;
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        Self::from_magic(&header[..filled]).ok_or_else(|| {
            FrameError::ArchiveError(format!("unrecognized archive format: {}", path.display()))
        })
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
        }
    }
}

/// Read access to a release archive
pub trait ArchiveReader: Send + Sync {
    /// Entry paths inside the archive
    fn list(&self) -> Result<Vec<PathBuf>, FrameError>;

    /// Unpack every entry below `dir`. Entries escaping `dir` are rejected.
    fn extract_to(&self, dir: &Path) -> Result<(), FrameError>;
}

/// `.tar.gz` archive
pub struct TarGzArchive {
    path: PathBuf,
}

impl TarGzArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<tar::Archive<GzDecoder<std::fs::File>>, FrameError> {
        let file = std::fs::File::open(&self.path)?;
        Ok(tar::Archive::new(GzDecoder::new(file)))
    }
}

impl ArchiveReader for TarGzArchive {
    fn list(&self) -> Result<Vec<PathBuf>, FrameError> {
        let mut archive = self.open()?;
        let mut paths = Vec::new();
        for entry in archive.entries().map_err(archive_err)? {
            let entry = entry.map_err(archive_err)?;
            paths.push(entry.path().map_err(archive_err)?.into_owned());
        }
        Ok(paths)
    }

    fn extract_to(&self, dir: &Path) -> Result<(), FrameError> {
        std::fs::create_dir_all(dir)?;
        let mut archive = self.open()?;
        archive.set_preserve_permissions(true);

        for entry in archive.entries().map_err(archive_err)? {
            let mut entry = entry.map_err(archive_err)?;
            let path = entry.path().map_err(archive_err)?.into_owned();
            // GitHub tarballs carry a pax global header with the commit id
            if entry.header().entry_type() == tar::EntryType::XGlobalHeader {
                continue;
            }
            if !entry.unpack_in(dir).map_err(archive_err)? {
                return Err(FrameError::ArchiveError(format!(
                    "entry escapes the extraction directory: {}",
                    path.display()
                )));
            }
        }

        debug!("Extracted {} into {}", self.path.display(), dir.display());
        Ok(())
    }
}

/// `.zip` archive
pub struct ZipArchive {
    path: PathBuf,
}

impl ZipArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<zip::ZipArchive<std::fs::File>, FrameError> {
        let file = std::fs::File::open(&self.path)?;
        zip::ZipArchive::new(file).map_err(|e| FrameError::ArchiveError(e.to_string()))
    }
}

impl ArchiveReader for ZipArchive {
    fn list(&self) -> Result<Vec<PathBuf>, FrameError> {
        let archive = self.open()?;
        Ok(archive.file_names().map(PathBuf::from).collect())
    }

    fn extract_to(&self, dir: &Path) -> Result<(), FrameError> {
        std::fs::create_dir_all(dir)?;
        let mut archive = self.open()?;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| FrameError::ArchiveError(e.to_string()))?;
            let relative = entry.enclosed_name().ok_or_else(|| {
                FrameError::ArchiveError(format!(
                    "entry escapes the extraction directory: {}",
                    entry.name()
                ))
            })?;
            let target = dir.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&target)?;
            std::io::copy(&mut entry, &mut out)?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }

        debug!("Extracted {} into {}", self.path.display(), dir.display());
        Ok(())
    }
}

/// Open an archive, choosing the reader by magic bytes
pub async fn open_archive(path: &Path) -> Result<Box<dyn ArchiveReader>, FrameError> {
    let reader: Box<dyn ArchiveReader> = match ArchiveFormat::sniff(path).await? {
        ArchiveFormat::TarGz => Box::new(TarGzArchive::new(path)),
        ArchiveFormat::Zip => Box::new(ZipArchive::new(path)),
    };
    Ok(reader)
}

/// The directory that holds the actual tree after extraction.
///
/// A single wrapping directory (as in `owner-repo-sha/`) is stripped, then
/// `subdir` is entered when present.
pub fn content_root(extracted: &Path, subdir: Option<&str>) -> Result<PathBuf, FrameError> {
    let mut root = extracted.to_path_buf();

    let entries: Vec<_> = std::fs::read_dir(&root)?.collect::<Result<_, _>>()?;
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        root = entries[0].path();
    }

    if let Some(subdir) = subdir.filter(|s| !s.is_empty()) {
        let candidate = root.join(subdir);
        if candidate.is_dir() {
            root = candidate;
        }
    }

    Ok(root)
}

fn archive_err(err: std::io::Error) -> FrameError {
    FrameError::ArchiveError(err.to_string())
}
