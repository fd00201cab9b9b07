//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::FrameError;
use crate::filesys::file::{sync_dir, File};

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), FrameError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), FrameError> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List files in the directory
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, FrameError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }

    /// List subdirectories
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>, FrameError> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }

        dirs.sort();
        Ok(dirs)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Move the directory to a new path (same filesystem)
    pub async fn rename_to(&self, target: impl AsRef<Path>) -> Result<Dir, FrameError> {
        let target = target.as_ref();
        fs::rename(&self.path, target).await?;
        if let Some(parent) = target.parent() {
            sync_dir(parent).await;
        }
        Ok(Dir::new(target))
    }

    /// Recursively copy this directory to `target`, which must not exist.
    ///
    /// Symlinks are recreated as symlinks on unix and followed elsewhere.
    pub async fn copy_to(&self, target: impl AsRef<Path>) -> Result<Dir, FrameError> {
        let target = target.as_ref().to_path_buf();
        if fs::symlink_metadata(&target).await.is_ok() {
            return Err(FrameError::StorageError(format!(
                "copy target already exists: {}",
                target.display()
            )));
        }

        let mut stack = vec![(self.path.clone(), target.clone())];
        while let Some((src, dst)) = stack.pop() {
            fs::create_dir(&dst).await?;
            let permissions = fs::metadata(&src).await?.permissions();
            fs::set_permissions(&dst, permissions).await?;

            let mut entries = fs::read_dir(&src).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let from = entry.path();
                let to = dst.join(entry.file_name());

                if file_type.is_dir() {
                    stack.push((from, to));
                } else if file_type.is_symlink() {
                    copy_symlink(&from, &to).await?;
                } else {
                    fs::copy(&from, &to).await?;
                }
            }
        }

        Ok(Dir::new(target))
    }
}

#[cfg(unix)]
async fn copy_symlink(from: &Path, to: &Path) -> Result<(), FrameError> {
    let link = fs::read_link(from).await?;
    fs::symlink(link, to).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn copy_symlink(from: &Path, to: &Path) -> Result<(), FrameError> {
    fs::copy(from, to).await?;
    Ok(())
}
