//! Storage layout configuration
//!
//! The deployed application lives in `app_dir`; its parent is the project
//! directory. Update bookkeeping sits in `<project_dir>/.update` so it survives
//! a swap of the deployment tree.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::errors::FrameError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for a deployment
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// The deployed application tree
    pub app_dir: PathBuf,

    /// Parent of `app_dir` (repository root, holds config.json)
    pub project_dir: PathBuf,

    registered: HashMap<String, PathBuf>,
}

impl StorageLayout {
    /// Create a layout rooted at the given app directory
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        let project_dir = app_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            app_dir,
            project_dir,
            registered: HashMap::new(),
        }
    }

    /// Create a layout whose update state lives somewhere other than the
    /// project directory
    pub fn with_project_dir(app_dir: impl Into<PathBuf>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            project_dir: project_dir.into(),
            registered: HashMap::new(),
        }
    }

    /// The deployment tree
    pub fn deployment_dir(&self) -> Dir {
        Dir::new(&self.app_dir)
    }

    /// Static assets served under `/static`
    pub fn static_dir(&self) -> Dir {
        Dir::new(self.app_dir.join("static"))
    }

    /// The VERSION file of the deployed tree
    pub fn version_file(&self, name: &str) -> File {
        File::new(self.app_dir.join(name))
    }

    /// Update state directory, outside the deployment tree
    pub fn state_dir(&self) -> Dir {
        Dir::new(self.project_dir.join(".update"))
    }

    /// The persisted update status record
    pub fn status_file(&self) -> File {
        self.state_dir().file("status.json")
    }

    /// Downloaded release archives
    pub fn downloads_dir(&self) -> Dir {
        self.state_dir().subdir("downloads")
    }

    /// Pre-apply backups of the deployment tree
    pub fn backups_dir(&self) -> Dir {
        self.state_dir().subdir("backups")
    }

    /// Extraction and restore staging area
    pub fn staging_dir(&self) -> Dir {
        self.state_dir().subdir("staging")
    }

    /// Default config file location
    pub fn config_file(&self) -> File {
        File::new(self.project_dir.join("config.json"))
    }

    /// Register an application-specific path
    pub fn register(&mut self, name: &str, path: impl Into<PathBuf>) {
        self.registered.insert(name.to_string(), path.into());
    }

    /// Look up a registered path
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.registered.get(name).map(PathBuf::as_path)
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), FrameError> {
        self.state_dir().create().await?;
        self.downloads_dir().create().await?;
        self.backups_dir().create().await?;
        self.staging_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let app_dir = cwd.join("app");
        if app_dir.is_dir() {
            Self::new(app_dir)
        } else {
            Self::with_project_dir(cwd.clone(), cwd)
        }
    }
}

/// Resolve a configured path against `base_dir`, rejecting `..` traversal
pub fn resolve_safe_path(path: &str, base_dir: &Path) -> Result<PathBuf, FrameError> {
    let candidate = Path::new(path);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(FrameError::PathSecurity(format!(
            "Path traversal '..' not allowed in path: {}",
            path
        )));
    }

    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    };

    Ok(resolved
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect())
}
