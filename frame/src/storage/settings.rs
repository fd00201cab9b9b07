//! Settings file management
//!
//! Configuration is JSON merged over defaults: objects merge key by key,
//! every other value in the file replaces the default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::FrameError;
use crate::logs::LogLevel;

/// Framework settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Remote update configuration
    #[serde(default)]
    pub update: UpdateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            json_logs: false,
            server: ServerSettings::default(),
            update: UpdateSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (or the first match in `search_paths`),
    /// merged over the built-in defaults
    pub async fn load(path: &Path, search_paths: &[PathBuf]) -> Result<Self, FrameError> {
        let defaults = serde_json::to_value(Settings::default())?;
        let merged = load_config(path, search_paths, defaults).await?;
        serde_json::from_value(merged).map_err(|e| FrameError::ConfigError(e.to_string()))
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Remote update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Expose the update routes and run the checker
    #[serde(default)]
    pub enabled: bool,

    /// GitHub repository, e.g. "aide-examples/aide-hello"
    #[serde(default)]
    pub github_repo: String,

    /// Branch followed when `use_releases` is false
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Track GitHub releases instead of a branch head
    #[serde(default = "default_true")]
    pub use_releases: bool,

    /// Release pointer: "latest" or a specific tag
    #[serde(default = "default_release_tag")]
    pub release_tag: String,

    /// Version file name inside the deployment tree
    #[serde(default = "default_version_file")]
    pub version_file: String,

    /// Service restarted after apply / rollback (systemd unit)
    #[serde(default)]
    pub service_name: Option<String>,

    /// Prefix `systemctl` with `sudo -n`
    #[serde(default)]
    pub use_sudo: bool,

    /// Periodically check for updates in the background
    #[serde(default)]
    pub auto_check: bool,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Attempts per check for transient network failures
    #[serde(default = "default_check_retries")]
    pub check_retries: u32,

    /// Backups retained after successful updates
    #[serde(default = "default_keep_backups")]
    pub keep_backups: usize,

    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Timeout for index/manifest requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Directory inside the archive holding the deployment tree
    #[serde(default = "default_archive_subdir")]
    pub archive_subdir: Option<String>,

    /// Entries that must exist in an extracted release
    #[serde(default = "default_required_files")]
    pub required_files: Vec<String>,

    /// Consecutive failed applies before updates are disabled
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    #[serde(default)]
    pub health_check: HealthCheckSettings,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_raw_base_url")]
    pub raw_base_url: String,
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_release_tag() -> String {
    "latest".to_string()
}

fn default_version_file() -> String {
    "VERSION".to_string()
}

fn default_check_interval() -> u64 {
    3600
}

fn default_check_retries() -> u32 {
    3
}

fn default_keep_backups() -> usize {
    3
}

fn default_max_download_bytes() -> u64 {
    200 * 1024 * 1024
}

fn default_download_timeout() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

fn default_archive_subdir() -> Option<String> {
    Some("app".to_string())
}

fn default_required_files() -> Vec<String> {
    vec!["VERSION".to_string()]
}

fn default_max_failed_attempts() -> u32 {
    3
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_raw_base_url() -> String {
    "https://raw.githubusercontent.com".to_string()
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            github_repo: String::new(),
            branch: default_branch(),
            use_releases: true,
            release_tag: default_release_tag(),
            version_file: default_version_file(),
            service_name: None,
            use_sudo: false,
            auto_check: false,
            check_interval_secs: default_check_interval(),
            check_retries: default_check_retries(),
            keep_backups: default_keep_backups(),
            max_download_bytes: default_max_download_bytes(),
            download_timeout_secs: default_download_timeout(),
            request_timeout_secs: default_request_timeout(),
            archive_subdir: default_archive_subdir(),
            required_files: default_required_files(),
            max_failed_attempts: default_max_failed_attempts(),
            health_check: HealthCheckSettings::default(),
            api_base_url: default_api_base_url(),
            raw_base_url: default_raw_base_url(),
        }
    }
}

impl UpdateSettings {
    /// The release pointer resolved on every check
    pub fn target_pointer(&self) -> &str {
        if self.use_releases {
            &self.release_tag
        } else {
            &self.branch
        }
    }
}

/// How a freshly applied version is judged healthy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    /// Poll an HTTP endpoint reporting the running version
    #[default]
    Http,
    /// Poll a command until it exits 0
    Command,
    /// Trust the restart
    None,
}

/// Post-apply health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    #[serde(default)]
    pub kind: HealthCheckKind,

    /// Endpoint for `http`; defaults to this server's `/api/health`
    #[serde(default)]
    pub url: Option<String>,

    /// Program and arguments for `command`; defaults to
    /// `systemctl is-active --quiet <service_name>`
    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

fn default_health_timeout() -> u64 {
    60
}

fn default_health_interval() -> u64 {
    2
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::Http,
            url: None,
            command: None,
            timeout_secs: default_health_timeout(),
            interval_secs: default_health_interval(),
        }
    }
}

/// Load a JSON config file merged over `defaults`.
///
/// `path` is tried first, then `<search_path>/<file name>` for each search
/// path. A missing file yields the defaults unchanged.
pub async fn load_config(
    path: &Path,
    search_paths: &[PathBuf],
    defaults: Value,
) -> Result<Value, FrameError> {
    let file_name = path.file_name().map(|n| n.to_os_string());
    let mut candidates = vec![path.to_path_buf()];
    if let Some(name) = file_name {
        candidates.extend(search_paths.iter().map(|dir| dir.join(&name)));
    }

    for candidate in candidates {
        match tokio::fs::read_to_string(&candidate).await {
            Ok(contents) => {
                let loaded: Value = serde_json::from_str(&contents).map_err(|e| {
                    FrameError::ConfigError(format!("{}: {}", candidate.display(), e))
                })?;
                info!("Loaded config from {}", candidate.display());
                let mut merged = defaults;
                deep_merge(&mut merged, loaded);
                return Ok(merged);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config not found at {}", candidate.display());
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("No config file found, using defaults");
    Ok(defaults)
}

/// Merge `overlay` into `base`: objects recursively, other values replace
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
