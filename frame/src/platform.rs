//! Platform detection

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Host platform the framework runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Raspi,
    Wsl2,
    Linux,
    MacOs,
    Windows,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Raspi => "raspi",
            Platform::Wsl2 => "wsl2",
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the platform of this host
pub fn detect() -> Platform {
    if cfg!(target_os = "macos") {
        return Platform::MacOs;
    }
    if cfg!(target_os = "windows") {
        return Platform::Windows;
    }
    if !cfg!(target_os = "linux") {
        return Platform::Unknown;
    }

    let model = read_proc(Path::new("/proc/device-tree/model"));
    let version = read_proc(Path::new("/proc/version"));
    classify_linux(model.as_deref(), version.as_deref())
}

fn read_proc(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Classify a Linux host from `/proc/device-tree/model` and `/proc/version`
pub fn classify_linux(model: Option<&str>, version: Option<&str>) -> Platform {
    if let Some(model) = model {
        if model.trim_matches('\0').to_lowercase().contains("raspberry pi") {
            return Platform::Raspi;
        }
    }
    if let Some(version) = version {
        let version = version.to_lowercase();
        if version.contains("microsoft") || version.contains("wsl") {
            return Platform::Wsl2;
        }
    }
    Platform::Linux
}
