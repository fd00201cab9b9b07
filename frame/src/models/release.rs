//! Release descriptors and version ordering

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate update, as published by the remote release index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Normalized version (tag without a leading `v`, or VERSION contents)
    pub version: String,

    /// Tag or branch the release was resolved from
    pub tag: String,

    pub download_url: String,

    pub published_at: DateTime<Utc>,

    /// Advertised archive size, when known
    #[serde(default)]
    pub size_bytes: Option<u64>,

    /// Name of the release asset, when the archive is an uploaded asset
    #[serde(default)]
    pub asset_name: Option<String>,

    #[serde(default)]
    pub prerelease: bool,
}

/// Outcome of comparing the running version with the remote one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionComparison {
    UpdateAvailable,
    UpToDate,
    LocalAhead,
}

/// Strip whitespace and a leading `v` / `V`
pub fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
        .to_string()
}

fn numeric_parts(version: &str) -> Option<Vec<u64>> {
    // "1.2.3-beta" compares on its numeric core
    let core = version.split(['-', '+']).next().unwrap_or(version);
    core.split('.').map(|p| p.parse::<u64>().ok()).collect()
}

/// Compare the local version with a remote one.
///
/// Dotted numeric versions compare component-wise (missing components are
/// zero). Anything else, e.g. commit hashes, only distinguishes equal from
/// different, and a different remote counts as newer.
pub fn compare_versions(local: &str, remote: &str) -> VersionComparison {
    let local = normalize_version(local);
    let remote = normalize_version(remote);

    match (numeric_parts(&local), numeric_parts(&remote)) {
        (Some(l), Some(r)) => {
            let len = l.len().max(r.len());
            let l = l.iter().copied().chain(std::iter::repeat(0)).take(len);
            let r = r.iter().copied().chain(std::iter::repeat(0)).take(len);
            match l.cmp(r) {
                Ordering::Less => VersionComparison::UpdateAvailable,
                Ordering::Equal => VersionComparison::UpToDate,
                Ordering::Greater => VersionComparison::LocalAhead,
            }
        }
        _ if local == remote => VersionComparison::UpToDate,
        _ => VersionComparison::UpdateAvailable,
    }
}
