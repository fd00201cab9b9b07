//! Remote release index (GitHub)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::errors::FrameError;
use crate::http::client::{FetchOptions, WebClient};
use crate::models::release::{normalize_version, ReleaseDescriptor};

/// Resolves what the latest or targeted release is
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Releases newest first. Fails with `RemoteUnavailable` when the index
    /// cannot be fetched or parsed.
    async fn list_releases(&self, repo: &str) -> Result<Vec<ReleaseDescriptor>, FrameError>;

    /// The release a branch or tag pointer refers to. `latest` selects the
    /// newest non-prerelease.
    async fn resolve_target(
        &self,
        repo: &str,
        pointer: &str,
    ) -> Result<ReleaseDescriptor, FrameError>;
}

/// Which flavor of the GitHub API is followed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMode {
    /// Published releases
    Releases,

    /// Head of a branch; the version is read from a file in the repository
    Branch {
        branch: String,
        version_path: String,
    },
}

#[derive(Debug, Deserialize)]
struct GhRelease {
    tag_name: String,
    #[serde(default)]
    target_commitish: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    tarball_url: Option<String>,
    #[serde(default)]
    assets: Vec<GhAsset>,
}

#[derive(Debug, Deserialize)]
struct GhAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GhCommit {
    sha: String,
    commit: GhCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GhCommitDetail {
    #[serde(default)]
    committer: Option<GhSignature>,
}

#[derive(Debug, Deserialize)]
struct GhSignature {
    date: DateTime<Utc>,
}

const ARCHIVE_SUFFIXES: [&str; 3] = [".tar.gz", ".tgz", ".zip"];

impl GhRelease {
    fn published(&self) -> DateTime<Utc> {
        self.published_at
            .or(self.created_at)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn matches(&self, pointer: &str) -> bool {
        self.tag_name == pointer
            || normalize_version(&self.tag_name) == normalize_version(pointer)
            || self.target_commitish.as_deref() == Some(pointer)
    }

    fn into_descriptor(self) -> Option<ReleaseDescriptor> {
        let published_at = self.published();
        let asset = self.assets.into_iter().find(|a| {
            let name = a.name.to_lowercase();
            ARCHIVE_SUFFIXES.iter().any(|s| name.ends_with(s))
        });

        let (download_url, size_bytes, asset_name) = match asset {
            Some(asset) => (asset.browser_download_url, asset.size, Some(asset.name)),
            None => (self.tarball_url?, None, None),
        };

        Some(ReleaseDescriptor {
            version: normalize_version(&self.tag_name),
            tag: self.tag_name,
            download_url,
            published_at,
            size_bytes,
            asset_name,
            prerelease: self.prerelease,
        })
    }
}

/// GitHub-hosted release index
pub struct GitHubReleases {
    client: WebClient,
    api_base_url: String,
    raw_base_url: String,
    mode: SourceMode,
    options: FetchOptions,
}

impl GitHubReleases {
    pub fn new(
        client: WebClient,
        api_base_url: impl Into<String>,
        raw_base_url: impl Into<String>,
        mode: SourceMode,
        options: FetchOptions,
    ) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into(),
            raw_base_url: raw_base_url.into(),
            mode,
            options,
        }
    }

    pub fn mode(&self) -> &SourceMode {
        &self.mode
    }

    async fn fetch_releases(&self, repo: &str) -> Result<Vec<GhRelease>, FrameError> {
        let (owner, name) = split_repo(repo)?;
        let mut url = endpoint(&self.api_base_url, &["repos", owner, name, "releases"])?;
        url.query_pairs_mut().append_pair("per_page", "30");

        let mut releases: Vec<GhRelease> = self
            .client
            .fetch_json(url.as_str(), self.options)
            .await
            .map_err(|e| unavailable(repo, e))?;

        releases.retain(|r| !r.draft);
        releases.sort_by_key(|r| std::cmp::Reverse(r.published()));
        debug!("Fetched {} releases for {}", releases.len(), repo);
        Ok(releases)
    }

    async fn branch_head(
        &self,
        repo: &str,
        branch: &str,
        version_path: &str,
    ) -> Result<ReleaseDescriptor, FrameError> {
        let (owner, name) = split_repo(repo)?;

        let mut raw_segments = vec![owner, name];
        raw_segments.extend(branch.split('/'));
        raw_segments.extend(version_path.split('/'));
        let version_url = endpoint(&self.raw_base_url, &raw_segments)?;
        let version = self
            .client
            .fetch_text(version_url.as_str(), self.options)
            .await
            .map_err(|e| unavailable(repo, e))?;
        let version = normalize_version(&version);
        if version.is_empty() {
            return Err(FrameError::RemoteUnavailable(format!(
                "{} on {} has an empty {}",
                repo, branch, version_path
            )));
        }

        let commit_url = endpoint(&self.api_base_url, &["repos", owner, name, "commits", branch])?;
        let commit: GhCommit = self
            .client
            .fetch_json(commit_url.as_str(), self.options)
            .await
            .map_err(|e| unavailable(repo, e))?;
        debug!("{} {} head is {}", repo, branch, commit.sha);

        let tarball_url = endpoint(&self.api_base_url, &["repos", owner, name, "tarball", branch])?;

        Ok(ReleaseDescriptor {
            version,
            tag: branch.to_string(),
            download_url: tarball_url.to_string(),
            published_at: commit
                .commit
                .committer
                .map(|c| c.date)
                .unwrap_or_else(Utc::now),
            size_bytes: None,
            asset_name: None,
            prerelease: false,
        })
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn list_releases(&self, repo: &str) -> Result<Vec<ReleaseDescriptor>, FrameError> {
        match &self.mode {
            SourceMode::Releases => Ok(self
                .fetch_releases(repo)
                .await?
                .into_iter()
                .filter_map(GhRelease::into_descriptor)
                .collect()),
            SourceMode::Branch {
                branch,
                version_path,
            } => Ok(vec![self.branch_head(repo, branch, version_path).await?]),
        }
    }

    async fn resolve_target(
        &self,
        repo: &str,
        pointer: &str,
    ) -> Result<ReleaseDescriptor, FrameError> {
        let releases = match &self.mode {
            SourceMode::Branch { version_path, .. } => {
                return self.branch_head(repo, pointer, version_path).await;
            }
            SourceMode::Releases => self.fetch_releases(repo).await?,
        };

        let latest = pointer.is_empty() || pointer.eq_ignore_ascii_case("latest");
        let selected = releases
            .into_iter()
            .filter(|r| if latest { !r.prerelease } else { r.matches(pointer) })
            .find_map(GhRelease::into_descriptor)
            .ok_or_else(|| {
                FrameError::RemoteUnavailable(format!(
                    "no release of {} matches '{}'",
                    repo, pointer
                ))
            })?;

        info!("Resolved {}@{} to version {}", repo, pointer, selected.version);
        Ok(selected)
    }
}

fn unavailable(repo: &str, err: FrameError) -> FrameError {
    FrameError::RemoteUnavailable(format!("{}: {}", repo, err))
}

/// Split "owner/name"
pub fn split_repo(repo: &str) -> Result<(&str, &str), FrameError> {
    match repo.trim().split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(FrameError::ConfigError(format!(
            "repository must be 'owner/name', got '{}'",
            repo
        ))),
    }
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url, FrameError> {
    let mut url = Url::parse(base)
        .map_err(|e| FrameError::ConfigError(format!("invalid base URL {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| FrameError::ConfigError(format!("base URL cannot hold a path: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
