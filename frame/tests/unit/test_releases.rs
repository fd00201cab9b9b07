//! GitHub release source tests against a local stand-in for the API

use axum::{routing::get, Json, Router};
use serde_json::json;

use aide_frame::errors::FrameError;
use aide_frame::http::client::{FetchOptions, WebClient};
use aide_frame::http::releases::{GitHubReleases, ReleaseSource, SourceMode};

use crate::support::spawn_server;

async fn github() -> String {
    let releases = json!([
        {
            "tag_name": "v1.1",
            "target_commitish": "main",
            "published_at": "2025-01-01T00:00:00Z",
            "tarball_url": "https://example.com/tarball/v1.1",
            "assets": []
        },
        {
            "tag_name": "v1.3-beta",
            "prerelease": true,
            "published_at": "2025-03-01T00:00:00Z",
            "tarball_url": "https://example.com/tarball/v1.3-beta",
            "assets": []
        },
        {
            "tag_name": "v1.2",
            "published_at": "2025-02-01T00:00:00Z",
            "tarball_url": "https://example.com/tarball/v1.2",
            "assets": [
                {
                    "name": "aide-hello-1.2.tar.gz",
                    "browser_download_url": "https://example.com/aide-hello-1.2.tar.gz",
                    "size": 2048
                }
            ]
        },
        {
            "tag_name": "v2.0",
            "draft": true,
            "published_at": "2025-04-01T00:00:00Z",
            "tarball_url": "https://example.com/tarball/v2.0",
            "assets": []
        }
    ]);

    let router = Router::new()
        .route(
            "/repos/o/r/releases",
            get(move || {
                let releases = releases.clone();
                async move { Json(releases) }
            }),
        )
        .route(
            "/repos/o/r/commits/main",
            get(|| async {
                Json(json!({
                    "sha": "d4e5f6",
                    "commit": {"committer": {"date": "2025-02-03T04:05:06Z"}}
                }))
            }),
        )
        .route("/raw/o/r/main/app/VERSION", get(|| async { "v1.4\n" }));
    spawn_server(router).await
}

fn source(base: &str, mode: SourceMode) -> GitHubReleases {
    GitHubReleases::new(
        WebClient::new().unwrap(),
        base,
        format!("{}/raw", base),
        mode,
        FetchOptions::default(),
    )
}

#[tokio::test]
async fn test_list_releases_newest_first_without_drafts() {
    let base = github().await;
    let releases = source(&base, SourceMode::Releases)
        .list_releases("o/r")
        .await
        .unwrap();

    let versions: Vec<&str> = releases.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["1.3-beta", "1.2", "1.1"]);
}

#[tokio::test]
async fn test_resolve_latest_skips_prereleases() {
    let base = github().await;
    let release = source(&base, SourceMode::Releases)
        .resolve_target("o/r", "latest")
        .await
        .unwrap();

    assert_eq!(release.version, "1.2");
    assert_eq!(release.download_url, "https://example.com/aide-hello-1.2.tar.gz");
    assert_eq!(release.size_bytes, Some(2048));
}

#[tokio::test]
async fn test_resolve_specific_tag() {
    let base = github().await;
    let release = source(&base, SourceMode::Releases)
        .resolve_target("o/r", "1.1")
        .await
        .unwrap();
    assert_eq!(release.tag, "v1.1");

    let missing = source(&base, SourceMode::Releases)
        .resolve_target("o/r", "v9.9")
        .await;
    assert!(matches!(missing, Err(FrameError::RemoteUnavailable(_))));
}

#[tokio::test]
async fn test_resolve_branch_head() {
    let base = github().await;
    let mode = SourceMode::Branch {
        branch: "main".to_string(),
        version_path: "app/VERSION".to_string(),
    };
    let release = source(&base, mode).resolve_target("o/r", "main").await.unwrap();

    assert_eq!(release.version, "1.4");
    assert_eq!(release.tag, "main");
    assert_eq!(release.download_url, format!("{}/repos/o/r/tarball/main", base));
}

#[tokio::test]
async fn test_unknown_repo_is_remote_unavailable() {
    let base = github().await;
    let result = source(&base, SourceMode::Releases)
        .resolve_target("o/missing", "latest")
        .await;
    assert!(matches!(result, Err(FrameError::RemoteUnavailable(_))));
}
