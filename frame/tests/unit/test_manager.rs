//! Update manager scenarios against a local release server

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::{routing::get, Router};
use tempfile::TempDir;

use aide_frame::errors::FrameError;
use aide_frame::filesys::dir::Dir;
use aide_frame::filesys::file::File;
use aide_frame::http::client::WebClient;
use aide_frame::http::download::ArchiveFetcher;
use aide_frame::http::releases::ReleaseSource;
use aide_frame::models::release::{ReleaseDescriptor, VersionComparison};
use aide_frame::models::status::{UpdateState, UpdateStatus};
use aide_frame::storage::layout::StorageLayout;
use aide_frame::storage::status::StatusStore;
use aide_frame::update::backup::BackupStore;
use aide_frame::update::executor::{ApplyExecutor, ExecutorOptions};
use aide_frame::update::fsm::{FsmSettings, UpdateFsm};
use aide_frame::update::health::HealthCheck;
use aide_frame::update::manager::{ManagerOptions, ManagerParts};
use aide_frame::update::supervisor::{NoopSupervisor, ServiceSupervisor};
use aide_frame::update::UpdateManager;
use aide_frame::utils::CooldownOptions;

use crate::support::{deployment, snapshot, spawn_server, tar_gz};

// ================================= FIXTURES ===================================== //

/// Release index returning a fixed release after `failures` failed lookups
struct FakeSource {
    release: ReleaseDescriptor,
    delay: Duration,
    failures: usize,
    calls: AtomicUsize,
}

impl FakeSource {
    fn new(version: &str, download_url: String) -> Self {
        Self {
            release: ReleaseDescriptor {
                version: version.to_string(),
                tag: format!("v{}", version),
                download_url,
                published_at: chrono::Utc::now(),
                size_bytes: None,
                asset_name: None,
                prerelease: false,
            },
            delay: Duration::ZERO,
            failures: 0,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReleaseSource for FakeSource {
    async fn list_releases(&self, _repo: &str) -> Result<Vec<ReleaseDescriptor>, FrameError> {
        Ok(vec![self.release.clone()])
    }

    async fn resolve_target(
        &self,
        _repo: &str,
        _pointer: &str,
    ) -> Result<ReleaseDescriptor, FrameError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if call < self.failures {
            return Err(FrameError::RemoteUnavailable("index unreachable".to_string()));
        }
        Ok(self.release.clone())
    }
}

struct FixedHealth(bool);

#[async_trait]
impl HealthCheck for FixedHealth {
    async fn check(&self, _expected_version: &str, _timeout: Duration) -> bool {
        self.0
    }
}

/// Counts restarts; restarts from `hang_from` on never return, as when the
/// restart takes this process down with the service
struct CountingSupervisor {
    restarts: AtomicUsize,
    hang_from: usize,
}

impl CountingSupervisor {
    fn new(hang_from: usize) -> Arc<Self> {
        Arc::new(Self {
            restarts: AtomicUsize::new(0),
            hang_from,
        })
    }

    fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceSupervisor for CountingSupervisor {
    async fn restart(&self) -> Result<(), FrameError> {
        let call = self.restarts.fetch_add(1, Ordering::SeqCst);
        if call >= self.hang_from {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Fails every restart after the first
struct FailingSupervisor {
    restarts: AtomicUsize,
}

#[async_trait]
impl ServiceSupervisor for FailingSupervisor {
    async fn restart(&self) -> Result<(), FrameError> {
        if self.restarts.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(())
        } else {
            Err(FrameError::Apply("systemctl exited with 1".to_string()))
        }
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Removes every backup when asked to restart
struct BackupWiper {
    backups: PathBuf,
}

#[async_trait]
impl ServiceSupervisor for BackupWiper {
    async fn restart(&self) -> Result<(), FrameError> {
        Dir::new(&self.backups).delete().await
    }

    fn name(&self) -> &str {
        "wiper"
    }
}

struct Fixture {
    _tmp: TempDir,
    app: PathBuf,
    layout: StorageLayout,
    base: String,
}

impl Fixture {
    async fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let app = deployment(
            tmp.path(),
            &[
                ("VERSION", "1.0\n"),
                ("main.py", "print('1.0')\n"),
                ("static/app.css", "body {}\n"),
            ],
        );
        let layout = StorageLayout::new(&app);

        let archive = tar_gz(&[
            ("aide-hello-1.2/README.md", "hello\n"),
            ("aide-hello-1.2/app/VERSION", "1.2\n"),
            ("aide-hello-1.2/app/main.py", "print('1.2')\n"),
        ]);
        let slow_archive = archive.clone();
        let router = Router::new()
            .route(
                "/release.tar.gz",
                get(move || {
                    let archive = archive.clone();
                    async move { archive }
                }),
            )
            .route(
                "/slow.tar.gz",
                get(move || {
                    let archive = slow_archive.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        archive
                    }
                }),
            )
            .route(
                "/broken.tar.gz",
                get(|| async {
                    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                        Ok(Bytes::from(vec![0x1f, 0x8b, 0x08, 0x00])),
                        Ok(Bytes::from(vec![0u8; 4096])),
                        Err(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "connection dropped",
                        )),
                    ];
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            );
        let base = spawn_server(router).await;

        Self {
            _tmp: tmp,
            app,
            layout,
            base,
        }
    }

    fn source(&self, path: &str) -> FakeSource {
        FakeSource::new("1.2", format!("{}/{}", self.base, path))
    }

    async fn manager(&self, source: FakeSource, healthy: bool) -> Arc<UpdateManager> {
        self.manager_with(source, healthy, Arc::new(NoopSupervisor))
            .await
    }

    async fn manager_with(
        &self,
        source: FakeSource,
        healthy: bool,
        supervisor: Arc<dyn ServiceSupervisor>,
    ) -> Arc<UpdateManager> {
        let executor = ApplyExecutor::new(
            BackupStore::new(self.layout.backups_dir()),
            self.layout.staging_dir(),
            supervisor,
            Arc::new(FixedHealth(healthy)),
            ExecutorOptions::default(),
        );
        let parts = ManagerParts {
            layout: self.layout.clone(),
            source: Arc::new(source),
            fetcher: ArchiveFetcher::new(
                WebClient::new().unwrap(),
                10 * 1024 * 1024,
                Duration::from_secs(10),
            ),
            executor,
            fsm: UpdateFsm::new(FsmSettings::default()),
            options: ManagerOptions {
                repo: "aide-examples/aide-hello".to_string(),
                check_backoff: CooldownOptions {
                    base_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(50),
                    multiplier: 2.0,
                },
                ..ManagerOptions::default()
            },
        };
        Arc::new(UpdateManager::open(parts).await.unwrap())
    }

    async fn downloads(&self) -> Vec<PathBuf> {
        self.layout.downloads_dir().list_files().await.unwrap()
    }
}

async fn settle(manager: &UpdateManager) -> UpdateStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = manager.status().await;
            if !status.state.is_busy() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

// =================================== CHECK ====================================== //

#[tokio::test]
async fn test_check_finds_newer_release() {
    let fx = Fixture::new().await;
    let manager = fx.manager(fx.source("release.tar.gz"), true).await;

    let status = manager.check().await.unwrap();
    assert_eq!(status.state, UpdateState::UpdateAvailable);
    assert_eq!(status.current_version, "1.0");
    assert_eq!(status.target_version.as_deref(), Some("1.2"));
    assert!(status.last_checked_at.is_some());
}

#[tokio::test]
async fn test_repeated_check_is_idempotent() {
    let fx = Fixture::new().await;
    let mut source = fx.source("release.tar.gz");
    source.release.version = "1.0".to_string();
    let manager = fx.manager(source, true).await;

    let first = manager.check().await.unwrap();
    let second = manager.check().await.unwrap();

    for status in [&first, &second] {
        assert_eq!(status.state, UpdateState::Idle);
        assert_eq!(status.current_version, "1.0");
        assert_eq!(status.version_comparison, Some(VersionComparison::UpToDate));
        assert!(status.target_version.is_none());
        assert!(status.last_error.is_none());
    }
    assert!(fx.downloads().await.is_empty());
}

#[tokio::test]
async fn test_check_retries_transient_failures() {
    let fx = Fixture::new().await;
    let mut source = fx.source("release.tar.gz");
    source.failures = 2;
    let manager = fx.manager(source, true).await;

    let status = manager.check().await.unwrap();
    assert_eq!(status.state, UpdateState::UpdateAvailable);
}

#[tokio::test]
async fn test_check_failure_is_recorded() {
    let fx = Fixture::new().await;
    let mut source = fx.source("release.tar.gz");
    source.failures = 10;
    let manager = fx.manager(source, true).await;

    let status = manager.check().await.unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert!(status.last_error.unwrap().contains("index unreachable"));
}

#[tokio::test]
async fn test_concurrent_operations_conflict() {
    let fx = Fixture::new().await;
    let mut source = fx.source("slow.tar.gz");
    source.delay = Duration::from_millis(300);
    let manager = fx.manager(source, true).await;

    let (a, b) = tokio::join!(manager.check(), manager.check());
    let conflicts = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(FrameError::Conflict(_))))
        .count();
    assert_eq!(conflicts, 1);
    assert!(a.is_ok() || b.is_ok());

    manager.check().await.unwrap_err();
    let status = manager.start_download().await.unwrap();
    assert_eq!(status.state, UpdateState::Downloading);

    // The status stays readable while the download runs
    assert!(matches!(manager.check().await, Err(FrameError::Conflict(_))));
    assert!(matches!(manager.apply().await, Err(FrameError::Conflict(_))));
    assert!(matches!(manager.rollback().await, Err(FrameError::Conflict(_))));

    assert_eq!(settle(&manager).await.state, UpdateState::Downloaded);
}

#[tokio::test]
async fn test_start_check_returns_before_completion() {
    let fx = Fixture::new().await;
    let mut source = fx.source("release.tar.gz");
    source.delay = Duration::from_millis(300);
    let manager = fx.manager(source, true).await;

    let status = manager.start_check().await.unwrap();
    assert_eq!(status.state, UpdateState::Checking);
    assert_eq!(manager.status().await.state, UpdateState::Checking);

    assert_eq!(settle(&manager).await.state, UpdateState::UpdateAvailable);
}

#[tokio::test]
async fn test_dropped_check_still_completes() {
    let fx = Fixture::new().await;
    let mut source = fx.source("release.tar.gz");
    source.delay = Duration::from_millis(300);
    let manager = fx.manager(source, true).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(50), manager.check()).await;
    assert!(abandoned.is_err());

    let status = settle(&manager).await;
    assert_eq!(status.state, UpdateState::UpdateAvailable);
    assert_eq!(status.target_version.as_deref(), Some("1.2"));

    let status = manager.download().await.unwrap();
    assert_eq!(status.state, UpdateState::Downloaded);
}

// ================================== DOWNLOAD ===================================== //

#[tokio::test]
async fn test_download_stores_verified_archive() {
    let fx = Fixture::new().await;
    let manager = fx.manager(fx.source("release.tar.gz"), true).await;

    manager.check().await.unwrap();
    let status = manager.download().await.unwrap();

    assert_eq!(status.state, UpdateState::Downloaded);
    let path = status.download_path.unwrap();
    assert!(path.exists());
    assert_eq!(status.download_sha256.unwrap().len(), 64);
    assert_eq!(fx.downloads().await, vec![path]);
}

#[tokio::test]
async fn test_interrupted_download_leaves_no_archive() {
    let fx = Fixture::new().await;
    let manager = fx.manager(fx.source("broken.tar.gz"), true).await;

    manager.check().await.unwrap();
    let status = manager.download().await.unwrap();

    assert_eq!(status.state, UpdateState::UpdateAvailable);
    assert!(status.download_path.is_none());
    assert!(status.last_error.is_some());
    assert!(fx.downloads().await.is_empty());

    // Applying requires a completed download
    assert!(matches!(manager.apply().await, Err(FrameError::Conflict(_))));
}

#[tokio::test]
async fn test_dropped_download_still_completes() {
    let fx = Fixture::new().await;
    let manager = fx.manager(fx.source("slow.tar.gz"), true).await;

    manager.check().await.unwrap();
    let abandoned = tokio::time::timeout(Duration::from_millis(50), manager.download()).await;
    assert!(abandoned.is_err());

    let status = settle(&manager).await;
    assert_eq!(status.state, UpdateState::Downloaded);
    assert!(status.download_path.unwrap().exists());

    let status = manager.check().await;
    assert!(matches!(status, Err(FrameError::Conflict(_))));
}

// ==================================== APPLY ====================================== //

#[tokio::test]
async fn test_apply_success_adopts_new_version() {
    let fx = Fixture::new().await;
    let manager = fx.manager(fx.source("release.tar.gz"), true).await;

    manager.check().await.unwrap();
    manager.download().await.unwrap();
    let status = manager.apply().await.unwrap();

    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.2");
    assert!(status.last_error.is_none());
    assert!(status.target_version.is_none());
    assert_eq!(
        std::fs::read_to_string(fx.app.join("VERSION")).unwrap(),
        "1.2\n"
    );
    assert!(!fx.app.join("static").exists());
    assert!(fx.downloads().await.is_empty());

    let backup = manager.latest_backup().await.unwrap();
    assert_eq!(backup.version, "1.0");
    assert!(backup.disposable);
    assert_eq!(
        std::fs::read_to_string(backup.path.join("VERSION")).unwrap(),
        "1.0\n"
    );

    // The record on disk matches
    let persisted = StatusStore::new(fx.layout.status_file(), "0.0.0")
        .read()
        .await
        .unwrap();
    assert_eq!(persisted, status);
}

#[tokio::test]
async fn test_failed_health_check_restores_tree() {
    let fx = Fixture::new().await;
    let before = snapshot(&fx.app);
    let manager = fx.manager(fx.source("release.tar.gz"), false).await;

    manager.check().await.unwrap();
    manager.download().await.unwrap();
    let status = manager.apply().await.unwrap();

    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.0");
    assert!(status.last_error.unwrap().contains("health check failed"));
    assert_eq!(status.failed_attempts, 1);
    assert!(!status.degraded);
    assert_eq!(snapshot(&fx.app), before);
    assert!(fx.downloads().await.is_empty());
}

#[tokio::test]
async fn test_manual_rollback_restores_previous_version() {
    let fx = Fixture::new().await;
    let before = snapshot(&fx.app);
    let manager = fx.manager(fx.source("release.tar.gz"), true).await;

    assert!(matches!(manager.rollback().await, Err(FrameError::Conflict(_))));
    assert!(!manager.can_rollback().await);

    manager.check().await.unwrap();
    manager.download().await.unwrap();
    manager.apply().await.unwrap();
    assert!(manager.can_rollback().await);

    let status = manager.rollback().await.unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.0");
    assert_eq!(snapshot(&fx.app), before);
    assert!(fx.layout.staging_dir().list_dirs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rollback_recorded_before_restart() {
    let fx = Fixture::new().await;
    let before = snapshot(&fx.app);
    let supervisor = CountingSupervisor::new(1);
    let manager = fx
        .manager_with(fx.source("release.tar.gz"), false, supervisor.clone())
        .await;

    manager.check().await.unwrap();
    manager.download().await.unwrap();
    manager.start_apply().await.unwrap();

    // The restart onto the restored tree never returns
    let status = settle(&manager).await;
    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.0");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(supervisor.restarts(), 2);
    assert_eq!(snapshot(&fx.app), before);

    let persisted = StatusStore::new(fx.layout.status_file(), "0.0.0")
        .read()
        .await
        .unwrap();
    assert_eq!(persisted.state, UpdateState::Idle);
    assert_eq!(persisted.current_version, "1.0");

    // Next boots settle without restarting again
    for _ in 0..3 {
        let rebooted = CountingSupervisor::new(0);
        let manager = fx
            .manager_with(fx.source("release.tar.gz"), false, rebooted.clone())
            .await;
        let status = manager.recover().await.unwrap();
        assert_eq!(status.state, UpdateState::Idle);
        assert_eq!(status.current_version, "1.0");
        assert_eq!(rebooted.restarts(), 0);
    }
}

#[tokio::test]
async fn test_restart_failure_after_restore_degrades() {
    let fx = Fixture::new().await;
    let before = snapshot(&fx.app);
    let supervisor = Arc::new(FailingSupervisor {
        restarts: AtomicUsize::new(0),
    });
    let manager = fx
        .manager_with(fx.source("release.tar.gz"), false, supervisor)
        .await;

    manager.check().await.unwrap();
    manager.download().await.unwrap();
    let status = manager.apply().await.unwrap();

    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.0");
    assert!(status.degraded);
    assert!(status.updates_disabled);
    assert!(status.last_error.unwrap().contains("restart after restore failed"));
    assert_eq!(snapshot(&fx.app), before);
    assert!(matches!(manager.check().await, Err(FrameError::Conflict(_))));

    let status = manager.enable().await.unwrap();
    assert!(!status.degraded);
    assert!(!status.updates_disabled);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_failed_restore_degrades_until_enabled() {
    let fx = Fixture::new().await;
    let supervisor = Arc::new(BackupWiper {
        backups: fx.layout.backups_dir().path().to_path_buf(),
    });
    let manager = fx
        .manager_with(fx.source("release.tar.gz"), false, supervisor)
        .await;

    manager.check().await.unwrap();
    manager.download().await.unwrap();
    let status = manager.apply().await.unwrap();

    assert_eq!(status.state, UpdateState::Idle);
    assert!(status.degraded);
    assert!(status.updates_disabled);
    assert!(status.last_error.unwrap().contains("restore from backup"));
    assert!(matches!(manager.rollback().await, Err(FrameError::Conflict(_))));

    let persisted = StatusStore::new(fx.layout.status_file(), "0.0.0")
        .read()
        .await
        .unwrap();
    assert!(persisted.degraded);

    let status = manager.enable().await.unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert!(!status.degraded);
    assert!(!status.updates_disabled);
    assert!(status.last_error.is_none());
    assert_eq!(status.failed_attempts, 0);
}

// ================================== RECOVERY ===================================== //

async fn write_status(fx: &Fixture, status: &UpdateStatus) {
    StatusStore::new(fx.layout.status_file(), "1.0")
        .write(status)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recover_resets_interrupted_download() {
    let fx = Fixture::new().await;
    let mut status = UpdateStatus::new("1.0");
    status.state = UpdateState::Downloading;
    status.target_version = Some("1.2".to_string());
    write_status(&fx, &status).await;

    let partial = fx.layout.downloads_dir().file(".partial-1234");
    partial.write_atomic(b"half").await.unwrap();

    let manager = fx.manager(fx.source("release.tar.gz"), true).await;
    let status = manager.recover().await.unwrap();

    assert_eq!(status.state, UpdateState::UpdateAvailable);
    assert_eq!(status.target_version.as_deref(), Some("1.2"));
    assert!(!partial.exists().await);
}

#[tokio::test]
async fn test_recover_forgets_missing_archive() {
    let fx = Fixture::new().await;
    let mut status = UpdateStatus::new("1.0");
    status.state = UpdateState::Downloaded;
    status.target_version = Some("1.2".to_string());
    status.download_path = Some(fx.layout.downloads_dir().path().join("release-1.2.tar.gz"));
    write_status(&fx, &status).await;

    let manager = fx.manager(fx.source("release.tar.gz"), true).await;
    let status = manager.recover().await.unwrap();

    assert_eq!(status.state, UpdateState::UpdateAvailable);
    assert!(status.download_path.is_none());
}

#[tokio::test]
async fn test_recover_completes_interrupted_apply() {
    let fx = Fixture::new().await;
    let backups = BackupStore::new(fx.layout.backups_dir());
    let backup = backups.create(&Dir::new(&fx.app), "1.0").await.unwrap();

    // The new tree was swapped in before the process went down
    std::fs::write(fx.app.join("VERSION"), "1.2\n").unwrap();

    let mut status = UpdateStatus::new("1.0");
    status.state = UpdateState::Applying;
    status.target_version = Some("1.2".to_string());
    status.active_backup = Some(backup.id.clone());
    write_status(&fx, &status).await;

    let manager = fx.manager(fx.source("release.tar.gz"), true).await;
    let status = manager.recover().await.unwrap();

    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.2");
    assert!(status.active_backup.is_none());
    assert!(backups.load(&backup.id).await.unwrap().disposable);
}

#[tokio::test]
async fn test_recover_rolls_back_unhealthy_apply() {
    let fx = Fixture::new().await;
    let before = snapshot(&fx.app);
    let backups = BackupStore::new(fx.layout.backups_dir());
    let backup = backups.create(&Dir::new(&fx.app), "1.0").await.unwrap();

    std::fs::write(fx.app.join("VERSION"), "1.2\n").unwrap();
    File::new(fx.app.join("main.py")).delete().await.unwrap();

    let mut status = UpdateStatus::new("1.0");
    status.state = UpdateState::Applying;
    status.target_version = Some("1.2".to_string());
    status.active_backup = Some(backup.id.clone());
    write_status(&fx, &status).await;

    let manager = fx.manager(fx.source("release.tar.gz"), false).await;
    let status = manager.recover().await.unwrap();

    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.0");
    assert_eq!(status.failed_attempts, 1);
    assert_eq!(snapshot(&fx.app), before);
}

#[tokio::test]
async fn test_recover_settles_rollback_already_in_place() {
    let fx = Fixture::new().await;
    let before = snapshot(&fx.app);
    let backups = BackupStore::new(fx.layout.backups_dir());
    let backup = backups.create(&Dir::new(&fx.app), "1.0").await.unwrap();

    let mut status = UpdateStatus::new("1.2");
    status.state = UpdateState::RollingBack;
    status.active_backup = Some(backup.id.clone());
    write_status(&fx, &status).await;

    let supervisor = CountingSupervisor::new(0);
    let manager = fx
        .manager_with(fx.source("release.tar.gz"), true, supervisor.clone())
        .await;
    let status = manager.recover().await.unwrap();

    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.0");
    assert_eq!(supervisor.restarts(), 0);
    assert_eq!(snapshot(&fx.app), before);
}

#[tokio::test]
async fn test_repair_runs_before_resume() {
    let fx = Fixture::new().await;
    let mut status = UpdateStatus::new("1.0");
    status.state = UpdateState::Checking;
    write_status(&fx, &status).await;

    let manager = fx.manager(fx.source("release.tar.gz"), true).await;
    let pending = manager.repair().await.unwrap();
    assert_eq!(pending.state, UpdateState::Idle);

    // A request served between the two halves is not treated as interrupted
    manager.check().await.unwrap();
    let status = manager.resume(pending).await.unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(manager.status().await.state, UpdateState::UpdateAvailable);
}
