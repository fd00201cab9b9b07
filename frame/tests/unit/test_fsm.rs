//! FSM unit tests

use std::path::PathBuf;

use aide_frame::errors::FrameError;
use aide_frame::models::release::{ReleaseDescriptor, VersionComparison};
use aide_frame::models::status::{UpdateState, UpdateStatus};
use aide_frame::update::fsm::{FsmSettings, UpdateEvent, UpdateFsm};

fn release(version: &str) -> ReleaseDescriptor {
    ReleaseDescriptor {
        version: version.to_string(),
        tag: format!("v{}", version),
        download_url: format!("https://example.com/{}.tar.gz", version),
        published_at: chrono::Utc::now(),
        size_bytes: None,
        asset_name: None,
        prerelease: false,
    }
}

fn downloaded(fsm: &UpdateFsm) -> UpdateStatus {
    let mut status = UpdateStatus::new("1.0");
    fsm.process(&mut status, UpdateEvent::Check).unwrap();
    fsm.process(&mut status, UpdateEvent::NewerFound(release("1.2"))).unwrap();
    fsm.process(&mut status, UpdateEvent::Download).unwrap();
    fsm.process(
        &mut status,
        UpdateEvent::Downloaded {
            path: PathBuf::from("/tmp/release-1.2.tar.gz"),
            sha256: "abc".to_string(),
        },
    )
    .unwrap();
    status
}

#[test]
fn test_fsm_initial_state() {
    let status = UpdateStatus::new("1.0");
    assert_eq!(status.state, UpdateState::Idle);
    assert!(status.last_error.is_none());
    assert_eq!(status.failed_attempts, 0);
}

#[test]
fn test_fsm_update_success_flow() {
    let fsm = UpdateFsm::new(FsmSettings::default());
    let mut status = downloaded(&fsm);
    assert_eq!(status.state, UpdateState::Downloaded);
    assert_eq!(status.target_version.as_deref(), Some("1.2"));

    fsm.process(&mut status, UpdateEvent::Apply).unwrap();
    fsm.process(&mut status, UpdateEvent::BackupTaken("b1".to_string())).unwrap();
    assert_eq!(status.state, UpdateState::Applying);
    assert_eq!(status.active_backup.as_deref(), Some("b1"));

    fsm.process(&mut status, UpdateEvent::Applied).unwrap();
    assert_eq!(status.state, UpdateState::Applied);
    assert_eq!(status.current_version, "1.2");

    fsm.process(&mut status, UpdateEvent::Adopted).unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert!(status.target_version.is_none());
    assert!(status.download_path.is_none());
    assert!(status.active_backup.is_none());
}

#[test]
fn test_fsm_apply_failure_flow() {
    let fsm = UpdateFsm::new(FsmSettings::default());
    let mut status = downloaded(&fsm);

    fsm.process(&mut status, UpdateEvent::Apply).unwrap();
    fsm.process(&mut status, UpdateEvent::BackupTaken("b1".to_string())).unwrap();
    fsm.process(&mut status, UpdateEvent::ApplyFailed("unhealthy".to_string())).unwrap();
    assert_eq!(status.state, UpdateState::RollingBack);
    assert_eq!(status.failed_attempts, 1);

    fsm.process(
        &mut status,
        UpdateEvent::Restored {
            version: "1.0".to_string(),
        },
    )
    .unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.current_version, "1.0");
    assert_eq!(status.last_error.as_deref(), Some("unhealthy"));
    assert!(!status.degraded);
}

#[test]
fn test_fsm_check_outcomes() {
    let fsm = UpdateFsm::new(FsmSettings::default());
    let mut status = UpdateStatus::new("1.2");

    fsm.process(&mut status, UpdateEvent::Check).unwrap();
    fsm.process(&mut status, UpdateEvent::NoUpdate(VersionComparison::UpToDate)).unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.version_comparison, Some(VersionComparison::UpToDate));
    assert!(status.last_checked_at.is_some());

    fsm.process(&mut status, UpdateEvent::Check).unwrap();
    fsm.process(&mut status, UpdateEvent::CheckFailed("offline".to_string())).unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert_eq!(status.last_error.as_deref(), Some("offline"));
    assert_eq!(status.failed_attempts, 0);
}

#[test]
fn test_fsm_download_failure_returns_to_available() {
    let fsm = UpdateFsm::new(FsmSettings::default());
    let mut status = UpdateStatus::new("1.0");
    fsm.process(&mut status, UpdateEvent::Check).unwrap();
    fsm.process(&mut status, UpdateEvent::NewerFound(release("1.2"))).unwrap();
    fsm.process(&mut status, UpdateEvent::Download).unwrap();
    fsm.process(&mut status, UpdateEvent::DownloadFailed("reset".to_string())).unwrap();

    assert_eq!(status.state, UpdateState::UpdateAvailable);
    assert!(status.download_path.is_none());
    assert_eq!(status.target_version.as_deref(), Some("1.2"));
}

#[test]
fn test_fsm_invalid_transitions_conflict() {
    let fsm = UpdateFsm::new(FsmSettings::default());
    let mut status = UpdateStatus::new("1.0");

    assert!(matches!(
        fsm.process(&mut status, UpdateEvent::Download),
        Err(FrameError::Conflict(_))
    ));
    assert!(matches!(
        fsm.process(&mut status, UpdateEvent::Apply),
        Err(FrameError::Conflict(_))
    ));

    fsm.process(&mut status, UpdateEvent::Check).unwrap();
    let before = status.clone();
    assert!(matches!(
        fsm.process(&mut status, UpdateEvent::Check),
        Err(FrameError::Conflict(_))
    ));
    assert_eq!(status, before);
}

#[test]
fn test_fsm_disables_updates_after_max_failures() {
    let fsm = UpdateFsm::new(FsmSettings {
        max_failed_attempts: 2,
    });
    let mut status = UpdateStatus::new("1.0");

    for attempt in 1..=2 {
        let mut next = downloaded(&fsm);
        next.failed_attempts = status.failed_attempts;
        status = next;
        fsm.process(&mut status, UpdateEvent::Apply).unwrap();
        fsm.process(&mut status, UpdateEvent::ApplyFailed(format!("fail {}", attempt)))
            .unwrap();
        fsm.process(
            &mut status,
            UpdateEvent::Restored {
                version: "1.0".to_string(),
            },
        )
        .unwrap();
    }

    assert_eq!(status.failed_attempts, 2);
    assert!(status.updates_disabled);
    assert!(matches!(
        fsm.process(&mut status, UpdateEvent::Check),
        Err(FrameError::Conflict(_))
    ));

    fsm.process(&mut status, UpdateEvent::Enable).unwrap();
    assert!(!status.updates_disabled);
    assert_eq!(status.failed_attempts, 0);
    fsm.process(&mut status, UpdateEvent::Check).unwrap();
}

#[test]
fn test_fsm_restore_failure_degrades() {
    let fsm = UpdateFsm::new(FsmSettings::default());
    let mut status = UpdateStatus::new("1.0");

    fsm.process(&mut status, UpdateEvent::Rollback("b1".to_string())).unwrap();
    assert_eq!(status.state, UpdateState::RollingBack);

    fsm.process(&mut status, UpdateEvent::RestoreFailed("disk full".to_string())).unwrap();
    assert_eq!(status.state, UpdateState::Idle);
    assert!(status.degraded);
    assert!(status.updates_disabled);
}
