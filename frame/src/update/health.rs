//! Post-restart health checks
//!
//! A check polls until the deployment reports healthy or the timeout passes.
//! `false` means the apply failed and the backup is restored.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::http::client::{FetchOptions, WebClient};
use crate::models::release::normalize_version;

/// Decides whether the restarted deployment is healthy
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, expected_version: &str, timeout: Duration) -> bool;
}

#[derive(Debug, Deserialize)]
struct HealthReport {
    #[serde(default)]
    version: Option<String>,
}

/// Polls an endpoint answering `{"version": "..."}` until the version matches
pub struct HttpHealthCheck {
    client: WebClient,
    url: String,
    interval: Duration,
}

impl HttpHealthCheck {
    pub fn new(client: WebClient, url: impl Into<String>, interval: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            interval,
        }
    }

    async fn probe(&self, expected: &str, remaining: Duration) -> bool {
        let options = FetchOptions {
            timeout: remaining.min(Duration::from_secs(5)),
            max_bytes: 64 * 1024,
        };

        match self.client.fetch_json::<HealthReport>(&self.url, options).await {
            Ok(HealthReport {
                version: Some(version),
            }) if normalize_version(&version) == expected => true,
            Ok(report) => {
                debug!("Health endpoint reports {:?}, want {}", report.version, expected);
                false
            }
            Err(e) => {
                debug!("Health probe of {} failed: {}", self.url, e);
                false
            }
        }
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, expected_version: &str, timeout: Duration) -> bool {
        let expected = normalize_version(expected_version);
        let deadline = Instant::now() + timeout;
        info!("Waiting up to {:?} for {} to report {}", timeout, self.url, expected);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if self.probe(&expected, remaining).await {
                info!("Health check passed");
                return true;
            }
            tokio::time::sleep(self.interval.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }

        warn!("Health check timed out after {:?}", timeout);
        false
    }
}

/// Polls a command until it exits 0, e.g. `systemctl is-active --quiet svc`.
/// The expected version is not verified.
pub struct CommandHealthCheck {
    program: String,
    args: Vec<String>,
    interval: Duration,
}

impl CommandHealthCheck {
    pub fn new(command: Vec<String>, interval: Duration) -> Option<Self> {
        let mut parts = command.into_iter();
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            interval,
        })
    }

    pub fn systemd(service: &str, interval: Duration) -> Self {
        Self {
            program: "systemctl".to_string(),
            args: vec![
                "is-active".to_string(),
                "--quiet".to_string(),
                service.to_string(),
            ],
            interval,
        }
    }

    async fn probe(&self) -> bool {
        match Command::new(&self.program).args(&self.args).status().await {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("Failed to run {}: {}", self.program, e);
                false
            }
        }
    }
}

#[async_trait]
impl HealthCheck for CommandHealthCheck {
    async fn check(&self, _expected_version: &str, timeout: Duration) -> bool {
        let polled = tokio::time::timeout(timeout, async {
            loop {
                if self.probe().await {
                    return;
                }
                tokio::time::sleep(self.interval).await;
            }
        })
        .await;

        match polled {
            Ok(()) => {
                info!("Health command {} succeeded", self.program);
                true
            }
            Err(_) => {
                warn!("Health command {} did not succeed within {:?}", self.program, timeout);
                false
            }
        }
    }
}

/// Trusts the restart
pub struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn check(&self, _expected_version: &str, _timeout: Duration) -> bool {
        true
    }
}
