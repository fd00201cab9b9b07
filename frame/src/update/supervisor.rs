//! Service restart after a tree swap

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::FrameError;

/// Restarts whatever runs the deployed application
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Signal a restart. Returns once the signal is delivered, not once the
    /// service is back; the health check covers that.
    async fn restart(&self) -> Result<(), FrameError>;

    fn name(&self) -> &str;
}

/// `systemctl restart <service>`
pub struct SystemdSupervisor {
    service: String,
    use_sudo: bool,
}

impl SystemdSupervisor {
    pub fn new(service: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            service: service.into(),
            use_sudo,
        }
    }

    fn command(&self) -> Command {
        let mut command = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.args(["-n", "systemctl"]);
            c
        } else {
            Command::new("systemctl")
        };
        command.args(["restart", &self.service]);
        command
    }
}

#[async_trait]
impl ServiceSupervisor for SystemdSupervisor {
    async fn restart(&self) -> Result<(), FrameError> {
        info!("Restarting service {}", self.service);

        let output = self
            .command()
            .output()
            .await
            .map_err(|e| FrameError::Apply(format!("failed to run systemctl: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FrameError::Apply(format!(
                "systemctl restart {} failed ({}): {}",
                self.service,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "systemd"
    }
}

/// Exit this process after `delay` and let an external supervisor start it
/// again. An apply in flight resumes through startup recovery.
pub struct SelfRestart {
    delay: Duration,
}

impl SelfRestart {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SelfRestart {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl ServiceSupervisor for SelfRestart {
    async fn restart(&self) -> Result<(), FrameError> {
        schedule_exit(self.delay);
        Ok(())
    }

    fn name(&self) -> &str {
        "self"
    }
}

/// Exit the process with code 0 after `delay`
pub fn schedule_exit(delay: Duration) {
    warn!("Process exits in {:?} for restart", delay);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        std::process::exit(0);
    });
}

/// Nothing to restart (development, tests)
#[derive(Default)]
pub struct NoopSupervisor;

#[async_trait]
impl ServiceSupervisor for NoopSupervisor {
    async fn restart(&self) -> Result<(), FrameError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "none"
    }
}
