//! Periodic update check

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::FrameError;
use crate::update::UpdateManager;

/// Checker worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between checks
    pub interval: Duration,

    /// Initial delay before the first check
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_secs(30),
        }
    }
}

/// Run the checker worker until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    manager: &Arc<UpdateManager>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Update checker starting (every {:?})...", options.interval);

    let mut wait = options.initial_delay;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Update checker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }
        wait = options.interval;

        debug!("Checking for updates...");
        match manager.check().await {
            Ok(status) => {
                debug!("Check finished: {}", status.state);
            }
            Err(FrameError::Conflict(reason)) => {
                debug!("Skipping scheduled check: {}", reason);
            }
            Err(e) => {
                warn!("Scheduled check failed: {}", e);
            }
        }
    }
}
