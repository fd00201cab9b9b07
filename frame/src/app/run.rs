//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::FrameError;
use crate::models::status::UpdateStatus;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::update::supervisor::{SelfRestart, ServiceSupervisor, SystemdSupervisor};
use crate::update::UpdateManager;
use crate::workers::checker;

/// Run the application until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), FrameError> {
    info!("Initializing {}...", options.service);

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start {}: {}", options.service, e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), FrameError> {
    let app_state = Arc::new(AppState::init(options).await?);

    // Interrupted operations are reset before the first request can start one
    let pending = match &app_state.updates {
        Some(manager) => Some(manager.repair().await?),
        None => None,
    };

    init_socket_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe())
        .await?;

    if let (Some(manager), Some(pending)) = (app_state.updates.clone(), pending) {
        init_recovery(manager.clone(), pending, shutdown_manager)?;

        if options.settings.update.auto_check {
            init_checker_worker(options.checker(), manager, shutdown_manager, shutdown_tx.subscribe())?;
        }
    }

    Ok(())
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), FrameError> {
    info!("Initializing local HTTP server...");

    let settings = &options.settings;
    let restarter: Arc<dyn ServiceSupervisor> = match &settings.update.service_name {
        Some(service) => Arc::new(SystemdSupervisor::new(service, settings.update.use_sudo)),
        None => Arc::new(SelfRestart::default()),
    };

    let server_state = ServerState::new(
        app_state.service.clone(),
        app_state.app_version.clone(),
        app_state.platform,
        options.layout.static_dir().path(),
        app_state.updates.clone(),
        restarter,
    );

    let server_handle = serve(&settings.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)?;
    Ok(())
}

/// Finish an apply or rollback left by the previous process. Runs after the
/// server is up so an interrupted apply can health check this process.
fn init_recovery(
    manager: Arc<UpdateManager>,
    pending: UpdateStatus,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), FrameError> {
    let handle = tokio::spawn(async move {
        match manager.resume(pending).await {
            Ok(status) => info!("Update status after recovery: {}", status.state),
            Err(e) => error!("Update recovery failed: {}", e),
        }
    });

    shutdown_manager.with_recovery_handle(handle)
}

fn init_checker_worker(
    options: checker::Options,
    manager: Arc<UpdateManager>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), FrameError> {
    info!("Initializing update checker worker...");

    let checker_handle = tokio::spawn(async move {
        checker::run(
            &options,
            &manager,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_checker_worker_handle(checker_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    socket_server_handle: Option<JoinHandle<Result<(), FrameError>>>,
    recovery_handle: Option<JoinHandle<()>>,
    checker_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            socket_server_handle: None,
            recovery_handle: None,
            checker_worker_handle: None,
        }
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), FrameError>>,
    ) -> Result<(), FrameError> {
        if self.socket_server_handle.is_some() {
            return Err(FrameError::ShutdownError("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub fn with_recovery_handle(&mut self, handle: JoinHandle<()>) -> Result<(), FrameError> {
        if self.recovery_handle.is_some() {
            return Err(FrameError::ShutdownError("recovery_handle already set".to_string()));
        }
        self.recovery_handle = Some(handle);
        Ok(())
    }

    pub fn with_checker_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), FrameError> {
        if self.checker_worker_handle.is_some() {
            return Err(FrameError::ShutdownError("checker_handle already set".to_string()));
        }
        self.checker_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), FrameError> {
        info!("Shutting down...");

        // 1. Checker worker (an in-flight check finishes first)
        if let Some(handle) = self.checker_worker_handle.take() {
            handle.await.map_err(|e| FrameError::ShutdownError(e.to_string()))?;
        }

        // 2. Recovery
        if let Some(handle) = self.recovery_handle.take() {
            handle.await.map_err(|e| FrameError::ShutdownError(e.to_string()))?;
        }

        // 3. Socket server
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| FrameError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
