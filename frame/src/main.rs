//! aide-frame - Entry Point
//!
//! Serves a deployed application tree and keeps it current with its GitHub
//! repository.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use aide_frame::app::options::AppOptions;
use aide_frame::app::run::run;
use aide_frame::errors::FrameError;
use aide_frame::logs::{init_logging, LogLevel, LogOptions};
use aide_frame::storage::layout::StorageLayout;
use aide_frame::storage::settings::Settings;
use aide_frame::update::UpdateManager;
use aide_frame::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        return print_json(&version_info());
    }

    let layout = match cli_args.get("app-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let config_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| layout.config_file().path().to_path_buf());
    let search_paths = vec![layout.project_dir.clone(), layout.app_dir.clone()];
    let mut settings = match Settings::load(&config_path, &search_paths).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = apply_overrides(&mut settings, &cli_args) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // One-shot check
    if cli_args.contains_key("check") {
        return match check_once(&settings, layout).await {
            Ok(code) => code,
            Err(e) => {
                error!("Update check failed: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let service = settings
        .update
        .service_name
        .clone()
        .unwrap_or_else(|| "aide-frame".to_string());
    let options = AppOptions::new(service, settings, layout);

    info!("Running with options: {:?}", options);
    match run(options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run: {e}");
            ExitCode::FAILURE
        }
    }
}

fn apply_overrides(
    settings: &mut Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), FrameError> {
    if let Some(level) = cli_args.get("log-level") {
        settings.log_level = level.parse::<LogLevel>().map_err(FrameError::ConfigError)?;
    }
    if let Some(port) = cli_args.get("port") {
        settings.server.port = port
            .parse()
            .map_err(|_| FrameError::ConfigError(format!("Invalid port: {}", port)))?;
    }
    Ok(())
}

async fn check_once(settings: &Settings, layout: StorageLayout) -> Result<ExitCode, FrameError> {
    let manager = Arc::new(
        UpdateManager::from_settings(&settings.update, layout, settings.server.port).await?,
    );
    let status = manager.check().await?;
    Ok(print_json(&status))
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize output: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
