//! aide-frame library
//!
//! Application framework for small server deployments: configuration,
//! logging, a local HTTP server, and remote self-update from GitHub
//! (check, download, apply with backup, rollback).

pub mod app;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod platform;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod update;
pub mod utils;
pub mod workers;
