//! Self-update: check, download, apply and roll back a GitHub release

pub mod archive;
pub mod backup;
pub mod executor;
pub mod fsm;
pub mod health;
pub mod manager;
pub mod supervisor;

pub use manager::UpdateManager;
