//! Outbound HTTP: the request client and the GitHub release source

pub mod client;
pub mod download;
pub mod releases;
