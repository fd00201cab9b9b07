//! Local HTTP server: health, version and the update API

pub mod handlers;
pub mod pages;
pub mod serve;
pub mod state;
