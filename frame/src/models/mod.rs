//! Data model of the update core

pub mod release;
pub mod status;
