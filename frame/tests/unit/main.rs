//! Integration tests for aide-frame

mod support;

mod test_fsm;
mod test_manager;
mod test_releases;
