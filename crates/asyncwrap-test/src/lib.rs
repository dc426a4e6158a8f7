//! Helpers for testing the async wrappers.
//!
//! In every test, call [`setup`]. This will set up the logger so that all console output is
//! captured by the test runner.

use std::time::Duration;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `asyncwrap` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("asyncwrap=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Returns `value` after sleeping for `ms` milliseconds.
///
/// Use this to control the order in which concurrent futures settle.
pub async fn delayed<T>(ms: u64, value: T) -> T {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    value
}
