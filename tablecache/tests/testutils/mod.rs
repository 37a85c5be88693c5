//! Test utilities for tablecache integration tests
//!
//! - rows: fixture row types over a small task-tracker schema
//! - cache_fixture: a registry wired to in-memory sources and a bus

#![allow(dead_code)]

pub mod cache_fixture;
pub mod rows;

/// Route `log` output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until<F: Fn() -> bool>(timeout: std::time::Duration, condition: F) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    condition()
}
