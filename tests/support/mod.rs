//! Shared fixtures for the integration suites.

#![allow(dead_code)]

pub mod things;
pub mod users;

use std::thread;
use std::time::{Duration, Instant};

/// Poll `condition` every `tick` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, tick: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(tick);
    }
}

/// `eventually` with the timings the suites use for pub/sub delivery.
pub fn delivered(condition: impl Fn() -> bool) -> bool {
    eventually(Duration::from_secs(5), Duration::from_millis(10), condition)
}

/// Route library logs to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
