//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use iqtap::events::{Event, EventBus};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Record every event of type `E` fired on `bus`
pub fn record_events<E: Event + Clone>(bus: &EventBus) -> Arc<Mutex<Vec<E>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    bus.register_handler::<E, _>(move |e| sink.lock().unwrap().push(e.clone()));
    log
}
