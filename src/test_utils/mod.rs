//! Helpers shared by unit and integration tests.
//!
//! Compiled for unit tests and, through the `test-util` feature, for the
//! integration tests under `tests/`.

use std::{
    thread,
    time::{Duration, Instant},
};

pub mod fake_collector;

pub use fake_collector::{FakeCollector, ReceivedFrame};

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns the final result of `condition`.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0));
    listener
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .unwrap_or(9)
}
