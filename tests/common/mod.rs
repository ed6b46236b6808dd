//! Shared fixtures for the integration tests below, mirroring the role
//! `tokio-rs-mio`'s own `tests/util/mod.rs` plays for its suite.

#![allow(dead_code)]

use kqueue_compat::{Kevent, Kqueue};
use std::time::Duration;

pub fn new_kqueue() -> Kqueue {
    Kqueue::new().expect("kqueue() failed")
}

/// Applies `changes`, then waits (if the event-list has room) up to
/// `timeout`, returning whatever events came back. A `capacity` of `0`
/// makes this a changes-only call that never blocks, the pattern used
/// throughout these tests to register/trigger/delete knotes without also
/// waiting.
pub fn kevent(
    kq: &Kqueue,
    changes: &[Kevent],
    capacity: usize,
    timeout: Option<Duration>,
) -> Vec<Kevent> {
    let mut events = vec![Kevent::zeroed(); capacity];
    let n = kq
        .kevent(changes, &mut events, timeout)
        .expect("kevent() failed");
    events.truncate(n);
    events
}
