//! Three deliveries of the same signal coalesce into one event carrying
//! `data=3`.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::{kevent, new_kqueue};
use kqueue_compat::*;
use std::time::Duration;

#[test]
fn three_raises_coalesce_into_one_count() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(
            libc::SIGUSR1 as u64,
            EVFILT_SIGNAL,
            EV_ADD,
            0,
            0,
            0,
        )],
        0,
        None,
    );

    for _ in 0..3 {
        signal_hook::low_level::raise(libc::SIGUSR1).expect("raise");
    }

    let events = kevent(&kq, &[], 1, Some(Duration::from_secs(1)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ident, libc::SIGUSR1 as u64);
    assert_eq!(events[0].data, 3);

    kevent(
        &kq,
        &[Kevent::new(
            libc::SIGUSR1 as u64,
            EVFILT_SIGNAL,
            EV_DELETE,
            0,
            0,
            0,
        )],
        0,
        None,
    );
}

#[test]
fn clear_resets_the_count_each_wait() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(
            libc::SIGUSR2 as u64,
            EVFILT_SIGNAL,
            EV_ADD | EV_CLEAR,
            0,
            0,
            0,
        )],
        0,
        None,
    );
    signal_hook::low_level::raise(libc::SIGUSR2).unwrap();

    let events = kevent(&kq, &[], 1, Some(Duration::from_secs(1)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data, 1);

    let events = kevent(&kq, &[], 1, Some(Duration::from_millis(300)));
    assert!(
        events.is_empty(),
        "the count must have reset to zero after the previous CLEAR copyout"
    );
}
