//! Timer accuracy: oneshot timers fire once and disappear, periodic
//! timers redeliver without rearming, and neither fires early.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::{kevent, new_kqueue};
use kqueue_compat::*;
use std::time::{Duration, Instant};

#[test]
fn oneshot_timer_fires_once_then_is_gone() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(7, EVFILT_TIMER, EV_ADD | EV_ONESHOT, 0, 50, 0)],
        0,
        None,
    );

    let events = kevent(&kq, &[], 1, Some(Duration::from_secs(1)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ident, 7);
    assert!(events[0].data >= 1);

    let events = kevent(&kq, &[], 1, Some(Duration::from_millis(200)));
    assert!(events.is_empty(), "the oneshot timer's knote must be gone");
}

#[test]
fn timer_never_delivers_before_its_duration_elapses() {
    let kq = new_kqueue();
    let armed_at = Instant::now();
    kevent(
        &kq,
        &[Kevent::new(
            1,
            EVFILT_TIMER,
            EV_ADD | EV_ONESHOT,
            0,
            100,
            0,
        )],
        0,
        None,
    );
    let events = kevent(&kq, &[], 1, Some(Duration::from_secs(2)));
    assert_eq!(events.len(), 1);
    assert!(armed_at.elapsed() >= Duration::from_millis(100));
}

#[test]
fn periodic_timer_redelivers_without_rearming() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(3, EVFILT_TIMER, EV_ADD, 0, 20, 0)],
        0,
        None,
    );
    for _ in 0..3 {
        let events = kevent(&kq, &[], 1, Some(Duration::from_secs(1)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ident, 3);
    }
    kevent(
        &kq,
        &[Kevent::new(3, EVFILT_TIMER, EV_DELETE, 0, 0, 0)],
        0,
        None,
    );
}

#[test]
fn seconds_unit_is_honored_end_to_end() {
    let kq = new_kqueue();
    let armed_at = Instant::now();
    kevent(
        &kq,
        &[Kevent::new(
            4,
            EVFILT_TIMER,
            EV_ADD | EV_ONESHOT,
            NOTE_SECONDS,
            1,
            0,
        )],
        0,
        None,
    );
    let events = kevent(&kq, &[], 1, Some(Duration::from_secs(2)));
    assert_eq!(events.len(), 1);
    assert!(armed_at.elapsed() >= Duration::from_secs(1));
}
