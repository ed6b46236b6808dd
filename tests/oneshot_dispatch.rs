//! `EV_ONESHOT` fires at most once and removes the knote; `EV_DISPATCH`
//! disables the knote after one delivery instead of removing it.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::{kevent, new_kqueue};
use kqueue_compat::*;
use std::time::Duration;

#[test]
fn oneshot_fires_at_most_once() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(
            1,
            EVFILT_USER,
            EV_ADD | EV_ONESHOT | EV_CLEAR,
            0,
            0,
            0,
        )],
        0,
        None,
    );
    kevent(
        &kq,
        &[Kevent::new(1, EVFILT_USER, 0, NOTE_TRIGGER, 0, 0)],
        0,
        None,
    );

    let events = kevent(&kq, &[], 4, Some(Duration::from_millis(500)));
    assert_eq!(events.len(), 1);

    // The knote is gone: a re-trigger attempt is itself ENOENT, and either
    // way a following wait times out.
    let events = kevent(
        &kq,
        &[Kevent::new(
            1,
            EVFILT_USER,
            EV_RECEIPT,
            NOTE_TRIGGER,
            0,
            0,
        )],
        1,
        None,
    );
    assert_eq!(events[0].flags & EV_ERROR, EV_ERROR);
    assert_eq!(events[0].data, libc::ENOENT as i64);

    let events = kevent(&kq, &[], 4, Some(Duration::from_millis(200)));
    assert!(events.is_empty());
}

#[test]
fn dispatch_disables_until_reenabled() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(
            2,
            EVFILT_USER,
            EV_ADD | EV_DISPATCH | EV_CLEAR,
            0,
            0,
            0,
        )],
        0,
        None,
    );
    kevent(
        &kq,
        &[Kevent::new(2, EVFILT_USER, 0, NOTE_TRIGGER, 0, 0)],
        0,
        None,
    );

    let events = kevent(&kq, &[], 4, Some(Duration::from_millis(500)));
    assert_eq!(events.len(), 1);

    kevent(
        &kq,
        &[Kevent::new(2, EVFILT_USER, 0, NOTE_TRIGGER, 0, 0)],
        0,
        None,
    );
    let events = kevent(&kq, &[], 4, Some(Duration::from_millis(200)));
    assert!(
        events.is_empty(),
        "a DISPATCH knote stays disabled until explicitly re-enabled"
    );

    kevent(
        &kq,
        &[Kevent::new(2, EVFILT_USER, EV_ENABLE, NOTE_TRIGGER, 0, 0)],
        0,
        None,
    );
    let events = kevent(&kq, &[], 4, Some(Duration::from_secs(1)));
    assert_eq!(events.len(), 1);
}

#[test]
fn oneshot_timer_knote_is_gone_after_delivery() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(
            9,
            EVFILT_TIMER,
            EV_ADD | EV_ONESHOT,
            0,
            30,
            0,
        )],
        0,
        None,
    );
    let events = kevent(&kq, &[], 1, Some(Duration::from_secs(1)));
    assert_eq!(events.len(), 1);

    let events = kevent(
        &kq,
        &[Kevent::new(
            9,
            EVFILT_TIMER,
            EV_ENABLE | EV_RECEIPT,
            0,
            0,
            0,
        )],
        1,
        None,
    );
    assert_eq!(events[0].flags & EV_ERROR, EV_ERROR);
    assert_eq!(events[0].data, libc::ENOENT as i64);
}
