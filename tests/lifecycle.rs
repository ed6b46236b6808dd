//! Lifecycle closure: for ADD/ENABLE/DISABLE/DELETE on a single
//! `(filter, ident)`, delivery tracks the armed bit, and deleting leaves
//! nothing behind for a following wait to find.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::{kevent, new_kqueue};
use kqueue_compat::*;
use std::time::Duration;

#[test]
fn disabled_knote_does_not_deliver_until_reenabled() {
    let kq = new_kqueue();
    let ident = 42;

    kevent(
        &kq,
        &[Kevent::new(ident, EVFILT_USER, EV_ADD | EV_CLEAR, 0, 0, 0)],
        0,
        None,
    );

    kevent(
        &kq,
        &[Kevent::new(ident, EVFILT_USER, EV_DISABLE, NOTE_TRIGGER, 0, 0)],
        0,
        None,
    );
    let events = kevent(&kq, &[], 4, Some(Duration::from_millis(200)));
    assert!(events.is_empty(), "a disabled knote must not deliver");

    kevent(
        &kq,
        &[Kevent::new(ident, EVFILT_USER, EV_ENABLE, NOTE_TRIGGER, 0, 0)],
        0,
        None,
    );
    let events = kevent(&kq, &[], 4, Some(Duration::from_secs(1)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ident, ident);
}

#[test]
fn delete_then_delete_again_reports_enoent() {
    let kq = new_kqueue();
    let ident = 7;

    kevent(
        &kq,
        &[Kevent::new(ident, EVFILT_USER, EV_ADD, 0, 0, 0)],
        0,
        None,
    );
    kevent(
        &kq,
        &[Kevent::new(ident, EVFILT_USER, EV_DELETE, 0, 0, 0)],
        0,
        None,
    );

    let events = kevent(
        &kq,
        &[Kevent::new(
            ident,
            EVFILT_USER,
            EV_DELETE | EV_RECEIPT,
            0,
            0,
            0,
        )],
        1,
        None,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].flags & EV_ERROR, EV_ERROR);
    assert_eq!(events[0].data, libc::ENOENT as i64);
}

#[test]
fn dropping_a_kqueue_tears_down_every_live_knote() {
    // Mixed armed/disabled/oneshot knotes across filters, torn down by
    // `Drop` without panicking: a knote's resource is released before the
    // knote itself becomes unreachable.
    let kq = new_kqueue();
    kevent(
        &kq,
        &[
            Kevent::new(1, EVFILT_USER, EV_ADD, 0, 0, 0),
            Kevent::new(2, EVFILT_USER, EV_ADD | EV_ONESHOT, 0, 0, 0),
            Kevent::new(3, EVFILT_USER, EV_ADD | EV_DISABLE, 0, 0, 0),
            Kevent::new(50, EVFILT_TIMER, EV_ADD, 0, 10_000, 0),
        ],
        0,
        None,
    );
    drop(kq);
}
