//! `EVFILT_USER` triggering and the fflags value-combine protocol.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::{kevent, new_kqueue};
use kqueue_compat::*;
use std::time::Duration;

#[test]
fn user_trigger_then_silence_times_out() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(42, EVFILT_USER, EV_ADD | EV_CLEAR, 0, 0, 0)],
        0,
        None,
    );
    kevent(
        &kq,
        &[Kevent::new(42, EVFILT_USER, 0, NOTE_TRIGGER, 0, 0)],
        0,
        None,
    );

    let events = kevent(&kq, &[], 4, Some(Duration::from_secs(1)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ident, 42);

    let events = kevent(&kq, &[], 4, Some(Duration::from_millis(300)));
    assert!(
        events.is_empty(),
        "without a second trigger the following wait must time out"
    );
}

#[test]
fn ffand_ffor_ffcopy_combine_as_bsd_specifies() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(
            1,
            EVFILT_USER,
            EV_ADD,
            0x0000_0001 | NOTE_FFCOPY,
            0,
            0,
        )],
        0,
        None,
    );
    kevent(
        &kq,
        &[Kevent::new(
            1,
            EVFILT_USER,
            0,
            0x0000_0002 | NOTE_FFOR | NOTE_TRIGGER,
            0,
            0,
        )],
        0,
        None,
    );

    let events = kevent(&kq, &[], 4, Some(Duration::from_secs(1)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fflags & NOTE_FFLAGSMASK, 0x0000_0003);
}

#[test]
fn ffand_masks_down_to_the_intersection() {
    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(
            2,
            EVFILT_USER,
            EV_ADD,
            0x0000_0111 | NOTE_FFCOPY,
            0,
            0,
        )],
        0,
        None,
    );
    kevent(
        &kq,
        &[Kevent::new(
            2,
            EVFILT_USER,
            0,
            0x0000_0011 | NOTE_FFAND | NOTE_TRIGGER,
            0,
            0,
        )],
        0,
        None,
    );

    let events = kevent(&kq, &[], 4, Some(Duration::from_secs(1)));
    assert_eq!(events[0].fflags & NOTE_FFLAGSMASK, 0x0000_0011);
}
