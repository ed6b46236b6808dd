//! Change-list ordering: receipts come back in the same order the changes
//! were submitted in, and a duplicate `ADD` on a non-idempotent filter
//! reports failure without disturbing the knote already registered.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::{kevent, new_kqueue};
use kqueue_compat::*;
use std::fs::File;
use std::os::fd::AsRawFd;

#[test]
fn receipt_events_appear_in_change_list_order() {
    let kq = new_kqueue();

    let changes = [
        Kevent::new(1, EVFILT_USER, EV_ADD | EV_RECEIPT, 0, 0, 0),
        Kevent::new(999, EVFILT_USER, EV_DELETE | EV_RECEIPT, 0, 0, 0),
        Kevent::new(2, EVFILT_USER, EV_ADD | EV_RECEIPT, 0, 0, 0),
    ];
    let events = kevent(&kq, &changes, 3, None);

    assert_eq!(events.len(), 3);
    assert_eq!(events[0].ident, 1);
    assert_eq!(events[0].data, 0, "successful ADD reports data=0");
    assert_eq!(events[1].ident, 999);
    assert_eq!(events[1].data, libc::ENOENT as i64);
    assert_eq!(events[2].ident, 2);
    assert_eq!(events[2].data, 0);
    for ev in &events {
        assert_eq!(ev.flags & EV_ERROR, EV_ERROR);
    }
}

#[test]
fn receipt_on_duplicate_add_reports_eexist_and_leaves_original_intact() {
    let path = std::env::temp_dir().join(format!(
        "kqueue-compat-test-dup-add-{}-{}",
        std::process::id(),
        fastrand::u64(..)
    ));
    File::create(&path).unwrap();
    let watched = File::open(&path).unwrap();
    let ident = watched.as_raw_fd() as u64;

    let kq = new_kqueue();
    kevent(
        &kq,
        &[Kevent::new(ident, EVFILT_VNODE, EV_ADD, NOTE_WRITE, 0, 0)],
        0,
        None,
    );

    let events = kevent(
        &kq,
        &[Kevent::new(
            ident,
            EVFILT_VNODE,
            EV_ADD | EV_RECEIPT,
            NOTE_WRITE,
            0,
            0,
        )],
        1,
        None,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].flags & EV_ERROR, EV_ERROR);
    assert_eq!(events[0].data, libc::EEXIST as i64);

    // The original knote is untouched: the file remains watched.
    let mut writer = File::options().append(true).open(&path).unwrap();
    std::io::Write::write_all(&mut writer, b"hi").unwrap();
    writer.sync_all().unwrap();

    let events = kevent(&kq, &[], 1, Some(std::time::Duration::from_secs(2)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ident, ident);

    drop(watched);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn error_without_receipt_or_room_aborts_the_call() {
    let kq = new_kqueue();
    let changes = [
        Kevent::new(999, EVFILT_USER, EV_DELETE, 0, 0, 0),
        Kevent::new(1, EVFILT_USER, EV_ADD, 0, 0, 0),
    ];
    let mut events: [Kevent; 0] = [];
    let err = kq.kevent(&changes, &mut events, None).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

    // The residual change (ADD ident=1) must not have been applied.
    let events = kevent(
        &kq,
        &[Kevent::new(1, EVFILT_USER, EV_ADD | EV_RECEIPT, 0, 0, 0)],
        1,
        None,
    );
    assert_eq!(
        events[0].data, 0,
        "ident 1 must still be unregistered after the aborted call"
    );
}
