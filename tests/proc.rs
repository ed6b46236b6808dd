//! `EVFILT_PROC`/`NOTE_EXIT`, the one proc sub-note this crate supports on
//! Linux; other sub-notes are reported unsupported.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::{kevent, new_kqueue};
use kqueue_compat::*;
use std::process::Command;
use std::time::Duration;

#[test]
fn note_exit_fires_once_the_child_exits() {
    let mut child = Command::new("sh")
        .args(["-c", "exit 0"])
        .spawn()
        .expect("spawn sh");
    let pid = child.id() as u64;

    let kq = new_kqueue();
    kq.kevent(
        &[Kevent::new(pid, EVFILT_PROC, EV_ADD, NOTE_EXIT, 0, 0)],
        &mut [],
        None,
    )
    .expect("watch for exit");

    let events = kevent(&kq, &[], 1, Some(Duration::from_secs(2)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ident, pid);
    assert_eq!(events[0].fflags, NOTE_EXIT);

    let _ = child.wait();
}

#[test]
fn a_sub_note_other_than_exit_alone_is_rejected() {
    let kq = new_kqueue();
    let events = kevent(
        &kq,
        &[Kevent::new(
            1,
            EVFILT_PROC,
            EV_ADD | EV_RECEIPT,
            NOTE_FORK,
            0,
            0,
        )],
        1,
        None,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].flags & EV_ERROR, EV_ERROR);
    assert_eq!(events[0].data, libc::EINVAL as i64);
}
