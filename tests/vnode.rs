//! `EVFILT_VNODE`: write and delete notifications on a watched path, and
//! the auto-disable-on-delete behavior.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::{kevent, new_kqueue};
use kqueue_compat::*;
use std::fs::{self, File};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::time::Duration;

fn unique_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "kqueue-compat-test-{tag}-{}-{}",
        std::process::id(),
        fastrand::u64(..)
    ))
}

#[test]
fn write_to_a_watched_file_reports_note_write() {
    let path = unique_path("write");
    File::create(&path).unwrap();
    let watched = File::open(&path).unwrap();

    let kq = new_kqueue();
    kq.kevent(
        &[Kevent::new(
            watched.as_raw_fd() as u64,
            EVFILT_VNODE,
            EV_ADD | EV_CLEAR,
            NOTE_WRITE,
            0,
            0,
        )],
        &mut [],
        None,
    )
    .expect("watch");

    let mut writer = File::options().append(true).open(&path).unwrap();
    writer.write_all(b"hello").unwrap();
    writer.sync_all().unwrap();

    let events = kevent(&kq, &[], 1, Some(Duration::from_secs(2)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fflags & NOTE_WRITE, NOTE_WRITE);

    drop(watched);
    let _ = fs::remove_file(&path);
}

#[test]
fn deleting_a_watched_file_reports_note_delete_once_and_disables() {
    let path = unique_path("delete");
    File::create(&path).unwrap();
    let watched = File::open(&path).unwrap();
    let ident = watched.as_raw_fd() as u64;

    let kq = new_kqueue();
    kq.kevent(
        &[Kevent::new(
            ident,
            EVFILT_VNODE,
            EV_ADD,
            NOTE_DELETE,
            0,
            0,
        )],
        &mut [],
        None,
    )
    .expect("watch");

    fs::remove_file(&path).unwrap();

    let events = kevent(&kq, &[], 2, Some(Duration::from_secs(2)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fflags & NOTE_DELETE, NOTE_DELETE);

    // Auto-disabled, not deleted: re-enabling it must not resurrect a
    // delivery (the inode is gone, nothing will ever fire on it again),
    // but the ENABLE call itself must still succeed against the knote.
    kq.kevent(
        &[Kevent::new(ident, EVFILT_VNODE, EV_ENABLE, 0, 0, 0)],
        &mut [],
        None,
    )
    .expect("the knote must still exist, just disabled");

    let events = kevent(&kq, &[], 2, Some(Duration::from_millis(300)));
    assert!(events.is_empty());

    drop(watched);
}
