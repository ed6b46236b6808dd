//! A local socket pair, one end registered for read, the other closed —
//! one wait reports EOF with zero bytes available.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::new_kqueue;
use kqueue_compat::*;
use socket2::{Domain, Socket, Type};
use std::os::fd::AsRawFd;
use std::time::Duration;

#[test]
fn peer_close_reports_eof_and_zero_bytes() {
    let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None).expect("socketpair");
    a.set_nonblocking(true).unwrap();

    let kq = new_kqueue();
    let fd = a.as_raw_fd() as u64;
    kq.kevent(
        &[Kevent::new(fd, EVFILT_READ, EV_ADD, 0, 0, 0)],
        &mut [],
        None,
    )
    .expect("register for read");

    drop(b);

    let mut events = [Kevent::zeroed(); 1];
    let n = kq
        .kevent(&[], &mut events, Some(Duration::from_secs(1)))
        .expect("kevent");

    assert_eq!(n, 1);
    assert_eq!(events[0].filter, EVFILT_READ);
    assert_eq!(events[0].ident, fd);
    assert_eq!(events[0].flags & EV_EOF, EV_EOF);
    assert_eq!(events[0].data, 0);

    drop(a);
}

#[test]
fn readable_data_is_reported_before_close() {
    let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None).expect("socketpair");
    a.set_nonblocking(true).unwrap();

    let kq = new_kqueue();
    let fd = a.as_raw_fd() as u64;
    kq.kevent(
        &[Kevent::new(fd, EVFILT_READ, EV_ADD, 0, 0, 0)],
        &mut [],
        None,
    )
    .expect("register for read");

    use std::io::Write;
    use std::os::unix::net::UnixStream;
    let mut b: UnixStream = b.into();
    b.write_all(b"hi").unwrap();

    let mut events = [Kevent::zeroed(); 1];
    let n = kq
        .kevent(&[], &mut events, Some(Duration::from_secs(1)))
        .expect("kevent");
    assert_eq!(n, 1);
    assert_eq!(events[0].data, 2);
    assert_eq!(events[0].flags & EV_EOF, 0);
}
