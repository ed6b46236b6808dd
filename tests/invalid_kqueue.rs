//! `kevent(-1, ...)` against a bogus descriptor reports `EBADF` through
//! the C-ABI surface.

#![cfg(any(target_os = "linux", target_os = "android"))]

use kqueue_compat::kevent as c_kevent;
use std::ptr;

#[test]
fn invalid_descriptor_reports_ebadf() {
    let ret = unsafe { c_kevent(-1, ptr::null(), 0, ptr::null_mut(), 0, ptr::null()) };
    assert_eq!(ret, -1);

    let err = std::io::Error::last_os_error();
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));
}

#[test]
fn kqueue_close_on_an_unknown_descriptor_also_reports_ebadf() {
    let ret = unsafe { kqueue_compat::kqueue_close(i32::MAX) };
    assert_eq!(ret, -1);
    assert_eq!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::EBADF)
    );
}
