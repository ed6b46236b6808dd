//! Portable `kqueue(2)`/`kevent(2)`.
//!
//! This crate gives platforms that lack a native kqueue (primarily Linux)
//! the same registration model and the same `kevent()` entry point, built
//! on top of `epoll` plus `signalfd`, `timerfd`, `inotify`, `eventfd`, and
//! `pidfd`. A secondary realization on Windows, built on I/O completion
//! ports, is carried in-tree but is not held to the same completeness bar
//! (see `sys::windows`) — only the Linux path is authoritative.
//!
//! Two surfaces are exported:
//!
//! - An idiomatic one: [`Kqueue`], [`Kevent`], [`Events`], [`KqueueError`].
//! - A C-ABI-compatible one: the free functions [`kqueue`] and [`kevent`],
//!   plus the numeric `EV_*`/`EVFILT_*`/`NOTE_*` constants, matching the
//!   BSD values so existing C callers link against this crate unchanged.

#![warn(missing_docs)]

mod error;
mod event;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        #[macro_use]
        mod macros;
        #[path = "sys/unix/mod.rs"]
        mod sys;
    } else if #[cfg(windows)] {
        #[path = "sys/windows/mod.rs"]
        mod sys;
    } else {
        compile_error!("kqueue-compat has no backend for this target");
    }
}

pub use error::KqueueError;
pub use event::Kevent;
pub use sys::{Events, Kqueue};

use std::io;
use std::os::raw::c_int;
use std::time::Duration;

// ---------------------------------------------------------------------
// `flags` — action + behavior bitmask.
// ---------------------------------------------------------------------

/// Adds or modifies an event.
pub const EV_ADD: u16 = 0x0001;
/// Removes an event.
pub const EV_DELETE: u16 = 0x0002;
/// Re-arms a disabled knote.
pub const EV_ENABLE: u16 = 0x0004;
/// Disables a knote without removing it.
pub const EV_DISABLE: u16 = 0x0008;
/// Deletes the knote after one delivery.
pub const EV_ONESHOT: u16 = 0x0010;
/// Selects edge-triggered semantics; re-arms only on explicit consumption.
pub const EV_CLEAR: u16 = 0x0020;
/// Forces a change to report `EV_ERROR` instead of firing real readiness.
pub const EV_RECEIPT: u16 = 0x0040;
/// Disables the knote after each delivery instead of deleting it.
pub const EV_DISPATCH: u16 = 0x0080;
/// Set on the delivered event when the peer has reached end-of-stream.
pub const EV_EOF: u16 = 0x8000;
/// Set on the delivered event to report a per-change failure.
pub const EV_ERROR: u16 = 0x4000;

// ---------------------------------------------------------------------
// `filter` — event class tag.
// ---------------------------------------------------------------------

/// Readable-fd events.
pub const EVFILT_READ: i16 = -1;
/// Writable-fd events.
pub const EVFILT_WRITE: i16 = -2;
/// Filesystem vnode events.
pub const EVFILT_VNODE: i16 = -4;
/// Process state-change events.
pub const EVFILT_PROC: i16 = -5;
/// POSIX signal events.
pub const EVFILT_SIGNAL: i16 = -6;
/// Timer expiration events.
pub const EVFILT_TIMER: i16 = -7;
/// User-triggered events.
pub const EVFILT_USER: i16 = -10;

/// Number of filter slots in the dispatch table (see `sys::unix::filter`).
pub(crate) const FILTER_COUNT: usize = 7;

/// Maps a public `EVFILT_*` tag to a dense index for table dispatch.
/// Returns `None` for an unknown filter (`EINVAL`).
pub(crate) fn filter_index(filter: i16) -> Option<usize> {
    match filter {
        EVFILT_READ => Some(0),
        EVFILT_WRITE => Some(1),
        EVFILT_VNODE => Some(2),
        EVFILT_PROC => Some(3),
        EVFILT_SIGNAL => Some(4),
        EVFILT_TIMER => Some(5),
        EVFILT_USER => Some(6),
        _ => None,
    }
}

// ---------------------------------------------------------------------
// `fflags` — vnode notes.
// ---------------------------------------------------------------------

/// The watched file was unlinked.
pub const NOTE_DELETE: u32 = 0x0001;
/// The watched file was written to.
pub const NOTE_WRITE: u32 = 0x0002;
/// The watched file grew.
pub const NOTE_EXTEND: u32 = 0x0004;
/// The watched file's metadata changed.
pub const NOTE_ATTRIB: u32 = 0x0008;
/// The watched file's link count changed.
pub const NOTE_LINK: u32 = 0x0010;
/// The watched file was renamed.
pub const NOTE_RENAME: u32 = 0x0020;
/// Access to the watched file was revoked.
pub const NOTE_REVOKE: u32 = 0x0040;

// ---------------------------------------------------------------------
// `fflags` — timer units.
// ---------------------------------------------------------------------

/// `data` is in seconds.
pub const NOTE_SECONDS: u32 = 0x0000_0001;
/// `data` is in milliseconds (the default when no unit bit is set).
pub const NOTE_MSECONDS: u32 = 0x0000_0002;
/// `data` is in microseconds.
pub const NOTE_USECONDS: u32 = 0x0000_0004;
/// `data` is in nanoseconds.
pub const NOTE_NSECONDS: u32 = 0x0000_0008;
/// `data` is an absolute deadline rather than a relative duration.
pub const NOTE_ABSOLUTE: u32 = 0x0000_0010;

// ---------------------------------------------------------------------
// `fflags` — user filter value-combine protocol.
// ---------------------------------------------------------------------

/// Causes the next wait to report readiness for this ident.
pub const NOTE_TRIGGER: u32 = 0x0100_0000;
/// Bitwise-AND the change's fflags into the knote's stored fflags.
pub const NOTE_FFAND: u32 = 0x4000_0000;
/// Bitwise-OR the change's fflags into the knote's stored fflags.
pub const NOTE_FFOR: u32 = 0x8000_0000;
/// Replace the knote's stored fflags with the change's fflags.
pub const NOTE_FFCOPY: u32 = 0xc000_0000;
/// Mask selecting which combine operation a change requests.
pub const NOTE_FFCTRLMASK: u32 = 0xc000_0000;
/// Mask selecting the 24 user-defined fflags bits (excludes control bits
/// and `NOTE_TRIGGER`).
pub const NOTE_FFLAGSMASK: u32 = 0x00ff_ffff;

// ---------------------------------------------------------------------
// `fflags` — proc notes (best-effort subset).
// ---------------------------------------------------------------------

/// The watched process exited.
pub const NOTE_EXIT: u32 = 0x8000_0000;
/// The watched process called `fork(2)`. Not supported on Linux.
pub const NOTE_FORK: u32 = 0x4000_0000;
/// The watched process called `exec(2)`. Not supported on Linux.
pub const NOTE_EXEC: u32 = 0x2000_0000;

/// Builds a change-list entry, mirroring the BSD `EV_SET` macro.
#[macro_export]
macro_rules! ev_set {
    ($kev:expr, $ident:expr, $filter:expr, $flags:expr, $fflags:expr, $data:expr, $udata:expr $(,)?) => {{
        *$kev = $crate::Kevent::new(
            $ident as u64,
            $filter,
            $flags,
            $fflags,
            $data as i64,
            $udata as isize,
        );
    }};
}

// ---------------------------------------------------------------------
// C-ABI-compatible surface.
// ---------------------------------------------------------------------

/// Creates a new kqueue and returns a raw descriptor, or `-1` with `errno`
/// set on failure. Mirrors `kqueue(2)`.
///
/// Only available on the Linux backend: the C-ABI surface speaks in
/// `errno`, which has no Windows equivalent (`sys::windows` only exposes
/// the idiomatic [`Kqueue`] type).
///
/// # Safety
///
/// The returned descriptor must eventually be released with
/// [`kqueue_close`] (or by dropping a [`Kqueue`] obtained through
/// [`Kqueue::from_raw`]); leaking it leaks every OS resource any knote
/// registered on it holds.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub unsafe extern "C" fn kqueue() -> c_int {
    match Kqueue::new() {
        Ok(kq) => kq.into_raw(),
        Err(e) => {
            set_errno(&e.into());
            -1
        }
    }
}

/// Applies a change-list and/or waits for and copies out ready events.
/// Mirrors `kevent(2)`. Returns the number of events written to
/// `eventlist`, or `-1` with `errno` set. `timeout` of null blocks
/// indefinitely.
///
/// # Safety
///
/// `kq` must be a descriptor returned by [`kqueue`] and not yet closed.
/// `changelist`/`eventlist` must each be valid for `nchanges`/`nevents`
/// elements of [`Kevent`]. `timeout`, if non-null, must point at a valid
/// `libc::timespec`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub unsafe extern "C" fn kevent(
    kq: c_int,
    changelist: *const Kevent,
    nchanges: c_int,
    eventlist: *mut Kevent,
    nevents: c_int,
    timeout: *const libc::timespec,
) -> c_int {
    let kqueue = match sys::borrow_raw(kq) {
        Some(kqueue) => kqueue,
        None => {
            set_errno(&io::Error::from_raw_os_error(libc::EBADF));
            return -1;
        }
    };

    let changes: &[Kevent] = if nchanges > 0 {
        std::slice::from_raw_parts(changelist, nchanges as usize)
    } else {
        &[]
    };
    let events: &mut [Kevent] = if nevents > 0 {
        std::slice::from_raw_parts_mut(eventlist, nevents as usize)
    } else {
        &mut []
    };
    let timeout = if timeout.is_null() {
        None
    } else {
        Some(timespec_to_duration(&*timeout))
    };

    match kqueue.kevent(changes, events, timeout) {
        Ok(n) => n as c_int,
        Err(e) => {
            set_errno(&e.into());
            -1
        }
    }
}

/// Closes a kqueue descriptor previously returned by [`kqueue`], releasing
/// every knote it still holds.
///
/// # Safety
///
/// `kq` must be a descriptor returned by [`kqueue`] and not already closed.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub unsafe extern "C" fn kqueue_close(kq: c_int) -> c_int {
    match Kqueue::from_raw(kq) {
        Some(kqueue) => {
            drop(kqueue);
            0
        }
        None => {
            set_errno(&io::Error::from_raw_os_error(libc::EBADF));
            -1
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_errno(err: &io::Error) {
    if let Some(code) = err.raw_os_error() {
        unsafe { *errno_location() = code };
    } else {
        unsafe { *errno_location() = libc::EINVAL };
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn timespec_to_duration(ts: &libc::timespec) -> Duration {
    Duration::new(ts.tv_sec.max(0) as u64, ts.tv_nsec.max(0) as u32)
}
