//! The `struct kevent` shape and the timeout conversions the dispatch loop
//! needs.

use std::fmt;
use std::os::raw::c_void;

/// One `(ident, filter, flags, fflags, data, udata)` tuple.
///
/// Field widths match the BSD `struct kevent` layout so that the C-ABI
/// surface (`kqueue_kevent`, see `src/lib.rs`) can transmute a caller's
/// buffer directly rather than translating element-by-element.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Kevent {
    /// Identifies the event source: an fd, a signal number, a timer id, ...
    pub ident: u64,
    /// Which filter this event belongs to (`EVFILT_*`).
    pub filter: i16,
    /// Action + behavior bitmask (`EV_*`).
    pub flags: u16,
    /// Filter-specific flags (e.g. `NOTE_*`).
    pub fflags: u32,
    /// Filter-specific payload (bytes available, expiration count, ...).
    pub data: i64,
    /// Opaque value, echoed back unchanged.
    pub udata: isize,
}

impl Kevent {
    /// Builds a change-list entry, mirroring the BSD `EV_SET` macro.
    pub fn new(ident: u64, filter: i16, flags: u16, fflags: u32, data: i64, udata: isize) -> Self {
        Kevent {
            ident,
            filter,
            flags,
            fflags,
            data,
            udata,
        }
    }

    /// A zeroed event, useful as scratch space before a `kevent()` call
    /// fills it in.
    pub const fn zeroed() -> Self {
        Kevent {
            ident: 0,
            filter: 0,
            flags: 0,
            fflags: 0,
            data: 0,
            udata: 0,
        }
    }

    pub(crate) fn error_receipt(ident: u64, filter: i16, errno: i32) -> Self {
        Kevent {
            ident,
            filter,
            flags: crate::EV_ERROR,
            fflags: 0,
            data: errno as i64,
            udata: 0,
        }
    }

    pub(crate) fn is_add(&self) -> bool {
        self.flags & crate::EV_ADD != 0
    }
    pub(crate) fn is_delete(&self) -> bool {
        self.flags & crate::EV_DELETE != 0
    }
    pub(crate) fn is_enable(&self) -> bool {
        self.flags & crate::EV_ENABLE != 0
    }
    pub(crate) fn is_disable(&self) -> bool {
        self.flags & crate::EV_DISABLE != 0
    }
    pub(crate) fn is_oneshot(&self) -> bool {
        self.flags & crate::EV_ONESHOT != 0
    }
    pub(crate) fn is_clear(&self) -> bool {
        self.flags & crate::EV_CLEAR != 0
    }
    pub(crate) fn is_receipt(&self) -> bool {
        self.flags & crate::EV_RECEIPT != 0
    }
    pub(crate) fn is_dispatch(&self) -> bool {
        self.flags & crate::EV_DISPATCH != 0
    }
}

fn filter_name(filter: i16) -> &'static str {
    match filter {
        crate::EVFILT_READ => "READ",
        crate::EVFILT_WRITE => "WRITE",
        crate::EVFILT_VNODE => "VNODE",
        crate::EVFILT_PROC => "PROC",
        crate::EVFILT_SIGNAL => "SIGNAL",
        crate::EVFILT_TIMER => "TIMER",
        crate::EVFILT_USER => "USER",
        _ => "UNKNOWN",
    }
}

impl fmt::Display for Kevent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kevent(ident={}, filter={}, flags={:#06x}, fflags={:#010x}, data={}, udata={})",
            self.ident,
            filter_name(self.filter),
            self.flags,
            self.fflags,
            self.data,
            self.udata
        )
    }
}

impl fmt::Debug for Kevent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kevent")
            .field("ident", &self.ident)
            .field("filter", &self.filter)
            .field("flags", &format_args!("{:#06x}", self.flags))
            .field("fflags", &format_args!("{:#010x}", self.fflags))
            .field("data", &self.data)
            .field("udata", &self.udata)
            .finish()
    }
}

/// `udata` is a caller-opaque pointer-sized value; treat raw pointers going
/// in/out as plain integers rather than asserting any particular meaning.
pub fn udata_as_ptr(udata: isize) -> *mut c_void {
    udata as *mut c_void
}

