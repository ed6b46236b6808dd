//! The crate's error currency.
//!
//! Every fallible operation in this crate returns a plain [`std::io::Result`]
//! internally — there is no custom error enum gating the common path. At the
//! edges (anywhere a caller cares about a specific errno rather than just
//! propagating with `?`) that `io::Error` is wrapped in [`KqueueError`].

use std::fmt;
use std::io;

/// A kqueue-compat failure.
///
/// Thin wrapper over [`io::Error`] that exists so callers doing idiomatic
/// error handling aren't forced to match on raw `libc::E*` ints to find out
/// what went wrong — [`KqueueError::raw_os_error`] gives them that when they
/// need it (e.g. to implement the `EV_RECEIPT` "report EEXIST, don't fail
/// the whole call" behavior).
#[derive(Debug)]
pub struct KqueueError(io::Error);

impl KqueueError {
    pub(crate) fn new(err: io::Error) -> Self {
        KqueueError(err)
    }

    pub(crate) fn from_raw_os_error(errno: i32) -> Self {
        KqueueError(io::Error::from_raw_os_error(errno))
    }

    /// The raw `errno` value, if this error came from the OS.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.0.raw_os_error()
    }

    /// Borrow the underlying [`io::Error`].
    pub fn as_io_error(&self) -> &io::Error {
        &self.0
    }
}

impl fmt::Display for KqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for KqueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<io::Error> for KqueueError {
    fn from(err: io::Error) -> Self {
        KqueueError::new(err)
    }
}

impl From<KqueueError> for io::Error {
    fn from(err: KqueueError) -> Self {
        err.0
    }
}

/// Common errno shorthands used throughout the Unix filter modules.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) mod errno {
    pub const EBADF: i32 = libc::EBADF;
    pub const EINVAL: i32 = libc::EINVAL;
    pub const ENOENT: i32 = libc::ENOENT;
    pub const ENOMEM: i32 = libc::ENOMEM;
    pub const EINTR: i32 = libc::EINTR;
    pub const EFAULT: i32 = libc::EFAULT;
    pub const EEXIST: i32 = libc::EEXIST;
}

/// Same shorthands, spelled in terms of Win32 error codes rather than POSIX
/// errno: `io::Error::from_raw_os_error`/`raw_os_error` round-trip through
/// `FormatMessage`-style codes on this platform, not libc's `errno.h`
/// values, so the Windows filter modules need their own mapping rather than
/// reusing the Unix one.
#[cfg(windows)]
pub(crate) mod errno {
    use windows_sys::Win32::Foundation;

    pub const EBADF: i32 = Foundation::ERROR_INVALID_HANDLE as i32;
    pub const EINVAL: i32 = Foundation::ERROR_INVALID_PARAMETER as i32;
    pub const ENOENT: i32 = Foundation::ERROR_FILE_NOT_FOUND as i32;
    pub const ENOMEM: i32 = Foundation::ERROR_NOT_ENOUGH_MEMORY as i32;
    pub const EINTR: i32 = Foundation::ERROR_OPERATION_ABORTED as i32;
    pub const EFAULT: i32 = Foundation::ERROR_NOACCESS as i32;
    pub const EEXIST: i32 = Foundation::ERROR_ALREADY_EXISTS as i32;
}
