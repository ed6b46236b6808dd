//! The per-kqueue wait fabric: one I/O completion port.
//!
//! Unlike `epoll`, IOCP is completion- rather than readiness-based, so this
//! aggregator plays two roles depending on what woke it. Software-driven
//! filters (timer, user) never issue real I/O; they identify themselves by
//! *completion key* alone, packed the same way `sys::unix::aggregator` packs
//! its `u64` epoll data word. The read/write filter is the one filter that
//! issues genuine overlapped operations, so its completions are identified
//! by *OVERLAPPED pointer* instead, the pattern IOCP callers are built
//! around (see `vincent-thomas-lio`'s `Iocp::push`/`poll_inner`).

use std::io;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, WAIT_TIMEOUT};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED,
};

use crate::error::errno;

/// Reserved completion key for the cross-thread wake, mirroring
/// `sys::unix::aggregator::NOTIFY_TOKEN`.
const NOTIFY_KEY: usize = usize::MAX;

pub(crate) fn pack_filter(filter_index: usize, ident: u64) -> usize {
    debug_assert!(filter_index < 0x7F, "filter index too large to pack");
    debug_assert!(ident <= 0x00FF_FFFF_FFFF_FFFF, "ident too large to pack");
    (((filter_index as u64) << 56) | (ident & 0x00FF_FFFF_FFFF_FFFF)) as usize
}

/// Posts a synthetic completion directly against a raw port handle, for
/// callers (the waitable-timer callback in `filter::timer`) that only have
/// the handle, not a live `&Aggregator` borrow — the callback fires on a
/// thread-pool thread with no connection to whatever thread is blocked in
/// [`Aggregator::wait`].
pub(crate) fn post_filter_raw(port: HANDLE, filter_index: usize, ident: u64) -> io::Result<()> {
    let key = pack_filter(filter_index, ident);
    let ok = unsafe {
        windows_sys::Win32::System::IO::PostQueuedCompletionStatus(port, 0, key, ptr::null_mut())
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// One readiness token as reported by a single completion.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Token {
    /// A software-driven filter (timer, user) identified by completion key.
    Filter { filter_index: usize, ident: u64 },
    /// A genuine overlapped I/O completion from the read/write filter. The
    /// pointer is the `*mut IoOp` the filter leaked via `Box::into_raw` when
    /// it submitted the operation; reclaiming it is the filter's job, not
    /// the aggregator's.
    Io {
        overlapped: *mut OVERLAPPED,
        transferred: u32,
        result: io::Result<()>,
    },
}

pub(crate) struct Aggregator {
    port: HANDLE,
}

// `HANDLE` is just a pointer-sized value; the completion port itself is
// safe to share across threads, which is the entire point of IOCP.
unsafe impl Send for Aggregator {}
unsafe impl Sync for Aggregator {}

impl Aggregator {
    pub(crate) fn new() -> io::Result<Aggregator> {
        let port = unsafe { CreateIoCompletionPort(windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE, 0, 0, 0) };
        if port == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Aggregator { port })
    }

    pub(crate) fn raw_port(&self) -> HANDLE {
        self.port
    }

    /// Associates a raw handle (socket, waitable timer's wait handle is
    /// never associated this way — see `filter::timer`) with the port,
    /// tagging every completion on it with `(filter_index, ident)`.
    pub(crate) fn associate(&self, handle: HANDLE, filter_index: usize, ident: u64) -> io::Result<()> {
        let key = pack_filter(filter_index, ident);
        let result = unsafe { CreateIoCompletionPort(handle, self.port, key, 0) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Posts a synthetic completion carrying a filter token, for filters
    /// (timer, user) that have no real overlapped operation to submit.
    pub(crate) fn post_filter(&self, filter_index: usize, ident: u64) -> io::Result<()> {
        let key = pack_filter(filter_index, ident);
        let ok = unsafe {
            windows_sys::Win32::System::IO::PostQueuedCompletionStatus(
                self.port,
                0,
                key,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wakes a concurrent or future `wait()` from another thread. Never
    /// resolves to a knote, matching `sys::unix::aggregator::notify`.
    pub(crate) fn notify(&self) -> io::Result<()> {
        let ok = unsafe {
            windows_sys::Win32::System::IO::PostQueuedCompletionStatus(
                self.port,
                0,
                NOTIFY_KEY,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until at least one completion is ready or `timeout` elapses,
    /// draining everything already queued before returning. The notify key
    /// is consumed here and never surfaced as a token.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<Token>> {
        let millis = match timeout {
            None => u32::MAX,
            Some(d) => d.as_millis().min(u32::MAX as u128 - 1) as u32,
        };

        let mut tokens = Vec::new();
        let mut deadline_used = false;
        loop {
            let wait_millis = if tokens.is_empty() && !deadline_used {
                deadline_used = true;
                millis
            } else {
                0
            };

            let mut transferred: u32 = 0;
            let mut key: usize = 0;
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();
            let ok = unsafe {
                GetQueuedCompletionStatus(self.port, &mut transferred, &mut key, &mut overlapped, wait_millis)
            };

            if ok == 0 && overlapped.is_null() {
                let err = unsafe { GetLastError() };
                if err == WAIT_TIMEOUT {
                    break;
                }
                if tokens.is_empty() {
                    return Err(io::Error::from_raw_os_error(err as i32));
                }
                break;
            }

            if !overlapped.is_null() {
                let result = if ok != 0 {
                    Ok(())
                } else {
                    let err = unsafe { GetLastError() };
                    Err(io::Error::from_raw_os_error(err as i32))
                };
                tokens.push(Token::Io {
                    overlapped,
                    transferred,
                    result,
                });
                continue;
            }

            if key == NOTIFY_KEY {
                continue;
            }

            tokens.push(Token::Filter {
                filter_index: (key as u64 >> 56) as usize,
                ident: key as u64 & 0x00FF_FFFF_FFFF_FFFF,
            });
        }

        Ok(tokens)
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}

/// Maps the last Win32 error to the BSD-style `errno` this crate reports
/// through, for the handful of codes the Windows filters can actually
/// produce (see `crate::error::errno`'s `cfg(windows)` block).
pub(crate) fn last_error_to_io() -> io::Error {
    let code = unsafe { GetLastError() };
    io::Error::from_raw_os_error(code as i32)
}

#[allow(dead_code)]
pub(crate) fn invalid_handle_error() -> io::Error {
    io::Error::from_raw_os_error(errno::EBADF)
}
