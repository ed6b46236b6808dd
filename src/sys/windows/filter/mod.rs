//! The filter contract and dispatch table for the Windows backend.
//!
//! Shares its shape with `sys::unix::filter` (the same [`Filter`] trait,
//! the same [`Disposal`] enum) so the three-phase dispatcher in
//! `sys::windows::kqueue` reads the same way its Unix counterpart does. The
//! read/write filter is dispatched separately from the rest, same as on
//! Unix, because its completions arrive keyed by `OVERLAPPED` pointer
//! rather than by completion key.

mod not_implemented;
mod read_write;
mod timer;
mod user;

use std::io;

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::windows::iocp::{Aggregator, Token};

/// What the dispatch loop does to a knote after delivering one of its
/// events during copyout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposal {
    /// Leave the knote armed as-is.
    None,
    /// `EV_DISPATCH`: disable without destroying the OS resource.
    Disable,
    /// `EV_ONESHOT`: tear down and remove.
    Delete,
}

/// Every filter module implements the same small contract as its Unix
/// counterpart (see `sys::unix::filter::Filter`).
pub(crate) trait Filter: Send + Sync {
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()>;
    fn copyout(&self, agg: &Aggregator, ident: u64) -> io::Result<Vec<(Kevent, Disposal)>>;
    fn disable(&self, agg: &Aggregator, ident: u64) -> io::Result<()>;
    fn delete(&self, agg: &Aggregator, ident: u64) -> io::Result<()>;
    fn teardown_all(&self, agg: &Aggregator);
}

/// One slot per `EVFILT_*` tag, in the same order `crate::filter_index`
/// assigns on the Unix side: read, write, vnode, proc, signal, timer, user.
/// Vnode/proc/signal share one `NotImplementedFilter` that always fails
/// `ADD` with `EINVAL` — this backend's read/write/timer/user path is the
/// one held out as functional (see the crate-level docs).
pub(crate) struct FilterTable {
    filters: [Box<dyn Filter>; crate::FILTER_COUNT],
    io: std::sync::Arc<read_write::IoTable>,
}

impl FilterTable {
    pub(crate) fn new() -> Self {
        let io = std::sync::Arc::new(read_write::IoTable::new());
        FilterTable {
            filters: [
                Box::new(read_write::ReadWriteFilter::new(
                    io.clone(),
                    read_write::Direction::Read,
                )),
                Box::new(read_write::ReadWriteFilter::new(
                    io.clone(),
                    read_write::Direction::Write,
                )),
                Box::new(not_implemented::NotImplementedFilter::new(crate::EVFILT_VNODE)),
                Box::new(not_implemented::NotImplementedFilter::new(crate::EVFILT_PROC)),
                Box::new(not_implemented::NotImplementedFilter::new(crate::EVFILT_SIGNAL)),
                Box::new(timer::TimerFilter::new()),
                Box::new(user::UserFilter::new()),
            ],
            io,
        }
    }

    pub(crate) fn resolve(&self, filter_tag: i16) -> io::Result<&dyn Filter> {
        match crate::filter_index(filter_tag) {
            Some(i) => Ok(self.filters[i].as_ref()),
            None => {
                #[cfg(feature = "trace")]
                tracing::warn!(filter_tag, "change against an unregistered filter");
                Err(io::Error::from_raw_os_error(errno::EINVAL))
            }
        }
    }

    pub(crate) fn by_index(&self, index: usize) -> &dyn Filter {
        self.filters[index].as_ref()
    }

    /// Reconstructs and resolves an overlapped I/O completion into the (up
    /// to two) BSD events it represents.
    pub(crate) fn io_copyout(
        &self,
        agg: &Aggregator,
        overlapped: *mut windows_sys::Win32::System::IO::OVERLAPPED,
        transferred: u32,
        result: io::Result<()>,
    ) -> io::Result<Vec<(Kevent, Disposal)>> {
        self.io.copyout(agg, overlapped, transferred, result)
    }

    pub(crate) fn teardown_all(&self, agg: &Aggregator) {
        for filter in &self.filters {
            filter.teardown_all(agg);
        }
        self.io.teardown_all(agg);
    }
}

/// Resolves a wake token to the events it represents.
pub(crate) fn copyout_token(
    table: &FilterTable,
    agg: &Aggregator,
    token: Token,
) -> io::Result<Vec<(Kevent, Disposal)>> {
    match token {
        Token::Filter { filter_index, ident } => {
            if filter_index >= crate::FILTER_COUNT {
                #[cfg(feature = "trace")]
                tracing::trace!(filter_index, ident, "suppressing stale wake token");
                return Ok(Vec::new());
            }
            table.by_index(filter_index).copyout(agg, ident)
        }
        Token::Io {
            overlapped,
            transferred,
            result,
        } => table.io_copyout(agg, overlapped, transferred, result),
    }
}
