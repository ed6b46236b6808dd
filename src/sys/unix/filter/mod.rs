//! The filter contract and the dispatch table that routes a change by its
//! `EVFILT_*` tag to the module that owns that event class.

mod proc_;
mod read_write;
mod signal;
mod timer;
mod user;
mod vnode;

use std::io;
use std::sync::Arc;

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::unix::aggregator::{Aggregator, Token};

/// What the generic dispatch loop does to a knote after delivering one of
/// its events during copyout: a knote carrying `EV_DISPATCH` is disabled,
/// one carrying `EV_ONESHOT` is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposal {
    /// Leave the knote armed as-is.
    None,
    /// `EV_DISPATCH`: disable without destroying the OS resource.
    Disable,
    /// `EV_ONESHOT`: tear down and remove.
    Delete,
}

/// Every filter module implements the same small contract. `ident` is
/// always the ident of the knote the call concerns; the filter looks it up
/// in its own store under its own lock, never the reverse order (filter
/// lock, then knote lock).
pub(crate) trait Filter: Send + Sync {
    /// Interprets one change-list entry's `flags` (ADD/DELETE/ENABLE/
    /// DISABLE) against this filter's knote store.
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()>;

    /// Translates ready native state into zero or more BSD events for this
    /// ident, paired with what the dispatch loop should do to the knote
    /// afterwards. An empty vec means suppress (stale token, disarmed
    /// knote, an already-delivered oneshot). Read/write never reaches this
    /// — its readiness is demultiplexed through [`FilterTable::io_copyout`]
    /// instead, since epoll allows only one registration per fd.
    fn copyout(&self, agg: &Aggregator, ident: u64) -> io::Result<Vec<(Kevent, Disposal)>>;

    /// Disables a knote after delivery (`EV_DISPATCH`) or an explicit
    /// `EV_DISABLE` change.
    fn disable(&self, agg: &Aggregator, ident: u64) -> io::Result<()>;

    /// Deletes a knote after delivery (`EV_ONESHOT`) or explicit `DELETE`.
    fn delete(&self, agg: &Aggregator, ident: u64) -> io::Result<()>;

    /// Tears down every remaining knote, releasing OS resources. Called
    /// once, from kqueue teardown.
    fn teardown_all(&self, agg: &Aggregator);
}

/// One slot per `EVFILT_*` tag (`crate::FILTER_COUNT`), in the order
/// `crate::filter_index` assigns: read, write, vnode, proc, signal, timer,
/// user.
pub(crate) struct FilterTable {
    filters: [Box<dyn Filter>; crate::FILTER_COUNT],
    io: Arc<read_write::IoTable>,
}

impl FilterTable {
    pub(crate) fn new() -> Self {
        let io = Arc::new(read_write::IoTable::new());
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
                Box::new(vnode::VnodeFilter::new()),
                Box::new(proc_::ProcFilter::new()),
                Box::new(signal::SignalFilter::new()),
                Box::new(timer::TimerFilter::new()),
                Box::new(user::UserFilter::new()),
            ],
            io,
        }
    }

    /// Resolves an `EVFILT_*` tag to its filter, or `EINVAL` for a filter
    /// this crate does not implement.
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

    /// Demultiplexes one combined read/write wake into the (up to two)
    /// BSD events it represents.
    pub(crate) fn io_copyout(
        &self,
        agg: &Aggregator,
        fd: std::os::fd::RawFd,
        raw_events: u32,
    ) -> io::Result<Vec<(Kevent, Disposal)>> {
        self.io.copyout(agg, fd, raw_events)
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
        Token::Filter {
            filter_index,
            ident,
            ..
        } => {
            if filter_index >= crate::FILTER_COUNT {
                #[cfg(feature = "trace")]
                tracing::trace!(filter_index, ident, "suppressing stale wake token");
                return Ok(Vec::new());
            }
            table.by_index(filter_index).copyout(agg, ident)
        }
        Token::Io { fd, raw_events } => table.io_copyout(agg, fd, raw_events),
    }
}
