//! Stand-in for the filters this backend does not implement:
//! `EVFILT_VNODE`, `EVFILT_PROC`, `EVFILT_SIGNAL`. Windows has no single
//! primitive as directly analogous as `inotify`/`pidfd`/`signalfd` are on
//! Linux, and the spec's own framing leaves this path secondary, so rather
//! than fake a partial implementation every `ADD` just fails with `EINVAL`,
//! the same answer a caller gets from a BSD kqueue for a filter tag it
//! doesn't recognize.

use std::io;

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::windows::filter::{Disposal, Filter};
use crate::sys::windows::iocp::Aggregator;

pub(crate) struct NotImplementedFilter {
    #[allow(dead_code)]
    filter: i16,
}

impl NotImplementedFilter {
    pub(crate) fn new(filter: i16) -> Self {
        NotImplementedFilter { filter }
    }
}

impl Filter for NotImplementedFilter {
    fn apply_change(&self, _agg: &Aggregator, _change: &Kevent) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(errno::EINVAL))
    }

    fn copyout(&self, _agg: &Aggregator, _ident: u64) -> io::Result<Vec<(Kevent, Disposal)>> {
        Ok(Vec::new())
    }

    fn disable(&self, _agg: &Aggregator, _ident: u64) -> io::Result<()> {
        Ok(())
    }

    fn delete(&self, _agg: &Aggregator, _ident: u64) -> io::Result<()> {
        Ok(())
    }

    fn teardown_all(&self, _agg: &Aggregator) {}
}
