//! `EVFILT_PROC`, best-effort.
//!
//! Only `NOTE_EXIT` is supported, via `pidfd` (Linux 5.3+): a pidfd becomes
//! readable exactly once, when the process exits, which is registered
//! directly in the epoll aggregator like any other single-fd filter. Any
//! other requested sub-note (`NOTE_FORK`, `NOTE_EXEC`, ...) is silently
//! dropped from the reported `fflags` — there is no portable Linux signal
//! for them outside `ptrace`.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};

use rustix::process::{pidfd_open, Pid, PidfdFlags};

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::unix::aggregator::Aggregator;
use crate::sys::unix::filter::{Disposal, Filter};
use crate::sys::unix::knote::KnoteStore;

const PROC_FILTER_INDEX: usize = 3;

struct ProcKnote {
    fd: OwnedFd,
    enabled: AtomicBool,
    oneshot: bool,
    dispatch: bool,
}

pub(crate) struct ProcFilter {
    knotes: KnoteStore<ProcKnote>,
}

impl ProcFilter {
    pub(crate) fn new() -> Self {
        ProcFilter {
            knotes: KnoteStore::new(),
        }
    }
}

impl Filter for ProcFilter {
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()> {
        if change.fflags & !crate::NOTE_EXIT != 0 && change.fflags & crate::NOTE_EXIT == 0 {
            // Only NOTE_EXIT is supported; a change that asks exclusively
            // for something else has nothing this filter can deliver.
            return Err(io::Error::from_raw_os_error(errno::EINVAL));
        }

        if change.is_delete() {
            let knote = self.knotes.remove(change.ident)?;
            agg.deregister(knote.fd.as_raw_fd())?;
            return Ok(());
        }

        if change.is_enable() || change.is_disable() {
            let knote = self
                .knotes
                .get(change.ident)
                .ok_or_else(|| io::Error::from_raw_os_error(errno::ENOENT))?;
            knote.enabled.store(change.is_enable(), Ordering::Release);
            return Ok(());
        }

        if change.is_add() {
            if change.ident == 0 || change.ident > i32::MAX as u64 {
                return Err(io::Error::from_raw_os_error(errno::EINVAL));
            }
            let pid = Pid::from_raw(change.ident as i32)
                .ok_or_else(|| io::Error::from_raw_os_error(errno::EINVAL))?;
            let fd = pidfd_open(pid, PidfdFlags::empty())?;
            agg.register(fd.as_raw_fd(), PROC_FILTER_INDEX, change.ident, false)?;
            self.knotes.insert_new(
                change.ident,
                ProcKnote {
                    fd,
                    enabled: AtomicBool::new(true),
                    oneshot: change.is_oneshot(),
                    dispatch: change.is_dispatch(),
                },
            )?;
            return Ok(());
        }

        Err(io::Error::from_raw_os_error(errno::EINVAL))
    }

    fn copyout(&self, _agg: &Aggregator, ident: u64) -> io::Result<Vec<(Kevent, Disposal)>> {
        let knote = match self.knotes.get(ident) {
            Some(k) => k,
            None => return Ok(Vec::new()),
        };
        if !knote.enabled.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }

        let disposal = if knote.oneshot {
            Disposal::Delete
        } else if knote.dispatch {
            Disposal::Disable
        } else {
            // EVFILT_PROC/NOTE_EXIT is inherently one-shot (a pid does not
            // exit twice); default to deleting even without an explicit
            // EV_ONESHOT, matching BSD kqueue(2)'s own documented behavior.
            Disposal::Delete
        };

        Ok(vec![(
            Kevent {
                ident,
                filter: crate::EVFILT_PROC,
                flags: 0,
                fflags: crate::NOTE_EXIT,
                data: 0,
                udata: 0,
            },
            disposal,
        )])
    }

    fn disable(&self, _agg: &Aggregator, ident: u64) -> io::Result<()> {
        if let Some(knote) = self.knotes.get(ident) {
            knote.enabled.store(false, Ordering::Release);
        }
        Ok(())
    }

    fn delete(&self, agg: &Aggregator, ident: u64) -> io::Result<()> {
        if let Some(knote) = self.knotes.remove_if_present(ident) {
            agg.deregister(knote.fd.as_raw_fd())?;
        }
        Ok(())
    }

    fn teardown_all(&self, agg: &Aggregator) {
        for knote in self.knotes.drain() {
            let _ = agg.deregister(knote.fd.as_raw_fd());
        }
    }
}
