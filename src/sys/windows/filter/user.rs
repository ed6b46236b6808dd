//! `EVFILT_USER`.
//!
//! No OS resource backs a user knote on this backend either; readiness is
//! software state, triggered by a change carrying `NOTE_TRIGGER`. In place
//! of the shared-eventfd trick `sys::unix::filter::user` uses to fold that
//! software readiness into `epoll_wait`, this filter posts a synthetic
//! completion straight to the I/O completion port via
//! [`Aggregator::post_filter`] — IOCP has no analogous need for a dummy
//! handle, since `PostQueuedCompletionStatus` already queues a completion
//! out of thin air.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::windows::filter::{Disposal, Filter};
use crate::sys::windows::iocp::Aggregator;
use crate::sys::windows::knote::KnoteStore;

const USER_FILTER_INDEX: usize = 6;

struct UserKnote {
    enabled: AtomicBool,
    oneshot: bool,
    dispatch: bool,
    clear: bool,
    fflags: AtomicU32,
    triggered: AtomicBool,
}

fn combine_fflags(existing: u32, incoming: u32) -> u32 {
    let value = incoming & crate::NOTE_FFLAGSMASK;
    match incoming & crate::NOTE_FFCTRLMASK {
        crate::NOTE_FFAND => existing & value,
        crate::NOTE_FFOR => existing | value,
        crate::NOTE_FFCOPY => value,
        _ => existing,
    }
}

pub(crate) struct UserFilter {
    knotes: KnoteStore<UserKnote>,
}

impl UserFilter {
    pub(crate) fn new() -> Self {
        UserFilter {
            knotes: KnoteStore::new(),
        }
    }

    fn trigger(&self, agg: &Aggregator, ident: u64) -> io::Result<()> {
        if let Some(knote) = self.knotes.get(ident) {
            knote.triggered.store(true, Ordering::Release);
        }
        agg.post_filter(USER_FILTER_INDEX, ident)
    }
}

impl Filter for UserFilter {
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()> {
        let ident = change.ident;

        if change.is_delete() {
            self.knotes.remove(ident)?;
            return Ok(());
        }

        if change.is_add() {
            if self.knotes.get(ident).is_some() {
                return Err(io::Error::from_raw_os_error(errno::EEXIST));
            }
            self.knotes.insert_new(
                ident,
                UserKnote {
                    enabled: AtomicBool::new(true),
                    oneshot: change.is_oneshot(),
                    dispatch: change.is_dispatch(),
                    clear: change.is_clear(),
                    fflags: AtomicU32::new(combine_fflags(0, change.fflags)),
                    triggered: AtomicBool::new(false),
                },
            )?;
            if change.fflags & crate::NOTE_TRIGGER != 0 {
                self.trigger(agg, ident)?;
            }
            return Ok(());
        }

        let knote = self
            .knotes
            .get(ident)
            .ok_or_else(|| io::Error::from_raw_os_error(errno::ENOENT))?;
        if change.is_enable() {
            knote.enabled.store(true, Ordering::Release);
        }
        if change.is_disable() {
            knote.enabled.store(false, Ordering::Release);
        }
        knote
            .fflags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                Some(combine_fflags(old, change.fflags))
            })
            .ok();
        if change.fflags & crate::NOTE_TRIGGER != 0 {
            self.trigger(agg, ident)?;
        }
        Ok(())
    }

    fn copyout(&self, _agg: &Aggregator, ident: u64) -> io::Result<Vec<(Kevent, Disposal)>> {
        let knote = match self.knotes.get(ident) {
            Some(k) => k,
            None => return Ok(Vec::new()),
        };
        if !knote.enabled.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }
        let was_triggered = if knote.clear {
            knote.triggered.swap(false, Ordering::AcqRel)
        } else {
            knote.triggered.load(Ordering::Acquire)
        };
        if !was_triggered {
            return Ok(Vec::new());
        }
        let disposal = if knote.oneshot {
            Disposal::Delete
        } else if knote.dispatch {
            Disposal::Disable
        } else {
            Disposal::None
        };
        Ok(vec![(
            Kevent {
                ident,
                filter: crate::EVFILT_USER,
                flags: 0,
                fflags: knote.fflags.load(Ordering::Acquire) & crate::NOTE_FFLAGSMASK,
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

    fn delete(&self, _agg: &Aggregator, ident: u64) -> io::Result<()> {
        self.knotes.remove_if_present(ident);
        Ok(())
    }

    fn teardown_all(&self, _agg: &Aggregator) {
        self.knotes.drain();
    }
}
