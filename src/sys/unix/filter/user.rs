//! `EVFILT_USER`.
//!
//! No OS resource backs a user knote; readiness is purely software state,
//! triggered by a change carrying `NOTE_TRIGGER` on the same ident. One
//! shared `eventfd` per kqueue makes that software readiness visible to the
//! aggregator's `epoll_wait`, the same "virtual fd" trick the signal and
//! vnode filters use to fold a many-knotes-behind-one-fd relationship into
//! the aggregator.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use rustix::event::{eventfd, EventfdFlags};

use crate::event::Kevent;
use crate::sys::unix::aggregator::Aggregator;
use crate::sys::unix::filter::{Disposal, Filter};
use crate::sys::unix::knote::KnoteStore;

const USER_FILTER_INDEX: usize = 6;
const SHARED_IDENT: u64 = 0;

struct UserKnote {
    enabled: AtomicBool,
    oneshot: AtomicBool,
    dispatch: AtomicBool,
    clear: AtomicBool,
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
    fd: Mutex<Option<OwnedFd>>,
    knotes: KnoteStore<UserKnote>,
}

impl UserFilter {
    pub(crate) fn new() -> Self {
        UserFilter {
            fd: Mutex::new(None),
            knotes: KnoteStore::new(),
        }
    }

    fn ensure_fd(&self, agg: &Aggregator) -> io::Result<OwnedFd> {
        let mut guard = self.fd.lock().unwrap();
        if let Some(fd) = guard.as_ref() {
            return fd.try_clone();
        }
        let fd = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?;
        agg.register(fd.as_raw_fd(), USER_FILTER_INDEX, SHARED_IDENT, false)?;
        let clone = fd.try_clone()?;
        *guard = Some(fd);
        Ok(clone)
    }

    fn ring(&self) {
        let guard = self.fd.lock().unwrap();
        if let Some(fd) = guard.as_ref() {
            let one: u64 = 1;
            let _ = rustix::io::write(fd, &one.to_ne_bytes());
        }
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
            self.ensure_fd(agg)?;
            // A re-ADD of an existing ident merges into the knote already
            // there rather than failing with EEXIST, matching real
            // kevent(2) EVFILT_USER semantics: the behavior/fflags
            // attributes on the change update the live knote in place.
            let (knote, created) = self.knotes.get_or_insert_with(ident, || {
                Ok(UserKnote {
                    enabled: AtomicBool::new(true),
                    oneshot: AtomicBool::new(change.is_oneshot()),
                    dispatch: AtomicBool::new(change.is_dispatch()),
                    clear: AtomicBool::new(change.is_clear()),
                    fflags: AtomicU32::new(combine_fflags(0, change.fflags)),
                    triggered: AtomicBool::new(false),
                })
            })?;
            if !created {
                knote.oneshot.store(change.is_oneshot(), Ordering::Release);
                knote.dispatch.store(change.is_dispatch(), Ordering::Release);
                knote.clear.store(change.is_clear(), Ordering::Release);
                knote.enabled.store(true, Ordering::Release);
                knote
                    .fflags
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                        Some(combine_fflags(old, change.fflags))
                    })
                    .ok();
            }
            if change.fflags & crate::NOTE_TRIGGER != 0 {
                self.trigger(ident)?;
            }
            return Ok(());
        }

        // A bare ENABLE/DISABLE, or a control-only change that just
        // updates fflags/trigger on an existing knote (BSD allows
        // EVFILT_USER changes without ADD/DELETE for exactly this).
        let knote = self
            .knotes
            .get(ident)
            .ok_or_else(|| io::Error::from_raw_os_error(crate::error::errno::ENOENT))?;
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
            self.trigger(ident)?;
        }
        Ok(())
    }

    fn copyout(&self, _agg: &Aggregator, _ident: u64) -> io::Result<Vec<(Kevent, Disposal)>> {
        {
            let guard = self.fd.lock().unwrap();
            if let Some(fd) = guard.as_ref() {
                let mut buf = [0u8; 8];
                let _ = rustix::io::read(fd, &mut buf);
            }
        }

        let mut out = Vec::new();
        for (ident, knote) in self.knotes.snapshot() {
            if !knote.enabled.load(Ordering::Acquire) {
                continue;
            }
            let clear = knote.clear.load(Ordering::Acquire);
            let was_triggered = if clear {
                knote.triggered.swap(false, Ordering::AcqRel)
            } else {
                knote.triggered.load(Ordering::Acquire)
            };
            if !was_triggered {
                continue;
            }
            let disposal = if knote.oneshot.load(Ordering::Acquire) {
                Disposal::Delete
            } else if knote.dispatch.load(Ordering::Acquire) {
                Disposal::Disable
            } else {
                Disposal::None
            };
            out.push((
                Kevent {
                    ident,
                    filter: crate::EVFILT_USER,
                    flags: 0,
                    fflags: knote.fflags.load(Ordering::Acquire) & crate::NOTE_FFLAGSMASK,
                    data: 0,
                    udata: 0,
                },
                disposal,
            ));
        }
        Ok(out)
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

    fn teardown_all(&self, agg: &Aggregator) {
        self.knotes.drain();
        let mut guard = self.fd.lock().unwrap();
        if let Some(fd) = guard.take() {
            let _ = agg.deregister(fd.as_raw_fd());
        }
    }
}

impl UserFilter {
    fn trigger(&self, ident: u64) -> io::Result<()> {
        if let Some(knote) = self.knotes.get(ident) {
            knote.triggered.store(true, Ordering::Release);
        }
        self.ring();
        Ok(())
    }
}
