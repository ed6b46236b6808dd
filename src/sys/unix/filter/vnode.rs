//! `EVFILT_VNODE`.
//!
//! Backed by `inotify`. A BSD vnode knote's `ident` is an open file
//! descriptor on the watched path; Linux's `inotify_add_watch` wants a
//! path, not an fd, so this filter resolves one via the `/proc/self/fd/`
//! magic symlink — the same trick `libkqueue` uses for the same reason.
//! One shared `inotify` instance serves every vnode knote on a kqueue,
//! mirroring how the signal filter shares one `signalfd`.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use rustix::fs::inotify;

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::unix::aggregator::Aggregator;
use crate::sys::unix::filter::{Disposal, Filter};
use crate::sys::unix::knote::KnoteStore;

const VNODE_FILTER_INDEX: usize = 2;
const SHARED_IDENT: u64 = 0;

struct VnodeKnote {
    wd: i32,
    enabled: AtomicBool,
    oneshot: bool,
    dispatch: bool,
    /// The subset of `NOTE_*` bits the caller asked to hear about.
    interest: AtomicU32,
    deleted: AtomicBool,
}

fn inotify_mask(interest: u32) -> inotify::WatchFlags {
    let mut mask = inotify::WatchFlags::empty();
    if interest & crate::NOTE_DELETE != 0 {
        mask |= inotify::WatchFlags::DELETE_SELF;
    }
    if interest & crate::NOTE_WRITE != 0 || interest & crate::NOTE_EXTEND != 0 {
        mask |= inotify::WatchFlags::MODIFY;
    }
    if interest & crate::NOTE_ATTRIB != 0 || interest & crate::NOTE_LINK != 0 {
        mask |= inotify::WatchFlags::ATTRIB;
    }
    if interest & crate::NOTE_RENAME != 0 {
        mask |= inotify::WatchFlags::MOVE_SELF;
    }
    if interest & crate::NOTE_REVOKE != 0 {
        mask |= inotify::WatchFlags::UNMOUNT;
    }
    mask
}

fn bsd_notes(native: inotify::ReadFlags, interest: u32) -> u32 {
    let mut notes = 0u32;
    if native.contains(inotify::ReadFlags::DELETE_SELF) || native.contains(inotify::ReadFlags::IGNORED) {
        notes |= crate::NOTE_DELETE;
    }
    if native.contains(inotify::ReadFlags::MODIFY) {
        notes |= crate::NOTE_WRITE | (interest & crate::NOTE_EXTEND);
    }
    if native.contains(inotify::ReadFlags::ATTRIB) {
        notes |= crate::NOTE_ATTRIB | (interest & crate::NOTE_LINK);
    }
    if native.contains(inotify::ReadFlags::MOVE_SELF) {
        notes |= crate::NOTE_RENAME;
    }
    if native.contains(inotify::ReadFlags::UNMOUNT) {
        notes |= crate::NOTE_REVOKE;
    }
    notes & interest
}

pub(crate) struct VnodeFilter {
    fd: Mutex<Option<OwnedFd>>,
    knotes: KnoteStore<VnodeKnote>,
    /// inotify watch descriptor -> the user's vnode ident (the fd they
    /// registered), since inotify events carry the former but this
    /// filter's knote store (and every other filter's) is keyed by ident.
    wd_to_ident: Mutex<HashMap<i32, u64>>,
}

impl VnodeFilter {
    pub(crate) fn new() -> Self {
        VnodeFilter {
            fd: Mutex::new(None),
            knotes: KnoteStore::new(),
            wd_to_ident: Mutex::new(HashMap::new()),
        }
    }

    fn ensure_fd(&self, agg: &Aggregator) -> io::Result<RawFd> {
        let mut guard = self.fd.lock().unwrap();
        if let Some(fd) = guard.as_ref() {
            return Ok(fd.as_raw_fd());
        }
        let fd = inotify::init(inotify::CreateFlags::CLOEXEC | inotify::CreateFlags::NONBLOCK)?;
        let raw = fd.as_raw_fd();
        agg.register(raw, VNODE_FILTER_INDEX, SHARED_IDENT, false)?;
        *guard = Some(fd);
        Ok(raw)
    }
}

impl Filter for VnodeFilter {
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()> {
        let ident = change.ident;

        if change.is_delete() {
            let knote = self.knotes.remove(ident)?;
            if !knote.deleted.load(Ordering::Acquire) {
                let guard = self.fd.lock().unwrap();
                if let Some(fd) = guard.as_ref() {
                    let _ = inotify::remove_watch(fd, knote.wd);
                }
            }
            self.wd_to_ident.lock().unwrap().remove(&knote.wd);
            return Ok(());
        }

        if change.is_enable() || change.is_disable() {
            let knote = self
                .knotes
                .get(ident)
                .ok_or_else(|| io::Error::from_raw_os_error(errno::ENOENT))?;
            knote.enabled.store(change.is_enable(), Ordering::Release);
            return Ok(());
        }

        if change.is_add() {
            let raw = ensure_watch_target(ident as RawFd)?;
            let fd_raw = self.ensure_fd(agg)?;
            let fd_borrow = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd_raw) };
            let wd = inotify::add_watch(fd_borrow, &raw, inotify_mask(change.fflags))?;
            self.wd_to_ident.lock().unwrap().insert(wd, ident);
            self.knotes.insert_new(
                ident,
                VnodeKnote {
                    wd,
                    enabled: AtomicBool::new(true),
                    oneshot: change.is_oneshot(),
                    dispatch: change.is_dispatch(),
                    interest: AtomicU32::new(change.fflags),
                    deleted: AtomicBool::new(false),
                },
            )?;
            return Ok(());
        }

        Err(io::Error::from_raw_os_error(errno::EINVAL))
    }

    fn copyout(&self, _agg: &Aggregator, _ident: u64) -> io::Result<Vec<(Kevent, Disposal)>> {
        let fd_raw = {
            let guard = self.fd.lock().unwrap();
            match guard.as_ref() {
                Some(fd) => fd.as_raw_fd(),
                None => return Ok(Vec::new()),
            }
        };
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd_raw) };

        let mut buf = [0u8; 4096];
        let events = match inotify::read(borrowed, &mut buf) {
            Ok(events) => events,
            Err(e) if e == rustix::io::Errno::AGAIN => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for ev in events {
            let wd = ev.wd() as i32;
            let ident = match self.wd_to_ident.lock().unwrap().get(&wd).copied() {
                Some(i) => i,
                None => continue,
            };
            let knote = match self.knotes.get(ident) {
                Some(k) => k,
                None => continue,
            };
            if !knote.enabled.load(Ordering::Acquire) {
                continue;
            }
            let interest = knote.interest.load(Ordering::Acquire);
            let notes = bsd_notes(ev.events(), interest);
            if notes == 0 {
                continue;
            }

            let is_delete = notes & crate::NOTE_DELETE != 0;
            if is_delete {
                knote.deleted.store(true, Ordering::Release);
                knote.enabled.store(false, Ordering::Release);
            }

            let disposal = if is_delete {
                // A watched path whose inode vanishes yields NOTE_DELETE
                // exactly once and the knote is auto-disabled, not deleted
                // outright, unlike EV_ONESHOT.
                Disposal::Disable
            } else if knote.oneshot {
                Disposal::Delete
            } else if knote.dispatch {
                Disposal::Disable
            } else {
                Disposal::None
            };

            out.push((
                Kevent {
                    ident,
                    filter: crate::EVFILT_VNODE,
                    flags: 0,
                    fflags: notes,
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

    fn delete(&self, agg: &Aggregator, ident: u64) -> io::Result<()> {
        let change = Kevent {
            ident,
            filter: crate::EVFILT_VNODE,
            flags: crate::EV_DELETE,
            fflags: 0,
            data: 0,
            udata: 0,
        };
        self.apply_change(agg, &change)
    }

    fn teardown_all(&self, agg: &Aggregator) {
        for ident in self.knotes.snapshot_idents() {
            let _ = self.delete(agg, ident);
        }
        let mut guard = self.fd.lock().unwrap();
        if let Some(fd) = guard.take() {
            let _ = agg.deregister(fd.as_raw_fd());
        }
    }
}

/// Resolves the path Linux's `inotify_add_watch` needs for a bare fd,
/// through the `/proc/self/fd/N` magic symlink.
fn ensure_watch_target(fd: RawFd) -> io::Result<std::path::PathBuf> {
    let path = format!("/proc/self/fd/{fd}");
    if !std::path::Path::new(&path).exists() {
        return Err(io::Error::from_raw_os_error(errno::EBADF));
    }
    Ok(std::path::PathBuf::from(path))
}
