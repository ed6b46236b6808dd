//! `EVFILT_READ` / `EVFILT_WRITE`.
//!
//! Both filters share one epoll registration per fd — epoll allows only a
//! single registration per fd, so a caller that adds both a read and a
//! write knote on the same fd (a common pattern for a socket) is folded
//! into one [`IoRegistration`] here and demultiplexed back into up to two
//! `Kevent`s at copyout.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rustix::event::epoll;

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::unix::aggregator::{Aggregator, Interest};
use crate::sys::unix::filter::{Disposal, Filter};
use crate::sys::unix::platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

struct IoKnote {
    enabled: AtomicBool,
    oneshot: bool,
    dispatch: bool,
    /// Selects `EPOLLET` on the shared registration: `EV_CLEAR` selects
    /// edge-triggered semantics. With `EPOLLET` set, epoll itself
    /// only wakes on a state transition, so no extra per-knote "already
    /// delivered this edge" bookkeeping is needed here.
    clear: bool,
}

impl IoKnote {
    fn new(change: &Kevent) -> Self {
        IoKnote {
            enabled: AtomicBool::new(true),
            oneshot: change.is_oneshot(),
            dispatch: change.is_dispatch(),
            clear: change.is_clear(),
        }
    }
}

#[derive(Default)]
struct IoRegistration {
    read: Mutex<Option<Arc<IoKnote>>>,
    write: Mutex<Option<Arc<IoKnote>>>,
    /// Whether this fd has already been `EPOLL_CTL_ADD`ed, so
    /// `sync_registration` knows whether the next call is an add or a
    /// modify. Distinct from "present in `IoTable::regs`" — that map entry
    /// is created on first `reg_for` lookup, before the epoll call happens.
    epoll_added: AtomicBool,
}

impl IoRegistration {
    fn interest(&self) -> Interest {
        let read = self.read.lock().unwrap();
        let write = self.write.lock().unwrap();
        let readable = read.as_ref().is_some_and(|k| k.enabled.load(Ordering::Acquire));
        let writable = write.as_ref().is_some_and(|k| k.enabled.load(Ordering::Acquire));
        let edge = read.as_ref().is_some_and(|k| k.clear) || write.as_ref().is_some_and(|k| k.clear);
        Interest {
            readable,
            writable,
            edge,
        }
    }

    fn is_empty(&self) -> bool {
        self.read.lock().unwrap().is_none() && self.write.lock().unwrap().is_none()
    }
}

/// Shared by both the read and the write [`ReadWriteFilter`] instances,
/// since they must agree on a single epoll registration per fd.
pub(crate) struct IoTable {
    regs: Mutex<HashMap<RawFd, Arc<IoRegistration>>>,
}

impl IoTable {
    pub(crate) fn new() -> Self {
        IoTable {
            regs: Mutex::new(HashMap::new()),
        }
    }

    fn reg_for(&self, fd: RawFd) -> Arc<IoRegistration> {
        self.regs
            .lock()
            .unwrap()
            .entry(fd)
            .or_insert_with(|| Arc::new(IoRegistration::default()))
            .clone()
    }

    fn slot<'a>(reg: &'a IoRegistration, direction: Direction) -> &'a Mutex<Option<Arc<IoKnote>>> {
        match direction {
            Direction::Read => &reg.read,
            Direction::Write => &reg.write,
        }
    }

    fn apply_change(
        &self,
        agg: &Aggregator,
        direction: Direction,
        change: &Kevent,
    ) -> io::Result<()> {
        let fd = change.ident as RawFd;

        if change.is_delete() {
            let reg = self.reg_for(fd);
            let existed = Self::slot(&reg, direction).lock().unwrap().take().is_some();
            if !existed {
                self.drop_if_unused(fd, &reg);
                return Err(io::Error::from_raw_os_error(errno::ENOENT));
            }
            self.sync_registration(agg, fd, &reg)?;
            self.drop_if_unused(fd, &reg);
            return Ok(());
        }

        if change.is_enable() || change.is_disable() {
            let reg = self.reg_for(fd);
            let slot = Self::slot(&reg, direction).lock().unwrap();
            let knote = slot.as_ref().ok_or_else(|| io::Error::from_raw_os_error(errno::ENOENT))?;
            knote
                .enabled
                .store(change.is_enable(), Ordering::Release);
            drop(slot);
            return self.sync_registration(agg, fd, &reg);
        }

        if change.is_add() {
            let reg = self.reg_for(fd);
            let mut slot = Self::slot(&reg, direction).lock().unwrap();
            if slot.is_some() {
                return Err(io::Error::from_raw_os_error(errno::EEXIST));
            }
            *slot = Some(Arc::new(IoKnote::new(change)));
            drop(slot);
            return self.sync_registration(agg, fd, &reg);
        }

        Err(io::Error::from_raw_os_error(errno::EINVAL))
    }

    fn sync_registration(&self, agg: &Aggregator, fd: RawFd, reg: &IoRegistration) -> io::Result<()> {
        let already_had_any =
            reg.read.lock().unwrap().is_some() || reg.write.lock().unwrap().is_some();
        if !already_had_any {
            reg.epoll_added.store(false, Ordering::Release);
            return agg.deregister(fd);
        }
        let was_registered = reg.epoll_added.swap(true, Ordering::AcqRel);
        agg.register_io(fd, reg.interest(), was_registered)
    }

    fn drop_if_unused(&self, fd: RawFd, reg: &IoRegistration) {
        if reg.is_empty() {
            self.regs.lock().unwrap().remove(&fd);
        }
    }

    pub(crate) fn copyout(
        &self,
        _agg: &Aggregator,
        fd: RawFd,
        raw_events: u32,
    ) -> io::Result<Vec<(Kevent, Disposal)>> {
        let reg = match self.regs.lock().unwrap().get(&fd).cloned() {
            Some(reg) => reg,
            None => return Ok(Vec::new()),
        };

        let flags = epoll::EventFlags::from_bits_truncate(raw_events);
        let hup = flags.intersects(epoll::EventFlags::HUP | epoll::EventFlags::RDHUP);
        let err = flags.contains(epoll::EventFlags::ERR);

        let mut out = Vec::with_capacity(2);

        if flags.intersects(epoll::EventFlags::IN) || hup || err {
            if let Some(kev) = self.copyout_one(fd, &reg, Direction::Read, hup, err)? {
                out.push(kev);
            }
        }
        if flags.intersects(epoll::EventFlags::OUT) || err {
            if let Some(kev) = self.copyout_one(fd, &reg, Direction::Write, hup, err)? {
                out.push(kev);
            }
        }

        Ok(out)
    }

    fn copyout_one(
        &self,
        fd: RawFd,
        reg: &IoRegistration,
        direction: Direction,
        hup: bool,
        err: bool,
    ) -> io::Result<Option<(Kevent, Disposal)>> {
        let slot = Self::slot(reg, direction).lock().unwrap();
        let knote = match slot.as_ref() {
            Some(k) => k.clone(),
            None => return Ok(None),
        };
        if !knote.enabled.load(Ordering::Acquire) {
            return Ok(None);
        }
        drop(slot);

        let eof = match direction {
            Direction::Read => hup || (!platform::peer_close_hup_trusted() && zero_length_peek(fd)),
            Direction::Write => err || hup,
        };

        let data = match direction {
            Direction::Read => bytes_available(fd).unwrap_or(0),
            Direction::Write => bytes_free_to_write(fd),
        };

        let filter_tag = match direction {
            Direction::Read => crate::EVFILT_READ,
            Direction::Write => crate::EVFILT_WRITE,
        };

        let mut out_flags = 0u16;
        if eof {
            out_flags |= crate::EV_EOF;
        }

        let disposal = if knote.oneshot {
            Disposal::Delete
        } else if knote.dispatch {
            Disposal::Disable
        } else {
            Disposal::None
        };

        Ok(Some((
            Kevent {
                ident: fd as u64,
                filter: filter_tag,
                flags: out_flags,
                fflags: 0,
                data,
                udata: 0,
            },
            disposal,
        )))
    }

    pub(crate) fn teardown_all(&self, agg: &Aggregator) {
        let fds: Vec<RawFd> = self.regs.lock().unwrap().keys().copied().collect();
        for fd in fds {
            let _ = agg.deregister(fd);
        }
        self.regs.lock().unwrap().clear();
    }

    fn disable(&self, agg: &Aggregator, direction: Direction, fd: RawFd) -> io::Result<()> {
        let reg = self.reg_for(fd);
        if let Some(knote) = Self::slot(&reg, direction).lock().unwrap().as_ref() {
            knote.enabled.store(false, Ordering::Release);
        }
        self.sync_registration(agg, fd, &reg)
    }

    fn delete(&self, agg: &Aggregator, direction: Direction, fd: RawFd) -> io::Result<()> {
        let reg = self.reg_for(fd);
        *Self::slot(&reg, direction).lock().unwrap() = None;
        self.sync_registration(agg, fd, &reg)?;
        self.drop_if_unused(fd, &reg);
        Ok(())
    }
}

/// Zero-length `MSG_PEEK`, the fallback peer-close detector validated at
/// startup by [`platform::peer_close_hup_trusted`].
fn zero_length_peek(fd: RawFd) -> bool {
    unsafe {
        let mut buf = [0u8; 1];
        let n = libc::recv(
            fd,
            buf.as_mut_ptr() as *mut _,
            buf.len(),
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        );
        n == 0
    }
}

fn bytes_available(fd: RawFd) -> io::Result<i64> {
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    rustix::io::ioctl_fionread(borrowed)
        .map(|n| n as i64)
        .map_err(io::Error::from)
}

/// Send-buffer free space: `SO_SNDBUF` minus whatever is already queued for
/// send (`SIOCOUTQ`), the write-side counterpart of `bytes_available`'s
/// `FIONREAD`. Neither `getsockopt` nor `SIOCOUTQ` has a `rustix` binding, so
/// this goes through `libc` directly, same as `signal.rs`'s `signalfd` call.
/// A plain pipe/fd (not a socket) fails one or both calls; `1` is the BSD
/// kqueue(2) fallback for "writable, exact count unknown".
fn bytes_free_to_write(fd: RawFd) -> i64 {
    let sndbuf: Option<libc::c_int> = unsafe {
        let mut val: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &mut val as *mut _ as *mut libc::c_void,
            &mut len,
        );
        (rc == 0).then_some(val)
    };
    let queued: Option<libc::c_int> = unsafe {
        let mut val: libc::c_int = 0;
        let rc = libc::ioctl(fd, libc::SIOCOUTQ, &mut val as *mut libc::c_int);
        (rc == 0).then_some(val)
    };
    match (sndbuf, queued) {
        (Some(total), Some(used)) => (total - used).max(0) as i64,
        _ => 1,
    }
}

pub(crate) struct ReadWriteFilter {
    io: Arc<IoTable>,
    direction: Direction,
}

impl ReadWriteFilter {
    pub(crate) fn new(io: Arc<IoTable>, direction: Direction) -> Self {
        ReadWriteFilter { io, direction }
    }
}

impl Filter for ReadWriteFilter {
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()> {
        self.io.apply_change(agg, self.direction, change)
    }

    fn copyout(&self, _agg: &Aggregator, _ident: u64) -> io::Result<Vec<(Kevent, Disposal)>> {
        // Read/write readiness is demultiplexed by `FilterTable::io_copyout`
        // directly from the aggregator's `Token::Io`, never through this
        // per-direction entry point.
        Ok(Vec::new())
    }

    fn disable(&self, agg: &Aggregator, ident: u64) -> io::Result<()> {
        self.io.disable(agg, self.direction, ident as RawFd)
    }

    fn delete(&self, agg: &Aggregator, ident: u64) -> io::Result<()> {
        self.io.delete(agg, self.direction, ident as RawFd)
    }

    fn teardown_all(&self, _agg: &Aggregator) {
        // Actual teardown happens once via `FilterTable::teardown_all` ->
        // `IoTable::teardown_all`, shared between both directions.
    }
}
