//! The per-kqueue wait fabric.
//!
//! One outer `epoll` instance is registered with every filter's inner
//! readiness primitive. A wait reduces to blocking on the outer instance;
//! on wake the aggregator hands back tokens decoded from each
//! `epoll_event`'s `u64` data word — a weak back-reference the filter
//! re-resolves under its own lock, never a raw pointer, so a stale token
//! (the knote was deleted on another thread between the wake and the
//! copyout) is just a miss, not a dangling dereference.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use rustix::event::epoll;
use rustix::event::{eventfd, EventfdFlags};

use crate::error::errno;
use std::io;

/// Reserved data word for the cross-thread wake token; never produced by
/// `pack_filter`/`pack_io`.
const NOTIFY_TOKEN: u64 = u64::MAX;

/// Tag bit distinguishing the two token shapes packed into the `u64` data
/// word of an `epoll_event`: a single-filter knote (vnode, proc, signal,
/// timer, user each own their fd outright) vs. the combined I/O
/// registration that `EVFILT_READ`/`EVFILT_WRITE` share (one fd, up to two
/// logical knotes, since epoll allows only one registration per fd).
const IO_TAG: u64 = 1 << 63;

fn pack_filter(filter_index: usize, ident: u64) -> u64 {
    debug_assert!(filter_index < 0x7F, "filter index too large to pack");
    debug_assert!(ident <= 0x00FF_FFFF_FFFF_FFFF, "ident too large to pack");
    ((filter_index as u64) << 56) | (ident & 0x00FF_FFFF_FFFF_FFFF)
}

fn pack_io(fd: RawFd) -> u64 {
    IO_TAG | (fd as u32 as u64)
}

fn to_timespec(d: Duration) -> rustix::time::Timespec {
    rustix::time::Timespec {
        tv_sec: d.as_secs() as _,
        tv_nsec: d.subsec_nanos() as _,
    }
}

/// One readiness token as reported by a single wake, plus the raw epoll
/// readiness bits (needed by the read/write filter to distinguish
/// readable/writable/EOF/hup).
#[derive(Debug, Clone, Copy)]
pub(crate) enum Token {
    /// Maps directly to one filter's own knote store.
    Filter {
        filter_index: usize,
        ident: u64,
        raw_events: u32,
    },
    /// The combined read/write registration for one user fd.
    Io { fd: RawFd, raw_events: u32 },
}

/// Readiness direction(s) to watch for on a registered fd.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Interest {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) edge: bool,
}

fn interest_flags(interest: Interest) -> epoll::EventFlags {
    let mut flags = epoll::EventFlags::empty();
    if interest.readable {
        flags |= epoll::EventFlags::IN | epoll::EventFlags::RDHUP;
    }
    if interest.writable {
        flags |= epoll::EventFlags::OUT;
    }
    if interest.edge {
        flags |= epoll::EventFlags::ET;
    }
    flags
}

pub(crate) struct Aggregator {
    epoll: OwnedFd,
    notify: OwnedFd,
}

impl Aggregator {
    pub(crate) fn new() -> io::Result<Aggregator> {
        let epoll = epoll::create(epoll::CreateFlags::CLOEXEC)?;
        let notify = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?;

        epoll::add(
            &epoll,
            &notify,
            epoll::EventData::new_u64(NOTIFY_TOKEN),
            epoll::EventFlags::IN,
        )?;

        Ok(Aggregator { epoll, notify })
    }

    /// Registers a filter-owned fd, keyed by `(filter_index, ident)`, so
    /// its readiness is folded into this kqueue's wait. Used by every
    /// filter except read/write, which shares one registration per fd via
    /// [`Aggregator::register_io`].
    pub(crate) fn register(
        &self,
        fd: RawFd,
        filter_index: usize,
        ident: u64,
        edge: bool,
    ) -> io::Result<()> {
        let flags = interest_flags(Interest {
            readable: true,
            writable: false,
            edge,
        });
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        epoll::add(
            &self.epoll,
            borrowed,
            epoll::EventData::new_u64(pack_filter(filter_index, ident)),
            flags,
        )
        .map_err(io::Error::from)
    }

    pub(crate) fn reregister(
        &self,
        fd: RawFd,
        filter_index: usize,
        ident: u64,
        edge: bool,
    ) -> io::Result<()> {
        let flags = interest_flags(Interest {
            readable: true,
            writable: false,
            edge,
        });
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        epoll::modify(
            &self.epoll,
            borrowed,
            epoll::EventData::new_u64(pack_filter(filter_index, ident)),
            flags,
        )
        .map_err(io::Error::from)
    }

    /// Registers or updates the combined read/write registration for one
    /// user fd: epoll allows only one registration per fd, so
    /// `EVFILT_READ`/`EVFILT_WRITE` knotes on the same fd share it.
    pub(crate) fn register_io(
        &self,
        fd: RawFd,
        interest: Interest,
        already_armed: bool,
    ) -> io::Result<()> {
        let flags = interest_flags(interest);
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let data = epoll::EventData::new_u64(pack_io(fd));
        if already_armed {
            epoll::modify(&self.epoll, borrowed, data, flags).map_err(io::Error::from)
        } else {
            epoll::add(&self.epoll, borrowed, data, flags).map_err(io::Error::from)
        }
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        match epoll::delete(&self.epoll, borrowed) {
            Ok(()) => Ok(()),
            // The fd may already be gone (e.g. a peer closed it); that is
            // not a teardown failure.
            Err(e) if e.raw_os_error() == errno::ENOENT as i32 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Wakes a concurrent or future `wait()` from another thread. Never
    /// maps to a knote: a dedicated inner primitive that never surfaces as
    /// one.
    pub(crate) fn notify(&self) -> io::Result<()> {
        let buf: u64 = 1;
        rustix::io::write(&self.notify, &buf.to_ne_bytes()).map(|_| ())?;
        Ok(())
    }

    /// Blocks until at least one event is ready or `timeout` elapses.
    /// Returns the tokens for every filter that fired; the notify token is
    /// drained and never surfaced.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<Token>> {
        let mut events = epoll::EventVec::with_capacity(1024);
        let started = std::time::Instant::now();
        loop {
            let ts = timeout.map(|d| to_timespec(d.saturating_sub(started.elapsed())));
            match epoll::wait(&self.epoll, &mut events, ts.as_ref()) {
                Ok(()) => break,
                // A signal unrelated to the caller's intent just shortens
                // the remaining wait; the timeout itself is monotonic and
                // must not restart on every interruption.
                Err(e) if e.raw_os_error() == errno::EINTR as i32 => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut notified = false;
        let mut tokens = Vec::with_capacity(events.len());
        for ev in events.iter() {
            let data = ev.data.u64();
            let raw_events = ev.flags.bits();
            if data == NOTIFY_TOKEN {
                notified = true;
            } else if data & IO_TAG != 0 {
                tokens.push(Token::Io {
                    fd: (data & 0xFFFF_FFFF) as RawFd,
                    raw_events,
                });
            } else {
                tokens.push(Token::Filter {
                    filter_index: (data >> 56) as usize,
                    ident: data & 0x00FF_FFFF_FFFF_FFFF,
                    raw_events,
                });
            }
        }

        if notified {
            // Drain the eventfd counter so the next wait doesn't spuriously
            // wake on a notification that already served its purpose.
            let mut buf = [0u8; 8];
            while rustix::io::read(&self.notify, &mut buf).is_ok() {}
        }

        Ok(tokens)
    }
}

impl AsRawFd for Aggregator {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}
