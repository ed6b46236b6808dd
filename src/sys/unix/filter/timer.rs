//! `EVFILT_TIMER`.
//!
//! One `timerfd` per knote. `fflags` selects the unit `data` is expressed
//! in (seconds/milliseconds/microseconds/nanoseconds, default milliseconds)
//! and whether it names an absolute deadline or a relative duration. A
//! knote without `EV_ONESHOT` is periodic: the kernel re-arms it every
//! `data` units on its own, same as a real BSD `EVFILT_TIMER` knote.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rustix::time::{
    timerfd_create, timerfd_settime, Itimerspec, TimerfdClockId, TimerfdFlags, TimerfdTimerFlags,
    Timespec,
};

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::unix::aggregator::Aggregator;
use crate::sys::unix::filter::{Disposal, Filter};
use crate::sys::unix::knote::KnoteStore;

const TIMER_FILTER_INDEX: usize = 5;

struct TimerKnote {
    fd: OwnedFd,
    enabled: AtomicBool,
    oneshot: bool,
    dispatch: bool,
}

fn duration_from_change(change: &Kevent) -> io::Result<(Duration, bool)> {
    if change.data < 0 {
        return Err(io::Error::from_raw_os_error(errno::EINVAL));
    }
    let raw = change.data as u64;
    let absolute = change.fflags & crate::NOTE_ABSOLUTE != 0;
    let duration = if change.fflags & crate::NOTE_SECONDS != 0 {
        Duration::from_secs(raw)
    } else if change.fflags & crate::NOTE_USECONDS != 0 {
        Duration::from_micros(raw)
    } else if change.fflags & crate::NOTE_NSECONDS != 0 {
        Duration::from_nanos(raw)
    } else {
        // NOTE_MSECONDS or no unit bit set: milliseconds is the default.
        Duration::from_millis(raw)
    };
    Ok((duration, absolute))
}

fn to_timespec(d: Duration) -> Timespec {
    Timespec {
        tv_sec: d.as_secs() as _,
        tv_nsec: d.subsec_nanos() as _,
    }
}

fn arm(fd: &OwnedFd, change: &Kevent) -> io::Result<()> {
    let (duration, absolute) = duration_from_change(change)?;
    let oneshot = change.is_oneshot();
    let value = to_timespec(duration);
    let interval = if oneshot {
        Timespec {
            tv_sec: 0,
            tv_nsec: 0,
        }
    } else {
        value
    };
    let flags = if absolute {
        TimerfdTimerFlags::ABSTIME
    } else {
        TimerfdTimerFlags::empty()
    };
    timerfd_settime(
        fd,
        flags,
        &Itimerspec {
            it_interval: interval,
            it_value: value,
        },
    )
    .map(|_| ())
    .map_err(io::Error::from)
}

pub(crate) struct TimerFilter {
    knotes: KnoteStore<TimerKnote>,
}

impl TimerFilter {
    pub(crate) fn new() -> Self {
        TimerFilter {
            knotes: KnoteStore::new(),
        }
    }
}

impl Filter for TimerFilter {
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()> {
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
            // A re-ADD of an existing timer ident re-arms it in place
            // rather than failing with EEXIST (matches BSD kevent(2): ADD
            // on EVFILT_TIMER updates the existing timer).
            let (knote, created) = self.knotes.get_or_insert_with(change.ident, || {
                let fd = timerfd_create(
                    TimerfdClockId::Monotonic,
                    TimerfdFlags::CLOEXEC | TimerfdFlags::NONBLOCK,
                )
                .map_err(io::Error::from)?;
                Ok(TimerKnote {
                    fd,
                    enabled: AtomicBool::new(true),
                    oneshot: change.is_oneshot(),
                    dispatch: change.is_dispatch(),
                })
            })?;
            arm(&knote.fd, change)?;
            if created {
                agg.register(knote.fd.as_raw_fd(), TIMER_FILTER_INDEX, change.ident, false)?;
            }
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

        let mut buf = [0u8; 8];
        let n = match rustix::io::read(&knote.fd, &mut buf) {
            Ok(n) => n,
            Err(e) if e == rustix::io::Errno::AGAIN => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if n != 8 {
            return Ok(Vec::new());
        }
        let expirations = u64::from_ne_bytes(buf);
        if expirations == 0 {
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
                filter: crate::EVFILT_TIMER,
                flags: 0,
                fflags: 0,
                data: expirations as i64,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_unit_is_milliseconds() {
        let change = Kevent {
            ident: 1,
            filter: crate::EVFILT_TIMER,
            flags: crate::EV_ADD,
            fflags: 0,
            data: 50,
            udata: 0,
        };
        let (d, absolute) = duration_from_change(&change).unwrap();
        assert_eq!(d, Duration::from_millis(50));
        assert!(!absolute);
    }

    #[test]
    fn seconds_unit_is_honored() {
        let change = Kevent {
            ident: 1,
            filter: crate::EVFILT_TIMER,
            flags: crate::EV_ADD,
            fflags: crate::NOTE_SECONDS,
            data: 3,
            udata: 0,
        };
        let (d, _) = duration_from_change(&change).unwrap();
        assert_eq!(d, Duration::from_secs(3));
    }

    #[test]
    fn negative_data_is_invalid() {
        let change = Kevent {
            ident: 1,
            filter: crate::EVFILT_TIMER,
            flags: crate::EV_ADD,
            fflags: 0,
            data: -1,
            udata: 0,
        };
        assert_eq!(
            duration_from_change(&change).unwrap_err().raw_os_error(),
            Some(errno::EINVAL)
        );
    }
}
