//! `EVFILT_TIMER`.
//!
//! One waitable timer per knote (`CreateWaitableTimerExW`), armed with
//! `SetWaitableTimer` the same way `sys::unix::filter::timer` arms a
//! `timerfd`: a periodic knote gets a non-zero repeat interval, a oneshot
//! knote gets zero. `RegisterWaitForSingleObject` hands the wait off to a
//! thread-pool wait thread, whose callback posts a synthetic completion to
//! the owning port — the same shape IOCP callers use to fold a
//! non-overlapped wait into `GetQueuedCompletionStatus` (there is no
//! `timerfd`-style fd to hand the port directly).

use std::ffi::c_void;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use windows_sys::Win32::Foundation::{BOOLEAN, HANDLE};
use windows_sys::Win32::System::Threading::{
    CreateWaitableTimerExW, RegisterWaitForSingleObject, SetWaitableTimer, UnregisterWaitEx,
    CREATE_WAITABLE_TIMER_MANUAL_RESET, INFINITE, TIMER_ALL_ACCESS, WT_EXECUTEDEFAULT,
};

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::windows::filter::{Disposal, Filter};
use crate::sys::windows::iocp::{post_filter_raw, Aggregator};
use crate::sys::windows::knote::KnoteStore;

const TIMER_FILTER_INDEX: usize = 5;

/// Leaked for the lifetime of the registered wait and reclaimed only when
/// the knote is torn down; the callback reads it on an arbitrary
/// thread-pool thread with no other synchronization available.
struct TimerContext {
    port: HANDLE,
    ident: u64,
    pending: std::sync::Arc<AtomicU64>,
}

unsafe extern "system" fn timer_callback(ctx: *mut c_void, _timer_or_wait_fired: BOOLEAN) {
    let ctx = unsafe { &*(ctx as *const TimerContext) };
    ctx.pending.fetch_add(1, Ordering::AcqRel);
    let _ = post_filter_raw(ctx.port, TIMER_FILTER_INDEX, ctx.ident);
}

struct TimerKnote {
    timer: HANDLE,
    wait: HANDLE,
    context: *mut TimerContext,
    enabled: AtomicBool,
    oneshot: bool,
    dispatch: bool,
    pending: std::sync::Arc<AtomicU64>,
}

// The raw handles and the leaked context pointer are only ever touched
// from `apply_change`/`copyout`/`delete`/`teardown_all` under the knote
// store's lock, or read-only from the callback thread.
unsafe impl Send for TimerKnote {}
unsafe impl Sync for TimerKnote {}

impl Drop for TimerKnote {
    fn drop(&mut self) {
        unsafe {
            let _ = UnregisterWaitEx(self.wait, INFINITE as HANDLE);
            windows_sys::Win32::Foundation::CloseHandle(self.timer);
            drop(Box::from_raw(self.context));
        }
    }
}

pub(crate) fn duration_from_change(change: &Kevent) -> io::Result<(Duration, bool)> {
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
        Duration::from_millis(raw)
    };
    Ok((duration, absolute))
}

/// Windows waitable timers count in 100ns units, negative for relative,
/// positive for absolute (since the Windows epoch).
fn to_filetime_ticks(d: Duration, absolute: bool) -> i64 {
    let ticks = (d.as_secs() as i64)
        .saturating_mul(10_000_000)
        .saturating_add((d.subsec_nanos() / 100) as i64);
    if absolute {
        ticks
    } else {
        -ticks
    }
}

fn arm(timer: HANDLE, change: &Kevent) -> io::Result<()> {
    let (duration, absolute) = duration_from_change(change)?;
    let due = to_filetime_ticks(duration, absolute);
    let period_ms: i32 = if change.is_oneshot() {
        0
    } else {
        duration.as_millis().min(i32::MAX as u128) as i32
    };
    let ok = unsafe { SetWaitableTimer(timer, &due, period_ms, None, std::ptr::null(), 0) };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
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
            self.knotes.remove(change.ident)?;
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
            if let Some(knote) = self.knotes.get(change.ident) {
                arm(knote.timer, change)?;
                return Ok(());
            }

            let timer = unsafe {
                CreateWaitableTimerExW(
                    std::ptr::null(),
                    std::ptr::null(),
                    CREATE_WAITABLE_TIMER_MANUAL_RESET,
                    TIMER_ALL_ACCESS,
                )
            };
            if timer == 0 {
                return Err(io::Error::last_os_error());
            }
            arm(timer, change)?;

            let pending = std::sync::Arc::new(AtomicU64::new(0));
            let context = Box::into_raw(Box::new(TimerContext {
                port: agg.raw_port(),
                ident: change.ident,
                pending: pending.clone(),
            }));

            let mut wait: HANDLE = 0;
            let ok = unsafe {
                RegisterWaitForSingleObject(
                    &mut wait,
                    timer,
                    Some(timer_callback),
                    context as *mut c_void,
                    INFINITE,
                    WT_EXECUTEDEFAULT,
                )
            };
            if ok == 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    windows_sys::Win32::Foundation::CloseHandle(timer);
                    drop(Box::from_raw(context));
                }
                return Err(err);
            }

            self.knotes.insert_new(
                change.ident,
                TimerKnote {
                    timer,
                    wait,
                    context,
                    enabled: AtomicBool::new(true),
                    oneshot: change.is_oneshot(),
                    dispatch: change.is_dispatch(),
                    pending,
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
        let expirations = knote.pending.swap(0, Ordering::AcqRel);
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

    fn delete(&self, _agg: &Aggregator, ident: u64) -> io::Result<()> {
        self.knotes.remove_if_present(ident);
        Ok(())
    }

    fn teardown_all(&self, _agg: &Aggregator) {
        self.knotes.drain();
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

    #[test]
    fn relative_ticks_are_negative() {
        let ticks = to_filetime_ticks(Duration::from_millis(100), false);
        assert!(ticks < 0);
        assert_eq!(ticks, -1_000_000);
    }
}
