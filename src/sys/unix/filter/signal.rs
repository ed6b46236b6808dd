//! `EVFILT_SIGNAL`.
//!
//! One `signalfd` per kqueue carries every subscribed signal; the process
//! signal mask blocks them at the thread level so they never interrupt
//! execution. `signalfd(2)` has no `rustix` binding, so this module talks
//! to it directly through `libc`, the same reach `mio-signals` takes for the
//! same reason.

use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::errno;
use crate::event::Kevent;
use crate::macros::syscall;
use crate::sys::unix::aggregator::Aggregator;
use crate::sys::unix::filter::{Disposal, Filter};
use crate::sys::unix::knote::KnoteStore;
use crate::FILTER_COUNT;

struct SignalKnote {
    enabled: AtomicBool,
    oneshot: bool,
    dispatch: bool,
    clear: bool,
    /// Unread deliveries since the last copyout; repeat deliveries of the
    /// same signal between copyouts coalesce into one count.
    pending: AtomicU64,
}

/// Index this filter occupies in `FilterTable::filters`, used as the `u64`
/// data word's filter tag when registering the shared `signalfd`.
const SIGNAL_FILTER_INDEX: usize = 4;
const SHARED_IDENT: u64 = 0;

pub(crate) struct SignalFilter {
    fd: Mutex<Option<OwnedFd>>,
    knotes: KnoteStore<SignalKnote>,
}

impl SignalFilter {
    pub(crate) fn new() -> Self {
        debug_assert!(SIGNAL_FILTER_INDEX < FILTER_COUNT);
        SignalFilter {
            fd: Mutex::new(None),
            knotes: KnoteStore::new(),
        }
    }

    fn rebuild_mask(&self, signals: &[i32]) -> io::Result<libc::sigset_t> {
        unsafe {
            let mut set: MaybeUninit<libc::sigset_t> = MaybeUninit::uninit();
            syscall!(sigemptyset(set.as_mut_ptr()))?;
            let mut set = set.assume_init();
            for &sig in signals {
                syscall!(sigaddset(&mut set, sig))?;
            }
            Ok(set)
        }
    }

    fn ensure_fd(&self, agg: &Aggregator, signals: &[i32]) -> io::Result<()> {
        let mask = self.rebuild_mask(signals)?;
        let mut guard = self.fd.lock().unwrap();
        unsafe {
            syscall!(sigprocmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()))?;
        }
        match guard.as_ref() {
            Some(fd) => {
                // signalfd(2): passing an existing fd updates its mask in
                // place rather than creating a new descriptor.
                unsafe { syscall!(signalfd(fd.as_raw_fd(), &mask, 0))? };
            }
            None => {
                let raw = unsafe {
                    syscall!(signalfd(-1, &mask, libc::SFD_CLOEXEC | libc::SFD_NONBLOCK))?
                };
                let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                agg.register(owned.as_raw_fd(), SIGNAL_FILTER_INDEX, SHARED_IDENT, false)?;
                *guard = Some(owned);
            }
        }
        Ok(())
    }

    fn signals_of_interest(&self, extra: Option<i32>) -> Vec<i32> {
        let mut signals: Vec<i32> = self
            .knotes
            .snapshot_idents()
            .into_iter()
            .map(|i| i as i32)
            .collect();
        if let Some(sig) = extra {
            if !signals.contains(&sig) {
                signals.push(sig);
            }
        }
        signals
    }
}

impl Filter for SignalFilter {
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()> {
        let signo = change.ident as i32;

        if change.is_delete() {
            self.knotes.remove(change.ident)?;
            let remaining = self.signals_of_interest(None);
            if remaining.is_empty() {
                let mut guard = self.fd.lock().unwrap();
                if let Some(fd) = guard.take() {
                    let _ = agg.deregister(fd.as_raw_fd());
                }
            } else {
                self.ensure_fd(agg, &remaining)?;
            }
            unsafe {
                let mut set: MaybeUninit<libc::sigset_t> = MaybeUninit::uninit();
                let _ = syscall!(sigemptyset(set.as_mut_ptr()));
                let mut set = set.assume_init();
                let _ = syscall!(sigaddset(&mut set, signo));
                let _ = syscall!(sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()));
            }
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
            let interest = self.signals_of_interest(Some(signo));
            self.ensure_fd(agg, &interest)?;
            self.knotes.insert_new(
                change.ident,
                SignalKnote {
                    enabled: AtomicBool::new(true),
                    oneshot: change.is_oneshot(),
                    dispatch: change.is_dispatch(),
                    clear: change.is_clear(),
                    pending: AtomicU64::new(0),
                },
            )?;
            return Ok(());
        }

        Err(io::Error::from_raw_os_error(errno::EINVAL))
    }

    fn copyout(&self, _agg: &Aggregator, _ident: u64) -> io::Result<Vec<(Kevent, Disposal)>> {
        let fd = {
            let guard = self.fd.lock().unwrap();
            match guard.as_ref() {
                Some(fd) => fd.as_raw_fd(),
                None => return Ok(Vec::new()),
            }
        };

        // Drain every pending siginfo record, tallying per-signal counts.
        // `syscall!` already retries on EINTR; a WouldBlock error just means
        // the signalfd is caught up, not a real failure.
        loop {
            let mut info: MaybeUninit<libc::signalfd_siginfo> = MaybeUninit::uninit();
            let n = unsafe {
                syscall!(read(
                    fd,
                    info.as_mut_ptr() as *mut _,
                    std::mem::size_of::<libc::signalfd_siginfo>(),
                ))
            };
            match n {
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
                Ok(0) => break,
                Ok(_) => {
                    let info = unsafe { info.assume_init() };
                    if let Some(knote) = self.knotes.get(info.ssi_signo as u64) {
                        knote.pending.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }

        let mut out = Vec::new();
        for (ident, knote) in self.knotes.snapshot() {
            if !knote.enabled.load(Ordering::Acquire) {
                continue;
            }
            let count = if knote.clear {
                knote.pending.swap(0, Ordering::AcqRel)
            } else {
                knote.pending.load(Ordering::Acquire)
            };
            if count == 0 {
                continue;
            }
            let disposal = if knote.oneshot {
                Disposal::Delete
            } else if knote.dispatch {
                Disposal::Disable
            } else {
                Disposal::None
            };
            out.push((
                Kevent {
                    ident,
                    filter: crate::EVFILT_SIGNAL,
                    flags: 0,
                    fflags: 0,
                    data: count as i64,
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
            filter: crate::EVFILT_SIGNAL,
            flags: crate::EV_DELETE,
            fflags: 0,
            data: 0,
            udata: 0,
        };
        // Re-use the ADD/DELETE path so the signalfd mask and the process
        // signal mask stay consistent with the knote store.
        self.apply_change(agg, &change)
    }

    fn teardown_all(&self, agg: &Aggregator) {
        for ident in self.knotes.snapshot_idents() {
            let _ = self.delete(agg, ident);
        }
    }
}
