//! The `Kqueue` handle and the three-phase dispatcher, mirroring
//! `sys::unix::kqueue`: a change phase, a wait phase, then a copyout phase
//! that applies `EV_DISPATCH`/`EV_ONESHOT` disposal to whatever it just
//! delivered.
//!
//! No C-ABI surface is exposed on this backend (see `crate`'s module docs):
//! `errno` has no Windows equivalent, so only the idiomatic [`Kqueue`] type
//! is public here.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::error::errno;
use crate::error::KqueueError;
use crate::event::Kevent;
use crate::sys::windows::filter::{self, Disposal, FilterTable};
use crate::sys::windows::iocp::Aggregator;

struct Inner {
    agg: Aggregator,
    filters: FilterTable,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.filters.teardown_all(&self.agg);
    }
}

/// A kqueue handle.
///
/// Cheaply cloneable: cloning shares the same underlying completion port
/// and knotes, it does not create a second one. The last clone to drop
/// releases every knote's OS resource, then the port itself.
#[derive(Clone)]
pub struct Kqueue(Arc<Inner>);

impl Kqueue {
    /// Creates a new, empty kqueue.
    pub fn new() -> Result<Kqueue, KqueueError> {
        let agg = Aggregator::new()?;
        let filters = FilterTable::new();
        Ok(Kqueue(Arc::new(Inner { agg, filters })))
    }

    /// Applies `changes` in order, then waits for and copies ready events
    /// into `events`, returning how many were written.
    pub fn kevent(
        &self,
        changes: &[Kevent],
        events: &mut [Kevent],
        timeout: Option<Duration>,
    ) -> Result<usize, KqueueError> {
        let inner = &*self.0;
        let mut out_len = 0usize;

        // --- change phase ---------------------------------------------
        for change in changes {
            let outcome = inner
                .filters
                .resolve(change.filter)
                .and_then(|f| f.apply_change(&inner.agg, change));

            match outcome {
                Ok(()) => {
                    if change.is_receipt() {
                        if out_len >= events.len() {
                            return Err(io::Error::from_raw_os_error(errno::ENOMEM).into());
                        }
                        events[out_len] = Kevent::error_receipt(change.ident, change.filter, 0);
                        out_len += 1;
                    }
                }
                Err(e) => {
                    if change.is_receipt() || !events.is_empty() {
                        if out_len >= events.len() {
                            return Err(e.into());
                        }
                        let raw = e.raw_os_error().unwrap_or(errno::EINVAL);
                        events[out_len] = Kevent::error_receipt(change.ident, change.filter, raw);
                        out_len += 1;
                    } else {
                        return Err(e.into());
                    }
                }
            }
        }

        // --- wait phase --------------------------------------------------
        if out_len < events.len() {
            let tokens = inner.agg.wait(timeout).map_err(KqueueError::from)?;

            // --- copyout phase --------------------------------------------
            'tokens: for token in tokens {
                let ready = filter::copyout_token(&inner.filters, &inner.agg, token)
                    .map_err(KqueueError::from)?;
                for (kev, disposal) in ready {
                    if out_len >= events.len() {
                        break 'tokens;
                    }
                    events[out_len] = kev;
                    out_len += 1;

                    match disposal {
                        Disposal::None => {}
                        Disposal::Disable => {
                            if let Ok(f) = inner.filters.resolve(kev.filter) {
                                let _ = f.disable(&inner.agg, kev.ident);
                            }
                        }
                        Disposal::Delete => {
                            if let Ok(f) = inner.filters.resolve(kev.filter) {
                                let _ = f.delete(&inner.agg, kev.ident);
                            }
                        }
                    }
                }
            }
        }

        Ok(out_len)
    }

    /// Wakes a concurrent or future call to [`Kqueue::kevent`] blocked in
    /// the wait phase, from another thread.
    pub fn notify(&self) -> Result<(), KqueueError> {
        self.0.agg.notify().map_err(KqueueError::from)
    }

    /// Waits for ready events with no pending changes. A convenience over
    /// [`Kqueue::kevent`] for the common "just wait" call shape.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize, KqueueError> {
        let n = self.kevent(&[], &mut events.list, timeout)?;
        events.len = n;
        Ok(n)
    }
}

/// Fixed-capacity scratch space for [`Kqueue::wait`].
pub struct Events {
    list: Box<[Kevent]>,
    len: usize,
}

impl Events {
    /// Preallocates room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            list: vec![Kevent::zeroed(); capacity.max(1)].into_boxed_slice(),
            len: 0,
        }
    }

    /// A scratch buffer sized for a typical wait.
    pub fn new() -> Events {
        Events::with_capacity(1024)
    }

    /// The events delivered by the most recent [`Kqueue::wait`] call.
    pub fn iter(&self) -> impl Iterator<Item = &Kevent> + '_ {
        self.list[..self.len].iter()
    }

    /// How many events are currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the most recent wait produced no events.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Events {
    fn default() -> Self {
        Events::new()
    }
}
