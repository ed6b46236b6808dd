//! Per-filter knote store.
//!
//! One instance of `KnoteStore<K>` lives inside each filter, keyed by
//! `ident`. The store is the sole strong owner of every knote it holds;
//! `Arc` clones handed out by [`KnoteStore::get`] let a copyout in progress
//! on one thread outlive a concurrent `remove` on another (spec invariant:
//! "a knote is destroyed when both the store's strong reference and all
//! transient references are dropped").

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use crate::error::errno;

/// A filter-level knote store. The `Mutex` here *is* the "filter lock" from
/// filter-level locking tier of this crate's lock hierarchy — held for the
/// duration of an insert/lookup/remove, never across a blocking wait.
pub(crate) struct KnoteStore<K> {
    map: Mutex<HashMap<u64, Arc<K>>>,
}

impl<K> KnoteStore<K> {
    pub(crate) fn new() -> Self {
        KnoteStore {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a brand-new knote. Fails with `EEXIST` if one already exists
    /// for this `ident` (the caller decides whether that's fatal or, for
    /// filters where `ADD` is idempotent, whether to fall back to `merge`).
    pub(crate) fn insert_new(&self, ident: u64, knote: K) -> io::Result<Arc<K>> {
        let mut map = self.map.lock().unwrap();
        if map.contains_key(&ident) {
            return Err(io::Error::from_raw_os_error(errno::EEXIST));
        }
        let arc = Arc::new(knote);
        map.insert(ident, arc.clone());
        #[cfg(feature = "trace")]
        tracing::trace!(ident, "knote created");
        Ok(arc)
    }

    /// Looks up a knote by ident, bumping its reference count.
    pub(crate) fn get(&self, ident: u64) -> Option<Arc<K>> {
        self.map.lock().unwrap().get(&ident).cloned()
    }

    /// Looks up an existing knote, or runs `create` to build one if not
    /// present, inserting the result. Used by filters (user, timer) where a
    /// re-`ADD` updates the existing knote in place instead of failing with
    /// `EEXIST`. Propagates `create`'s error without touching the store.
    pub(crate) fn get_or_insert_with(
        &self,
        ident: u64,
        create: impl FnOnce() -> io::Result<K>,
    ) -> io::Result<(Arc<K>, bool)> {
        let mut map = self.map.lock().unwrap();
        if let Some(existing) = map.get(&ident) {
            return Ok((existing.clone(), false));
        }
        let arc = Arc::new(create()?);
        map.insert(ident, arc.clone());
        Ok((arc, true))
    }

    /// Removes and returns a knote, or `ENOENT` if none is registered.
    pub(crate) fn remove(&self, ident: u64) -> io::Result<Arc<K>> {
        let removed = self
            .map
            .lock()
            .unwrap()
            .remove(&ident)
            .ok_or_else(|| io::Error::from_raw_os_error(errno::ENOENT))?;
        #[cfg(feature = "trace")]
        tracing::trace!(ident, "knote deleted");
        Ok(removed)
    }

    /// Removes a knote if present, without erroring when it is not — used
    /// by auto-disable/auto-delete paths that race harmlessly against an
    /// explicit `DELETE`.
    pub(crate) fn remove_if_present(&self, ident: u64) -> Option<Arc<K>> {
        self.map.lock().unwrap().remove(&ident)
    }

    /// Drains every knote out of the store, for kqueue teardown. Holds the
    /// lock for the whole drain so no concurrent insert can race a
    /// half-finished teardown.
    pub(crate) fn drain(&self) -> Vec<Arc<K>> {
        self.map.lock().unwrap().drain().map(|(_, v)| v).collect()
    }

    /// A point-in-time copy of every `(ident, knote)` pair, for filters
    /// (signal, user) whose copyout sweeps every live knote rather than
    /// following a single token.
    pub(crate) fn snapshot(&self) -> Vec<(u64, Arc<K>)> {
        self.map
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Just the idents, for teardown sweeps that call back into
    /// `apply_change`-shaped per-ident logic.
    pub(crate) fn snapshot_idents(&self) -> Vec<u64> {
        self.map.lock().unwrap().keys().copied().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }
}
