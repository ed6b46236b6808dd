//! Per-filter knote store.
//!
//! Identical in shape to `sys::unix::knote`: one `KnoteStore<K>` per filter,
//! keyed by `ident`, refcounted so a copyout in progress on one thread can
//! outlive a concurrent `remove` on another. Kept as its own copy rather
//! than shared with the Unix tree because the two backends otherwise share
//! no types (different `Aggregator`, different `Filter` trait) — the same
//! duplication `tokio-rs-mio` accepts between its own `sys::unix` and
//! `sys::windows` selectors.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use crate::error::errno;

pub(crate) struct KnoteStore<K> {
    map: Mutex<HashMap<u64, Arc<K>>>,
}

impl<K> KnoteStore<K> {
    pub(crate) fn new() -> Self {
        KnoteStore {
            map: Mutex::new(HashMap::new()),
        }
    }

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

    pub(crate) fn get(&self, ident: u64) -> Option<Arc<K>> {
        self.map.lock().unwrap().get(&ident).cloned()
    }

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

    pub(crate) fn remove_if_present(&self, ident: u64) -> Option<Arc<K>> {
        self.map.lock().unwrap().remove(&ident)
    }

    pub(crate) fn drain(&self) -> Vec<Arc<K>> {
        self.map.lock().unwrap().drain().map(|(_, v)| v).collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<(u64, Arc<K>)> {
        self.map
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    pub(crate) fn snapshot_idents(&self) -> Vec<u64> {
        self.map.lock().unwrap().keys().copied().collect()
    }
}
