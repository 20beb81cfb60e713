//! Block cache and access coordination.
//!
//! The cache is the single owner of the canonical in-memory copy of every
//! block. Callers get reference-counted [`BlockHandle`]s; two handles for
//! the same id always see the same bytes. The invariants maintained here:
//!
//! - at most one live in-memory entry per block id
//! - at most one in-flight backend load per id: a second `load` for an id
//!   that is already loading blocks on a condvar and shares the result
//! - dropping the last handle parks the entry in the unreferenced pool
//!   (re-requesting it costs no backend round trip) until the background
//!   evictor flushes and frees it
//! - referenced entries are never evicted, and `remove` refuses while
//!   handles are outstanding
//!
//! The evictor is one dedicated thread with a cancellable sleep/wake loop;
//! `Drop` signals it, joins it, and then write-backs every remaining dirty
//! entry, so the thread never outlives the store it flushes through.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use coffer_core::{BlockId, CofferError, CofferResult};

use crate::store::BlockStore;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of cached blocks above which the evictor starts freeing
    /// unreferenced entries.
    pub capacity: usize,
    /// Sleep between eviction sweeps.
    pub flush_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            flush_interval: Duration::from_millis(1000),
        }
    }
}

impl CacheConfig {
    /// Derive cache settings from the store config.
    pub fn from_store_config(config: &coffer_core::StoreConfig) -> Self {
        Self {
            capacity: config.cache_capacity,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
        }
    }
}

struct BlockBuf {
    data: Vec<u8>,
    dirty: bool,
}

struct Entry {
    buf: Arc<Mutex<BlockBuf>>,
    refcount: usize,
    /// Sequence number of the moment the refcount last hit zero; the
    /// evictor frees the smallest first.
    last_release: u64,
}

enum Slot {
    /// A load is in flight; interested parties wait on the condvar.
    Loading,
    /// The evictor is flushing this entry out; waiters reload afterwards.
    Evicting,
    Ready(Entry),
}

struct CacheState {
    slots: HashMap<BlockId, Slot>,
    release_seq: u64,
    shutdown: bool,
}

struct Shared {
    store: Box<dyn BlockStore>,
    state: Mutex<CacheState>,
    cond: Condvar,
    config: CacheConfig,
}

pub struct BlockCache {
    shared: Arc<Shared>,
    evictor: Option<JoinHandle<()>>,
}

impl BlockCache {
    pub fn new(store: Box<dyn BlockStore>, config: CacheConfig) -> CofferResult<Self> {
        let shared = Arc::new(Shared {
            store,
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                release_seq: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
            config,
        });

        let thread_shared = shared.clone();
        let evictor = std::thread::Builder::new()
            .name("coffer-evictor".to_string())
            .spawn(move || evictor_loop(&thread_shared))?;

        Ok(Self {
            shared,
            evictor: Some(evictor),
        })
    }

    /// Allocate a fresh zero-filled block and return a handle to its live
    /// entry. No backend read happens: the id is new by construction.
    pub fn create(&self, size: usize) -> CofferResult<BlockHandle> {
        let id = self.shared.store.create(size)?;
        let buf = Arc::new(Mutex::new(BlockBuf {
            data: vec![0u8; size],
            dirty: false,
        }));

        let mut state = self.shared.state.lock().unwrap();
        state.slots.insert(
            id,
            Slot::Ready(Entry {
                buf: buf.clone(),
                refcount: 1,
                last_release: 0,
            }),
        );
        drop(state);

        Ok(BlockHandle {
            shared: self.shared.clone(),
            id,
            buf,
        })
    }

    /// Load a block, sharing the live entry if one exists and waiting for
    /// any in-flight load of the same id instead of issuing a second one.
    /// `None` means the block does not exist.
    pub fn load(&self, id: &BlockId) -> CofferResult<Option<BlockHandle>> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            match state.slots.get_mut(id) {
                Some(Slot::Ready(entry)) => {
                    entry.refcount += 1;
                    let buf = entry.buf.clone();
                    return Ok(Some(BlockHandle {
                        shared: self.shared.clone(),
                        id: *id,
                        buf,
                    }));
                }
                Some(Slot::Loading) | Some(Slot::Evicting) => {
                    state = self.shared.cond.wait(state).unwrap();
                }
                None => break,
            }
        }

        // This caller becomes the loader; the backend is hit exactly once
        // no matter how many threads are asking.
        state.slots.insert(*id, Slot::Loading);
        drop(state);

        let loaded = self.shared.store.load(id);

        let mut state = self.shared.state.lock().unwrap();
        match loaded {
            Ok(Some(data)) => {
                let buf = Arc::new(Mutex::new(BlockBuf { data, dirty: false }));
                state.slots.insert(
                    *id,
                    Slot::Ready(Entry {
                        buf: buf.clone(),
                        refcount: 1,
                        last_release: 0,
                    }),
                );
                self.shared.cond.notify_all();
                Ok(Some(BlockHandle {
                    shared: self.shared.clone(),
                    id: *id,
                    buf,
                }))
            }
            Ok(None) => {
                state.slots.remove(id);
                self.shared.cond.notify_all();
                Ok(None)
            }
            Err(e) => {
                state.slots.remove(id);
                self.shared.cond.notify_all();
                Err(e)
            }
        }
    }

    /// Remove a block from cache and store. Fails with `ConcurrentUse` if
    /// any handle is outstanding or a load/eviction is in flight.
    pub fn remove(&self, id: &BlockId) -> CofferResult<()> {
        let mut state = self.shared.state.lock().unwrap();
        match state.slots.get(id) {
            Some(Slot::Ready(entry)) if entry.refcount > 0 => {
                return Err(CofferError::ConcurrentUse(*id));
            }
            Some(Slot::Loading) | Some(Slot::Evicting) => {
                return Err(CofferError::ConcurrentUse(*id));
            }
            _ => {}
        }
        state.slots.remove(id);
        drop(state);

        self.shared.store.remove(id)
    }

    /// Write one block's dirty bytes through to the store, if cached.
    pub fn flush_block(&self, id: &BlockId) -> CofferResult<()> {
        let buf = {
            let state = self.shared.state.lock().unwrap();
            match state.slots.get(id) {
                Some(Slot::Ready(entry)) => Some(entry.buf.clone()),
                _ => None,
            }
        };
        if let Some(buf) = buf {
            flush_buf(&*self.shared.store, id, &buf)?;
        }
        Ok(())
    }

    /// Write every dirty cached block through to the store.
    pub fn flush_all(&self) -> CofferResult<()> {
        let bufs: Vec<(BlockId, Arc<Mutex<BlockBuf>>)> = {
            let state = self.shared.state.lock().unwrap();
            state
                .slots
                .iter()
                .filter_map(|(id, slot)| match slot {
                    Slot::Ready(entry) => Some((*id, entry.buf.clone())),
                    _ => None,
                })
                .collect()
        };
        for (id, buf) in bufs {
            flush_buf(&*self.shared.store, &id, &buf)?;
        }
        Ok(())
    }

    /// The wrapped store (for id enumeration and integrity scans).
    pub fn store(&self) -> &dyn BlockStore {
        &*self.shared.store
    }

    #[cfg(test)]
    fn cached_count(&self) -> usize {
        self.shared.state.lock().unwrap().slots.len()
    }

    #[cfg(test)]
    fn is_cached(&self, id: &BlockId) -> bool {
        self.shared.state.lock().unwrap().slots.contains_key(id)
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        if let Some(handle) = self.evictor.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.flush_all() {
            tracing::warn!(error = %e, "flushing cache on shutdown failed");
        }
    }
}

fn flush_buf(store: &dyn BlockStore, id: &BlockId, buf: &Mutex<BlockBuf>) -> CofferResult<()> {
    let mut guard = buf.lock().unwrap();
    if guard.dirty {
        store.store(id, &guard.data)?;
        guard.dirty = false;
    }
    Ok(())
}

fn evictor_loop(shared: &Shared) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            return;
        }
        let (guard, _) = shared
            .cond
            .wait_timeout(state, shared.config.flush_interval)
            .unwrap();
        state = guard;
        if state.shutdown {
            return;
        }

        let mut evicted = 0usize;
        while state.slots.len() > shared.config.capacity {
            let victim = state
                .slots
                .iter()
                .filter_map(|(id, slot)| match slot {
                    Slot::Ready(entry) if entry.refcount == 0 => Some((*id, entry.last_release)),
                    _ => None,
                })
                .min_by_key(|(_, seq)| *seq)
                .map(|(id, _)| id);
            let Some(id) = victim else { break };

            let entry = match state.slots.remove(&id) {
                Some(Slot::Ready(entry)) => entry,
                _ => continue,
            };
            state.slots.insert(id, Slot::Evicting);
            drop(state);

            // Flush outside the map lock: only users of this block wait.
            let flushed = flush_buf(&*shared.store, &id, &entry.buf);

            state = shared.state.lock().unwrap();
            match flushed {
                Ok(()) => {
                    state.slots.remove(&id);
                    evicted += 1;
                }
                Err(e) => {
                    tracing::warn!(block = %id, error = %e, "evicting block failed; keeping it cached");
                    state.slots.insert(id, Slot::Ready(entry));
                    shared.cond.notify_all();
                    break;
                }
            }
            shared.cond.notify_all();
            if state.shutdown {
                return;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, remaining = state.slots.len(), "eviction sweep");
        }
    }
}

/// Reference-counted access token to one cached block.
///
/// Reads and writes go through closures over the entry's own lock, so two
/// handles to the same block serialize byte access between themselves
/// without touching the global map. Writing marks the entry dirty; the data
/// reaches the store on `flush`, eviction, or cache shutdown.
pub struct BlockHandle {
    shared: Arc<Shared>,
    id: BlockId,
    buf: Arc<Mutex<BlockBuf>>,
}

impl BlockHandle {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.buf.lock().unwrap();
        f(&guard.data)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut guard = self.buf.lock().unwrap();
        guard.dirty = true;
        f(&mut guard.data)
    }

    /// Write this block through to the store now.
    pub fn flush(&self) -> CofferResult<()> {
        flush_buf(&*self.shared.store, &self.id, &self.buf)
    }
}

impl Clone for BlockHandle {
    fn clone(&self) -> Self {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(Slot::Ready(entry)) = state.slots.get_mut(&self.id) {
            entry.refcount += 1;
        }
        drop(state);
        BlockHandle {
            shared: self.shared.clone(),
            id: self.id,
            buf: self.buf.clone(),
        }
    }
}

impl Drop for BlockHandle {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        let state = &mut *state;
        if let Some(Slot::Ready(entry)) = state.slots.get_mut(&self.id) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                state.release_seq += 1;
                entry.last_release = state.release_seq;
                if state.slots.len() > self.shared.config.capacity {
                    self.shared.cond.notify_all();
                }
            }
        }
    }
}
