//! Blob store: create/open/remove blobs over one shared block cache.
//!
//! The registry guarantees at most one live [`Blob`] instance per blob:
//! opening an already-open blob hands back the same `Arc`, and removal is
//! refused while any instance is alive, mirroring the block cache's handle
//! rules one level up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use coffer_core::{BlockId, CofferError, CofferResult};

use coffer_blocks::{BlockStore, CacheConfig};

use crate::blob::{Blob, BlobRegistry};
use crate::node::{DataNode, NodeLayout};
use crate::tree::NodeStore;

pub struct BlobStore {
    nodes: Arc<NodeStore>,
    registry: BlobRegistry,
}

impl BlobStore {
    pub fn new(
        store: Box<dyn BlockStore>,
        layout: NodeLayout,
        cache_config: CacheConfig,
    ) -> CofferResult<Self> {
        Ok(Self {
            nodes: Arc::new(NodeStore::new(store, layout, cache_config)?),
            registry: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Create a new empty blob (a single zero-length leaf).
    pub fn create(&self) -> CofferResult<Arc<Blob>> {
        let root = self.nodes.create(&DataNode::Leaf { bytes: Vec::new() })?;
        let blob = Blob::new(self.nodes.clone(), self.registry.clone(), root, 0, 0);
        self.registry
            .lock()
            .unwrap()
            .insert(root, Arc::downgrade(&blob));
        Ok(blob)
    }

    /// Open the blob whose root is `id`. Returns the already-live instance
    /// if one exists; `None` if no such blob is stored.
    pub fn open(&self, id: &BlockId) -> CofferResult<Option<Arc<Blob>>> {
        if let Some(blob) = self.lookup_live(id) {
            return Ok(Some(blob));
        }

        let Some(root) = self.nodes.try_load(id)? else {
            return Ok(None);
        };
        let depth = root.depth();
        let size = match root {
            DataNode::Leaf { bytes } => bytes.len() as u64,
            DataNode::Inner { .. } => self.nodes.subtree_size(id)?,
        };
        let blob = Blob::new(self.nodes.clone(), self.registry.clone(), *id, depth, size);

        let mut registry = self.registry.lock().unwrap();
        // A concurrent open may have won while we were loading the tree;
        // one canonical instance means theirs wins and ours is dropped.
        if let Some(existing) = registry.get(id).and_then(Weak::upgrade) {
            return Ok(Some(existing));
        }
        registry.insert(*id, Arc::downgrade(&blob));
        Ok(Some(blob))
    }

    /// Delete a blob and release every block of its tree. Fails with
    /// `ConcurrentUse` while a live instance exists and `NotFound` if no
    /// such blob is stored.
    pub fn remove(&self, id: &BlockId) -> CofferResult<()> {
        {
            let mut registry = self.registry.lock().unwrap();
            match registry.get(id) {
                Some(weak) if weak.upgrade().is_some() => {
                    return Err(CofferError::ConcurrentUse(*id));
                }
                Some(_) => {
                    registry.remove(id);
                }
                None => {}
            }
        }
        if self.nodes.try_load(id)?.is_none() {
            return Err(CofferError::NotFound(*id));
        }
        self.nodes.delete_subtree(id)
    }

    /// Write every dirty cached block through to the encrypted store.
    pub fn flush(&self) -> CofferResult<()> {
        self.nodes.cache().flush_all()
    }

    fn lookup_live(&self, id: &BlockId) -> Option<Arc<Blob>> {
        let mut registry = self.registry.lock().unwrap();
        registry.retain(|_, weak| weak.strong_count() > 0);
        registry.get(id).and_then(Weak::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use coffer_blocks::{EncryptedBlockStore, InMemoryBackend};
    use coffer_crypto::{cipher_by_name, EncryptionKey};

    use super::*;

    fn test_blobs() -> BlobStore {
        let store = EncryptedBlockStore::new(
            InMemoryBackend::new(),
            cipher_by_name("xchacha20-poly1305").unwrap(),
            EncryptionKey::from_bytes([5u8; 32]),
        );
        BlobStore::new(
            Box::new(store),
            NodeLayout::new(64).unwrap(),
            CacheConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_open_roundtrip() {
        let blobs = test_blobs();
        let blob = blobs.create().unwrap();
        blob.write_at(0, b"persisted").unwrap();
        let id = blob.id();
        drop(blob);

        let blob = blobs.open(&id).unwrap().unwrap();
        assert_eq!(blob.size(), 9);
        let mut buf = [0u8; 9];
        assert_eq!(blob.read_at(0, &mut buf).unwrap(), 9);
        assert_eq!(&buf, b"persisted");
    }

    #[test]
    fn test_open_missing_is_none() {
        let blobs = test_blobs();
        assert!(blobs.open(&BlockId::random()).unwrap().is_none());
    }

    #[test]
    fn test_open_twice_shares_one_instance() {
        let blobs = test_blobs();
        let blob = blobs.create().unwrap();
        let id = blob.id();

        let again = blobs.open(&id).unwrap().unwrap();
        assert!(Arc::ptr_eq(&blob, &again));
    }

    #[test]
    fn test_registry_follows_root_across_depth_change() {
        let blobs = test_blobs();
        let blob = blobs.create().unwrap();
        let old_id = blob.id();

        // Push past one leaf so the root wraps and the identity moves.
        blob.resize(100).unwrap();
        let new_id = blob.id();
        assert_ne!(old_id, new_id);

        let again = blobs.open(&new_id).unwrap().unwrap();
        assert!(Arc::ptr_eq(&blob, &again));
    }

    #[test]
    fn test_remove_live_blob_fails() {
        let blobs = test_blobs();
        let blob = blobs.create().unwrap();
        let id = blob.id();

        assert!(matches!(
            blobs.remove(&id),
            Err(CofferError::ConcurrentUse(_))
        ));

        drop(blob);
        blobs.remove(&id).unwrap();
        assert!(blobs.open(&id).unwrap().is_none());
    }

    #[test]
    fn test_remove_missing_blob_is_not_found() {
        let blobs = test_blobs();
        assert!(matches!(
            blobs.remove(&BlockId::random()),
            Err(CofferError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_releases_all_blocks() {
        let blobs = test_blobs();
        let blob = blobs.create().unwrap();
        blob.write_at(0, &[1u8; 400]).unwrap();
        let id = blob.id();
        drop(blob);

        blobs.remove(&id).unwrap();
        assert_eq!(
            blobs.nodes.cache().store().block_ids().unwrap().len(),
            0,
            "every tree block must be released"
        );
    }

    #[test]
    fn test_two_blobs_are_independent() {
        let blobs = test_blobs();
        let a = blobs.create().unwrap();
        let b = blobs.create().unwrap();

        a.write_at(0, b"aaaa").unwrap();
        b.write_at(0, b"bb").unwrap();

        assert_eq!(a.size(), 4);
        assert_eq!(b.size(), 2);
        let mut buf = [0u8; 4];
        b.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..2], b"bb");
    }
}
