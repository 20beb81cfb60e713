//! Node-level operations over the block cache: load/store/create/remove of
//! parsed nodes, plus the subtree algorithms behind blob grow and shrink.
//!
//! The tree keeps the left-max-data shape: at every level, every child
//! except the rightmost is completely full. That makes a subtree's size
//! recomputable from one rightmost descent and keeps offset arithmetic a
//! pure div/mod walk.

use coffer_core::{BlockId, CofferError, CofferResult};

use coffer_blocks::{BlockCache, BlockStore, CacheConfig};

use crate::node::{DataNode, NodeLayout};

pub struct NodeStore {
    cache: BlockCache,
    layout: NodeLayout,
}

impl NodeStore {
    pub fn new(
        store: Box<dyn BlockStore>,
        layout: NodeLayout,
        cache_config: CacheConfig,
    ) -> CofferResult<Self> {
        Ok(Self {
            cache: BlockCache::new(store, cache_config)?,
            layout,
        })
    }

    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Load and parse a node; `None` if the block does not exist.
    pub fn try_load(&self, id: &BlockId) -> CofferResult<Option<DataNode>> {
        match self.cache.load(id)? {
            Some(handle) => Ok(Some(handle.read(|bytes| {
                DataNode::parse(id, bytes, self.layout)
            })?)),
            None => Ok(None),
        }
    }

    /// Load a node that the tree structure says must exist. A dangling
    /// reference is corruption, not a normal miss.
    pub fn load(&self, id: &BlockId) -> CofferResult<DataNode> {
        self.try_load(id)?
            .ok_or_else(|| CofferError::corrupt(*id, "referenced node does not exist"))
    }

    /// Allocate a new block holding `node`.
    pub fn create(&self, node: &DataNode) -> CofferResult<BlockId> {
        let bytes = node.serialize(self.layout);
        let handle = self.cache.create(bytes.len())?;
        handle.write(|buf| {
            buf.clear();
            buf.extend_from_slice(&bytes);
        });
        Ok(handle.id())
    }

    /// Overwrite an existing block with `node`.
    pub fn write(&self, id: &BlockId, node: &DataNode) -> CofferResult<()> {
        let bytes = node.serialize(self.layout);
        let handle = self
            .cache
            .load(id)?
            .ok_or_else(|| CofferError::corrupt(*id, "node vanished during update"))?;
        handle.write(|buf| {
            buf.clear();
            buf.extend_from_slice(&bytes);
        });
        Ok(())
    }

    pub fn remove(&self, id: &BlockId) -> CofferResult<()> {
        self.cache.remove(id)
    }

    /// Load a leaf, apply `f` to its payload, write it back.
    pub fn update_leaf(&self, id: &BlockId, f: impl FnOnce(&mut Vec<u8>)) -> CofferResult<()> {
        match self.load(id)? {
            DataNode::Leaf { mut bytes } => {
                f(&mut bytes);
                debug_assert!(bytes.len() <= self.layout.leaf_max_bytes());
                self.write(id, &DataNode::Leaf { bytes })
            }
            DataNode::Inner { .. } => Err(CofferError::corrupt(*id, "expected a leaf node")),
        }
    }

    /// Recompute a subtree's byte size by one rightmost descent.
    pub fn subtree_size(&self, id: &BlockId) -> CofferResult<u64> {
        match self.load(id)? {
            DataNode::Leaf { bytes } => Ok(bytes.len() as u64),
            DataNode::Inner { depth, children } => {
                let child_cap = self.layout.capacity(depth - 1)?;
                let full = (children.len() as u64 - 1) * child_cap;
                let last = children
                    .last()
                    .ok_or_else(|| CofferError::corrupt(*id, "inner node without children"))?;
                Ok(full + self.subtree_size(last)?)
            }
        }
    }

    /// Build a fresh all-zero subtree of `size` bytes rooted at `depth`.
    pub fn create_zero_subtree(&self, depth: u8, size: u64) -> CofferResult<BlockId> {
        if depth == 0 {
            debug_assert!(size <= self.layout.leaf_max_bytes() as u64);
            return self.create(&DataNode::Leaf {
                bytes: vec![0u8; size as usize],
            });
        }
        let child_cap = self.layout.capacity(depth - 1)?;
        let n = size.div_ceil(child_cap).max(1);
        let mut children = Vec::with_capacity(n as usize);
        for i in 0..n {
            let child_size = if i == n - 1 {
                size - i * child_cap
            } else {
                child_cap
            };
            children.push(self.create_zero_subtree(depth - 1, child_size)?);
        }
        self.create(&DataNode::Inner { depth, children })
    }

    /// Grow a subtree from `cur` to `target` bytes, zero-filling. `target`
    /// must fit the subtree's capacity; depth never changes here (the blob
    /// wraps the root first when it has to).
    pub fn grow_subtree(
        &self,
        id: &BlockId,
        depth: u8,
        cur: u64,
        target: u64,
    ) -> CofferResult<()> {
        debug_assert!(cur <= target);
        if depth == 0 {
            return self.update_leaf(id, |bytes| bytes.resize(target as usize, 0));
        }

        let DataNode::Inner { children, .. } = self.load(id)? else {
            return Err(CofferError::corrupt(*id, "expected an inner node"));
        };
        let child_cap = self.layout.capacity(depth - 1)?;
        let n = children.len() as u64;
        let target_n = target.div_ceil(child_cap).max(1);

        // The rightmost existing child grows first (to full, or to the
        // final target if no new siblings are needed).
        let last = children[children.len() - 1];
        let last_cur = cur - (n - 1) * child_cap;
        let last_target = if target_n == n {
            target - (n - 1) * child_cap
        } else {
            child_cap
        };
        if last_target > last_cur {
            self.grow_subtree(&last, depth - 1, last_cur, last_target)?;
        }

        if target_n > n {
            let mut children = children;
            for i in n..target_n {
                let child_size = if i == target_n - 1 {
                    target - i * child_cap
                } else {
                    child_cap
                };
                children.push(self.create_zero_subtree(depth - 1, child_size)?);
            }
            self.write(id, &DataNode::Inner { depth, children })?;
        }
        Ok(())
    }

    /// Shrink a subtree from `cur` to `target` bytes, releasing every block
    /// that falls beyond the new size.
    pub fn shrink_subtree(
        &self,
        id: &BlockId,
        depth: u8,
        cur: u64,
        target: u64,
    ) -> CofferResult<()> {
        debug_assert!(target <= cur);
        if depth == 0 {
            return self.update_leaf(id, |bytes| bytes.truncate(target as usize));
        }

        let DataNode::Inner { children, .. } = self.load(id)? else {
            return Err(CofferError::corrupt(*id, "expected an inner node"));
        };
        let child_cap = self.layout.capacity(depth - 1)?;
        let n = children.len() as u64;
        let keep = target.div_ceil(child_cap).max(1);

        for child in &children[keep as usize..] {
            self.delete_subtree(child)?;
        }
        let kept: Vec<BlockId> = children[..keep as usize].to_vec();
        let last = kept[kept.len() - 1];
        if keep < n {
            self.write(
                id,
                &DataNode::Inner {
                    depth,
                    children: kept,
                },
            )?;
        }

        let last_cur = if keep == n {
            cur - (keep - 1) * child_cap
        } else {
            child_cap
        };
        let last_target = target - (keep - 1) * child_cap;
        if last_target < last_cur {
            self.shrink_subtree(&last, depth - 1, last_cur, last_target)?;
        }
        Ok(())
    }

    /// Remove a whole subtree, children first.
    pub fn delete_subtree(&self, id: &BlockId) -> CofferResult<()> {
        if let DataNode::Inner { children, .. } = self.load(id)? {
            for child in &children {
                self.delete_subtree(child)?;
            }
        }
        self.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use coffer_blocks::InMemoryBackend;
    use coffer_crypto::{cipher_by_name, EncryptionKey};

    use super::*;

    fn test_nodes() -> NodeStore {
        let store = coffer_blocks::EncryptedBlockStore::new(
            InMemoryBackend::new(),
            cipher_by_name("xchacha20-poly1305").unwrap(),
            EncryptionKey::from_bytes([9u8; 32]),
        );
        NodeStore::new(
            Box::new(store),
            NodeLayout::new(64).unwrap(),
            CacheConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_load_roundtrip() {
        let nodes = test_nodes();
        let leaf = DataNode::Leaf {
            bytes: b"payload".to_vec(),
        };
        let id = nodes.create(&leaf).unwrap();
        assert_eq!(nodes.load(&id).unwrap(), leaf);
    }

    #[test]
    fn test_try_load_missing_is_none() {
        let nodes = test_nodes();
        assert!(nodes.try_load(&BlockId::random()).unwrap().is_none());
    }

    #[test]
    fn test_create_zero_subtree_sizes() {
        let nodes = test_nodes();
        // leaf_max 59, fanout 3; 150 bytes needs a depth-1 tree of 3 leaves.
        let root = nodes.create_zero_subtree(1, 150).unwrap();
        assert_eq!(nodes.subtree_size(&root).unwrap(), 150);

        match nodes.load(&root).unwrap() {
            DataNode::Inner { depth, children } => {
                assert_eq!(depth, 1);
                assert_eq!(children.len(), 3);
                // left-max-data: first two leaves full, last partial
                for (i, child) in children.iter().enumerate() {
                    let DataNode::Leaf { bytes } = nodes.load(child).unwrap() else {
                        panic!("expected leaf");
                    };
                    let expected = if i < 2 { 59 } else { 150 - 2 * 59 };
                    assert_eq!(bytes.len(), expected);
                    assert!(bytes.iter().all(|&b| b == 0));
                }
            }
            other => panic!("expected inner root, got {other:?}"),
        }
    }

    #[test]
    fn test_grow_then_shrink_subtree() {
        let nodes = test_nodes();
        let root = nodes.create_zero_subtree(2, 10).unwrap();

        nodes.grow_subtree(&root, 2, 10, 500).unwrap();
        assert_eq!(nodes.subtree_size(&root).unwrap(), 500);

        nodes.shrink_subtree(&root, 2, 500, 60).unwrap();
        assert_eq!(nodes.subtree_size(&root).unwrap(), 60);
    }

    #[test]
    fn test_shrink_releases_blocks() {
        let nodes = test_nodes();
        let root = nodes.create_zero_subtree(1, 177).unwrap();
        let before = nodes.cache().store().block_ids().unwrap().len();
        assert_eq!(before, 4, "inner root + 3 leaves");

        nodes.shrink_subtree(&root, 1, 177, 59).unwrap();
        nodes.cache().flush_all().unwrap();
        let after = nodes.cache().store().block_ids().unwrap().len();
        assert_eq!(after, 2, "two leaves must be released");
    }

    #[test]
    fn test_delete_subtree_removes_everything() {
        let nodes = test_nodes();
        let root = nodes.create_zero_subtree(2, 400).unwrap();
        assert!(nodes.cache().store().block_ids().unwrap().len() > 5);

        nodes.delete_subtree(&root).unwrap();
        assert_eq!(nodes.cache().store().block_ids().unwrap().len(), 0);
    }

    #[test]
    fn test_corrupt_node_fails_loudly() {
        let nodes = test_nodes();
        let id = nodes.create(&DataNode::Leaf { bytes: vec![] }).unwrap();

        // Overwrite with garbage that decrypts fine but doesn't parse.
        let handle = nodes.cache().load(&id).unwrap().unwrap();
        handle.write(|buf| {
            buf.clear();
            buf.extend_from_slice(&[42u8; 10]);
        });
        drop(handle);

        let err = nodes.load(&id).unwrap_err();
        assert!(matches!(err, CofferError::CorruptLayout { .. }));
    }
}
