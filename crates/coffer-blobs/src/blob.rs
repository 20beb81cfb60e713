//! A blob: one variable-size byte sequence backed by a node tree.
//!
//! A blob is identified by the block id of its root node; growth and shrink
//! change that identity exactly when the tree's depth changes. The owning
//! [`crate::BlobStore`] keeps a registry so each blob has at most one live
//! instance, and the registry is re-keyed here whenever the root moves.
//!
//! All operations serialize on the blob's internal mutex; operations on
//! different blobs run in parallel. Nothing here is durable until `flush`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use coffer_core::{BlockId, CofferError, CofferResult};

use crate::node::DataNode;
use crate::tree::NodeStore;

pub(crate) type BlobRegistry = Arc<Mutex<HashMap<BlockId, Weak<Blob>>>>;

struct BlobState {
    root: BlockId,
    depth: u8,
    size: u64,
}

pub struct Blob {
    nodes: Arc<NodeStore>,
    registry: BlobRegistry,
    self_weak: Weak<Blob>,
    state: Mutex<BlobState>,
}

impl Blob {
    pub(crate) fn new(
        nodes: Arc<NodeStore>,
        registry: BlobRegistry,
        root: BlockId,
        depth: u8,
        size: u64,
    ) -> Arc<Blob> {
        Arc::new_cyclic(|self_weak| Blob {
            nodes,
            registry,
            self_weak: self_weak.clone(),
            state: Mutex::new(BlobState { root, depth, size }),
        })
    }

    /// Current identity: the root node's block id.
    pub fn id(&self) -> BlockId {
        self.state.lock().unwrap().root
    }

    /// Current length in bytes.
    pub fn size(&self) -> u64 {
        self.state.lock().unwrap().size
    }

    /// Current tree depth (0 = the whole blob is one leaf).
    pub fn depth(&self) -> u8 {
        self.state.lock().unwrap().depth
    }

    /// Read up to `buf.len()` bytes starting at `offset`. Reads past the end
    /// return fewer bytes (possibly zero); reads inside `[0, size)` never
    /// error.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> CofferResult<usize> {
        let state = self.state.lock().unwrap();
        if offset >= state.size || buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min((state.size - offset) as usize);
        let leaf_max = self.nodes.layout().leaf_max_bytes() as u64;

        let mut done = 0usize;
        while done < n {
            let pos = offset + done as u64;
            let leaf_index = pos / leaf_max;
            let in_leaf = (pos % leaf_max) as usize;

            let leaf_id = self.find_leaf(&state, leaf_index)?;
            let take = match self.nodes.load(&leaf_id)? {
                DataNode::Leaf { bytes } => {
                    if in_leaf >= bytes.len() {
                        return Err(CofferError::corrupt(
                            leaf_id,
                            "leaf shorter than the blob size implies",
                        ));
                    }
                    let take = (n - done).min(bytes.len() - in_leaf);
                    buf[done..done + take].copy_from_slice(&bytes[in_leaf..in_leaf + take]);
                    take
                }
                DataNode::Inner { .. } => {
                    return Err(CofferError::corrupt(leaf_id, "expected a leaf node"))
                }
            };
            done += take;
        }
        Ok(n)
    }

    /// Write `data` at `offset`, growing the blob (zero-filling any gap)
    /// when the write reaches past the current end.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> CofferResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(data.len() as u64).ok_or_else(|| {
            CofferError::CapacityOverflow("write range exceeds u64".to_string())
        })?;

        let mut state = self.state.lock().unwrap();
        if end > state.size {
            self.grow_locked(&mut state, end)?;
        }

        let leaf_max = self.nodes.layout().leaf_max_bytes() as u64;
        let mut done = 0usize;
        while done < data.len() {
            let pos = offset + done as u64;
            let leaf_index = pos / leaf_max;
            let in_leaf = (pos % leaf_max) as usize;
            let take = (data.len() - done).min(leaf_max as usize - in_leaf);

            let leaf_id = self.find_leaf(&state, leaf_index)?;
            let chunk = &data[done..done + take];
            self.nodes.update_leaf(&leaf_id, |bytes| {
                bytes[in_leaf..in_leaf + take].copy_from_slice(chunk);
            })?;
            done += take;
        }
        Ok(())
    }

    /// Grow (zero-filled) or shrink to exactly `new_size` bytes.
    pub fn resize(&self, new_size: u64) -> CofferResult<()> {
        let mut state = self.state.lock().unwrap();
        if new_size > state.size {
            self.grow_locked(&mut state, new_size)
        } else if new_size < state.size {
            self.shrink_locked(&mut state, new_size)
        } else {
            Ok(())
        }
    }

    /// Write every dirty node of this blob's tree through to the encrypted
    /// store. The only operation that makes data durable.
    pub fn flush(&self) -> CofferResult<()> {
        let state = self.state.lock().unwrap();
        self.flush_subtree(&state.root)
    }

    /// Post-order flush: children reach the store before their parent.
    fn flush_subtree(&self, id: &BlockId) -> CofferResult<()> {
        if let DataNode::Inner { children, .. } = self.nodes.load(id)? {
            for child in &children {
                self.flush_subtree(child)?;
            }
        }
        self.nodes.cache().flush_block(id)
    }

    /// Descend from the root to the id of leaf number `leaf_index`,
    /// an O(depth) div/mod walk.
    fn find_leaf(&self, state: &BlobState, leaf_index: u64) -> CofferResult<BlockId> {
        let mut id = state.root;
        let mut depth = state.depth;
        let mut index = leaf_index;
        while depth > 0 {
            let DataNode::Inner { children, .. } = self.nodes.load(&id)? else {
                return Err(CofferError::corrupt(id, "expected an inner node on the path"));
            };
            let stride = self.nodes.layout().leaves_per_subtree(depth - 1)?;
            let child_idx = (index / stride) as usize;
            if child_idx >= children.len() {
                return Err(CofferError::corrupt(
                    id,
                    format!("leaf index walks past child {child_idx}"),
                ));
            }
            id = children[child_idx];
            index %= stride;
            depth -= 1;
        }
        Ok(id)
    }

    fn grow_locked(&self, state: &mut BlobState, new_size: u64) -> CofferResult<()> {
        // Wrap the root until the tree is deep enough; this is the only way
        // depth increases, and it changes the blob's identity.
        while self.nodes.layout().capacity(state.depth)? < new_size {
            let new_root = self.nodes.create(&DataNode::Inner {
                depth: state.depth + 1,
                children: vec![state.root],
            })?;
            self.rekey(state.root, new_root);
            tracing::debug!(
                old_root = %state.root,
                new_root = %new_root,
                depth = state.depth + 1,
                "blob tree grew a level"
            );
            state.root = new_root;
            state.depth += 1;
        }
        self.nodes
            .grow_subtree(&state.root, state.depth, state.size, new_size)?;
        state.size = new_size;
        Ok(())
    }

    fn shrink_locked(&self, state: &mut BlobState, new_size: u64) -> CofferResult<()> {
        self.nodes
            .shrink_subtree(&state.root, state.depth, state.size, new_size)?;

        // Collapse: a root with a single child hands its identity down.
        while state.depth > 0 {
            let DataNode::Inner { children, .. } = self.nodes.load(&state.root)? else {
                return Err(CofferError::corrupt(state.root, "expected an inner root"));
            };
            if children.len() > 1 {
                break;
            }
            let child = children[0];
            self.nodes.remove(&state.root)?;
            self.rekey(state.root, child);
            state.root = child;
            state.depth -= 1;
        }
        state.size = new_size;
        Ok(())
    }

    /// Move this blob's registry entry when the root id changes.
    fn rekey(&self, old_root: BlockId, new_root: BlockId) {
        let mut registry = self.registry.lock().unwrap();
        registry.remove(&old_root);
        registry.insert(new_root, self.self_weak.clone());
    }
}
