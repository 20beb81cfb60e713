//! On-block node format.
//!
//! One block's plaintext holds exactly one node:
//! ```text
//! Leaf:  [tag=1][valid-byte-count u32 LE][payload][zero padding to block size]
//! Inner: [tag=0][depth u8][packed 16-byte child BlockIds]
//! ```
//! An inner node's child count is implied by the remaining length, which
//! must divide evenly into whole ids. Anything that does not parse is
//! `CorruptLayout`, never silently treated as an empty node.

use coffer_core::{BlockId, CofferError, CofferResult, BLOCK_ID_LEN};

pub const TAG_INNER: u8 = 0;
pub const TAG_LEAF: u8 = 1;

/// Leaf header: tag byte + 4-byte valid-byte-count.
pub const LEAF_HEADER_LEN: usize = 5;
/// Inner header: tag byte + depth byte.
pub const INNER_HEADER_LEN: usize = 2;

/// Derived size constants for a fixed block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    block_size: usize,
}

impl NodeLayout {
    /// Smallest usable block size: an inner node must fit two children.
    pub const MIN_BLOCK_SIZE: usize = INNER_HEADER_LEN + 2 * BLOCK_ID_LEN;

    pub fn new(block_size: usize) -> CofferResult<Self> {
        if block_size < Self::MIN_BLOCK_SIZE {
            return Err(CofferError::Config(format!(
                "block size {block_size} below minimum {}",
                Self::MIN_BLOCK_SIZE
            )));
        }
        if block_size > u32::MAX as usize {
            return Err(CofferError::Config(format!(
                "block size {block_size} exceeds the 4-byte leaf length field"
            )));
        }
        Ok(Self { block_size })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Maximum payload bytes in one leaf.
    pub fn leaf_max_bytes(&self) -> usize {
        self.block_size - LEAF_HEADER_LEN
    }

    /// Maximum children of one inner node.
    pub fn fanout(&self) -> usize {
        (self.block_size - INNER_HEADER_LEN) / BLOCK_ID_LEN
    }

    /// Byte capacity of a subtree rooted at `depth`:
    /// `leaf_max_bytes * fanout^depth`. Overflow of u64 is a hard error,
    /// never a wrapped value.
    pub fn capacity(&self, depth: u8) -> CofferResult<u64> {
        let fanout = self.fanout() as u64;
        let mut cap = self.leaf_max_bytes() as u64;
        for _ in 0..depth {
            cap = cap.checked_mul(fanout).ok_or_else(|| {
                CofferError::CapacityOverflow(format!("tree depth {depth} exceeds u64 sizes"))
            })?;
        }
        Ok(cap)
    }

    /// Number of leaves under a subtree rooted at `depth`: `fanout^depth`.
    pub fn leaves_per_subtree(&self, depth: u8) -> CofferResult<u64> {
        let fanout = self.fanout() as u64;
        let mut leaves = 1u64;
        for _ in 0..depth {
            leaves = leaves.checked_mul(fanout).ok_or_else(|| {
                CofferError::CapacityOverflow(format!("tree depth {depth} exceeds u64 sizes"))
            })?;
        }
        Ok(leaves)
    }
}

/// Parsed content of one block: a tagged union matched exhaustively at every
/// call site. Depth-0 nodes are always leaves; an inner node at depth `d`
/// roots children of depth `d-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataNode {
    Leaf { bytes: Vec<u8> },
    Inner { depth: u8, children: Vec<BlockId> },
}

impl DataNode {
    pub fn depth(&self) -> u8 {
        match self {
            DataNode::Leaf { .. } => 0,
            DataNode::Inner { depth, .. } => *depth,
        }
    }

    /// Parse one block's plaintext. `id` is only used for error context.
    pub fn parse(id: &BlockId, bytes: &[u8], layout: NodeLayout) -> CofferResult<Self> {
        let Some(&tag) = bytes.first() else {
            return Err(CofferError::corrupt(*id, "empty block"));
        };
        match tag {
            TAG_LEAF => {
                if bytes.len() < LEAF_HEADER_LEN {
                    return Err(CofferError::corrupt(*id, "truncated leaf header"));
                }
                let count_bytes: [u8; 4] = bytes[1..LEAF_HEADER_LEN]
                    .try_into()
                    .map_err(|_| CofferError::corrupt(*id, "truncated leaf header"))?;
                let count = u32::from_le_bytes(count_bytes) as usize;
                if count > layout.leaf_max_bytes() {
                    return Err(CofferError::corrupt(
                        *id,
                        format!("leaf claims {count} bytes, above the leaf maximum"),
                    ));
                }
                if count > bytes.len() - LEAF_HEADER_LEN {
                    return Err(CofferError::corrupt(
                        *id,
                        format!("leaf claims {count} bytes but block holds fewer"),
                    ));
                }
                Ok(DataNode::Leaf {
                    bytes: bytes[LEAF_HEADER_LEN..LEAF_HEADER_LEN + count].to_vec(),
                })
            }
            TAG_INNER => {
                let depth = match bytes.get(1) {
                    Some(&d) if d > 0 => d,
                    Some(_) => return Err(CofferError::corrupt(*id, "inner node with depth 0")),
                    None => return Err(CofferError::corrupt(*id, "truncated inner header")),
                };
                let rest = &bytes[INNER_HEADER_LEN..];
                if rest.is_empty() {
                    return Err(CofferError::corrupt(*id, "inner node without children"));
                }
                if rest.len() % BLOCK_ID_LEN != 0 {
                    return Err(CofferError::corrupt(
                        *id,
                        "child list is not a whole number of block ids",
                    ));
                }
                let n = rest.len() / BLOCK_ID_LEN;
                if n > layout.fanout() {
                    return Err(CofferError::corrupt(
                        *id,
                        format!("{n} children exceed fanout {}", layout.fanout()),
                    ));
                }
                let children = rest
                    .chunks_exact(BLOCK_ID_LEN)
                    .map(|chunk| {
                        BlockId::from_slice(chunk)
                            .ok_or_else(|| CofferError::corrupt(*id, "malformed child id"))
                    })
                    .collect::<CofferResult<Vec<_>>>()?;
                Ok(DataNode::Inner { depth, children })
            }
            other => Err(CofferError::corrupt(*id, format!("unknown node tag {other}"))),
        }
    }

    /// Serialize to block plaintext. Leaves are padded to the full block
    /// size; inner nodes end right after their child list.
    pub fn serialize(&self, layout: NodeLayout) -> Vec<u8> {
        match self {
            DataNode::Leaf { bytes } => {
                debug_assert!(bytes.len() <= layout.leaf_max_bytes());
                let mut out = vec![0u8; layout.block_size()];
                out[0] = TAG_LEAF;
                out[1..LEAF_HEADER_LEN].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
                out[LEAF_HEADER_LEN..LEAF_HEADER_LEN + bytes.len()].copy_from_slice(bytes);
                out
            }
            DataNode::Inner { depth, children } => {
                debug_assert!(!children.is_empty() && children.len() <= layout.fanout());
                debug_assert!(*depth > 0);
                let mut out = Vec::with_capacity(INNER_HEADER_LEN + children.len() * BLOCK_ID_LEN);
                out.push(TAG_INNER);
                out.push(*depth);
                for child in children {
                    out.extend_from_slice(child.as_bytes());
                }
                out
            }
        }
    }
}
