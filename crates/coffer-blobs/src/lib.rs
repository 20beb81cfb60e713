//! coffer-blobs: variable-size blobs on top of fixed-size encrypted blocks
//!
//! A blob is a tree of blocks: leaf nodes carry raw bytes, inner nodes carry
//! packed child ids. Capacity at depth `d` is `leaf_max_bytes * fanout^d`;
//! growth wraps the root, shrinking collapses it, and random-offset access
//! walks one root-to-leaf path by integer arithmetic.
//!
//! The public surface for the filesystem-binding layer is [`BlobStore`]
//! (create/open/remove) and [`Blob`] (read/write/resize/flush).

pub mod blob;
pub mod node;
pub mod store;
pub mod tree;

pub use blob::Blob;
pub use node::{DataNode, NodeLayout};
pub use store::BlobStore;
pub use tree::NodeStore;
