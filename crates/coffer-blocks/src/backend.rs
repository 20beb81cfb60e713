//! Raw block backend: ciphertext key/value storage by block id.

use std::sync::Arc;

use coffer_core::{BlockId, CofferResult};

/// Physical storage for opaque ciphertext blobs, keyed by [`BlockId`].
///
/// Backends never see plaintext. Absence is a normal negative result
/// (`Option`/`bool`), not an error.
pub trait BlockBackend: Send + Sync {
    /// Store `data` under `id` only if no block with that id exists yet.
    /// Returns `false` (without writing) if the id is already taken.
    fn try_create(&self, id: &BlockId, data: &[u8]) -> CofferResult<bool>;

    /// Load the ciphertext stored under `id`, or `None` if absent.
    fn load(&self, id: &BlockId) -> CofferResult<Option<Vec<u8>>>;

    /// Store `data` under `id`, overwriting any previous content.
    fn store(&self, id: &BlockId, data: &[u8]) -> CofferResult<()>;

    /// Remove the block. Returns `false` if it did not exist.
    fn remove(&self, id: &BlockId) -> CofferResult<bool>;

    fn exists(&self, id: &BlockId) -> CofferResult<bool>;

    /// Enumerate every stored block id. A finite scan for integrity checks
    /// and garbage collection, not part of the ordinary I/O path.
    fn block_ids(&self) -> CofferResult<Vec<BlockId>>;
}

/// A shared backend is a backend: lets two store instances (e.g. a reopen
/// with a different key) sit on the same physical storage.
impl<B: BlockBackend + ?Sized> BlockBackend for Arc<B> {
    fn try_create(&self, id: &BlockId, data: &[u8]) -> CofferResult<bool> {
        (**self).try_create(id, data)
    }

    fn load(&self, id: &BlockId) -> CofferResult<Option<Vec<u8>>> {
        (**self).load(id)
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> CofferResult<()> {
        (**self).store(id, data)
    }

    fn remove(&self, id: &BlockId) -> CofferResult<bool> {
        (**self).remove(id)
    }

    fn exists(&self, id: &BlockId) -> CofferResult<bool> {
        (**self).exists(id)
    }

    fn block_ids(&self) -> CofferResult<Vec<BlockId>> {
        (**self).block_ids()
    }
}
