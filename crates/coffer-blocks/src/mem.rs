//! In-memory block backend, used for tests and ephemeral stores.

use std::collections::HashMap;
use std::sync::Mutex;

use coffer_core::{BlockId, CofferResult};

use crate::backend::BlockBackend;

#[derive(Default)]
pub struct InMemoryBackend {
    blocks: Mutex<HashMap<BlockId, Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockBackend for InMemoryBackend {
    fn try_create(&self, id: &BlockId, data: &[u8]) -> CofferResult<bool> {
        let mut blocks = self.blocks.lock().unwrap();
        if blocks.contains_key(id) {
            return Ok(false);
        }
        blocks.insert(*id, data.to_vec());
        Ok(true)
    }

    fn load(&self, id: &BlockId) -> CofferResult<Option<Vec<u8>>> {
        Ok(self.blocks.lock().unwrap().get(id).cloned())
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> CofferResult<()> {
        self.blocks.lock().unwrap().insert(*id, data.to_vec());
        Ok(())
    }

    fn remove(&self, id: &BlockId) -> CofferResult<bool> {
        Ok(self.blocks.lock().unwrap().remove(id).is_some())
    }

    fn exists(&self, id: &BlockId) -> CofferResult<bool> {
        Ok(self.blocks.lock().unwrap().contains_key(id))
    }

    fn block_ids(&self) -> CofferResult<Vec<BlockId>> {
        Ok(self.blocks.lock().unwrap().keys().copied().collect())
    }
}
