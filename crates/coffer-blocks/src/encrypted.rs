//! Encrypted block store: AEAD decorator over a raw backend.
//!
//! Every `store` re-encrypts the whole block with a fresh nonce; every
//! `load` authenticates before returning plaintext. Tampered ciphertext or
//! a wrong key surfaces as `CofferError::Authentication(id)`, never as
//! absence and never as garbage plaintext. The backend owns only
//! ciphertext; plaintext is copied out on load and never retained here.

use std::sync::Arc;

use coffer_core::{BlockId, CofferError, CofferResult};
use coffer_crypto::{Cipher, CryptoError, EncryptionKey};

use crate::backend::BlockBackend;
use crate::header::HEADER_BLOCK_ID;
use crate::store::BlockStore;

pub struct EncryptedBlockStore<B: BlockBackend> {
    backend: B,
    cipher: Arc<dyn Cipher>,
    key: EncryptionKey,
}

impl<B: BlockBackend> EncryptedBlockStore<B> {
    /// Wrap `backend` with the given cipher suite and resolved key.
    /// (Use [`crate::init_store`] / [`crate::open_store`] to go through the
    /// store header and passphrase KDF.)
    pub fn new(backend: B, cipher: Arc<dyn Cipher>, key: EncryptionKey) -> Self {
        Self {
            backend,
            cipher,
            key,
        }
    }

    /// Name of the cipher suite this store encrypts with.
    pub fn cipher_name(&self) -> &'static str {
        self.cipher.name()
    }

    fn encrypt(&self, plaintext: &[u8]) -> CofferResult<Vec<u8>> {
        self.cipher
            .encrypt(&self.key, plaintext)
            .map_err(|e| CofferError::Other(anyhow::anyhow!("block encryption failed: {e}")))
    }

    fn decrypt(&self, id: &BlockId, ciphertext: &[u8]) -> CofferResult<Vec<u8>> {
        self.cipher.decrypt(&self.key, ciphertext).map_err(|e| match e {
            CryptoError::Authentication | CryptoError::TooShort { .. } => {
                CofferError::Authentication(*id)
            }
            other => CofferError::Other(anyhow::anyhow!("block decryption failed: {other}")),
        })
    }
}

impl<B: BlockBackend> BlockStore for EncryptedBlockStore<B> {
    fn create(&self, size: usize) -> CofferResult<BlockId> {
        let ciphertext = self.encrypt(&vec![0u8; size])?;
        loop {
            let id = BlockId::random();
            if id == HEADER_BLOCK_ID {
                continue;
            }
            if self.backend.try_create(&id, &ciphertext)? {
                return Ok(id);
            }
            // 128-bit collision; retry with a new id.
        }
    }

    fn load(&self, id: &BlockId) -> CofferResult<Option<Vec<u8>>> {
        if *id == HEADER_BLOCK_ID {
            return Ok(None);
        }
        match self.backend.load(id)? {
            Some(ciphertext) => Ok(Some(self.decrypt(id, &ciphertext)?)),
            None => Ok(None),
        }
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> CofferResult<()> {
        if *id == HEADER_BLOCK_ID {
            return Err(CofferError::Config(
                "the all-zero block id is reserved for the store header".to_string(),
            ));
        }
        let ciphertext = self.encrypt(data)?;
        self.backend.store(id, &ciphertext)
    }

    fn remove(&self, id: &BlockId) -> CofferResult<()> {
        if *id == HEADER_BLOCK_ID {
            return Err(CofferError::Config(
                "the all-zero block id is reserved for the store header".to_string(),
            ));
        }
        if self.backend.remove(id)? {
            Ok(())
        } else {
            Err(CofferError::NotFound(*id))
        }
    }

    fn exists(&self, id: &BlockId) -> CofferResult<bool> {
        if *id == HEADER_BLOCK_ID {
            return Ok(false);
        }
        self.backend.exists(id)
    }

    fn block_ids(&self) -> CofferResult<Vec<BlockId>> {
        Ok(self
            .backend
            .block_ids()?
            .into_iter()
            .filter(|id| *id != HEADER_BLOCK_ID)
            .collect())
    }
}
