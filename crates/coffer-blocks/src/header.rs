//! Store header: the one reserved block that makes a store reopenable.
//!
//! The header lives unencrypted under the all-zero block id and records
//! everything needed before the key exists: cipher identity, KDF salt and
//! parameters, and a key probe (a small constant encrypted under the store
//! key at creation time) so a wrong passphrase is rejected at open time
//! instead of surfacing later on some arbitrary block.
//!
//! Header document (JSON):
//! ```text
//! {
//!   "format_version": 1,
//!   "cipher": "xchacha20-poly1305",
//!   "kdf_salt": "<base64, 16 bytes>",
//!   "kdf": { "mem_cost_kib": ..., "time_cost": ..., "parallelism": ... },
//!   "key_probe": "<base64 ciphertext>"
//! }
//! ```

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use coffer_core::{BlockId, CofferError, CofferResult, StoreConfig};
use coffer_crypto::{
    cipher_by_name, derive_block_key, derive_master_key, generate_salt, KdfParams, SALT_SIZE,
};

use crate::backend::BlockBackend;
use crate::encrypted::EncryptedBlockStore;

/// The reserved block id holding the store header.
pub const HEADER_BLOCK_ID: BlockId = BlockId::zero();

pub const FORMAT_VERSION: u32 = 1;

const KEY_PROBE: &[u8] = b"coffer key probe v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHeader {
    pub format_version: u32,
    /// Cipher suite name; the store refuses to open under any other suite.
    pub cipher: String,
    /// Argon2id salt (base64, 16 bytes)
    pub kdf_salt: String,
    pub kdf: KdfParams,
    /// Probe constant encrypted under the block key (base64)
    pub key_probe: String,
}

impl StoreHeader {
    pub fn to_bytes(&self) -> CofferResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CofferError::Config(format!("header serialization: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> CofferResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CofferError::Config(format!("header deserialization: {e}")))
    }
}

/// Initialize a fresh store on `backend`: derive the key hierarchy from
/// `passphrase`, write the header block, and return the encrypted store.
///
/// Fails if the backend already carries a header.
pub fn init_store<B: BlockBackend>(
    backend: B,
    config: &StoreConfig,
    passphrase: &SecretString,
) -> CofferResult<EncryptedBlockStore<B>> {
    let cipher = cipher_by_name(&config.cipher)
        .ok_or_else(|| CofferError::Config(format!("unknown cipher suite: {}", config.cipher)))?;

    let kdf = KdfParams {
        mem_cost_kib: config.argon2_mem_cost_kib,
        time_cost: config.argon2_time_cost,
        parallelism: config.argon2_parallelism,
    };
    let salt = generate_salt();
    let master = derive_master_key(passphrase, &salt, &kdf)
        .map_err(|e| CofferError::Config(e.to_string()))?;
    let key = derive_block_key(&master).map_err(|e| CofferError::Config(e.to_string()))?;

    let probe = cipher
        .encrypt(&key, KEY_PROBE)
        .map_err(|e| CofferError::Other(anyhow::anyhow!("encrypting key probe: {e}")))?;

    let header = StoreHeader {
        format_version: FORMAT_VERSION,
        cipher: config.cipher.clone(),
        kdf_salt: base64_encode(&salt),
        kdf,
        key_probe: base64_encode(&probe),
    };

    if !backend.try_create(&HEADER_BLOCK_ID, &header.to_bytes()?)? {
        return Err(CofferError::Config(
            "store already initialized (header block present)".to_string(),
        ));
    }

    tracing::debug!(cipher = %header.cipher, "initialized new block store");
    Ok(EncryptedBlockStore::new(backend, cipher, key))
}

/// Open an existing store: read the header, re-derive the key from
/// `passphrase` with the recorded salt/params, and verify it against the
/// key probe. A wrong passphrase is an `Authentication` error; a missing or
/// malformed header is a `Config` error.
pub fn open_store<B: BlockBackend>(
    backend: B,
    passphrase: &SecretString,
) -> CofferResult<EncryptedBlockStore<B>> {
    let bytes = backend.load(&HEADER_BLOCK_ID)?.ok_or_else(|| {
        CofferError::Config("missing store header (not an initialized store)".to_string())
    })?;
    let header = StoreHeader::from_bytes(&bytes)?;

    if header.format_version != FORMAT_VERSION {
        return Err(CofferError::Config(format!(
            "unsupported store format version {}",
            header.format_version
        )));
    }

    let cipher = cipher_by_name(&header.cipher).ok_or_else(|| {
        CofferError::Config(format!("store uses unknown cipher suite: {}", header.cipher))
    })?;

    let salt: [u8; SALT_SIZE] = base64_decode(&header.kdf_salt)?
        .try_into()
        .map_err(|_| CofferError::Config("header salt has wrong length".to_string()))?;
    let master = derive_master_key(passphrase, &salt, &header.kdf)
        .map_err(|e| CofferError::Config(e.to_string()))?;
    let key = derive_block_key(&master).map_err(|e| CofferError::Config(e.to_string()))?;

    let probe = base64_decode(&header.key_probe)?;
    match cipher.decrypt(&key, &probe) {
        Ok(plaintext) if plaintext == KEY_PROBE => {}
        _ => return Err(CofferError::Authentication(HEADER_BLOCK_ID)),
    }

    tracing::debug!(cipher = %header.cipher, "opened block store");
    Ok(EncryptedBlockStore::new(backend, cipher, key))
}

fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

fn base64_decode(s: &str) -> CofferResult<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(s)
        .map_err(|e| CofferError::Config(format!("header base64 decode: {e}")))
}
