use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CofferError, CofferResult};

/// Store configuration (loaded from coffer.toml).
///
/// Every field has a default so a partial (or missing) config file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cipher suite for newly created stores (default: xchacha20-poly1305).
    /// Existing stores always reopen with the suite recorded in their header.
    pub cipher: String,
    /// Plaintext block size in bytes (default: 4096)
    pub block_size_bytes: usize,
    /// Maximum number of blocks held in the cache before the background
    /// evictor starts flushing unreferenced entries (default: 1024)
    pub cache_capacity: usize,
    /// Background flush/eviction interval in milliseconds (default: 1000)
    pub flush_interval_ms: u64,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cipher: "xchacha20-poly1305".to_string(),
            block_size_bytes: 4096,
            cache_capacity: 1024,
            flush_interval_ms: 1000,
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl StoreConfig {
    /// Load a config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> CofferResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CofferError::Config(format!("parsing {}: {e}", path.display())))
    }
}
