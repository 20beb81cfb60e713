//! On-disk block backend.
//!
//! Blocks are files named by their hex id under a two-level sharded layout
//! (`{root}/{hex[0..2]}/{hex}`), written atomically (temp → rename) so a
//! crash never leaves a half-written block behind.

use std::io;
use std::path::{Path, PathBuf};

use coffer_core::{BlockId, CofferResult};

use crate::backend::BlockBackend;

pub struct OnDiskBackend {
    root: PathBuf,
}

impl OnDiskBackend {
    /// Open (creating if necessary) a block directory at `root`.
    pub fn open(root: &Path) -> CofferResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Two-level sharding: first two hex chars as subdirectory.
    fn path_for(&self, id: &BlockId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(&hex)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> CofferResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl BlockBackend for OnDiskBackend {
    fn try_create(&self, id: &BlockId, data: &[u8]) -> CofferResult<bool> {
        let path = self.path_for(id);
        if path.exists() {
            return Ok(false);
        }
        self.write_atomic(&path, data)?;
        Ok(true)
    }

    fn load(&self, id: &BlockId) -> CofferResult<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(id)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> CofferResult<()> {
        self.write_atomic(&self.path_for(id), data)
    }

    fn remove(&self, id: &BlockId) -> CofferResult<bool> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &BlockId) -> CofferResult<bool> {
        Ok(self.path_for(id).exists())
    }

    fn block_ids(&self) -> CofferResult<Vec<BlockId>> {
        let mut ids = Vec::new();
        for shard in std::fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.ends_with(".tmp") {
                    continue;
                }
                match BlockId::from_hex(&name) {
                    Some(id) => ids.push(id),
                    None => {
                        tracing::debug!(file = %name, "skipping foreign file in block directory");
                    }
                }
            }
        }
        Ok(ids)
    }
}
