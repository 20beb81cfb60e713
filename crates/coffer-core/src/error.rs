use thiserror::Error;

use crate::block_id::BlockId;

pub type CofferResult<T> = Result<T, CofferError>;

/// Error taxonomy of the storage engine.
///
/// Absence of a block on an ordinary lookup is a normal negative result and
/// is returned as `Option`/`bool` by the respective APIs; the `NotFound`
/// variant is used where absence is exceptional (e.g. removing a block that
/// does not exist). `Authentication` is always kept distinct from absence:
/// the two imply very different recovery actions (wrong password vs. missing
/// data).
#[derive(Debug, Error)]
pub enum CofferError {
    #[error("block {0} does not exist")]
    NotFound(BlockId),

    #[error("block {0} failed authentication: wrong key or tampered ciphertext")]
    Authentication(BlockId),

    #[error("block {id} has corrupt layout: {reason}")]
    CorruptLayout { id: BlockId, reason: String },

    #[error("block {0} is in use and cannot be removed")]
    ConcurrentUse(BlockId),

    #[error("size exceeds representable capacity: {0}")]
    CapacityOverflow(String),

    #[error("store config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CofferError {
    /// Helper for layout parse failures, keeping call sites short.
    pub fn corrupt(id: BlockId, reason: impl Into<String>) -> Self {
        CofferError::CorruptLayout {
            id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_block() {
        let id = BlockId::from_bytes([0xAB; 16]);
        let err = CofferError::Authentication(id);
        assert!(err.to_string().contains(&id.to_hex()));

        let err = CofferError::corrupt(id, "bad tag 7");
        assert!(err.to_string().contains("bad tag 7"));
    }
}
