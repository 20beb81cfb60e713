//! Fixed-width block identifiers.
//!
//! A `BlockId` is 16 opaque random bytes, assigned when a block is created
//! and immutable afterwards. It is the key for every storage layer below the
//! blob abstraction. Rendered as 32 lowercase hex characters.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Length of a block identifier in bytes.
pub const BLOCK_ID_LEN: usize = 16;

/// Unique identifier of one physical block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId([u8; BLOCK_ID_LEN]);

impl BlockId {
    /// The all-zero id, reserved for store-level housekeeping (never handed
    /// out by `random`).
    pub const fn zero() -> Self {
        BlockId([0u8; BLOCK_ID_LEN])
    }

    /// Generate a fresh random id from the process CSPRNG.
    pub fn random() -> Self {
        BlockId(Uuid::new_v4().into_bytes())
    }

    pub const fn from_bytes(bytes: [u8; BLOCK_ID_LEN]) -> Self {
        BlockId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_ID_LEN] {
        &self.0
    }

    /// Parse an id from a byte slice. Returns `None` on length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; BLOCK_ID_LEN] = bytes.try_into().ok()?;
        Some(BlockId(arr))
    }

    /// Render as 32 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(BLOCK_ID_LEN * 2);
        for b in &self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }

    /// Parse from 32 hex characters (case-insensitive). Returns `None` on any
    /// malformed input.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != BLOCK_ID_LEN * 2 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; BLOCK_ID_LEN];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(BlockId(bytes))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.to_hex())
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockId::from_hex(&s).ok_or_else(|| D::Error::custom(format!("invalid block id: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_differ() {
        let a = BlockId::random();
        let b = BlockId::random();
        assert_ne!(a, b, "random ids must differ");
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = BlockId::random();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(BlockId::from_hex(&hex), Some(id));
    }

    #[test]
    fn test_from_hex_rejects_malformed() {
        assert_eq!(BlockId::from_hex(""), None);
        assert_eq!(BlockId::from_hex("abc"), None);
        assert_eq!(BlockId::from_hex(&"g".repeat(32)), None);
        // right length, non-ascii
        assert_eq!(BlockId::from_hex(&"é".repeat(16)), None);
    }

    #[test]
    fn test_from_slice() {
        let id = BlockId::random();
        assert_eq!(BlockId::from_slice(id.as_bytes()), Some(id));
        assert_eq!(BlockId::from_slice(&[0u8; 5]), None);
    }

    #[test]
    fn test_zero_is_all_zeros() {
        assert_eq!(BlockId::zero().as_bytes(), &[0u8; BLOCK_ID_LEN]);
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = BlockId::random();
        let json = serde_json::to_string(&id).unwrap();
        let back: BlockId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
