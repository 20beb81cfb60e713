//! Key material handling: zeroized on drop, constant-time comparison.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of an encryption key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Generate a random 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time: key comparison must not leak matching prefixes.
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for EncryptionKey {}

/// Derive the block-store key from the master key via HKDF-SHA256.
pub fn derive_block_key(master: &EncryptionKey) -> Result<EncryptionKey, CryptoError> {
    hkdf_derive(master.as_bytes(), b"coffer-blocks")
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> Result<EncryptionKey, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand failed: {e}")))?;
    Ok(EncryptionKey::from_bytes(okm))
}
