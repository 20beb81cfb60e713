//! Interchangeable AEAD cipher suites.
//!
//! Encrypted block format (binary), identical for every suite:
//! ```text
//! [nonce_size bytes: random nonce][N bytes: ciphertext][16 bytes: tag]
//! ```
//!
//! Ciphertext size is always `plaintext_size + overhead()`, with a fresh
//! random nonce per `encrypt` call. Decryption fails closed: a truncated
//! input or a tag mismatch yields an error, never partial plaintext.
//!
//! All suites are AEAD; there is deliberately no unauthenticated mode.

use std::sync::Arc;

use aes_gcm::{Aes256Gcm, Nonce};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::CryptoError;
use crate::key::EncryptionKey;
use crate::TAG_SIZE;

/// Persisted name of the XChaCha20-Poly1305 suite (default).
pub const XCHACHA20_POLY1305: &str = "xchacha20-poly1305";
/// Persisted name of the AES-256-GCM suite.
pub const AES_256_GCM: &str = "aes-256-gcm";

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const XCHACHA_NONCE_SIZE: usize = 24;
/// Size of an AES-GCM nonce (96-bit)
pub const GCM_NONCE_SIZE: usize = 12;

/// One authenticated block cipher suite.
///
/// Stateless; the store picks a suite at creation time and records its
/// `name()` in the header, refusing to reopen under any other suite.
pub trait Cipher: Send + Sync {
    /// Stable name recorded in the store header.
    fn name(&self) -> &'static str;

    /// Nonce size in bytes.
    fn nonce_size(&self) -> usize;

    /// Fixed size expansion of `encrypt`: nonce plus authentication tag.
    fn overhead(&self) -> usize {
        self.nonce_size() + TAG_SIZE
    }

    /// Encrypt with a fresh random nonce. Output: `[nonce][ciphertext+tag]`.
    fn encrypt(&self, key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Authenticate and decrypt `[nonce][ciphertext+tag]`.
    fn decrypt(&self, key: &EncryptionKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Look up a cipher suite by its persisted name.
pub fn cipher_by_name(name: &str) -> Option<Arc<dyn Cipher>> {
    match name {
        XCHACHA20_POLY1305 => Some(Arc::new(XChaCha20Poly1305Cipher)),
        AES_256_GCM => Some(Arc::new(Aes256GcmCipher)),
        _ => None,
    }
}

/// Names of all supported suites.
pub fn cipher_names() -> &'static [&'static str] {
    &[XCHACHA20_POLY1305, AES_256_GCM]
}

fn check_length(ciphertext: &[u8], min: usize) -> Result<(), CryptoError> {
    if ciphertext.len() < min {
        return Err(CryptoError::TooShort {
            len: ciphertext.len(),
            min,
        });
    }
    Ok(())
}

/// XChaCha20-Poly1305 (24-byte random nonce). The default suite.
pub struct XChaCha20Poly1305Cipher;

impl Cipher for XChaCha20Poly1305Cipher {
    fn name(&self) -> &'static str {
        XCHACHA20_POLY1305
    }

    fn nonce_size(&self) -> usize {
        XCHACHA_NONCE_SIZE
    }

    fn encrypt(&self, key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

        let mut nonce_bytes = [0u8; XCHACHA_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::Encrypt(format!("xchacha20-poly1305: {e}")))?;

        let mut result = Vec::with_capacity(XCHACHA_NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, key: &EncryptionKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_length(ciphertext, self.overhead())?;

        let (nonce_bytes, rest) = ciphertext.split_at(XCHACHA_NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

        cipher
            .decrypt(nonce, rest)
            .map_err(|_| CryptoError::Authentication)
    }
}

/// AES-256-GCM (12-byte random nonce).
pub struct Aes256GcmCipher;

impl Cipher for Aes256GcmCipher {
    fn name(&self) -> &'static str {
        AES_256_GCM
    }

    fn nonce_size(&self) -> usize {
        GCM_NONCE_SIZE
    }

    fn encrypt(&self, key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Encrypt(format!("aes-256-gcm key: {e}")))?;

        let mut nonce_bytes = [0u8; GCM_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::Encrypt(format!("aes-256-gcm: {e}")))?;

        let mut result = Vec::with_capacity(GCM_NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, key: &EncryptionKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_length(ciphertext, self.overhead())?;

        let (nonce_bytes, rest) = ciphertext.split_at(GCM_NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Encrypt(format!("aes-256-gcm key: {e}")))?;

        cipher
            .decrypt(nonce, rest)
            .map_err(|_| CryptoError::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_ciphers() -> Vec<Arc<dyn Cipher>> {
        cipher_names()
            .iter()
            .map(|n| cipher_by_name(n).unwrap())
            .collect()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        for cipher in all_ciphers() {
            let key = EncryptionKey::generate();
            let plaintext = b"hello, encrypted block!";

            let encrypted = cipher.encrypt(&key, plaintext).unwrap();
            let decrypted = cipher.decrypt(&key, &encrypted).unwrap();

            assert_eq!(&decrypted, plaintext, "roundtrip for {}", cipher.name());
        }
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        for cipher in all_ciphers() {
            let key = EncryptionKey::generate();
            let encrypted = cipher.encrypt(&key, b"").unwrap();
            assert_eq!(encrypted.len(), cipher.overhead());
            let decrypted = cipher.decrypt(&key, &encrypted).unwrap();
            assert_eq!(decrypted, b"");
        }
    }

    #[test]
    fn test_ciphertext_size_is_plaintext_plus_overhead() {
        for cipher in all_ciphers() {
            let key = EncryptionKey::generate();
            let plaintext = vec![0u8; 1000];
            let encrypted = cipher.encrypt(&key, &plaintext).unwrap();
            assert_eq!(encrypted.len(), 1000 + cipher.overhead());
        }
    }

    #[test]
    fn test_decrypt_wrong_key() {
        for cipher in all_ciphers() {
            let k1 = EncryptionKey::generate();
            let k2 = EncryptionKey::generate();
            let encrypted = cipher.encrypt(&k1, b"secret data").unwrap();
            let result = cipher.decrypt(&k2, &encrypted);
            assert!(
                matches!(result, Err(CryptoError::Authentication)),
                "wrong key must fail authentication for {}",
                cipher.name()
            );
        }
    }

    #[test]
    fn test_single_bit_flip_detected() {
        for cipher in all_ciphers() {
            let key = EncryptionKey::generate();
            let encrypted = cipher.encrypt(&key, b"tamper target block").unwrap();

            // Flip one bit in the nonce, the ciphertext body, and the tag.
            for pos in [0, cipher.nonce_size() + 2, encrypted.len() - 1] {
                let mut tampered = encrypted.clone();
                tampered[pos] ^= 0x01;
                let result = cipher.decrypt(&key, &tampered);
                assert!(
                    matches!(result, Err(CryptoError::Authentication)),
                    "bit flip at {pos} must fail for {}",
                    cipher.name()
                );
            }
        }
    }

    #[test]
    fn test_truncated_ciphertext() {
        for cipher in all_ciphers() {
            let key = EncryptionKey::generate();
            let result = cipher.decrypt(&key, &vec![0u8; cipher.overhead() - 1]);
            assert!(matches!(result, Err(CryptoError::TooShort { .. })));
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_encrypt() {
        for cipher in all_ciphers() {
            let key = EncryptionKey::generate();
            let a = cipher.encrypt(&key, b"same plaintext").unwrap();
            let b = cipher.encrypt(&key, b"same plaintext").unwrap();
            assert_ne!(a, b, "two encryptions must use fresh nonces");
        }
    }

    #[test]
    fn test_cipher_by_name() {
        assert_eq!(
            cipher_by_name("xchacha20-poly1305").unwrap().name(),
            XCHACHA20_POLY1305
        );
        assert_eq!(cipher_by_name("aes-256-gcm").unwrap().name(), AES_256_GCM);
        assert!(cipher_by_name("rot13").is_none());
    }

    #[test]
    fn test_suites_are_not_interchangeable() {
        let key = EncryptionKey::generate();
        let xchacha = cipher_by_name(XCHACHA20_POLY1305).unwrap();
        let gcm = cipher_by_name(AES_256_GCM).unwrap();

        let encrypted = xchacha.encrypt(&key, b"cross-suite data").unwrap();
        assert!(gcm.decrypt(&key, &encrypted).is_err());
    }
}
