//! Key derivation: Argon2id passphrase → master key

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::key::{EncryptionKey, KEY_SIZE};

/// Size of the KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Argon2id parameters. Persisted in the store header so a store always
/// reopens with the parameters it was created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Generate a random KDF salt. Stored alongside the encrypted data; does not
/// need to be secret.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit master key from a passphrase and salt using Argon2id.
pub fn derive_master_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> Result<EncryptionKey, CryptoError> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Kdf(format!("Argon2id KDF failed: {e}")))?;

    Ok(EncryptionKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fast params so the test suite doesn't burn 64 MiB per derivation.
    fn test_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("test-passphrase-123");
        let salt = [1u8; SALT_SIZE];

        let key1 = derive_master_key(&passphrase, &salt, &test_params()).unwrap();
        let key2 = derive_master_key(&passphrase, &salt, &test_params()).unwrap();

        assert_eq!(key1, key2, "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; SALT_SIZE];
        let key1 = derive_master_key(&SecretString::from("passphrase-a"), &salt, &test_params())
            .unwrap();
        let key2 = derive_master_key(&SecretString::from("passphrase-b"), &salt, &test_params())
            .unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_kdf_different_salts() {
        let passphrase = SecretString::from("same-passphrase");
        let key1 = derive_master_key(&passphrase, &[1u8; SALT_SIZE], &test_params()).unwrap();
        let key2 = derive_master_key(&passphrase, &[2u8; SALT_SIZE], &test_params()).unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
