use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Tag mismatch: wrong key or tampered ciphertext. Deliberately carries
    /// no detail beyond the fact of failure.
    #[error("ciphertext failed authentication: wrong key or tampered data")]
    Authentication,

    #[error("ciphertext too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),
}
