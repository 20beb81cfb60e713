//! coffer-crypto: block-level authenticated encryption for CofferFS
//!
//! Every physical block is encrypted independently with an AEAD suite chosen
//! at store creation time and recorded in the store header. A fresh random
//! nonce is drawn for every encryption, so overwriting a block never reuses
//! a key/nonce pair.
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, Argon2id from passphrase + salt)
//!   └── Block Key (HKDF-SHA256 from master key, domain="coffer-blocks")
//!       └── Block AEAD: XChaCha20-Poly1305 or AES-256-GCM
//!           (key=block_key, nonce=random per store() call)
//! ```

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod key;

pub use cipher::{cipher_by_name, cipher_names, Cipher, AES_256_GCM, XCHACHA20_POLY1305};
pub use error::CryptoError;
pub use kdf::{derive_master_key, generate_salt, KdfParams, SALT_SIZE};
pub use key::{derive_block_key, EncryptionKey, KEY_SIZE};

/// Size of a Poly1305 / GCM authentication tag
pub const TAG_SIZE: usize = 16;
