//! Encryption-at-rest primitives.
//!
//! Provides field-level authenticated encryption using:
//! - AES-256-GCM (default) or ChaCha20-Poly1305 with detached tags
//! - Argon2id for per-version key derivation from a master secret
//! - Zeroizing key material that never prints
//!
//! # Payloads
//!
//! Every encryption produces an [`EncryptedPayload`] that records the key
//! version used. Decryption looks the key up by that recorded version, so
//! ciphertext written before a key rotation stays readable afterwards.
//!
//! This crate is synchronous and does no I/O. Key lookup, version
//! bookkeeping and rotation live in `atrest-keys`.

mod cipher;
mod error;
pub mod hash;
mod key;
pub mod payload;

pub use cipher::{Algorithm, IV_SIZE, SealedParts, TAG_SIZE, open, seal};
pub use error::{CryptoError, CryptoResult, ErrorCode};
pub use hash::{generate_token, hash_secret, verify_secret};
pub use key::{
    KEY_SIZE, KdfParams, KeyMaterial, derive_key, derive_version_key, generate_random_key,
    version_salt,
};
pub use payload::{EncryptedPayload, SealParams, decrypt_payload, encrypt_payload};
