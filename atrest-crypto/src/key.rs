//! Key material and password-based key derivation.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm as Argon2Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Domain prefix for per-version derivation salts.
const VERSION_SALT_PREFIX: &str = "atrest:key-version:";

/// A 256-bit symmetric key. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_SIZE]);

impl KeyMaterial {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds a key from a slice, rejecting anything that is not exactly
    /// [`KEY_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes over memory.
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost preset. Only for tests and local tooling.
    pub fn low_cost() -> Self {
        Self {
            memory_kib: 1_024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Derives a key from `secret` and `salt` with Argon2id.
pub fn derive_key(secret: &[u8], salt: &[u8], params: &KdfParams) -> CryptoResult<KeyMaterial> {
    if secret.is_empty() {
        return Err(CryptoError::MissingKey("master secret is empty".to_string()));
    }

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {e}")))?;
    let argon = Argon2::new(Argon2Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = [0u8; KEY_SIZE];
    argon
        .hash_password_into(secret, salt, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 derivation failed: {e}")))?;

    let key = KeyMaterial::from_bytes(out);
    out.zeroize();
    Ok(key)
}

/// Salt used when deriving the key for `version` from a master secret.
pub fn version_salt(version: u32) -> Vec<u8> {
    format!("{VERSION_SALT_PREFIX}{version}").into_bytes()
}

/// Derives the key for a specific key version from the master secret.
///
/// Deterministic: the same secret, version and params always yield the
/// same key, so independent instances agree without transporting keys.
pub fn derive_version_key(
    master_secret: &[u8],
    version: u32,
    params: &KdfParams,
) -> CryptoResult<KeyMaterial> {
    if version == 0 {
        return Err(CryptoError::KeyDerivation(
            "key versions start at 1".to_string(),
        ));
    }
    derive_key(master_secret, &version_salt(version), params)
}

/// Generates a random 256-bit key from the thread-local CSPRNG.
pub fn generate_random_key() -> KeyMaterial {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut bytes);
    let key = KeyMaterial::from_bytes(bytes);
    bytes.zeroize();
    key
}
