//! One-way salted hashing for secret comparison, and random tokens.
//!
//! Not used on the payload path. Hashes are PHC strings (Argon2id) so the
//! salt and cost parameters travel with the hash.

use crate::error::{CryptoError, CryptoResult};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm as Argon2Algorithm, Argon2, Params, Version};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

use crate::key::KdfParams;

const HASH_SALT_SIZE: usize = 16;

fn hasher(params: &KdfParams) -> CryptoResult<Argon2<'static>> {
    let params = Params::new(params.memory_kib, params.iterations, params.parallelism, None)
        .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {e}")))?;
    Ok(Argon2::new(Argon2Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes `secret` with a fresh random salt.
pub fn hash_secret(secret: &str, params: &KdfParams) -> CryptoResult<String> {
    let mut salt_bytes = [0u8; HASH_SALT_SIZE];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| CryptoError::Encryption(format!("salt encoding failed: {e}")))?;

    let hash = hasher(params)?
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| CryptoError::Encryption(format!("secret hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Verifies `secret` against a hash from [`hash_secret`].
///
/// The comparison is constant-time. A mismatch is `Ok(false)`; only a
/// malformed hash string is an error.
pub fn verify_secret(secret: &str, hash: &str) -> CryptoResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| CryptoError::InvalidFormat(format!("malformed secret hash: {e}")))?;
    // Cost parameters come from the PHC string itself.
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

/// Generates a URL-safe random token carrying `num_bytes` of entropy.
pub fn generate_token(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
