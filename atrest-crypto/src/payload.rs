//! The encrypted payload envelope and its wire encodings.
//!
//! A payload carries everything needed to decrypt it except the key:
//! IV, ciphertext, detached tag, the key version that produced it and the
//! algorithm. Byte fields are standard base64 so the structure can be
//! stored as JSON, and [`EncryptedPayload::to_token`] wraps the whole thing
//! in a single opaque string for scalar-only columns.

use crate::cipher::{self, Algorithm};
use crate::error::{CryptoError, CryptoResult};
use crate::key::KeyMaterial;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated ciphertext envelope. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub iv: String,
    pub ciphertext: String,
    pub auth_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    pub key_version: u32,
    pub algorithm: Algorithm,
    pub encrypted_at: DateTime<Utc>,
}

/// Per-call sealing parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct SealParams<'a> {
    pub algorithm: Algorithm,
    /// Additional authenticated data. Must be supplied again to decrypt.
    pub aad: Option<&'a [u8]>,
    /// Opaque per-payload salt, recorded verbatim in the envelope.
    pub salt: Option<&'a [u8]>,
}

impl EncryptedPayload {
    /// Serializes the whole envelope as one opaque string.
    pub fn to_token(&self) -> CryptoResult<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CryptoError::InvalidFormat(format!("payload serialization failed: {e}")))?;
        Ok(STANDARD.encode(json))
    }

    /// Parses a string produced by [`EncryptedPayload::to_token`].
    pub fn from_token(token: &str) -> CryptoResult<Self> {
        let json = STANDARD
            .decode(token.trim())
            .map_err(|e| CryptoError::InvalidFormat(format!("token is not base64: {e}")))?;
        let payload: Self = serde_json::from_slice(&json)
            .map_err(|e| CryptoError::InvalidFormat(format!("token is not a payload: {e}")))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Checks structural validity without decrypting.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.key_version == 0 {
            return Err(CryptoError::InvalidFormat(
                "key version must be at least 1".to_string(),
            ));
        }
        let iv = decode_field("iv", &self.iv)?;
        if iv.len() != cipher::IV_SIZE {
            return Err(CryptoError::InvalidFormat(format!(
                "iv must be {} bytes, got {}",
                cipher::IV_SIZE,
                iv.len()
            )));
        }
        let tag = decode_field("authTag", &self.auth_tag)?;
        if tag.len() != cipher::TAG_SIZE {
            return Err(CryptoError::InvalidFormat(format!(
                "auth tag must be {} bytes, got {}",
                cipher::TAG_SIZE,
                tag.len()
            )));
        }
        decode_field("ciphertext", &self.ciphertext)?;
        if let Some(salt) = &self.salt {
            decode_field("salt", salt)?;
        }
        Ok(())
    }

    /// Decoded salt bytes, if the payload carries one.
    pub fn salt_bytes(&self) -> CryptoResult<Option<Vec<u8>>> {
        self.salt
            .as_deref()
            .map(|s| decode_field("salt", s))
            .transpose()
    }
}

fn decode_field(name: &str, value: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::InvalidFormat(format!("{name} is not valid base64: {e}")))
}

/// Encrypts `plaintext` into a fresh payload tagged with `key_version`.
pub fn encrypt_payload(
    key: &KeyMaterial,
    key_version: u32,
    plaintext: &[u8],
    params: &SealParams<'_>,
) -> CryptoResult<EncryptedPayload> {
    if key_version == 0 {
        return Err(CryptoError::Encryption(
            "key version must be at least 1".to_string(),
        ));
    }

    let sealed = cipher::seal(key, params.algorithm, plaintext, params.aad.unwrap_or_default())?;

    Ok(EncryptedPayload {
        iv: STANDARD.encode(sealed.iv),
        ciphertext: STANDARD.encode(&sealed.ciphertext),
        auth_tag: STANDARD.encode(sealed.tag),
        salt: params.salt.map(|s| STANDARD.encode(s)),
        key_version,
        algorithm: params.algorithm,
        encrypted_at: Utc::now(),
    })
}

/// Decrypts a payload with the key for its recorded version.
///
/// Any malformed field is `InvalidFormat`; any authentication failure is
/// `Decryption`. Plaintext is never returned unless the tag verifies.
pub fn decrypt_payload(
    key: &KeyMaterial,
    payload: &EncryptedPayload,
    aad: Option<&[u8]>,
) -> CryptoResult<Vec<u8>> {
    payload.validate()?;
    let iv = decode_field("iv", &payload.iv)?;
    let ciphertext = decode_field("ciphertext", &payload.ciphertext)?;
    let tag = decode_field("authTag", &payload.auth_tag)?;

    cipher::open(
        key,
        payload.algorithm,
        &iv,
        &ciphertext,
        &tag,
        aad.unwrap_or_default(),
    )
}
