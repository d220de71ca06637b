//! AEAD sealing and opening with detached authentication tags.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KeyMaterial;
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IV (nonce) size in bytes, shared by both supported ciphers.
pub const IV_SIZE: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Supported authenticated encryption algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Ok(Algorithm::Aes256Gcm),
            "chacha20-poly1305" => Ok(Algorithm::ChaCha20Poly1305),
            other => Err(CryptoError::InvalidFormat(format!(
                "unsupported algorithm: {other}"
            ))),
        }
    }
}

/// Raw output of a seal: fresh IV, ciphertext and detached tag.
#[derive(Clone, Debug)]
pub struct SealedParts {
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

/// Encrypts `plaintext` under `key`, binding `aad`. A new random IV is
/// drawn on every call.
pub fn seal(
    key: &KeyMaterial,
    algorithm: Algorithm,
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<SealedParts> {
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let nonce = GenericArray::from_slice(&iv);

    let tag = match algorithm {
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| CryptoError::Encryption(format!("aes key setup failed: {e}")))?;
            cipher.encrypt_in_place_detached(nonce, aad, &mut buffer)
        }
        Algorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| CryptoError::Encryption(format!("chacha key setup failed: {e}")))?;
            cipher.encrypt_in_place_detached(nonce, aad, &mut buffer)
        }
    }
    .map_err(|e| CryptoError::Encryption(format!("{algorithm} seal failed: {e}")))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedParts {
        iv,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypts and authenticates. Fails closed on any tag or AAD mismatch.
pub fn open(
    key: &KeyMaterial,
    algorithm: Algorithm,
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidFormat(format!(
            "iv must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    if tag.len() != TAG_SIZE {
        return Err(CryptoError::InvalidFormat(format!(
            "auth tag must be {TAG_SIZE} bytes, got {}",
            tag.len()
        )));
    }

    let mut buffer = ciphertext.to_vec();
    let nonce = GenericArray::from_slice(iv);
    let tag = GenericArray::from_slice(tag);

    match algorithm {
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| CryptoError::Decryption(format!("aes key setup failed: {e}")))?;
            cipher.decrypt_in_place_detached(nonce, aad, &mut buffer, tag)
        }
        Algorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| CryptoError::Decryption(format!("chacha key setup failed: {e}")))?;
            cipher.decrypt_in_place_detached(nonce, aad, &mut buffer, tag)
        }
    }
    .map_err(|_| {
        CryptoError::Decryption(format!(
            "{algorithm} authentication failed (wrong key, wrong aad or tampered data)"
        ))
    })?;

    Ok(buffer)
}
