//! Field-level encryption against the current key version.

use crate::error::{KeyError, KeyResult};
use crate::provider::KeyProvider;
use atrest_crypto::{
    Algorithm, CryptoError, EncryptedPayload, SealParams, decrypt_payload, encrypt_payload,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Options for [`EncryptionService::encrypt`].
#[derive(Clone, Debug, Default)]
pub struct EncryptOptions {
    /// Seal under this version instead of the current one.
    pub key_version: Option<u32>,
    pub aad: Option<Vec<u8>>,
    pub salt: Option<Vec<u8>>,
}

/// Options for [`EncryptionService::decrypt`].
#[derive(Clone, Debug, Default)]
pub struct DecryptOptions {
    pub aad: Option<Vec<u8>>,
}

/// The encryption engine. Cheap to clone; clones share the provider.
#[derive(Clone)]
pub struct EncryptionService {
    provider: Arc<dyn KeyProvider>,
    algorithm: Algorithm,
}

impl EncryptionService {
    pub fn new(provider: Arc<dyn KeyProvider>, algorithm: Algorithm) -> Self {
        Self {
            provider,
            algorithm,
        }
    }

    pub fn provider(&self) -> &Arc<dyn KeyProvider> {
        &self.provider
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Seals `plaintext` under the current key (or `options.key_version`).
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        options: &EncryptOptions,
    ) -> KeyResult<EncryptedPayload> {
        let (version, key) = match options.key_version {
            Some(v) => (v, self.provider.key_by_version(v).await?),
            None => self.provider.current_key().await?,
        };
        let params = SealParams {
            algorithm: self.algorithm,
            aad: options.aad.as_deref(),
            salt: options.salt.as_deref(),
        };
        encrypt_payload(&key, version, plaintext, &params).map_err(|e| {
            error!(code = %e.code(), key_version = version, "encryption failed");
            KeyError::from(e)
        })
    }

    /// Opens `payload` with the key for the version recorded in it.
    pub async fn decrypt(
        &self,
        payload: &EncryptedPayload,
        options: &DecryptOptions,
    ) -> KeyResult<Vec<u8>> {
        payload.validate()?;
        let key = self.provider.key_by_version(payload.key_version).await?;
        decrypt_payload(&key, payload, options.aad.as_deref()).map_err(|e| {
            error!(
                code = %e.code(),
                key_version = payload.key_version,
                cause = e.cause().unwrap_or_default(),
                "decryption failed"
            );
            KeyError::from(e)
        })
    }

    pub async fn encrypt_string(&self, plaintext: &str) -> KeyResult<EncryptedPayload> {
        self.encrypt(plaintext.as_bytes(), &EncryptOptions::default())
            .await
    }

    pub async fn decrypt_string(&self, payload: &EncryptedPayload) -> KeyResult<String> {
        let bytes = self.decrypt(payload, &DecryptOptions::default()).await?;
        String::from_utf8(bytes).map_err(|_| {
            CryptoError::Decryption("plaintext is not valid UTF-8".to_string()).into()
        })
    }

    /// Decrypts with the payload's version and seals again under the
    /// current version. Salt is carried over; AAD-bound payloads cannot be
    /// migrated this way.
    pub async fn re_encrypt(&self, payload: &EncryptedPayload) -> KeyResult<EncryptedPayload> {
        let plaintext = zeroize::Zeroizing::new(
            self.decrypt(payload, &DecryptOptions::default()).await?,
        );
        let options = EncryptOptions {
            salt: payload.salt_bytes()?,
            ..EncryptOptions::default()
        };
        let fresh = self.encrypt(&plaintext, &options).await?;
        debug!(
            "re-encrypted payload from version {} to {}",
            payload.key_version, fresh.key_version
        );
        Ok(fresh)
    }
}
