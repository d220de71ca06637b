//! Key providers: where the symmetric key for a given version comes from.
//!
//! [`LocalKeyProvider`] derives every version's key from one master secret,
//! so independent instances agree without moving keys around.
//! [`TransitKeyProvider`] leans on a remote custody service for version
//! bookkeeping and whole-value encryption, and keeps process-local data
//! keys for payload-level work.

use crate::cache::KeyCache;
use crate::error::{KeyError, KeyResult};
use crate::store::KeyVersionStore;
use crate::transit::TransitClient;
use crate::types::KeyMetadata;
use async_trait::async_trait;
use atrest_crypto::{CryptoError, KdfParams, KeyMaterial, derive_version_key, generate_random_key};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Supplies keys by version.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// The key for the version the current-version pointer names right now.
    async fn current_key(&self) -> KeyResult<(u32, KeyMaterial)> {
        let version = self.current_key_version().await?;
        Ok((version, self.key_by_version(version).await?))
    }

    async fn key_by_version(&self, version: u32) -> KeyResult<KeyMaterial>;

    async fn current_key_version(&self) -> KeyResult<u32>;

    /// Metadata for `version`, or `None` when it is unknown.
    async fn key_metadata(&self, version: u32) -> KeyResult<Option<KeyMetadata>>;

    /// Drops cached keys. Test harness reset hook.
    async fn clear_cache(&self) {}
}

// ── Local derivation ─────────────────────────────────────────────

/// Derives per-version keys from a master secret with Argon2id.
pub struct LocalKeyProvider {
    master_secret: Arc<Zeroizing<Vec<u8>>>,
    store: Arc<dyn KeyVersionStore>,
    cache: KeyCache,
    kdf: KdfParams,
    derivations: Arc<AtomicU64>,
}

impl LocalKeyProvider {
    pub fn new(
        master_secret: impl Into<Vec<u8>>,
        store: Arc<dyn KeyVersionStore>,
        kdf: KdfParams,
    ) -> KeyResult<Self> {
        let master_secret = Zeroizing::new(master_secret.into());
        if master_secret.is_empty() {
            return Err(CryptoError::MissingKey("master secret is empty".to_string()).into());
        }
        Ok(Self {
            master_secret: Arc::new(master_secret),
            store,
            cache: KeyCache::new(),
            kdf,
            derivations: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Reads the master secret from the environment variable `var`.
    pub fn from_env(
        var: &str,
        store: Arc<dyn KeyVersionStore>,
        kdf: KdfParams,
    ) -> KeyResult<Self> {
        let secret = std::env::var(var)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::MissingKey(format!("{var} is not set")))?;
        Self::new(secret.as_bytes(), store, kdf)
    }

    pub fn store(&self) -> &Arc<dyn KeyVersionStore> {
        &self.store
    }

    /// Number of KDF runs since construction.
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn key_by_version(&self, version: u32) -> KeyResult<KeyMaterial> {
        if version == 0 {
            return Err(KeyError::InvalidVersion("key versions start at 1".to_string()));
        }
        let secret = Arc::clone(&self.master_secret);
        let kdf = self.kdf.clone();
        let derivations = Arc::clone(&self.derivations);
        self.cache
            .get_or_try_insert_with(version, move || async move {
                let key = tokio::task::spawn_blocking(move || {
                    derive_version_key(secret.as_slice(), version, &kdf)
                })
                .await
                .map_err(|e| CryptoError::KeyDerivation(format!("derivation task failed: {e}")))??;
                derivations.fetch_add(1, Ordering::Relaxed);
                debug!("derived key for version {version}");
                Ok::<_, KeyError>(key)
            })
            .await
    }

    async fn current_key_version(&self) -> KeyResult<u32> {
        self.store.get_current_version().await
    }

    async fn key_metadata(&self, version: u32) -> KeyResult<Option<KeyMetadata>> {
        self.store.get_version_metadata(version).await
    }

    async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}

// ── Remote custody ───────────────────────────────────────────────

/// Provider backed by a remote custody service.
///
/// Payload-level data keys are random and live only in this process's
/// cache, so payloads sealed through this provider do not survive a
/// restart. Durable values go through [`TransitKeyProvider::encrypt_value`]
/// instead, which the service encrypts under its own versioned key.
pub struct TransitKeyProvider {
    client: Arc<TransitClient>,
    cache: KeyCache,
}

impl TransitKeyProvider {
    pub fn new(client: Arc<TransitClient>) -> Self {
        Self {
            client,
            cache: KeyCache::new(),
        }
    }

    /// Encrypts a whole value on the custody service.
    pub async fn encrypt_value(&self, plaintext: &[u8]) -> KeyResult<String> {
        self.client.encrypt(plaintext).await
    }

    /// Decrypts a value produced by [`TransitKeyProvider::encrypt_value`].
    pub async fn decrypt_value(&self, ciphertext: &str) -> KeyResult<Vec<u8>> {
        self.client.decrypt(ciphertext).await
    }
}

#[async_trait]
impl KeyProvider for TransitKeyProvider {
    async fn key_by_version(&self, version: u32) -> KeyResult<KeyMaterial> {
        if version == 0 {
            return Err(KeyError::InvalidVersion("key versions start at 1".to_string()));
        }
        Ok(self
            .cache
            .get_or_insert_with(version, generate_random_key)
            .await)
    }

    async fn current_key_version(&self) -> KeyResult<u32> {
        Ok(self.client.read_key().await?.latest_version)
    }

    async fn key_metadata(&self, version: u32) -> KeyResult<Option<KeyMetadata>> {
        match self.client.read_key().await {
            Ok(info) => Ok(info.metadata(version)),
            Err(e) => {
                warn!("remote metadata for version {version} unavailable: {e}");
                Ok(None)
            }
        }
    }

    async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}
