//! Durable record of key version metadata and the current-version pointer.
//!
//! The pointer is only ever moved forward, and only by the rotation
//! workflow. Each method is expected to be individually atomic; callers
//! add no locking of their own.

use crate::error::{KeyError, KeyResult};
use crate::transit::TransitClient;
use crate::types::KeyMetadata;
use async_trait::async_trait;
use atrest_crypto::Algorithm;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Grace window during which a deprecated version still decrypts.
pub const DEPRECATION_GRACE_DAYS: i64 = 30;

/// Storage contract for key versions.
#[async_trait]
pub trait KeyVersionStore: Send + Sync {
    async fn get_current_version(&self) -> KeyResult<u32>;

    /// Advances the pointer. Moving it backwards is rejected.
    async fn set_current_version(&self, version: u32) -> KeyResult<()>;

    async fn get_version_metadata(&self, version: u32) -> KeyResult<Option<KeyMetadata>>;

    async fn save_version_metadata(&self, metadata: KeyMetadata) -> KeyResult<()>;

    /// Marks a version as deprecated. The current or any future version is
    /// never deprecatable.
    async fn deprecate_version(&self, version: u32) -> KeyResult<()>;

    /// Known versions, ascending.
    async fn list_versions(&self) -> KeyResult<Vec<u32>>;
}

// ── In-memory ────────────────────────────────────────────────────

struct MemoryState {
    current: u32,
    metadata: BTreeMap<u32, KeyMetadata>,
    deprecated: BTreeSet<u32>,
}

impl MemoryState {
    fn seeded(algorithm: Option<Algorithm>) -> Self {
        let mut metadata = BTreeMap::new();
        if let Some(algorithm) = algorithm {
            metadata.insert(1, KeyMetadata::new(1, algorithm));
        }
        Self {
            current: 1,
            metadata,
            deprecated: BTreeSet::new(),
        }
    }
}

/// Process-local store. Starts at version 1.
pub struct InMemoryKeyVersionStore {
    state: RwLock<MemoryState>,
    algorithm: Algorithm,
}

impl InMemoryKeyVersionStore {
    /// Store at version 1 with metadata for version 1.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            state: RwLock::new(MemoryState::seeded(Some(algorithm))),
            algorithm,
        }
    }

    /// Store at version 1 with no metadata recorded yet.
    pub fn without_metadata(algorithm: Algorithm) -> Self {
        Self {
            state: RwLock::new(MemoryState::seeded(None)),
            algorithm,
        }
    }

    pub async fn is_deprecated(&self, version: u32) -> bool {
        self.state.read().await.deprecated.contains(&version)
    }

    /// Restores the freshly-constructed state. Test harness reset hook.
    pub async fn reset(&self) {
        *self.state.write().await = MemoryState::seeded(Some(self.algorithm));
    }
}

impl Default for InMemoryKeyVersionStore {
    fn default() -> Self {
        Self::new(Algorithm::default())
    }
}

#[async_trait]
impl KeyVersionStore for InMemoryKeyVersionStore {
    async fn get_current_version(&self) -> KeyResult<u32> {
        Ok(self.state.read().await.current)
    }

    async fn set_current_version(&self, version: u32) -> KeyResult<()> {
        let mut state = self.state.write().await;
        if version < state.current {
            return Err(KeyError::InvalidVersion(format!(
                "current version cannot move backwards ({} -> {version})",
                state.current
            )));
        }
        state.current = version;
        Ok(())
    }

    async fn get_version_metadata(&self, version: u32) -> KeyResult<Option<KeyMetadata>> {
        Ok(self.state.read().await.metadata.get(&version).cloned())
    }

    async fn save_version_metadata(&self, metadata: KeyMetadata) -> KeyResult<()> {
        if metadata.version == 0 {
            return Err(KeyError::InvalidVersion("key versions start at 1".to_string()));
        }
        self.state
            .write()
            .await
            .metadata
            .insert(metadata.version, metadata);
        Ok(())
    }

    async fn deprecate_version(&self, version: u32) -> KeyResult<()> {
        let mut state = self.state.write().await;
        if version >= state.current {
            return Err(KeyError::InvalidVersion(format!(
                "cannot deprecate current or future version {version} (current is {})",
                state.current
            )));
        }
        let meta = state
            .metadata
            .get_mut(&version)
            .ok_or(KeyError::NotFound(version))?;
        if meta.expires_at.is_none() {
            meta.expires_at = Some(Utc::now() + Duration::days(DEPRECATION_GRACE_DAYS));
        }
        state.deprecated.insert(version);
        debug!("deprecated key version {version}");
        Ok(())
    }

    async fn list_versions(&self) -> KeyResult<Vec<u32>> {
        Ok(self.state.read().await.metadata.keys().copied().collect())
    }
}

// ── Remote custody ───────────────────────────────────────────────

/// Store backed by the remote custody service, which is authoritative for
/// metadata.
pub struct TransitKeyVersionStore {
    client: Arc<TransitClient>,
}

impl TransitKeyVersionStore {
    pub fn new(client: Arc<TransitClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyVersionStore for TransitKeyVersionStore {
    async fn get_current_version(&self) -> KeyResult<u32> {
        Ok(self.client.read_key().await?.latest_version)
    }

    /// Rotates on the service until its latest version reaches `version`.
    async fn set_current_version(&self, version: u32) -> KeyResult<()> {
        let mut latest = self.client.read_key().await?.latest_version;
        if version < latest {
            return Err(KeyError::InvalidVersion(format!(
                "current version cannot move backwards ({latest} -> {version})"
            )));
        }
        while latest < version {
            self.client.rotate_key().await?;
            let after = self.client.read_key().await?.latest_version;
            if after <= latest {
                return Err(KeyError::Remote(format!(
                    "rotate did not advance key {} past version {latest}",
                    self.client.key_name()
                )));
            }
            latest = after;
        }
        info!("remote key {} now at version {latest}", self.client.key_name());
        Ok(())
    }

    async fn get_version_metadata(&self, version: u32) -> KeyResult<Option<KeyMetadata>> {
        match self.client.read_key().await {
            Ok(info) => Ok(info.metadata(version)),
            Err(e) => {
                warn!("metadata lookup for version {version} failed, treating as unknown: {e}");
                Ok(None)
            }
        }
    }

    async fn save_version_metadata(&self, metadata: KeyMetadata) -> KeyResult<()> {
        debug!(
            "remote custody owns metadata, not saving version {}",
            metadata.version
        );
        Ok(())
    }

    async fn deprecate_version(&self, version: u32) -> KeyResult<()> {
        let info = self.client.read_key().await?;
        if version >= info.latest_version {
            return Err(KeyError::InvalidVersion(format!(
                "cannot deprecate current or future version {version} (current is {})",
                info.latest_version
            )));
        }
        if info.min_decryption_version > version {
            debug!("version {version} already below min decryption version");
            return Ok(());
        }
        self.client
            .update_key_config(Some(version + 1), None)
            .await?;
        info!(
            "raised min decryption version of {} to {}",
            self.client.key_name(),
            version + 1
        );
        Ok(())
    }

    async fn list_versions(&self) -> KeyResult<Vec<u32>> {
        Ok(self.client.read_key().await?.versions())
    }
}
