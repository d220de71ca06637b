//! Thread-safe cache of symmetric keys by key version.
//!
//! Providers populate it on first use of a version; every later lookup for
//! that version is served from memory. Each version owns a `OnceCell`, so
//! concurrent first lookups share a single key creation.

use atrest_crypto::KeyMaterial;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

type Slot = Arc<OnceCell<KeyMaterial>>;

/// Version-keyed key cache. Clones share the same underlying map.
#[derive(Clone)]
pub struct KeyCache {
    slots: Arc<RwLock<HashMap<u32, Slot>>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn slot(&self, version: u32) -> Slot {
        if let Some(slot) = self.slots.read().await.get(&version) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().await.entry(version).or_default())
    }

    /// Caches a key for a version, replacing any previous entry.
    pub async fn insert(&self, version: u32, key: KeyMaterial) {
        let slot = Arc::new(OnceCell::new_with(Some(key)));
        self.slots.write().await.insert(version, slot);
    }

    /// Retrieves a cloned key for a version.
    pub async fn get(&self, version: u32) -> Option<KeyMaterial> {
        self.slots
            .read()
            .await
            .get(&version)
            .and_then(|slot| slot.get().cloned())
    }

    /// Returns the cached key for `version`, creating it with `make` if
    /// absent. Concurrent callers observe the same key.
    pub async fn get_or_insert_with<F>(&self, version: u32, make: F) -> KeyMaterial
    where
        F: FnOnce() -> KeyMaterial,
    {
        self.slot(version)
            .await
            .get_or_init(|| async move { make() })
            .await
            .clone()
    }

    /// Fallible variant of [`KeyCache::get_or_insert_with`].
    ///
    /// At most one `make` runs per version at a time; the others wait for
    /// its result. A failed attempt leaves the slot empty for the next
    /// caller to retry.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        version: u32,
        make: F,
    ) -> Result<KeyMaterial, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeyMaterial, E>>,
    {
        let slot = self.slot(version).await;
        slot.get_or_try_init(make).await.cloned()
    }

    pub async fn remove(&self, version: u32) -> Option<KeyMaterial> {
        self.slots
            .write()
            .await
            .remove(&version)
            .and_then(|slot| slot.get().cloned())
    }

    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Evicts everything. Test harness reset hook.
    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}
