//! Shared helpers for the key management integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use atrest_crypto::{EncryptedPayload, KdfParams};
use atrest_keys::{
    EncryptOptions, EncryptionService, InMemoryKeyVersionStore, KeyError, KeyManagement,
    KeyResult, KeyVersionStore, MemoryAuditSink, RotationConfig, StoredRecord, reencrypt::DataStore,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub const MASTER_SECRET: &str = "test-master-key-32-bytes-long-!!";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Key management on a fresh in-memory store with cheap derivation.
pub struct Harness {
    pub keys: KeyManagement,
    pub store: Arc<InMemoryKeyVersionStore>,
    pub audit: MemoryAuditSink,
}

pub async fn harness(config: RotationConfig) -> Harness {
    init_tracing();
    let store = Arc::new(InMemoryKeyVersionStore::new(config.algorithm));
    let audit = MemoryAuditSink::new();
    let keys = KeyManagement::local(
        config,
        MASTER_SECRET,
        Arc::clone(&store) as Arc<dyn KeyVersionStore>,
        KdfParams::low_cost(),
        Arc::new(audit.clone()),
    )
    .await
    .expect("key management must build");
    Harness { keys, store, audit }
}

pub async fn default_harness() -> Harness {
    harness(RotationConfig::default()).await
}

/// Data store over an in-memory map that filters by each payload's
/// current key version, with failure injection.
#[derive(Default)]
pub struct MockDataStore {
    records: Mutex<BTreeMap<String, EncryptedPayload>>,
    late_arrivals: Mutex<Vec<(String, EncryptedPayload)>>,
    failing_updates: Mutex<HashSet<String>>,
    fail_count: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    update_delay: Option<Duration>,
}

impl MockDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates pause briefly so concurrent calls overlap.
    pub fn with_update_delay(delay: Duration) -> Self {
        Self {
            update_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Inserts `count` records sealed under `version`, ids `rec-0000`...
    pub async fn seed(&self, service: &EncryptionService, version: u32, count: usize) {
        let options = EncryptOptions {
            key_version: Some(version),
            ..EncryptOptions::default()
        };
        let mut records = self.records.lock().await;
        let start = records.len();
        for i in start..start + count {
            let payload = service
                .encrypt(format!("record {i}").as_bytes(), &options)
                .await
                .expect("seed encryption must succeed");
            records.insert(format!("rec-{i:04}"), payload);
        }
    }

    /// Seals `count` records under `version` that only become visible once
    /// `record_count` has answered, ids `late-0000`...
    pub async fn seed_after_count(&self, service: &EncryptionService, version: u32, count: usize) {
        let options = EncryptOptions {
            key_version: Some(version),
            ..EncryptOptions::default()
        };
        let mut late = self.late_arrivals.lock().await;
        for i in 0..count {
            let payload = service
                .encrypt(format!("late {i}").as_bytes(), &options)
                .await
                .expect("seed encryption must succeed");
            late.push((format!("late-{i:04}"), payload));
        }
    }

    pub async fn insert(&self, id: &str, payload: EncryptedPayload) {
        self.records.lock().await.insert(id.to_string(), payload);
    }

    pub async fn fail_update_for(&self, id: &str) {
        self.failing_updates.lock().await.insert(id.to_string());
    }

    pub fn fail_record_count(&self) {
        self.fail_count.store(true, Ordering::SeqCst);
    }

    pub async fn payload(&self, id: &str) -> Option<EncryptedPayload> {
        self.records.lock().await.get(id).cloned()
    }

    pub async fn versions(&self) -> Vec<u32> {
        self.records
            .lock()
            .await
            .values()
            .map(|p| p.key_version)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for MockDataStore {
    async fn record_count(&self, key_version: u32) -> KeyResult<u64> {
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(KeyError::DataStore("count query timed out".to_string()));
        }
        let mut records = self.records.lock().await;
        let count = records
            .values()
            .filter(|p| p.key_version == key_version)
            .count() as u64;
        records.extend(self.late_arrivals.lock().await.drain(..));
        Ok(count)
    }

    async fn records_by_key_version(
        &self,
        key_version: u32,
        limit: usize,
        offset: u64,
    ) -> KeyResult<Vec<StoredRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|(_, p)| p.key_version == key_version)
            .skip(offset as usize)
            .take(limit)
            .map(|(id, p)| StoredRecord {
                id: id.clone(),
                encrypted_payload: p.clone(),
            })
            .collect())
    }

    async fn update_record(&self, id: &str, payload: EncryptedPayload) -> KeyResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_updates.lock().await.contains(id) {
            return Err(KeyError::DataStore(format!("write rejected for {id}")));
        }
        self.records.lock().await.insert(id.to_string(), payload);
        Ok(())
    }
}
