//! Batch migration of stored ciphertext from old key versions to the
//! current one.
//!
//! Records are pulled from the caller's [`DataStore`] a page at a time and
//! re-encrypted concurrently within each page. A record that fails is
//! counted and left where it is; it never stops the run. Only a failure
//! outside the per-record path (counting, paging, resolving the current
//! version) ends the run early, with the partial totals kept.

use crate::error::{KeyError, KeyResult};
use crate::events::LifecycleLog;
use crate::service::EncryptionService;
use crate::types::{
    KeyLifecycleEvent, LifecycleEventType, ReEncryptionProgress, ReEncryptionStatus, StoredRecord,
};
use async_trait::async_trait;
use atrest_crypto::EncryptedPayload;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// The caller's persistence layer, seen through the three operations
/// migration needs.
///
/// `records_by_key_version` is expected to reflect updates immediately: a
/// record rewritten at a newer version no longer appears under its old
/// version. Paging offsets therefore only skip records that failed.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn record_count(&self, key_version: u32) -> KeyResult<u64>;

    async fn records_by_key_version(
        &self,
        key_version: u32,
        limit: usize,
        offset: u64,
    ) -> KeyResult<Vec<StoredRecord>>;

    async fn update_record(&self, id: &str, payload: EncryptedPayload) -> KeyResult<()>;
}

/// Drives re-encryption runs.
pub struct ReEncryptionEngine {
    service: EncryptionService,
    events: Arc<LifecycleLog>,
    batch_size: usize,
    max_concurrent: usize,
    progress: RwLock<Option<ReEncryptionProgress>>,
}

impl ReEncryptionEngine {
    pub fn new(
        service: EncryptionService,
        events: Arc<LifecycleLog>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            service,
            events,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
            progress: RwLock::new(None),
        }
    }

    /// Snapshot of the running or most recent run.
    pub async fn progress(&self) -> Option<ReEncryptionProgress> {
        self.progress.read().await.clone()
    }

    fn concurrency(&self) -> usize {
        self.batch_size.min(self.max_concurrent)
    }

    /// Migrates records at `target_version`, or at every version below the
    /// current one when `None`, to the current version.
    pub async fn re_encrypt_data(
        &self,
        data_store: &dyn DataStore,
        target_version: Option<u32>,
    ) -> ReEncryptionProgress {
        let mut progress = ReEncryptionProgress::new();
        progress.transition(ReEncryptionStatus::InProgress);
        *self.progress.write().await = Some(progress.clone());

        // Recorded before any validation so every FAILED has a STARTED.
        // Version 0 stands for "every version below the current one".
        self.events.record(
            KeyLifecycleEvent::new(
                LifecycleEventType::ReencryptionStarted,
                target_version.unwrap_or(0),
            )
            .with_details(serde_json::json!({ "targetVersion": target_version })),
        );

        let outcome = self.run(data_store, target_version, &mut progress).await;

        match outcome {
            Ok(current) => {
                progress.transition(ReEncryptionStatus::Completed);
                info!(
                    "re-encryption completed: {} processed, {} failed of {}",
                    progress.processed, progress.failed, progress.total
                );
                self.events.record(
                    KeyLifecycleEvent::new(LifecycleEventType::ReencryptionCompleted, current)
                        .with_details(serde_json::json!({
                            "total": progress.total,
                            "processed": progress.processed,
                            "failed": progress.failed,
                        })),
                );
            }
            Err((version, e)) => {
                progress.transition(ReEncryptionStatus::Failed);
                error!("re-encryption aborted: {e}");
                self.events.record(
                    KeyLifecycleEvent::new(LifecycleEventType::ReencryptionFailed, version)
                        .with_details(serde_json::json!({
                            "error": e.to_string(),
                            "processed": progress.processed,
                            "failed": progress.failed,
                        })),
                );
            }
        }

        *self.progress.write().await = Some(progress.clone());
        progress
    }

    /// Returns the destination version on success, or the version being
    /// worked on alongside the error that stopped the run.
    async fn run(
        &self,
        data_store: &dyn DataStore,
        target_version: Option<u32>,
        progress: &mut ReEncryptionProgress,
    ) -> Result<u32, (u32, KeyError)> {
        let current = self
            .service
            .provider()
            .current_key_version()
            .await
            .map_err(|e| (target_version.unwrap_or(0), e))?;

        let sources: Vec<u32> = match target_version {
            Some(v) if v == 0 || v >= current => {
                return Err((
                    v,
                    KeyError::InvalidVersion(format!(
                        "cannot migrate version {v} to current version {current}"
                    )),
                ));
            }
            Some(v) => vec![v],
            None => (1..current).collect(),
        };

        info!("re-encrypting versions {sources:?} to version {current}");
        for version in sources {
            self.migrate_version(data_store, version, progress)
                .await
                .map_err(|e| (version, e))?;
        }
        Ok(current)
    }

    async fn migrate_version(
        &self,
        data_store: &dyn DataStore,
        version: u32,
        progress: &mut ReEncryptionProgress,
    ) -> KeyResult<()> {
        let count = data_store.record_count(version).await?;
        progress.total += count;
        if count == 0 {
            debug!("no records at version {version}");
            return Ok(());
        }
        info!("re-encrypting {count} records at version {version}");

        let mut processed = 0u64;
        let mut failed = 0u64;
        while processed + failed < count {
            // Never page past what was counted, so late rows wait for the next run.
            let remaining = usize::try_from(count - processed - failed).unwrap_or(usize::MAX);
            let batch = data_store
                .records_by_key_version(version, self.batch_size.min(remaining), failed)
                .await?;
            if batch.is_empty() {
                break;
            }

            let outcomes: Vec<bool> = stream::iter(batch)
                .map(|record| self.migrate_record(data_store, record))
                .buffer_unordered(self.concurrency())
                .collect()
                .await;

            let ok = outcomes.iter().filter(|ok| **ok).count() as u64;
            let bad = outcomes.len() as u64 - ok;
            processed += ok;
            failed += bad;
            progress.processed += ok;
            progress.failed += bad;
            progress.update_estimate();
            *self.progress.write().await = Some(progress.clone());

            debug!(
                "version {version}: batch done, {processed} processed, {failed} failed of {count}"
            );
        }
        Ok(())
    }

    async fn migrate_record(&self, data_store: &dyn DataStore, record: StoredRecord) -> bool {
        let fresh = match self.service.re_encrypt(&record.encrypted_payload).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(record_id = %record.id, code = %e.code(), "record re-encryption failed");
                return false;
            }
        };
        match data_store.update_record(&record.id, fresh).await {
            Ok(()) => true,
            Err(e) => {
                warn!(record_id = %record.id, "record update failed: {e}");
                false
            }
        }
    }
}
