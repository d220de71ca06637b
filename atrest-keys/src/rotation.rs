//! Key rotation workflow.
//!
//! Each [`KeyRotationOrchestrator::rotate_keys`] call runs the whole
//! sequence to completion and returns a [`RotationResult`]:
//!
//! 1. validate the current key (optional)
//! 2. mint the next version and advance the pointer
//! 3. verify the new key (optional, warns instead of rolling back)
//! 4. deprecate versions that fell out of the retention window
//! 5. notify the webhook, if one is configured
//! 6. write an audit entry
//!
//! Failures before the pointer moves leave the store untouched. Nothing
//! here guards against two processes rotating at once; deployments run a
//! single orchestrator.

use crate::audit::{AuditAction, AuditEntry, AuditLogger, AuditResult};
use crate::config::RotationConfig;
use crate::error::{KeyError, KeyResult};
use crate::events::LifecycleLog;
use crate::notify::WebhookNotifier;
use crate::reencrypt::{DataStore, ReEncryptionEngine};
use crate::service::{DecryptOptions, EncryptOptions, EncryptionService};
use crate::store::KeyVersionStore;
use crate::types::{
    KeyLifecycleEvent, KeyMetadata, KeyStatus, LifecycleEventType, ReEncryptionStatus,
    RotationResult,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const PRE_ROTATION_FAILED: &str = "Pre-rotation validation failed";
pub const POST_ROTATION_WARNING: &str = "Post-rotation verification failed but rotation completed";

const PROBE: &[u8] = b"key-rotation-probe";
const RESOURCE_TYPE: &str = "encryption_key";

pub struct KeyRotationOrchestrator {
    config: RotationConfig,
    store: Arc<dyn KeyVersionStore>,
    service: EncryptionService,
    reencryption: Arc<ReEncryptionEngine>,
    events: Arc<LifecycleLog>,
    audit: AuditLogger,
    notifier: Option<WebhookNotifier>,
}

impl KeyRotationOrchestrator {
    pub fn new(
        config: RotationConfig,
        store: Arc<dyn KeyVersionStore>,
        service: EncryptionService,
        reencryption: Arc<ReEncryptionEngine>,
        events: Arc<LifecycleLog>,
        audit: AuditLogger,
    ) -> KeyResult<Self> {
        let notifier = config
            .notification_webhook_url
            .as_deref()
            .map(WebhookNotifier::new)
            .transpose()?;
        Ok(Self {
            config,
            store,
            service,
            reencryption,
            events,
            audit,
            notifier,
        })
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Runs one full rotation. Never returns an error: failures are
    /// reported through `success` and `errors`.
    pub async fn rotate_keys(&self) -> RotationResult {
        let started = Instant::now();
        info!("starting key rotation");

        let previous = match self.store.get_current_version().await {
            Ok(v) => v,
            Err(e) => return self.fail(0, e, started).await,
        };

        if self.config.pre_rotation_validation {
            if let Err(e) = self.validate_current(previous).await {
                return self.fail(previous, e, started).await;
            }
        }

        let new_version = match self.mint(previous).await {
            Ok(v) => v,
            Err(e) => return self.fail(previous, e, started).await,
        };

        let mut warnings = Vec::new();
        if self.config.post_rotation_validation {
            if let Err(e) = self.verify_new(new_version).await {
                warn!("post-rotation verification of version {new_version} failed: {e}");
                warnings.push(POST_ROTATION_WARNING.to_string());
            }
        }

        warnings.extend(self.cleanup(new_version).await);

        let result = RotationResult {
            success: true,
            previous_version: previous,
            new_version,
            timestamp: Utc::now(),
            duration_ms: elapsed_ms(started),
            affected_records: None,
            errors: warnings,
        };

        if let Some(notifier) = &self.notifier {
            notifier.notify_rotation(&result).await;
        }

        self.audit
            .log(
                AuditEntry::system(
                    "KEY_ROTATION",
                    RESOURCE_TYPE,
                    new_version.to_string(),
                    AuditAction::Configure,
                    AuditResult::Success,
                )
                .with_details(serde_json::json!({
                    "previousVersion": previous,
                    "newVersion": new_version,
                    "warnings": result.errors,
                })),
            )
            .await;

        info!(
            "key rotation complete: v{previous} -> v{new_version} in {}ms",
            result.duration_ms
        );
        result
    }

    async fn fail(&self, previous: u32, e: KeyError, started: Instant) -> RotationResult {
        let message = match &e {
            KeyError::PreRotation(_) => PRE_ROTATION_FAILED.to_string(),
            other => other.to_string(),
        };
        error!(code = %e.code(), "key rotation failed: {e}");

        let result = RotationResult {
            success: false,
            previous_version: previous,
            new_version: previous,
            timestamp: Utc::now(),
            duration_ms: elapsed_ms(started),
            affected_records: None,
            errors: vec![message.clone()],
        };

        self.audit
            .log(
                AuditEntry::system(
                    "KEY_ROTATION_FAILED",
                    RESOURCE_TYPE,
                    previous.to_string(),
                    AuditAction::Configure,
                    AuditResult::Failure,
                )
                .with_details(serde_json::json!({
                    "previousVersion": previous,
                    "error": message,
                    "detail": e.to_string(),
                })),
            )
            .await;

        result
    }

    // ── Steps ──

    async fn validate_current(&self, version: u32) -> KeyResult<()> {
        if self.store.get_version_metadata(version).await?.is_none() {
            return Err(KeyError::PreRotation(format!(
                "no metadata for current version {version}"
            )));
        }
        self.round_trip(Some(version))
            .await
            .map_err(|e| KeyError::PreRotation(format!("current key round trip failed: {e}")))?;
        debug!("pre-rotation validation of version {version} passed");
        Ok(())
    }

    async fn mint(&self, previous: u32) -> KeyResult<u32> {
        let new_version = previous
            .checked_add(1)
            .ok_or_else(|| KeyError::InvalidVersion("key version space exhausted".to_string()))?;

        let metadata = KeyMetadata::new(new_version, self.config.algorithm);
        let key_id = metadata.key_id.clone();
        self.store.save_version_metadata(metadata).await?;
        self.events.record(
            KeyLifecycleEvent::new(LifecycleEventType::KeyCreated, new_version)
                .with_details(serde_json::json!({ "keyId": key_id })),
        );

        self.store.set_current_version(new_version).await?;
        self.events.record(
            KeyLifecycleEvent::new(LifecycleEventType::KeyRotated, new_version)
                .with_details(serde_json::json!({ "previousVersion": previous })),
        );
        Ok(new_version)
    }

    async fn verify_new(&self, new_version: u32) -> KeyResult<()> {
        let current = self.store.get_current_version().await?;
        if current != new_version {
            return Err(KeyError::InvalidVersion(format!(
                "pointer reads {current}, expected {new_version}"
            )));
        }
        let sealed_under = self.round_trip(None).await?;
        if sealed_under != new_version {
            return Err(KeyError::InvalidVersion(format!(
                "probe sealed under version {sealed_under}, expected {new_version}"
            )));
        }
        Ok(())
    }

    /// Deprecates every version below `new_version - retention_versions`.
    /// Returns warnings for versions that could not be deprecated.
    async fn cleanup(&self, new_version: u32) -> Vec<String> {
        let threshold = i64::from(new_version) - i64::from(self.config.retention_versions);
        if threshold <= 0 {
            return Vec::new();
        }

        let versions = match self.store.list_versions().await {
            Ok(versions) => versions,
            Err(e) => {
                warn!("cannot list versions for retention cleanup: {e}");
                return vec![format!("Retention cleanup skipped: {e}")];
            }
        };

        let mut warnings = Vec::new();
        for version in versions.into_iter().filter(|v| i64::from(*v) < threshold) {
            match self.store.get_version_metadata(version).await {
                Ok(Some(meta)) if meta.is_deprecated() => continue,
                _ => {}
            }
            match self.store.deprecate_version(version).await {
                Ok(()) => {
                    info!("deprecated key version {version}");
                    self.events.record(
                        KeyLifecycleEvent::new(LifecycleEventType::KeyDeprecated, version)
                            .with_details(serde_json::json!({ "rotatedTo": new_version })),
                    );
                }
                Err(e) => {
                    warn!("failed to deprecate key version {version}: {e}");
                    warnings.push(format!("Failed to deprecate version {version}: {e}"));
                }
            }
        }
        warnings
    }

    /// Seals and opens a probe value. Returns the version it was sealed
    /// under.
    async fn round_trip(&self, version: Option<u32>) -> KeyResult<u32> {
        let options = EncryptOptions {
            key_version: version,
            ..EncryptOptions::default()
        };
        let payload = self.service.encrypt(PROBE, &options).await?;
        let opened = self
            .service
            .decrypt(&payload, &DecryptOptions::default())
            .await?;
        if opened != PROBE {
            return Err(KeyError::InvalidVersion(
                "round trip returned different plaintext".to_string(),
            ));
        }
        Ok(payload.key_version)
    }

    // ── Status and scheduling ──

    pub async fn get_key_status(&self) -> KeyResult<KeyStatus> {
        let current_version = self.store.get_current_version().await?;
        let mut versions = Vec::new();
        for version in self.store.list_versions().await? {
            if let Some(meta) = self.store.get_version_metadata(version).await? {
                versions.push(meta);
            }
        }

        let next_rotation_due = versions
            .iter()
            .find(|m| m.version == current_version)
            .map(|m| {
                m.created_at + Duration::days(i64::from(self.config.rotation_interval_days))
            });
        let rotation_due = self.config.rotation_enabled
            && next_rotation_due.is_some_and(|due| due <= Utc::now());

        Ok(KeyStatus {
            current_version,
            versions,
            rotation_enabled: self.config.rotation_enabled,
            next_rotation_due,
            rotation_due,
        })
    }

    /// Rotates only when scheduled rotation is enabled and the current key
    /// has outlived the configured interval.
    pub async fn rotate_if_due(&self) -> KeyResult<Option<RotationResult>> {
        let status = self.get_key_status().await?;
        if !status.rotation_due {
            debug!("rotation not due for version {}", status.current_version);
            return Ok(None);
        }
        Ok(Some(self.rotate_keys().await))
    }

    /// Rotates, then migrates every record left at an older version.
    pub async fn rotate_and_reencrypt(&self, data_store: &dyn DataStore) -> RotationResult {
        let mut result = self.rotate_keys().await;
        if !result.success {
            return result;
        }

        let progress = self.reencryption.re_encrypt_data(data_store, None).await;
        result.affected_records = Some(progress.processed);
        if progress.failed > 0 {
            result
                .errors
                .push(format!("{} records failed re-encryption", progress.failed));
        }
        if progress.status == ReEncryptionStatus::Failed {
            result
                .errors
                .push("Re-encryption aborted before completion".to_string());
        }
        result
    }

    // ── Lifecycle queries ──

    /// Up to `limit` most recent lifecycle events, oldest first.
    pub fn lifecycle_events(&self, limit: usize) -> Vec<KeyLifecycleEvent> {
        self.events.recent(limit)
    }

    pub fn lifecycle_events_for_version(&self, version: u32) -> Vec<KeyLifecycleEvent> {
        self.events.for_version(version)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
