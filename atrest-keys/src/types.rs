//! Shared types for key management, rotation and re-encryption.

use atrest_crypto::{Algorithm, EncryptedPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a single key version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Set once, when the version is deprecated.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub algorithm: Algorithm,
    /// Opaque identifier for correlation with external custody.
    pub key_id: String,
}

impl KeyMetadata {
    /// Fresh metadata for a newly minted version.
    pub fn new(version: u32, algorithm: Algorithm) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            version,
            created_at: Utc::now(),
            expires_at: None,
            algorithm,
            key_id: format!("key-v{version}-{}", &suffix[..12]),
        }
    }

    pub fn is_deprecated(&self) -> bool {
        self.expires_at.is_some()
    }
}

/// Kind of key lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEventType {
    KeyCreated,
    KeyRotated,
    KeyDeprecated,
    KeyDestroyed,
    ReencryptionStarted,
    ReencryptionCompleted,
    ReencryptionFailed,
}

/// An append-only record of something that happened to a key version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLifecycleEvent {
    pub event_type: LifecycleEventType,
    pub key_version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl KeyLifecycleEvent {
    pub fn new(event_type: LifecycleEventType, key_version: u32) -> Self {
        Self {
            event_type,
            key_version,
            timestamp: Utc::now(),
            details: None,
            actor: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Status of a re-encryption run. Only moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReEncryptionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ReEncryptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReEncryptionStatus::Completed | ReEncryptionStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            ReEncryptionStatus::Pending => 0,
            ReEncryptionStatus::InProgress => 1,
            ReEncryptionStatus::Completed | ReEncryptionStatus::Failed => 2,
        }
    }
}

/// Running totals for a re-encryption run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReEncryptionProgress {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub estimated_completion: Option<DateTime<Utc>>,
    pub status: ReEncryptionStatus,
}

impl ReEncryptionProgress {
    pub fn new() -> Self {
        Self {
            total: 0,
            processed: 0,
            failed: 0,
            started_at: Utc::now(),
            estimated_completion: None,
            status: ReEncryptionStatus::Pending,
        }
    }

    /// Moves to `next` if that is a forward transition. Returns whether the
    /// status changed.
    pub fn transition(&mut self, next: ReEncryptionStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.estimated_completion = None;
        }
        true
    }

    /// Records of `total` not yet attempted.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed + self.failed)
    }

    /// Extrapolates a completion time from the throughput so far.
    pub fn update_estimate(&mut self) {
        let done = self.processed + self.failed;
        if done == 0 || self.status.is_terminal() {
            return;
        }
        let elapsed = Utc::now() - self.started_at;
        let per_record = elapsed / i32::try_from(done).unwrap_or(i32::MAX);
        let remaining = i32::try_from(self.remaining()).unwrap_or(i32::MAX);
        self.estimated_completion = Some(Utc::now() + per_record * remaining);
    }
}

impl Default for ReEncryptionProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one `rotate_keys` call. Always well-formed, even on failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationResult {
    pub success: bool,
    pub previous_version: u32,
    /// Equal to `previous_version` when the rotation failed.
    pub new_version: u32,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_records: Option<u64>,
    /// Fatal errors when `success` is false, non-fatal warnings otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Snapshot of the key subsystem for operators and schedulers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatus {
    pub current_version: u32,
    pub versions: Vec<KeyMetadata>,
    pub rotation_enabled: bool,
    #[serde(default)]
    pub next_rotation_due: Option<DateTime<Utc>>,
    pub rotation_due: bool,
}

/// A record held by the external data store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    pub encrypted_payload: EncryptedPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_moves_forward_only() {
        let mut progress = ReEncryptionProgress::new();
        assert!(progress.transition(ReEncryptionStatus::InProgress));
        assert!(!progress.transition(ReEncryptionStatus::Pending));
        assert!(progress.transition(ReEncryptionStatus::Completed));
        assert!(!progress.transition(ReEncryptionStatus::InProgress));
        assert!(!progress.transition(ReEncryptionStatus::Failed));
        assert_eq!(progress.status, ReEncryptionStatus::Completed);
    }

    #[test]
    fn pending_can_fail_directly() {
        let mut progress = ReEncryptionProgress::new();
        assert!(progress.transition(ReEncryptionStatus::Failed));
        assert_eq!(progress.status, ReEncryptionStatus::Failed);
    }

    #[test]
    fn estimate_only_while_running() {
        let mut progress = ReEncryptionProgress::new();
        progress.transition(ReEncryptionStatus::InProgress);
        progress.total = 10;
        progress.update_estimate();
        assert!(progress.estimated_completion.is_none());

        progress.processed = 5;
        progress.update_estimate();
        assert!(progress.estimated_completion.is_some());

        progress.transition(ReEncryptionStatus::Completed);
        assert!(progress.estimated_completion.is_none());
    }

    #[test]
    fn metadata_key_id_carries_version() {
        let meta = KeyMetadata::new(4, Algorithm::Aes256Gcm);
        assert!(meta.key_id.starts_with("key-v4-"));
        assert!(!meta.is_deprecated());
    }

    #[test]
    fn lifecycle_event_serializes_type_tag() {
        let event = KeyLifecycleEvent::new(LifecycleEventType::ReencryptionStarted, 2)
            .with_actor("scheduler");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "REENCRYPTION_STARTED");
        assert_eq!(json["actor"], "scheduler");
    }
}
