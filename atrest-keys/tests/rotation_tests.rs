mod support;

use async_trait::async_trait;
use atrest_crypto::{Algorithm, KdfParams};
use atrest_keys::audit::{AuditAction, AuditResult};
use atrest_keys::rotation::{POST_ROTATION_WARNING, PRE_ROTATION_FAILED};
use atrest_keys::{
    InMemoryKeyVersionStore, KeyManagement, KeyMetadata, KeyResult, KeyVersionStore,
    LifecycleEventType, MemoryAuditSink, RotationConfig,
};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{MASTER_SECRET, MockDataStore, default_harness, harness};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// --- Core workflow ---

#[tokio::test]
async fn rotated_key_still_decrypts_old_payloads() {
    let h = default_harness().await;
    let svc = h.keys.encryption();

    let payload = svc.encrypt_string("Hello, World!").await.unwrap();
    assert_eq!(payload.key_version, 1);

    let result = h.keys.rotation().rotate_keys().await;
    assert!(result.success, "rotation failed: {:?}", result.errors);
    assert_eq!(h.store.get_current_version().await.unwrap(), 2);

    assert_eq!(svc.decrypt_string(&payload).await.unwrap(), "Hello, World!");
    assert_eq!(svc.encrypt_string("next").await.unwrap().key_version, 2);
}

#[tokio::test]
async fn each_rotation_advances_by_exactly_one() {
    let h = default_harness().await;
    for expected in 2..=5u32 {
        let result = h.keys.rotation().rotate_keys().await;
        assert!(result.success);
        assert_eq!(result.previous_version, expected - 1);
        assert_eq!(result.new_version, expected);
        assert_eq!(h.store.get_current_version().await.unwrap(), expected);
    }
}

#[tokio::test]
async fn new_version_metadata_recorded() {
    let h = default_harness().await;
    h.keys.rotation().rotate_keys().await;
    let meta = h.store.get_version_metadata(2).await.unwrap().unwrap();
    assert_eq!(meta.version, 2);
    assert_eq!(meta.algorithm, Algorithm::Aes256Gcm);
    assert!(meta.key_id.starts_with("key-v2-"));
    assert!(meta.expires_at.is_none());
}

// --- Retention ---

#[tokio::test]
async fn versions_outside_retention_window_are_deprecated() {
    let h = default_harness().await;
    for _ in 0..5 {
        assert!(h.keys.rotation().rotate_keys().await.success);
    }
    // Now at 6 with retention 3: threshold is 3.
    for v in 1..=2 {
        assert!(h.store.is_deprecated(v).await, "v{v} should be deprecated");
        let meta = h.store.get_version_metadata(v).await.unwrap().unwrap();
        assert!(meta.expires_at.is_some());
    }
    for v in 3..=6 {
        assert!(!h.store.is_deprecated(v).await, "v{v} should be retained");
    }
}

#[tokio::test]
async fn no_deprecation_while_within_retention() {
    let h = default_harness().await;
    for _ in 0..3 {
        h.keys.rotation().rotate_keys().await;
    }
    assert!(!h.store.is_deprecated(1).await);
    assert!(
        h.keys
            .events()
            .of_type(LifecycleEventType::KeyDeprecated)
            .is_empty()
    );
}

#[tokio::test]
async fn deprecated_versions_still_decrypt() {
    let config = RotationConfig {
        retention_versions: 1,
        ..RotationConfig::default()
    };
    let h = harness(config).await;
    let payload = h.keys.encryption().encrypt_string("old").await.unwrap();
    h.keys.rotation().rotate_keys().await;
    h.keys.rotation().rotate_keys().await;
    assert!(h.store.is_deprecated(1).await);
    assert_eq!(
        h.keys.encryption().decrypt_string(&payload).await.unwrap(),
        "old"
    );
}

#[tokio::test]
async fn deprecation_events_emitted_once_per_version() {
    let config = RotationConfig {
        retention_versions: 1,
        ..RotationConfig::default()
    };
    let h = harness(config).await;
    for _ in 0..4 {
        h.keys.rotation().rotate_keys().await;
    }
    let deprecated: Vec<u32> = h
        .keys
        .events()
        .of_type(LifecycleEventType::KeyDeprecated)
        .iter()
        .map(|e| e.key_version)
        .collect();
    assert_eq!(deprecated, vec![1, 2, 3]);
}

// --- Validation gates ---

#[tokio::test]
async fn missing_metadata_fails_pre_rotation_gate() {
    support::init_tracing();
    let store = Arc::new(InMemoryKeyVersionStore::without_metadata(Algorithm::Aes256Gcm));
    let audit = MemoryAuditSink::new();
    let keys = KeyManagement::local(
        RotationConfig::default(),
        MASTER_SECRET,
        Arc::clone(&store) as Arc<dyn KeyVersionStore>,
        KdfParams::low_cost(),
        Arc::new(audit.clone()),
    )
    .await
    .unwrap();

    let result = keys.rotation().rotate_keys().await;
    assert!(!result.success);
    assert_eq!(result.errors, vec![PRE_ROTATION_FAILED.to_string()]);
    assert_eq!(result.previous_version, 1);
    assert_eq!(result.new_version, 1);
    assert_eq!(store.get_current_version().await.unwrap(), 1);
    assert!(store.get_version_metadata(2).await.unwrap().is_none());

    let entries = audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, "KEY_ROTATION_FAILED");
    assert_eq!(entries[0].result, AuditResult::Failure);
}

#[tokio::test]
async fn pre_rotation_gate_can_be_disabled() {
    support::init_tracing();
    let store = Arc::new(InMemoryKeyVersionStore::without_metadata(Algorithm::Aes256Gcm));
    let config = RotationConfig {
        pre_rotation_validation: false,
        ..RotationConfig::default()
    };
    let keys = KeyManagement::local(
        config,
        MASTER_SECRET,
        Arc::clone(&store) as Arc<dyn KeyVersionStore>,
        KdfParams::low_cost(),
        Arc::new(MemoryAuditSink::new()),
    )
    .await
    .unwrap();

    let result = keys.rotation().rotate_keys().await;
    assert!(result.success);
    assert_eq!(result.new_version, 2);
}

/// Accepts pointer writes but never applies them.
struct StuckPointerStore(InMemoryKeyVersionStore);

#[async_trait]
impl KeyVersionStore for StuckPointerStore {
    async fn get_current_version(&self) -> KeyResult<u32> {
        self.0.get_current_version().await
    }
    async fn set_current_version(&self, _version: u32) -> KeyResult<()> {
        Ok(())
    }
    async fn get_version_metadata(&self, version: u32) -> KeyResult<Option<KeyMetadata>> {
        self.0.get_version_metadata(version).await
    }
    async fn save_version_metadata(&self, metadata: KeyMetadata) -> KeyResult<()> {
        self.0.save_version_metadata(metadata).await
    }
    async fn deprecate_version(&self, version: u32) -> KeyResult<()> {
        self.0.deprecate_version(version).await
    }
    async fn list_versions(&self) -> KeyResult<Vec<u32>> {
        self.0.list_versions().await
    }
}

#[tokio::test]
async fn failed_post_verification_warns_without_rollback() {
    support::init_tracing();
    let store: Arc<dyn KeyVersionStore> =
        Arc::new(StuckPointerStore(InMemoryKeyVersionStore::default()));
    let keys = KeyManagement::local(
        RotationConfig::default(),
        MASTER_SECRET,
        Arc::clone(&store),
        KdfParams::low_cost(),
        Arc::new(MemoryAuditSink::new()),
    )
    .await
    .unwrap();

    let result = keys.rotation().rotate_keys().await;
    assert!(result.success);
    assert_eq!(result.new_version, 2);
    assert_eq!(result.errors, vec![POST_ROTATION_WARNING.to_string()]);
    assert!(store.get_version_metadata(2).await.unwrap().is_some());
}

// --- Audit & events ---

#[tokio::test]
async fn successful_rotation_is_audited() {
    let h = default_harness().await;
    h.keys.rotation().rotate_keys().await;

    let entries = h.audit.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.tenant_id, "system");
    assert_eq!(entry.event_type, "KEY_ROTATION");
    assert_eq!(entry.action, AuditAction::Configure);
    assert_eq!(entry.result, AuditResult::Success);
    let details = entry.details.as_ref().unwrap();
    assert_eq!(details["previousVersion"], 1);
    assert_eq!(details["newVersion"], 2);
}

#[tokio::test]
async fn lifecycle_events_follow_mint_order() {
    let h = default_harness().await;
    h.keys.rotation().rotate_keys().await;

    let kinds: Vec<LifecycleEventType> = h
        .keys
        .rotation()
        .lifecycle_events_for_version(2)
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![LifecycleEventType::KeyCreated, LifecycleEventType::KeyRotated]
    );
}

#[tokio::test]
async fn reset_clears_event_ring() {
    let h = default_harness().await;
    h.keys.rotation().rotate_keys().await;
    assert!(!h.keys.rotation().lifecycle_events(10).is_empty());
    h.keys.reset_for_tests().await;
    assert!(h.keys.rotation().lifecycle_events(10).is_empty());
}

// --- Webhook ---

#[tokio::test]
async fn webhook_receives_rotation_summary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/rotation"))
        .and(body_partial_json(serde_json::json!({
            "event": "key_rotation",
            "success": true,
            "previousVersion": 1,
            "newVersion": 2
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = RotationConfig {
        notification_webhook_url: Some(format!("{}/hooks/rotation", server.uri())),
        ..RotationConfig::default()
    };
    let h = harness(config).await;
    assert!(h.keys.rotation().rotate_keys().await.success);
}

#[tokio::test]
async fn webhook_error_does_not_fail_rotation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = RotationConfig {
        notification_webhook_url: Some(format!("{}/hooks/rotation", server.uri())),
        ..RotationConfig::default()
    };
    let h = harness(config).await;
    let result = h.keys.rotation().rotate_keys().await;
    assert!(result.success);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn unreachable_webhook_does_not_fail_rotation() {
    let config = RotationConfig {
        notification_webhook_url: Some("http://127.0.0.1:9/hooks/rotation".to_string()),
        ..RotationConfig::default()
    };
    let h = harness(config).await;
    assert!(h.keys.rotation().rotate_keys().await.success);
}

// --- Status & scheduling ---

#[tokio::test]
async fn status_reports_versions_and_due_time() {
    let h = default_harness().await;
    h.keys.rotation().rotate_keys().await;

    let status = h.keys.rotation().get_key_status().await.unwrap();
    assert_eq!(status.current_version, 2);
    assert_eq!(
        status.versions.iter().map(|m| m.version).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert!(!status.rotation_enabled);
    assert!(!status.rotation_due);

    let due = status.next_rotation_due.unwrap();
    let days = (due - Utc::now()).num_days();
    assert!((89..=90).contains(&days));
}

#[tokio::test]
async fn rotate_if_due_skips_fresh_key() {
    let config = RotationConfig {
        rotation_enabled: true,
        ..RotationConfig::default()
    };
    let h = harness(config).await;
    assert!(h.keys.rotation().rotate_if_due().await.unwrap().is_none());
    assert_eq!(h.store.get_current_version().await.unwrap(), 1);
}

#[tokio::test]
async fn rotate_if_due_rotates_stale_key() {
    let config = RotationConfig {
        rotation_enabled: true,
        rotation_interval_days: 30,
        ..RotationConfig::default()
    };
    let h = harness(config).await;
    let mut stale = h.store.get_version_metadata(1).await.unwrap().unwrap();
    stale.created_at = Utc::now() - Duration::days(45);
    h.store.save_version_metadata(stale).await.unwrap();

    let result = h.keys.rotation().rotate_if_due().await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(result.new_version, 2);
}

#[tokio::test]
async fn rotate_if_due_ignores_stale_key_when_disabled() {
    let h = default_harness().await;
    let mut stale = h.store.get_version_metadata(1).await.unwrap().unwrap();
    stale.created_at = Utc::now() - Duration::days(365);
    h.store.save_version_metadata(stale).await.unwrap();

    assert!(h.keys.rotation().rotate_if_due().await.unwrap().is_none());
}

// --- Rotate then migrate ---

#[tokio::test]
async fn rotate_and_reencrypt_reports_affected_records() {
    let h = default_harness().await;
    let data = MockDataStore::new();
    data.seed(h.keys.encryption(), 1, 25).await;

    let result = h.keys.rotation().rotate_and_reencrypt(&data).await;
    assert!(result.success);
    assert_eq!(result.affected_records, Some(25));
    assert!(result.errors.is_empty());
    assert!(data.versions().await.iter().all(|v| *v == 2));
}

#[tokio::test]
async fn rotate_and_reencrypt_surfaces_record_failures() {
    let h = default_harness().await;
    let data = MockDataStore::new();
    data.seed(h.keys.encryption(), 1, 5).await;
    data.fail_update_for("rec-0002").await;

    let result = h.keys.rotation().rotate_and_reencrypt(&data).await;
    assert!(result.success);
    assert_eq!(result.affected_records, Some(4));
    assert_eq!(result.errors, vec!["1 records failed re-encryption".to_string()]);
}
