//! Application-level owner of the key subsystem.
//!
//! Builds the store, provider, encryption service, re-encryption engine and
//! rotation orchestrator once from a [`RotationConfig`] and hands out
//! shared references. Construct one per process and pass it down.

use crate::audit::{AuditLogger, AuditSink};
use crate::config::RotationConfig;
use crate::error::KeyResult;
use crate::events::LifecycleLog;
use crate::provider::{KeyProvider, LocalKeyProvider, TransitKeyProvider};
use crate::reencrypt::ReEncryptionEngine;
use crate::rotation::KeyRotationOrchestrator;
use crate::service::EncryptionService;
use crate::store::{InMemoryKeyVersionStore, KeyVersionStore, TransitKeyVersionStore};
use crate::transit::TransitClient;
use atrest_crypto::KdfParams;
use std::sync::Arc;
use tracing::info;

pub struct KeyManagement {
    store: Arc<dyn KeyVersionStore>,
    provider: Arc<dyn KeyProvider>,
    transit: Option<Arc<TransitKeyProvider>>,
    service: EncryptionService,
    reencryption: Arc<ReEncryptionEngine>,
    orchestrator: KeyRotationOrchestrator,
    events: Arc<LifecycleLog>,
}

impl KeyManagement {
    /// Wires everything from `config`. With remote custody configured the
    /// custody service backs both store and provider; otherwise keys are
    /// derived from the master secret named by `config.master_key_env`.
    pub async fn from_config(
        config: RotationConfig,
        kdf: KdfParams,
        audit: Arc<dyn AuditSink>,
    ) -> KeyResult<Self> {
        config.validate()?;
        match config.transit.clone() {
            Some(transit) => {
                info!(
                    "key management using remote custody key {} at {}",
                    transit.key_name, transit.address
                );
                let client = Arc::new(TransitClient::new(transit)?);
                let store: Arc<dyn KeyVersionStore> =
                    Arc::new(TransitKeyVersionStore::new(Arc::clone(&client)));
                let provider = Arc::new(TransitKeyProvider::new(client));
                Self::assemble(config, store, provider.clone(), Some(provider), audit).await
            }
            None => {
                let store: Arc<dyn KeyVersionStore> =
                    Arc::new(InMemoryKeyVersionStore::new(config.algorithm));
                let provider =
                    LocalKeyProvider::from_env(&config.master_key_env, Arc::clone(&store), kdf)?;
                info!("key management using locally derived keys");
                Self::assemble(config, store, Arc::new(provider), None, audit).await
            }
        }
    }

    /// Local derivation from an explicit master secret and store.
    pub async fn local(
        config: RotationConfig,
        master_secret: impl Into<Vec<u8>>,
        store: Arc<dyn KeyVersionStore>,
        kdf: KdfParams,
        audit: Arc<dyn AuditSink>,
    ) -> KeyResult<Self> {
        config.validate()?;
        let provider = LocalKeyProvider::new(master_secret, Arc::clone(&store), kdf)?;
        Self::assemble(config, store, Arc::new(provider), None, audit).await
    }

    async fn assemble(
        config: RotationConfig,
        store: Arc<dyn KeyVersionStore>,
        provider: Arc<dyn KeyProvider>,
        transit: Option<Arc<TransitKeyProvider>>,
        audit: Arc<dyn AuditSink>,
    ) -> KeyResult<Self> {
        let events = Arc::new(LifecycleLog::new());
        let service = EncryptionService::new(Arc::clone(&provider), config.algorithm);
        let reencryption = Arc::new(ReEncryptionEngine::new(
            service.clone(),
            Arc::clone(&events),
            config.batch_size,
            config.max_concurrent_reencryptions,
        ));
        let audit = AuditLogger::connect(audit).await;
        let orchestrator = KeyRotationOrchestrator::new(
            config,
            Arc::clone(&store),
            service.clone(),
            Arc::clone(&reencryption),
            Arc::clone(&events),
            audit,
        )?;
        Ok(Self {
            store,
            provider,
            transit,
            service,
            reencryption,
            orchestrator,
            events,
        })
    }

    pub fn store(&self) -> &Arc<dyn KeyVersionStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn KeyProvider> {
        &self.provider
    }

    /// The remote custody provider, for whole-value encryption.
    pub fn transit(&self) -> Option<&Arc<TransitKeyProvider>> {
        self.transit.as_ref()
    }

    pub fn encryption(&self) -> &EncryptionService {
        &self.service
    }

    pub fn reencryption(&self) -> &Arc<ReEncryptionEngine> {
        &self.reencryption
    }

    pub fn rotation(&self) -> &KeyRotationOrchestrator {
        &self.orchestrator
    }

    pub fn events(&self) -> &Arc<LifecycleLog> {
        &self.events
    }

    /// Drops cached keys and lifecycle history. Test harness reset hook;
    /// the store's pointer and metadata are left alone.
    pub async fn reset_for_tests(&self) {
        self.provider.clear_cache().await;
        self.events.clear();
    }
}
