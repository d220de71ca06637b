//! Versioned key management for atrest.
//!
//! Provides, on top of `atrest-crypto`:
//! - Key providers (local derivation, remote custody) and version stores
//! - The encryption service that seals under the current key version
//! - Batch re-encryption of stored records onto the current version
//! - The rotation orchestrator with validation, retention and auditing
//! - Environment configuration and a `KeyManagement` owner that wires it all

pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod notify;
pub mod provider;
pub mod reencrypt;
pub mod rotation;
pub mod service;
pub mod store;
pub mod transit;
pub mod types;

pub use audit::{AuditEntry, AuditLogger, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::{RotationConfig, TransitConfig};
pub use error::{KeyError, KeyResult};
pub use manager::KeyManagement;
pub use provider::{KeyProvider, LocalKeyProvider, TransitKeyProvider};
pub use reencrypt::{DataStore, ReEncryptionEngine};
pub use rotation::KeyRotationOrchestrator;
pub use service::{DecryptOptions, EncryptOptions, EncryptionService};
pub use store::{InMemoryKeyVersionStore, KeyVersionStore, TransitKeyVersionStore};
pub use types::*;
