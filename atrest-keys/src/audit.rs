//! Compliance audit trail for key operations.
//!
//! [`AuditSink`] is the storage seam. [`AuditLogger`] wraps a sink, asks it
//! once at construction whether it stores structured details, and from
//! then on never lets an audit failure propagate into the operation being
//! audited.

use crate::error::KeyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Scope used for entries not tied to a tenant.
pub const SYSTEM_TENANT: &str = "system";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Configure,
    Encrypt,
    Decrypt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Success,
    Failure,
}

/// One audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub tenant_id: String,
    pub event_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub action: AuditAction,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn system(
        event_type: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        action: AuditAction,
        result: AuditResult,
    ) -> Self {
        Self {
            tenant_id: SYSTEM_TENANT.to_string(),
            event_type: event_type.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action,
            result,
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Where audit entries end up.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, entry: AuditEntry) -> KeyResult<()>;

    /// Whether the sink stores `details`. Probed once by [`AuditLogger`].
    async fn supports_details(&self) -> bool {
        true
    }
}

/// Emits entries as `tracing` events under the `atrest::audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log(&self, entry: AuditEntry) -> KeyResult<()> {
        let details = entry
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        info!(
            target: "atrest::audit",
            tenant_id = %entry.tenant_id,
            event_type = %entry.event_type,
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            action = ?entry.action,
            result = ?entry.result,
            details = %details,
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
    without_details: bool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that reports no detail support, for basic storage backends.
    pub fn basic() -> Self {
        Self {
            without_details: true,
            ..Self::default()
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log(&self, entry: AuditEntry) -> KeyResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
        Ok(())
    }

    async fn supports_details(&self) -> bool {
        !self.without_details
    }
}

/// Audit front door used by the rotation workflow.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    details: bool,
}

impl AuditLogger {
    /// Wraps `sink`, probing its capabilities once.
    pub async fn connect(sink: Arc<dyn AuditSink>) -> Self {
        let details = sink.supports_details().await;
        if !details {
            info!("audit sink does not store details, entries will be basic");
        }
        Self { sink, details }
    }

    pub fn supports_details(&self) -> bool {
        self.details
    }

    /// Records `entry`. Failures are logged and dropped.
    pub async fn log(&self, mut entry: AuditEntry) {
        if !self.details {
            entry.details = None;
        }
        let event_type = entry.event_type.clone();
        if let Err(e) = self.sink.log(entry).await {
            warn!("failed to write audit entry {event_type}: {e}");
        }
    }
}
