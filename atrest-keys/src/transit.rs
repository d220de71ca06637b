//! HTTP client for a Transit-style remote key custody service.
//!
//! Covers the handful of endpoints the key subsystem needs: reading key
//! metadata, rotating, updating the min encryption/decryption versions, and
//! whole-value encrypt/decrypt. Authenticates with a bearer token.

use crate::config::TransitConfig;
use crate::error::{KeyError, KeyResult};
use crate::types::KeyMetadata;
use atrest_crypto::Algorithm;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Key description as returned by `GET /v1/{mount}/keys/{name}`.
#[derive(Clone, Debug, Deserialize)]
pub struct TransitKeyInfo {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub key_type: String,
    pub latest_version: u32,
    #[serde(default)]
    pub min_decryption_version: u32,
    #[serde(default)]
    pub min_encryption_version: u32,
    /// Version number (as a string) to creation time. Symmetric keys report
    /// unix seconds, some key types report RFC 3339 strings.
    #[serde(default)]
    pub keys: BTreeMap<String, serde_json::Value>,
}

impl TransitKeyInfo {
    /// Known versions, ascending.
    pub fn versions(&self) -> Vec<u32> {
        let mut versions: Vec<u32> = self.keys.keys().filter_map(|k| k.parse().ok()).collect();
        versions.sort_unstable();
        versions
    }

    pub fn created_at(&self, version: u32) -> Option<DateTime<Utc>> {
        match self.keys.get(&version.to_string())? {
            serde_json::Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single(),
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Translates the service's schema into [`KeyMetadata`].
    pub fn metadata(&self, version: u32) -> Option<KeyMetadata> {
        if !self.keys.contains_key(&version.to_string()) {
            return None;
        }
        Some(KeyMetadata {
            version,
            created_at: self.created_at(version)?,
            expires_at: None,
            algorithm: match self.key_type.as_str() {
                "chacha20-poly1305" => Algorithm::ChaCha20Poly1305,
                _ => Algorithm::Aes256Gcm,
            },
            key_id: format!("{}:v{version}", self.name),
        })
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Serialize, Default)]
struct KeyConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    min_decryption_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_encryption_version: Option<u32>,
}

/// HTTP client for the remote key custody API.
pub struct TransitClient {
    client: Client,
    config: TransitConfig,
}

impl TransitClient {
    pub fn new(config: TransitConfig) -> KeyResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn key_name(&self) -> &str {
        &self.config.key_name
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/{}/{suffix}",
            self.config.address.trim_end_matches('/'),
            self.config.mount
        )
    }

    async fn get(&self, suffix: &str) -> KeyResult<reqwest::Response> {
        let url = self.url(suffix);
        debug!("GET {url}");
        Ok(self
            .client
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| KeyError::Remote(e.to_string()))?)
    }

    async fn post(&self, suffix: &str, body: &impl Serialize) -> KeyResult<reqwest::Response> {
        let url = self.url(suffix);
        debug!("POST {url}");
        Ok(self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| KeyError::Remote(e.to_string()))?)
    }

    // ── Key management ──

    pub async fn read_key(&self) -> KeyResult<TransitKeyInfo> {
        let resp = self.get(&format!("keys/{}", self.config.key_name)).await?;
        let envelope: DataEnvelope<TransitKeyInfo> = resp.json().await?;
        Ok(envelope.data)
    }

    /// Asks the service to mint a new key version.
    pub async fn rotate_key(&self) -> KeyResult<()> {
        self.post(
            &format!("keys/{}/rotate", self.config.key_name),
            &serde_json::json!({}),
        )
        .await?;
        Ok(())
    }

    pub async fn update_key_config(
        &self,
        min_decryption_version: Option<u32>,
        min_encryption_version: Option<u32>,
    ) -> KeyResult<()> {
        let body = KeyConfigUpdate {
            min_decryption_version,
            min_encryption_version,
        };
        self.post(&format!("keys/{}/config", self.config.key_name), &body)
            .await?;
        Ok(())
    }

    // ── Whole-value encryption ──

    /// Encrypts on the service; returns its opaque ciphertext string.
    pub async fn encrypt(&self, plaintext: &[u8]) -> KeyResult<String> {
        #[derive(Deserialize)]
        struct Resp {
            ciphertext: String,
        }
        let resp = self
            .post(
                &format!("encrypt/{}", self.config.key_name),
                &serde_json::json!({ "plaintext": STANDARD.encode(plaintext) }),
            )
            .await?;
        let envelope: DataEnvelope<Resp> = resp.json().await?;
        Ok(envelope.data.ciphertext)
    }

    pub async fn decrypt(&self, ciphertext: &str) -> KeyResult<Vec<u8>> {
        #[derive(Deserialize)]
        struct Resp {
            plaintext: String,
        }
        let resp = self
            .post(
                &format!("decrypt/{}", self.config.key_name),
                &serde_json::json!({ "ciphertext": ciphertext }),
            )
            .await?;
        let envelope: DataEnvelope<Resp> = resp.json().await?;
        STANDARD
            .decode(&envelope.data.plaintext)
            .map_err(|e| KeyError::Remote(format!("invalid plaintext encoding: {e}")))
    }
}
