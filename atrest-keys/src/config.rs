//! Rotation, re-encryption and key custody configuration.

use crate::error::{KeyError, KeyResult};
use atrest_crypto::Algorithm;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Connection settings for a Transit-style remote key custody service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitConfig {
    /// Base address, e.g. "https://vault.internal:8200".
    pub address: String,
    /// Bearer token presented on every request.
    pub token: String,
    /// Name of the key inside the transit mount.
    pub key_name: String,
    /// Mount path of the transit engine.
    pub mount: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Configuration for the key rotation subsystem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Whether scheduled rotation (`rotate_if_due`) is active.
    pub rotation_enabled: bool,

    /// Age in days after which the current key is due for rotation.
    pub rotation_interval_days: u32,

    /// Trailing key versions kept decryptable after a rotation.
    pub retention_versions: u32,

    /// Round-trip the current key before minting a new one.
    pub pre_rotation_validation: bool,

    /// Round-trip the new key after the pointer moves.
    pub post_rotation_validation: bool,

    /// Optional webhook that receives a rotation summary.
    pub notification_webhook_url: Option<String>,

    /// Algorithm used for new encryptions.
    pub algorithm: Algorithm,

    /// Name of the environment variable holding the master secret.
    pub master_key_env: String,

    /// Records fetched per re-encryption page.
    pub batch_size: usize,

    /// Ceiling on concurrent record re-encryptions within a batch.
    pub max_concurrent_reencryptions: usize,

    /// Remote custody settings; `None` selects local key derivation.
    pub transit: Option<TransitConfig>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            rotation_enabled: false,
            rotation_interval_days: 90,
            retention_versions: 3,
            pre_rotation_validation: true,
            post_rotation_validation: true,
            notification_webhook_url: None,
            algorithm: Algorithm::Aes256Gcm,
            master_key_env: "ENCRYPTION_MASTER_KEY".to_string(),
            batch_size: 100,
            max_concurrent_reencryptions: 10,
            transit: None,
        }
    }
}

impl RotationConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> KeyResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`, falling back to defaults for
    /// anything unset.
    pub fn from_lookup<F>(lookup: F) -> KeyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let transit = if parse_or(&get, "TRANSIT_ENABLED", false)? {
            let require = |name: &str| {
                get(name).ok_or_else(|| {
                    KeyError::Config(format!("{name} is required when TRANSIT_ENABLED is set"))
                })
            };
            Some(TransitConfig {
                address: require("TRANSIT_ADDR")?.trim_end_matches('/').to_string(),
                token: require("TRANSIT_TOKEN")?,
                key_name: require("TRANSIT_KEY_NAME")?,
                mount: get("TRANSIT_MOUNT").unwrap_or_else(|| "transit".to_string()),
                timeout_secs: parse_or(&get, "TRANSIT_TIMEOUT_SECS", 30)?,
            })
        } else {
            None
        };

        let config = Self {
            rotation_enabled: parse_or(&get, "KEY_ROTATION_ENABLED", defaults.rotation_enabled)?,
            rotation_interval_days: parse_or(
                &get,
                "KEY_ROTATION_INTERVAL_DAYS",
                defaults.rotation_interval_days,
            )?,
            retention_versions: parse_or(
                &get,
                "KEY_RETENTION_VERSIONS",
                defaults.retention_versions,
            )?,
            pre_rotation_validation: parse_or(
                &get,
                "KEY_ROTATION_PRE_VALIDATION",
                defaults.pre_rotation_validation,
            )?,
            post_rotation_validation: parse_or(
                &get,
                "KEY_ROTATION_POST_VALIDATION",
                defaults.post_rotation_validation,
            )?,
            notification_webhook_url: get("KEY_ROTATION_WEBHOOK_URL"),
            algorithm: match get("ENCRYPTION_ALGORITHM") {
                Some(raw) => Algorithm::from_str(&raw).map_err(|_| {
                    KeyError::Config(format!("ENCRYPTION_ALGORITHM: unsupported value {raw:?}"))
                })?,
                None => defaults.algorithm,
            },
            master_key_env: get("ENCRYPTION_MASTER_KEY_VAR").unwrap_or(defaults.master_key_env),
            batch_size: parse_or(&get, "REENCRYPTION_BATCH_SIZE", defaults.batch_size)?,
            max_concurrent_reencryptions: parse_or(
                &get,
                "REENCRYPTION_MAX_CONCURRENT",
                defaults.max_concurrent_reencryptions,
            )?,
            transit,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the rest of the subsystem cannot work with.
    pub fn validate(&self) -> KeyResult<()> {
        if self.batch_size == 0 {
            return Err(KeyError::Config("batch size must be at least 1".to_string()));
        }
        if self.max_concurrent_reencryptions == 0 {
            return Err(KeyError::Config(
                "max concurrent re-encryptions must be at least 1".to_string(),
            ));
        }
        if self.rotation_interval_days == 0 {
            return Err(KeyError::Config(
                "rotation interval must be at least 1 day".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective per-batch concurrency: the stricter of the two ceilings.
    pub fn concurrency_limit(&self) -> usize {
        self.batch_size.min(self.max_concurrent_reencryptions).max(1)
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> KeyResult<T>
where
    T: ParseEnv,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => T::parse_env(raw.trim())
            .ok_or_else(|| KeyError::Config(format!("{name}: cannot parse {raw:?}"))),
        None => Ok(default),
    }
}

trait ParseEnv: Sized {
    fn parse_env(raw: &str) -> Option<Self>;
}

impl ParseEnv for bool {
    fn parse_env(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}

macro_rules! parse_env_via_from_str {
    ($($t:ty),*) => {
        $(impl ParseEnv for $t {
            fn parse_env(raw: &str) -> Option<Self> {
                raw.parse().ok()
            }
        })*
    };
}

parse_env_via_from_str!(u32, u64, usize);
