//! Key management error types.

use atrest_crypto::{CryptoError, ErrorCode};
use thiserror::Error;

/// Result type for key management operations.
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors that can occur while managing, rotating or using keys.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("remote key custody request failed: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("key version not found: {0}")]
    NotFound(u32),

    #[error("invalid key version: {0}")]
    InvalidVersion(String),

    #[error("pre-rotation validation failed: {0}")]
    PreRotation(String),

    #[error("data store error: {0}")]
    DataStore(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl KeyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            KeyError::Crypto(e) => e.code(),
            KeyError::Remote(_) | KeyError::Http(_) => ErrorCode::RemoteCustodyFailed,
            KeyError::Serialization(_) => ErrorCode::InvalidFormat,
            KeyError::NotFound(_) => ErrorCode::KeyNotFound,
            KeyError::InvalidVersion(_) => ErrorCode::InvalidKeyVersion,
            KeyError::PreRotation(_) => ErrorCode::PreRotationFailed,
            KeyError::DataStore(_) => ErrorCode::DataStoreFailed,
            KeyError::Config(_) => ErrorCode::ConfigurationInvalid,
        }
    }

    /// Internal diagnostic detail for crypto failures; see
    /// [`CryptoError::cause`].
    pub fn cause(&self) -> Option<&str> {
        match self {
            KeyError::Crypto(e) => e.cause(),
            _ => None,
        }
    }
}
