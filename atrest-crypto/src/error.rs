//! Error types for the encryption primitives.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Stable, machine-readable error codes shared by every layer above the
/// primitives. Callers branch on these; messages are for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    EncryptionFailed,
    DecryptionFailed,
    MissingKey,
    InvalidFormat,
    PreRotationFailed,
    KeyNotFound,
    InvalidKeyVersion,
    RemoteCustodyFailed,
    DataStoreFailed,
    ConfigurationInvalid,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EncryptionFailed => "ENCRYPTION_FAILED",
            ErrorCode::DecryptionFailed => "DECRYPTION_FAILED",
            ErrorCode::MissingKey => "MISSING_KEY",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::PreRotationFailed => "PRE_ROTATION_FAILED",
            ErrorCode::KeyNotFound => "KEY_NOT_FOUND",
            ErrorCode::InvalidKeyVersion => "INVALID_KEY_VERSION",
            ErrorCode::RemoteCustodyFailed => "REMOTE_CUSTODY_FAILED",
            ErrorCode::DataStoreFailed => "DATA_STORE_FAILED",
            ErrorCode::ConfigurationInvalid => "CONFIGURATION_INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the encryption primitives.
///
/// The displayed message is deliberately generic so it can be surfaced to
/// untrusted callers. The wrapped string is the internal cause and is only
/// reachable through [`CryptoError::cause`].
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encryption(String),

    #[error("decryption failed")]
    Decryption(String),

    #[error("encryption key not available")]
    MissingKey(String),

    #[error("invalid encrypted payload format")]
    InvalidFormat(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("key derivation failed")]
    KeyDerivation(String),
}

impl CryptoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CryptoError::Encryption(_) => ErrorCode::EncryptionFailed,
            CryptoError::Decryption(_) => ErrorCode::DecryptionFailed,
            CryptoError::MissingKey(_) => ErrorCode::MissingKey,
            CryptoError::InvalidFormat(_) => ErrorCode::InvalidFormat,
            CryptoError::InvalidKeyLength { .. } => ErrorCode::EncryptionFailed,
            CryptoError::KeyDerivation(_) => ErrorCode::MissingKey,
        }
    }

    /// Internal diagnostic detail. Log it, never return it to a client.
    pub fn cause(&self) -> Option<&str> {
        match self {
            CryptoError::Encryption(c)
            | CryptoError::Decryption(c)
            | CryptoError::MissingKey(c)
            | CryptoError::InvalidFormat(c)
            | CryptoError::KeyDerivation(c) => Some(c.as_str()),
            CryptoError::InvalidKeyLength { .. } => None,
        }
    }
}
