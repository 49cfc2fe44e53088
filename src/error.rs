//! Error types for the livecfg library

use thiserror::Error;

/// Result type alias for livecfg operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for livecfg
#[derive(Error, Debug)]
pub enum Error {
    // -------------------------------------------------------------------------
    // Validation & Cast Errors
    // -------------------------------------------------------------------------
    #[error("Invalid value '{value}' for setting '{key}': {reason}")]
    Validation {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to cast value for setting '{key}' as {type_name}: {reason}")]
    Cast {
        key: String,
        type_name: String,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Encryption Errors
    // -------------------------------------------------------------------------
    #[error(
        "Unable to decrypt value for '{0}'. Maybe you changed the master key or the encrypted-keys list without re-encrypting stored values"
    )]
    Decrypt(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Crypto configuration error: {0}")]
    Crypto(String),

    // -------------------------------------------------------------------------
    // Backing Store Errors
    // -------------------------------------------------------------------------
    #[error(
        "Failed to update settings key '{0}': this key does not exist. Create it with update_or_create before storing"
    )]
    MissingKey(String),

    #[error("Settings key '{0}' already exists")]
    DuplicateKey(String),

    #[error("Backing store error: {0}")]
    Store(String),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Cache Errors
    // -------------------------------------------------------------------------
    #[error("Cache tier error: {0}")]
    Cache(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Failed to serialize data: {0}")]
    Serialize(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this is a "not found" type error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::MissingKey(_))
    }

    /// Check if this error came from a cache tier
    #[must_use]
    pub fn is_cache_error(&self) -> bool {
        matches!(self, Error::Cache(_))
    }

    /// Check if this is a validation or cast failure
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation { .. } | Error::Cast { .. })
    }
}
