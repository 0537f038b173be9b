// src/error.rs

//! Crate-wide error type
//!
//! Variants follow the scope at which they are handled: configuration errors
//! stop startup, catalog errors abort one mirror pass, and integrity/publish
//! errors abort a single item.

use thiserror::Error;

/// Errors produced by the synchronization engine
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid settings, fatal at startup
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Signature absent, malformed, or not made by a keyring key
    #[error("Signature verification failed: {0}")]
    VerificationError(String),

    /// Network or transport failure while talking to a catalog or the target
    #[error("Fetch failed: {0}")]
    FetchError(String),

    /// Malformed catalog document
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Downloaded bytes do not hash to the declared checksum
    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    IntegrityError {
        name: String,
        expected: String,
        actual: String,
    },

    /// Target image service rejected a create/update/delete
    #[error("Publish failed: {0}")]
    PublishError(String),

    /// Shutdown requested while an item was in flight
    #[error("Interrupted by shutdown")]
    Interrupted,

    /// Another engine instance holds the region directory
    #[error("Region directory locked: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error ends the current mirror pass rather than one item
    pub fn is_mirror_fatal(&self) -> bool {
        matches!(
            self,
            Self::VerificationError(_) | Self::FetchError(_) | Self::ParseError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::ParseError(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::ConfigError(e.to_string())
    }
}
