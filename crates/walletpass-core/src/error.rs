//! Error types for `WalletPass` core library.

use thiserror::Error;

use crate::db::DatabaseError;

/// Result type alias using `WalletPass` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `WalletPass` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A pass cannot be built from the staged content
    #[error("Validation error: {0}")]
    Validation(String),

    /// Manifest signing failed; no artifact was produced
    #[error("Crypto error: {0}")]
    Crypto(#[from] walletpass_crypto::CryptoError),

    /// A `.pkpass` archive could not be read or written
    #[error("Archive error: {0}")]
    Archive(String),

    /// A timestamp in none of the accepted formats
    #[error("Unrecognized timestamp: {0}")]
    Timestamp(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Repository error while persisting a pass
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}
