//! Crypto error types.

/// Errors from manifest signing and token generation.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Failed to decrypt signing key: {0}")]
    KeyDecryption(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Signing certificate does not match signing key")]
    KeyMismatch,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Random source unavailable: {0}")]
    Random(String),
}
