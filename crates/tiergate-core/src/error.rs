//! Error types for tiergate core.

use thiserror::Error;

/// Core errors that can occur while building or parsing primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("tier {0} is out of range")]
    InvalidTier(u8),

    #[error("invalid encryption identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
