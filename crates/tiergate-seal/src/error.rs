//! Error types for the seal module.

use thiserror::Error;

/// Errors from client-side sealing, sessions and key handling.
#[derive(Debug, Error)]
pub enum SealError {
    /// Session TTL outside the allowed range.
    #[error("session ttl must be 1..={max} minutes, got {got}")]
    InvalidTtl { got: u32, max: u32 },

    /// The session has no signature attached yet.
    #[error("session is not signed")]
    SessionNotSigned,

    /// The session's TTL has elapsed.
    #[error("session expired at {expired_at}")]
    SessionExpired { expired_at: i64 },

    /// A signature did not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Threshold outside `1..=servers`.
    #[error("invalid threshold {threshold} for {servers} key servers")]
    InvalidThreshold { threshold: usize, servers: usize },

    /// Not enough key server keys to reconstruct.
    #[error("not enough shares: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },

    /// Ciphertext or metadata is malformed or inconsistent.
    #[error("metadata corruption: {0}")]
    MetadataCorruption(String),

    /// Verification transaction could not be built.
    #[error("invalid verification transaction: {0}")]
    InvalidVerification(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption (authentication) error.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] tiergate_core::CoreError),
}

/// Result type for seal operations.
pub type Result<T> = std::result::Result<T, SealError>;
