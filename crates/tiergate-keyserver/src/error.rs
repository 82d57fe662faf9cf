//! Error types for the key-release service and key recovery.

use thiserror::Error;

/// Errors a key server returns for one request.
#[derive(Debug, Error)]
pub enum KeyServerError {
    /// Malformed request or limits exceeded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The session certificate or request signature did not verify.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// The session's TTL has elapsed on the server's clock.
    #[error("session expired at {expired_at}")]
    SessionExpired { expired_at: i64 },

    /// The session is for a scope this server does not serve.
    #[error("wrong scope: {0}")]
    WrongScope(String),

    /// No verification transaction and the scope does not allow open access.
    #[error("verification transaction required")]
    VerificationRequired,

    /// A requested id is not approved by any call in the transaction.
    #[error("id not approved by verification transaction: {0}")]
    IdNotApproved(String),

    /// The simulated `seal_approve` aborted.
    #[error("access denied (abort {code}): {reason}")]
    AccessDenied { code: u64, reason: String },

    /// The server could not be reached.
    #[error("key server unavailable: {0}")]
    Unavailable(String),

    /// Ledger error while simulating.
    #[error("ledger error: {0}")]
    Ledger(#[from] tiergate_store::StoreError),

    /// Seal-layer error.
    #[error("seal error: {0}")]
    Seal(#[from] tiergate_seal::SealError),
}

impl KeyServerError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeyServerError::Unavailable(_) => true,
            KeyServerError::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for key server operations.
pub type Result<T> = std::result::Result<T, KeyServerError>;

/// Errors from recovering a plaintext through the key servers.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Fewer than `required` servers released keys.
    #[error("threshold not met: {approved} of {required} key servers approved")]
    ThresholdNotMet { approved: usize, required: usize },

    /// A server rejected the session as expired. Callers may refresh the
    /// session and retry once.
    #[error("session expired")]
    SessionExpired,

    /// Ciphertext or metadata malformed, missing or inconsistent.
    #[error("metadata corruption: {0}")]
    MetadataCorruption(String),

    /// The threshold was missed because key servers stayed unreachable
    /// after retries. Retrying later may succeed.
    #[error("key servers unreachable: {0}")]
    Transport(String),

    /// Client misconfigured (scope, servers, threshold, unsigned session).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<tiergate_seal::SealError> for RecoveryError {
    fn from(err: tiergate_seal::SealError) -> Self {
        use tiergate_seal::SealError;
        match err {
            SealError::NotEnoughShares { have, need } => RecoveryError::ThresholdNotMet {
                approved: have,
                required: need,
            },
            SealError::SessionExpired { .. } => RecoveryError::SessionExpired,
            SealError::MetadataCorruption(msg) => RecoveryError::MetadataCorruption(msg),
            SealError::Decryption(msg) => {
                RecoveryError::MetadataCorruption(format!("ciphertext failed to open: {}", msg))
            }
            SealError::Serialization(msg) => RecoveryError::MetadataCorruption(msg),
            other => RecoveryError::Configuration(other.to_string()),
        }
    }
}

/// Result type for recovery operations.
pub type RecoveryResult<T> = std::result::Result<T, RecoveryError>;
