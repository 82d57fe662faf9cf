//! Error taxonomy for publish and view flows.

use thiserror::Error;

use tiergate_core::{CoreError, ObjectId};
use tiergate_keyserver::RecoveryError;
use tiergate_seal::SealError;
use tiergate_store::StoreError;

/// Errors surfaced by [`crate::Client`].
#[derive(Debug, Error)]
pub enum TierGateError {
    /// Missing or invalid configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Encryption was attempted against a policy the ledger does not show
    /// yet. Restart from policy creation.
    #[error("ordering violation: {0}")]
    OrderingViolation(String),

    /// Fewer than `threshold` key servers approved, or the predicate failed.
    #[error("access denied: {0}")]
    AuthorizationDenied(String),

    /// The session expired on the key servers.
    #[error("session expired")]
    SessionExpired,

    /// Ledger, blob store or key servers unreachable after retries.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Ciphertext or its metadata is malformed or missing.
    #[error("metadata corruption: {0}")]
    MetadataCorruption(String),

    /// The ledger aborted a call.
    #[error("ledger rejected call (abort {code}): {reason}")]
    LedgerRejected { code: u64, reason: String },

    /// The call succeeded but the created policy is not in its effects.
    #[error("created policy not found in transaction effects")]
    PolicyNotInEffects,

    /// The post exists but no policy is linked to it yet.
    #[error("post {0} is not linked to a policy")]
    PolicyNotLinked(ObjectId),

    #[error("not found: {0}")]
    NotFound(String),

    /// Local reference cache failure.
    #[error("cache error: {0}")]
    Cache(String),
}

impl TierGateError {
    /// Whether retrying the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TierGateError::Transport(_))
    }
}

impl From<StoreError> for TierGateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Aborted { code, reason } => TierGateError::LedgerRejected { code, reason },
            StoreError::Unavailable(msg) => TierGateError::Transport(msg),
            StoreError::NotFound(msg) => TierGateError::NotFound(msg),
            StoreError::Serialization(msg) | StoreError::InvalidData(msg) => {
                TierGateError::MetadataCorruption(msg)
            }
            other @ (StoreError::Database(_) | StoreError::Migration(_) | StoreError::Io(_)) => {
                TierGateError::Cache(other.to_string())
            }
        }
    }
}

impl From<RecoveryError> for TierGateError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::ThresholdNotMet { .. } => {
                TierGateError::AuthorizationDenied(err.to_string())
            }
            RecoveryError::SessionExpired => TierGateError::SessionExpired,
            RecoveryError::MetadataCorruption(msg) => TierGateError::MetadataCorruption(msg),
            RecoveryError::Transport(msg) => TierGateError::Transport(msg),
            RecoveryError::Configuration(msg) => TierGateError::Configuration(msg),
        }
    }
}

impl From<SealError> for TierGateError {
    fn from(err: SealError) -> Self {
        match err {
            SealError::InvalidVerification(msg) => TierGateError::MetadataCorruption(msg),
            other => RecoveryError::from(other).into(),
        }
    }
}

impl From<CoreError> for TierGateError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidIdentity(msg) | CoreError::DecodingError(msg) => {
                TierGateError::MetadataCorruption(msg)
            }
            other => TierGateError::Configuration(other.to_string()),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, TierGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(TierGateError::from(StoreError::Unavailable("rpc".into())).is_retryable());
        assert!(!TierGateError::SessionExpired.is_retryable());
        assert!(!TierGateError::OrderingViolation("policy".into()).is_retryable());
        assert!(!TierGateError::MetadataCorruption("bad".into()).is_retryable());
    }

    #[test]
    fn test_threshold_shortfall_is_access_denied() {
        let err = TierGateError::from(RecoveryError::ThresholdNotMet {
            approved: 1,
            required: 2,
        });
        assert!(matches!(err, TierGateError::AuthorizationDenied(_)));

        let err = TierGateError::from(RecoveryError::SessionExpired);
        assert!(matches!(err, TierGateError::SessionExpired));
    }

    #[test]
    fn test_unreachable_key_servers_stay_retryable() {
        let err = TierGateError::from(RecoveryError::Transport("0 of 2 approved".into()));
        assert!(matches!(err, TierGateError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_ledger_abort_keeps_code() {
        let err = TierGateError::from(StoreError::Aborted {
            code: 1,
            reason: "tier".into(),
        });
        assert!(matches!(err, TierGateError::LedgerRejected { code: 1, .. }));
    }
}
