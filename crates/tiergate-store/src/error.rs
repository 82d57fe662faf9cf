//! Store errors.

use thiserror::Error;

/// Failures from the ledger, the blob store and the reference cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache database: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No such object, blob or cached reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// The ledger executed the call and aborted. `code` is one of
    /// [`crate::abort_codes`]. Resubmitting the same call aborts again.
    #[error("ledger aborted with code {code}: {reason}")]
    Aborted { code: u64, reason: String },

    /// The ledger or blob store could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A stored value is not what its column or key says it is.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("cache migration: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Only transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(StoreError::Unavailable("rpc".into()).is_retryable());
        assert!(!StoreError::NotFound("blob".into()).is_retryable());
        assert!(!StoreError::Aborted {
            code: crate::abort_codes::E_NO_ACCESS,
            reason: "denied".into()
        }
        .is_retryable());
    }
}
