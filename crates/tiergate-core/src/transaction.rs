//! Ledger transaction kinds.
//!
//! Only the verification path builds these. A transaction here is never
//! signed or executed: its kind is serialized and handed to key servers,
//! which simulate it against current ledger state.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{Address, ObjectId, ScopeId};

/// Module that hosts the access predicates.
pub const GATE_MODULE: &str = "tier_gate";

/// Predicate key servers accept as proof of access.
pub const SEAL_APPROVE: &str = "seal_approve";

/// Default gas budget attached to verification transactions.
pub const DEFAULT_GAS_BUDGET: u64 = 10_000_000;

/// An argument to a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallArg {
    /// Raw bytes passed by value.
    Pure(Vec<u8>),
    /// A reference to an existing ledger object.
    Object(ObjectId),
}

impl CallArg {
    /// The pure bytes, if this is a pure argument.
    pub fn as_pure(&self) -> Option<&[u8]> {
        match self {
            CallArg::Pure(bytes) => Some(bytes),
            CallArg::Object(_) => None,
        }
    }

    /// The object id, if this is an object argument.
    pub fn as_object(&self) -> Option<&ObjectId> {
        match self {
            CallArg::Object(id) => Some(id),
            CallArg::Pure(_) => None,
        }
    }
}

/// A single call into a package function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCall {
    pub package: ScopeId,
    pub module: String,
    pub function: String,
    pub arguments: Vec<CallArg>,
}

impl MoveCall {
    /// Whether this is a `seal_approve` call into `package`.
    pub fn is_seal_approve(&self, package: &ScopeId) -> bool {
        &self.package == package && self.module == GATE_MODULE && self.function == SEAL_APPROVE
    }
}

/// The call list of a transaction, without sender or gas.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionKind {
    pub calls: Vec<MoveCall>,
}

impl TransactionKind {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// An unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    pub sender: Address,
    pub kind: TransactionKind,
    pub gas_budget: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        let scope = ScopeId::from_bytes([5; 32]);
        let kind = TransactionKind {
            calls: vec![MoveCall {
                package: scope,
                module: GATE_MODULE.into(),
                function: SEAL_APPROVE.into(),
                arguments: vec![CallArg::Pure(vec![1, 2, 3]), CallArg::Object(ObjectId::CLOCK)],
            }],
        };

        let bytes = kind.to_bytes().unwrap();
        let recovered = TransactionKind::from_bytes(&bytes).unwrap();

        assert_eq!(kind, recovered);
        assert!(recovered.calls[0].is_seal_approve(&scope));
        assert!(!recovered.calls[0].is_seal_approve(&ScopeId::ZERO));
    }

    #[test]
    fn test_garbage_kind_is_rejected() {
        assert!(TransactionKind::from_bytes(&[0xff, 0x00, 0x13]).is_err());
    }
}
