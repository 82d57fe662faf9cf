//! Access-Verification Transaction Builder.
//!
//! Builds the unsigned `tier_gate::seal_approve` transaction a key server
//! simulates to decide whether to release keys. It is never signed or
//! executed; only its kind bytes leave the client.

use tiergate_core::{
    Address, CallArg, EncryptionIdentity, MoveCall, ObjectId, ScopeId, TransactionData,
    TransactionKind, DEFAULT_GAS_BUDGET, GATE_MODULE, SEAL_APPROVE,
};

use crate::error::{Result, SealError};

/// An unsigned verification transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTx {
    data: TransactionData,
}

impl VerificationTx {
    /// The full unsigned transaction.
    pub fn data(&self) -> &TransactionData {
        &self.data
    }

    /// Serialized call list, as sent to key servers.
    pub fn kind_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.data.kind.to_bytes()?)
    }

    /// Identities this transaction asks to approve.
    pub fn ids(&self) -> Vec<EncryptionIdentity> {
        self.data
            .kind
            .calls
            .iter()
            .filter_map(|call| call.arguments.first()?.as_pure())
            .filter_map(|bytes| EncryptionIdentity::from_bytes(bytes).ok())
            .collect()
    }
}

fn approve_call(
    scope: ScopeId,
    id: &EncryptionIdentity,
    policy: ObjectId,
    credential: ObjectId,
    clock_ref: ObjectId,
) -> MoveCall {
    MoveCall {
        package: scope,
        module: GATE_MODULE.to_string(),
        function: SEAL_APPROVE.to_string(),
        arguments: vec![
            CallArg::Pure(id.as_bytes().to_vec()),
            CallArg::Object(policy),
            CallArg::Object(credential),
            CallArg::Object(clock_ref),
        ],
    }
}

/// Build a verification transaction for one identity.
pub fn build_verification_tx(
    sender: Address,
    scope: ScopeId,
    id: &EncryptionIdentity,
    policy: ObjectId,
    credential: ObjectId,
    clock_ref: ObjectId,
) -> Result<VerificationTx> {
    build_batch_verification_tx(sender, scope, std::slice::from_ref(id), policy, credential, clock_ref)
}

/// Build one transaction approving several identities under the same
/// policy and credential.
pub fn build_batch_verification_tx(
    sender: Address,
    scope: ScopeId,
    ids: &[EncryptionIdentity],
    policy: ObjectId,
    credential: ObjectId,
    clock_ref: ObjectId,
) -> Result<VerificationTx> {
    if ids.is_empty() {
        return Err(SealError::InvalidVerification("no identities".into()));
    }
    if let Some(unbound) = ids.iter().find(|id| !id.is_bound_to(&policy)) {
        return Err(SealError::InvalidVerification(format!(
            "identity {} is not bound to policy {}",
            unbound, policy
        )));
    }

    let calls = ids
        .iter()
        .map(|id| approve_call(scope, id, policy, credential, clock_ref))
        .collect();

    Ok(VerificationTx {
        data: TransactionData {
            sender,
            kind: TransactionKind { calls },
            gas_budget: DEFAULT_GAS_BUDGET,
        },
    })
}
