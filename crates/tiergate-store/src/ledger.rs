//! Ledger trait: the abstract interface to the chain holding policies,
//! posts and credentials.
//!
//! The ledger offers only eventual read-after-write visibility. An object
//! returned in [`TxEffects`] may not be readable, referenceable or visible
//! to simulation for some time after the call returns, so callers must
//! settle before using it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tiergate_core::{
    AccessPolicy, Address, Blake3Hash, BlobId, ContentKind, ContentPost, ContentReference,
    EncryptionMetadata, ObjectId, SubscriptionCredential,
};

use crate::error::Result;

/// Stable abort codes returned by the gate package.
pub mod abort_codes {
    /// Tier outside `0..=Tier::MAX`.
    pub const E_INVALID_TIER: u64 = 1;
    /// Sender does not own or control the object.
    pub const E_NOT_OWNER: u64 = 2;
    /// Referenced object does not exist or is not yet visible.
    pub const E_OBJECT_NOT_FOUND: u64 = 3;
    /// The access predicate failed.
    pub const E_NO_ACCESS: u64 = 4;
    /// Malformed or unknown call.
    pub const E_INVALID_CALL: u64 = 5;
    /// Argument outside its allowed range.
    pub const E_INVALID_ARGUMENT: u64 = 6;
}

/// An object-creating or mutating ledger call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    /// Create a shared access policy.
    CreatePolicy {
        content_reference: ContentReference,
        required_tier: u8,
    },
    /// Create a content post.
    CreatePost {
        title: String,
        description: String,
        kind: ContentKind,
        blob: BlobId,
        required_tier: u8,
        encryption: Option<EncryptionMetadata>,
    },
    /// Attach a policy to a post. Re-issuing it is harmless.
    LinkPolicy { post: ObjectId, policy: ObjectId },
    /// Buy a membership with a creator, owned by the sender.
    PurchaseCredential {
        creator: Address,
        tier: u8,
        duration_ms: i64,
    },
    /// Revoke a credential (creator only).
    RevokeCredential { credential: ObjectId },
}

impl LedgerCall {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCall::CreatePolicy { .. } => "create_policy",
            LedgerCall::CreatePost { .. } => "create_post",
            LedgerCall::LinkPolicy { .. } => "link_policy",
            LedgerCall::PurchaseCredential { .. } => "purchase_credential",
            LedgerCall::RevokeCredential { .. } => "revoke_credential",
        }
    }
}

/// Type tag of a ledger object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    AccessPolicy,
    ContentPost,
    SubscriptionCredential,
}

/// Who may use an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Owner {
    /// Anyone may reference it.
    Shared,
    /// Owned by a single address.
    Address(Address),
}

/// An object created by a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub owner: Owner,
}

/// The effects of an executed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEffects {
    pub digest: Blake3Hash,
    pub created: Vec<CreatedObject>,
    pub mutated: Vec<ObjectId>,
}

impl TxEffects {
    /// Find the created object of `kind` owned by `owner`.
    pub fn find_created(&self, kind: ObjectKind, owner: Owner) -> Option<ObjectId> {
        self.created
            .iter()
            .find(|obj| obj.kind == kind && obj.owner == owner)
            .map(|obj| obj.id)
    }
}

/// A typed ledger object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerObject {
    Policy(AccessPolicy),
    Post(ContentPost),
    Credential(SubscriptionCredential),
}

impl LedgerObject {
    /// The object's type tag.
    pub fn kind(&self) -> ObjectKind {
        match self {
            LedgerObject::Policy(_) => ObjectKind::AccessPolicy,
            LedgerObject::Post(_) => ObjectKind::ContentPost,
            LedgerObject::Credential(_) => ObjectKind::SubscriptionCredential,
        }
    }

    pub fn into_policy(self) -> Option<AccessPolicy> {
        match self {
            LedgerObject::Policy(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_post(self) -> Option<ContentPost> {
        match self {
            LedgerObject::Post(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_credential(self) -> Option<SubscriptionCredential> {
        match self {
            LedgerObject::Credential(c) => Some(c),
            _ => None,
        }
    }
}

/// Outcome of simulating a transaction without executing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationOutcome {
    /// Every call returned normally.
    Success,
    /// A call aborted.
    Abort { code: u64, reason: String },
}

impl SimulationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SimulationOutcome::Success)
    }
}

/// The Ledger trait: async interface to ledger state.
///
/// # Design Notes
///
/// - **Ledger-assigned ids**: object ids only come back in [`TxEffects`].
/// - **Eventual visibility**: reads and simulation may lag behind writes.
/// - **Ledger clock**: `now_ms` is the authoritative time for expiry.
/// - **No transactions across calls**: every call commits independently.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Execute a call on behalf of `sender`.
    ///
    /// Rejections surface as [`crate::StoreError::Aborted`].
    async fn execute(&self, sender: &Address, call: LedgerCall) -> Result<TxEffects>;

    /// Read an object, if it exists and is visible.
    async fn get_object(&self, id: &ObjectId) -> Result<Option<LedgerObject>>;

    /// List visible objects owned by an address.
    async fn owned_objects(&self, owner: &Address) -> Result<Vec<ObjectId>>;

    /// Simulate a serialized transaction kind as `sender`.
    async fn simulate(&self, sender: &Address, tx_kind: &[u8]) -> Result<SimulationOutcome>;

    /// Current ledger clock (Unix ms).
    async fn now_ms(&self) -> Result<i64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Typed reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Read a policy.
    async fn get_policy(&self, id: &ObjectId) -> Result<Option<AccessPolicy>> {
        Ok(self.get_object(id).await?.and_then(LedgerObject::into_policy))
    }

    /// Read a post.
    async fn get_post(&self, id: &ObjectId) -> Result<Option<ContentPost>> {
        Ok(self.get_object(id).await?.and_then(LedgerObject::into_post))
    }

    /// Read a credential.
    async fn get_credential(&self, id: &ObjectId) -> Result<Option<SubscriptionCredential>> {
        Ok(self
            .get_object(id)
            .await?
            .and_then(LedgerObject::into_credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_created_filters_by_kind_and_owner() {
        let me = Address::from_bytes([1; 32]);
        let effects = TxEffects {
            digest: Blake3Hash::hash(b"tx"),
            created: vec![
                CreatedObject {
                    id: ObjectId::from_bytes([9; 32]),
                    kind: ObjectKind::SubscriptionCredential,
                    owner: Owner::Address(me),
                },
                CreatedObject {
                    id: ObjectId::from_bytes([8; 32]),
                    kind: ObjectKind::AccessPolicy,
                    owner: Owner::Shared,
                },
            ],
            mutated: vec![],
        };

        assert_eq!(
            effects.find_created(ObjectKind::AccessPolicy, Owner::Shared),
            Some(ObjectId::from_bytes([8; 32]))
        );
        assert_eq!(
            effects.find_created(ObjectKind::AccessPolicy, Owner::Address(me)),
            None
        );
    }
}
