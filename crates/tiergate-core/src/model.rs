//! Ledger-owned records.
//!
//! These are the typed views of objects the ledger holds. The client never
//! mutates them directly; every change is a ledger call.

use serde::{Deserialize, Serialize};

use crate::identity::EncryptionMetadata;
use crate::tier::Tier;
use crate::types::{Address, BlobId, ObjectId};

/// What a policy points at.
///
/// Policies are created before the content they gate exists, so they start
/// with a placeholder that a later link call overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentReference {
    /// Set at creation time, before the post exists.
    Placeholder,
    /// The post this policy gates.
    Post(ObjectId),
}

/// A shared access policy binding content to a minimum tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Assigned by the ledger. Every identity encrypted under this policy
    /// starts with these bytes.
    pub id: ObjectId,
    pub creator: Address,
    pub content_reference: ContentReference,
    pub required_tier: Tier,
    /// Ledger clock at creation (Unix ms).
    pub created_at: i64,
}

/// The kind of media a post carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Text,
    Image,
    Video,
    Audio,
    File,
}

/// A published content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPost {
    pub id: ObjectId,
    pub creator: Address,
    pub title: String,
    pub description: String,
    pub kind: ContentKind,
    /// Where the (possibly encrypted) payload lives.
    pub blob: BlobId,
    pub required_tier: Tier,
    /// Present for gated content; required to decrypt.
    pub encryption: Option<EncryptionMetadata>,
    /// Set by a second, independent ledger write after the post exists.
    pub policy: Option<ObjectId>,
}

impl ContentPost {
    /// Whether the payload is encrypted.
    pub fn is_gated(&self) -> bool {
        self.encryption.is_some()
    }

    /// Whether a gated post can currently be decrypted via verification.
    pub fn is_linked(&self) -> bool {
        self.policy.is_some()
    }
}

/// A membership credential held by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCredential {
    pub id: ObjectId,
    /// The creator this membership is with.
    pub creator: Address,
    /// The holder.
    pub subscriber: Address,
    pub tier: Tier,
    /// Ledger clock deadline (Unix ms, exclusive).
    pub expires_at: i64,
    pub revoked: bool,
}
