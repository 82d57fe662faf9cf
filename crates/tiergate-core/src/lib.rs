//! # tiergate core
//!
//! Pure primitives for tiered, threshold-encrypted content access.
//!
//! This crate contains no I/O, no storage, no networking. It defines the
//! records the ledger holds, the Tier Gate, and the Identity Deriver.
//!
//! ## Key Types
//!
//! - [`Tier`] and [`is_authorized`] - the Tier Gate
//! - [`EncryptionIdentity`] - policy id followed by a random nonce
//! - [`EncryptionMetadata`] - out-of-band record every ciphertext needs
//! - [`AccessPolicy`], [`ContentPost`], [`SubscriptionCredential`] - ledger records
//! - [`TransactionKind`] - call lists simulated by key servers
//! - [`Clock`] - wall clock and ledger clock abstraction

pub mod clock;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod model;
pub mod tier;
pub mod transaction;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, Result};
pub use identity::{EncryptionIdentity, EncryptionMetadata, IDENTITY_LEN, NONCE_LEN};
pub use model::{AccessPolicy, ContentKind, ContentPost, ContentReference, SubscriptionCredential};
pub use tier::{can_post_comment, effective_minimum, is_authorized, Tier};
pub use transaction::{
    CallArg, MoveCall, TransactionData, TransactionKind, DEFAULT_GAS_BUDGET, GATE_MODULE,
    SEAL_APPROVE,
};
pub use types::{Address, BlobId, ObjectId, ScopeId};
