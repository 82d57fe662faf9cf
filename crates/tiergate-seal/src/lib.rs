//! # tiergate seal
//!
//! Client-side threshold-encryption primitives.
//!
//! ## Encryption Model
//!
//! Content is encrypted once under a random data key. The data key is
//! Shamir-split across the configured key servers, and each share is
//! encrypted so that only its server can unwrap it. A server releases
//! its unwrapping key for an identity only after simulating a
//! `seal_approve` call on the ledger, wrapping it to the requesting
//! session. Any `threshold` released keys reconstruct the data key.
//!
//! ## Key Types
//!
//! - [`EncryptedObject`] - self-describing ciphertext that embeds its identity
//! - [`SessionKey`] / [`SessionCertificate`] - the Session Authorizer
//! - [`KeyShare`] - a released key wrapped to a session
//! - [`build_verification_tx`] - the Access-Verification Transaction Builder
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tiergate_core::{EncryptionIdentity, ObjectId, ScopeId};
//! use tiergate_seal::{EncryptedObject, KeyServerRef, X25519StaticSecret};
//!
//! let server = X25519StaticSecret::generate();
//! let servers = [KeyServerRef {
//!     object_id: ObjectId::from_bytes([1; 32]),
//!     public_key: server.public_key(),
//! }];
//! let id = EncryptionIdentity::derive(&ObjectId::from_bytes([9; 32]));
//! let (object, metadata) =
//!     EncryptedObject::seal(b"hello", &id, &ScopeId::ZERO, 1, &servers).unwrap();
//! ```

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod keyshare;
pub mod session;
pub mod shamir;
pub mod verification;

pub use crypto::{
    AeadKey, EncryptionNonce, EphemeralKeyPair, SharedKey, X25519PublicKey, X25519StaticSecret,
};
pub use envelope::{EncryptedObject, KeyServerRef, WrappedShare, FORMAT_VERSION};
pub use error::{Result, SealError};
pub use keyshare::KeyShare;
pub use session::{SessionCertificate, SessionKey, MAX_SESSION_TTL_MINUTES};
pub use verification::{build_batch_verification_tx, build_verification_tx, VerificationTx};
