//! Encryption identities.
//!
//! An identity is the policy's raw object id followed by a fresh 5-byte
//! random nonce. The policy prefix is what the `seal_approve` predicate
//! checks; the nonce makes every encryption under the same policy an
//! independent ciphertext. With a 40-bit nonce, collisions stay negligible
//! only while a single policy sees far fewer than 2^20 encryptions.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::types::{ObjectId, ScopeId};

/// Number of random bytes appended to the policy id.
pub const NONCE_LEN: usize = 5;

/// Total identity length in bytes.
pub const IDENTITY_LEN: usize = 32 + NONCE_LEN;

/// A policy-bound encryption identity, hex-encoded on the wire.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EncryptionIdentity(Vec<u8>);

impl EncryptionIdentity {
    /// Derive a fresh identity for a policy.
    pub fn derive(policy_id: &ObjectId) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self::derive_with_nonce(policy_id, nonce)
    }

    /// Build an identity from a policy id and an explicit nonce.
    pub fn derive_with_nonce(policy_id: &ObjectId, nonce: [u8; NONCE_LEN]) -> Self {
        let mut bytes = Vec::with_capacity(IDENTITY_LEN);
        bytes.extend_from_slice(policy_id.as_bytes());
        bytes.extend_from_slice(&nonce);
        Self(bytes)
    }

    /// Parse raw identity bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != IDENTITY_LEN {
            return Err(CoreError::InvalidIdentity(format!(
                "expected {} bytes, got {}",
                IDENTITY_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Parse a hex-encoded identity.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        Self::from_bytes(&bytes)
    }

    /// Hex encoding used for transport.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes (always [`IDENTITY_LEN`]).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Identities are never empty; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The policy this identity was derived from.
    pub fn policy_prefix(&self) -> ObjectId {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&self.0[..32]);
        ObjectId::from_bytes(arr)
    }

    /// The random nonce suffix.
    pub fn nonce(&self) -> &[u8] {
        &self.0[32..]
    }

    /// Whether this identity is anchored to the given policy.
    pub fn is_bound_to(&self, policy_id: &ObjectId) -> bool {
        self.0.starts_with(policy_id.as_bytes())
    }
}

impl From<EncryptionIdentity> for String {
    fn from(id: EncryptionIdentity) -> String {
        id.to_hex()
    }
}

impl TryFrom<String> for EncryptionIdentity {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl fmt::Debug for EncryptionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionIdentity({})", self.to_hex())
    }
}

impl fmt::Display for EncryptionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}..{}", &hex[..8], &hex[hex.len() - 10..])
    }
}

/// Out-of-band metadata that must travel with every ciphertext.
///
/// The identity is also embedded in the ciphertext, but the scope and
/// threshold are not: losing this record makes the ciphertext permanently
/// unrecoverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// The identity the content was encrypted under.
    pub id: EncryptionIdentity,
    /// Namespace of the approving package.
    pub scope: ScopeId,
    /// Minimum number of key servers whose keys are required.
    pub threshold: u8,
}
