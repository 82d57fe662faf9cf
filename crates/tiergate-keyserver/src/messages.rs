//! Key-release protocol message types.
//!
//! A client sends one [`FetchKeyRequest`] per key server. The request
//! carries the session certificate, an optional verification transaction
//! and the identities (with their ciphertext encapsulation keys) it wants
//! keys for. The whole body is signed with the session key.

use serde::{Deserialize, Serialize};

use tiergate_core::{Ed25519Signature, EncryptionIdentity, ObjectId, ScopeId};
use tiergate_seal::{KeyServerRef, KeyShare, SessionCertificate, SessionKey, X25519PublicKey};

use crate::error::{KeyServerError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message size limits.
pub mod limits {
    /// Max identities in one request.
    pub const MAX_IDS_PER_REQUEST: usize = 32;
    /// Max serialized verification transaction size.
    pub const MAX_VERIFICATION_BYTES: usize = 64 * 1024;
}

/// Public description of a key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// The server's ledger registration object.
    pub object_id: ObjectId,
    /// Human-readable name for logs.
    pub name: String,
    /// Key encryptors derive share keys against.
    pub public_key: X25519PublicKey,
    /// The only scope this server releases keys for.
    pub scope: ScopeId,
}

impl ServerInfo {
    /// The view an encryptor needs.
    pub fn key_server_ref(&self) -> KeyServerRef {
        KeyServerRef {
            object_id: self.object_id,
            public_key: self.public_key,
        }
    }
}

/// One identity to release a key for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRequest {
    pub id: EncryptionIdentity,
    /// Encapsulation key of the ciphertext sealed under `id`.
    pub encapsulation: X25519PublicKey,
}

/// A signed key-release request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchKeyRequest {
    pub version: u8,
    pub certificate: SessionCertificate,
    /// Session-key signature over [`FetchKeyRequest::signing_message`].
    pub request_signature: Ed25519Signature,
    /// Serialized `seal_approve` transaction kind. Absent in open mode.
    pub verification: Option<Vec<u8>>,
    pub ids: Vec<KeyRequest>,
}

impl FetchKeyRequest {
    /// Build and sign a request with a signed session.
    pub fn new(
        session: &SessionKey,
        verification: Option<Vec<u8>>,
        ids: Vec<KeyRequest>,
    ) -> Result<Self> {
        let certificate = session.certificate()?;
        let message =
            Self::signing_message(verification.as_deref(), &certificate.response_key(), &ids);
        Ok(Self {
            version: PROTOCOL_VERSION,
            certificate,
            request_signature: session.sign_request(&message),
            verification,
            ids,
        })
    }

    /// The bytes the session key signs.
    pub fn signing_message(
        verification: Option<&[u8]>,
        response_key: &X25519PublicKey,
        ids: &[KeyRequest],
    ) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new_derive_key("tiergate-keyserver-v0-request");
        hasher.update(response_key.as_bytes());
        match verification {
            Some(bytes) => {
                hasher.update(&[1]);
                hasher.update(&(bytes.len() as u64).to_le_bytes());
                hasher.update(bytes);
            }
            None => {
                hasher.update(&[0]);
            }
        }
        hasher.update(&(ids.len() as u64).to_le_bytes());
        for item in ids {
            hasher.update(item.id.as_bytes());
            hasher.update(item.encapsulation.as_bytes());
        }
        hasher.finalize().as_bytes().to_vec()
    }

    /// Check this request respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        if self.ids.is_empty() {
            return Err("no ids requested");
        }
        if self.ids.len() > limits::MAX_IDS_PER_REQUEST {
            return Err("too many ids");
        }
        if self
            .verification
            .as_ref()
            .is_some_and(|v| v.len() > limits::MAX_VERIFICATION_BYTES)
        {
            return Err("verification transaction too large");
        }
        Ok(())
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| KeyServerError::InvalidRequest(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| KeyServerError::InvalidRequest(e.to_string()))
    }
}

/// Keys released by one server, each wrapped to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchKeyResponse {
    pub server: ObjectId,
    pub keys: Vec<KeyShare>,
}
