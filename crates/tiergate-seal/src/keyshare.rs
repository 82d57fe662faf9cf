//! Server keys wrapped to a session.
//!
//! A key server never returns a released key in the clear: it wraps it to
//! the session's X25519 response key, so only the holder of that session
//! can use the response.

use serde::{Deserialize, Serialize};

use tiergate_core::{EncryptionIdentity, ObjectId};

use crate::crypto::{AeadKey, EncryptionNonce, EphemeralKeyPair, X25519PublicKey, X25519StaticSecret};
use crate::error::{Result, SealError};

/// A released key, encrypted to the requesting session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    /// The server that released the key.
    pub server: ObjectId,

    /// The identity the key is bound to.
    pub id: EncryptionIdentity,

    /// Ephemeral X25519 public key (server's side of ECDH).
    pub ephemeral_public: X25519PublicKey,

    /// The released key, encrypted with the derived wrap key.
    pub encrypted_key: Vec<u8>,

    /// Nonce used for encryption.
    pub nonce: EncryptionNonce,
}

fn context(server: &ObjectId, id: &EncryptionIdentity) -> Vec<u8> {
    let mut ctx = Vec::with_capacity(32 + id.len());
    ctx.extend_from_slice(server.as_bytes());
    ctx.extend_from_slice(id.as_bytes());
    ctx
}

impl KeyShare {
    /// Wrap `key` for the session whose response key is `recipient_public`.
    pub fn create(
        server: ObjectId,
        id: EncryptionIdentity,
        key: &AeadKey,
        recipient_public: &X25519PublicKey,
    ) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let ctx = context(&server, &id);
        let wrap_key = ephemeral
            .diffie_hellman(recipient_public)
            .derive_key("tiergate-seal-v0-keyshare", &ctx);

        let nonce = EncryptionNonce::generate();
        let encrypted_key = wrap_key.encrypt(key.as_bytes(), &ctx, &nonce)?;

        Ok(Self {
            server,
            id,
            ephemeral_public,
            encrypted_key,
            nonce,
        })
    }

    /// Unwrap the key with the session's response secret.
    pub fn decrypt(&self, recipient_secret: &X25519StaticSecret) -> Result<AeadKey> {
        let ctx = context(&self.server, &self.id);
        let wrap_key = recipient_secret
            .diffie_hellman(&self.ephemeral_public)
            .derive_key("tiergate-seal-v0-keyshare", &ctx);

        let key_bytes = wrap_key.decrypt(&self.encrypted_key, &ctx, &self.nonce)?;
        let arr: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            SealError::Decryption(format!(
                "invalid key length: expected 32, got {}",
                key_bytes.len()
            ))
        })?;
        Ok(AeadKey::from_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> EncryptionIdentity {
        EncryptionIdentity::derive(&ObjectId::from_bytes([0x42; 32]))
    }

    #[test]
    fn test_keyshare_unwraps_for_session() {
        let session = X25519StaticSecret::generate();
        let key = AeadKey::generate();

        let share =
            KeyShare::create(ObjectId::from_bytes([1; 32]), id(), &key, &session.public_key())
                .unwrap();

        assert_eq!(share.decrypt(&session).unwrap(), key);
    }

    #[test]
    fn test_keyshare_wrong_session_fails() {
        let session = X25519StaticSecret::generate();
        let other = X25519StaticSecret::generate();

        let share = KeyShare::create(
            ObjectId::from_bytes([1; 32]),
            id(),
            &AeadKey::generate(),
            &session.public_key(),
        )
        .unwrap();

        assert!(share.decrypt(&other).is_err());
    }

    #[test]
    fn test_relabelled_keyshare_fails() {
        let session = X25519StaticSecret::generate();
        let mut share = KeyShare::create(
            ObjectId::from_bytes([1; 32]),
            id(),
            &AeadKey::generate(),
            &session.public_key(),
        )
        .unwrap();

        // A share cannot be passed off as another server's.
        share.server = ObjectId::from_bytes([2; 32]);
        assert!(share.decrypt(&session).is_err());
    }
}
