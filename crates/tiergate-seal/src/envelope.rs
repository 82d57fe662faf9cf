//! Threshold-encrypted object envelope.
//!
//! An [`EncryptedObject`] is self-describing: it embeds the identity it was
//! sealed under, the encapsulation key and one wrapped share per key
//! server, so the identity can be re-extracted without the metadata. The
//! scope and the threshold are deliberately *not* embedded; they travel in
//! the out-of-band [`EncryptionMetadata`].
//!
//! Layout of the secrets:
//!
//! 1. A random scalar is the data key; the payload is ChaCha20-Poly1305
//!    encrypted under it with the identity as associated data.
//! 2. The scalar is Shamir-split into one share per server.
//! 3. Share `i` is encrypted under a key derived from
//!    X25519(encapsulation, server_i) bound to `(scope, id, server_i)`.
//!    Only server `i` can recompute that key, and it only releases it
//!    after the access predicate approves `id`.

use std::collections::{HashMap, HashSet};

use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use tiergate_core::{EncryptionIdentity, EncryptionMetadata, ObjectId, ScopeId};

use crate::crypto::{AeadKey, EncryptionNonce, X25519PublicKey, X25519StaticSecret};
use crate::error::{Result, SealError};
use crate::shamir::{interpolate_at_zero, share_x, SharePoint, ShamirPolynomial};

/// Envelope format version.
pub const FORMAT_VERSION: u8 = 1;

/// A key server as seen by an encryptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyServerRef {
    /// The server's ledger registration object.
    pub object_id: ObjectId,
    /// The server's X25519 public key.
    pub public_key: X25519PublicKey,
}

/// One server's share of the data key, encrypted to that server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedShare {
    pub server: ObjectId,
    pub index: u8,
    pub nonce: EncryptionNonce,
    pub ciphertext: Vec<u8>,
}

/// A threshold-encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedObject {
    version: u8,
    id: EncryptionIdentity,
    encapsulation: X25519PublicKey,
    shares: Vec<WrappedShare>,
    nonce: EncryptionNonce,
    ciphertext: Vec<u8>,
}

fn share_aad(id: &EncryptionIdentity, index: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(id.len() + 1);
    aad.extend_from_slice(id.as_bytes());
    aad.push(index);
    aad
}

impl EncryptedObject {
    /// Encrypt `plaintext` under `id` for `servers`, any `threshold` of
    /// which must later release their keys.
    pub fn seal(
        plaintext: &[u8],
        id: &EncryptionIdentity,
        scope: &ScopeId,
        threshold: u8,
        servers: &[KeyServerRef],
    ) -> Result<(Self, EncryptionMetadata)> {
        let t = usize::from(threshold);
        if t == 0 || t > servers.len() || servers.len() > usize::from(u8::MAX) {
            return Err(SealError::InvalidThreshold {
                threshold: t,
                servers: servers.len(),
            });
        }
        let mut seen = HashSet::new();
        if !servers.iter().all(|s| seen.insert(s.object_id)) {
            return Err(SealError::Encryption("duplicate key server".into()));
        }

        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let secret = Scalar::from_bytes_mod_order(seed);
        let data_key = AeadKey::from_bytes(secret.to_bytes());

        let nonce = EncryptionNonce::generate();
        let ciphertext = data_key.encrypt(plaintext, id.as_bytes(), &nonce)?;

        let polynomial = ShamirPolynomial::from_secret(secret, t, &mut OsRng)?;
        let encapsulation = X25519StaticSecret::generate();

        let mut shares = Vec::with_capacity(servers.len());
        for (index, server) in (0u8..).zip(servers) {
            let point = polynomial.share(index);
            let wrap_key = encapsulation
                .diffie_hellman(&server.public_key)
                .derive_share_key(scope, id, &server.object_id);
            let share_nonce = EncryptionNonce::generate();
            let ciphertext =
                wrap_key.encrypt(point.y.as_bytes(), &share_aad(id, index), &share_nonce)?;
            shares.push(WrappedShare {
                server: server.object_id,
                index,
                nonce: share_nonce,
                ciphertext,
            });
        }

        let object = Self {
            version: FORMAT_VERSION,
            id: id.clone(),
            encapsulation: encapsulation.public_key(),
            shares,
            nonce,
            ciphertext,
        };
        let metadata = EncryptionMetadata {
            id: id.clone(),
            scope: *scope,
            threshold,
        };
        Ok((object, metadata))
    }

    /// The embedded identity.
    pub fn id(&self) -> &EncryptionIdentity {
        &self.id
    }

    /// The public half of the encapsulation key.
    pub fn encapsulation(&self) -> &X25519PublicKey {
        &self.encapsulation
    }

    /// Wrapped shares, one per server.
    pub fn shares(&self) -> &[WrappedShare] {
        &self.shares
    }

    /// Servers holding a share, in share order.
    pub fn servers(&self) -> impl Iterator<Item = &ObjectId> {
        self.shares.iter().map(|s| &s.server)
    }

    /// Check the out-of-band metadata against the embedded fields.
    pub fn check_metadata(&self, metadata: &EncryptionMetadata) -> Result<()> {
        if metadata.id != self.id {
            return Err(SealError::MetadataCorruption(format!(
                "metadata id {} does not match embedded id {}",
                metadata.id, self.id
            )));
        }
        let t = usize::from(metadata.threshold);
        if t == 0 || t > self.shares.len() {
            return Err(SealError::MetadataCorruption(format!(
                "threshold {} invalid for {} shares",
                t,
                self.shares.len()
            )));
        }
        Ok(())
    }

    /// Reconstruct the data key from released server keys and decrypt.
    ///
    /// `released` maps server object ids to the share keys they released.
    /// Fewer than `metadata.threshold` keys fails with
    /// [`SealError::NotEnoughShares`]; any wrong key fails authentication.
    pub fn open(
        &self,
        metadata: &EncryptionMetadata,
        released: &HashMap<ObjectId, AeadKey>,
    ) -> Result<Vec<u8>> {
        self.check_metadata(metadata)?;
        let need = usize::from(metadata.threshold);

        let available: Vec<(&WrappedShare, &AeadKey)> = self
            .shares
            .iter()
            .filter_map(|share| released.get(&share.server).map(|key| (share, key)))
            .take(need)
            .collect();
        if available.len() < need {
            return Err(SealError::NotEnoughShares {
                have: available.len(),
                need,
            });
        }

        let mut points = Vec::with_capacity(need);
        for (share, key) in available {
            let bytes = key.decrypt(
                &share.ciphertext,
                &share_aad(&self.id, share.index),
                &share.nonce,
            )?;
            let y: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                SealError::MetadataCorruption(format!("share has {} bytes", bytes.len()))
            })?;
            points.push(SharePoint {
                x: share_x(share.index),
                y: Scalar::from_bytes_mod_order(y),
            });
        }

        let secret = interpolate_at_zero(&points)?;
        AeadKey::from_bytes(secret.to_bytes()).decrypt(&self.ciphertext, self.id.as_bytes(), &self.nonce)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| SealError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Parse CBOR bytes. Anything unparsable is metadata corruption.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let object: Self = ciborium::from_reader(bytes)
            .map_err(|e| SealError::MetadataCorruption(format!("unparsable ciphertext: {}", e)))?;

        if object.version != FORMAT_VERSION {
            return Err(SealError::MetadataCorruption(format!(
                "unsupported format version {}",
                object.version
            )));
        }
        if object.shares.is_empty() {
            return Err(SealError::MetadataCorruption("no shares".into()));
        }
        let mut servers = HashSet::new();
        let mut indices = HashSet::new();
        for share in &object.shares {
            if !servers.insert(share.server) || !indices.insert(share.index) {
                return Err(SealError::MetadataCorruption("duplicate share".into()));
            }
        }
        Ok(object)
    }
}
