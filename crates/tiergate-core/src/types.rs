//! Strong type definitions for tiergate.
//!
//! All identifiers are 32-byte newtypes to prevent misuse at compile time:
//! an object reference can never be passed where a scope or blob id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Ed25519PublicKey;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s.trim_start_matches("0x"))?;
                if bytes.len() != 32 {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }

            /// The all-zero value (sentinel).
            pub const ZERO: Self = Self([0u8; 32]);
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $label, &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 32] = slice.try_into()?;
                Ok(Self(arr))
            }
        }
    };
}

id_newtype!(
    /// An opaque ledger object reference.
    ///
    /// Always assigned by the ledger when the object is created, never
    /// chosen by the client.
    ObjectId,
    "ObjectId"
);

id_newtype!(
    /// The encryption-scheme namespace: the package that owns the
    /// `seal_approve` predicate. Key servers only release keys for
    /// identities approved by calls into this package.
    ScopeId,
    "ScopeId"
);

id_newtype!(
    /// Content address of a payload in the blob store (Blake3 of the bytes).
    BlobId,
    "BlobId"
);

id_newtype!(
    /// A ledger account address, derived from an Ed25519 public key.
    Address,
    "Address"
);

impl ObjectId {
    /// The well-known shared clock object.
    pub const CLOCK: Self = {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x06;
        Self(bytes)
    };

    /// Derive the id of the `index`-th object created by a transaction.
    pub fn derive(tx_digest: &[u8; 32], index: u32) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("tiergate-object-v0");
        hasher.update(tx_digest);
        hasher.update(&index.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

impl BlobId {
    /// Compute the content address of a payload.
    pub fn for_content(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }
}

impl Address {
    /// Derive the address controlled by an Ed25519 public key.
    pub fn from_public_key(public_key: &Ed25519PublicKey) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("tiergate-address-v0");
        hasher.update(public_key.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let id = ObjectId::from_bytes([0x42; 32]);
        let recovered = ObjectId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_hex_accepts_0x_prefix() {
        let id = ScopeId::from_bytes([0x0a; 32]);
        let prefixed = format!("0x{}", id.to_hex());
        assert_eq!(ScopeId::from_hex(&prefixed).unwrap(), id);
    }

    #[test]
    fn test_hex_rejects_wrong_length() {
        assert!(ObjectId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_display_is_short() {
        let id = BlobId::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", id), "abababababababab");
        assert!(format!("{:?}", id).starts_with("BlobId("));
    }

    #[test]
    fn test_derived_object_ids_are_distinct() {
        let digest = [7u8; 32];
        assert_ne!(ObjectId::derive(&digest, 0), ObjectId::derive(&digest, 1));
        assert_ne!(ObjectId::derive(&digest, 0), ObjectId::CLOCK);
    }

    #[test]
    fn test_address_is_deterministic_per_key() {
        let kp = Keypair::from_seed(&[1u8; 32]);
        let other = Keypair::from_seed(&[2u8; 32]);
        assert_eq!(
            Address::from_public_key(&kp.public_key()),
            Address::from_public_key(&kp.public_key())
        );
        assert_ne!(
            Address::from_public_key(&kp.public_key()),
            Address::from_public_key(&other.public_key())
        );
    }

    #[test]
    fn test_blob_id_is_content_addressed() {
        assert_eq!(BlobId::for_content(b"abc"), BlobId::for_content(b"abc"));
        assert_ne!(BlobId::for_content(b"abc"), BlobId::for_content(b"abd"));
    }
}
