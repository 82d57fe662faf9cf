//! Proptest generators for property-based testing.

use std::collections::HashMap;

use proptest::prelude::*;

use tiergate_core::{
    Address, EncryptionIdentity, Keypair, ObjectId, ScopeId, SubscriptionCredential, Tier,
    NONCE_LEN,
};
use tiergate_seal::{AeadKey, EncryptedObject, KeyServerRef, X25519StaticSecret};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random ObjectId.
pub fn object_id() -> impl Strategy<Value = ObjectId> {
    any::<[u8; 32]>().prop_map(ObjectId::from_bytes)
}

/// Generate a random Address.
pub fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 32]>().prop_map(Address::from_bytes)
}

/// Generate a valid tier.
pub fn tier() -> impl Strategy<Value = Tier> {
    (0..=Tier::MAX.level()).prop_map(|level| Tier::new(level).unwrap_or(Tier::PUBLIC))
}

/// Generate an identity with an explicit nonce.
pub fn identity() -> impl Strategy<Value = EncryptionIdentity> {
    (object_id(), any::<[u8; NONCE_LEN]>())
        .prop_map(|(policy, nonce)| EncryptionIdentity::derive_with_nonce(&policy, nonce))
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a credential whose expiry lies within an hour of `now_ms`.
pub fn credential_near(now_ms: i64) -> impl Strategy<Value = SubscriptionCredential> {
    (
        object_id(),
        address(),
        address(),
        tier(),
        -3_600_000i64..=3_600_000i64,
        any::<bool>(),
    )
        .prop_map(
            move |(id, creator, subscriber, tier, offset, revoked)| SubscriptionCredential {
                id,
                creator,
                subscriber,
                tier,
                expires_at: now_ms + offset,
                revoked,
            },
        )
}

/// A set of key servers as seen from both sides.
pub struct ServerSet {
    pub secrets: Vec<(ObjectId, X25519StaticSecret)>,
}

impl std::fmt::Debug for ServerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSet")
            .field("servers", &self.secrets.len())
            .finish()
    }
}

impl ServerSet {
    /// `n` servers with fresh keys.
    pub fn generate(n: u8) -> Self {
        Self {
            secrets: (1..=n)
                .map(|i| (ObjectId::from_bytes([i; 32]), X25519StaticSecret::generate()))
                .collect(),
        }
    }

    /// What an encryptor needs.
    pub fn refs(&self) -> Vec<KeyServerRef> {
        self.secrets
            .iter()
            .map(|(object_id, secret)| KeyServerRef {
                object_id: *object_id,
                public_key: secret.public_key(),
            })
            .collect()
    }

    /// The keys the first `count` servers would release for `object`.
    pub fn release(
        &self,
        object: &EncryptedObject,
        scope: &ScopeId,
        count: usize,
    ) -> HashMap<ObjectId, AeadKey> {
        self.secrets
            .iter()
            .take(count)
            .map(|(object_id, secret)| {
                let key = secret
                    .diffie_hellman(object.encapsulation())
                    .derive_share_key(scope, object.id(), object_id);
                (*object_id, key)
            })
            .collect()
    }
}

/// `(servers, threshold)` with `1 <= threshold <= servers <= max`.
pub fn threshold_config(max: u8) -> impl Strategy<Value = (u8, u8)> {
    (1..=max).prop_flat_map(|n| (Just(n), 1..=n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiergate_core::{is_authorized, IDENTITY_LEN};

    const NOW: i64 = 1_700_000_000_000;

    proptest! {
        #[test]
        fn test_identity_length_and_binding(policy in object_id(), nonce in any::<[u8; NONCE_LEN]>()) {
            let id = EncryptionIdentity::derive_with_nonce(&policy, nonce);
            prop_assert_eq!(id.len(), policy.as_bytes().len() + NONCE_LEN);
            prop_assert_eq!(id.len(), IDENTITY_LEN);
            prop_assert!(id.is_bound_to(&policy));
            prop_assert_eq!(EncryptionIdentity::from_hex(&id.to_hex()).unwrap(), id);
        }

        #[test]
        fn test_tier_gate_definition(credential in credential_near(NOW), required in tier()) {
            let expected = !credential.revoked
                && credential.expires_at > NOW
                && credential.tier >= required;
            prop_assert_eq!(is_authorized(&credential, required, NOW), expected);
        }

        #[test]
        fn test_threshold_roundtrip(
            (n, t) in threshold_config(5),
            plaintext in payload(512),
            id in identity(),
        ) {
            let scope = ScopeId::from_bytes([0x5e; 32]);
            let servers = ServerSet::generate(n);
            let (object, metadata) =
                EncryptedObject::seal(&plaintext, &id, &scope, t, &servers.refs()).unwrap();

            let enough = servers.release(&object, &scope, usize::from(t));
            prop_assert_eq!(object.open(&metadata, &enough).unwrap(), plaintext);

            // One share short never yields a plaintext.
            let short = servers.release(&object, &scope, usize::from(t) - 1);
            prop_assert!(object.open(&metadata, &short).is_err());
        }
    }

    #[test]
    fn test_fresh_identities_differ() {
        let policy = ObjectId::from_bytes([3; 32]);
        let ids: std::collections::HashSet<_> =
            (0..256).map(|_| EncryptionIdentity::derive(&policy)).collect();
        assert_eq!(ids.len(), 256);
    }
}
