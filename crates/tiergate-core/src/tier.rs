//! Subscription tiers and the Tier Gate.
//!
//! The gate is a pure function used in two places: by the ledger's
//! `seal_approve` predicate when deciding whether key servers may release
//! a key, and by the application for affordances that involve no
//! encryption at all (minimum-tier comment posting).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::model::SubscriptionCredential;

/// A subscription tier. Level 0 is public.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tier(u8);

impl Tier {
    /// Public content: no credential required.
    pub const PUBLIC: Self = Self(0);

    /// Highest tier the ledger accepts.
    pub const MAX: Self = Self(3);

    /// Create a tier, rejecting levels above [`Tier::MAX`].
    pub fn new(level: u8) -> Result<Self> {
        if level > Self::MAX.0 {
            return Err(CoreError::InvalidTier(level));
        }
        Ok(Self(level))
    }

    /// The numeric level.
    pub const fn level(self) -> u8 {
        self.0
    }

    /// Whether this tier requires no credential.
    pub const fn is_public(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u8> for Tier {
    type Error = CoreError;

    fn try_from(level: u8) -> Result<Self> {
        Self::new(level)
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.0
    }
}

impl fmt::Debug for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier({})", self.0)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a credential grants access to content requiring `required`.
///
/// Access is granted iff the credential is not revoked, has not expired
/// (`expires_at > now_ms`, so a credential expiring exactly now is already
/// invalid), and its tier is at least the required tier.
pub fn is_authorized(credential: &SubscriptionCredential, required: Tier, now_ms: i64) -> bool {
    !credential.revoked && credential.expires_at > now_ms && credential.tier >= required
}

/// The minimum tier actually enforced when a platform-wide floor applies.
pub fn effective_minimum(platform_floor: Tier, content_tier: Tier) -> Tier {
    platform_floor.max(content_tier)
}

/// Whether a member may post a comment on a content item.
///
/// Without a credential only a public effective minimum passes.
pub fn can_post_comment(
    credential: Option<&SubscriptionCredential>,
    platform_floor: Tier,
    content_tier: Tier,
    now_ms: i64,
) -> bool {
    let minimum = effective_minimum(platform_floor, content_tier);
    match credential {
        Some(credential) => is_authorized(credential, minimum, now_ms),
        None => minimum.is_public(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, ObjectId};
    use proptest::prelude::*;

    fn credential(tier: u8, expires_at: i64, revoked: bool) -> SubscriptionCredential {
        SubscriptionCredential {
            id: ObjectId::from_bytes([1; 32]),
            creator: Address::from_bytes([2; 32]),
            subscriber: Address::from_bytes([3; 32]),
            tier: Tier::new(tier).unwrap(),
            expires_at,
            revoked,
        }
    }

    #[test]
    fn test_tier_range() {
        assert!(Tier::new(0).is_ok());
        assert!(Tier::new(3).is_ok());
        assert!(matches!(Tier::new(4), Err(CoreError::InvalidTier(4))));
    }

    #[test]
    fn test_tier_serde_rejects_out_of_range() {
        assert_eq!(serde_json::from_str::<Tier>("2").unwrap(), Tier::new(2).unwrap());
        assert!(serde_json::from_str::<Tier>("9").is_err());
    }

    #[test]
    fn test_tier_equal_to_required_is_authorized() {
        let c = credential(2, 1_000, false);
        assert!(is_authorized(&c, Tier::new(2).unwrap(), 500));
    }

    #[test]
    fn test_tier_below_required_is_denied() {
        let c = credential(1, 1_000, false);
        assert!(!is_authorized(&c, Tier::new(2).unwrap(), 500));
    }

    #[test]
    fn test_expiry_boundary() {
        let c = credential(3, 1_000, false);
        assert!(is_authorized(&c, Tier::new(1).unwrap(), 999));
        assert!(!is_authorized(&c, Tier::new(1).unwrap(), 1_000));
        assert!(!is_authorized(&c, Tier::new(1).unwrap(), 1_001));
    }

    #[test]
    fn test_revoked_is_denied() {
        let c = credential(3, i64::MAX, true);
        assert!(!is_authorized(&c, Tier::PUBLIC, 0));
    }

    #[test]
    fn test_effective_minimum_takes_stricter() {
        let floor = Tier::new(2).unwrap();
        assert_eq!(effective_minimum(floor, Tier::new(1).unwrap()), floor);
        assert_eq!(effective_minimum(floor, Tier::MAX), Tier::MAX);
    }

    #[test]
    fn test_comment_floor_stricter_than_content() {
        let floor = Tier::new(2).unwrap();
        let content = Tier::new(1).unwrap();
        let member = credential(1, 1_000, false);

        // Satisfies the content tier, but not the platform floor.
        assert!(is_authorized(&member, content, 0));
        assert!(!can_post_comment(Some(&member), floor, content, 0));

        let gold = credential(2, 1_000, false);
        assert!(can_post_comment(Some(&gold), floor, content, 0));
    }

    #[test]
    fn test_comment_without_credential() {
        assert!(can_post_comment(None, Tier::PUBLIC, Tier::PUBLIC, 0));
        assert!(!can_post_comment(None, Tier::new(1).unwrap(), Tier::PUBLIC, 0));
    }

    proptest! {
        #[test]
        fn test_gate_matches_definition(
            tier in 0u8..=3,
            required in 0u8..=3,
            expires_at in -5i64..5,
            now in -5i64..5,
            revoked in any::<bool>(),
        ) {
            let c = credential(tier, expires_at, revoked);
            let expected = !revoked && expires_at > now && tier >= required;
            prop_assert_eq!(is_authorized(&c, Tier::new(required).unwrap(), now), expected);
        }
    }
}
