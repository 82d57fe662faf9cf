//! Client configuration.
//!
//! Loaded from JSON; every duration is written in milliseconds.
//!
//! ```json
//! {
//!   "scope": "5e5e...5e",
//!   "threshold": 2,
//!   "session_ttl_minutes": 10,
//!   "settle": { "poll_interval_ms": 100, "timeout_ms": 5000 },
//!   "retry": { "max_attempts": 3, "initial_delay_ms": 100, "max_delay_ms": 2000, "strategy": "exponential" },
//!   "comment_tier_floor": 1
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use tiergate_core::{ScopeId, Tier};
use tiergate_seal::MAX_SESSION_TTL_MINUTES;
use tiergate_store::{duration_ms, RetryPolicy};

use crate::error::{Result, TierGateError};

/// How long to wait for a freshly created object to become visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for [`crate::Client`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hex id of the package that owns `seal_approve`. Required.
    pub scope: Option<String>,
    /// Key servers that must approve before a key can be rebuilt.
    pub threshold: u8,
    /// Lifetime of a signed session.
    pub session_ttl_minutes: u32,
    pub settle: SettleConfig,
    /// Applied to ledger and blob transport failures.
    pub retry: RetryPolicy,
    /// Platform-wide minimum tier for posting comments.
    pub comment_tier_floor: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scope: None,
            threshold: 1,
            session_ttl_minutes: 10,
            settle: SettleConfig::default(),
            retry: RetryPolicy::default(),
            comment_tier_floor: 0,
        }
    }
}

impl ClientConfig {
    /// Default configuration for `scope`.
    pub fn for_scope(scope: ScopeId) -> Self {
        Self {
            scope: Some(scope.to_hex()),
            ..Self::default()
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TierGateError::Configuration(format!("invalid config: {}", e)))
    }

    /// The configured scope.
    pub fn scope_id(&self) -> Result<ScopeId> {
        let hex = self
            .scope
            .as_deref()
            .ok_or_else(|| TierGateError::Configuration("scope is not configured".into()))?;
        ScopeId::from_hex(hex)
            .map_err(|e| TierGateError::Configuration(format!("invalid scope {:?}: {}", hex, e)))
    }

    /// The comment floor as a tier.
    pub fn comment_floor(&self) -> Result<Tier> {
        Tier::new(self.comment_tier_floor)
            .map_err(|e| TierGateError::Configuration(format!("comment_tier_floor: {}", e)))
    }

    /// Check every field against a deployment of `server_count` key servers.
    pub fn validate(&self, server_count: usize) -> Result<()> {
        self.scope_id()?;
        self.comment_floor()?;

        if self.threshold == 0 || usize::from(self.threshold) > server_count {
            return Err(TierGateError::Configuration(format!(
                "threshold {} must be within 1..={}",
                self.threshold, server_count
            )));
        }
        if self.session_ttl_minutes == 0 || self.session_ttl_minutes > MAX_SESSION_TTL_MINUTES {
            return Err(TierGateError::Configuration(format!(
                "session_ttl_minutes {} must be within 1..={}",
                self.session_ttl_minutes, MAX_SESSION_TTL_MINUTES
            )));
        }
        if self.settle.poll_interval.is_zero() || self.settle.timeout < self.settle.poll_interval {
            return Err(TierGateError::Configuration(
                "settle timeout must be at least one non-zero poll interval".into(),
            ));
        }
        Ok(())
    }
}
