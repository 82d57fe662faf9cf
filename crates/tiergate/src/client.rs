//! The Client: orchestrates the ledger, the blob store and the key servers.
//!
//! The three collaborators fail independently and nothing commits across
//! them atomically. The client sequences their calls, settles after every
//! object-creating write, retries transport failures and leaves anything
//! half-done in a state [`Client::repair`] can finish.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tiergate_core::{
    can_post_comment, is_authorized, Address, BlobId, Clock, EncryptionMetadata, ObjectId,
    ScopeId, SubscriptionCredential, Tier,
};
use tiergate_keyserver::SealClient;
use tiergate_store::{
    retry, BlobStore, Ledger, LedgerCall, LedgerObject, ObjectKind, Owner, RefKind,
    ReferenceCache, StoreError, TxEffects,
};

use crate::config::ClientConfig;
use crate::error::{Result, TierGateError};
use crate::session::SessionManager;

/// Entry point for publishing and viewing tier-gated content.
pub struct Client {
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) seal: Arc<SealClient>,
    pub(crate) config: ClientConfig,
    pub(crate) scope: ScopeId,
    pub(crate) sessions: SessionManager,
    pub(crate) cache: Option<ReferenceCache>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client.
    ///
    /// `wall_clock` only drives session expiry; authorization always uses
    /// the ledger clock.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        blobs: Arc<dyn BlobStore>,
        seal: Arc<SealClient>,
        config: ClientConfig,
        wall_clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate(seal.server_count())?;
        let scope = config.scope_id()?;
        if seal.scope() != scope {
            return Err(TierGateError::Configuration(format!(
                "seal client scope {} does not match configured scope {}",
                seal.scope(),
                scope
            )));
        }

        let sessions = SessionManager::new(config.session_ttl_minutes, wall_clock);
        Ok(Self {
            ledger,
            blobs,
            seal,
            config,
            scope,
            sessions,
            cache: None,
        })
    }

    /// Keep last-used references and pending links in `cache`.
    pub fn with_cache(mut self, cache: ReferenceCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The scope posts are published and decrypted in.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sessions signed so far, one per viewer.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The local reference cache, if one was attached.
    pub fn cache(&self) -> Option<&ReferenceCache> {
        self.cache.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policy Registrar
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an access policy with a placeholder content reference.
    ///
    /// The returned id is not usable until [`Client::await_visible`]
    /// observes it.
    pub async fn create_policy(&self, creator: &Address, required_tier: Tier) -> Result<ObjectId> {
        let effects = self
            .execute(
                creator,
                LedgerCall::CreatePolicy {
                    content_reference: tiergate_core::ContentReference::Placeholder,
                    required_tier: required_tier.level(),
                },
            )
            .await?;

        let policy = effects
            .find_created(ObjectKind::AccessPolicy, Owner::Shared)
            .ok_or(TierGateError::PolicyNotInEffects)?;
        info!(policy = %policy, tier = %required_tier, "created access policy");
        self.remember(RefKind::Policy, creator, &policy);
        Ok(policy)
    }

    /// Poll until `id` is readable on the ledger.
    ///
    /// Gives up with [`TierGateError::OrderingViolation`] after the settle
    /// timeout; nothing may reference the object before it is visible.
    pub async fn await_visible(&self, id: &ObjectId) -> Result<LedgerObject> {
        let settle = &self.config.settle;
        let deadline = Instant::now() + settle.timeout;
        let mut polls = 0u32;

        loop {
            match self.ledger.get_object(id).await {
                Ok(Some(object)) => {
                    debug!(object = %id, polls, "object visible");
                    return Ok(object);
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    debug!(object = %id, error = %e, "visibility poll failed");
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(TierGateError::OrderingViolation(format!(
                    "object {} not visible after {:?}",
                    id, settle.timeout
                )));
            }
            polls += 1;
            tokio::time::sleep(settle.poll_interval).await;
        }
    }

    /// Encrypt `plaintext` under a fresh identity of `policy`.
    ///
    /// Fails with [`TierGateError::OrderingViolation`] if the ledger does not
    /// show the policy yet.
    pub async fn encrypt_for_policy(
        &self,
        policy: &ObjectId,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, EncryptionMetadata)> {
        let visible = retry(&self.config.retry, "get_policy", StoreError::is_retryable, || {
            self.ledger.get_policy(policy)
        })
        .await?;
        if visible.is_none() {
            return Err(TierGateError::OrderingViolation(format!(
                "policy {} is not visible to the ledger yet",
                policy
            )));
        }

        let (ciphertext, metadata) = self.seal.encrypt(plaintext, policy, self.config.threshold)?;
        Ok((ciphertext, metadata))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Credentials
    // ─────────────────────────────────────────────────────────────────────────

    /// Buy a membership with `creator`, owned by `subscriber`.
    pub async fn purchase_credential(
        &self,
        subscriber: &Address,
        creator: &Address,
        tier: Tier,
        duration: Duration,
    ) -> Result<ObjectId> {
        let duration_ms = i64::try_from(duration.as_millis()).map_err(|_| {
            TierGateError::Configuration(format!("credential duration {:?} too long", duration))
        })?;
        let effects = self
            .execute(
                subscriber,
                LedgerCall::PurchaseCredential {
                    creator: *creator,
                    tier: tier.level(),
                    duration_ms,
                },
            )
            .await?;

        let credential = effects
            .find_created(ObjectKind::SubscriptionCredential, Owner::Address(*subscriber))
            .ok_or_else(|| TierGateError::NotFound("credential missing from effects".into()))?;
        info!(credential = %credential, %tier, "purchased credential");
        self.remember(RefKind::Credential, subscriber, &credential);
        Ok(credential)
    }

    /// Revoke a credential issued for `creator`.
    pub async fn revoke_credential(&self, creator: &Address, credential: &ObjectId) -> Result<()> {
        self.execute(
            creator,
            LedgerCall::RevokeCredential {
                credential: *credential,
            },
        )
        .await?;
        info!(credential = %credential, "revoked credential");
        Ok(())
    }

    /// The highest-tier credential `viewer` holds with `creator` that is
    /// valid by the ledger clock.
    ///
    /// Falls back to the cached last credential when the ledger's owner
    /// index has not caught up.
    pub async fn best_credential(
        &self,
        viewer: &Address,
        creator: &Address,
    ) -> Result<Option<SubscriptionCredential>> {
        let now = self.ledger_now().await?;
        let mut candidates = retry(&self.config.retry, "owned_objects", StoreError::is_retryable, || {
            self.ledger.owned_objects(viewer)
        })
        .await?;
        if let Some(cached) = self.recall(RefKind::Credential, viewer) {
            if !candidates.contains(&cached) {
                candidates.push(cached);
            }
        }

        let mut best: Option<SubscriptionCredential> = None;
        for id in candidates {
            let Some(credential) = self.ledger.get_credential(&id).await? else {
                continue;
            };
            if credential.creator != *creator || credential.subscriber != *viewer {
                continue;
            }
            if !is_authorized(&credential, Tier::PUBLIC, now) {
                continue;
            }
            if best.as_ref().map_or(true, |b| credential.tier > b.tier) {
                best = Some(credential);
            }
        }

        if let Some(credential) = &best {
            self.remember(RefKind::Credential, viewer, &credential.id);
        }
        Ok(best)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tier Gate
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the holder of `credential` may comment on content requiring
    /// `content_tier`, given the configured platform floor.
    pub async fn can_comment(
        &self,
        credential: Option<&SubscriptionCredential>,
        content_tier: Tier,
    ) -> Result<bool> {
        let floor = self.config.comment_floor()?;
        let now = self.ledger_now().await?;
        Ok(can_post_comment(credential, floor, content_tier, now))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) async fn execute(&self, sender: &Address, call: LedgerCall) -> Result<TxEffects> {
        let label = call.name();
        debug!(sender = %sender, call = label, "ledger call");
        let effects = retry(&self.config.retry, label, StoreError::is_retryable, || {
            self.ledger.execute(sender, call.clone())
        })
        .await?;
        Ok(effects)
    }

    pub(crate) async fn ledger_now(&self) -> Result<i64> {
        Ok(retry(&self.config.retry, "ledger_clock", StoreError::is_retryable, || {
            self.ledger.now_ms()
        })
        .await?)
    }

    pub(crate) async fn put_blob(&self, bytes: Bytes) -> Result<BlobId> {
        let size = bytes.len();
        let blob = retry(&self.config.retry, "blob_put", StoreError::is_retryable, || {
            self.blobs.put(bytes.clone())
        })
        .await?;
        debug!(blob = %blob, size, "stored blob");
        Ok(blob)
    }

    pub(crate) async fn get_blob(&self, blob: &BlobId) -> Result<Bytes> {
        Ok(retry(&self.config.retry, "blob_get", StoreError::is_retryable, || {
            self.blobs.get(blob)
        })
        .await?)
    }

    /// Cache writes are advisory; failures are logged and dropped.
    pub(crate) fn remember(&self, kind: RefKind, owner: &Address, object: &ObjectId) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remember(kind, owner, object) {
                warn!(error = %e, "reference cache write failed");
            }
        }
    }

    fn recall(&self, kind: RefKind, owner: &Address) -> Option<ObjectId> {
        let cache = self.cache.as_ref()?;
        match cache.recall(kind, owner) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "reference cache read failed");
                None
            }
        }
    }
}
