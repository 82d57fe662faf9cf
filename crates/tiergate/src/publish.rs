//! The publish path as an explicit state machine.
//!
//! ```text
//! (start) ──create policy──▶ PolicyCreated ──settle, encrypt, upload──▶ ContentStored
//!                                                                          │
//!                                                                    create post
//!                                                                          ▼
//!                           ContentLinked ◀──settle, link policy── PostCreated
//! ```
//!
//! Every arrow is an independently committing call. A failure before the
//! post exists aborts the attempt; the orphaned policy or blob is harmless.
//! A failure of the final link leaves the post in `PostCreated`, reported
//! as a warning and recorded as a pending link so [`Client::repair`] or
//! [`Client::repair_pending`] can re-issue it.

use std::fmt;

use bytes::Bytes;
use tracing::{info, warn};

use tiergate_core::{Address, BlobId, ContentKind, EncryptionMetadata, ObjectId, Tier};
use tiergate_store::{LedgerCall, ObjectKind, Owner, RefKind};

use crate::client::Client;
use crate::error::{Result, TierGateError};

/// Content to publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Shown in listings; stored on the post in the clear.
    pub title: String,
    /// Shown in listings; stored on the post in the clear.
    pub description: String,
    /// How viewers should render the payload.
    pub kind: ContentKind,
    /// Minimum tier that may decrypt. [`Tier::PUBLIC`] skips encryption.
    pub required_tier: Tier,
    /// The payload, encrypted before upload unless the post is public.
    pub content: Bytes,
}

/// How far a publish got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PublishStage {
    /// The policy exists; nothing is encrypted yet.
    PolicyCreated,
    /// The payload is in the blob store.
    ContentStored,
    /// The post exists. For gated content it is not yet decryptable.
    PostCreated,
    /// The policy is linked to the post.
    ContentLinked,
}

/// Non-fatal problems encountered while publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishWarning {
    /// The post was created but linking its policy failed.
    PolicyLinkFailed {
        post: ObjectId,
        policy: ObjectId,
        reason: String,
    },
}

impl fmt::Display for PublishWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishWarning::PolicyLinkFailed {
                post,
                policy,
                reason,
            } => write!(
                f,
                "post {} created but linking policy {} failed: {}",
                post, policy, reason
            ),
        }
    }
}

/// Outcome of [`Client::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub creator: Address,
    pub stage: PublishStage,
    /// Absent for public content.
    pub policy: Option<ObjectId>,
    pub blob: BlobId,
    pub post: ObjectId,
    pub metadata: Option<EncryptionMetadata>,
    pub warnings: Vec<PublishWarning>,
}

impl PublishReceipt {
    /// Whether nothing is left to do.
    pub fn is_complete(&self) -> bool {
        self.policy.is_none() || self.stage == PublishStage::ContentLinked
    }
}

impl Client {
    /// Publish content.
    ///
    /// Public content is stored as a plain blob with no policy. Gated
    /// content goes through the full state machine.
    pub async fn publish(&self, creator: &Address, request: PublishRequest) -> Result<PublishReceipt> {
        if request.required_tier.is_public() {
            return self.publish_public(creator, request).await;
        }

        let policy = self.create_policy(creator, request.required_tier).await?;
        info!(policy = %policy, stage = ?PublishStage::PolicyCreated, "publish");

        self.await_visible(&policy).await?;
        let (ciphertext, metadata) = self.encrypt_for_policy(&policy, &request.content).await?;
        let blob = self.put_blob(Bytes::from(ciphertext)).await?;
        info!(blob = %blob, stage = ?PublishStage::ContentStored, "publish");

        let post = self
            .create_post(creator, &request, blob, Some(metadata.clone()))
            .await?;
        info!(post = %post, stage = ?PublishStage::PostCreated, "publish");

        self.record_pending(&post, &policy, creator);
        let receipt = PublishReceipt {
            creator: *creator,
            stage: PublishStage::PostCreated,
            policy: Some(policy),
            blob,
            post,
            metadata: Some(metadata),
            warnings: Vec::new(),
        };
        Ok(self.link(receipt).await)
    }

    /// Finish a publish left at [`PublishStage::PostCreated`].
    ///
    /// Linking is idempotent, so repairing a complete receipt is a no-op.
    pub async fn repair(&self, receipt: &PublishReceipt) -> Result<PublishReceipt> {
        let Some(policy) = receipt.policy.filter(|_| !receipt.is_complete()) else {
            return Ok(receipt.clone());
        };
        self.try_link(&receipt.creator, receipt.post, policy).await?;

        let mut repaired = receipt.clone();
        repaired.stage = PublishStage::ContentLinked;
        repaired.warnings.clear();
        Ok(repaired)
    }

    /// Re-issue the links `creator` left pending in the cache.
    ///
    /// Returns the posts that are now linked. Links that fail again stay
    /// pending. Entries recorded without a creator are only re-issued if
    /// the ledger shows `creator` owns the post.
    pub async fn repair_pending(&self, creator: &Address) -> Result<Vec<ObjectId>> {
        let Some(cache) = &self.cache else {
            return Ok(Vec::new());
        };

        let mut repaired = Vec::new();
        for pending in cache.pending_links(creator)? {
            if pending.creator.is_none() && self.post(&pending.post).await?.creator != *creator {
                continue;
            }

            let call = LedgerCall::LinkPolicy {
                post: pending.post,
                policy: pending.policy,
            };
            match self.execute(creator, call).await {
                Ok(_) => {
                    cache.clear_pending_link(&pending.post)?;
                    info!(post = %pending.post, policy = %pending.policy, "repaired policy link");
                    repaired.push(pending.post);
                }
                Err(e) => {
                    warn!(post = %pending.post, error = %e, "policy link still failing");
                }
            }
        }
        Ok(repaired)
    }

    async fn publish_public(&self, creator: &Address, request: PublishRequest) -> Result<PublishReceipt> {
        let blob = self.put_blob(request.content.clone()).await?;
        let post = self.create_post(creator, &request, blob, None).await?;
        info!(post = %post, "published public content");

        Ok(PublishReceipt {
            creator: *creator,
            stage: PublishStage::PostCreated,
            policy: None,
            blob,
            post,
            metadata: None,
            warnings: Vec::new(),
        })
    }

    async fn create_post(
        &self,
        creator: &Address,
        request: &PublishRequest,
        blob: BlobId,
        encryption: Option<EncryptionMetadata>,
    ) -> Result<ObjectId> {
        let effects = self
            .execute(
                creator,
                LedgerCall::CreatePost {
                    title: request.title.clone(),
                    description: request.description.clone(),
                    kind: request.kind,
                    blob,
                    required_tier: request.required_tier.level(),
                    encryption,
                },
            )
            .await?;

        let post = effects
            .find_created(ObjectKind::ContentPost, Owner::Shared)
            .ok_or_else(|| TierGateError::NotFound("post missing from effects".into()))?;
        self.remember(RefKind::Post, creator, &post);
        Ok(post)
    }

    /// Settle the post and link its policy. Failures become warnings.
    async fn link(&self, mut receipt: PublishReceipt) -> PublishReceipt {
        let Some(policy) = receipt.policy else {
            return receipt;
        };
        let post = receipt.post;

        let outcome = self.try_link(&receipt.creator, post, policy).await;
        match outcome {
            Ok(()) => {
                receipt.stage = PublishStage::ContentLinked;
                info!(post = %post, policy = %policy, stage = ?receipt.stage, "publish");
            }
            Err(e) => {
                let warning = PublishWarning::PolicyLinkFailed {
                    post,
                    policy,
                    reason: e.to_string(),
                };
                warn!("{}", warning);
                receipt.warnings.push(warning);
            }
        }
        receipt
    }

    async fn try_link(&self, creator: &Address, post: ObjectId, policy: ObjectId) -> Result<()> {
        self.await_visible(&post).await?;
        self.execute(creator, LedgerCall::LinkPolicy { post, policy })
            .await?;
        self.clear_pending(&post);
        Ok(())
    }

    fn record_pending(&self, post: &ObjectId, policy: &ObjectId, creator: &Address) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.record_pending_link(post, policy, creator) {
                warn!(error = %e, "could not record pending link");
            }
        }
    }

    fn clear_pending(&self, post: &ObjectId) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear_pending_link(post) {
                warn!(error = %e, "could not clear pending link");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tiergate_core::{ContentReference, ManualClock};
    use tiergate_keyserver::{
        KeyServer, KeyServerConfig, MemoryKeyServer, SealClient, SealClientConfig,
    };
    use tiergate_store::{
        BlobStore, Ledger, MemoryBlobStore, MemoryLedger, MemoryLedgerConfig, ReferenceCache,
    };

    use crate::config::ClientConfig;

    fn client() -> (Client, Arc<MemoryLedger>, Arc<MemoryBlobStore>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let ledger = Arc::new(MemoryLedger::new(MemoryLedgerConfig::default(), clock.clone()));
        let blobs = Arc::new(MemoryBlobStore::new());
        let scope = ledger.package();
        let server: Arc<dyn KeyServer> = Arc::new(MemoryKeyServer::new(
            "ks",
            ObjectId::from_bytes([1; 32]),
            KeyServerConfig::gated(scope),
            ledger.clone(),
            clock.clone(),
        ));
        let seal = SealClient::new(scope, vec![server], SealClientConfig::default()).unwrap();
        let client = Client::new(
            ledger.clone(),
            blobs.clone(),
            Arc::new(seal),
            ClientConfig::for_scope(scope),
            clock,
        )
        .unwrap()
        .with_cache(ReferenceCache::open_memory().unwrap());
        (client, ledger, blobs)
    }

    fn request(tier: u8) -> PublishRequest {
        PublishRequest {
            title: "Episode 4".into(),
            description: "members only".into(),
            kind: ContentKind::Audio,
            required_tier: Tier::new(tier).unwrap(),
            content: Bytes::from_static(b"the audio"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gated_publish_links_policy() {
        let (client, ledger, blobs) = client();
        let creator = Address::from_bytes([4; 32]);

        let receipt = client.publish(&creator, request(2)).await.unwrap();
        assert_eq!(receipt.stage, PublishStage::ContentLinked);
        assert!(receipt.is_complete());
        assert!(receipt.warnings.is_empty());

        let post = ledger.get_post(&receipt.post).await.unwrap().unwrap();
        let policy = receipt.policy.unwrap();
        assert_eq!(post.policy, Some(policy));
        assert_eq!(post.encryption, receipt.metadata);
        assert!(post.encryption.unwrap().id.is_bound_to(&policy));

        let stored = ledger.get_policy(&policy).await.unwrap().unwrap();
        assert_eq!(stored.content_reference, ContentReference::Post(receipt.post));

        // The blob holds ciphertext, not the plaintext.
        let blob = blobs.get(&receipt.blob).await.unwrap();
        assert_ne!(&blob[..], b"the audio");
        assert!(client.cache().unwrap().pending_links(&creator).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_public_publish_has_no_policy() {
        let (client, ledger, blobs) = client();
        let creator = Address::from_bytes([4; 32]);

        let receipt = client.publish(&creator, request(0)).await.unwrap();
        assert!(receipt.is_complete());
        assert!(receipt.policy.is_none());
        assert!(receipt.metadata.is_none());
        assert_eq!(&blobs.get(&receipt.blob).await.unwrap()[..], b"the audio");

        client.await_visible(&receipt.post).await.unwrap();
        assert!(!ledger.get_post(&receipt.post).await.unwrap().unwrap().is_gated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_of_complete_receipt_is_noop() {
        let (client, _, _) = client();
        let creator = Address::from_bytes([4; 32]);

        let receipt = client.publish(&creator, request(1)).await.unwrap();
        assert_eq!(client.repair(&receipt).await.unwrap(), receipt);
        assert!(client.repair_pending(&creator).await.unwrap().is_empty());
    }

    #[test]
    fn test_stage_order() {
        assert!(PublishStage::PolicyCreated < PublishStage::ContentStored);
        assert!(PublishStage::ContentStored < PublishStage::PostCreated);
        assert!(PublishStage::PostCreated < PublishStage::ContentLinked);
    }
}
