//! The consume path: session, verification transaction, key recovery,
//! local decryption.

use tracing::{debug, info};

use tiergate_core::{ContentPost, Keypair, ObjectId, SubscriptionCredential};
use tiergate_keyserver::RecoveryError;
use tiergate_seal::build_verification_tx;
use tiergate_store::{retry, StoreError};

use crate::client::Client;
use crate::error::{Result, TierGateError};

impl Client {
    /// Read a post.
    pub async fn post(&self, id: &ObjectId) -> Result<ContentPost> {
        retry(&self.config.retry, "get_post", StoreError::is_retryable, || {
            self.ledger.get_post(id)
        })
        .await?
        .ok_or_else(|| TierGateError::NotFound(format!("post {}", id)))
    }

    /// Fetch and, if gated, decrypt a post's payload for `viewer`.
    ///
    /// With a credential, a verification transaction proving it satisfies
    /// the post's policy is built for the key servers to simulate. Without
    /// one the request goes out in open mode, which only scopes that allow
    /// it will serve. A session the key servers reject as expired is
    /// refreshed once silently.
    pub async fn view(
        &self,
        viewer: &Keypair,
        post_id: &ObjectId,
        credential: Option<&ObjectId>,
    ) -> Result<Vec<u8>> {
        let post = self.post(post_id).await?;
        let payload = self.get_blob(&post.blob).await?;

        let Some(metadata) = &post.encryption else {
            debug!(post = %post_id, "public post");
            return Ok(payload.to_vec());
        };
        if metadata.scope != self.scope {
            return Err(TierGateError::Configuration(format!(
                "post {} was encrypted for scope {}, client serves {}",
                post_id, metadata.scope, self.scope
            )));
        }

        let verification = match credential {
            Some(credential) => {
                let policy = post.policy.ok_or(TierGateError::PolicyNotLinked(*post_id))?;
                let tx = build_verification_tx(
                    viewer.address(),
                    self.scope,
                    &metadata.id,
                    policy,
                    *credential,
                    ObjectId::CLOCK,
                )?;
                Some(tx.kind_bytes()?)
            }
            None => None,
        };

        let session = self.sessions.session(viewer, self.scope).await?;
        let outcome = self
            .seal
            .decrypt(&payload, metadata, &session, verification.as_deref())
            .await;

        let plaintext = match outcome {
            Err(RecoveryError::SessionExpired) => {
                info!(post = %post_id, "session rejected as expired, refreshing");
                let session = self.sessions.refresh(viewer, self.scope).await?;
                self.seal
                    .decrypt(&payload, metadata, &session, verification.as_deref())
                    .await?
            }
            other => other?,
        };
        debug!(post = %post_id, bytes = plaintext.len(), "decrypted post");
        Ok(plaintext)
    }

    /// View with the best credential `viewer` holds for the post's creator.
    pub async fn view_as_member(&self, viewer: &Keypair, post_id: &ObjectId) -> Result<Vec<u8>> {
        let post = self.post(post_id).await?;
        if !post.is_gated() {
            return self.view(viewer, post_id, None).await;
        }

        let best: Option<SubscriptionCredential> =
            self.best_credential(&viewer.address(), &post.creator).await?;
        match best {
            Some(credential) if credential.tier >= post.required_tier => {
                self.view(viewer, post_id, Some(&credential.id)).await
            }
            _ => Err(TierGateError::AuthorizationDenied(format!(
                "no credential of tier {} or higher",
                post.required_tier
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use tiergate_core::{Address, ContentKind, ManualClock, Tier};
    use tiergate_keyserver::{
        KeyServer, KeyServerConfig, MemoryKeyServer, SealClient, SealClientConfig,
    };
    use tiergate_store::{MemoryBlobStore, MemoryLedger, MemoryLedgerConfig};

    use crate::config::ClientConfig;
    use crate::publish::PublishRequest;

    struct Setup {
        client: Client,
        wall: Arc<ManualClock>,
        servers: Arc<ManualClock>,
    }

    /// Client and key servers keep separate wall clocks.
    fn setup() -> Setup {
        let ledger_clock = Arc::new(ManualClock::new(1_000_000));
        let wall = Arc::new(ManualClock::new(1_000_000));
        let servers = Arc::new(ManualClock::new(1_000_000));
        let ledger = Arc::new(MemoryLedger::new(MemoryLedgerConfig::default(), ledger_clock));
        let scope = ledger.package();

        let handles: Vec<Arc<dyn KeyServer>> = (1..=2u8)
            .map(|i| {
                Arc::new(MemoryKeyServer::new(
                    format!("ks-{}", i),
                    ObjectId::from_bytes([i; 32]),
                    KeyServerConfig::gated(scope),
                    ledger.clone(),
                    servers.clone(),
                )) as Arc<dyn KeyServer>
            })
            .collect();
        let seal = SealClient::new(scope, handles, SealClientConfig::default()).unwrap();

        let mut config = ClientConfig::for_scope(scope);
        config.threshold = 2;
        let client = Client::new(
            ledger,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(seal),
            config,
            wall.clone(),
        )
        .unwrap();
        Setup {
            client,
            wall,
            servers,
        }
    }

    fn request(tier: u8, content: &'static [u8]) -> PublishRequest {
        PublishRequest {
            title: "post".into(),
            description: String::new(),
            kind: ContentKind::Text,
            required_tier: Tier::new(tier).unwrap(),
            content: Bytes::from_static(content),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_views_gated_post() {
        let s = setup();
        let creator = Keypair::generate().address();
        let viewer = Keypair::generate();

        let receipt = s
            .client
            .publish(&creator, request(2, b"secret"))
            .await
            .unwrap();
        let credential = s
            .client
            .purchase_credential(&viewer.address(), &creator, Tier::new(2).unwrap(), Duration::from_secs(3600))
            .await
            .unwrap();
        s.client.await_visible(&credential).await.unwrap();

        let plaintext = s
            .client
            .view(&viewer, &receipt.post, Some(&credential))
            .await
            .unwrap();
        assert_eq!(plaintext, b"secret");
        assert_eq!(
            s.client.view_as_member(&viewer, &receipt.post).await.unwrap(),
            b"secret"
        );
        assert_eq!(s.client.sessions().created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_credential_on_gated_scope_is_denied() {
        let s = setup();
        let creator = Address::from_bytes([5; 32]);
        let receipt = s
            .client
            .publish(&creator, request(1, b"secret"))
            .await
            .unwrap();

        let viewer = Keypair::generate();
        let err = s.client.view(&viewer, &receipt.post, None).await.unwrap_err();
        assert!(matches!(err, TierGateError::AuthorizationDenied(_)));
        let err = s
            .client
            .view_as_member(&viewer, &receipt.post)
            .await
            .unwrap_err();
        assert!(matches!(err, TierGateError::AuthorizationDenied(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_refreshed_once() {
        let s = setup();
        let creator = Address::from_bytes([5; 32]);
        let viewer = Keypair::generate();
        let receipt = s
            .client
            .publish(&creator, request(1, b"first"))
            .await
            .unwrap();
        let credential = s
            .client
            .purchase_credential(&viewer.address(), &creator, Tier::new(1).unwrap(), Duration::from_secs(86_400))
            .await
            .unwrap();
        s.client.await_visible(&credential).await.unwrap();
        s.client
            .view(&viewer, &receipt.post, Some(&credential))
            .await
            .unwrap();

        // The client still trusts its session; the key servers' clocks
        // have already passed its expiry.
        let ttl_ms = i64::from(s.client.config().session_ttl_minutes) * 60_000;
        s.wall.advance(ttl_ms - 60_000);
        s.servers.advance(ttl_ms);

        let second = s
            .client
            .publish(&creator, request(1, b"second"))
            .await
            .unwrap();
        assert_eq!(
            s.client
                .view(&viewer, &second.post, Some(&credential))
                .await
                .unwrap(),
            b"second"
        );
        assert_eq!(s.client.sessions().created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_public_post_needs_no_session() {
        let s = setup();
        let receipt = s
            .client
            .publish(&Address::from_bytes([5; 32]), request(0, b"hello all"))
            .await
            .unwrap();
        s.client.await_visible(&receipt.post).await.unwrap();

        let viewer = Keypair::generate();
        assert_eq!(
            s.client.view(&viewer, &receipt.post, None).await.unwrap(),
            b"hello all"
        );
        assert_eq!(s.client.sessions().created(), 0);
    }
}
