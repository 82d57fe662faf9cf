//! Key server abstraction.
//!
//! A key server is stateless per request and trusts nothing the client
//! claims: it releases a key for an identity only after simulating the
//! client's verification transaction on the ledger. Implementations may
//! sit behind HTTP or any other transport.

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{FetchKeyRequest, FetchKeyResponse, ServerInfo};

/// A threshold key-release server.
#[async_trait]
pub trait KeyServer: Send + Sync {
    /// Public description of the server.
    fn info(&self) -> ServerInfo;

    /// Release keys for the requested identities, wrapped to the session.
    ///
    /// All-or-nothing: either every requested id is approved or the whole
    /// request fails.
    async fn fetch_keys(&self, request: &FetchKeyRequest) -> Result<FetchKeyResponse>;
}

/// An in-process key server backed by a [`tiergate_store::Ledger`].
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tracing::{debug, info};

    use tiergate_core::{Clock, ObjectId, ScopeId, TransactionKind};
    use tiergate_seal::{KeyShare, SealError, X25519StaticSecret};
    use tiergate_store::{Ledger, SimulationOutcome};

    use crate::error::KeyServerError;
    use crate::messages::PROTOCOL_VERSION;

    /// Per-server policy.
    #[derive(Debug, Clone)]
    pub struct KeyServerConfig {
        /// The package whose `seal_approve` this server trusts.
        pub scope: ScopeId,
        /// Release keys without a verification transaction.
        pub allow_open_access: bool,
    }

    impl KeyServerConfig {
        /// Gated scope: every request must carry a verification transaction.
        pub fn gated(scope: ScopeId) -> Self {
            Self {
                scope,
                allow_open_access: false,
            }
        }
    }

    /// In-memory key server.
    pub struct MemoryKeyServer {
        info: ServerInfo,
        secret: X25519StaticSecret,
        config: KeyServerConfig,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        served: AtomicU64,
    }

    impl MemoryKeyServer {
        /// Create a server with a fresh key.
        ///
        /// `clock` is the server's own wall clock, used for session expiry.
        pub fn new(
            name: impl Into<String>,
            object_id: ObjectId,
            config: KeyServerConfig,
            ledger: Arc<dyn Ledger>,
            clock: Arc<dyn Clock>,
        ) -> Self {
            let secret = X25519StaticSecret::generate();
            let info = ServerInfo {
                object_id,
                name: name.into(),
                public_key: secret.public_key(),
                scope: config.scope,
            };
            Self {
                info,
                secret,
                config,
                ledger,
                clock,
                served: AtomicU64::new(0),
            }
        }

        /// Number of requests that released keys.
        pub fn served(&self) -> u64 {
            self.served.load(Ordering::Relaxed)
        }

        fn check_session(&self, request: &FetchKeyRequest) -> Result<()> {
            let cert = &request.certificate;
            if cert.scope() != self.config.scope {
                return Err(KeyServerError::WrongScope(cert.scope().to_hex()));
            }

            cert.verify(self.clock.now_ms()).map_err(|e| match e {
                SealError::SessionExpired { expired_at } => {
                    KeyServerError::SessionExpired { expired_at }
                }
                other => KeyServerError::InvalidSession(other.to_string()),
            })?;

            let message = FetchKeyRequest::signing_message(
                request.verification.as_deref(),
                &cert.response_key(),
                &request.ids,
            );
            cert.verify_request(&message, &request.request_signature)
                .map_err(|e| KeyServerError::InvalidSession(e.to_string()))
        }

        async fn check_access(&self, request: &FetchKeyRequest) -> Result<()> {
            let Some(tx_bytes) = request.verification.as_deref() else {
                if self.config.allow_open_access {
                    return Ok(());
                }
                return Err(KeyServerError::VerificationRequired);
            };

            let kind = TransactionKind::from_bytes(tx_bytes)
                .map_err(|e| KeyServerError::InvalidRequest(e.to_string()))?;

            // Every id must be the first argument of an approve call into
            // our package; otherwise a passing simulation proves nothing
            // about it.
            for item in &request.ids {
                let approved = kind.calls.iter().any(|call| {
                    call.is_seal_approve(&self.config.scope)
                        && call.arguments.first().and_then(|a| a.as_pure())
                            == Some(item.id.as_bytes())
                });
                if !approved {
                    return Err(KeyServerError::IdNotApproved(item.id.to_string()));
                }
            }

            let sender = request.certificate.address();
            match self.ledger.simulate(&sender, tx_bytes).await? {
                SimulationOutcome::Success => Ok(()),
                SimulationOutcome::Abort { code, reason } => {
                    Err(KeyServerError::AccessDenied { code, reason })
                }
            }
        }
    }

    #[async_trait]
    impl KeyServer for MemoryKeyServer {
        fn info(&self) -> ServerInfo {
            self.info.clone()
        }

        async fn fetch_keys(&self, request: &FetchKeyRequest) -> Result<FetchKeyResponse> {
            if request.version != PROTOCOL_VERSION {
                return Err(KeyServerError::InvalidRequest(format!(
                    "unsupported protocol version {}",
                    request.version
                )));
            }
            request
                .validate_limits()
                .map_err(|e| KeyServerError::InvalidRequest(e.into()))?;

            self.check_session(request)?;
            if let Err(e) = self.check_access(request).await {
                debug!(server = %self.info.name, error = %e, "key request refused");
                return Err(e);
            }

            let response_key = request.certificate.response_key();
            let mut keys = Vec::with_capacity(request.ids.len());
            for item in &request.ids {
                let key = self
                    .secret
                    .diffie_hellman(&item.encapsulation)
                    .derive_share_key(&self.config.scope, &item.id, &self.info.object_id);
                keys.push(KeyShare::create(
                    self.info.object_id,
                    item.id.clone(),
                    &key,
                    &response_key,
                )?);
            }

            self.served.fetch_add(1, Ordering::Relaxed);
            info!(
                server = %self.info.name,
                address = %request.certificate.address(),
                ids = keys.len(),
                "released keys"
            );

            Ok(FetchKeyResponse {
                server: self.info.object_id,
                keys,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{KeyServerConfig, MemoryKeyServer};
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tiergate_core::{
        Clock, ContentReference, EncryptionIdentity, Keypair, ManualClock, ObjectId, ScopeId,
    };
    use tiergate_seal::{build_verification_tx, EncryptedObject, SessionKey};
    use tiergate_store::{
        Ledger, LedgerCall, MemoryLedger, MemoryLedgerConfig, ObjectKind, Owner,
    };

    use crate::error::KeyServerError;
    use crate::messages::KeyRequest;

    const SCOPE: ScopeId = ScopeId::from_bytes([0x5c; 32]);
    const LAG: Duration = Duration::from_millis(50);

    struct World {
        ledger: Arc<MemoryLedger>,
        wall: ManualClock,
        server: MemoryKeyServer,
        creator: Keypair,
        fan: Keypair,
    }

    fn world(allow_open_access: bool) -> World {
        let ledger_clock = ManualClock::new(1_000_000);
        let wall = ManualClock::new(2_000_000);
        let ledger = Arc::new(MemoryLedger::new(
            MemoryLedgerConfig {
                package: SCOPE,
                visibility_lag: LAG,
            },
            Arc::new(ledger_clock),
        ));
        let server = MemoryKeyServer::new(
            "ks-0",
            ObjectId::from_bytes([0xee; 32]),
            KeyServerConfig {
                scope: SCOPE,
                allow_open_access,
            },
            ledger.clone(),
            Arc::new(wall.clone()),
        );
        World {
            ledger,
            wall,
            server,
            creator: Keypair::generate(),
            fan: Keypair::generate(),
        }
    }

    fn session(user: &Keypair, now: i64) -> SessionKey {
        let mut session = SessionKey::new(user.public_key(), SCOPE, 10, now).unwrap();
        let sig = user.sign(&session.personal_message());
        session.attach_signature(sig).unwrap();
        session
    }

    async fn policy_and_credential(w: &World, required: u8, held: u8) -> (ObjectId, ObjectId) {
        let policy = w
            .ledger
            .execute(
                &w.creator.address(),
                LedgerCall::CreatePolicy {
                    content_reference: ContentReference::Placeholder,
                    required_tier: required,
                },
            )
            .await
            .unwrap()
            .find_created(ObjectKind::AccessPolicy, Owner::Shared)
            .unwrap();
        let credential = w
            .ledger
            .execute(
                &w.fan.address(),
                LedgerCall::PurchaseCredential {
                    creator: w.creator.address(),
                    tier: held,
                    duration_ms: 3_600_000,
                },
            )
            .await
            .unwrap()
            .find_created(
                ObjectKind::SubscriptionCredential,
                Owner::Address(w.fan.address()),
            )
            .unwrap();
        tokio::time::sleep(LAG).await;
        (policy, credential)
    }

    fn sealed(w: &World, policy: &ObjectId) -> EncryptedObject {
        let id = EncryptionIdentity::derive(policy);
        EncryptedObject::seal(b"payload", &id, &SCOPE, 1, &[w.server.info().key_server_ref()])
            .unwrap()
            .0
    }

    fn item(object: &EncryptedObject) -> KeyRequest {
        KeyRequest {
            id: object.id().clone(),
            encapsulation: *object.encapsulation(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_releases_key_that_opens_share() {
        let w = world(false);
        let (policy, credential) = policy_and_credential(&w, 2, 3).await;
        let object = sealed(&w, &policy);

        let session = session(&w.fan, w.wall.now_ms());
        let tx = build_verification_tx(
            w.fan.address(),
            SCOPE,
            object.id(),
            policy,
            credential,
            ObjectId::CLOCK,
        )
        .unwrap();
        let request =
            FetchKeyRequest::new(&session, Some(tx.kind_bytes().unwrap()), vec![item(&object)])
                .unwrap();

        let response = w.server.fetch_keys(&request).await.unwrap();
        assert_eq!(response.server, w.server.info().object_id);
        assert_eq!(w.server.served(), 1);

        let key = response.keys[0].decrypt(session.response_secret()).unwrap();
        let released: std::collections::HashMap<_, _> =
            [(response.server, key)].into_iter().collect();
        let metadata = tiergate_core::EncryptionMetadata {
            id: object.id().clone(),
            scope: SCOPE,
            threshold: 1,
        };
        assert_eq!(object.open(&metadata, &released).unwrap(), b"payload");
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_tier_is_denied() {
        let w = world(false);
        let (policy, credential) = policy_and_credential(&w, 2, 1).await;
        let object = sealed(&w, &policy);

        let session = session(&w.fan, w.wall.now_ms());
        let tx = build_verification_tx(
            w.fan.address(),
            SCOPE,
            object.id(),
            policy,
            credential,
            ObjectId::CLOCK,
        )
        .unwrap();
        let request =
            FetchKeyRequest::new(&session, Some(tx.kind_bytes().unwrap()), vec![item(&object)])
                .unwrap();

        assert!(matches!(
            w.server.fetch_keys(&request).await,
            Err(KeyServerError::AccessDenied { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_id_outside_transaction_is_refused() {
        let w = world(false);
        let (policy, credential) = policy_and_credential(&w, 1, 3).await;
        let approved = sealed(&w, &policy);
        let smuggled = sealed(&w, &policy);

        let session = session(&w.fan, w.wall.now_ms());
        let tx = build_verification_tx(
            w.fan.address(),
            SCOPE,
            approved.id(),
            policy,
            credential,
            ObjectId::CLOCK,
        )
        .unwrap();
        let request = FetchKeyRequest::new(
            &session,
            Some(tx.kind_bytes().unwrap()),
            vec![item(&approved), item(&smuggled)],
        )
        .unwrap();

        assert!(matches!(
            w.server.fetch_keys(&request).await,
            Err(KeyServerError::IdNotApproved(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_distinguished() {
        let w = world(true);
        let object = sealed(&w, &ObjectId::from_bytes([1; 32]));
        let session = session(&w.fan, w.wall.now_ms());

        w.wall.advance(10 * 60_000);
        let request = FetchKeyRequest::new(&session, None, vec![item(&object)]).unwrap();
        assert!(matches!(
            w.server.fetch_keys(&request).await,
            Err(KeyServerError::SessionExpired { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_mode_depends_on_scope_config() {
        let open = world(true);
        let object = sealed(&open, &ObjectId::from_bytes([1; 32]));
        let request = FetchKeyRequest::new(
            &session(&open.fan, open.wall.now_ms()),
            None,
            vec![item(&object)],
        )
        .unwrap();
        assert!(open.server.fetch_keys(&request).await.is_ok());

        let gated = world(false);
        let object = sealed(&gated, &ObjectId::from_bytes([1; 32]));
        let request = FetchKeyRequest::new(
            &session(&gated.fan, gated.wall.now_ms()),
            None,
            vec![item(&object)],
        )
        .unwrap();
        assert!(matches!(
            gated.server.fetch_keys(&request).await,
            Err(KeyServerError::VerificationRequired)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tampered_request_rejected() {
        let w = world(true);
        let object = sealed(&w, &ObjectId::from_bytes([1; 32]));
        let mut request = FetchKeyRequest::new(
            &session(&w.fan, w.wall.now_ms()),
            None,
            vec![item(&object)],
        )
        .unwrap();
        request.ids[0].encapsulation = tiergate_seal::X25519StaticSecret::generate().public_key();

        assert!(matches!(
            w.server.fetch_keys(&request).await,
            Err(KeyServerError::InvalidSession(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_scope_session_rejected() {
        let w = world(true);
        let object = sealed(&w, &ObjectId::from_bytes([1; 32]));
        let user = Keypair::generate();
        let mut foreign = SessionKey::new(user.public_key(), ScopeId::ZERO, 5, w.wall.now_ms()).unwrap();
        let sig = user.sign(&foreign.personal_message());
        foreign.attach_signature(sig).unwrap();

        let request = FetchKeyRequest::new(&foreign, None, vec![item(&object)]).unwrap();
        assert!(matches!(
            w.server.fetch_keys(&request).await,
            Err(KeyServerError::WrongScope(_))
        ));
    }
}
