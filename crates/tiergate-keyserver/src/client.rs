//! Key Recovery / Decryptor.
//!
//! [`SealClient`] is constructed explicitly with its scope and key servers
//! and passed to whatever orchestrates publish and view flows. It encrypts
//! under a policy, drives the key servers until the threshold is met and
//! decrypts locally.
//!
//! Keys released against a verification transaction live for one call
//! only: the server re-checks the policy every time, so a revoked
//! credential stops working on the next view. Keys released in open mode
//! are kept for the session that obtained them and dropped once that
//! session expires on the client's clock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use tiergate_core::{Clock, EncryptionIdentity, EncryptionMetadata, ObjectId, ScopeId, SystemClock};
use tiergate_seal::{AeadKey, EncryptedObject, SessionKey, X25519PublicKey};
use tiergate_store::{retry, RetryPolicy};

use crate::error::{KeyServerError, RecoveryError, RecoveryResult};
use crate::messages::{limits, FetchKeyRequest, KeyRequest, ServerInfo};
use crate::transport::KeyServer;

/// Client configuration.
#[derive(Debug, Clone, Default)]
pub struct SealClientConfig {
    /// Retry policy for transport failures, applied per server.
    pub retry: RetryPolicy,
}

/// (server, identity, encapsulation)
type ReleaseKey = (ObjectId, EncryptionIdentity, X25519PublicKey);

/// Keys released by the key servers, indexed by server and ciphertext.
#[derive(Clone, Default)]
pub struct ReleasedKeys {
    keys: HashMap<ReleaseKey, AeadKey>,
}

impl ReleasedKeys {
    /// The keys `object` can be opened with, by server.
    pub fn for_object(&self, object: &EncryptedObject) -> HashMap<ObjectId, AeadKey> {
        object
            .servers()
            .filter_map(|server| {
                self.keys
                    .get(&(*server, object.id().clone(), *object.encapsulation()))
                    .map(|key| (*server, key.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn holds(&self, server: &ObjectId, object: &EncryptedObject) -> bool {
        self.keys
            .contains_key(&(*server, object.id().clone(), *object.encapsulation()))
    }

    fn count_for(&self, object: &EncryptedObject) -> usize {
        object.servers().filter(|server| self.holds(server, object)).count()
    }
}

/// Open-mode keys held for one session.
struct OpenGrant {
    expires_at: i64,
    released: ReleasedKeys,
}

struct Server {
    info: ServerInfo,
    handle: Arc<dyn KeyServer>,
}

/// Threshold encryption client for one scope.
pub struct SealClient {
    scope: ScopeId,
    servers: Vec<Server>,
    config: SealClientConfig,
    clock: Arc<dyn Clock>,
    /// Keyed by the session's response key, which is unique per session.
    open_grants: RwLock<HashMap<X25519PublicKey, OpenGrant>>,
}

impl SealClient {
    /// Create a client. Every server must serve `scope` and appear once.
    pub fn new(
        scope: ScopeId,
        servers: Vec<Arc<dyn KeyServer>>,
        config: SealClientConfig,
    ) -> RecoveryResult<Self> {
        if servers.is_empty() {
            return Err(RecoveryError::Configuration("no key servers configured".into()));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(servers.len());
        for handle in servers {
            let info = handle.info();
            if info.scope != scope {
                return Err(RecoveryError::Configuration(format!(
                    "key server {} serves scope {}, expected {}",
                    info.name, info.scope, scope
                )));
            }
            if !seen.insert(info.object_id) {
                return Err(RecoveryError::Configuration(format!(
                    "key server {} listed twice",
                    info.name
                )));
            }
            resolved.push(Server { info, handle });
        }

        Ok(Self {
            scope,
            servers: resolved,
            config,
            clock: Arc::new(SystemClock),
            open_grants: RwLock::new(HashMap::new()),
        })
    }

    /// Use `clock` to decide when cached open-mode keys expire with their
    /// session. Defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The scope this client encrypts and recovers in.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Number of configured key servers.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Descriptions of the configured servers.
    pub fn servers(&self) -> impl Iterator<Item = &ServerInfo> {
        self.servers.iter().map(|s| &s.info)
    }

    /// Encrypt under a fresh identity derived from `policy_id`.
    ///
    /// The policy must already be visible on the ledger; this client cannot
    /// check that, the orchestrator must.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        policy_id: &ObjectId,
        threshold: u8,
    ) -> RecoveryResult<(Vec<u8>, EncryptionMetadata)> {
        let id = EncryptionIdentity::derive(policy_id);
        let refs: Vec<_> = self.servers().map(ServerInfo::key_server_ref).collect();

        let (object, metadata) = EncryptedObject::seal(plaintext, &id, &self.scope, threshold, &refs)?;
        debug!(id = %id, threshold, servers = refs.len(), "sealed payload");
        Ok((object.to_bytes()?, metadata))
    }

    /// Fetch keys for several ciphertexts with one session.
    ///
    /// Servers are asked in configuration order until every object has at
    /// least its threshold of released keys. Transport failures are retried
    /// per server; refusals are not. If the threshold is missed and any
    /// server reported the session expired, that takes precedence so the
    /// caller can refresh and retry. If it is missed only because servers
    /// stayed unreachable, the result is [`RecoveryError::Transport`].
    ///
    /// With `verification` set, nothing is reused from earlier calls.
    pub async fn fetch_keys(
        &self,
        objects: &[(&EncryptedObject, &EncryptionMetadata)],
        session: &SessionKey,
        verification: Option<&[u8]>,
    ) -> RecoveryResult<ReleasedKeys> {
        for (object, metadata) in objects {
            self.check_scope(metadata)?;
            object.check_metadata(metadata)?;
        }
        if session.scope() != self.scope {
            return Err(RecoveryError::Configuration(format!(
                "session scope {} does not match client scope {}",
                session.scope(),
                self.scope
            )));
        }
        if !session.is_signed() {
            return Err(RecoveryError::Configuration("session is not signed".into()));
        }

        let mut released = match verification {
            None => self.open_grant(session).await,
            Some(_) => ReleasedKeys::default(),
        };

        let mut session_expired = false;
        let mut unreachable = 0usize;
        for server in &self.servers {
            if satisfied(&released, objects) {
                break;
            }

            let missing = missing_for(&released, server, objects);
            if missing.is_empty() {
                continue;
            }

            for chunk in missing.chunks(limits::MAX_IDS_PER_REQUEST) {
                match self.request(server, session, verification, chunk.to_vec()).await {
                    Ok(keys) => released.keys.extend(keys),
                    Err(KeyServerError::SessionExpired { .. }) => {
                        debug!(server = %server.info.name, "session expired on key server");
                        session_expired = true;
                        break;
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(server = %server.info.name, error = %e, "key server unreachable");
                        unreachable += 1;
                        break;
                    }
                    Err(e) => {
                        warn!(server = %server.info.name, error = %e, "key server refused");
                        break;
                    }
                }
            }
        }

        if verification.is_none() {
            self.remember_open(session, &released).await;
        }

        if satisfied(&released, objects) {
            return Ok(released);
        }
        if session_expired {
            return Err(RecoveryError::SessionExpired);
        }

        // Report the worst object.
        let (approved, required) = objects
            .iter()
            .map(|(object, metadata)| (released.count_for(object), usize::from(metadata.threshold)))
            .find(|(approved, required)| approved < required)
            .unwrap_or((0, 0));
        if approved + unreachable >= required {
            return Err(RecoveryError::Transport(format!(
                "{} of {} key servers approved, {} unreachable",
                approved, required, unreachable
            )));
        }
        Err(RecoveryError::ThresholdNotMet { approved, required })
    }

    /// Recover the plaintext of a serialized [`EncryptedObject`].
    pub async fn decrypt(
        &self,
        bytes: &[u8],
        metadata: &EncryptionMetadata,
        session: &SessionKey,
        verification: Option<&[u8]>,
    ) -> RecoveryResult<Vec<u8>> {
        let object = EncryptedObject::from_bytes(bytes)?;
        let released = self
            .fetch_keys(&[(&object, metadata)], session, verification)
            .await?;

        let plaintext = object.open(metadata, &released.for_object(&object))?;
        debug!(id = %object.id(), bytes = plaintext.len(), "decrypted payload");
        Ok(plaintext)
    }

    /// Drop every cached open-mode key.
    pub async fn clear_cache(&self) {
        self.open_grants.write().await.clear();
    }

    fn check_scope(&self, metadata: &EncryptionMetadata) -> RecoveryResult<()> {
        if metadata.scope != self.scope {
            return Err(RecoveryError::Configuration(format!(
                "ciphertext scope {} is not served by this client ({})",
                metadata.scope, self.scope
            )));
        }
        Ok(())
    }

    /// Keys this session already obtained in open mode, if it is still live.
    async fn open_grant(&self, session: &SessionKey) -> ReleasedKeys {
        let now = self.clock.now_ms();
        let mut grants = self.open_grants.write().await;
        grants.retain(|_, grant| now < grant.expires_at);
        if session.is_expired(now) {
            return ReleasedKeys::default();
        }
        grants
            .get(&session.response_public())
            .map(|grant| grant.released.clone())
            .unwrap_or_default()
    }

    async fn remember_open(&self, session: &SessionKey, released: &ReleasedKeys) {
        if released.is_empty() || session.is_expired(self.clock.now_ms()) {
            return;
        }
        self.open_grants.write().await.insert(
            session.response_public(),
            OpenGrant {
                expires_at: session.expires_at(),
                released: released.clone(),
            },
        );
    }

    async fn request(
        &self,
        server: &Server,
        session: &SessionKey,
        verification: Option<&[u8]>,
        items: Vec<KeyRequest>,
    ) -> Result<Vec<(ReleaseKey, AeadKey)>, KeyServerError> {
        let request = FetchKeyRequest::new(session, verification.map(<[u8]>::to_vec), items)?;
        let label = format!("fetch_keys:{}", server.info.name);

        let response = retry(
            &self.config.retry,
            &label,
            KeyServerError::is_retryable,
            || server.handle.fetch_keys(&request),
        )
        .await?;

        if response.server != server.info.object_id {
            return Err(KeyServerError::InvalidRequest(format!(
                "response from {} claims to be {}",
                server.info.name, response.server
            )));
        }

        let mut keys = Vec::with_capacity(response.keys.len());
        for share in response.keys {
            let Some(item) = request.ids.iter().find(|item| item.id == share.id) else {
                return Err(KeyServerError::InvalidRequest(format!(
                    "unrequested id {} in response",
                    share.id
                )));
            };
            let key = share.decrypt(session.response_secret())?;
            keys.push(((server.info.object_id, item.id.clone(), item.encapsulation), key));
        }
        Ok(keys)
    }
}

fn missing_for(
    released: &ReleasedKeys,
    server: &Server,
    objects: &[(&EncryptedObject, &EncryptionMetadata)],
) -> Vec<KeyRequest> {
    let mut missing = Vec::new();
    for (object, _) in objects {
        let holds_share = object.servers().any(|id| *id == server.info.object_id);
        if holds_share && !released.holds(&server.info.object_id, object) {
            let item = KeyRequest {
                id: object.id().clone(),
                encapsulation: *object.encapsulation(),
            };
            if !missing.contains(&item) {
                missing.push(item);
            }
        }
    }
    missing
}

fn satisfied(released: &ReleasedKeys, objects: &[(&EncryptedObject, &EncryptionMetadata)]) -> bool {
    objects
        .iter()
        .all(|(object, metadata)| released.count_for(object) >= usize::from(metadata.threshold))
}
