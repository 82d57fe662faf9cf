//! In-memory implementations of the Ledger and BlobStore traits.
//!
//! The ledger reproduces the properties the protocol must cope with:
//! ledger-assigned ids, eventual visibility after writes, a ledger clock
//! independent of the client's, and simulation of the `seal_approve`
//! predicate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace};

use tiergate_core::{
    is_authorized, AccessPolicy, Address, Blake3Hash, BlobId, CallArg, Clock, ContentPost,
    ContentReference, EncryptionIdentity, MoveCall, ObjectId, ScopeId, SubscriptionCredential,
    Tier, TransactionKind,
};

use crate::blob::BlobStore;
use crate::error::{Result, StoreError};
use crate::ledger::{
    abort_codes, CreatedObject, Ledger, LedgerCall, LedgerObject, ObjectKind, Owner,
    SimulationOutcome, TxEffects,
};

/// Configuration for [`MemoryLedger`].
#[derive(Debug, Clone)]
pub struct MemoryLedgerConfig {
    /// The package hosting `tier_gate::seal_approve`.
    pub package: ScopeId,
    /// How long a created object stays invisible to reads.
    pub visibility_lag: Duration,
}

impl Default for MemoryLedgerConfig {
    fn default() -> Self {
        Self {
            package: ScopeId::from_bytes([0x5e; 32]),
            visibility_lag: Duration::from_millis(250),
        }
    }
}

struct StoredObject {
    object: LedgerObject,
    owner: Owner,
    visible_at: Instant,
}

#[derive(Default)]
struct LedgerInner {
    objects: HashMap<ObjectId, StoredObject>,
    tx_count: u64,
}

impl LedgerInner {
    fn visible(&self, id: &ObjectId) -> Option<&StoredObject> {
        self.objects
            .get(id)
            .filter(|stored| Instant::now() >= stored.visible_at)
    }

    fn visible_mut(&mut self, id: &ObjectId) -> Option<&mut StoredObject> {
        self.objects
            .get_mut(id)
            .filter(|stored| Instant::now() >= stored.visible_at)
    }
}

/// In-memory ledger.
///
/// Mutations of existing objects (linking, revocation) apply immediately;
/// only object creation is subject to the visibility lag.
pub struct MemoryLedger {
    config: MemoryLedgerConfig,
    clock: Arc<dyn Clock>,
    inner: RwLock<LedgerInner>,
}

type Abort = (u64, String);

fn abort(code: u64, reason: impl Into<String>) -> Abort {
    (code, reason.into())
}

impl MemoryLedger {
    /// Create a ledger driven by the given ledger clock.
    pub fn new(config: MemoryLedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    /// The package id hosting the gate predicate.
    pub fn package(&self) -> ScopeId {
        self.config.package
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("ledger lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("ledger lock poisoned: {}", e)))
    }

    fn apply(
        &self,
        inner: &mut LedgerInner,
        sender: &Address,
        digest: &Blake3Hash,
        call: LedgerCall,
    ) -> std::result::Result<(Vec<CreatedObject>, Vec<ObjectId>), Abort> {
        let now = self.clock.now_ms();
        let visible_at = Instant::now() + self.config.visibility_lag;
        let new_id = ObjectId::derive(digest.as_bytes(), 0);

        match call {
            LedgerCall::CreatePolicy {
                content_reference,
                required_tier,
            } => {
                let required_tier = parse_tier(required_tier)?;
                let policy = AccessPolicy {
                    id: new_id,
                    creator: *sender,
                    content_reference,
                    required_tier,
                    created_at: now,
                };
                inner.objects.insert(
                    new_id,
                    StoredObject {
                        object: LedgerObject::Policy(policy),
                        owner: Owner::Shared,
                        visible_at,
                    },
                );
                Ok((created(new_id, ObjectKind::AccessPolicy, Owner::Shared), vec![]))
            }

            LedgerCall::CreatePost {
                title,
                description,
                kind,
                blob,
                required_tier,
                encryption,
            } => {
                let required_tier = parse_tier(required_tier)?;
                let post = ContentPost {
                    id: new_id,
                    creator: *sender,
                    title,
                    description,
                    kind,
                    blob,
                    required_tier,
                    encryption,
                    policy: None,
                };
                inner.objects.insert(
                    new_id,
                    StoredObject {
                        object: LedgerObject::Post(post),
                        owner: Owner::Shared,
                        visible_at,
                    },
                );
                Ok((created(new_id, ObjectKind::ContentPost, Owner::Shared), vec![]))
            }

            LedgerCall::LinkPolicy { post, policy } => {
                let policy_creator = match inner.visible(&policy).map(|s| &s.object) {
                    Some(LedgerObject::Policy(p)) => p.creator,
                    _ => {
                        return Err(abort(
                            abort_codes::E_OBJECT_NOT_FOUND,
                            format!("policy {} not found", policy),
                        ))
                    }
                };
                if policy_creator != *sender {
                    return Err(abort(abort_codes::E_NOT_OWNER, "sender did not create policy"));
                }

                match inner.visible_mut(&post).map(|s| &mut s.object) {
                    Some(LedgerObject::Post(p)) => {
                        if p.creator != *sender {
                            return Err(abort(
                                abort_codes::E_NOT_OWNER,
                                "sender did not create post",
                            ));
                        }
                        p.policy = Some(policy);
                    }
                    _ => {
                        return Err(abort(
                            abort_codes::E_OBJECT_NOT_FOUND,
                            format!("post {} not found", post),
                        ))
                    }
                }

                if let Some(LedgerObject::Policy(p)) =
                    inner.visible_mut(&policy).map(|s| &mut s.object)
                {
                    p.content_reference = ContentReference::Post(post);
                }

                Ok((vec![], vec![post, policy]))
            }

            LedgerCall::PurchaseCredential {
                creator,
                tier,
                duration_ms,
            } => {
                let tier = parse_tier(tier)?;
                if duration_ms <= 0 {
                    return Err(abort(
                        abort_codes::E_INVALID_ARGUMENT,
                        "duration must be positive",
                    ));
                }
                let credential = SubscriptionCredential {
                    id: new_id,
                    creator,
                    subscriber: *sender,
                    tier,
                    expires_at: now.saturating_add(duration_ms),
                    revoked: false,
                };
                let owner = Owner::Address(*sender);
                inner.objects.insert(
                    new_id,
                    StoredObject {
                        object: LedgerObject::Credential(credential),
                        owner,
                        visible_at,
                    },
                );
                Ok((created(new_id, ObjectKind::SubscriptionCredential, owner), vec![]))
            }

            LedgerCall::RevokeCredential { credential } => {
                match inner.visible_mut(&credential).map(|s| &mut s.object) {
                    Some(LedgerObject::Credential(c)) => {
                        if c.creator != *sender {
                            return Err(abort(
                                abort_codes::E_NOT_OWNER,
                                "only the creator may revoke",
                            ));
                        }
                        c.revoked = true;
                        Ok((vec![], vec![credential]))
                    }
                    _ => Err(abort(
                        abort_codes::E_OBJECT_NOT_FOUND,
                        format!("credential {} not found", credential),
                    )),
                }
            }
        }
    }

    /// `tier_gate::seal_approve(id, policy, credential, clock)`.
    ///
    /// The policy's content reference is deliberately not consulted: it may
    /// still be a placeholder while the post is being linked.
    fn seal_approve(
        &self,
        inner: &LedgerInner,
        sender: &Address,
        call: &MoveCall,
    ) -> std::result::Result<(), Abort> {
        let [id_arg, policy_arg, credential_arg, clock_arg] = call.arguments.as_slice() else {
            return Err(abort(
                abort_codes::E_INVALID_CALL,
                format!("seal_approve takes 4 arguments, got {}", call.arguments.len()),
            ));
        };

        let id = id_arg
            .as_pure()
            .ok_or_else(|| abort(abort_codes::E_INVALID_CALL, "id must be pure bytes"))
            .and_then(|bytes| {
                EncryptionIdentity::from_bytes(bytes)
                    .map_err(|e| abort(abort_codes::E_INVALID_ARGUMENT, e.to_string()))
            })?;
        let policy_id = object_arg(policy_arg)?;
        let credential_id = object_arg(credential_arg)?;
        if object_arg(clock_arg)? != ObjectId::CLOCK {
            return Err(abort(abort_codes::E_INVALID_CALL, "last argument must be the clock"));
        }

        let policy = match inner.visible(&policy_id).map(|s| &s.object) {
            Some(LedgerObject::Policy(p)) => p,
            _ => {
                return Err(abort(
                    abort_codes::E_OBJECT_NOT_FOUND,
                    format!("policy {} not visible", policy_id),
                ))
            }
        };
        let (credential, owner) = match inner.visible(&credential_id) {
            Some(StoredObject {
                object: LedgerObject::Credential(c),
                owner,
                ..
            }) => (c, owner),
            _ => {
                return Err(abort(
                    abort_codes::E_OBJECT_NOT_FOUND,
                    format!("credential {} not visible", credential_id),
                ))
            }
        };

        if !id.is_bound_to(&policy.id) {
            return Err(abort(abort_codes::E_NO_ACCESS, "identity not bound to policy"));
        }
        if *owner != Owner::Address(*sender) || credential.subscriber != *sender {
            return Err(abort(abort_codes::E_NO_ACCESS, "credential not owned by sender"));
        }
        if credential.creator != policy.creator {
            return Err(abort(abort_codes::E_NO_ACCESS, "credential is for another creator"));
        }
        if !is_authorized(credential, policy.required_tier, self.clock.now_ms()) {
            return Err(abort(abort_codes::E_NO_ACCESS, "credential does not satisfy policy"));
        }

        Ok(())
    }
}

fn parse_tier(level: u8) -> std::result::Result<Tier, Abort> {
    Tier::new(level).map_err(|e| abort(abort_codes::E_INVALID_TIER, e.to_string()))
}

fn object_arg(arg: &CallArg) -> std::result::Result<ObjectId, Abort> {
    arg.as_object()
        .copied()
        .ok_or_else(|| abort(abort_codes::E_INVALID_CALL, "expected object argument"))
}

fn created(id: ObjectId, kind: ObjectKind, owner: Owner) -> Vec<CreatedObject> {
    vec![CreatedObject { id, kind, owner }]
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn execute(&self, sender: &Address, call: LedgerCall) -> Result<TxEffects> {
        let mut inner = self.write()?;
        inner.tx_count += 1;

        let digest = Blake3Hash::derive(
            "tiergate-ledger-tx-v0",
            &[&sender.as_bytes()[..], &inner.tx_count.to_le_bytes()[..]],
        );

        let name = call.name();
        match self.apply(&mut inner, sender, &digest, call) {
            Ok((created, mutated)) => {
                debug!(call = name, tx = ?digest, created = created.len(), "ledger call executed");
                Ok(TxEffects {
                    digest,
                    created,
                    mutated,
                })
            }
            Err((code, reason)) => {
                debug!(call = name, code, %reason, "ledger call aborted");
                Err(StoreError::Aborted { code, reason })
            }
        }
    }

    async fn get_object(&self, id: &ObjectId) -> Result<Option<LedgerObject>> {
        let inner = self.read()?;
        Ok(inner.visible(id).map(|stored| stored.object.clone()))
    }

    async fn owned_objects(&self, owner: &Address) -> Result<Vec<ObjectId>> {
        let inner = self.read()?;
        let mut ids: Vec<ObjectId> = inner
            .objects
            .iter()
            .filter(|(id, stored)| {
                stored.owner == Owner::Address(*owner) && inner.visible(id).is_some()
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn simulate(&self, sender: &Address, tx_kind: &[u8]) -> Result<SimulationOutcome> {
        let kind = match TransactionKind::from_bytes(tx_kind) {
            Ok(kind) => kind,
            Err(e) => {
                return Ok(SimulationOutcome::Abort {
                    code: abort_codes::E_INVALID_CALL,
                    reason: e.to_string(),
                })
            }
        };
        if kind.calls.is_empty() {
            return Ok(SimulationOutcome::Abort {
                code: abort_codes::E_INVALID_CALL,
                reason: "empty transaction".into(),
            });
        }

        let inner = self.read()?;
        for call in &kind.calls {
            if !call.is_seal_approve(&self.config.package) {
                return Ok(SimulationOutcome::Abort {
                    code: abort_codes::E_INVALID_CALL,
                    reason: format!("unknown function {}::{}", call.module, call.function),
                });
            }
            if let Err((code, reason)) = self.seal_approve(&inner, sender, call) {
                trace!(code, %reason, "simulation aborted");
                return Ok(SimulationOutcome::Abort { code, reason });
            }
        }

        Ok(SimulationOutcome::Success)
    }

    async fn now_ms(&self) -> Result<i64> {
        Ok(self.clock.now_ms())
    }
}

/// In-memory, content-addressed blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Bytes>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobId> {
        let id = BlobId::for_content(&data);
        let mut blobs = self
            .blobs
            .write()
            .map_err(|e| StoreError::Unavailable(format!("blob lock poisoned: {}", e)))?;
        blobs.entry(id).or_insert(data);
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> Result<Bytes> {
        let blobs = self
            .blobs
            .read()
            .map_err(|e| StoreError::Unavailable(format!("blob lock poisoned: {}", e)))?;
        blobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiergate_core::{
        ContentKind, EncryptionIdentity, Keypair, ManualClock, GATE_MODULE, SEAL_APPROVE,
    };

    const LAG: Duration = Duration::from_millis(100);

    fn ledger() -> (MemoryLedger, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let config = MemoryLedgerConfig {
            package: ScopeId::from_bytes([7; 32]),
            visibility_lag: LAG,
        };
        (MemoryLedger::new(config, Arc::new(clock.clone())), clock)
    }

    async fn settle() {
        tokio::time::sleep(LAG).await;
    }

    async fn create_policy(ledger: &MemoryLedger, creator: &Address, tier: u8) -> ObjectId {
        let effects = ledger
            .execute(
                creator,
                LedgerCall::CreatePolicy {
                    content_reference: ContentReference::Placeholder,
                    required_tier: tier,
                },
            )
            .await
            .unwrap();
        effects
            .find_created(ObjectKind::AccessPolicy, Owner::Shared)
            .unwrap()
    }

    async fn purchase(
        ledger: &MemoryLedger,
        subscriber: &Address,
        creator: &Address,
        tier: u8,
    ) -> ObjectId {
        let effects = ledger
            .execute(
                subscriber,
                LedgerCall::PurchaseCredential {
                    creator: *creator,
                    tier,
                    duration_ms: 60_000,
                },
            )
            .await
            .unwrap();
        effects
            .find_created(ObjectKind::SubscriptionCredential, Owner::Address(*subscriber))
            .unwrap()
    }

    fn approve_kind(package: ScopeId, id: &EncryptionIdentity, policy: ObjectId, credential: ObjectId) -> Vec<u8> {
        TransactionKind {
            calls: vec![MoveCall {
                package,
                module: GATE_MODULE.into(),
                function: SEAL_APPROVE.into(),
                arguments: vec![
                    CallArg::Pure(id.as_bytes().to_vec()),
                    CallArg::Object(policy),
                    CallArg::Object(credential),
                    CallArg::Object(ObjectId::CLOCK),
                ],
            }],
        }
        .to_bytes()
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_object_invisible_until_lag_elapses() {
        let (ledger, _) = ledger();
        let creator = Keypair::generate().address();

        let policy = create_policy(&ledger, &creator, 2).await;
        assert!(ledger.get_policy(&policy).await.unwrap().is_none());

        settle().await;
        let read = ledger.get_policy(&policy).await.unwrap().unwrap();
        assert_eq!(read.creator, creator);
        assert_eq!(read.required_tier, Tier::new(2).unwrap());
        assert_eq!(read.content_reference, ContentReference::Placeholder);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_tier_is_aborted() {
        let (ledger, _) = ledger();
        let err = ledger
            .execute(
                &Address::from_bytes([1; 32]),
                LedgerCall::CreatePolicy {
                    content_reference: ContentReference::Placeholder,
                    required_tier: 9,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Aborted {
                code: abort_codes::E_INVALID_TIER,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_requires_visible_objects_and_ownership() {
        let (ledger, _) = ledger();
        let creator = Keypair::generate().address();
        let stranger = Keypair::generate().address();

        let policy = create_policy(&ledger, &creator, 1).await;
        let post = ledger
            .execute(
                &creator,
                LedgerCall::CreatePost {
                    title: "t".into(),
                    description: "d".into(),
                    kind: ContentKind::Text,
                    blob: BlobId::for_content(b"x"),
                    required_tier: 1,
                    encryption: None,
                },
            )
            .await
            .unwrap()
            .find_created(ObjectKind::ContentPost, Owner::Shared)
            .unwrap();

        let link = LedgerCall::LinkPolicy { post, policy };
        let early = ledger.execute(&creator, link.clone()).await.unwrap_err();
        assert!(matches!(
            early,
            StoreError::Aborted {
                code: abort_codes::E_OBJECT_NOT_FOUND,
                ..
            }
        ));

        settle().await;
        let foreign = ledger.execute(&stranger, link.clone()).await.unwrap_err();
        assert!(matches!(
            foreign,
            StoreError::Aborted {
                code: abort_codes::E_NOT_OWNER,
                ..
            }
        ));

        ledger.execute(&creator, link.clone()).await.unwrap();
        // Idempotent repair.
        ledger.execute(&creator, link).await.unwrap();

        let post = ledger.get_post(&post).await.unwrap().unwrap();
        assert_eq!(post.policy, Some(policy));
        let policy = ledger.get_policy(&policy).await.unwrap().unwrap();
        assert_eq!(policy.content_reference, ContentReference::Post(post.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_enforces_tier_and_expiry_on_ledger_clock() {
        let (ledger, clock) = ledger();
        let creator = Keypair::generate().address();
        let fan = Keypair::generate().address();

        let policy = create_policy(&ledger, &creator, 2).await;
        let low = purchase(&ledger, &fan, &creator, 1).await;
        let high = purchase(&ledger, &fan, &creator, 3).await;
        settle().await;

        let id = EncryptionIdentity::derive(&policy);
        let package = ledger.package();

        let denied = ledger
            .simulate(&fan, &approve_kind(package, &id, policy, low))
            .await
            .unwrap();
        assert!(matches!(
            denied,
            SimulationOutcome::Abort {
                code: abort_codes::E_NO_ACCESS,
                ..
            }
        ));

        let allowed = ledger
            .simulate(&fan, &approve_kind(package, &id, policy, high))
            .await
            .unwrap();
        assert!(allowed.is_success());

        clock.advance(60_000);
        let expired = ledger
            .simulate(&fan, &approve_kind(package, &id, policy, high))
            .await
            .unwrap();
        assert!(!expired.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_rejects_foreign_credential_and_identity() {
        let (ledger, _) = ledger();
        let creator = Keypair::generate().address();
        let fan = Keypair::generate().address();
        let thief = Keypair::generate().address();

        let policy = create_policy(&ledger, &creator, 1).await;
        let other_policy = create_policy(&ledger, &creator, 1).await;
        let credential = purchase(&ledger, &fan, &creator, 3).await;
        settle().await;

        let package = ledger.package();
        let id = EncryptionIdentity::derive(&policy);

        // Someone else's credential.
        let stolen = ledger
            .simulate(&thief, &approve_kind(package, &id, policy, credential))
            .await
            .unwrap();
        assert!(!stolen.is_success());

        // Identity anchored to a different policy.
        let foreign_id = EncryptionIdentity::derive(&other_policy);
        let mismatched = ledger
            .simulate(&fan, &approve_kind(package, &foreign_id, policy, credential))
            .await
            .unwrap();
        assert!(!mismatched.is_success());

        // Wrong package.
        let wrong_package = ledger
            .simulate(
                &fan,
                &approve_kind(ScopeId::ZERO, &id, policy, credential),
            )
            .await
            .unwrap();
        assert!(!wrong_package.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_fails_before_policy_is_visible() {
        let (ledger, _) = ledger();
        let creator = Keypair::generate().address();
        let fan = Keypair::generate().address();

        let credential = purchase(&ledger, &fan, &creator, 3).await;
        settle().await;
        let policy = create_policy(&ledger, &creator, 1).await;

        let id = EncryptionIdentity::derive(&policy);
        let outcome = ledger
            .simulate(&fan, &approve_kind(ledger.package(), &id, policy, credential))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SimulationOutcome::Abort {
                code: abort_codes::E_OBJECT_NOT_FOUND,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revocation_is_creator_only() {
        let (ledger, _) = ledger();
        let creator = Keypair::generate().address();
        let fan = Keypair::generate().address();
        let credential = purchase(&ledger, &fan, &creator, 2).await;
        settle().await;

        let call = LedgerCall::RevokeCredential { credential };
        assert!(ledger.execute(&fan, call.clone()).await.is_err());
        ledger.execute(&creator, call).await.unwrap();

        let c = ledger.get_credential(&credential).await.unwrap().unwrap();
        assert!(c.revoked);
        assert_eq!(ledger.owned_objects(&fan).await.unwrap(), vec![credential]);
    }

    #[tokio::test]
    async fn test_garbage_simulation_aborts() {
        let (ledger, _) = ledger();
        let outcome = ledger
            .simulate(&Address::ZERO, b"not cbor at all")
            .await
            .unwrap();
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_blob_store_content_addressed() {
        let store = MemoryBlobStore::new();
        let a = store.put(Bytes::from_static(b"payload")).await.unwrap();
        let b = store.put(Bytes::from_static(b"payload")).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a).await.unwrap(), Bytes::from_static(b"payload"));
        assert!(matches!(
            store.get(&BlobId::ZERO).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
