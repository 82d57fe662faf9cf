//! Fault-injecting wrappers around the collaborators.
//!
//! Each wrapper delegates to a real implementation and fails on demand
//! with the error a real network would produce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use tiergate_core::{Address, BlobId, ObjectId};
use tiergate_keyserver::{FetchKeyRequest, FetchKeyResponse, KeyServer, KeyServerError, ServerInfo};
use tiergate_store::{
    abort_codes, BlobStore, Ledger, LedgerCall, LedgerObject, SimulationOutcome, StoreError,
    TxEffects,
};

/// Decrement `counter` if positive; true when a failure should be injected.
fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// A blob store whose next calls fail with a transport error.
pub struct FlakyBlobStore {
    inner: Arc<dyn BlobStore>,
    put_failures: AtomicU32,
    get_failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            put_failures: AtomicU32::new(0),
            get_failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` puts.
    pub fn fail_puts(&self, n: u32) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` gets.
    pub fn fail_gets(&self, n: u32) {
        self.get_failures.store(n, Ordering::SeqCst);
    }

    /// Calls received, including failed ones.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, data: Bytes) -> tiergate_store::Result<BlobId> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.put_failures) {
            return Err(StoreError::Unavailable("blob store: connection reset".into()));
        }
        self.inner.put(data).await
    }

    async fn get(&self, id: &BlobId) -> tiergate_store::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.get_failures) {
            return Err(StoreError::Unavailable("blob store: timed out".into()));
        }
        self.inner.get(id).await
    }
}

/// How an injected ledger failure presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFault {
    /// The RPC endpoint is unreachable; retryable.
    Unavailable,
    /// The call aborts on chain; not retryable.
    Abort,
}

/// A ledger that fails selected calls by name.
pub struct FlakyLedger {
    inner: Arc<dyn Ledger>,
    faults: Mutex<HashMap<&'static str, (LedgerFault, u32)>>,
}

impl FlakyLedger {
    pub fn new(inner: Arc<dyn Ledger>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `times` calls named `call` (see [`LedgerCall::name`]).
    pub fn fail(&self, call: &'static str, fault: LedgerFault, times: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(call, (fault, times));
        }
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    fn injected(&self, call: &'static str) -> Option<LedgerFault> {
        let mut faults = self.faults.lock().ok()?;
        let (fault, remaining) = faults.get_mut(call)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(*fault)
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn execute(&self, sender: &Address, call: LedgerCall) -> tiergate_store::Result<TxEffects> {
        match self.injected(call.name()) {
            Some(LedgerFault::Unavailable) => Err(StoreError::Unavailable(format!(
                "ledger rpc unreachable during {}",
                call.name()
            ))),
            Some(LedgerFault::Abort) => Err(StoreError::Aborted {
                code: abort_codes::E_OBJECT_NOT_FOUND,
                reason: format!("injected abort in {}", call.name()),
            }),
            None => self.inner.execute(sender, call).await,
        }
    }

    async fn get_object(&self, id: &ObjectId) -> tiergate_store::Result<Option<LedgerObject>> {
        self.inner.get_object(id).await
    }

    async fn owned_objects(&self, owner: &Address) -> tiergate_store::Result<Vec<ObjectId>> {
        self.inner.owned_objects(owner).await
    }

    async fn simulate(
        &self,
        sender: &Address,
        tx_kind: &[u8],
    ) -> tiergate_store::Result<SimulationOutcome> {
        self.inner.simulate(sender, tx_kind).await
    }

    async fn now_ms(&self) -> tiergate_store::Result<i64> {
        self.inner.now_ms().await
    }
}

/// A key server that refuses every request.
pub struct DenyingKeyServer {
    info: ServerInfo,
}

impl DenyingKeyServer {
    /// Impersonate `inner`'s identity without ever releasing a key.
    pub fn wrap(inner: &dyn KeyServer) -> Self {
        Self { info: inner.info() }
    }
}

#[async_trait]
impl KeyServer for DenyingKeyServer {
    fn info(&self) -> ServerInfo {
        self.info.clone()
    }

    async fn fetch_keys(
        &self,
        _request: &FetchKeyRequest,
    ) -> tiergate_keyserver::Result<FetchKeyResponse> {
        Err(KeyServerError::AccessDenied {
            code: abort_codes::E_NO_ACCESS,
            reason: format!("{} denies everyone", self.info.name),
        })
    }
}

/// A key server that is unreachable for its next `outages` requests.
pub struct OfflineKeyServer {
    inner: Arc<dyn KeyServer>,
    outages: AtomicU32,
    attempts: AtomicU32,
}

impl OfflineKeyServer {
    pub fn new(inner: Arc<dyn KeyServer>, outages: u32) -> Self {
        Self {
            inner,
            outages: AtomicU32::new(outages),
            attempts: AtomicU32::new(0),
        }
    }

    /// Never comes back.
    pub fn down(inner: Arc<dyn KeyServer>) -> Self {
        Self::new(inner, u32::MAX)
    }

    /// Requests received, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyServer for OfflineKeyServer {
    fn info(&self) -> ServerInfo {
        self.inner.info()
    }

    async fn fetch_keys(
        &self,
        request: &FetchKeyRequest,
    ) -> tiergate_keyserver::Result<FetchKeyResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take(&self.outages) {
            return Err(KeyServerError::Unavailable(format!(
                "{} is unreachable",
                self.inner.info().name
            )));
        }
        self.inner.fetch_keys(request).await
    }
}
