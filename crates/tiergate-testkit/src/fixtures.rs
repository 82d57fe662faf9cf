//! Test fixtures and helpers.
//!
//! [`TestNetwork`] wires an in-memory ledger, blob store and key servers
//! together with three manual clocks: the ledger clock (authoritative for
//! credential expiry), the client's wall clock and the key servers' wall
//! clock. Tests move them independently to model skew.

use std::sync::{Arc, Once};
use std::time::Duration;

use tiergate::{Client, ClientConfig};
use tiergate_core::{Keypair, ManualClock, ObjectId, ScopeId};
use tiergate_keyserver::{KeyServer, KeyServerConfig, MemoryKeyServer, SealClient, SealClientConfig};
use tiergate_store::{
    BlobStore, Ledger, MemoryBlobStore, MemoryLedger, MemoryLedgerConfig, RetryPolicy,
};

/// Start time shared by every fixture clock.
pub const GENESIS_MS: i64 = 1_700_000_000_000;

static TRACING: Once = Once::new();

/// Install a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Builder for [`TestNetwork`].
#[derive(Debug, Clone)]
pub struct TestNetworkBuilder {
    servers: u8,
    threshold: u8,
    open_access: bool,
    visibility_lag: Duration,
    session_ttl_minutes: u32,
}

impl Default for TestNetworkBuilder {
    fn default() -> Self {
        Self {
            servers: 3,
            threshold: 2,
            open_access: false,
            visibility_lag: Duration::from_millis(250),
            session_ttl_minutes: 10,
        }
    }
}

impl TestNetworkBuilder {
    /// `threshold` of `servers` key servers must approve.
    pub fn servers(mut self, servers: u8, threshold: u8) -> Self {
        self.servers = servers;
        self.threshold = threshold;
        self
    }

    /// Let key servers release keys without a verification transaction.
    pub fn open_access(mut self) -> Self {
        self.open_access = true;
        self
    }

    pub fn visibility_lag(mut self, lag: Duration) -> Self {
        self.visibility_lag = lag;
        self
    }

    pub fn session_ttl_minutes(mut self, minutes: u32) -> Self {
        self.session_ttl_minutes = minutes;
        self
    }

    pub fn build(self) -> TestNetwork {
        init_tracing();

        let ledger_clock = ManualClock::new(GENESIS_MS);
        let wall_clock = ManualClock::new(GENESIS_MS);
        let server_clock = ManualClock::new(GENESIS_MS);

        let ledger = Arc::new(MemoryLedger::new(
            MemoryLedgerConfig {
                visibility_lag: self.visibility_lag,
                ..MemoryLedgerConfig::default()
            },
            Arc::new(ledger_clock.clone()),
        ));
        let scope = ledger.package();

        let key_servers = (1..=self.servers)
            .map(|i| {
                Arc::new(MemoryKeyServer::new(
                    format!("ks-{}", i),
                    ObjectId::from_bytes([i; 32]),
                    KeyServerConfig {
                        scope,
                        allow_open_access: self.open_access,
                    },
                    ledger.clone(),
                    Arc::new(server_clock.clone()),
                ))
            })
            .collect();

        let mut config = ClientConfig::for_scope(scope);
        config.threshold = self.threshold;
        config.session_ttl_minutes = self.session_ttl_minutes;
        config.retry = RetryPolicy::fixed(3, Duration::from_millis(50));

        TestNetwork {
            ledger,
            blobs: Arc::new(MemoryBlobStore::new()),
            key_servers,
            scope,
            config,
            ledger_clock,
            wall_clock,
            server_clock,
        }
    }
}

/// In-memory collaborators for end-to-end tests.
pub struct TestNetwork {
    pub ledger: Arc<MemoryLedger>,
    pub blobs: Arc<MemoryBlobStore>,
    pub key_servers: Vec<Arc<MemoryKeyServer>>,
    pub scope: ScopeId,
    pub config: ClientConfig,
    pub ledger_clock: ManualClock,
    pub wall_clock: ManualClock,
    pub server_clock: ManualClock,
}

impl TestNetwork {
    pub fn builder() -> TestNetworkBuilder {
        TestNetworkBuilder::default()
    }

    /// Three gated key servers, threshold two.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// The key servers as trait objects, in configuration order.
    pub fn key_server_handles(&self) -> Vec<Arc<dyn KeyServer>> {
        self.key_servers
            .iter()
            .map(|s| s.clone() as Arc<dyn KeyServer>)
            .collect()
    }

    /// A recovery client over every key server.
    pub fn seal_client(&self) -> SealClient {
        self.seal_client_with(self.key_server_handles())
    }

    pub fn seal_client_with(&self, servers: Vec<Arc<dyn KeyServer>>) -> SealClient {
        let config = SealClientConfig {
            retry: self.config.retry.clone(),
        };
        SealClient::new(self.scope, servers, config)
            .expect("fixture seal client")
            .with_clock(Arc::new(self.wall_clock.clone()))
    }

    /// A client over the network's own collaborators.
    pub fn client(&self) -> Client {
        self.client_with(
            self.ledger.clone(),
            self.blobs.clone(),
            self.key_server_handles(),
        )
    }

    /// A client with some collaborators replaced, e.g. by fault injectors.
    pub fn client_with(
        &self,
        ledger: Arc<dyn Ledger>,
        blobs: Arc<dyn BlobStore>,
        servers: Vec<Arc<dyn KeyServer>>,
    ) -> Client {
        Client::new(
            ledger,
            blobs,
            Arc::new(self.seal_client_with(servers)),
            self.config.clone(),
            Arc::new(self.wall_clock.clone()),
        )
        .expect("fixture client")
    }

    /// Move every clock forward together.
    pub fn advance(&self, delta: Duration) {
        let ms = i64::try_from(delta.as_millis()).unwrap_or(i64::MAX);
        self.ledger_clock.advance(ms);
        self.wall_clock.advance(ms);
        self.server_clock.advance(ms);
    }

    /// Total key-release requests the servers have granted.
    pub fn keys_served(&self) -> u64 {
        self.key_servers.iter().map(|s| s.served()).sum()
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic keypairs for multi-party tests.
pub fn parties(count: u8) -> Vec<Keypair> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i;
            seed[31] = 0x7a;
            Keypair::from_seed(&seed)
        })
        .collect()
}
