//! # tiergate testkit
//!
//! Testing utilities for tiergate.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: [`TestNetwork`], an in-memory ledger, blob store and key
//!   servers with independently driven clocks
//! - **Faults**: wrappers that make the blob store, the ledger or a key
//!   server fail on demand
//! - **Generators**: Proptest strategies for identities, credentials and
//!   threshold configurations
//!
//! ## Test Fixtures
//!
//! ```rust
//! use tiergate_testkit::TestNetwork;
//!
//! let net = TestNetwork::builder().servers(3, 2).build();
//! let client = net.client();
//! assert_eq!(client.scope(), net.scope);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tiergate_testkit::generators::{credential_near, tier};
//!
//! proptest! {
//!     #[test]
//!     fn revoked_never_passes(credential in credential_near(0), required in tier()) {
//!         let mut credential = credential;
//!         credential.revoked = true;
//!         prop_assert!(!tiergate_core::is_authorized(&credential, required, 0));
//!     }
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::{DenyingKeyServer, FlakyBlobStore, FlakyLedger, LedgerFault, OfflineKeyServer};
pub use fixtures::{init_tracing, parties, TestNetwork, TestNetworkBuilder, GENESIS_MS};
pub use generators::ServerSet;
