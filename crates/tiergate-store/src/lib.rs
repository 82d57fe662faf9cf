//! # tiergate store
//!
//! Seams to the external collaborators tiergate depends on: the ledger
//! that holds policies, posts and credentials, and the blob store that
//! holds encrypted payloads. Also the local SQLite reference cache and
//! the retry policy shared by every transport-facing call.
//!
//! ## Key Types
//!
//! - [`Ledger`] - async ledger interface with eventual visibility
//! - [`MemoryLedger`] - in-memory ledger that simulates `seal_approve`
//! - [`BlobStore`] / [`MemoryBlobStore`] - content-addressed payload storage
//! - [`ReferenceCache`] - advisory local state (last references, pending links)
//! - [`RetryPolicy`] / [`retry`] - bounded backoff for transport failures
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiergate_core::{ContentReference, Keypair, SystemClock};
//! use tiergate_store::{Ledger, LedgerCall, MemoryLedger, MemoryLedgerConfig};
//!
//! async fn example() {
//!     let ledger = MemoryLedger::new(MemoryLedgerConfig::default(), Arc::new(SystemClock));
//!     let creator = Keypair::generate().address();
//!
//!     let effects = ledger
//!         .execute(
//!             &creator,
//!             LedgerCall::CreatePolicy {
//!                 content_reference: ContentReference::Placeholder,
//!                 required_tier: 2,
//!             },
//!         )
//!         .await
//!         .unwrap();
//!     // The new policy is not readable until the ledger settles.
//!     let _ = effects;
//! }
//! ```

pub mod blob;
pub mod cache;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod migration;
pub mod retry;

pub use blob::BlobStore;
pub use cache::{PendingLink, RefKind, ReferenceCache};
pub use error::{Result, StoreError};
pub use ledger::{
    abort_codes, CreatedObject, Ledger, LedgerCall, LedgerObject, ObjectKind, Owner,
    SimulationOutcome, TxEffects,
};
pub use memory::{MemoryBlobStore, MemoryLedger, MemoryLedgerConfig};
pub use retry::{duration_ms, retry, BackoffStrategy, RetryPolicy};
