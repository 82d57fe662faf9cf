//! # tiergate
//!
//! Tier-gated content with threshold encryption and no central gatekeeper.
//!
//! ## Overview
//!
//! A publisher gates content behind a subscription tier. Only holders of
//! an unexpired, unrevoked credential of at least that tier can recover
//! the plaintext, and no single party ever holds the decryption key:
//!
//! - **Ledger**: holds access policies, posts and credentials
//! - **Blob store**: holds the ciphertext
//! - **Key servers**: each releases a key only after simulating the
//!   policy's `seal_approve` predicate on the ledger
//!
//! [`Client`] sequences the three. Nothing commits across them
//! atomically, so publishing is a state machine with a repair step
//! rather than a transaction.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tiergate::{Client, ClientConfig, PublishRequest};
//! use tiergate::core::{ContentKind, Keypair, ObjectId, SystemClock, Tier};
//! use tiergate::keyserver::{KeyServer, KeyServerConfig, MemoryKeyServer, SealClient, SealClientConfig};
//! use tiergate::store::{MemoryBlobStore, MemoryLedger, MemoryLedgerConfig};
//!
//! async fn example() -> tiergate::Result<()> {
//!     let ledger = Arc::new(MemoryLedger::new(MemoryLedgerConfig::default(), Arc::new(SystemClock)));
//!     let scope = ledger.package();
//!     let server: Arc<dyn KeyServer> = Arc::new(MemoryKeyServer::new(
//!         "ks-1",
//!         ObjectId::from_bytes([1; 32]),
//!         KeyServerConfig::gated(scope),
//!         ledger.clone(),
//!         Arc::new(SystemClock),
//!     ));
//!     let seal = SealClient::new(scope, vec![server], SealClientConfig::default())?;
//!
//!     let client = Client::new(
//!         ledger,
//!         Arc::new(MemoryBlobStore::new()),
//!         Arc::new(seal),
//!         ClientConfig::for_scope(scope),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let creator = Keypair::generate();
//!     let receipt = client
//!         .publish(
//!             &creator.address(),
//!             PublishRequest {
//!                 title: "Episode 1".into(),
//!                 description: "for members".into(),
//!                 kind: ContentKind::Audio,
//!                 required_tier: Tier::new(2)?,
//!                 content: Bytes::from_static(b"..."),
//!             },
//!         )
//!         .await?;
//!     for warning in &receipt.warnings {
//!         eprintln!("{}", warning);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tiergate::core` - records, Tier Gate, identities
//! - `tiergate::store` - ledger and blob store seams, reference cache
//! - `tiergate::seal` - encryption envelope, sessions, verification transactions
//! - `tiergate::keyserver` - key servers and the recovery client

pub mod client;
pub mod config;
pub mod error;
pub mod publish;
pub mod session;
pub mod view;

pub use tiergate_core as core;
pub use tiergate_keyserver as keyserver;
pub use tiergate_seal as seal;
pub use tiergate_store as store;

pub use client::Client;
pub use config::{ClientConfig, SettleConfig};
pub use error::{Result, TierGateError};
pub use publish::{PublishReceipt, PublishRequest, PublishStage, PublishWarning};
pub use session::SessionManager;

pub use tiergate_core::{
    Address, ContentKind, ContentPost, EncryptionMetadata, Keypair, ObjectId,
    SubscriptionCredential, Tier,
};
