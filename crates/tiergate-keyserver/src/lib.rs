//! # tiergate keyserver
//!
//! Threshold key release for tier-gated content.
//!
//! ## Overview
//!
//! A key server holds one X25519 secret and serves exactly one scope. It
//! releases the key for an encryption identity only when:
//!
//! - the request carries a valid, unexpired session certificate
//! - the request body is signed by that session
//! - a `seal_approve` call for the identity simulates successfully on the
//!   ledger as the session's address
//!
//! [`SealClient`] fans a request out to the configured servers in order,
//! stops once every ciphertext has `threshold` released keys and decrypts
//! locally. No single server ever sees a plaintext or a data key.
//!
//! ## Message Flow
//!
//! ```text
//! Client                               Key server
//!   |-------- FetchKeyRequest --------->|  certificate, signature,
//!   |                                   |  verification tx, ids
//!   |                                   |--- simulate seal_approve ---> Ledger
//!   |<------- FetchKeyResponse ---------|  keys wrapped to the session
//! ```

pub mod client;
pub mod error;
pub mod messages;
pub mod transport;

pub use client::{ReleasedKeys, SealClient, SealClientConfig};
pub use error::{KeyServerError, RecoveryError, RecoveryResult, Result};
pub use messages::{
    limits, FetchKeyRequest, FetchKeyResponse, KeyRequest, ServerInfo, PROTOCOL_VERSION,
};
pub use transport::{
    memory::{KeyServerConfig, MemoryKeyServer},
    KeyServer,
};
