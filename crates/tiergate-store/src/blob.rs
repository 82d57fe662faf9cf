//! Blob store trait: opaque storage for (usually encrypted) payloads.

use async_trait::async_trait;
use bytes::Bytes;

use tiergate_core::BlobId;

use crate::error::Result;

/// Content-addressed payload storage.
///
/// The store never sees plaintext for gated content; it holds the
/// ciphertext produced by the seal layer.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload and return its id. Storing the same bytes twice
    /// returns the same id.
    async fn put(&self, data: Bytes) -> Result<BlobId>;

    /// Fetch a payload. Missing blobs surface as [`crate::StoreError::NotFound`].
    async fn get(&self, id: &BlobId) -> Result<Bytes>;
}
