use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Reference to an uploaded object, as returned by [`BlobStore::upload`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub key: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under a caller-chosen key. Keys must be unique per
    /// object; the store does not detect collisions.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<BlobHandle, StoreError>;

    /// Durable URL for an uploaded object.
    async fn retrieval_url(&self, handle: &BlobHandle) -> Result<String, StoreError>;

    /// Resolve a retrieval URL back to the stored bytes.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError>;
}
