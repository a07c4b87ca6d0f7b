//! Collaborator seams. Flows hold these as `Arc<dyn ...>` and never reach
//! for a global client.

pub mod blobs;
pub mod documents;
pub mod identity;
pub mod memory;

pub use blobs::{BlobHandle, BlobStore};
pub use documents::{
    sort_records, Direction, Document, DocumentStore, OrderBy, SnapshotStream, StoredRecord,
    CREATED_AT,
};
pub use identity::IdentityProvider;
pub use memory::{MemoryBlobStore, MemoryDocumentStore, MemoryIdentity};
