//! Content-addressable object store for image bytes.
//!
//! Blobs are keyed by [`ContentHash`] and written at most once per key.
//! Metadata lives in the catalog; this layer only holds bytes.

mod filesystem;
mod memory;

pub use filesystem::FsContentStore;
pub use memory::MemoryContentStore;

use crate::error::Result;
use crate::identity::ContentHash;

/// Result of a [`ContentStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The blob was written by this call.
    Stored,
    /// A blob already existed under the hash; nothing was written.
    AlreadyPresent,
}

/// Trait for pluggable blob backends.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    ///
    /// Called once at startup. `put` and `get` fail with a storage failure
    /// until the bucket exists.
    async fn ensure_bucket(&self) -> Result<()>;

    /// Store `bytes` under `hash`. Idempotent: an existing object is left untouched.
    async fn put(&self, hash: &ContentHash, bytes: &[u8]) -> Result<PutOutcome>;

    /// Fetch the bytes stored under `hash`. NotFound if there is no such object.
    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>>;

    async fn exists(&self, hash: &ContentHash) -> Result<bool>;

    /// Name of the bucket this store writes into.
    fn bucket(&self) -> &str;
}
