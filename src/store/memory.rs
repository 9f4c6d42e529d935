//! In-process blob backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{ContentStore, PutOutcome};
use crate::error::{CoreError, Result};
use crate::identity::ContentHash;

/// Blob store held in memory. Used by tests and ephemeral runs.
pub struct MemoryContentStore {
    bucket: String,
    ready: AtomicBool,
    objects: RwLock<HashMap<ContentHash, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ready: AtomicBool::new(false),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of distinct blobs held.
    pub fn object_count(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Drop a blob out from under the catalog.
    pub fn remove(&self, hash: &ContentHash) -> bool {
        self.objects
            .write()
            .map(|mut o| o.remove(hash).is_some())
            .unwrap_or(false)
    }

    fn require_bucket(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::storage(
                format!("bucket {}", self.bucket),
                std::io::Error::new(std::io::ErrorKind::NotFound, "bucket does not exist"),
            ))
        }
    }

    fn poisoned() -> CoreError {
        CoreError::storage(
            "memory store",
            std::io::Error::new(std::io::ErrorKind::Other, "lock poisoned"),
        )
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new("images")
    }
}

#[async_trait::async_trait]
impl ContentStore for MemoryContentStore {
    async fn ensure_bucket(&self) -> Result<()> {
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn put(&self, hash: &ContentHash, bytes: &[u8]) -> Result<PutOutcome> {
        self.require_bucket()?;
        let mut objects = self.objects.write().map_err(|_| Self::poisoned())?;
        if objects.contains_key(hash) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        objects.insert(hash.clone(), bytes.to_vec());
        Ok(PutOutcome::Stored)
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        self.require_bucket()?;
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        objects
            .get(hash)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("blob {hash} in bucket {}", self.bucket)))
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool> {
        self.require_bucket()?;
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects.contains_key(hash))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_put_get_and_dedup() {
        let store = MemoryContentStore::default();
        store.ensure_bucket().await.unwrap();
        let hash = ContentHash::of(b"blob");

        assert_eq!(store.put(&hash, b"blob").await.unwrap(), PutOutcome::Stored);
        assert_eq!(
            store.put(&hash, b"blob").await.unwrap(),
            PutOutcome::AlreadyPresent
        );
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.get(&hash).await.unwrap(), b"blob");

        assert!(store.remove(&hash));
        let err = store.get(&hash).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_requires_bucket() {
        let store = MemoryContentStore::default();
        let hash = ContentHash::of(b"x");
        let err = store.get(&hash).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        let err = store.exists(&hash).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);

        store.ensure_bucket().await.unwrap();
        assert!(!store.exists(&hash).await.unwrap());
    }
}
