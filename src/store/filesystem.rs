//! Filesystem blob backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ContentStore, PutOutcome};
use crate::error::{CoreError, Result};
use crate::identity::ContentHash;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores blobs under `{root}/{bucket}/{hash[0:2]}/{hash[2:4]}/{hash}`.
///
/// Writes go to a uniquely named temp file in the target directory and are
/// renamed into place, so readers never observe a partial object. Reads
/// re-hash the bytes and report a mismatch as a consistency violation.
pub struct FsContentStore {
    bucket: String,
    bucket_path: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let bucket_path = root.into().join(&bucket);
        Self {
            bucket,
            bucket_path,
        }
    }

    pub fn bucket_path(&self) -> &Path {
        &self.bucket_path
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.as_str();
        self.bucket_path
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(hex)
    }

    async fn require_bucket(&self) -> Result<()> {
        let present = tokio::fs::try_exists(&self.bucket_path)
            .await
            .map_err(|e| CoreError::storage(format!("check bucket {}", self.bucket), e))?;
        if present {
            Ok(())
        } else {
            Err(CoreError::storage(
                format!("bucket {}", self.bucket),
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", self.bucket_path.display()),
                ),
            ))
        }
    }
}

#[async_trait::async_trait]
impl ContentStore for FsContentStore {
    #[tracing::instrument(skip(self), fields(bucket = %self.bucket))]
    async fn ensure_bucket(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.bucket_path)
            .await
            .map_err(|e| {
                CoreError::storage(format!("create bucket {}", self.bucket_path.display()), e)
            })?;
        tracing::info!(path = %self.bucket_path.display(), "Bucket ready");
        Ok(())
    }

    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, hash: &ContentHash, bytes: &[u8]) -> Result<PutOutcome> {
        self.require_bucket().await?;
        let path = self.object_path(hash);

        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CoreError::storage(format!("stat {}", path.display()), e))?
        {
            tracing::debug!(%hash, "Blob already present");
            return Ok(PutOutcome::AlreadyPresent);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::storage(format!("create {}", parent.display()), e))?;
        }

        let temp_path = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CoreError::storage(format!("write {}", temp_path.display()), e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CoreError::storage(
                format!("rename {} to {}", temp_path.display(), path.display()),
                e,
            ));
        }

        tracing::info!(%hash, size = bytes.len(), "Stored blob");
        Ok(PutOutcome::Stored)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        self.require_bucket().await?;
        let path = self.object_path(hash);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::not_found(format!(
                    "blob {hash} in bucket {}",
                    self.bucket
                )));
            }
            Err(e) => return Err(CoreError::storage(format!("read {}", path.display()), e)),
        };

        let actual = ContentHash::of(&bytes);
        if &actual != hash {
            return Err(CoreError::consistency(format!(
                "blob {hash} holds content hashing to {actual}"
            )));
        }

        tracing::debug!(%hash, size = bytes.len(), "Read blob");
        Ok(bytes)
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool> {
        let path = self.object_path(hash);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CoreError::storage(format!("stat {}", path.display()), e))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
