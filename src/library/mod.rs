//! Shared service context: the catalog plus the content store.
//!
//! Built once at startup and shared behind an `Arc` by whatever front-end
//! drives it. Holds no global state and spawns no background tasks.

mod ingest;
mod query;

pub use ingest::{IngestFailure, IngestReport, IngestRequest, Upload};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Config;
use crate::db::{Account, Catalog, NewAccount};
use crate::error::{CoreError, Result};
use crate::store::{ContentStore, FsContentStore};

pub struct Library {
    catalog: Arc<Catalog>,
    store: Arc<dyn ContentStore>,
    io_timeout: Duration,
}

impl Library {
    /// Open the configured catalog and content store, creating the schema
    /// and bucket if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let db_config = config.db.clone();
        let catalog = tokio::task::spawn_blocking(move || Catalog::open(&db_config)).await??;
        let store = FsContentStore::new(config.store.root.clone(), config.store.bucket.clone());
        Self::new(catalog, Arc::new(store), config.ingest.io_timeout()).await
    }

    pub async fn new(
        catalog: Catalog,
        store: Arc<dyn ContentStore>,
        io_timeout: Duration,
    ) -> Result<Self> {
        let library = Self {
            catalog: Arc::new(catalog),
            store,
            io_timeout,
        };
        library.run_catalog(|catalog| catalog.initialize()).await?;
        library.store.ensure_bucket().await?;
        tracing::info!(bucket = library.store.bucket(), "Library ready");
        Ok(library)
    }

    /// The caller's deadline, or one `io_timeout` from now.
    ///
    /// Without a caller deadline every call gets its own budget, so callers
    /// evaluate this per call rather than once per operation.
    fn deadline(&self, requested: Option<Instant>) -> Instant {
        requested.unwrap_or_else(|| Instant::now() + self.io_timeout)
    }

    /// Run blocking catalog work off the async executor.
    async fn run_catalog<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Catalog) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || work(&catalog)).await?
    }

    /// Like [`Library::run_catalog`], but stop waiting once `deadline` passes.
    ///
    /// The blocking work itself cannot be cancelled; units of work that write
    /// also receive the deadline and refuse to commit after it.
    async fn run_catalog_until<T, F>(&self, deadline: Instant, op: &str, work: F) -> Result<T>
    where
        F: FnOnce(&Catalog) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if Instant::now() >= deadline {
            return Err(CoreError::timeout(op));
        }
        tokio::time::timeout_at(deadline, self.run_catalog(work))
            .await
            .map_err(|_| CoreError::timeout(op))?
    }

    /// Bound a content store call by `deadline`.
    async fn run_store<T, F>(&self, deadline: Instant, op: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if Instant::now() >= deadline {
            return Err(CoreError::timeout(op));
        }
        tokio::time::timeout_at(deadline, call)
            .await
            .map_err(|_| CoreError::timeout(op))?
    }

    // ========================================================================
    // Account operations
    // ========================================================================

    /// Create an account together with its default album.
    #[tracing::instrument(skip(self, account), fields(username = %account.username))]
    pub async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let username = account.username.clone();
        let created = self
            .run_catalog(move |catalog| catalog.create_account(&account))
            .await
            .map_err(|e| e.context(format!("create_account(username={username})")))?;
        tracing::info!(username = %created.username, "Created account");
        Ok(created)
    }

    pub async fn find_account(&self, username: &str) -> Result<Account> {
        let owned = username.to_string();
        self.run_catalog(move |catalog| catalog.find_account(&owned))
            .await
            .map_err(|e| e.context(format!("find_account(username={username})")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::DEFAULT_ALBUM_TITLE;
    use crate::error::ErrorKind;
    use crate::store::MemoryContentStore;

    /// In-memory catalog and store; the store handle is returned for inspection.
    pub(crate) async fn library() -> (Library, Arc<MemoryContentStore>) {
        let store = Arc::new(MemoryContentStore::default());
        let library = Library::new(
            Catalog::open_in_memory().unwrap(),
            store.clone(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        (library, store)
    }

    /// Library with an `alice` account already created.
    pub(crate) async fn library_with_alice() -> (Library, Arc<MemoryContentStore>) {
        let (library, store) = library().await;
        library.create_account(NewAccount::new("alice")).await.unwrap();
        (library, store)
    }

    #[tokio::test]
    async fn test_new_library_prepares_bucket() {
        let (library, store) = library().await;
        assert_eq!(library.store.bucket(), "images");
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_open_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.db.sqlite_path = dir.path().join("catalog.db");
        config.store.root = dir.path().join("objects");

        let library = Library::open(&config).await.unwrap();
        assert!(dir.path().join("objects").join("images").is_dir());

        library.create_account(NewAccount::new("carol")).await.unwrap();
        drop(library);

        let reopened = Library::open(&config).await.unwrap();
        let account = reopened.find_account("carol").await.unwrap();
        assert_eq!(account.username, "carol");
    }

    #[tokio::test]
    async fn test_account_bootstrap() {
        let (library, _) = library_with_alice().await;
        let account = library.find_account("alice").await.unwrap();
        assert_eq!(account.username, "alice");

        let albums = library.list_albums("alice").await.unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].title, DEFAULT_ALBUM_TITLE);
        assert!(albums[0].is_default);
        assert!(albums[0].image_ids.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_account() {
        let (library, _) = library_with_alice().await;
        let err = library
            .create_account(NewAccount::new("alice"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("create_account(username=alice)"));
    }

    #[tokio::test]
    async fn test_find_missing_account() {
        let (library, _) = library().await;
        let err = library.find_account("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
