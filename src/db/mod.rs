mod models;
mod schema;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
mod postgres_schema;

use std::time::{Duration, Instant};

pub use models::{
    Account, Album, AlbumSummary, Image, NewAccount, NewImage, NewProcessedImage, ProcessedImage,
    DEFAULT_ALBUM_TITLE,
};
pub use schema::SCHEMA;

use crate::config::DatabaseConfig;
#[cfg(feature = "postgres")]
use crate::config::DatabaseType;
use crate::error::{CoreError, Result};

/// Fail with a timeout once `deadline` has passed.
pub(crate) fn check_deadline(deadline: Instant, op: &str) -> Result<()> {
    if Instant::now() >= deadline {
        Err(CoreError::timeout(op))
    } else {
        Ok(())
    }
}

fn ensure_id(id: i64, what: &str) -> Result<()> {
    if id > 0 {
        Ok(())
    } else {
        Err(CoreError::invalid(format!("{what} id must be positive, got {id}")))
    }
}

fn ensure_owner(owner: &str) -> Result<()> {
    if owner.trim().is_empty() {
        Err(CoreError::invalid("owner must not be empty"))
    } else {
        Ok(())
    }
}

/// Macro to dispatch a method call to the active backend variant.
macro_rules! dispatch {
    // No arguments beyond self
    ($self:expr, $method:ident()) => {
        match &$self.inner {
            CatalogInner::Sqlite(db) => db.$method(),
            #[cfg(feature = "postgres")]
            CatalogInner::Postgres(db) => db.$method(),
        }
    };
    // With arguments
    ($self:expr, $method:ident($($arg:expr),+ $(,)?)) => {
        match &$self.inner {
            CatalogInner::Sqlite(db) => db.$method($($arg),+),
            #[cfg(feature = "postgres")]
            CatalogInner::Postgres(db) => db.$method($($arg),+),
        }
    };
}

enum CatalogInner {
    Sqlite(sqlite::SqliteCatalog),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgCatalog),
}

/// Relational catalog of accounts, albums, images and derived images.
///
/// Every operation that touches more than one table runs in a single
/// transaction. Calls block; async callers run them on the blocking pool.
pub struct Catalog {
    inner: CatalogInner,
}

impl Catalog {
    /// Open a catalog based on the provided configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        #[cfg(feature = "postgres")]
        {
            if config.backend == DatabaseType::Postgresql {
                let url = config.postgresql_url.as_deref().ok_or_else(|| {
                    CoreError::invalid("db.postgresql_url is required for the postgresql backend")
                })?;
                let pool_size = config.pool_size.unwrap_or(10);
                let pg = postgres::PgCatalog::open(url, pool_size)?;
                return Ok(Self {
                    inner: CatalogInner::Postgres(pg),
                });
            }
        }

        let db = sqlite::SqliteCatalog::open(
            &config.sqlite_path,
            Duration::from_millis(config.busy_timeout_ms),
        )?;
        Ok(Self {
            inner: CatalogInner::Sqlite(db),
        })
    }

    /// Private SQLite catalog, used by tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            inner: CatalogInner::Sqlite(sqlite::SqliteCatalog::open_in_memory()?),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        dispatch!(self, initialize())
    }

    // ========================================================================
    // Account operations
    // ========================================================================

    /// Insert the account and its default album in one unit of work.
    pub fn create_account(&self, account: &NewAccount) -> Result<Account> {
        ensure_owner(&account.username)?;
        dispatch!(self, create_account(account))
    }

    pub fn find_account(&self, username: &str) -> Result<Account> {
        ensure_owner(username)?;
        dispatch!(self, find_account(username))
    }

    // ========================================================================
    // Album operations
    // ========================================================================

    pub fn create_album(&self, owner: &str, title: &str) -> Result<Album> {
        ensure_owner(owner)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(CoreError::invalid("album title must not be empty"));
        }
        if title == DEFAULT_ALBUM_TITLE {
            return Err(CoreError::conflict(format!(
                "{DEFAULT_ALBUM_TITLE:?} is reserved for the default album"
            )));
        }
        dispatch!(self, create_album(owner, title))
    }

    pub fn find_default_album_id(&self, owner: &str) -> Result<i64> {
        ensure_owner(owner)?;
        dispatch!(self, find_default_album_id(owner))
    }

    pub fn list_albums_by_owner(&self, owner: &str) -> Result<Vec<AlbumSummary>> {
        ensure_owner(owner)?;
        dispatch!(self, list_albums_by_owner(owner))
    }

    /// Album with its image ids in link order.
    pub fn get_album(&self, album_id: i64) -> Result<Album> {
        ensure_id(album_id, "album")?;
        dispatch!(self, get_album(album_id))
    }

    /// Conflict if the pair is already linked; NotFound if either side is missing.
    pub fn link_image_to_album(
        &self,
        album_id: i64,
        image_id: i64,
        deadline: Instant,
    ) -> Result<()> {
        ensure_id(album_id, "album")?;
        ensure_id(image_id, "image")?;
        dispatch!(self, link_image_to_album(album_id, image_id, deadline))
    }

    // ========================================================================
    // Image operations
    // ========================================================================

    /// Insert a bare image row without album links.
    pub fn insert_image(&self, image: &NewImage) -> Result<i64> {
        ensure_owner(&image.owner)?;
        dispatch!(self, insert_image(image))
    }

    /// Insert an image row and link it to the default album and, when given,
    /// to `target_album`, all in one transaction that refuses to commit after
    /// `deadline`.
    pub fn record_upload(
        &self,
        image: &NewImage,
        target_album: Option<i64>,
        deadline: Instant,
    ) -> Result<i64> {
        ensure_owner(&image.owner)?;
        if let Some(album_id) = target_album {
            ensure_id(album_id, "album")?;
        }
        dispatch!(self, record_upload(image, target_album, deadline))
    }

    pub fn get_image(&self, owner: &str, image_id: i64) -> Result<Image> {
        ensure_owner(owner)?;
        ensure_id(image_id, "image")?;
        dispatch!(self, get_image(owner, image_id))
    }

    /// Set the orientation flag and drop every cached derived image of the source.
    pub fn update_orientation(
        &self,
        owner: &str,
        image_id: i64,
        orientation: i32,
        deadline: Instant,
    ) -> Result<()> {
        ensure_owner(owner)?;
        ensure_id(image_id, "image")?;
        dispatch!(self, update_orientation(owner, image_id, orientation, deadline))
    }

    // ========================================================================
    // Processed image operations
    // ========================================================================

    pub fn get_processed_image(&self, owner: &str, image_id: i64) -> Result<ProcessedImage> {
        ensure_owner(owner)?;
        ensure_id(image_id, "image")?;
        dispatch!(self, get_processed_image(owner, image_id))
    }

    /// Record a derived image. Conflict if the source's orientation has moved on.
    pub fn record_processed_image(
        &self,
        processed: &NewProcessedImage,
        deadline: Instant,
    ) -> Result<ProcessedImage> {
        ensure_owner(&processed.owner)?;
        ensure_id(processed.image_id, "image")?;
        dispatch!(self, record_processed_image(processed, deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::identity::ContentHash;

    fn catalog() -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.initialize().unwrap();
        catalog
    }

    fn new_image(owner: &str, tag: &str) -> NewImage {
        NewImage {
            owner: owner.to_string(),
            filename: format!("{tag}.png"),
            content_hash: ContentHash::of(tag.as_bytes()),
            size_bytes: tag.len() as i64,
            orientation: 0,
        }
    }

    fn derived(image_id: i64, tag: &str, orientation: i32) -> NewProcessedImage {
        NewProcessedImage {
            owner: "alice".to_string(),
            image_id,
            content_hash: ContentHash::of(tag.as_bytes()),
            size_bytes: tag.len() as i64,
            orientation,
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let catalog = catalog();
        catalog.initialize().unwrap();
    }

    #[test]
    fn test_create_account_bootstraps_default_album() {
        let catalog = catalog();
        let account = catalog.create_account(&NewAccount::new("alice")).unwrap();
        assert_eq!(account.username, "alice");

        let albums = catalog.list_albums_by_owner("alice").unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].title, DEFAULT_ALBUM_TITLE);
        assert!(albums[0].is_default);
        assert_eq!(albums[0].image_count, 0);
        assert_eq!(catalog.find_default_album_id("alice").unwrap(), albums[0].id);
    }

    #[test]
    fn test_duplicate_account_is_conflict() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let err = catalog.create_account(&NewAccount::new("alice")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(catalog.list_albums_by_owner("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_owner() {
        let catalog = catalog();
        assert_eq!(
            catalog.find_default_album_id("nobody").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            catalog.list_albums_by_owner("nobody").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            catalog.find_account("nobody").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_create_album_rules() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();

        let album = catalog.create_album("alice", "  Holidays ").unwrap();
        assert_eq!(album.title, "Holidays");
        assert!(!album.is_default);
        assert!(album.image_ids.is_empty());

        assert_eq!(
            catalog.create_album("alice", DEFAULT_ALBUM_TITLE).unwrap_err().kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            catalog.create_album("alice", "   ").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            catalog.create_album("bob", "Pets").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_record_upload_links_default_and_target() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let default_id = catalog.find_default_album_id("alice").unwrap();
        let trip = catalog.create_album("alice", "Trip").unwrap();

        let image_id = catalog
            .record_upload(&new_image("alice", "beach"), Some(trip.id), far_deadline())
            .unwrap();

        assert_eq!(catalog.get_album(default_id).unwrap().image_ids, vec![image_id]);
        assert_eq!(catalog.get_album(trip.id).unwrap().image_ids, vec![image_id]);
    }

    #[test]
    fn test_record_upload_with_default_as_target_links_once() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let default_id = catalog.find_default_album_id("alice").unwrap();

        let image_id = catalog
            .record_upload(&new_image("alice", "once"), Some(default_id), far_deadline())
            .unwrap();
        assert_eq!(catalog.get_album(default_id).unwrap().image_ids, vec![image_id]);
    }

    #[test]
    fn test_record_upload_rolls_back_on_foreign_album() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        catalog.create_account(&NewAccount::new("bob")).unwrap();
        let bobs = catalog.create_album("bob", "Bob's").unwrap();
        let default_id = catalog.find_default_album_id("alice").unwrap();

        let err = catalog
            .record_upload(&new_image("alice", "sneaky"), Some(bobs.id), far_deadline())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(catalog.get_album(default_id).unwrap().image_ids.is_empty());
        assert!(catalog.get_album(bobs.id).unwrap().image_ids.is_empty());
    }

    #[test]
    fn test_record_upload_after_deadline_leaves_nothing() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let default_id = catalog.find_default_album_id("alice").unwrap();

        let err = catalog
            .record_upload(&new_image("alice", "late"), None, Instant::now())
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(catalog.get_album(default_id).unwrap().image_ids.is_empty());
    }

    #[test]
    fn test_link_rules() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let album = catalog.create_album("alice", "Faves").unwrap();
        let image_id = catalog.insert_image(&new_image("alice", "cat")).unwrap();

        catalog.link_image_to_album(album.id, image_id, far_deadline()).unwrap();
        let err = catalog.link_image_to_album(album.id, image_id, far_deadline()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(catalog.get_album(album.id).unwrap().image_ids, vec![image_id]);

        assert_eq!(
            catalog.link_image_to_album(album.id, 999, far_deadline()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            catalog.link_image_to_album(999, image_id, far_deadline()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            catalog.link_image_to_album(0, image_id, far_deadline()).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_album_order_follows_linking() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let album = catalog.create_album("alice", "Ordered").unwrap();
        let first = catalog.insert_image(&new_image("alice", "first")).unwrap();
        let second = catalog.insert_image(&new_image("alice", "second")).unwrap();

        catalog.link_image_to_album(album.id, second, far_deadline()).unwrap();
        catalog.link_image_to_album(album.id, first, far_deadline()).unwrap();
        assert_eq!(catalog.get_album(album.id).unwrap().image_ids, vec![second, first]);
    }

    #[test]
    fn test_get_image_is_owner_scoped() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        catalog.create_account(&NewAccount::new("bob")).unwrap();
        let image_id = catalog.insert_image(&new_image("alice", "private")).unwrap();

        let image = catalog.get_image("alice", image_id).unwrap();
        assert_eq!(image.filename, "private.png");
        assert_eq!(image.content_hash, ContentHash::of(b"private"));

        let err = catalog.get_image("bob", image_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            catalog.get_image("alice", -4).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_orientation_update_invalidates_processed() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let image_id = catalog.insert_image(&new_image("alice", "portrait")).unwrap();

        let processed = catalog
            .record_processed_image(&derived(image_id, "portrait-derived", 0), far_deadline())
            .unwrap();
        assert_eq!(
            catalog.get_processed_image("alice", image_id).unwrap(),
            processed
        );

        catalog.update_orientation("alice", image_id, 2, far_deadline()).unwrap();
        assert_eq!(catalog.get_image("alice", image_id).unwrap().orientation, 2);
        assert_eq!(
            catalog.get_processed_image("alice", image_id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_processed_image_for_stale_orientation_is_conflict() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let image_id = catalog.insert_image(&new_image("alice", "rot")).unwrap();
        catalog.update_orientation("alice", image_id, 1, far_deadline()).unwrap();

        let err = catalog
            .record_processed_image(&derived(image_id, "rot-derived", 0), far_deadline())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_rerecording_processed_image_replaces_it() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let image_id = catalog.insert_image(&new_image("alice", "redo")).unwrap();

        let record =
            |tag: &str| catalog.record_processed_image(&derived(image_id, tag, 0), far_deadline());
        let first = record("v1").unwrap();
        let second = record("v2-longer").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.content_hash, ContentHash::of(b"v2-longer"));
        assert_eq!(
            catalog.get_processed_image("alice", image_id).unwrap().size_bytes,
            9
        );
    }

    #[test]
    fn test_elapsed_deadline_leaves_orientation_unchanged() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let image_id = catalog.insert_image(&new_image("alice", "slow")).unwrap();
        catalog
            .record_processed_image(&derived(image_id, "slow-derived", 0), far_deadline())
            .unwrap();

        let err = catalog
            .update_orientation("alice", image_id, 5, Instant::now())
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(catalog.get_image("alice", image_id).unwrap().orientation, 0);
        assert!(catalog.get_processed_image("alice", image_id).is_ok());
    }

    #[test]
    fn test_elapsed_deadline_writes_no_link_or_processed_row() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        let album = catalog.create_album("alice", "Late").unwrap();
        let image_id = catalog.insert_image(&new_image("alice", "tardy")).unwrap();

        let err = catalog
            .link_image_to_album(album.id, image_id, Instant::now())
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(catalog.get_album(album.id).unwrap().image_ids.is_empty());

        let err = catalog
            .record_processed_image(&derived(image_id, "tardy-derived", 0), Instant::now())
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            catalog.get_processed_image("alice", image_id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_update_orientation_unknown_image() {
        let catalog = catalog();
        catalog.create_account(&NewAccount::new("alice")).unwrap();
        assert_eq!(
            catalog.update_orientation("alice", 42, 1, far_deadline()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
