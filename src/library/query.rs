//! Owner-scoped reads and the small set of album/image mutations.

use tokio::time::Instant;

use super::Library;
use crate::db::{Album, Image, NewProcessedImage, ProcessedImage};
use crate::error::{CoreError, ErrorKind, Result};
use crate::identity::{self, ContentHash};

fn ensure_orientation(orientation: i32) -> Result<()> {
    if orientation < 0 {
        Err(CoreError::invalid(format!(
            "orientation must not be negative, got {orientation}"
        )))
    } else {
        Ok(())
    }
}

impl Library {
    /// Every album of `owner` with its members resolved, default album first.
    pub async fn list_albums(&self, owner: &str) -> Result<Vec<Album>> {
        let owned = owner.to_string();
        self.run_catalog(move |catalog| {
            catalog
                .list_albums_by_owner(&owned)?
                .into_iter()
                .map(|summary| catalog.get_album(summary.id))
                .collect()
        })
        .await
        .map_err(|e| e.context(format!("list_albums(owner={owner})")))
    }

    pub async fn get_album(&self, owner: &str, album_id: i64) -> Result<Album> {
        let owned = owner.to_string();
        self.run_catalog(move |catalog| owned_album(catalog, &owned, album_id))
            .await
            .map_err(|e| e.context(format!("get_album(owner={owner})")))
    }

    pub async fn create_album(&self, owner: &str, title: &str) -> Result<Album> {
        let owned = owner.to_string();
        let title = title.to_string();
        let album = self
            .run_catalog(move |catalog| catalog.create_album(&owned, &title))
            .await
            .map_err(|e| e.context(format!("create_album(owner={owner})")))?;
        tracing::info!(owner, album_id = album.id, title = %album.title, "Created album");
        Ok(album)
    }

    /// Link an image into an album; both must belong to `owner`.
    pub async fn link_image(
        &self,
        owner: &str,
        album_id: i64,
        image_id: i64,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let owned = owner.to_string();
        let deadline = self.deadline(deadline);
        let commit_by = deadline.into_std();
        self.run_catalog_until(deadline, "link image", move |catalog| {
            owned_album(catalog, &owned, album_id)?;
            catalog.get_image(&owned, image_id)?;
            catalog.link_image_to_album(album_id, image_id, commit_by)
        })
        .await
        .map_err(|e| e.context(format!("link_image(owner={owner})")))
    }

    /// Image metadata and its original bytes.
    pub async fn fetch_image(
        &self,
        owner: &str,
        image_id: i64,
        deadline: Option<Instant>,
    ) -> Result<(Image, Vec<u8>)> {
        let owned = owner.to_string();
        let context = format!("fetch_image(owner={owner})");
        let image = self
            .run_catalog_until(self.deadline(deadline), "get image", move |catalog| {
                catalog.get_image(&owned, image_id)
            })
            .await
            .map_err(|e| e.context(&context))?;
        let bytes = self
            .load_blob(&image.content_hash, "image", image.id, deadline)
            .await
            .map_err(|e| e.context(&context))?;
        Ok((image, bytes))
    }

    /// The derived image for the source's current orientation, and its bytes.
    pub async fn fetch_processed_image(
        &self,
        owner: &str,
        image_id: i64,
        deadline: Option<Instant>,
    ) -> Result<(ProcessedImage, Vec<u8>)> {
        let owned = owner.to_string();
        let context = format!("fetch_processed_image(owner={owner})");
        let processed = self
            .run_catalog_until(self.deadline(deadline), "get processed image", move |catalog| {
                catalog.get_processed_image(&owned, image_id)
            })
            .await
            .map_err(|e| e.context(&context))?;
        let bytes = self
            .load_blob(&processed.content_hash, "processed image", processed.id, deadline)
            .await
            .map_err(|e| e.context(&context))?;
        Ok((processed, bytes))
    }

    /// Store derived bytes produced for `orientation` and record them
    /// against the source image.
    #[tracing::instrument(skip(self, bytes, deadline), fields(size = bytes.len()))]
    pub async fn store_processed_image(
        &self,
        owner: &str,
        image_id: i64,
        orientation: i32,
        bytes: &[u8],
        deadline: Option<Instant>,
    ) -> Result<ProcessedImage> {
        let context = format!("store_processed_image(owner={owner})");
        ensure_orientation(orientation).map_err(|e| e.context(&context))?;
        let identity = identity::derive(bytes).map_err(|e| e.context(&context))?;
        let size_bytes = identity.size_bytes().map_err(|e| e.context(&context))?;

        let put_by = self.deadline(deadline);
        self.run_store(put_by, "put blob", self.store.put(&identity.hash, bytes))
            .await
            .map_err(|e| e.context(&context))?;

        let processed = NewProcessedImage {
            owner: owner.to_string(),
            image_id,
            content_hash: identity.hash,
            size_bytes,
            orientation,
        };
        let commit_by = self.deadline(deadline);
        let commit_by_std = commit_by.into_std();
        self.run_catalog_until(commit_by, "record processed image", move |catalog| {
            catalog.record_processed_image(&processed, commit_by_std)
        })
        .await
        .map_err(|e| e.context(&context))
    }

    /// Change the orientation flag, discarding every derived image of the source.
    pub async fn update_orientation(
        &self,
        owner: &str,
        image_id: i64,
        orientation: i32,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let context = format!("update_orientation(owner={owner})");
        ensure_orientation(orientation).map_err(|e| e.context(&context))?;
        let owned = owner.to_string();
        let deadline = self.deadline(deadline);
        let commit_by = deadline.into_std();
        self.run_catalog_until(deadline, "update orientation", move |catalog| {
            catalog.update_orientation(&owned, image_id, orientation, commit_by)
        })
        .await
        .map_err(|e| e.context(&context))
    }

    /// Read a blob a catalog row points at. A missing blob means the store
    /// and catalog disagree.
    async fn load_blob(
        &self,
        hash: &ContentHash,
        what: &str,
        id: i64,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>> {
        let deadline = self.deadline(deadline);
        match self.run_store(deadline, "get blob", self.store.get(hash)).await {
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CoreError::consistency(format!(
                "{what} {id} references missing blob {hash}"
            ))),
            other => other,
        }
    }
}

fn owned_album(catalog: &crate::db::Catalog, owner: &str, album_id: i64) -> Result<Album> {
    let album = catalog.get_album(album_id)?;
    if album.owner != owner {
        return Err(CoreError::not_found(format!(
            "album {album_id} for owner {owner}"
        )));
    }
    Ok(album)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewAccount, DEFAULT_ALBUM_TITLE};
    use crate::identity::tests::png;
    use crate::library::tests::library_with_alice;
    use crate::library::{IngestRequest, Upload};

    async fn ingest_one(library: &Library, owner: &str, tag: &str) -> i64 {
        let report = library
            .ingest(IngestRequest::new(
                owner,
                vec![Upload::new(format!("{tag}.png"), png(tag))],
            ))
            .await
            .unwrap();
        report.image_ids[0]
    }

    #[tokio::test]
    async fn test_fetch_image_returns_original_bytes() {
        let (library, _) = library_with_alice().await;
        let image_id = ingest_one(&library, "alice", "orig").await;

        let (image, bytes) = library.fetch_image("alice", image_id, None).await.unwrap();
        assert_eq!(image.filename, "orig.png");
        assert_eq!(image.size_bytes, bytes.len() as u64);
        assert_eq!(bytes, png("orig"));
    }

    #[tokio::test]
    async fn test_ownership_isolation() {
        let (library, _) = library_with_alice().await;
        library.create_account(NewAccount::new("bob")).await.unwrap();
        let image_id = ingest_one(&library, "alice", "mine").await;
        let album = library.create_album("alice", "Secret").await.unwrap();

        let err = library.fetch_image("bob", image_id, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = library.get_album("bob", album.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let bobs = library.create_album("bob", "Bob's").await.unwrap();
        let err = library.link_image("bob", bobs.id, image_id, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_missing_blob_is_consistency_violation() {
        let (library, store) = library_with_alice().await;
        let image_id = ingest_one(&library, "alice", "vanish").await;
        let (image, _) = library.fetch_image("alice", image_id, None).await.unwrap();

        assert!(store.remove(&image.content_hash));
        let err = library.fetch_image("alice", image_id, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);
    }

    #[tokio::test]
    async fn test_duplicate_link_is_conflict() {
        let (library, _) = library_with_alice().await;
        let image_id = ingest_one(&library, "alice", "twice").await;
        let album = library.create_album("alice", "Best").await.unwrap();

        library.link_image("alice", album.id, image_id, None).await.unwrap();
        let err = library
            .link_image("alice", album.id, image_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let album = library.get_album("alice", album.id).await.unwrap();
        assert_eq!(album.image_ids, vec![image_id]);
    }

    #[tokio::test]
    async fn test_reserved_album_title() {
        let (library, _) = library_with_alice().await;
        let err = library
            .create_album("alice", DEFAULT_ALBUM_TITLE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(library.list_albums("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_processed_image_cache_invalidation() {
        let (library, _) = library_with_alice().await;
        let image_id = ingest_one(&library, "alice", "tilted").await;

        let derived = png("tilted-rotated");
        let processed = library
            .store_processed_image("alice", image_id, 0, &derived, None)
            .await
            .unwrap();
        assert_eq!(processed.image_id, image_id);

        let (fetched, bytes) = library
            .fetch_processed_image("alice", image_id, None)
            .await
            .unwrap();
        assert_eq!(fetched.id, processed.id);
        assert_eq!(bytes, derived);

        library.update_orientation("alice", image_id, 3, None).await.unwrap();
        let err = library
            .fetch_processed_image("alice", image_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let (image, original) = library.fetch_image("alice", image_id, None).await.unwrap();
        assert_eq!(image.orientation, 3);
        assert_eq!(original, png("tilted"));
    }

    #[tokio::test]
    async fn test_stale_processed_image_is_conflict() {
        let (library, _) = library_with_alice().await;
        let image_id = ingest_one(&library, "alice", "spin").await;
        library.update_orientation("alice", image_id, 1, None).await.unwrap();

        let err = library
            .store_processed_image("alice", image_id, 0, &png("spin-0"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_processed_bytes_must_be_an_image() {
        let (library, _) = library_with_alice().await;
        let image_id = ingest_one(&library, "alice", "src").await;

        let err = library
            .store_processed_image("alice", image_id, 0, b"", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_orientation_rules() {
        let (library, _) = library_with_alice().await;
        let image_id = ingest_one(&library, "alice", "flip").await;

        let err = library
            .update_orientation("alice", image_id, -2, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = library
            .update_orientation("alice", image_id + 100, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("update_orientation(owner=alice)"));
    }

    #[tokio::test]
    async fn test_elapsed_deadline_keeps_orientation() {
        let (library, store) = library_with_alice().await;
        let image_id = ingest_one(&library, "alice", "still").await;

        let err = library
            .update_orientation("alice", image_id, 2, Some(Instant::now()))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("update_orientation(owner=alice)"));

        let err = library
            .store_processed_image("alice", image_id, 0, &png("still-0"), Some(Instant::now()))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(store.object_count(), 1);

        let (image, _) = library.fetch_image("alice", image_id, None).await.unwrap();
        assert_eq!(image.orientation, 0);
        let err = library
            .fetch_processed_image("alice", image_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_albums_resolves_members() {
        let (library, _) = library_with_alice().await;
        let album = library.create_album("alice", "Picks").await.unwrap();
        let first = ingest_one(&library, "alice", "p1").await;
        let second = ingest_one(&library, "alice", "p2").await;
        library.link_image("alice", album.id, second, None).await.unwrap();

        let albums = library.list_albums("alice").await.unwrap();
        assert_eq!(albums.len(), 2);
        assert!(albums[0].is_default);
        assert_eq!(albums[0].image_ids, vec![first, second]);
        assert_eq!(albums[1].image_ids, vec![second]);
    }
}
