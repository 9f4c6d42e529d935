//! Catalog entities and the typed mapping from raw rows.
//!
//! Backends read rows into the `*Row` structs using the column lists below,
//! then convert them with `TryFrom`, which validates every field.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{CoreError, Result};
use crate::identity::ContentHash;

/// Title of the album every account owns from creation.
pub const DEFAULT_ALBUM_TITLE: &str = "All Images";

pub(crate) const ACCOUNT_COLUMNS: &str = "username, email, created_at";
pub(crate) const ALBUM_COLUMNS: &str = "id, owner, title, is_default, created_at";
pub(crate) const IMAGE_COLUMNS: &str =
    "id, owner, filename, content_hash, size_bytes, orientation, created_at";
pub(crate) const PROCESSED_IMAGE_COLUMNS: &str =
    "id, owner, image_id, content_hash, size_bytes, orientation, created_at";

/// Fields for a new account. The credential digest is produced by the
/// authentication layer and stored as-is.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

impl NewAccount {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: i64,
    pub owner: String,
    pub title: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    /// Member image ids in the order they were linked.
    pub image_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumSummary {
    pub id: i64,
    pub title: String,
    pub is_default: bool,
    pub image_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: i64,
    pub owner: String,
    pub filename: String,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    pub orientation: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub id: i64,
    pub owner: String,
    pub image_id: i64,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    pub orientation: i32,
    pub created_at: DateTime<Utc>,
}

/// An image row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub owner: String,
    pub filename: String,
    pub content_hash: ContentHash,
    pub size_bytes: i64,
    pub orientation: i32,
}

/// A derived image row about to be recorded.
#[derive(Debug, Clone)]
pub struct NewProcessedImage {
    pub owner: String,
    pub image_id: i64,
    pub content_hash: ContentHash,
    pub size_bytes: i64,
    pub orientation: i32,
}

pub(crate) struct AccountRow {
    pub username: String,
    pub email: Option<String>,
    pub created_at: String,
}

pub(crate) struct AlbumRow {
    pub id: i64,
    pub owner: String,
    pub title: String,
    pub is_default: bool,
    pub created_at: String,
}

pub(crate) struct ImageRow {
    pub id: i64,
    pub owner: String,
    pub filename: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub orientation: i32,
    pub created_at: String,
}

pub(crate) struct ProcessedImageRow {
    pub id: i64,
    pub owner: String,
    pub image_id: i64,
    pub content_hash: String,
    pub size_bytes: i64,
    pub orientation: i32,
    pub created_at: String,
}

/// Parse the `YYYY-MM-DD HH:MM:SS` UTC text both schemas default to.
fn parse_timestamp(table: &str, id: &str, value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .map_err(|e| {
            CoreError::consistency(format!("{table} {id} has unparsable created_at {value:?}: {e}"))
        })
}

fn stored_hash(table: &str, id: i64, value: &str) -> Result<ContentHash> {
    ContentHash::parse(value)
        .map_err(|_| CoreError::consistency(format!("{table} {id} has malformed content hash {value:?}")))
}

fn stored_size(table: &str, id: i64, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| CoreError::consistency(format!("{table} {id} has negative size {value}")))
}

impl TryFrom<AccountRow> for Account {
    type Error = CoreError;

    fn try_from(row: AccountRow) -> Result<Self> {
        let created_at = parse_timestamp("account", &row.username, &row.created_at)?;
        Ok(Self {
            username: row.username,
            email: row.email,
            created_at,
        })
    }
}

impl AlbumRow {
    pub(crate) fn into_album(self, image_ids: Vec<i64>) -> Result<Album> {
        let created_at = parse_timestamp("album", &self.id.to_string(), &self.created_at)?;
        Ok(Album {
            id: self.id,
            owner: self.owner,
            title: self.title,
            is_default: self.is_default,
            created_at,
            image_ids,
        })
    }
}

impl TryFrom<ImageRow> for Image {
    type Error = CoreError;

    fn try_from(row: ImageRow) -> Result<Self> {
        Ok(Self {
            content_hash: stored_hash("image", row.id, &row.content_hash)?,
            size_bytes: stored_size("image", row.id, row.size_bytes)?,
            created_at: parse_timestamp("image", &row.id.to_string(), &row.created_at)?,
            id: row.id,
            owner: row.owner,
            filename: row.filename,
            orientation: row.orientation,
        })
    }
}

impl TryFrom<ProcessedImageRow> for ProcessedImage {
    type Error = CoreError;

    fn try_from(row: ProcessedImageRow) -> Result<Self> {
        Ok(Self {
            content_hash: stored_hash("processed_image", row.id, &row.content_hash)?,
            size_bytes: stored_size("processed_image", row.id, row.size_bytes)?,
            created_at: parse_timestamp("processed_image", &row.id.to_string(), &row.created_at)?,
            id: row.id,
            owner: row.owner,
            image_id: row.image_id,
            orientation: row.orientation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn image_row() -> ImageRow {
        ImageRow {
            id: 3,
            owner: "alice".to_string(),
            filename: "cat.png".to_string(),
            content_hash: ContentHash::of(b"cat").to_string(),
            size_bytes: 3,
            orientation: 1,
            created_at: "2024-05-01 12:30:00".to_string(),
        }
    }

    #[test]
    fn test_image_row_maps() {
        let image = Image::try_from(image_row()).unwrap();
        assert_eq!(image.id, 3);
        assert_eq!(image.size_bytes, 3);
        assert_eq!(image.content_hash, ContentHash::of(b"cat"));
        assert_eq!(image.created_at.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn test_bad_rows_are_consistency_violations() {
        let mut row = image_row();
        row.content_hash = "not-a-hash".to_string();
        let err = Image::try_from(row).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);

        let mut row = image_row();
        row.size_bytes = -1;
        assert_eq!(
            Image::try_from(row).unwrap_err().kind(),
            ErrorKind::ConsistencyViolation
        );

        let mut row = image_row();
        row.created_at = "yesterday".to_string();
        assert_eq!(
            Image::try_from(row).unwrap_err().kind(),
            ErrorKind::ConsistencyViolation
        );
    }
}
