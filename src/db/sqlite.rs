//! SQLite backend implementation.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::check_deadline;
use super::models::{
    Account, AccountRow, Album, AlbumRow, AlbumSummary, Image, ImageRow, NewAccount, NewImage,
    NewProcessedImage, ProcessedImage, ProcessedImageRow, ACCOUNT_COLUMNS, ALBUM_COLUMNS,
    DEFAULT_ALBUM_TITLE, IMAGE_COLUMNS, PROCESSED_IMAGE_COLUMNS,
};
use super::schema::SCHEMA;
use crate::error::{CoreError, Result};

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn read_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        username: row.get(0)?,
        email: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn read_album(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlbumRow> {
    Ok(AlbumRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        title: row.get(2)?,
        is_default: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn read_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRow> {
    Ok(ImageRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        filename: row.get(2)?,
        content_hash: row.get(3)?,
        size_bytes: row.get(4)?,
        orientation: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn read_processed_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessedImageRow> {
    Ok(ProcessedImageRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        image_id: row.get(2)?,
        content_hash: row.get(3)?,
        size_bytes: row.get(4)?,
        orientation: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn account_exists(conn: &Connection, username: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM account WHERE username = ?",
            [username],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn default_album_id(conn: &Connection, owner: &str) -> Result<i64> {
    let id = conn
        .query_row(
            "SELECT id FROM album WHERE owner = ? AND is_default = 1",
            [owner],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    match id {
        Some(id) => Ok(id),
        None if account_exists(conn, owner)? => Err(CoreError::consistency(format!(
            "account {owner} has no default album"
        ))),
        None => Err(CoreError::not_found(format!("account {owner}"))),
    }
}

fn album_owner(conn: &Connection, album_id: i64) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT owner FROM album WHERE id = ?", [album_id], |row| {
            row.get::<_, String>(0)
        })
        .optional()?)
}

fn insert_image_row(conn: &Connection, image: &NewImage) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO image (owner, filename, content_hash, size_bytes, orientation)
        VALUES (?, ?, ?, ?, ?)
        "#,
        rusqlite::params![
            image.owner,
            image.filename,
            image.content_hash.as_str(),
            image.size_bytes,
            image.orientation
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_link(conn: &Connection, album_id: i64, image_id: i64) -> Result<()> {
    if album_owner(conn, album_id)?.is_none() {
        return Err(CoreError::not_found(format!("album {album_id}")));
    }
    let image_found = conn
        .query_row("SELECT 1 FROM image WHERE id = ?", [image_id], |_| Ok(()))
        .optional()?;
    if image_found.is_none() {
        return Err(CoreError::not_found(format!("image {image_id}")));
    }

    match conn.execute(
        "INSERT INTO album_image (album_id, image_id) VALUES (?, ?)",
        rusqlite::params![album_id, image_id],
    ) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(CoreError::conflict(format!(
            "image {image_id} is already in album {album_id}"
        ))),
        Err(e) => Err(e.into()),
    }
}

fn album_image_ids(conn: &Connection, album_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT image_id FROM album_image WHERE album_id = ? ORDER BY seq")?;
    let ids = stmt
        .query_map([album_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn load_album(conn: &Connection, album_id: i64) -> Result<Album> {
    let row = conn
        .query_row(
            &format!("SELECT {ALBUM_COLUMNS} FROM album WHERE id = ?"),
            [album_id],
            read_album,
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found(format!("album {album_id}")))?;
    let image_ids = album_image_ids(conn, album_id)?;
    row.into_album(image_ids)
}

impl SqliteCatalog {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            CoreError::storage(
                "sqlite",
                std::io::Error::new(std::io::ErrorKind::Other, "connection lock poisoned"),
            )
        })
    }

    pub fn initialize(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ========================================================================
    // Account operations
    // ========================================================================

    pub fn create_account(&self, account: &NewAccount) -> Result<Account> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match tx.execute(
            "INSERT INTO account (username, email, password_hash) VALUES (?, ?, ?)",
            rusqlite::params![account.username, account.email, account.password_hash],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(CoreError::conflict(format!(
                    "account {} already exists",
                    account.username
                )));
            }
            Err(e) => return Err(e.into()),
        }
        tx.execute(
            "INSERT INTO album (owner, title, is_default) VALUES (?, ?, 1)",
            rusqlite::params![account.username, DEFAULT_ALBUM_TITLE],
        )?;

        let row = tx.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE username = ?"),
            [&account.username],
            read_account,
        )?;
        tx.commit()?;
        Account::try_from(row)
    }

    pub fn find_account(&self, username: &str) -> Result<Account> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE username = ?"),
                [username],
                read_account,
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found(format!("account {username}")))?;
        Account::try_from(row)
    }

    // ========================================================================
    // Album operations
    // ========================================================================

    pub fn create_album(&self, owner: &str, title: &str) -> Result<Album> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if !account_exists(&tx, owner)? {
            return Err(CoreError::not_found(format!("account {owner}")));
        }
        tx.execute(
            "INSERT INTO album (owner, title, is_default) VALUES (?, ?, 0)",
            rusqlite::params![owner, title],
        )?;
        let album = load_album(&tx, tx.last_insert_rowid())?;
        tx.commit()?;
        Ok(album)
    }

    pub fn find_default_album_id(&self, owner: &str) -> Result<i64> {
        let conn = self.lock()?;
        default_album_id(&conn, owner)
    }

    pub fn list_albums_by_owner(&self, owner: &str) -> Result<Vec<AlbumSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT a.id, a.title, a.is_default,
                   (SELECT COUNT(*) FROM album_image ai WHERE ai.album_id = a.id) AS image_count
            FROM album a
            WHERE a.owner = ?
            ORDER BY a.id
            "#,
        )?;
        let albums = stmt
            .query_map([owner], |row| {
                Ok(AlbumSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    is_default: row.get(2)?,
                    image_count: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if albums.is_empty() && !account_exists(&conn, owner)? {
            return Err(CoreError::not_found(format!("account {owner}")));
        }
        Ok(albums)
    }

    pub fn get_album(&self, album_id: i64) -> Result<Album> {
        let conn = self.lock()?;
        load_album(&conn, album_id)
    }

    pub fn link_image_to_album(
        &self,
        album_id: i64,
        image_id: i64,
        deadline: Instant,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        check_deadline(deadline, "link image")?;
        let tx = conn.transaction()?;
        insert_link(&tx, album_id, image_id)?;
        check_deadline(deadline, "link image")?;
        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // Image operations
    // ========================================================================

    pub fn insert_image(&self, image: &NewImage) -> Result<i64> {
        let conn = self.lock()?;
        if !account_exists(&conn, &image.owner)? {
            return Err(CoreError::not_found(format!("account {}", image.owner)));
        }
        insert_image_row(&conn, image)
    }

    pub fn record_upload(
        &self,
        image: &NewImage,
        target_album: Option<i64>,
        deadline: Instant,
    ) -> Result<i64> {
        let mut conn = self.lock()?;
        check_deadline(deadline, "record upload")?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let default_id = default_album_id(&tx, &image.owner)?;
        let target = target_album.filter(|&id| id != default_id);
        if let Some(album_id) = target {
            match album_owner(&tx, album_id)? {
                Some(owner) if owner == image.owner => {}
                _ => {
                    return Err(CoreError::not_found(format!(
                        "album {album_id} for owner {}",
                        image.owner
                    )));
                }
            }
        }

        let image_id = insert_image_row(&tx, image)?;
        insert_link(&tx, default_id, image_id)?;
        if let Some(album_id) = target {
            insert_link(&tx, album_id, image_id)?;
        }

        // Dropping the transaction rolls it back.
        check_deadline(deadline, "record upload")?;
        tx.commit()?;
        Ok(image_id)
    }

    pub fn get_image(&self, owner: &str, image_id: i64) -> Result<Image> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {IMAGE_COLUMNS} FROM image WHERE owner = ? AND id = ?"),
                rusqlite::params![owner, image_id],
                read_image,
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found(format!("image {image_id} for owner {owner}")))?;
        Image::try_from(row)
    }

    pub fn update_orientation(
        &self,
        owner: &str,
        image_id: i64,
        orientation: i32,
        deadline: Instant,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        check_deadline(deadline, "update orientation")?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let updated = tx.execute(
            "UPDATE image SET orientation = ? WHERE owner = ? AND id = ?",
            rusqlite::params![orientation, owner, image_id],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found(format!("image {image_id} for owner {owner}")));
        }
        let invalidated = tx.execute(
            "DELETE FROM processed_image WHERE image_id = ?",
            [image_id],
        )?;

        check_deadline(deadline, "update orientation")?;
        tx.commit()?;
        tracing::debug!(owner, image_id, orientation, invalidated, "Updated orientation");
        Ok(())
    }

    // ========================================================================
    // Processed image operations
    // ========================================================================

    pub fn get_processed_image(&self, owner: &str, image_id: i64) -> Result<ProcessedImage> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {PROCESSED_IMAGE_COLUMNS}
                    FROM processed_image
                    WHERE owner = ? AND image_id = ?
                      AND orientation = (SELECT orientation FROM image WHERE id = ?)
                    "#
                ),
                rusqlite::params![owner, image_id, image_id],
                read_processed_image,
            )
            .optional()?
            .ok_or_else(|| {
                CoreError::not_found(format!("processed image {image_id} for owner {owner}"))
            })?;
        ProcessedImage::try_from(row)
    }

    pub fn record_processed_image(
        &self,
        processed: &NewProcessedImage,
        deadline: Instant,
    ) -> Result<ProcessedImage> {
        let mut conn = self.lock()?;
        check_deadline(deadline, "record processed image")?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: i32 = tx
            .query_row(
                "SELECT orientation FROM image WHERE owner = ? AND id = ?",
                rusqlite::params![processed.owner, processed.image_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                CoreError::not_found(format!(
                    "image {} for owner {}",
                    processed.image_id, processed.owner
                ))
            })?;
        if current != processed.orientation {
            return Err(CoreError::conflict(format!(
                "image {} now has orientation {current}, derived image was made for {}",
                processed.image_id, processed.orientation
            )));
        }

        let id: i64 = tx.query_row(
            r#"
            INSERT INTO processed_image (owner, image_id, content_hash, size_bytes, orientation)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (image_id, orientation) DO UPDATE SET
                content_hash = excluded.content_hash,
                size_bytes = excluded.size_bytes,
                created_at = CURRENT_TIMESTAMP
            RETURNING id
            "#,
            rusqlite::params![
                processed.owner,
                processed.image_id,
                processed.content_hash.as_str(),
                processed.size_bytes,
                processed.orientation
            ],
            |row| row.get(0),
        )?;
        let row = tx.query_row(
            &format!("SELECT {PROCESSED_IMAGE_COLUMNS} FROM processed_image WHERE id = ?"),
            [id],
            read_processed_image,
        )?;
        check_deadline(deadline, "record processed image")?;
        tx.commit()?;
        ProcessedImage::try_from(row)
    }
}
