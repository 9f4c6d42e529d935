//! PostgreSQL backend implementation.

use postgres::error::SqlState;
use postgres::{GenericClient, NoTls};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use std::time::Instant;

use super::check_deadline;
use super::models::{
    Account, AccountRow, Album, AlbumRow, AlbumSummary, Image, ImageRow, NewAccount, NewImage,
    NewProcessedImage, ProcessedImage, ProcessedImageRow, ACCOUNT_COLUMNS, ALBUM_COLUMNS,
    DEFAULT_ALBUM_TITLE, IMAGE_COLUMNS, PROCESSED_IMAGE_COLUMNS,
};
use super::postgres_schema::POSTGRES_SCHEMA;
use crate::error::{CoreError, Result};

pub struct PgCatalog {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

fn is_unique_violation(err: &postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

fn read_account(row: &postgres::Row) -> Result<AccountRow> {
    Ok(AccountRow {
        username: row.try_get(0)?,
        email: row.try_get(1)?,
        created_at: row.try_get(2)?,
    })
}

fn read_album(row: &postgres::Row) -> Result<AlbumRow> {
    Ok(AlbumRow {
        id: row.try_get(0)?,
        owner: row.try_get(1)?,
        title: row.try_get(2)?,
        is_default: row.try_get(3)?,
        created_at: row.try_get(4)?,
    })
}

fn read_image(row: &postgres::Row) -> Result<ImageRow> {
    Ok(ImageRow {
        id: row.try_get(0)?,
        owner: row.try_get(1)?,
        filename: row.try_get(2)?,
        content_hash: row.try_get(3)?,
        size_bytes: row.try_get(4)?,
        orientation: row.try_get(5)?,
        created_at: row.try_get(6)?,
    })
}

fn read_processed_image(row: &postgres::Row) -> Result<ProcessedImageRow> {
    Ok(ProcessedImageRow {
        id: row.try_get(0)?,
        owner: row.try_get(1)?,
        image_id: row.try_get(2)?,
        content_hash: row.try_get(3)?,
        size_bytes: row.try_get(4)?,
        orientation: row.try_get(5)?,
        created_at: row.try_get(6)?,
    })
}

fn account_exists(client: &mut impl GenericClient, username: &str) -> Result<bool> {
    Ok(client
        .query_opt("SELECT 1 FROM account WHERE username = $1", &[&username])?
        .is_some())
}

fn default_album_id(client: &mut impl GenericClient, owner: &str) -> Result<i64> {
    let row = client.query_opt(
        "SELECT id FROM album WHERE owner = $1 AND is_default",
        &[&owner],
    )?;
    match row {
        Some(row) => Ok(row.try_get(0)?),
        None if account_exists(&mut *client, owner)? => Err(CoreError::consistency(format!(
            "account {owner} has no default album"
        ))),
        None => Err(CoreError::not_found(format!("account {owner}"))),
    }
}

fn album_owner(client: &mut impl GenericClient, album_id: i64) -> Result<Option<String>> {
    let row = client.query_opt("SELECT owner FROM album WHERE id = $1", &[&album_id])?;
    Ok(row.map(|r| r.try_get(0)).transpose()?)
}

fn insert_image_row(client: &mut impl GenericClient, image: &NewImage) -> Result<i64> {
    let row = client.query_one(
        r#"
        INSERT INTO image (owner, filename, content_hash, size_bytes, orientation)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
        &[
            &image.owner,
            &image.filename,
            &image.content_hash.as_str(),
            &image.size_bytes,
            &image.orientation,
        ],
    )?;
    Ok(row.try_get(0)?)
}

fn insert_link(client: &mut impl GenericClient, album_id: i64, image_id: i64) -> Result<()> {
    if album_owner(&mut *client, album_id)?.is_none() {
        return Err(CoreError::not_found(format!("album {album_id}")));
    }
    if client
        .query_opt("SELECT 1 FROM image WHERE id = $1", &[&image_id])?
        .is_none()
    {
        return Err(CoreError::not_found(format!("image {image_id}")));
    }

    match client.execute(
        "INSERT INTO album_image (album_id, image_id) VALUES ($1, $2)",
        &[&album_id, &image_id],
    ) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(CoreError::conflict(format!(
            "image {image_id} is already in album {album_id}"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Abort the transaction's statements once `deadline` passes.
fn bound_statements(tx: &mut postgres::Transaction<'_>, deadline: Instant) -> Result<()> {
    let remaining_ms = deadline
        .saturating_duration_since(Instant::now())
        .as_millis()
        .max(1);
    tx.batch_execute(&format!("SET LOCAL statement_timeout = {remaining_ms}"))?;
    Ok(())
}

fn load_album(client: &mut impl GenericClient, album_id: i64) -> Result<Album> {
    let row = client
        .query_opt(
            &format!("SELECT {ALBUM_COLUMNS} FROM album WHERE id = $1"),
            &[&album_id],
        )?
        .ok_or_else(|| CoreError::not_found(format!("album {album_id}")))?;
    let album = read_album(&row)?;
    let image_ids = client
        .query(
            "SELECT image_id FROM album_image WHERE album_id = $1 ORDER BY seq",
            &[&album_id],
        )?
        .iter()
        .map(|r| r.try_get(0))
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    album.into_album(image_ids)
}

impl PgCatalog {
    pub fn open(url: &str, pool_size: u32) -> Result<Self> {
        let manager = PostgresConnectionManager::new(url.parse()?, NoTls);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        Ok(Self { pool })
    }

    pub fn initialize(&self) -> Result<()> {
        let mut client = self.pool.get()?;
        client.batch_execute(POSTGRES_SCHEMA)?;
        Ok(())
    }

    // ========================================================================
    // Account operations
    // ========================================================================

    pub fn create_account(&self, account: &NewAccount) -> Result<Account> {
        let mut client = self.pool.get()?;
        let mut tx = client.transaction()?;

        match tx.execute(
            "INSERT INTO account (username, email, password_hash) VALUES ($1, $2, $3)",
            &[&account.username, &account.email, &account.password_hash],
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
            "INSERT INTO album (owner, title, is_default) VALUES ($1, $2, TRUE)",
            &[&account.username, &DEFAULT_ALBUM_TITLE],
        )?;
        let row = tx.query_one(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE username = $1"),
            &[&account.username],
        )?;
        let account = read_account(&row)?;
        tx.commit()?;
        Account::try_from(account)
    }

    pub fn find_account(&self, username: &str) -> Result<Account> {
        let mut client = self.pool.get()?;
        let row = client
            .query_opt(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE username = $1"),
                &[&username],
            )?
            .ok_or_else(|| CoreError::not_found(format!("account {username}")))?;
        Account::try_from(read_account(&row)?)
    }

    // ========================================================================
    // Album operations
    // ========================================================================

    pub fn create_album(&self, owner: &str, title: &str) -> Result<Album> {
        let mut client = self.pool.get()?;
        let mut tx = client.transaction()?;
        if !account_exists(&mut tx, owner)? {
            return Err(CoreError::not_found(format!("account {owner}")));
        }
        let row = tx.query_one(
            "INSERT INTO album (owner, title, is_default) VALUES ($1, $2, FALSE) RETURNING id",
            &[&owner, &title],
        )?;
        let album = load_album(&mut tx, row.try_get(0)?)?;
        tx.commit()?;
        Ok(album)
    }

    pub fn find_default_album_id(&self, owner: &str) -> Result<i64> {
        let mut client = self.pool.get()?;
        default_album_id(&mut *client, owner)
    }

    pub fn list_albums_by_owner(&self, owner: &str) -> Result<Vec<AlbumSummary>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            r#"
            SELECT a.id, a.title, a.is_default,
                   (SELECT COUNT(*) FROM album_image ai WHERE ai.album_id = a.id) AS image_count
            FROM album a
            WHERE a.owner = $1
            ORDER BY a.id
            "#,
            &[&owner],
        )?;
        let albums = rows
            .iter()
            .map(|row| -> Result<AlbumSummary> {
                Ok(AlbumSummary {
                    id: row.try_get(0)?,
                    title: row.try_get(1)?,
                    is_default: row.try_get(2)?,
                    image_count: row.try_get(3)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if albums.is_empty() && !account_exists(&mut *client, owner)? {
            return Err(CoreError::not_found(format!("account {owner}")));
        }
        Ok(albums)
    }

    pub fn get_album(&self, album_id: i64) -> Result<Album> {
        let mut client = self.pool.get()?;
        load_album(&mut *client, album_id)
    }

    pub fn link_image_to_album(
        &self,
        album_id: i64,
        image_id: i64,
        deadline: Instant,
    ) -> Result<()> {
        let mut client = self.pool.get()?;
        check_deadline(deadline, "link image")?;
        let mut tx = client.transaction()?;
        bound_statements(&mut tx, deadline)?;
        insert_link(&mut tx, album_id, image_id)?;
        check_deadline(deadline, "link image")?;
        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // Image operations
    // ========================================================================

    pub fn insert_image(&self, image: &NewImage) -> Result<i64> {
        let mut client = self.pool.get()?;
        if !account_exists(&mut *client, &image.owner)? {
            return Err(CoreError::not_found(format!("account {}", image.owner)));
        }
        insert_image_row(&mut *client, image)
    }

    pub fn record_upload(
        &self,
        image: &NewImage,
        target_album: Option<i64>,
        deadline: Instant,
    ) -> Result<i64> {
        let mut client = self.pool.get()?;
        check_deadline(deadline, "record upload")?;
        let mut tx = client.transaction()?;
        bound_statements(&mut tx, deadline)?;

        let default_id = default_album_id(&mut tx, &image.owner)?;
        let target = target_album.filter(|&id| id != default_id);
        if let Some(album_id) = target {
            match album_owner(&mut tx, album_id)? {
                Some(owner) if owner == image.owner => {}
                _ => {
                    return Err(CoreError::not_found(format!(
                        "album {album_id} for owner {}",
                        image.owner
                    )));
                }
            }
        }

        let image_id = insert_image_row(&mut tx, image)?;
        insert_link(&mut tx, default_id, image_id)?;
        if let Some(album_id) = target {
            insert_link(&mut tx, album_id, image_id)?;
        }

        check_deadline(deadline, "record upload")?;
        tx.commit()?;
        Ok(image_id)
    }

    pub fn get_image(&self, owner: &str, image_id: i64) -> Result<Image> {
        let mut client = self.pool.get()?;
        let row = client
            .query_opt(
                &format!("SELECT {IMAGE_COLUMNS} FROM image WHERE owner = $1 AND id = $2"),
                &[&owner, &image_id],
            )?
            .ok_or_else(|| CoreError::not_found(format!("image {image_id} for owner {owner}")))?;
        Image::try_from(read_image(&row)?)
    }

    pub fn update_orientation(
        &self,
        owner: &str,
        image_id: i64,
        orientation: i32,
        deadline: Instant,
    ) -> Result<()> {
        let mut client = self.pool.get()?;
        check_deadline(deadline, "update orientation")?;
        let mut tx = client.transaction()?;
        bound_statements(&mut tx, deadline)?;

        let updated = tx.execute(
            "UPDATE image SET orientation = $1 WHERE owner = $2 AND id = $3",
            &[&orientation, &owner, &image_id],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found(format!("image {image_id} for owner {owner}")));
        }
        let invalidated = tx.execute(
            "DELETE FROM processed_image WHERE image_id = $1",
            &[&image_id],
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
        let mut client = self.pool.get()?;
        let row = client
            .query_opt(
                &format!(
                    r#"
                    SELECT {PROCESSED_IMAGE_COLUMNS}
                    FROM processed_image
                    WHERE owner = $1 AND image_id = $2
                      AND orientation = (SELECT orientation FROM image WHERE id = $2)
                    "#
                ),
                &[&owner, &image_id],
            )?
            .ok_or_else(|| {
                CoreError::not_found(format!("processed image {image_id} for owner {owner}"))
            })?;
        ProcessedImage::try_from(read_processed_image(&row)?)
    }

    pub fn record_processed_image(
        &self,
        processed: &NewProcessedImage,
        deadline: Instant,
    ) -> Result<ProcessedImage> {
        let mut client = self.pool.get()?;
        check_deadline(deadline, "record processed image")?;
        let mut tx = client.transaction()?;
        bound_statements(&mut tx, deadline)?;

        let current: i32 = tx
            .query_opt(
                "SELECT orientation FROM image WHERE owner = $1 AND id = $2 FOR UPDATE",
                &[&processed.owner, &processed.image_id],
            )?
            .ok_or_else(|| {
                CoreError::not_found(format!(
                    "image {} for owner {}",
                    processed.image_id, processed.owner
                ))
            })?
            .try_get(0)?;
        if current != processed.orientation {
            return Err(CoreError::conflict(format!(
                "image {} now has orientation {current}, derived image was made for {}",
                processed.image_id, processed.orientation
            )));
        }

        let row = tx.query_one(
            &format!(
                r#"
                INSERT INTO processed_image (owner, image_id, content_hash, size_bytes, orientation)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (image_id, orientation) DO UPDATE SET
                    content_hash = EXCLUDED.content_hash,
                    size_bytes = EXCLUDED.size_bytes,
                    created_at = to_char(now() AT TIME ZONE 'utc', 'YYYY-MM-DD HH24:MI:SS')
                RETURNING {PROCESSED_IMAGE_COLUMNS}
                "#
            ),
            &[
                &processed.owner,
                &processed.image_id,
                &processed.content_hash.as_str(),
                &processed.size_bytes,
                &processed.orientation,
            ],
        )?;
        let processed = read_processed_image(&row)?;
        check_deadline(deadline, "record processed image")?;
        tx.commit()?;
        ProcessedImage::try_from(processed)
    }
}
