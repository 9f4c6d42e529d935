//! Batch ingestion: identity, then blob, then catalog, one payload at a time.

use tokio::time::Instant;

use super::Library;
use crate::db::NewImage;
use crate::error::{CoreError, Result};
use crate::identity;
use crate::store::PutOutcome;

/// One named payload from the request layer.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub owner: String,
    /// Explicit album to link into besides the default album.
    /// `None` or `Some(0)` links into the default album only.
    pub target_album: Option<i64>,
    pub orientation: i32,
    pub uploads: Vec<Upload>,
    /// Bounds the whole batch. Without it, each store and catalog call gets
    /// one configured I/O timeout of its own.
    pub deadline: Option<Instant>,
}

impl IngestRequest {
    pub fn new(owner: impl Into<String>, uploads: Vec<Upload>) -> Self {
        Self {
            owner: owner.into(),
            target_album: None,
            orientation: 0,
            uploads,
            deadline: None,
        }
    }

    pub fn with_album(mut self, album_id: i64) -> Self {
        self.target_album = Some(album_id);
        self
    }

    pub fn with_orientation(mut self, orientation: i32) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// The payload that stopped a batch.
#[derive(Debug)]
pub struct IngestFailure {
    /// Zero-based position in the request's uploads.
    pub index: usize,
    pub filename: String,
    pub error: CoreError,
}

#[derive(Debug)]
pub struct IngestReport {
    /// Ids of the ingested prefix, in input order.
    pub image_ids: Vec<i64>,
    pub failure: Option<IngestFailure>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

impl Library {
    /// Ingest a batch of uploads for `request.owner`.
    ///
    /// Request-level problems fail the whole call. Once payloads are being
    /// processed, the first failing one stops the batch and is reported in
    /// [`IngestReport::failure`]; earlier payloads stay ingested.
    #[tracing::instrument(
        skip(self, request),
        fields(owner = %request.owner, uploads = request.uploads.len())
    )]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        let IngestRequest {
            owner,
            target_album,
            orientation,
            uploads,
            deadline,
        } = request;
        let context = format!("ingest(owner={owner})");

        let target_album = validate_request(&owner, target_album, orientation, &uploads)
            .map_err(|e| e.context(&context))?;
        self.check_destination(&owner, target_album)
            .await
            .map_err(|e| e.context(&context))?;

        let mut image_ids = Vec::with_capacity(uploads.len());

        for (index, upload) in uploads.into_iter().enumerate() {
            match self
                .ingest_one(&owner, target_album, orientation, &upload, deadline)
                .await
            {
                Ok(image_id) => image_ids.push(image_id),
                Err(error) => {
                    let error = error.context(format!("{context}, payload {index}"));
                    tracing::warn!(
                        index,
                        filename = %upload.filename,
                        error = %error,
                        "Upload failed, stopping batch"
                    );
                    return Ok(IngestReport {
                        image_ids,
                        failure: Some(IngestFailure {
                            index,
                            filename: upload.filename,
                            error,
                        }),
                    });
                }
            }
        }

        tracing::info!(ingested = image_ids.len(), "Ingested batch");
        Ok(IngestReport {
            image_ids,
            failure: None,
        })
    }

    /// The owner must have a default album, and an explicit target must be theirs.
    async fn check_destination(&self, owner: &str, target_album: Option<i64>) -> Result<()> {
        let owner = owner.to_string();
        self.run_catalog(move |catalog| {
            catalog.find_default_album_id(&owner)?;
            if let Some(album_id) = target_album {
                let album = catalog.get_album(album_id)?;
                if album.owner != owner {
                    return Err(CoreError::not_found(format!(
                        "album {album_id} for owner {owner}"
                    )));
                }
            }
            Ok(())
        })
        .await
    }

    async fn ingest_one(
        &self,
        owner: &str,
        target_album: Option<i64>,
        orientation: i32,
        upload: &Upload,
        deadline: Option<Instant>,
    ) -> Result<i64> {
        let identity = identity::derive(&upload.bytes)?;

        let put_by = self.deadline(deadline);
        let outcome = self
            .run_store(put_by, "put blob", self.store.put(&identity.hash, &upload.bytes))
            .await?;
        if outcome == PutOutcome::AlreadyPresent {
            tracing::debug!(hash = %identity.hash, "Reusing stored blob");
        }

        let image = NewImage {
            owner: owner.to_string(),
            filename: upload.filename.clone(),
            content_hash: identity.hash.clone(),
            size_bytes: identity.size_bytes()?,
            orientation,
        };
        let commit_by = self.deadline(deadline);
        let commit_by_std = commit_by.into_std();
        let image_id = self
            .run_catalog_until(commit_by, "record upload", move |catalog| {
                catalog.record_upload(&image, target_album, commit_by_std)
            })
            .await?;

        tracing::debug!(
            image_id,
            hash = %identity.hash,
            format = ?identity.format,
            "Ingested upload"
        );
        Ok(image_id)
    }
}

/// Normalize the target album, rejecting what cannot be ingested at all.
fn validate_request(
    owner: &str,
    target_album: Option<i64>,
    orientation: i32,
    uploads: &[Upload],
) -> Result<Option<i64>> {
    if owner.trim().is_empty() {
        return Err(CoreError::invalid("owner must not be empty"));
    }
    if uploads.is_empty() {
        return Err(CoreError::invalid("no uploads in request"));
    }
    if orientation < 0 {
        return Err(CoreError::invalid(format!(
            "orientation must not be negative, got {orientation}"
        )));
    }
    match target_album {
        None | Some(0) => Ok(None),
        Some(id) if id < 0 => Err(CoreError::invalid(format!(
            "album id must be positive, got {id}"
        ))),
        Some(id) => Ok(Some(id)),
    }
}
