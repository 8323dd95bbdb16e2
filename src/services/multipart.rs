//! Staged multipart uploads.
//!
//! Each part is written to its own blob and recorded in `multipart_parts`.
//! Completion concatenates the selected parts into a new blob and swaps it
//! into the target identifier exactly the way `put` does, so the assembled
//! object appears atomically.

use crate::{
    models::{
        multipart::{MultipartPart, MultipartUpload},
        object::{Object, ObjectAttrs},
    },
    services::object_store::{ObjectStore, StoreError, StoreResult},
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use sqlx::types::Json;
use std::io;
use tracing::{info, warn};
use uuid::Uuid;

pub const MAX_PART_NUMBER: i64 = 10_000;

const PART_COLUMNS: &str = "upload_id, part_number, blob_id, size_bytes, etag, uploaded_at";

/// Lock key for an upload session; never a valid object identifier.
fn upload_lock_key(upload_id: &str) -> String {
    format!("\u{0}multipart/{}", upload_id)
}

impl ObjectStore {
    /// Start a multipart upload targeting `identifier`.
    pub async fn create_multipart(
        &self,
        identifier: &str,
        attrs: ObjectAttrs,
    ) -> StoreResult<MultipartUpload> {
        Self::validate_identifier(identifier)?;
        let upload = sqlx::query_as::<_, MultipartUpload>(
            "INSERT INTO multipart_uploads (upload_id, identifier, content_type, user_metadata, initiated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING upload_id, identifier, content_type, user_metadata, initiated_at",
        )
        .bind(Uuid::new_v4().simple().to_string())
        .bind(identifier)
        .bind(attrs.content_type.clone())
        .bind(Json(&attrs.user_metadata))
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        info!("initiated multipart upload {} for {}", upload.upload_id, identifier);
        Ok(upload)
    }

    async fn fetch_upload(
        &self,
        upload_id: &str,
        identifier: &str,
    ) -> StoreResult<MultipartUpload> {
        sqlx::query_as::<_, MultipartUpload>(
            "SELECT upload_id, identifier, content_type, user_metadata, initiated_at
             FROM multipart_uploads WHERE upload_id = ? AND identifier = ?",
        )
        .bind(upload_id)
        .bind(identifier)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))
    }

    /// Store one part. Uploading the same part number again replaces it.
    pub async fn upload_part<S>(
        &self,
        upload_id: &str,
        identifier: &str,
        part_number: i64,
        stream: S,
    ) -> StoreResult<MultipartPart>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StoreError::InvalidPart(format!(
                "part number must be between 1 and {}",
                MAX_PART_NUMBER
            )));
        }
        self.fetch_upload(upload_id, identifier).await?;
        let blob = self.blobs.write_stream(stream).await?;

        let _guard = self.locks.lock(&upload_lock_key(upload_id)).await;
        let stored = async {
            // The session may have been completed or aborted while streaming.
            self.fetch_upload(upload_id, identifier).await?;
            let previous: Option<Uuid> = sqlx::query_scalar(
                "SELECT blob_id FROM multipart_parts WHERE upload_id = ? AND part_number = ?",
            )
            .bind(upload_id)
            .bind(part_number)
            .fetch_optional(&*self.db)
            .await?;

            let sql = format!(
                "INSERT INTO multipart_parts ({cols}) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(upload_id, part_number) DO UPDATE SET
                     blob_id = excluded.blob_id,
                     size_bytes = excluded.size_bytes,
                     etag = excluded.etag,
                     uploaded_at = excluded.uploaded_at
                 RETURNING {cols}",
                cols = PART_COLUMNS
            );
            let part = sqlx::query_as::<_, MultipartPart>(&sql)
                .bind(upload_id)
                .bind(part_number)
                .bind(blob.id)
                .bind(blob.size_bytes)
                .bind(&blob.etag)
                .bind(Utc::now())
                .fetch_one(&*self.db)
                .await?;
            Ok::<_, StoreError>((part, previous))
        }
        .await;

        match stored {
            Ok((part, previous)) => {
                if let Some(old_blob) = previous {
                    self.blobs.discard(old_blob).await;
                }
                Ok(part)
            }
            Err(err) => {
                self.blobs.discard(blob.id).await;
                Err(err)
            }
        }
    }

    /// Parts uploaded so far, ordered by part number.
    pub async fn list_parts(
        &self,
        upload_id: &str,
        identifier: &str,
    ) -> StoreResult<Vec<MultipartPart>> {
        self.fetch_upload(upload_id, identifier).await?;
        self.parts_of(upload_id).await
    }

    async fn parts_of(&self, upload_id: &str) -> StoreResult<Vec<MultipartPart>> {
        let sql = format!(
            "SELECT {} FROM multipart_parts WHERE upload_id = ? ORDER BY part_number ASC",
            PART_COLUMNS
        );
        Ok(sqlx::query_as::<_, MultipartPart>(&sql)
            .bind(upload_id)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Assemble the upload into `identifier`.
    ///
    /// `requested` lists `(part_number, etag)` pairs from the client; they must
    /// be strictly ascending and match uploaded parts. An empty list
    /// assembles every uploaded part.
    pub async fn complete_multipart(
        &self,
        upload_id: &str,
        identifier: &str,
        requested: &[(i64, String)],
    ) -> StoreResult<Object> {
        let lock_key = upload_lock_key(upload_id);
        let _guard = self.locks.lock_pair(&lock_key, identifier).await;

        let upload = self.fetch_upload(upload_id, identifier).await?;
        let uploaded = self.parts_of(upload_id).await?;
        let selected = select_parts(&uploaded, requested)?;
        let blob_ids: Vec<Uuid> = selected.iter().map(|p| p.blob_id).collect();

        let blob = self.blobs.concat(&blob_ids).await?;
        let attrs = ObjectAttrs {
            content_type: upload.content_type.clone(),
            user_metadata: upload.user_metadata.0.clone(),
        };
        let previous = self.fetch_optional(identifier).await?;
        let object = self
            .commit_blob(identifier, blob, &attrs, previous.as_ref())
            .await?;

        // The object is live from here on; a leftover session is only logged.
        if let Err(err) = self.drop_session(upload_id, &uploaded).await {
            warn!(
                "completed multipart upload {} but could not remove its session: {}",
                upload_id, err
            );
        }
        info!(
            "completed multipart upload {} into {} ({} parts, {} bytes)",
            upload_id,
            identifier,
            selected.len(),
            object.size_bytes
        );
        Ok(object)
    }

    /// Discard an upload and all its parts.
    pub async fn abort_multipart(&self, upload_id: &str, identifier: &str) -> StoreResult<()> {
        let _guard = self.locks.lock(&upload_lock_key(upload_id)).await;
        self.fetch_upload(upload_id, identifier).await?;
        let parts = self.parts_of(upload_id).await?;
        self.drop_session(upload_id, &parts).await?;
        info!("aborted multipart upload {} for {}", upload_id, identifier);
        Ok(())
    }

    async fn drop_session(&self, upload_id: &str, parts: &[MultipartPart]) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for part in parts {
            self.blobs.discard(part.blob_id).await;
        }
        Ok(())
    }
}

fn normalize_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

fn select_parts<'a>(
    uploaded: &'a [MultipartPart],
    requested: &[(i64, String)],
) -> StoreResult<Vec<&'a MultipartPart>> {
    if requested.is_empty() {
        if uploaded.is_empty() {
            return Err(StoreError::InvalidPart("no parts have been uploaded".into()));
        }
        return Ok(uploaded.iter().collect());
    }

    let mut selected = Vec::with_capacity(requested.len());
    let mut last = 0;
    for (number, etag) in requested {
        if *number <= last {
            return Err(StoreError::InvalidPartOrder);
        }
        last = *number;
        let part = uploaded
            .iter()
            .find(|p| p.part_number == *number)
            .ok_or_else(|| StoreError::InvalidPart(format!("part {} was not uploaded", number)))?;
        if normalize_etag(etag) != part.etag {
            return Err(StoreError::InvalidPart(format!(
                "etag mismatch for part {}",
                number
            )));
        }
        selected.push(part);
    }
    Ok(selected)
}
