//! The single source of truth for object content and metadata.
//!
//! Metadata rows live in SQLite, content lives in immutable blobs on disk.
//! A content mutation writes a fresh blob, swaps the object's row to it in one
//! statement while holding the identifier's lock, then removes the blob that
//! was replaced. Readers therefore see either the old or the new content,
//! never a mix, and a failed or abandoned write leaves the object untouched.

use crate::{
    auth::payload::is_payload_mismatch,
    errors::ErrorKind,
    models::{
        bucket::OWNER_SEPARATOR,
        object::{Object, ObjectAttrs},
    },
    services::{
        blob_store::{BlobStore, WrittenBlob},
        key_locks::KeyLocks,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, stream};
use sqlx::{SqlitePool, types::Json};
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, info};

const OBJECT_COLUMNS: &str =
    "identifier, blob_id, content_type, size_bytes, etag, last_modified, user_metadata";

pub const MAX_IDENTIFIER_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object `{0}` already exists")]
    Conflict(String),
    #[error("invalid identifier `{identifier}`: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },
    #[error("multipart upload `{0}` not found")]
    NoSuchUpload(String),
    #[error("invalid part: {0}")]
    InvalidPart(String),
    #[error("parts must be listed in ascending order")]
    InvalidPartOrder,
    #[error("content of `{identifier}` does not match its fingerprint {expected} (found {actual})")]
    Corrupted {
        identifier: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) | StoreError::NoSuchUpload(_) => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::InvalidIdentifier { .. }
            | StoreError::InvalidPart(_)
            | StoreError::InvalidPartOrder => ErrorKind::MalformedRequest,
            StoreError::Io(err) if is_payload_mismatch(err) => ErrorKind::MalformedRequest,
            StoreError::Corrupted { .. } | StoreError::Sqlx(_) | StoreError::Io(_) => {
                ErrorKind::StorageFault
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Object content read in full together with its metadata.
#[derive(Debug, Clone)]
pub struct ObjectContent {
    pub object: Object,
    pub content: Bytes,
}

/// ObjectStore provides the storage verbs shared by both protocols:
/// put, put of pre-split chunks, get, update, append, rename, copy, delete
/// and prefix listing.
///
/// Cloning is cheap; all clones share the pool, the blob root and the lock
/// table.
#[derive(Clone)]
pub struct ObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Payload storage.
    pub(crate) blobs: BlobStore,

    /// Per-identifier mutual exclusion for every mutation.
    pub(crate) locks: Arc<KeyLocks>,
}

impl ObjectStore {
    /// Create an ObjectStore backed by the provided SQLite pool and using
    /// `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            blobs: BlobStore::new(base_path),
            locks: Arc::new(KeyLocks::default()),
        }
    }

    pub fn base_path(&self) -> &std::path::Path {
        self.blobs.root()
    }

    /// Reject identifiers that cannot be stored.
    ///
    /// An identifier may carry one owner part ending in
    /// [`OWNER_SEPARATOR`]; the length limit applies to the rest.
    pub fn validate_identifier(identifier: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
        };
        let (owner, scoped) = match identifier.split_once(OWNER_SEPARATOR) {
            Some((owner, scoped)) => (Some(owner), scoped),
            None => (None, identifier),
        };
        if owner.is_some_and(str::is_empty) {
            return Err(invalid("owner must not be empty"));
        }
        if scoped.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if scoped.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid("longer than 1024 bytes"));
        }
        if owner
            .into_iter()
            .chain([scoped])
            .any(|part| part.chars().any(|c| c.is_control()))
        {
            return Err(invalid("contains control characters"));
        }
        Ok(())
    }

    pub(crate) async fn fetch_optional(&self, identifier: &str) -> StoreResult<Option<Object>> {
        let sql = format!("SELECT {} FROM objects WHERE identifier = ?", OBJECT_COLUMNS);
        Ok(sqlx::query_as::<_, Object>(&sql)
            .bind(identifier)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn fetch(&self, identifier: &str) -> StoreResult<Object> {
        self.fetch_optional(identifier)
            .await?
            .ok_or_else(|| StoreError::NotFound(identifier.to_string()))
    }

    /// Point `identifier` at `blob`, creating the row if needed.
    async fn upsert(
        &self,
        identifier: &str,
        blob: &WrittenBlob,
        attrs: &ObjectAttrs,
    ) -> StoreResult<Object> {
        let sql = format!(
            r#"
            INSERT INTO objects (
                identifier, blob_id, content_type, size_bytes, etag, last_modified, user_metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                blob_id = excluded.blob_id,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                user_metadata = excluded.user_metadata
            RETURNING {}
            "#,
            OBJECT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Object>(&sql)
            .bind(identifier)
            .bind(blob.id)
            .bind(attrs.content_type.clone())
            .bind(blob.size_bytes)
            .bind(&blob.etag)
            .bind(Utc::now())
            .bind(Json(&attrs.user_metadata))
            .fetch_one(&*self.db)
            .await?)
    }

    /// Swap a freshly written blob into `identifier`. The caller must hold the
    /// identifier's lock. On failure the new blob is removed; on success the
    /// replaced blob is.
    pub(crate) async fn commit_blob(
        &self,
        identifier: &str,
        blob: WrittenBlob,
        attrs: &ObjectAttrs,
        previous: Option<&Object>,
    ) -> StoreResult<Object> {
        match self.upsert(identifier, &blob, attrs).await {
            Ok(object) => {
                if let Some(prev) = previous {
                    self.blobs.discard(prev.blob_id).await;
                }
                Ok(object)
            }
            Err(err) => {
                self.blobs.discard(blob.id).await;
                Err(err)
            }
        }
    }

    /// Create or fully replace an object from a byte stream.
    ///
    /// The stream is drained into a new blob before the identifier is locked,
    /// so slow uploads never block other writers of the same key.
    pub async fn put<S>(
        &self,
        identifier: &str,
        attrs: ObjectAttrs,
        stream: S,
    ) -> StoreResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        Self::validate_identifier(identifier)?;
        let blob = self.blobs.write_stream(stream).await?;

        let _guard = self.locks.lock(identifier).await;
        let previous = self.fetch_optional(identifier).await?;
        let object = self
            .commit_blob(identifier, blob, &attrs, previous.as_ref())
            .await?;
        info!(
            "stored {} ({} bytes, etag {})",
            identifier, object.size_bytes, object.etag
        );
        Ok(object)
    }

    /// Concatenate pre-split chunks in order and store them as one object.
    pub async fn put_binary_chunks(
        &self,
        identifier: &str,
        attrs: ObjectAttrs,
        chunks: Vec<Bytes>,
    ) -> StoreResult<Object> {
        debug!("put_binary_chunks {} with {} chunks", identifier, chunks.len());
        let stream = stream::iter(chunks.into_iter().map(Ok::<_, io::Error>));
        self.put(identifier, attrs, stream).await
    }

    /// Metadata only.
    pub async fn head(&self, identifier: &str) -> StoreResult<Object> {
        Self::validate_identifier(identifier)?;
        self.fetch(identifier).await
    }

    /// Read an object's full content, verifying it against its fingerprint.
    pub async fn get(&self, identifier: &str) -> StoreResult<ObjectContent> {
        Self::validate_identifier(identifier)?;
        let (object, content) = {
            let _guard = self.locks.lock(identifier).await;
            let object = self.fetch(identifier).await?;
            let content = self.blobs.read(object.blob_id).await?;
            (object, content)
        };

        let actual = format!("{:x}", md5::compute(&content));
        if actual != object.etag {
            return Err(StoreError::Corrupted {
                identifier: identifier.to_string(),
                expected: object.etag.clone(),
                actual,
            });
        }
        debug!("read {} ({} bytes)", identifier, content.len());
        Ok(ObjectContent { object, content })
    }

    /// Open an object's content for streaming.
    ///
    /// The file handle stays valid even if the object is replaced or deleted
    /// afterwards, so the caller always streams one consistent version.
    pub async fn open(&self, identifier: &str) -> StoreResult<(Object, File)> {
        Self::validate_identifier(identifier)?;
        let _guard = self.locks.lock(identifier).await;
        let object = self.fetch(identifier).await?;
        let file = self.blobs.open(object.blob_id).await?;
        Ok((object, file))
    }

    /// Replace the content of an existing object, keeping its attributes.
    pub async fn update<S>(&self, identifier: &str, stream: S) -> StoreResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        Self::validate_identifier(identifier)?;
        let blob = self.blobs.write_stream(stream).await?;

        let _guard = self.locks.lock(identifier).await;
        let previous = match self.fetch_optional(identifier).await {
            Ok(Some(previous)) => previous,
            Ok(None) => {
                self.blobs.discard(blob.id).await;
                return Err(StoreError::NotFound(identifier.to_string()));
            }
            Err(err) => {
                self.blobs.discard(blob.id).await;
                return Err(err);
            }
        };
        let attrs = ObjectAttrs {
            content_type: previous.content_type.clone(),
            user_metadata: previous.user_metadata.0.clone(),
        };
        let object = self
            .commit_blob(identifier, blob, &attrs, Some(&previous))
            .await?;
        info!("updated {} ({} bytes)", identifier, object.size_bytes);
        Ok(object)
    }

    /// Append bytes to an existing object.
    pub async fn append<S>(&self, identifier: &str, stream: S) -> StoreResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        Self::validate_identifier(identifier)?;
        let staged = self.blobs.write_stream(stream).await?;

        let result = {
            let _guard = self.locks.lock(identifier).await;
            self.append_locked(identifier, &staged).await
        };
        self.blobs.discard(staged.id).await;

        let object = result?;
        info!(
            "appended {} bytes to {} (now {} bytes)",
            staged.size_bytes, identifier, object.size_bytes
        );
        Ok(object)
    }

    async fn append_locked(&self, identifier: &str, staged: &WrittenBlob) -> StoreResult<Object> {
        let previous = self.fetch(identifier).await?;
        let joined = self.blobs.concat(&[previous.blob_id, staged.id]).await?;
        let attrs = ObjectAttrs {
            content_type: previous.content_type.clone(),
            user_metadata: previous.user_metadata.0.clone(),
        };
        self.commit_blob(identifier, joined, &attrs, Some(&previous))
            .await
    }

    /// Move an object to a new identifier.
    pub async fn rename(&self, old: &str, new: &str) -> StoreResult<Object> {
        Self::validate_identifier(old)?;
        Self::validate_identifier(new)?;
        let _guard = self.locks.lock_pair(old, new).await;

        let current = self.fetch(old).await?;
        if old == new {
            return Ok(current);
        }
        if self.fetch_optional(new).await?.is_some() {
            return Err(StoreError::Conflict(new.to_string()));
        }

        let sql = format!(
            "UPDATE objects SET identifier = ?, last_modified = ? WHERE identifier = ? RETURNING {}",
            OBJECT_COLUMNS
        );
        let object = sqlx::query_as::<_, Object>(&sql)
            .bind(new)
            .bind(Utc::now())
            .bind(old)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(old.to_string()))?;
        info!("renamed {} -> {}", old, new);
        Ok(object)
    }

    /// Copy `source` to `dest`. With `attrs` set the copy gets those
    /// attributes, otherwise it inherits the source's.
    pub async fn copy(
        &self,
        source: &str,
        dest: &str,
        attrs: Option<ObjectAttrs>,
    ) -> StoreResult<Object> {
        Self::validate_identifier(source)?;
        Self::validate_identifier(dest)?;
        let _guard = self.locks.lock_pair(source, dest).await;

        let src = self.fetch(source).await?;
        let previous = if source == dest {
            Some(src.clone())
        } else {
            self.fetch_optional(dest).await?
        };
        let blob = self.blobs.concat(&[src.blob_id]).await?;
        let attrs = attrs.unwrap_or_else(|| ObjectAttrs {
            content_type: src.content_type.clone(),
            user_metadata: src.user_metadata.0.clone(),
        });
        let object = self
            .commit_blob(dest, blob, &attrs, previous.as_ref())
            .await?;
        info!("copied {} -> {}", source, dest);
        Ok(object)
    }

    /// Delete an object, returning its last metadata.
    pub async fn delete(&self, identifier: &str) -> StoreResult<Object> {
        Self::validate_identifier(identifier)?;
        let _guard = self.locks.lock(identifier).await;

        let sql = format!(
            "DELETE FROM objects WHERE identifier = ? RETURNING {}",
            OBJECT_COLUMNS
        );
        let object = sqlx::query_as::<_, Object>(&sql)
            .bind(identifier)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(identifier.to_string()))?;
        self.blobs.discard(object.blob_id).await;
        info!("deleted {}", identifier);
        Ok(object)
    }

    /// All objects whose identifier starts with `prefix`, in lexicographic
    /// identifier order.
    pub async fn list(&self, prefix: &str) -> StoreResult<Vec<Object>> {
        let sql = format!(
            "SELECT {} FROM objects WHERE substr(identifier, 1, length(?1)) = ?1 ORDER BY identifier ASC",
            OBJECT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Object>(&sql)
            .bind(prefix)
            .fetch_all(&*self.db)
            .await?)
    }

    /// One page of [`ObjectStore::list`], starting strictly after `after`.
    pub async fn list_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Object>> {
        let sql = format!(
            "SELECT {} FROM objects \
             WHERE substr(identifier, 1, length(?1)) = ?1 AND identifier > ?2 \
             ORDER BY identifier ASC LIMIT ?3",
            OBJECT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Object>(&sql)
            .bind(prefix)
            .bind(after.unwrap_or(""))
            .bind(limit as i64)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Whether any object lives under `prefix`.
    pub async fn prefix_exists(&self, prefix: &str) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM objects WHERE substr(identifier, 1, length(?1)) = ?1 LIMIT 1",
        )
        .bind(prefix)
        .fetch_optional(&*self.db)
        .await?;
        Ok(found.is_some())
    }

    /// Distinct first path segments of the identifiers under `prefix`
    /// (with `prefix` removed), together with the oldest modification time
    /// seen beneath each.
    pub async fn list_top_level_prefixes(
        &self,
        prefix: &str,
    ) -> StoreResult<Vec<(String, DateTime<Utc>)>> {
        Ok(sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT substr(rest, 1, instr(rest, '/') - 1) AS segment,
                    MIN(last_modified) AS created
             FROM (
                 SELECT substr(identifier, length(?1) + 1) AS rest, last_modified
                 FROM objects
                 WHERE substr(identifier, 1, length(?1)) = ?1
             )
             WHERE instr(rest, '/') > 1
             GROUP BY segment
             ORDER BY segment ASC",
        )
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?)
    }
}
