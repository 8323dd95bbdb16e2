//! Represents multipart upload sessions and parts.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A multipart upload session, initiated before uploading large files in parts.
#[derive(Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Unique upload ID (returned to client).
    pub upload_id: String,

    /// Identifier the assembled object will be stored under.
    pub identifier: String,

    /// Content type captured at initiation.
    pub content_type: Option<String>,

    /// User metadata captured at initiation.
    pub user_metadata: Json<BTreeMap<String, String>>,

    /// Timestamp when upload was initiated.
    pub initiated_at: DateTime<Utc>,
}

/// Represents a single uploaded part in a multipart upload session.
#[derive(Clone, FromRow, Debug)]
pub struct MultipartPart {
    /// Parent upload session.
    pub upload_id: String,

    /// Part number (1-based).
    pub part_number: i64,

    /// Blob holding the part bytes.
    pub blob_id: Uuid,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the part bytes.
    pub etag: String,

    /// Timestamp when this part was uploaded.
    pub uploaded_at: DateTime<Utc>,
}
