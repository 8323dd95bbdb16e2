//! Represents an object stored under a single identifier.

use super::bucket::object_key;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Default MIME type reported for objects stored without one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata row for one live object.
///
/// The `Object` struct describes the content, it does not hold the bytes.
/// Content lives in the blob named by `blob_id`; `size_bytes` and `etag`
/// always describe that blob exactly.
#[derive(Clone, FromRow, Debug)]
pub struct Object {
    /// Unique identifier, `owner \u{1f} bucket/key` for objects written
    /// through either protocol.
    pub identifier: String,

    /// Immutable payload blob currently holding the content.
    pub blob_id: Uuid,

    /// Content type (MIME type), if one was supplied.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Lowercase hex MD5 of the content.
    pub etag: String,

    /// Timestamp of the last mutating operation.
    pub last_modified: DateTime<Utc>,

    /// User-defined metadata (`x-amz-meta-*` without the prefix).
    pub user_metadata: Json<BTreeMap<String, String>>,
}

impl Object {
    pub fn content_type_or_default(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// ETag in the quoted form S3 clients expect.
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    pub fn summary(&self) -> ObjectSummary {
        ObjectSummary {
            key: object_key(&self.identifier).to_string(),
            size: self.size_bytes,
            etag: self.etag.clone(),
            content_type: self.content_type_or_default().to_string(),
            last_modified: self
                .last_modified
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Caller-controlled attributes attached to an object on write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectAttrs {
    pub content_type: Option<String>,
    pub user_metadata: BTreeMap<String, String>,
}

impl ObjectAttrs {
    pub fn with_content_type(content_type: Option<String>) -> Self {
        Self {
            content_type,
            user_metadata: BTreeMap::new(),
        }
    }
}

/// JSON shape returned by the native protocol for stored objects.
#[derive(Serialize, Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub content_type: String,
    pub last_modified: String,
}
