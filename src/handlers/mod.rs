//! HTTP handlers for both protocols and the helpers they share.

pub mod bucket_handlers;
pub mod health_handlers;
pub mod multipart_handlers;
pub mod native_handlers;
pub mod object_handlers;
pub mod xml;

use crate::models::object::{DEFAULT_CONTENT_TYPE, Object, ObjectAttrs};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, header},
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{collections::BTreeMap, io};

pub const USER_METADATA_PREFIX: &str = "x-amz-meta-";
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Request body as the byte stream the store consumes.
pub fn body_stream(body: Body) -> impl Stream<Item = io::Result<Bytes>> {
    body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other))
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// `x-amz-meta-*` headers with the prefix removed.
pub fn user_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(USER_METADATA_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

pub fn object_attrs(headers: &HeaderMap) -> ObjectAttrs {
    ObjectAttrs {
        content_type: content_type(headers),
        user_metadata: user_metadata(headers),
    }
}

/// Headers describing `object`: type, length, ETag, modification time and
/// user metadata.
pub fn set_object_headers(headers: &mut HeaderMap, object: &Object) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(object.content_type_or_default())
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.size_bytes.max(0)));
    if let Ok(value) = HeaderValue::from_str(&object.quoted_etag()) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) =
        HeaderValue::from_str(&object.last_modified.format(HTTP_DATE_FORMAT).to_string())
    {
        headers.insert(header::LAST_MODIFIED, value);
    }
    for (key, value) in object.user_metadata.iter() {
        let name = HeaderName::try_from(format!("{}{}", USER_METADATA_PREFIX, key));
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}
