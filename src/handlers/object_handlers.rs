//! S3 object endpoints under `/{bucket}/{*key}`.
//!
//! One handler per method; query parameters and headers select between the
//! plain object operation, copy and the multipart sub-resources.

use crate::{
    errors::S3Error,
    handlers::{
        body_stream, multipart_handlers, object_attrs, set_object_headers,
        xml::copy_object_result,
    },
    models::{
        bucket::{object_identifier, validate_bucket_name},
        credential::AuthenticatedUser,
        object::{Object, ObjectAttrs},
    },
    services::object_store::{ObjectStore, StoreError},
};
use axum::{
    Extension,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Objects up to this size are read whole and checked against their ETag
/// before a GET answers; larger ones are streamed.
const VERIFIED_READ_LIMIT: i64 = 8 * 1024 * 1024;

pub const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";
pub const METADATA_DIRECTIVE_HEADER: &str = "x-amz-metadata-directive";

/// Sub-resource selectors accepted on object URLs.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    #[serde(rename = "partNumber")]
    pub part_number: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    pub uploads: Option<String>,
}

/// Bucket and key addressed by a request, already validated and scoped to
/// the authenticated user.
pub struct ObjectPath {
    pub owner: String,
    pub bucket: String,
    pub key: String,
    pub identifier: String,
}

impl ObjectPath {
    pub fn new(owner: &str, bucket: String, key: String) -> Result<Self, S3Error> {
        let resource = format!("/{}/{}", bucket, key);
        validate_bucket_name(&bucket)
            .map_err(|err| S3Error::invalid_bucket_name(err.reason, resource))?;
        Ok(Self {
            owner: owner.to_string(),
            identifier: object_identifier(owner, &bucket, &key),
            bucket,
            key,
        })
    }

    pub fn resource(&self) -> String {
        format!("/{}/{}", self.bucket, self.key)
    }

    pub fn store_error(&self, err: StoreError) -> S3Error {
        S3Error::from_store(err, self.resource())
    }
}

/// `PUT /{bucket}/{*key}`: PutObject, CopyObject or UploadPart.
pub async fn put_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    let target = ObjectPath::new(&user.user_id, bucket, key)?;

    if let Some(upload_id) = query.upload_id.as_deref() {
        let part_number = query.part_number.as_deref().ok_or_else(|| {
            S3Error::invalid_argument("partNumber is required with uploadId", target.resource())
        })?;
        return multipart_handlers::upload_part(&store, &target, upload_id, part_number, body)
            .await;
    }
    if let Some(source) = headers.get(COPY_SOURCE_HEADER) {
        return copy_object(&store, &target, source, &headers).await;
    }

    let object = store
        .put(&target.identifier, object_attrs(&headers), body_stream(body))
        .await
        .map_err(|err| target.store_error(err))?;
    Ok(etag_response(&object))
}

fn etag_response(object: &Object) -> Response {
    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(&object.quoted_etag()) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

/// Split `x-amz-copy-source` into bucket and key. Accepts an optional leading
/// `/` and ignores a `?versionId=` suffix.
pub fn parse_copy_source(raw: &str) -> Option<(String, String)> {
    let raw = raw.split_once('?').map_or(raw, |(path, _)| path);
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    let (bucket, key) = decoded.trim_start_matches('/').split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}

async fn copy_object(
    store: &ObjectStore,
    target: &ObjectPath,
    source: &HeaderValue,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let (src_bucket, src_key) = source
        .to_str()
        .ok()
        .and_then(parse_copy_source)
        .ok_or_else(|| {
            S3Error::invalid_argument("x-amz-copy-source must be bucket/key", target.resource())
        })?;
    let source = ObjectPath::new(&target.owner, src_bucket, src_key)?;

    let attrs: Option<ObjectAttrs> = match headers
        .get(METADATA_DIRECTIVE_HEADER)
        .map(|v| v.to_str().unwrap_or_default().to_ascii_uppercase())
        .as_deref()
    {
        None | Some("COPY") => None,
        Some("REPLACE") => Some(object_attrs(headers)),
        Some(other) => {
            return Err(S3Error::invalid_argument(
                format!("unknown metadata directive `{}`", other),
                target.resource(),
            ));
        }
    };

    let object = store
        .copy(&source.identifier, &target.identifier, attrs)
        .await
        .map_err(|err| match err {
            StoreError::NotFound(_) => S3Error::no_such_key(source.resource()),
            other => target.store_error(other),
        })?;

    let mut response = copy_object_result(&object).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    Ok(response)
}

/// Inclusive byte range resolved against an object of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a single `bytes=` range. `Ok(None)` means the header should be
/// ignored; `Err(())` means it cannot be satisfied.
pub fn parse_range(value: &str, size: u64) -> Result<Option<ByteRange>, ()> {
    let Some(ranges) = value.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if ranges.contains(',') {
        return Ok(None);
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return Ok(None);
    };
    let (first, last) = (first.trim(), last.trim());

    let range = if first.is_empty() {
        let suffix: u64 = last.parse().map_err(|_| ())?;
        if suffix == 0 || size == 0 {
            return Err(());
        }
        ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        }
    } else {
        let start: u64 = first.parse().map_err(|_| ())?;
        if start >= size {
            return Err(());
        }
        let end = if last.is_empty() {
            size - 1
        } else {
            let end: u64 = last.parse().map_err(|_| ())?;
            if end < start {
                return Err(());
            }
            end.min(size - 1)
        };
        ByteRange { start, end }
    };
    Ok(Some(range))
}

/// `GET /{bucket}/{*key}`: GetObject, or ListParts with `uploadId`.
pub async fn get_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    let target = ObjectPath::new(&user.user_id, bucket, key)?;
    if let Some(upload_id) = query.upload_id.as_deref() {
        return multipart_handlers::list_parts(&store, &target, upload_id).await;
    }

    let head = store
        .head(&target.identifier)
        .await
        .map_err(|err| target.store_error(err))?;

    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        match parse_range(range, head.size_bytes.max(0) as u64) {
            Ok(Some(range)) => return ranged_response(&store, &target, range).await,
            Ok(None) => {}
            Err(()) => return Err(S3Error::invalid_range(target.resource())),
        }
    }

    let mut response = if head.size_bytes <= VERIFIED_READ_LIMIT {
        let found = store
            .get(&target.identifier)
            .await
            .map_err(|err| target.store_error(err))?;
        let mut response = Response::new(Body::from(found.content));
        set_object_headers(response.headers_mut(), &found.object);
        response
    } else {
        let (object, file) = store
            .open(&target.identifier)
            .await
            .map_err(|err| target.store_error(err))?;
        let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
        set_object_headers(response.headers_mut(), &object);
        response
    };
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(response)
}

async fn ranged_response(
    store: &ObjectStore,
    target: &ObjectPath,
    range: ByteRange,
) -> Result<Response, S3Error> {
    let (object, mut file) = store
        .open(&target.identifier)
        .await
        .map_err(|err| target.store_error(err))?;
    // The object may have shrunk since the range was resolved.
    let size = object.size_bytes.max(0) as u64;
    if range.start >= size {
        return Err(S3Error::invalid_range(target.resource()));
    }
    let range = ByteRange {
        start: range.start,
        end: range.end.min(size - 1),
    };
    file.seek(SeekFrom::Start(range.start))
        .await
        .map_err(|err| target.store_error(err.into()))?;

    let stream = ReaderStream::new(file.take(range.len()));
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    let headers = response.headers_mut();
    set_object_headers(headers, &object);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
    if let Ok(value) = HeaderValue::from_str(&format!(
        "bytes {}-{}/{}",
        range.start, range.end, size
    )) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(response)
}

/// `HEAD /{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, S3Error> {
    let target = ObjectPath::new(&user.user_id, bucket, key)?;
    let object = store
        .head(&target.identifier)
        .await
        .map_err(|err| target.store_error(err))?;
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &object);
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(response)
}

/// `DELETE /{bucket}/{*key}`: idempotent delete, or AbortMultipartUpload.
pub async fn delete_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, S3Error> {
    let target = ObjectPath::new(&user.user_id, bucket, key)?;
    if let Some(upload_id) = query.upload_id.as_deref() {
        return multipart_handlers::abort_upload(&store, &target, upload_id).await;
    }

    match store.delete(&target.identifier).await {
        Ok(_) | Err(StoreError::NotFound(_)) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(err) => Err(target.store_error(err)),
    }
}

/// `POST /{bucket}/{*key}`: CreateMultipartUpload (`?uploads`) or
/// CompleteMultipartUpload (`?uploadId=`).
pub async fn post_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    let target = ObjectPath::new(&user.user_id, bucket, key)?;
    if query.uploads.is_some() {
        return multipart_handlers::create_upload(&store, &target, &headers).await;
    }
    if let Some(upload_id) = query.upload_id.as_deref() {
        return multipart_handlers::complete_upload(&store, &target, upload_id, body).await;
    }
    Err(S3Error::invalid_request(
        "POST on an object requires ?uploads or ?uploadId",
        target.resource(),
    ))
}
