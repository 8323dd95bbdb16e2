//! Bucket-level S3 endpoints. A bucket is only the identifier prefix
//! `bucket/`; nothing about it is stored on its own.

use crate::{
    errors::S3Error,
    handlers::xml::{
        ListEntry, ListObjectsV2, S3_NAMESPACE, XML_DECLARATION, decode_continuation_token,
        encode_continuation_token, list_buckets_result, xml_escape,
    },
    models::{
        bucket::{bucket_prefix, owner_prefix, validate_bucket_name},
        credential::AuthenticatedUser,
        object::Object,
    },
    services::object_store::{ObjectStore, StoreResult},
    state::AppState,
};
use axum::{
    Extension,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

pub const DEFAULT_MAX_KEYS: usize = 1000;

/// Rows fetched per store round trip while building a page.
const LIST_BATCH: usize = 1000;

/// Query params accepted by ListObjectsV2.
#[derive(Debug, Default, Deserialize)]
pub struct ListObjectsV2Query {
    #[serde(rename = "list-type")]
    pub list_type: Option<String>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<String>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
    /// ListObjects (v1) spelling of `start-after`.
    pub marker: Option<String>,
    pub location: Option<String>,
}

fn checked_bucket(bucket: &str) -> Result<(), S3Error> {
    validate_bucket_name(bucket)
        .map_err(|err| S3Error::invalid_bucket_name(err.reason, format!("/{}", bucket)))
}

fn xml_response(body: String) -> Response {
    let mut response = body.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    response
}

/// One listing entry: an object or a rolled-up common prefix.
#[derive(Debug)]
pub enum PageEntry {
    Object { key: String, object: Object },
    CommonPrefix(String),
}

impl PageEntry {
    fn key(&self) -> &str {
        match self {
            PageEntry::Object { key, .. } => key,
            PageEntry::CommonPrefix(prefix) => prefix,
        }
    }
}

#[derive(Debug, Default)]
pub struct ListPage {
    pub entries: Vec<PageEntry>,
    /// Relative key of the last entry when more entries follow.
    pub next_marker: Option<String>,
}

/// Collect one ListObjectsV2 page for the bucket whose identifiers start
/// with `base`.
///
/// Keys are relative to `base`. `after` is the last key (or common prefix)
/// the client has already seen; entries at or before it are skipped.
pub async fn collect_page(
    store: &ObjectStore,
    base: &str,
    prefix: &str,
    delimiter: Option<&str>,
    after: Option<&str>,
    max_keys: usize,
) -> StoreResult<ListPage> {
    let mut page = ListPage::default();
    if max_keys == 0 {
        return Ok(page);
    }

    let full_prefix = format!("{}{}", base, prefix);
    let mut cursor: Option<String> = after.map(|a| format!("{}{}", base, a));

    loop {
        let batch = store
            .list_page(&full_prefix, cursor.as_deref(), LIST_BATCH)
            .await?;
        let exhausted = batch.len() < LIST_BATCH;
        let Some(last) = batch.last() else {
            return Ok(page);
        };
        cursor = Some(last.identifier.clone());

        for object in batch {
            let key = object.identifier[base.len()..].to_string();
            let rolled_up = delimiter.and_then(|delim| {
                let rest = &key[prefix.len()..];
                rest.find(delim)
                    .map(|idx| key[..prefix.len() + idx + delim.len()].to_string())
            });

            let entry = match rolled_up {
                Some(common) => {
                    let seen = page.entries.last().is_some_and(|e| e.key() == common)
                        || after.is_some_and(|a| common.as_str() <= a);
                    if seen {
                        continue;
                    }
                    PageEntry::CommonPrefix(common)
                }
                None => PageEntry::Object { key, object },
            };

            if page.entries.len() == max_keys {
                page.next_marker = page.entries.last().map(|e| e.key().to_string());
                return Ok(page);
            }
            page.entries.push(entry);
        }

        if exhausted {
            return Ok(page);
        }
    }
}

/// `GET /{bucket}`: ListObjectsV2 (or GetBucketLocation with `?location`).
pub async fn list_objects(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsV2Query>,
) -> Result<Response, S3Error> {
    checked_bucket(&bucket)?;
    let resource = format!("/{}", bucket);

    if q.location.is_some() {
        return Ok(xml_response(format!(
            "{}<LocationConstraint xmlns=\"{}\">{}</LocationConstraint>",
            XML_DECLARATION,
            S3_NAMESPACE,
            xml_escape(state.authenticator.region())
        )));
    }
    if let Some(list_type) = q.list_type.as_deref().filter(|t| *t != "2") {
        return Err(S3Error::invalid_argument(
            format!("unsupported list-type `{}`", list_type),
            resource,
        ));
    }

    let max_keys = match q.max_keys.as_deref() {
        None => DEFAULT_MAX_KEYS,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| {
                S3Error::invalid_argument("max-keys must be a non-negative integer", &resource)
            })?
            .min(DEFAULT_MAX_KEYS),
    };
    let prefix = q.prefix.as_deref().unwrap_or("");
    let delimiter = q.delimiter.as_deref().filter(|d| !d.is_empty());

    let resume = match q.continuation_token.as_deref() {
        Some(token) => Some(decode_continuation_token(token).ok_or_else(|| {
            S3Error::invalid_argument("The continuation token provided is incorrect", &resource)
        })?),
        None => q.start_after.clone().or_else(|| q.marker.clone()),
    };

    let page = collect_page(
        &state.store,
        &bucket_prefix(&user.user_id, &bucket),
        prefix,
        delimiter,
        resume.as_deref(),
        max_keys,
    )
    .await
    .map_err(|err| S3Error::from_store(err, &resource))?;

    let mut contents = Vec::new();
    let mut common_prefixes = Vec::new();
    for entry in &page.entries {
        match entry {
            PageEntry::Object { key, object } => contents.push(ListEntry { key, object }),
            PageEntry::CommonPrefix(prefix) => common_prefixes.push(prefix.clone()),
        }
    }

    let listing = ListObjectsV2 {
        bucket: &bucket,
        prefix,
        delimiter,
        max_keys,
        continuation_token: q.continuation_token.as_deref(),
        start_after: q.start_after.as_deref(),
        next_continuation_token: page.next_marker.as_deref().map(encode_continuation_token),
        contents,
        common_prefixes,
    };
    Ok(xml_response(listing.to_xml()))
}

/// `HEAD /{bucket}`: 200 when at least one object lives under the bucket.
pub async fn head_bucket(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, S3Error> {
    checked_bucket(&bucket)?;
    let exists = store
        .prefix_exists(&bucket_prefix(&user.user_id, &bucket))
        .await
        .map_err(|err| S3Error::from_store(err, format!("/{}", bucket)))?;
    if exists {
        Ok(StatusCode::OK)
    } else {
        Err(S3Error::no_such_bucket(format!("/{}", bucket)))
    }
}

/// `PUT /{bucket}`: buckets come into being with their first object, so
/// this only validates the name.
pub async fn create_bucket(Path(bucket): Path<String>) -> Result<Response, S3Error> {
    checked_bucket(&bucket)?;
    let mut response = StatusCode::OK.into_response();
    if let Ok(location) = HeaderValue::from_str(&format!("/{}", bucket)) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// `DELETE /{bucket}`: succeeds only when no object lives under the bucket.
pub async fn delete_bucket(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, S3Error> {
    checked_bucket(&bucket)?;
    let resource = format!("/{}", bucket);
    let occupied = store
        .prefix_exists(&bucket_prefix(&user.user_id, &bucket))
        .await
        .map_err(|err| S3Error::from_store(err, &resource))?;
    if occupied {
        return Err(S3Error::bucket_not_empty(resource));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /`: ListBuckets, derived from the first segment of the caller's
/// identifiers.
pub async fn list_buckets(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, S3Error> {
    let buckets = store
        .list_top_level_prefixes(&owner_prefix(&user.user_id))
        .await
        .map_err(|err| S3Error::from_store(err, "/"))?;
    let buckets: Vec<_> = buckets
        .into_iter()
        .filter(|(name, _)| validate_bucket_name(name).is_ok())
        .collect();
    Ok(xml_response(list_buckets_result(&user.user_id, &buckets)))
}
