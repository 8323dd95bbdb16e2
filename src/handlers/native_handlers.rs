//! Native key API: one route per verb, JSON responses.
//!
//! Keys live in the caller's own namespace, inside the bucket named by the
//! `Bucket` header (`default` when absent). The same object is reachable
//! over S3 as `/{bucket}/{key}` with the same credential.

use crate::{
    errors::AppError,
    handlers::{body_stream, object_attrs, set_object_headers},
    models::{
        bucket::{DEFAULT_BUCKET, object_identifier, validate_bucket_name},
        credential::AuthenticatedUser,
        object::{ObjectAttrs, ObjectSummary},
    },
    services::object_store::ObjectStore,
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

/// Selects the bucket a native request operates in.
pub const BUCKET_HEADER: &str = "bucket";

/// Store identifier for `key` as seen by `user` with the request's bucket.
pub fn native_identifier(
    user: &AuthenticatedUser,
    headers: &HeaderMap,
    key: &str,
) -> Result<String, AppError> {
    let bucket = match headers.get(BUCKET_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| AppError::bad_request("Bucket header is not valid ASCII"))?,
        None => DEFAULT_BUCKET,
    };
    validate_bucket_name(bucket).map_err(|err| AppError::bad_request(err.to_string()))?;
    Ok(object_identifier(&user.user_id, bucket, key))
}

/// `POST /put/{*key}`: create or replace `key` with the request body.
pub async fn put_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ObjectSummary>, AppError> {
    let identifier = native_identifier(&user, &headers, &key)?;
    let object = store
        .put(&identifier, object_attrs(&headers), body_stream(body))
        .await?;
    Ok(Json(object.summary()))
}

/// `POST /put_binary/{*key}`: every form field is one chunk, stored in
/// field order as a single object.
pub async fn put_binary(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ObjectSummary>, AppError> {
    let identifier = native_identifier(&user, &headers, &key)?;
    let mut chunks = Vec::new();
    let mut attrs = ObjectAttrs::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        if attrs.content_type.is_none() {
            attrs.content_type = field.content_type().map(str::to_string);
        }
        let chunk = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;
        chunks.push(chunk);
    }

    let object = store.put_binary_chunks(&identifier, attrs, chunks).await?;
    Ok(Json(object.summary()))
}

/// `GET /get/{*key}`: raw content with the object headers.
pub async fn get_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let found = store.get(&native_identifier(&user, &headers, &key)?).await?;
    let mut response = Response::new(Body::from(found.content));
    set_object_headers(response.headers_mut(), &found.object);
    Ok(response)
}

/// `POST /update/{*key}`: replace the content of an existing key.
pub async fn update_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ObjectSummary>, AppError> {
    let identifier = native_identifier(&user, &headers, &key)?;
    let object = store.update(&identifier, body_stream(body)).await?;
    Ok(Json(object.summary()))
}

/// `POST /append/{*key}`
pub async fn append_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ObjectSummary>, AppError> {
    let identifier = native_identifier(&user, &headers, &key)?;
    let object = store.append(&identifier, body_stream(body)).await?;
    Ok(Json(object.summary()))
}

/// `PUT /update_key/{old_key}/{new_key}`. Slashes inside either key must be
/// sent as `%2F`.
pub async fn rename_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((old_key, new_key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<ObjectSummary>, AppError> {
    let old = native_identifier(&user, &headers, &old_key)?;
    let new = native_identifier(&user, &headers, &new_key)?;
    let object = store.rename(&old, &new).await?;
    Ok(Json(object.summary()))
}

/// `DELETE /delete/{*key}`. Unlike the S3 surface, a missing key is a 404.
pub async fn delete_object(
    State(store): State<ObjectStore>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    store.delete(&native_identifier(&user, &headers, &key)?).await?;
    let body: Value = json!({ "deleted": key });
    Ok((StatusCode::OK, Json(body)))
}
