//! Multipart upload sub-resources of an object URL. Dispatched from
//! `object_handlers` by query parameters.

use crate::{
    auth::payload::is_payload_mismatch,
    errors::S3Error,
    handlers::{
        body_stream, object_attrs,
        object_handlers::ObjectPath,
        xml::{
            complete_multipart_result, initiate_multipart_result, list_parts_result,
            parse_complete_multipart,
        },
    },
    services::{multipart::MAX_PART_NUMBER, object_store::ObjectStore},
};
use axum::{
    body::{Body, to_bytes},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Upper bound for a CompleteMultipartUpload document.
const COMPLETE_BODY_LIMIT: usize = 2 * 1024 * 1024;

fn xml_response(body: String) -> Response {
    let mut response = body.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    response
}

pub async fn create_upload(
    store: &ObjectStore,
    target: &ObjectPath,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let upload = store
        .create_multipart(&target.identifier, object_attrs(headers))
        .await
        .map_err(|err| target.store_error(err))?;
    Ok(xml_response(initiate_multipart_result(
        &target.bucket,
        &target.key,
        &upload.upload_id,
    )))
}

pub async fn upload_part(
    store: &ObjectStore,
    target: &ObjectPath,
    upload_id: &str,
    part_number: &str,
    body: Body,
) -> Result<Response, S3Error> {
    let part_number: i64 = part_number
        .parse()
        .ok()
        .filter(|n| (1..=MAX_PART_NUMBER).contains(n))
        .ok_or_else(|| {
            S3Error::invalid_argument(
                format!("partNumber must be an integer between 1 and {}", MAX_PART_NUMBER),
                target.resource(),
            )
        })?;

    let part = store
        .upload_part(upload_id, &target.identifier, part_number, body_stream(body))
        .await
        .map_err(|err| target.store_error(err))?;

    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", part.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

pub async fn complete_upload(
    store: &ObjectStore,
    target: &ObjectPath,
    upload_id: &str,
    body: Body,
) -> Result<Response, S3Error> {
    let bytes = to_bytes(body, COMPLETE_BODY_LIMIT).await.map_err(|err| {
        if is_payload_mismatch(&err) {
            S3Error::content_sha256_mismatch(target.resource())
        } else {
            S3Error::malformed_xml(target.resource())
        }
    })?;
    let text = std::str::from_utf8(&bytes).map_err(|_| S3Error::malformed_xml(target.resource()))?;
    let requested =
        parse_complete_multipart(text).ok_or_else(|| S3Error::malformed_xml(target.resource()))?;

    let object = store
        .complete_multipart(upload_id, &target.identifier, &requested)
        .await
        .map_err(|err| target.store_error(err))?;

    Ok(xml_response(complete_multipart_result(
        &target.resource(),
        &target.bucket,
        &target.key,
        &object,
    )))
}

pub async fn abort_upload(
    store: &ObjectStore,
    target: &ObjectPath,
    upload_id: &str,
) -> Result<Response, S3Error> {
    store
        .abort_multipart(upload_id, &target.identifier)
        .await
        .map_err(|err| target.store_error(err))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn list_parts(
    store: &ObjectStore,
    target: &ObjectPath,
    upload_id: &str,
) -> Result<Response, S3Error> {
    let parts = store
        .list_parts(upload_id, &target.identifier)
        .await
        .map_err(|err| target.store_error(err))?;
    Ok(xml_response(list_parts_result(
        &target.bucket,
        &target.key,
        upload_id,
        &parts,
    )))
}
