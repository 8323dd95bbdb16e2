//! Error taxonomy shared by both protocols and the two ways it is rendered:
//! JSON for the native API and XML error documents for the S3 surface.

use crate::{
    auth::{AuthError, payload::is_payload_mismatch},
    handlers::xml::xml_escape,
    models::bucket::object_key,
    services::object_store::StoreError,
};
use axum::{
    Json,
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

/// Domain error classes. Every library error maps onto exactly one of these
/// and each protocol handler decides how to present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    AuthenticationFailed,
    MalformedRequest,
    StorageFault,
}

impl ErrorKind {
    /// Status used by the native protocol.
    pub fn native_status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            ErrorKind::MalformedRequest => StatusCode::BAD_REQUEST,
            ErrorKind::StorageFault => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A lightweight wrapper for native-protocol errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized. The message never says why.
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "authentication failed")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let kind = err.kind();
        let message = match &err {
            StoreError::NotFound(id) => format!("key `{}` not found", object_key(id)),
            StoreError::Conflict(id) => format!("key `{}` already exists", object_key(id)),
            StoreError::InvalidIdentifier { reason, .. } => format!("invalid key: {}", reason),
            _ if kind == ErrorKind::StorageFault => {
                tracing::error!("storage fault: {}", err);
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        AppError::new(kind.native_status(), message)
    }
}

impl From<AuthError> for AppError {
    fn from(_: AuthError) -> Self {
        AppError::unauthorized()
    }
}

/// An S3 error document: `<Error><Code/><Message/><Resource/><RequestId/></Error>`.
#[derive(Debug)]
pub struct S3Error {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub resource: String,
}

impl S3Error {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            resource: resource.into(),
        }
    }

    pub fn access_denied(resource: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "AccessDenied", "Access Denied", resource)
    }

    pub fn no_such_key(resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NoSuchKey",
            "The specified key does not exist.",
            resource,
        )
    }

    pub fn no_such_bucket(resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NoSuchBucket",
            "The specified bucket does not exist.",
            resource,
        )
    }

    pub fn invalid_bucket_name(reason: &str, resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "InvalidBucketName",
            format!("The specified bucket is not valid: {}", reason),
            resource,
        )
    }

    pub fn bucket_not_empty(resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "BucketNotEmpty",
            "The bucket you tried to delete is not empty.",
            resource,
        )
    }

    pub fn invalid_range(resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            "InvalidRange",
            "The requested range is not satisfiable.",
            resource,
        )
    }

    pub fn entity_too_large(resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "EntityTooLarge",
            "Your proposed upload exceeds the maximum allowed size.",
            resource,
        )
    }

    pub fn invalid_argument(msg: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidArgument", msg, resource)
    }

    pub fn invalid_request(msg: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidRequest", msg, resource)
    }

    pub fn content_sha256_mismatch(resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "XAmzContentSHA256Mismatch",
            "The provided 'x-amz-content-sha256' header does not match what was computed.",
            resource,
        )
    }

    pub fn malformed_xml(resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "MalformedXML",
            "The XML you provided was not well-formed or did not validate.",
            resource,
        )
    }

    pub fn internal(resource: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError",
            "We encountered an internal error. Please try again.",
            resource,
        )
    }

    /// Translate a store failure for the object or upload at `resource`.
    pub fn from_store(err: StoreError, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        match err {
            StoreError::Io(ref io) if is_payload_mismatch(io) => {
                Self::content_sha256_mismatch(resource)
            }
            StoreError::NotFound(_) => Self::no_such_key(resource),
            StoreError::NoSuchUpload(_) => Self::new(
                StatusCode::NOT_FOUND,
                "NoSuchUpload",
                "The specified multipart upload does not exist.",
                resource,
            ),
            StoreError::Conflict(id) => Self::new(
                StatusCode::CONFLICT,
                "OperationAborted",
                format!("conflicting write: {}", object_key(&id)),
                resource,
            ),
            StoreError::InvalidPart(msg) => {
                Self::new(StatusCode::BAD_REQUEST, "InvalidPart", msg, resource)
            }
            StoreError::InvalidPartOrder => Self::new(
                StatusCode::BAD_REQUEST,
                "InvalidPartOrder",
                "The list of parts was not in ascending order.",
                resource,
            ),
            StoreError::InvalidIdentifier { reason, .. } => {
                Self::invalid_argument(reason, resource)
            }
            other => {
                tracing::error!("storage fault on {}: {}", resource, other);
                Self::internal(resource)
            }
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                "<Error>",
                "<Code>{}</Code>",
                "<Message>{}</Message>",
                "<Resource>{}</Resource>",
                "<RequestId>{}</RequestId>",
                "</Error>"
            ),
            self.code,
            xml_escape(&self.message),
            xml_escape(&self.resource),
            Uuid::new_v4().simple()
        )
    }
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for S3Error {}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.to_xml()));
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml"),
        );
        response
    }
}
