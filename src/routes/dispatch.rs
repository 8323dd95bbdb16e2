//! Request classification and the authentication middleware.
//!
//! Every request is classified by its first path segment before any handler
//! runs. Public probes pass straight through; everything else must
//! authenticate, and a failure is rendered in the shape of the protocol the
//! request was addressed to.

use crate::{
    auth::{
        AuthError, SignedRequest,
        payload::{is_hex_digest, verify_body},
        sigv4::{UNSIGNED_PAYLOAD, X_AMZ_CONTENT_SHA256, payload_hash},
    },
    errors::{AppError, S3Error},
    models::credential::AuthenticatedUser,
    state::AppState,
};
use axum::{
    body::{Body, to_bytes},
    extract::{OriginalUri, Request, State},
    http::{StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{debug, warn};

/// First path segments served by the native protocol.
pub const NATIVE_VERBS: [&str; 7] = [
    "put",
    "put_binary",
    "get",
    "update",
    "append",
    "update_key",
    "delete",
];

pub const PUBLIC_PATHS: [&str; 2] = ["healthz", "readyz"];

/// Native clients without SigV4 identify with these two headers.
pub const USER_HEADER: &str = "user";
pub const ACCESS_KEY_HEADER: &str = "x-access-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Native,
    S3,
    Public,
}

/// Decide which protocol a request path belongs to.
pub fn classify(path: &str) -> Protocol {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    if NATIVE_VERBS.contains(&first) {
        Protocol::Native
    } else if PUBLIC_PATHS.contains(&first) && path.trim_matches('/') == first {
        Protocol::Public
    } else {
        Protocol::S3
    }
}

enum Rejection {
    Auth(AuthError),
    TooLarge,
    UnsupportedPayload,
}

fn render(protocol: Protocol, path: &str, rejection: Rejection) -> Response {
    match (protocol, rejection) {
        (Protocol::Native, Rejection::Auth(err)) => AppError::from(err).into_response(),
        (Protocol::Native, Rejection::TooLarge) => {
            AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        }
        (Protocol::Native, Rejection::UnsupportedPayload) => {
            AppError::bad_request("streaming payload signatures are not supported").into_response()
        }
        (_, Rejection::Auth(_)) => S3Error::access_denied(path).into_response(),
        (_, Rejection::TooLarge) => S3Error::entity_too_large(path).into_response(),
        (_, Rejection::UnsupportedPayload) => S3Error::invalid_request(
            "streaming payload signatures are not supported",
            path,
        )
        .into_response(),
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

async fn authenticate_parts(
    state: &AppState,
    protocol: Protocol,
    parts: &Parts,
    body: Body,
) -> Result<(AuthenticatedUser, Body), Rejection> {
    if !parts.headers.contains_key(header::AUTHORIZATION) {
        if protocol != Protocol::Native {
            return Err(Rejection::Auth(AuthError::MissingHeader("authorization")));
        }
        let user = header_str(parts, USER_HEADER)
            .ok_or(Rejection::Auth(AuthError::MissingHeader(USER_HEADER)))?;
        let access_key = header_str(parts, ACCESS_KEY_HEADER)
            .ok_or(Rejection::Auth(AuthError::MissingHeader(ACCESS_KEY_HEADER)))?;
        let identity = state
            .authenticator
            .verify_access_key(user, access_key)
            .map_err(Rejection::Auth)?;
        return Ok((identity, body));
    }

    // Sign over the URI the client sent, before any prefix stripping.
    let uri = parts
        .extensions
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or(&parts.uri);

    let (hash, body) = match header_str(parts, X_AMZ_CONTENT_SHA256) {
        Some(declared) if declared.starts_with("STREAMING-") => {
            return Err(Rejection::UnsupportedPayload);
        }
        Some(declared) if declared == UNSIGNED_PAYLOAD => (declared.to_string(), body),
        Some(declared) if is_hex_digest(declared) => {
            (declared.to_string(), verify_body(body, declared))
        }
        Some(declared) => {
            return Err(Rejection::Auth(AuthError::Malformed(format!(
                "unsupported x-amz-content-sha256 `{}`",
                declared
            ))));
        }
        None => {
            let bytes = to_bytes(body, state.max_buffered_body_bytes)
                .await
                .map_err(|_| Rejection::TooLarge)?;
            (payload_hash(&bytes), Body::from(bytes))
        }
    };

    let request = SignedRequest {
        method: &parts.method,
        uri,
        headers: &parts.headers,
        payload_hash: &hash,
    };
    let identity = state
        .authenticator
        .verify(&request, Utc::now())
        .map_err(Rejection::Auth)?;
    Ok((identity, body))
}

/// Authentication middleware installed in front of every route.
pub async fn authenticate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| original.0.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let protocol = classify(&path);
    if protocol == Protocol::Public {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    match authenticate_parts(&state, protocol, &parts, body).await {
        Ok((user, body)) => {
            debug!(
                "authenticated {} ({}) for {:?} {}",
                user.user_id, user.access_key, protocol, path
            );
            parts.extensions.insert(user);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(rejection) => {
            if let Rejection::Auth(err) = &rejection {
                warn!(
                    "authentication failed for {} {} ({:?}): {}",
                    parts.method, path, protocol, err
                );
            }
            render(protocol, &path, rejection)
        }
    }
}
