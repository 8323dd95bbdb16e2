//! Request authentication.
//!
//! [`Authenticator`] verifies SigV4 `Authorization` headers against the
//! configured credentials. It holds no mutable state: the same request and
//! clock always produce the same verdict. Failure reasons are kept apart
//! for logging, but callers render every failure identically.

pub mod credentials;
pub mod payload;
pub mod sigv4;

use crate::{
    errors::ErrorKind,
    models::credential::AuthenticatedUser,
};
use axum::http::{HeaderMap, Method, Uri, header};
use chrono::{DateTime, Utc};
use credentials::CredentialStore;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("unknown access key")]
    UnknownAccessKey,
    #[error("access key does not belong to the given user")]
    UserMismatch,
    #[error("credential scope mismatch: {0}")]
    ScopeMismatch(String),
    #[error("request time is outside the allowed clock skew")]
    RequestExpired,
    #[error("signature does not match")]
    SignatureMismatch,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::AuthenticationFailed
    }
}

/// The parts of a request covered by its signature.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    /// Hex SHA-256 of the body, or the literal `UNSIGNED-PAYLOAD`.
    pub payload_hash: &'a str,
}

#[derive(Debug)]
pub struct Authenticator {
    credentials: CredentialStore,
    region: String,
    max_clock_skew: Duration,
}

impl Authenticator {
    pub fn new(
        credentials: CredentialStore,
        region: impl Into<String>,
        max_clock_skew: Duration,
    ) -> Self {
        Self {
            credentials,
            region: region.into(),
            max_clock_skew,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Verify a SigV4-signed request as of `now`.
    pub fn verify(
        &self,
        request: &SignedRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedUser, AuthError> {
        let authorization = request
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingHeader("authorization"))?
            .to_str()
            .map_err(|_| AuthError::Malformed("authorization is not ASCII".into()))?;
        let parsed = sigv4::parse_authorization(authorization)?;
        let scope = &parsed.credential;

        let credential = self
            .credentials
            .get(&scope.access_key)
            .ok_or(AuthError::UnknownAccessKey)?;

        if scope.service != sigv4::SERVICE {
            return Err(AuthError::ScopeMismatch(format!("service `{}`", scope.service)));
        }
        if scope.region != self.region {
            return Err(AuthError::ScopeMismatch(format!("region `{}`", scope.region)));
        }

        let time = sigv4::request_time(request.headers)?;
        if scope.date != time.format(sigv4::SCOPE_DATE_FORMAT).to_string() {
            return Err(AuthError::ScopeMismatch(format!("date `{}`", scope.date)));
        }
        let skew = (now - time).num_seconds().unsigned_abs();
        if skew > self.max_clock_skew.as_secs() {
            return Err(AuthError::RequestExpired);
        }

        let canonical = sigv4::canonical_request(
            request.method,
            request.uri,
            request.headers,
            &parsed.signed_headers,
            request.payload_hash,
        )?;
        let to_sign = sigv4::string_to_sign(time, &scope.scope(), &canonical);
        let key = sigv4::signing_key(
            &credential.secret_key,
            &scope.date,
            &scope.region,
            &scope.service,
        );
        if !sigv4::verify_signature(&key, &to_sign, &parsed.signature) {
            tracing::debug!("canonical request was:\n{}", canonical);
            return Err(AuthError::SignatureMismatch);
        }

        Ok(AuthenticatedUser::from(credential))
    }

    /// Header-based identification used by native clients that do not sign.
    pub fn verify_access_key(
        &self,
        user_id: &str,
        access_key: &str,
    ) -> Result<AuthenticatedUser, AuthError> {
        let credential = self
            .credentials
            .get(access_key)
            .ok_or(AuthError::UnknownAccessKey)?;
        if credential.user_id != user_id {
            return Err(AuthError::UserMismatch);
        }
        Ok(AuthenticatedUser::from(credential))
    }
}
