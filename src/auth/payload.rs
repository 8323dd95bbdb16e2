//! Checking a request body against the SHA-256 its signature covers.
//!
//! The digest is only known once the whole body has been read, so the body
//! is wrapped in a stream that hashes every chunk and fails at the end when
//! the digest differs. Consumers see that failure before their final write,
//! which keeps a tampered body from ever becoming visible.

use axum::{BoxError, body::Body};
use futures::{StreamExt, stream};
use sha2::{Digest, Sha256};
use std::{error::Error as StdError, io};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("x-amz-content-sha256 does not match the request body")]
pub struct PayloadDigestMismatch;

/// Whether `value` has the shape of a hex SHA-256 digest.
pub fn is_hex_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Wrap `body` so that it fails with [`PayloadDigestMismatch`] after the last
/// chunk unless its SHA-256 equals `expected` (hex, any case).
pub fn verify_body(body: Body, expected: &str) -> Body {
    let expected = expected.to_ascii_lowercase();
    let state = (body.into_data_stream(), Some(Sha256::new()), expected);

    let verified = stream::unfold(state, |(mut inner, hasher, expected)| async move {
        let mut hasher = hasher?;
        match inner.next().await {
            Some(Ok(chunk)) => {
                hasher.update(&chunk);
                Some((Ok(chunk), (inner, Some(hasher), expected)))
            }
            Some(Err(err)) => Some((Err(BoxError::from(err)), (inner, None, expected))),
            None => {
                if hex::encode(hasher.finalize()) == expected {
                    None
                } else {
                    let err = BoxError::from(PayloadDigestMismatch);
                    Some((Err(err), (inner, None, expected)))
                }
            }
        }
    });
    Body::from_stream(verified)
}

/// Whether `err`, or anything it wraps, is a [`PayloadDigestMismatch`].
pub fn is_payload_mismatch(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<PayloadDigestMismatch>() {
            return true;
        }
        // io::Error hides its payload from `source()`.
        if let Some(inner) = err.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            if is_payload_mismatch(inner) {
                return true;
            }
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::sigv4::payload_hash;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn matching_body_passes_through() {
        let verified = verify_body(Body::from("hello"), &payload_hash(b"hello"));
        let bytes = to_bytes(verified, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn uppercase_digest_is_accepted() {
        let digest = payload_hash(b"hello").to_ascii_uppercase();
        let verified = verify_body(Body::from("hello"), &digest);
        assert!(to_bytes(verified, usize::MAX).await.is_ok());
    }

    #[tokio::test]
    async fn swapped_body_fails_after_last_chunk() {
        let verified = verify_body(Body::from("EVIL!"), &payload_hash(b"hello"));
        let err = to_bytes(verified, usize::MAX).await.unwrap_err();
        assert!(is_payload_mismatch(&err));

        let wrapped = io::Error::other(err);
        assert!(is_payload_mismatch(&wrapped));
        assert!(!is_payload_mismatch(&io::Error::other("disk full")));
    }

    #[test]
    fn digest_shape() {
        assert!(is_hex_digest(&payload_hash(b"")));
        assert!(!is_hex_digest("UNSIGNED-PAYLOAD"));
        assert!(!is_hex_digest("abc"));
    }
}
