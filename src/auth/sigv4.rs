//! AWS Signature Version 4 primitives: header parsing, canonicalisation,
//! signing-key derivation and a request signer.

use super::AuthError;
use axum::http::{HeaderMap, HeaderValue, Method, Uri, header};
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, percent_encode};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SERVICE: &str = "s3";
pub const TERMINATOR: &str = "aws4_request";
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
pub const SCOPE_DATE_FORMAT: &str = "%Y%m%d";
pub const X_AMZ_DATE: &str = "x-amz-date";
pub const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Characters left unescaped by SigV4 URI encoding.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');
const PATH: &AsciiSet = &QUERY_COMPONENT.remove(b'/');

/// `Credential=` component of an Authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub access_key: String,
    pub date: String,
    pub region: String,
    pub service: String,
}

impl CredentialScope {
    /// `date/region/service/aws4_request`
    pub fn scope(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.date, self.region, self.service, TERMINATOR
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthorization {
    pub credential: CredentialScope,
    pub signed_headers: Vec<String>,
    pub signature: String,
}

/// Parse `AWS4-HMAC-SHA256 Credential=..., SignedHeaders=..., Signature=...`.
/// Components may be separated by `,` or `, `.
pub fn parse_authorization(value: &str) -> Result<ParsedAuthorization, AuthError> {
    let rest = value
        .strip_prefix(ALGORITHM)
        .filter(|rest| rest.starts_with(' '))
        .ok_or_else(|| AuthError::Malformed("unsupported signing algorithm".into()))?;

    let (mut credential, mut signed_headers, mut signature) = (None, None, None);
    for field in rest.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let (name, val) = field
            .split_once('=')
            .ok_or_else(|| AuthError::Malformed(format!("unexpected component `{}`", field)))?;
        match name {
            "Credential" => credential = Some(val),
            "SignedHeaders" => signed_headers = Some(val),
            "Signature" => signature = Some(val),
            _ => {}
        }
    }

    let credential =
        credential.ok_or_else(|| AuthError::Malformed("missing Credential".into()))?;
    let parts: Vec<&str> = credential.split('/').collect();
    let [access_key, date, region, service, terminator] = parts.as_slice() else {
        return Err(AuthError::Malformed("credential scope has the wrong shape".into()));
    };
    if *terminator != TERMINATOR || access_key.is_empty() {
        return Err(AuthError::Malformed("credential scope has the wrong shape".into()));
    }

    let signed_headers: Vec<String> = signed_headers
        .ok_or_else(|| AuthError::Malformed("missing SignedHeaders".into()))?
        .split(';')
        .filter(|h| !h.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if signed_headers.is_empty() {
        return Err(AuthError::Malformed("SignedHeaders is empty".into()));
    }

    let signature = signature.ok_or_else(|| AuthError::Malformed("missing Signature".into()))?;
    if signature.len() != 64 || !signature.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AuthError::Malformed("signature is not 64 hex digits".into()));
    }

    Ok(ParsedAuthorization {
        credential: CredentialScope {
            access_key: access_key.to_string(),
            date: date.to_string(),
            region: region.to_string(),
            service: service.to_string(),
        },
        signed_headers,
        signature: signature.to_ascii_lowercase(),
    })
}

/// Request time from `x-amz-date`, falling back to `Date`.
pub fn request_time(headers: &HeaderMap) -> Result<DateTime<Utc>, AuthError> {
    if let Some(value) = headers.get(X_AMZ_DATE) {
        let value = value
            .to_str()
            .map_err(|_| AuthError::Malformed("x-amz-date is not ASCII".into()))?;
        return NaiveDateTime::parse_from_str(value, AMZ_DATE_FORMAT)
            .map(|t| t.and_utc())
            .map_err(|_| AuthError::Malformed(format!("bad x-amz-date `{}`", value)));
    }
    let value = headers
        .get(header::DATE)
        .ok_or(AuthError::MissingHeader("x-amz-date"))?
        .to_str()
        .map_err(|_| AuthError::Malformed("Date is not ASCII".into()))?;
    DateTime::parse_from_rfc2822(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AuthError::Malformed(format!("bad Date `{}`", value)))
}

fn uri_encode(raw: &str, set: &'static AsciiSet) -> String {
    let decoded: Vec<u8> = percent_decode_str(raw).collect();
    percent_encode(&decoded, set).to_string()
}

/// Path component, normalised to single SigV4 encoding.
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    uri_encode(path, PATH)
}

/// Query parameters sorted by name then value, each as `name=value`.
pub fn canonical_query(query: Option<&str>) -> String {
    let mut pairs: Vec<(String, String)> = query
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                uri_encode(name, QUERY_COMPONENT),
                uri_encode(value, QUERY_COMPONENT),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn header_value(headers: &HeaderMap, uri: &Uri, name: &str) -> Result<String, AuthError> {
    let mut values = Vec::new();
    for value in headers.get_all(name) {
        let value = value
            .to_str()
            .map_err(|_| AuthError::Malformed(format!("header `{}` is not ASCII", name)))?;
        values.push(value.split_whitespace().collect::<Vec<_>>().join(" "));
    }
    if values.is_empty() {
        // HTTP/2 carries the host in the request target.
        if name == "host" {
            if let Some(authority) = uri.authority() {
                return Ok(authority.as_str().to_string());
            }
        }
        return Err(AuthError::Malformed(format!(
            "signed header `{}` is missing",
            name
        )));
    }
    Ok(values.join(","))
}

pub fn canonical_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed_headers: &[String],
    payload_hash: &str,
) -> Result<String, AuthError> {
    let mut canonical_headers = String::new();
    for name in signed_headers {
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(&header_value(headers, uri, name)?);
        canonical_headers.push('\n');
    }
    Ok(format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        canonical_uri(uri.path()),
        canonical_query(uri.query()),
        canonical_headers,
        signed_headers.join(";"),
        payload_hash
    ))
}

pub fn string_to_sign(time: DateTime<Utc>, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        time.format(AMZ_DATE_FORMAT),
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

fn hmac(key: &[u8], data: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac
}

/// `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
pub fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date.finalize().into_bytes(), region.as_bytes());
    let k_service = hmac(&k_region.finalize().into_bytes(), service.as_bytes());
    hmac(&k_service.finalize().into_bytes(), TERMINATOR.as_bytes())
        .finalize()
        .into_bytes()
        .to_vec()
}

pub fn signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac(signing_key, string_to_sign.as_bytes()).finalize().into_bytes())
}

/// Compare a hex signature against the expected one in constant time.
pub fn verify_signature(signing_key: &[u8], string_to_sign: &str, signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex) else {
        return false;
    };
    hmac(signing_key, string_to_sign.as_bytes())
        .verify_slice(&provided)
        .is_ok()
}

pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Signs requests the same way AWS SDKs do. Every header present when
/// [`Signer::sign`] is called becomes a signed header.
#[derive(Debug, Clone, Copy)]
pub struct Signer<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
}

impl Signer<'_> {
    pub fn sign(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &mut HeaderMap,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.sign_with_hash(method, uri, headers, &payload_hash(payload), now)
    }

    /// Sign with an explicit `x-amz-content-sha256` value, such as
    /// [`UNSIGNED_PAYLOAD`].
    pub fn sign_with_hash(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &mut HeaderMap,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let invalid = |_| AuthError::Malformed("unrepresentable header value".into());
        headers.insert(
            X_AMZ_DATE,
            HeaderValue::from_str(&now.format(AMZ_DATE_FORMAT).to_string()).map_err(invalid)?,
        );
        headers.insert(
            X_AMZ_CONTENT_SHA256,
            HeaderValue::from_str(hash).map_err(invalid)?,
        );
        headers.remove(header::AUTHORIZATION);

        let mut signed_headers: Vec<String> =
            headers.keys().map(|k| k.as_str().to_string()).collect();
        signed_headers.sort();
        signed_headers.dedup();

        let scope = CredentialScope {
            access_key: self.access_key.to_string(),
            date: now.format(SCOPE_DATE_FORMAT).to_string(),
            region: self.region.to_string(),
            service: SERVICE.to_string(),
        };
        let canonical = canonical_request(method, uri, headers, &signed_headers, hash)?;
        let to_sign = string_to_sign(now, &scope.scope(), &canonical);
        let key = signing_key(self.secret_key, &scope.date, &scope.region, &scope.service);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.access_key,
            scope.scope(),
            signed_headers.join(";"),
            signature(&key, &to_sign)
        );
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&authorization).map_err(invalid)?,
        );
        Ok(())
    }
}
