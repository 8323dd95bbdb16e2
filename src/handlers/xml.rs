//! XML documents of the S3 surface, plus the small amount of XML reading
//! CompleteMultipartUpload needs.

use crate::models::{multipart::MultipartPart, object::Object};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

pub fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Text of every `<tag>...</tag>` element, in document order.
pub fn extract_tag_values(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let mut out = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        let after_open = &remaining[start + open.len()..];
        let Some(end) = after_open.find(&close) else {
            break;
        };
        out.push(after_open[..end].to_string());
        remaining = &after_open[end + close.len()..];
    }
    out
}

pub fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

/// Tokens that are not valid base64 UTF-8 are rejected rather than guessed at.
pub fn decode_continuation_token(token: &str) -> Option<String> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Parsed `CompleteMultipartUpload` body: `(part number, etag)` pairs.
pub fn parse_complete_multipart(body: &str) -> Option<Vec<(i64, String)>> {
    if !body.contains("<CompleteMultipartUpload") {
        return None;
    }
    extract_tag_values(body, "Part")
        .iter()
        .map(|part| {
            let number = extract_tag_values(part, "PartNumber")
                .first()?
                .trim()
                .parse()
                .ok()?;
            let etag = xml_unescape(extract_tag_values(part, "ETag").first()?.trim());
            Some((number, etag))
        })
        .collect()
}

/// One entry of a ListObjectsV2 page, with the key already relative to the
/// bucket.
pub struct ListEntry<'a> {
    pub key: &'a str,
    pub object: &'a Object,
}

pub struct ListObjectsV2<'a> {
    pub bucket: &'a str,
    pub prefix: &'a str,
    pub delimiter: Option<&'a str>,
    pub max_keys: usize,
    pub continuation_token: Option<&'a str>,
    pub start_after: Option<&'a str>,
    pub next_continuation_token: Option<String>,
    pub contents: Vec<ListEntry<'a>>,
    pub common_prefixes: Vec<String>,
}

impl ListObjectsV2<'_> {
    pub fn to_xml(&self) -> String {
        let mut xml = String::from(XML_DECLARATION);
        let _ = write!(xml, r#"<ListBucketResult xmlns="{}">"#, S3_NAMESPACE);
        let _ = write!(xml, "<Name>{}</Name>", xml_escape(self.bucket));
        let _ = write!(xml, "<Prefix>{}</Prefix>", xml_escape(self.prefix));
        let _ = write!(xml, "<MaxKeys>{}</MaxKeys>", self.max_keys);
        let _ = write!(
            xml,
            "<KeyCount>{}</KeyCount>",
            self.contents.len() + self.common_prefixes.len()
        );
        if let Some(token) = self.continuation_token {
            let _ = write!(
                xml,
                "<ContinuationToken>{}</ContinuationToken>",
                xml_escape(token)
            );
        }
        if let Some(start_after) = self.start_after {
            let _ = write!(xml, "<StartAfter>{}</StartAfter>", xml_escape(start_after));
        }
        if let Some(delimiter) = self.delimiter {
            let _ = write!(xml, "<Delimiter>{}</Delimiter>", xml_escape(delimiter));
        }
        let _ = write!(
            xml,
            "<IsTruncated>{}</IsTruncated>",
            self.next_continuation_token.is_some()
        );
        if let Some(next) = &self.next_continuation_token {
            let _ = write!(
                xml,
                "<NextContinuationToken>{}</NextContinuationToken>",
                xml_escape(next)
            );
        }
        for entry in &self.contents {
            xml.push_str("<Contents>");
            let _ = write!(xml, "<Key>{}</Key>", xml_escape(entry.key));
            let _ = write!(
                xml,
                "<LastModified>{}</LastModified>",
                timestamp(&entry.object.last_modified)
            );
            let _ = write!(xml, "<ETag>{}</ETag>", xml_escape(&entry.object.quoted_etag()));
            let _ = write!(xml, "<Size>{}</Size>", entry.object.size_bytes);
            xml.push_str("<StorageClass>STANDARD</StorageClass>");
            xml.push_str("</Contents>");
        }
        for prefix in &self.common_prefixes {
            let _ = write!(
                xml,
                "<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>",
                xml_escape(prefix)
            );
        }
        xml.push_str("</ListBucketResult>");
        xml
    }
}

pub fn list_buckets_result(owner: &str, buckets: &[(String, DateTime<Utc>)]) -> String {
    let mut xml = String::from(XML_DECLARATION);
    let _ = write!(xml, r#"<ListAllMyBucketsResult xmlns="{}">"#, S3_NAMESPACE);
    let _ = write!(
        xml,
        "<Owner><ID>{0}</ID><DisplayName>{0}</DisplayName></Owner>",
        xml_escape(owner)
    );
    xml.push_str("<Buckets>");
    for (name, created) in buckets {
        let _ = write!(
            xml,
            "<Bucket><Name>{}</Name><CreationDate>{}</CreationDate></Bucket>",
            xml_escape(name),
            timestamp(created)
        );
    }
    xml.push_str("</Buckets></ListAllMyBucketsResult>");
    xml
}

pub fn copy_object_result(object: &Object) -> String {
    format!(
        "{}<CopyObjectResult xmlns=\"{}\"><LastModified>{}</LastModified><ETag>{}</ETag></CopyObjectResult>",
        XML_DECLARATION,
        S3_NAMESPACE,
        timestamp(&object.last_modified),
        xml_escape(&object.quoted_etag())
    )
}

pub fn initiate_multipart_result(bucket: &str, key: &str, upload_id: &str) -> String {
    format!(
        "{}<InitiateMultipartUploadResult xmlns=\"{}\"><Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId></InitiateMultipartUploadResult>",
        XML_DECLARATION,
        S3_NAMESPACE,
        xml_escape(bucket),
        xml_escape(key),
        xml_escape(upload_id)
    )
}

pub fn complete_multipart_result(location: &str, bucket: &str, key: &str, object: &Object) -> String {
    format!(
        "{}<CompleteMultipartUploadResult xmlns=\"{}\"><Location>{}</Location><Bucket>{}</Bucket><Key>{}</Key><ETag>{}</ETag></CompleteMultipartUploadResult>",
        XML_DECLARATION,
        S3_NAMESPACE,
        xml_escape(location),
        xml_escape(bucket),
        xml_escape(key),
        xml_escape(&object.quoted_etag())
    )
}

pub fn list_parts_result(bucket: &str, key: &str, upload_id: &str, parts: &[MultipartPart]) -> String {
    let mut xml = String::from(XML_DECLARATION);
    let _ = write!(xml, r#"<ListPartsResult xmlns="{}">"#, S3_NAMESPACE);
    let _ = write!(xml, "<Bucket>{}</Bucket>", xml_escape(bucket));
    let _ = write!(xml, "<Key>{}</Key>", xml_escape(key));
    let _ = write!(xml, "<UploadId>{}</UploadId>", xml_escape(upload_id));
    xml.push_str("<IsTruncated>false</IsTruncated>");
    for part in parts {
        let _ = write!(
            xml,
            "<Part><PartNumber>{}</PartNumber><LastModified>{}</LastModified><ETag>&quot;{}&quot;</ETag><Size>{}</Size></Part>",
            part.part_number,
            timestamp(&part.uploaded_at),
            xml_escape(&part.etag),
            part.size_bytes
        );
    }
    xml.push_str("</ListPartsResult>");
    xml
}
