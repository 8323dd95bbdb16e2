mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use ciaos::handlers::xml::{extract_tag_values, xml_unescape};
use common::{
    OTHER_ACCESS_KEY, OTHER_SECRET_KEY, SECRET_KEY, native_request, signed_request,
    signed_request_as, signed_request_with, spawn_app, unsigned_payload_request, unsigned_request,
    with_body,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

fn quoted_md5(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

#[tokio::test]
async fn put_get_head_round_trip() {
    let app = spawn_app().await;

    let put = app
        .send(signed_request(
            Method::PUT,
            "/photos/2024/cat.txt",
            &[
                ("content-type", "text/plain"),
                ("x-amz-meta-owner", "alice"),
            ],
            "meow",
        ))
        .await;
    assert_eq!(put.status, StatusCode::OK);
    assert_eq!(put.header("etag"), Some(quoted_md5(b"meow").as_str()));

    let got = app
        .send(signed_request(Method::GET, "/photos/2024/cat.txt", &[], ""))
        .await;
    assert_eq!(got.status, StatusCode::OK);
    assert_eq!(got.text(), "meow");
    assert_eq!(got.header("content-type"), Some("text/plain"));
    assert_eq!(got.header("x-amz-meta-owner"), Some("alice"));
    assert_eq!(got.header("etag"), Some(quoted_md5(b"meow").as_str()));
    assert!(got.header("last-modified").is_some());

    let head = app
        .send(signed_request(Method::HEAD, "/photos/2024/cat.txt", &[], ""))
        .await;
    assert_eq!(head.status, StatusCode::OK);
    assert_eq!(head.header("content-length"), Some("4"));
    assert!(head.body.is_empty());

    let missing = app
        .send(signed_request(Method::GET, "/photos/nope.txt", &[], ""))
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(extract_tag_values(&missing.text(), "Code"), vec!["NoSuchKey"]);
    assert_eq!(missing.header("content-type"), Some("application/xml"));
}

#[tokio::test]
async fn both_mounts_address_the_same_objects() {
    let app = spawn_app().await;
    app.send(signed_request(Method::PUT, "/s3/docs/readme.md", &[], "# hi"))
        .await;

    let root = app
        .send(signed_request(Method::GET, "/docs/readme.md", &[], ""))
        .await;
    assert_eq!(root.text(), "# hi");

    // Native verbs as bucket names are reachable under /s3 only.
    let put = app
        .send(signed_request(Method::PUT, "/s3/get/thing", &[], "x"))
        .await;
    assert_eq!(put.status, StatusCode::OK);
    let got = app
        .send(signed_request(Method::GET, "/s3/get/thing", &[], ""))
        .await;
    assert_eq!(got.text(), "x");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let app = spawn_app().await;
    app.send(signed_request(Method::PUT, "/bucket/key", &[], "data"))
        .await;

    for _ in 0..2 {
        let deleted = app
            .send(signed_request(Method::DELETE, "/bucket/key", &[], ""))
            .await;
        assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    }
    let gone = app
        .send(signed_request(Method::GET, "/bucket/key", &[], ""))
        .await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_objects_pages_with_continuation_tokens() {
    let app = spawn_app().await;
    for key in ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"] {
        let uri = format!("/listing/{}", key);
        app.send(signed_request(Method::PUT, &uri, &[], key)).await;
    }
    app.send(signed_request(Method::PUT, "/other/z.txt", &[], "z"))
        .await;

    let mut seen = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0;
    loop {
        let uri = match &token {
            Some(token) => format!(
                "/listing?list-type=2&max-keys=2&continuation-token={}",
                utf8_percent_encode(token, NON_ALPHANUMERIC)
            ),
            None => "/listing?list-type=2&max-keys=2".to_string(),
        };
        let page = app.send(signed_request(Method::GET, &uri, &[], "")).await;
        assert_eq!(page.status, StatusCode::OK);
        let xml = page.text();
        seen.extend(extract_tag_values(&xml, "Key"));
        pages += 1;

        let truncated = extract_tag_values(&xml, "IsTruncated");
        if truncated == vec!["true"] {
            token = extract_tag_values(&xml, "NextContinuationToken")
                .into_iter()
                .next()
                .map(|t| xml_unescape(&t));
            assert!(token.is_some());
        } else {
            break;
        }
    }
    assert_eq!(pages, 3);
    assert_eq!(seen, vec!["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"]);
}

#[tokio::test]
async fn list_objects_rolls_up_common_prefixes() {
    let app = spawn_app().await;
    for key in ["root.txt", "dir/one.txt", "dir/two.txt", "more/x.txt"] {
        let uri = format!("/tree/{}", key);
        app.send(signed_request(Method::PUT, &uri, &[], "v")).await;
    }

    let listing = app
        .send(signed_request(
            Method::GET,
            "/tree?list-type=2&delimiter=%2F",
            &[],
            "",
        ))
        .await;
    let xml = listing.text();
    assert_eq!(extract_tag_values(&xml, "Key"), vec!["root.txt"]);
    let prefixes: Vec<_> = extract_tag_values(&xml, "CommonPrefixes")
        .iter()
        .flat_map(|p| extract_tag_values(p, "Prefix"))
        .collect();
    assert_eq!(prefixes, vec!["dir/", "more/"]);

    let scoped = app
        .send(signed_request(
            Method::GET,
            "/tree?list-type=2&prefix=dir%2F",
            &[],
            "",
        ))
        .await;
    assert_eq!(
        extract_tag_values(&scoped.text(), "Key"),
        vec!["dir/one.txt", "dir/two.txt"]
    );
}

#[tokio::test]
async fn copy_object_duplicates_content() {
    let app = spawn_app().await;
    app.send(signed_request(
        Method::PUT,
        "/src/original.bin",
        &[("x-amz-meta-tag", "first")],
        "payload",
    ))
    .await;

    let copied = app
        .send(signed_request(
            Method::PUT,
            "/dst/copy.bin",
            &[("x-amz-copy-source", "/src/original.bin")],
            "",
        ))
        .await;
    assert_eq!(copied.status, StatusCode::OK);
    let etags = extract_tag_values(&copied.text(), "ETag");
    assert_eq!(xml_unescape(&etags[0]), quoted_md5(b"payload"));

    let got = app
        .send(signed_request(Method::GET, "/dst/copy.bin", &[], ""))
        .await;
    assert_eq!(got.text(), "payload");
    assert_eq!(got.header("x-amz-meta-tag"), Some("first"));

    let missing = app
        .send(signed_request(
            Method::PUT,
            "/dst/none.bin",
            &[("x-amz-copy-source", "/src/absent.bin")],
            "",
        ))
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn multipart_upload_assembles_parts() {
    let app = spawn_app().await;

    let created = app
        .send(signed_request(Method::POST, "/uploads/big.bin?uploads", &[], ""))
        .await;
    assert_eq!(created.status, StatusCode::OK);
    let upload_id = extract_tag_values(&created.text(), "UploadId").remove(0);

    let mut etags = Vec::new();
    for (number, data) in [(1, "first-"), (2, "second")] {
        let uri = format!("/uploads/big.bin?partNumber={}&uploadId={}", number, upload_id);
        let part = app.send(signed_request(Method::PUT, &uri, &[], data)).await;
        assert_eq!(part.status, StatusCode::OK);
        etags.push(part.header("etag").unwrap().to_string());
    }

    let listed = app
        .send(signed_request(
            Method::GET,
            &format!("/uploads/big.bin?uploadId={}", upload_id),
            &[],
            "",
        ))
        .await;
    assert_eq!(
        extract_tag_values(&listed.text(), "PartNumber"),
        vec!["1", "2"]
    );

    let complete = format!(
        "<CompleteMultipartUpload>\
         <Part><PartNumber>1</PartNumber><ETag>{}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{}</ETag></Part>\
         </CompleteMultipartUpload>",
        etags[0], etags[1]
    );
    let done = app
        .send(signed_request(
            Method::POST,
            &format!("/uploads/big.bin?uploadId={}", upload_id),
            &[],
            complete,
        ))
        .await;
    assert_eq!(done.status, StatusCode::OK);

    let got = app
        .send(signed_request(Method::GET, "/uploads/big.bin", &[], ""))
        .await;
    assert_eq!(got.text(), "first-second");
    assert_eq!(got.header("etag"), Some(quoted_md5(b"first-second").as_str()));

    let again = app
        .send(signed_request(
            Method::DELETE,
            &format!("/uploads/big.bin?uploadId={}", upload_id),
            &[],
            "",
        ))
        .await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
    assert_eq!(extract_tag_values(&again.text(), "Code"), vec!["NoSuchUpload"]);
}

#[tokio::test]
async fn ranged_get_returns_partial_content() {
    let app = spawn_app().await;
    app.send(signed_request(Method::PUT, "/ranges/alpha", &[], "abcdefghij"))
        .await;

    let partial = app
        .send(signed_request(
            Method::GET,
            "/ranges/alpha",
            &[("range", "bytes=2-5")],
            "",
        ))
        .await;
    assert_eq!(partial.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.text(), "cdef");
    assert_eq!(partial.header("content-range"), Some("bytes 2-5/10"));

    let unsatisfiable = app
        .send(signed_request(
            Method::GET,
            "/ranges/alpha",
            &[("range", "bytes=50-")],
            "",
        ))
        .await;
    assert_eq!(unsatisfiable.status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn bucket_operations() {
    let app = spawn_app().await;

    let absent = app
        .send(signed_request(Method::HEAD, "/empty-bucket", &[], ""))
        .await;
    assert_eq!(absent.status, StatusCode::NOT_FOUND);

    let created = app
        .send(signed_request(Method::PUT, "/empty-bucket", &[], ""))
        .await;
    assert_eq!(created.status, StatusCode::OK);
    let removed = app
        .send(signed_request(Method::DELETE, "/empty-bucket", &[], ""))
        .await;
    assert_eq!(removed.status, StatusCode::NO_CONTENT);

    let invalid = app
        .send(signed_request(Method::PUT, "/Bad_Bucket", &[], ""))
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        extract_tag_values(&invalid.text(), "Code"),
        vec!["InvalidBucketName"]
    );

    app.send(signed_request(Method::PUT, "/full-bucket/obj", &[], "1"))
        .await;
    app.send(signed_request(Method::PUT, "/second-bucket/obj", &[], "2"))
        .await;
    let present = app
        .send(signed_request(Method::HEAD, "/full-bucket", &[], ""))
        .await;
    assert_eq!(present.status, StatusCode::OK);
    let busy = app
        .send(signed_request(Method::DELETE, "/full-bucket", &[], ""))
        .await;
    assert_eq!(busy.status, StatusCode::CONFLICT);
    assert_eq!(
        extract_tag_values(&busy.text(), "Code"),
        vec!["BucketNotEmpty"]
    );

    let buckets = app.send(signed_request(Method::GET, "/", &[], "")).await;
    assert_eq!(buckets.status, StatusCode::OK);
    assert_eq!(
        extract_tag_values(&buckets.text(), "Name"),
        vec!["full-bucket", "second-bucket"]
    );
}

#[tokio::test]
async fn signature_failures_are_access_denied() {
    let app = spawn_app().await;

    let anonymous = app.send(unsigned_request(Method::GET, "/bucket/key")).await;
    assert_eq!(anonymous.status, StatusCode::FORBIDDEN);
    assert_eq!(
        extract_tag_values(&anonymous.text(), "Code"),
        vec!["AccessDenied"]
    );

    let wrong_secret = app
        .send(signed_request_with(
            "not-the-secret",
            Utc::now(),
            Method::GET,
            "/bucket/key",
            &[],
            "",
        ))
        .await;
    assert_eq!(wrong_secret.status, StatusCode::FORBIDDEN);

    let stale = app
        .send(signed_request_with(
            SECRET_KEY,
            Utc::now() - Duration::hours(1),
            Method::GET,
            "/bucket/key",
            &[],
            "",
        ))
        .await;
    assert_eq!(stale.status, StatusCode::FORBIDDEN);

    // The messages do not reveal which check failed.
    assert_eq!(
        extract_tag_values(&wrong_secret.text(), "Message"),
        extract_tag_values(&stale.text(), "Message")
    );
}

#[tokio::test]
async fn body_must_match_the_signed_digest() {
    let app = spawn_app().await;

    let tampered = with_body(
        signed_request(Method::PUT, "/bucket/key", &[], "hello"),
        "EVIL!",
    );
    let rejected = app.send(tampered).await;
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        extract_tag_values(&rejected.text(), "Code"),
        vec!["XAmzContentSHA256Mismatch"]
    );
    let absent = app
        .send(signed_request(Method::GET, "/bucket/key", &[], ""))
        .await;
    assert_eq!(absent.status, StatusCode::NOT_FOUND);

    app.send(signed_request(Method::PUT, "/bucket/key", &[], "hello"))
        .await;
    let tampered = with_body(
        signed_request(Method::PUT, "/bucket/key", &[], "bye"),
        "EVIL!",
    );
    assert_eq!(app.send(tampered).await.status, StatusCode::BAD_REQUEST);
    let kept = app
        .send(signed_request(Method::GET, "/bucket/key", &[], ""))
        .await;
    assert_eq!(kept.text(), "hello");
    assert_eq!(kept.header("etag"), Some(quoted_md5(b"hello").as_str()));
}

#[tokio::test]
async fn unsigned_payload_is_accepted() {
    let app = spawn_app().await;
    let put = app
        .send(unsigned_payload_request(Method::PUT, "/bucket/free", "anything"))
        .await;
    assert_eq!(put.status, StatusCode::OK);
    let got = app
        .send(signed_request(Method::GET, "/bucket/free", &[], ""))
        .await;
    assert_eq!(got.text(), "anything");
}

#[tokio::test]
async fn users_do_not_share_objects_or_buckets() {
    let app = spawn_app().await;
    let as_other = |method: Method, uri: &str| {
        signed_request_as(
            OTHER_ACCESS_KEY,
            OTHER_SECRET_KEY,
            Utc::now(),
            method,
            uri,
            &[],
            "",
        )
    };

    app.send(signed_request(Method::PUT, "/private/secret", &[], "mine"))
        .await;

    let read = app.send(as_other(Method::GET, "/private/secret")).await;
    assert_eq!(read.status, StatusCode::NOT_FOUND);
    let head = app.send(as_other(Method::HEAD, "/private")).await;
    assert_eq!(head.status, StatusCode::NOT_FOUND);
    let listed = app.send(as_other(Method::GET, "/private")).await;
    assert!(extract_tag_values(&listed.text(), "Key").is_empty());
    let buckets = app.send(as_other(Method::GET, "/")).await;
    assert!(extract_tag_values(&buckets.text(), "Name").is_empty());

    // Deleting a key that is not yours removes nothing.
    let deleted = app.send(as_other(Method::DELETE, "/private/secret")).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let still = app
        .send(signed_request(Method::GET, "/private/secret", &[], ""))
        .await;
    assert_eq!(still.text(), "mine");

    let own = app.send(signed_request(Method::GET, "/", &[], "")).await;
    assert_eq!(extract_tag_values(&own.text(), "Name"), vec!["private"]);
}

#[tokio::test]
async fn native_keys_live_in_the_default_bucket() {
    let app = spawn_app().await;
    app.send(native_request(Method::POST, "/put/testkey", &[], "shared"))
        .await;
    let got = app
        .send(signed_request(Method::GET, "/default/testkey", &[], ""))
        .await;
    assert_eq!(got.status, StatusCode::OK);
    assert_eq!(got.text(), "shared");
}
