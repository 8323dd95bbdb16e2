//! Route table for both protocols.
//!
//! ## Structure
//! - **Probes** (no authentication)
//!   - `GET /healthz`, `GET /readyz`
//!
//! - **Native API**
//!   - `POST   /put/{*key}`, `POST /put_binary/{*key}`, `GET /get/{*key}`
//!   - `POST   /update/{*key}`, `POST /append/{*key}`
//!   - `PUT    /update_key/{old_key}/{new_key}`, `DELETE /delete/{*key}`
//!
//! - **S3 API**, mounted at both `/s3` and `/`
//!   - `GET    /` list buckets
//!   - `GET|HEAD|PUT|DELETE /{bucket}` list objects, head, create, delete bucket
//!   - `GET|HEAD|PUT|POST|DELETE /{bucket}/{*key}` object operations, copy and
//!     multipart uploads
//!
//! Static segments take precedence over `{bucket}`, so buckets named `s3`,
//! `healthz`, `readyz` or after a native verb are only reachable under `/s3`.

use crate::{
    handlers::{
        bucket_handlers::{
            create_bucket, delete_bucket, head_bucket, list_buckets, list_objects,
        },
        health_handlers::{healthz, readyz},
        native_handlers, object_handlers,
    },
    routes::dispatch::authenticate,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

fn native_routes() -> Router<AppState> {
    Router::new()
        .route("/put/{*key}", post(native_handlers::put_object))
        .route("/put_binary/{*key}", post(native_handlers::put_binary))
        .route("/get/{*key}", get(native_handlers::get_object))
        .route("/update/{*key}", post(native_handlers::update_object))
        .route("/append/{*key}", post(native_handlers::append_object))
        .route(
            "/update_key/{old_key}/{new_key}",
            put(native_handlers::rename_object),
        )
        .route("/delete/{*key}", delete(native_handlers::delete_object))
}

fn s3_routes() -> Router<AppState> {
    let bucket = || {
        get(list_objects)
            .head(head_bucket)
            .put(create_bucket)
            .delete(delete_bucket)
    };
    Router::new()
        .route("/", get(list_buckets))
        .route(
            "/{bucket}/{*key}",
            put(object_handlers::put_object)
                .get(object_handlers::get_object)
                .head(object_handlers::head_object)
                .post(object_handlers::post_object)
                .delete(object_handlers::delete_object),
        )
        .route("/{bucket}", bucket())
        .route("/{bucket}/", bucket())
}

/// Build the complete application router.
pub fn routes(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(native_routes())
        .nest("/s3", s3_routes())
        .merge(s3_routes())
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
