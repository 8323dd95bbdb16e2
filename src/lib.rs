//! CIAOS: a key/value object store with a native key API and an
//! S3-compatible API over one content store.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
