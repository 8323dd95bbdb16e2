//! Core data models for the object store.
//!
//! Object and multipart records map to SQLite tables via `sqlx::FromRow`;
//! credentials are loaded from configuration.

pub mod bucket;
pub mod credential;
pub mod multipart;
pub mod object;
