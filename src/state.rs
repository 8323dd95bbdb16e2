//! Shared application state handed to every handler.

use crate::{auth::Authenticator, services::object_store::ObjectStore};
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: ObjectStore,
    pub authenticator: Arc<Authenticator>,
    /// Largest body accepted by buffering extractors (forms, XML documents).
    pub max_body_bytes: usize,
    /// Largest body the middleware will hold in memory to hash a signed
    /// request that omits `x-amz-content-sha256`.
    pub max_buffered_body_bytes: usize,
}

impl FromRef<AppState> for ObjectStore {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}
