//! Shared state handed to every axum handler.

use crate::services::{object_store::ObjectStore, storage_service::LocalStorage};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Facade used by the `/api` routes.
    pub store: ObjectStore,

    /// Backend serving native object URLs and readiness checks.
    pub backend: LocalStorage,

    /// Bearer token for upload, delete and presign; `None` disables them.
    pub api_token: Option<Arc<str>>,
}
