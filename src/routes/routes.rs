//! Defines routes for the link facade and the native object endpoint.
//!
//! ## Structure
//! - **Facade endpoints**
//!   - `POST   /api/files/{*path}` -> upload (`?visibility=public|private&return=link|path`)
//!   - `GET    /api/files?link=`   -> download the linked object
//!   - `DELETE /api/files?link=`   -> delete the linked object
//!   - `GET    /api/presign?key=&expires_ms=` -> fresh signed link
//!
//!   Upload, delete and presign need `Authorization: Bearer <token>`. Download
//!   serves private objects only through signed links.
//!
//! - **Native object endpoint** (what direct and signed links point at)
//!   - `GET    /objects/{bucket}/{*key}`
//!   - `HEAD   /objects/{bucket}/{*key}`

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, presign, upload_file},
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, head_object},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router carrying `AppState` to all handlers.
///
/// Upload bodies larger than `max_upload_bytes` are rejected with 413.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/files", get(download_file).delete(delete_file))
        .route("/api/files/{*path}", post(upload_file))
        .route("/api/presign", get(presign))
        .route("/objects/{bucket}/{*key}", get(get_object).head(head_object))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
