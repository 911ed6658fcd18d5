//! Native object URLs served by the local backend.
//! Public objects stream to anyone; private ones require a valid signed link.

use crate::{
    errors::AppError,
    models::object::StoredObject,
    services::{storage_client::HttpMethod, storage_service::LocalStorage},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

/// Signature parameters appended by `LocalStorage::sign`.
#[derive(Debug, Default, Deserialize)]
pub struct SignatureQuery {
    #[serde(rename = "X-Expires")]
    pub expires: Option<i64>,
    #[serde(rename = "X-Signature")]
    pub signature: Option<String>,
}

impl SignatureQuery {
    /// Signature parameters carried in the query of an external link.
    pub fn from_link(link: &str) -> Self {
        let mut q = Self::default();
        let Ok(url) = Url::parse(link.trim()) else {
            return q;
        };
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "X-Expires" => q.expires = value.parse().ok(),
                "X-Signature" => q.signature = Some(value.into_owned()),
                _ => {}
            }
        }
        q
    }
}

/// `GET /objects/{bucket}/{*key}` as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignatureQuery>,
) -> Result<Response, AppError> {
    let meta = state.backend.fetch_object(&bucket, &key).await?;
    authorize(&state.backend, &meta, &q)?;

    let (meta, file) = state.backend.open_object(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `HEAD /objects/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignatureQuery>,
) -> Result<Response, AppError> {
    let meta = state.backend.fetch_object(&bucket, &key).await?;
    authorize(&state.backend, &meta, &q)?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// Public objects pass; private ones need a signature `backend` accepts.
pub(crate) fn authorize(backend: &LocalStorage, meta: &StoredObject, q: &SignatureQuery) -> Result<(), AppError> {
    if meta.access_level().is_public() {
        return Ok(());
    }
    let (Some(expires), Some(signature)) = (q.expires, q.signature.as_deref()) else {
        debug!("unsigned request for private object {}/{}", meta.bucket, meta.key);
        return Err(AppError::forbidden("object is private; a signed link is required"));
    };
    backend.verify_signature(
        &meta.bucket,
        &meta.key,
        HttpMethod::Get,
        expires,
        signature,
        Utc::now(),
    )?;
    Ok(())
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
