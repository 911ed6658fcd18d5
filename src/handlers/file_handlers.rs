//! HTTP handlers for the `/api` facade routes: upload, download, delete and
//! presigned links. All storage decisions are delegated to `ObjectStore`.

use crate::{
    errors::AppError,
    handlers::{
        auth::ApiAccess,
        object_handlers::{SignatureQuery, authorize},
    },
    models::access::AccessIntent,
    services::key_builder::ObjectKey,
    state::AppState,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

/// What `POST /api/files/{*path}` hands back.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadReturn {
    /// The https direct link.
    #[default]
    Link,
    /// The bare `folder/name` key.
    Path,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub visibility: Option<AccessIntent>,
    #[serde(rename = "return", default)]
    pub returns: UploadReturn,
}

#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    pub link: String,
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub key: String,
    pub expires_ms: i64,
}

/// `POST /api/files/{*path}`: store the request body under `path`.
///
/// The last path segment is the file name, everything before it the folder.
/// Visibility defaults to public for `return=link` and private for
/// `return=path`.
pub async fn upload_file(
    State(state): State<AppState>,
    _access: ApiAccess,
    Path(path): Path<String>,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let (folder, name) = path
        .rsplit_once('/')
        .ok_or_else(|| AppError::bad_request("path must be `folder/name`"))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let intent = q.visibility.unwrap_or(match q.returns {
        UploadReturn::Link => AccessIntent::Public,
        UploadReturn::Path => AccessIntent::Private,
    });

    let payload = match q.returns {
        UploadReturn::Link => {
            let link = state
                .store
                .upload(folder, name, &body[..], content_type, intent)
                .await?;
            json!({ "link": link })
        }
        UploadReturn::Path => {
            let key = state
                .store
                .upload_and_get_path(folder, name, &body[..], content_type, intent)
                .await?;
            json!({ "key": key })
        }
    };

    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

/// `GET /api/files?link=`: stream the linked object as an attachment.
///
/// Private objects are only served when the link carries a valid signature.
pub async fn download_file(
    State(state): State<AppState>,
    Query(q): Query<LinkQuery>,
) -> Result<Response, AppError> {
    let (bucket, key) = state.store.resolve("download", &q.link)?;
    let meta = state.backend.fetch_object(&bucket, &key).await?;
    authorize(&state.backend, &meta, &SignatureQuery::from_link(&q.link))?;

    let file = state.store.download(&q.link).await?;

    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.content_length));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&file.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    *response.body_mut() = Body::from_stream(file.stream);
    Ok(response)
}

/// `DELETE /api/files?link=`
pub async fn delete_file(
    State(state): State<AppState>,
    _access: ApiAccess,
    Query(q): Query<LinkQuery>,
) -> Result<StatusCode, AppError> {
    state.store.delete(&q.link).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/presign?key=&expires_ms=`: fresh signed GET link.
pub async fn presign(
    State(state): State<AppState>,
    _access: ApiAccess,
    Query(q): Query<PresignQuery>,
) -> Result<Response, AppError> {
    let key: ObjectKey = q.key.parse()?;
    let signed = state.store.presigned_url(&key, q.expires_ms).await?;
    Ok(Json(signed).into_response())
}

/// `attachment` disposition with an ASCII fallback name and, when needed, an
/// RFC 5987 `filename*` parameter.
fn content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() || c.is_ascii_control() => '_',
            c => c,
        })
        .collect();

    if sanitized == filename {
        return format!("attachment; filename=\"{}\"", filename);
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized,
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_names_use_plain_disposition() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
    }

    #[test]
    fn unicode_and_quotes_get_extended_parameter() {
        assert_eq!(
            content_disposition("straße \"v2\".txt"),
            "attachment; filename=\"stra_e _v2_.txt\"; filename*=UTF-8''stra%C3%9Fe%20%22v2%22.txt"
        );
    }
}
