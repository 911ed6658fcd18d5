use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, time::Duration};
use thiserror::Error;

use crate::services::storage_client::ClientError;

/// A link string that does not parse, or does not have the shape of a
/// storage-provider URL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed url `{input}`: {reason}")]
pub struct MalformedUrl {
    pub input: String,
    pub reason: String,
}

impl MalformedUrl {
    pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Every failure the facade can report.
///
/// Variants separate caller mistakes (bad key, bad link, bad window) from
/// failures of the remote storage service.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("could not upload `{key}`: {source}")]
    Upload {
        key: String,
        #[source]
        source: UploadFailure,
    },

    #[error(transparent)]
    MalformedUrl(#[from] MalformedUrl),

    #[error("{operation}: cannot resolve link: {source}")]
    LinkResolution {
        operation: &'static str,
        #[source]
        source: MalformedUrl,
    },

    #[error("{operation}: object `{key}` not found in bucket `{bucket}`")]
    NotFound {
        operation: &'static str,
        bucket: String,
        key: String,
    },

    #[error("cannot sign link for `{key}`: {reason}")]
    Signing {
        key: String,
        reason: String,
        #[source]
        source: Option<ClientError>,
    },

    #[error("{operation}: access denied: {source}")]
    AccessDenied {
        operation: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("{operation}: timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("{operation}: storage failure: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: ClientError,
    },
}

/// Why an upload failed: reading the content, or storing it.
#[derive(Debug, Error)]
pub enum UploadFailure {
    #[error("reading content: {0}")]
    Read(#[source] std::io::Error),
    #[error("storing content: {0}")]
    Store(#[source] ClientError),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub(crate) fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Uploads are idempotent on the same key, and timeouts say nothing about
    /// the request itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Upload { .. } | StoreError::Timeout { .. })
    }

    /// Whether the failure stems from the caller's input rather than the
    /// storage service.
    pub fn is_caller_error(&self) -> bool {
        match self {
            StoreError::InvalidKey { .. }
            | StoreError::MalformedUrl(_)
            | StoreError::LinkResolution { .. } => true,
            StoreError::Signing { source, .. } => source.is_none(),
            _ => false,
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::InvalidKey { .. }
            | StoreError::MalformedUrl(_)
            | StoreError::LinkResolution { .. } => StatusCode::BAD_REQUEST,
            StoreError::Signing { source: None, .. } => StatusCode::BAD_REQUEST,
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            StoreError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            StoreError::Upload { .. }
            | StoreError::Signing { .. }
            | StoreError::Storage { .. } => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound { .. } => AppError::not_found(err.to_string()),
            ClientError::AccessDenied(_) => AppError::forbidden(err.to_string()),
            ClientError::InvalidObjectKey(_) | ClientError::InvalidBucketName { .. } => {
                AppError::bad_request(err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_not_retryable() {
        let err = StoreError::invalid_key("", "folder is empty");
        assert!(err.is_caller_error());
        assert!(!err.is_retryable());

        let err = StoreError::LinkResolution {
            operation: "download",
            source: MalformedUrl::new("nope", "relative URL without a base"),
        };
        assert!(err.is_caller_error());
    }

    #[test]
    fn remote_failures_are_distinguished_from_input_errors() {
        let err = StoreError::Timeout {
            operation: "upload",
            after: Duration::from_millis(250),
        };
        assert!(err.is_retryable());
        assert!(!err.is_caller_error());
        assert_eq!(err.to_string(), "upload: timed out after 250ms");

        let err = StoreError::Signing {
            key: "docs/a.pdf".into(),
            reason: "collaborator refused".into(),
            source: Some(ClientError::Credentials("no secret".into())),
        };
        assert!(!err.is_caller_error());
        assert_eq!(AppError::from(err).status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = StoreError::NotFound {
            operation: "delete",
            bucket: "media".into(),
            key: "docs/a.pdf".into(),
        };
        let app = AppError::from(err);
        assert_eq!(app.status, StatusCode::NOT_FOUND);
        assert!(app.message.contains("docs/a.pdf"));
    }
}
