//! The storage-provider collaborator the facade drives.
//!
//! Anything that can store, fetch, delete and sign objects implements
//! [`StorageClient`]. One long-lived instance is shared by every facade call,
//! so implementations must be safe to use concurrently and must not assume
//! affinity between calls.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::{fmt, io};
use thiserror::Error;

use crate::models::access::AccessLevel;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("declared content length {declared} does not match {actual} bytes received")]
    ContentLengthMismatch { declared: u64, actual: u64 },
    #[error("signing credentials unavailable: {0}")]
    Credentials(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// HTTP verb a signed link authorises.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully buffered object ready to be stored.
#[derive(Clone, Debug)]
pub struct PutObject {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_length: u64,
    pub content_type: String,
    pub acl: AccessLevel,
}

/// A fetched object: metadata plus a byte stream.
pub struct ObjectBody {
    pub content_type: Option<String>,
    pub content_length: u64,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store `request.body` under (bucket, key) with the given canned ACL,
    /// overwriting any previous object. Returns the provider's native URL.
    async fn put_object(&self, request: PutObject) -> ClientResult<String>;

    async fn get_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectBody>;

    /// Remove the object. An absent object is `ClientError::NotFound`.
    async fn delete_object(&self, bucket: &str, key: &str) -> ClientResult<()>;

    /// Render a URL authorising `method` on (bucket, key) until `expires_at`.
    async fn sign(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> ClientResult<String>;

    /// Native URL of (bucket, key), before any scheme normalisation.
    fn native_url_for(&self, bucket: &str, key: &str) -> String;
}
