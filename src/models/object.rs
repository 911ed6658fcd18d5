//! Represents an object (file) held by the local storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::access::AccessLevel;

/// Metadata row for a single stored object.
///
/// The struct describes the object; the payload bytes live on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket the object belongs to.
    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Trailing key segment, used as the download filename.
    pub filename: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: String,

    /// Canned ACL, `public-read` or `private`.
    pub acl: String,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    /// Parsed canned ACL; unknown values are treated as private.
    pub fn access_level(&self) -> AccessLevel {
        self.acl.parse().unwrap_or(AccessLevel::Private)
    }
}
