//! src/services/storage_service.rs
//!
//! LocalStorage: a self-hosted `StorageClient` keeping object metadata in
//! SQLite and payloads on disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. Native URLs are path-style
//! under `endpoint`; signed links carry an HMAC-SHA256 over the method,
//! bucket, key and expiry.

use crate::{
    models::{access::AccessLevel, object::StoredObject},
    services::{
        link_codec::path_style_url,
        storage_client::{ClientError, ClientResult, HttpMethod, ObjectBody, PutObject, StorageClient},
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

pub const EXPIRES_PARAM: &str = "X-Expires";
pub const SIGNATURE_PARAM: &str = "X-Signature";

/// LocalStorage stores, serves, deletes and signs objects:
/// - Upload writes bytes to a temp file, fsyncs, renames, then upserts metadata
/// - Get reads metadata from SQLite and opens the payload for streaming
/// - Delete removes the row and the payload, pruning empty shard directories
#[derive(Clone)]
pub struct LocalStorage {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Public base URL native object URLs are rendered under.
    endpoint: Url,

    /// HMAC key for signed links. Signing fails without one.
    signing_secret: Option<String>,
}

impl LocalStorage {
    /// Create a LocalStorage backed by the provided SQLite pool and using
    /// `base_path` as the root directory for object payloads.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        endpoint: Url,
        signing_secret: Option<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            endpoint,
            signing_secret,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Create the metadata schema if it does not exist yet.
    pub async fn migrate(&self) -> ClientResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/`, contain `.`/`..` segments, or carry
    /// control characters and backslashes.
    fn ensure_key_safe(&self, key: &str) -> ClientResult<()> {
        if key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == "." || segment == "..")
            || key.chars().any(|c| c.is_control() || c == '\\')
        {
            return Err(ClientError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Compute the physical base folder path for a bucket.
    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket_name);
        path
    }

    /// Two-level shard identifiers for an object key.
    ///
    /// First two bytes of MD5(bucket/key) as lowercase hex (00–ff).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct a fully-qualified object payload path.
    ///
    /// Combines base_path/bucket/{shard}/{shard}/{key}.
    /// Parent directories may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Fetch an object metadata record.
    pub async fn fetch_object(&self, bucket: &str, key: &str) -> ClientResult<StoredObject> {
        validate_bucket_name(bucket)?;
        self.ensure_key_safe(key)?;
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket, key, filename, content_type, size_bytes, etag, acl, last_modified
             FROM objects
             WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ClientError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => ClientError::Sqlx(other),
        })
    }

    /// Metadata plus an opened payload handle ready for streaming out.
    ///
    /// Returns NotFound if metadata exists but the physical file is missing.
    pub async fn open_object(&self, bucket: &str, key: &str) -> ClientResult<(StoredObject, File)> {
        let object = self.fetch_object(bucket, key).await?;
        let file_path = self.object_path(bucket, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ClientError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                ClientError::Io(err)
            }
        })?;
        Ok((object, file))
    }

    /// Check a signature produced by [`StorageClient::sign`].
    ///
    /// Fails with AccessDenied when the link expired before `now` or the
    /// signature does not match.
    pub fn verify_signature(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        expires_millis: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> ClientResult<()> {
        if now.timestamp_millis() > expires_millis {
            return Err(ClientError::AccessDenied("signed link expired".into()));
        }
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| ClientError::AccessDenied("signature is not valid base64".into()))?;
        self.signature_mac(method, bucket, key, expires_millis)?
            .verify_slice(&provided)
            .map_err(|_| ClientError::AccessDenied("signature mismatch".into()))
    }

    fn signature_mac(
        &self,
        method: HttpMethod,
        bucket: &str,
        key: &str,
        expires_millis: i64,
    ) -> ClientResult<HmacSha256> {
        let secret = self
            .signing_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| ClientError::Credentials("no signing secret configured".into()))?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|err| ClientError::Credentials(err.to_string()))?;
        mac.update(format!("{}\n{}\n{}\n{}", method, bucket, key, expires_millis).as_bytes());
        Ok(mac)
    }

    /// Write `body` to a temp file next to `file_path`, fsync, and rename it
    /// into place. The temp file is removed on any failure.
    async fn write_payload(&self, file_path: &Path, body: &[u8]) -> ClientResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ClientError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ClientError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ClientError::Io(err));
            }
        }
        Ok(())
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    /// Store the payload and upsert its metadata (S3-like overwrite semantics).
    async fn put_object(&self, request: PutObject) -> ClientResult<String> {
        validate_bucket_name(&request.bucket)?;
        self.ensure_key_safe(&request.key)?;
        let actual = request.body.len() as u64;
        if actual != request.content_length {
            return Err(ClientError::ContentLengthMismatch {
                declared: request.content_length,
                actual,
            });
        }

        let file_path = self.object_path(&request.bucket, &request.key);
        self.write_payload(&file_path, &request.body).await?;

        let filename = request
            .key
            .rsplit('/')
            .next()
            .unwrap_or(&request.key)
            .to_string();
        let etag = format!("{:x}", md5::compute(&request.body));

        let upserted = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                id, bucket, key, filename, content_type, size_bytes, etag, acl, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                acl = excluded.acl,
                last_modified = excluded.last_modified
            RETURNING id, bucket, key, filename, content_type, size_bytes, etag, acl, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.bucket)
        .bind(&request.key)
        .bind(&filename)
        .bind(&request.content_type)
        .bind(actual as i64)
        .bind(&etag)
        .bind(request.acl.as_str())
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match upserted {
            Ok(object) => {
                debug!(
                    "stored {}/{} ({} bytes, {}, etag {})",
                    object.bucket, object.key, object.size_bytes, object.acl, object.etag
                );
                Ok(self.native_url_for(&request.bucket, &request.key))
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(ClientError::Sqlx(err))
            }
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectBody> {
        let (object, file) = self.open_object(bucket, key).await?;
        Ok(ObjectBody {
            content_type: object.content_type,
            content_length: object.size_bytes.max(0) as u64,
            stream: Box::pin(ReaderStream::new(file)),
        })
    }

    /// Remove the metadata row and the payload.
    ///
    /// Repeated calls return NotFound.
    async fn delete_object(&self, bucket: &str, key: &str) -> ClientResult<()> {
        let object = self.fetch_object(bucket, key).await?;

        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ClientError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(ClientError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    async fn sign(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> ClientResult<String> {
        self.fetch_object(bucket, key).await?;

        let expires_millis = expires_at.timestamp_millis();
        let signature = URL_SAFE_NO_PAD.encode(
            self.signature_mac(method, bucket, key, expires_millis)?
                .finalize()
                .into_bytes(),
        );

        let mut url = path_style_url(&self.endpoint, bucket, key);
        url.query_pairs_mut()
            .append_pair(EXPIRES_PARAM, &expires_millis.to_string())
            .append_pair(SIGNATURE_PARAM, &signature);
        Ok(url.into())
    }

    fn native_url_for(&self, bucket: &str, key: &str) -> String {
        path_style_url(&self.endpoint, bucket, key).into()
    }
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn validate_bucket_name(name: &str) -> ClientResult<()> {
    let invalid = |reason: &str| ClientError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
