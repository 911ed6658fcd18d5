//! ObjectStore: upload, download, delete and link issuance for one bucket.
//!
//! Each call builds its own key, ACL and link from immutable state and a
//! shared `StorageClient`, so a single `ObjectStore` can be cloned freely and
//! used from many tasks at once. Every collaborator call is bounded by the
//! configured timeout.

use bytes::Bytes;
use futures::{TryStreamExt, stream::BoxStream};
use std::{fmt, future::Future, io, path::Path, sync::Arc, time::Duration};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::{
    errors::{MalformedUrl, StoreError, StoreResult, UploadFailure},
    models::{
        access::AccessIntent,
        link::{DirectLink, SignedLink},
    },
    services::{
        access_policy::AccessPolicy,
        key_builder::{ObjectKey, build_key},
        link_codec::LinkCodec,
        storage_client::{ClientError, PutObject, StorageClient},
    },
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const OCTET_STREAM: &str = "application/octet-stream";

/// A downloaded object, streamed.
pub struct DownloadedFile {
    /// Trailing key segment, suitable for `Content-Disposition`.
    pub filename: String,
    pub content_type: String,
    pub content_length: u64,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

impl fmt::Debug for DownloadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadedFile")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl DownloadedFile {
    /// Drain the stream into memory.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        let buf = self
            .stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(Bytes::from(buf))
    }
}

#[derive(Clone)]
pub struct ObjectStore {
    client: Arc<dyn StorageClient>,
    bucket: String,
    codec: LinkCodec,
    policy: AccessPolicy,
    timeout: Duration,
}

impl ObjectStore {
    pub fn new(client: Arc<dyn StorageClient>, bucket: impl Into<String>, codec: LinkCodec) -> Self {
        Self {
            policy: AccessPolicy::new(client.clone()),
            client,
            bucket: bucket.into(),
            codec,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn codec(&self) -> &LinkCodec {
        &self.codec
    }

    /// Store `content` under `folder/name` and return its direct link.
    ///
    /// A missing `content_type` is guessed from `name`.
    pub async fn upload<R>(
        &self,
        folder: &str,
        name: &str,
        content: R,
        content_type: Option<&str>,
        intent: AccessIntent,
    ) -> StoreResult<DirectLink>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (key, native_url) = self
            .store(folder, name, content, content_type, intent)
            .await?;
        let link = self.codec.encode(&native_url)?;
        info!("uploaded {} ({:?}) => {}", key, intent, link);
        Ok(link)
    }

    /// Store `content` under `folder/name` and return the bare key, for
    /// callers that manage visibility themselves.
    pub async fn upload_and_get_path<R>(
        &self,
        folder: &str,
        name: &str,
        content: R,
        content_type: Option<&str>,
        intent: AccessIntent,
    ) -> StoreResult<ObjectKey>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (key, _) = self
            .store(folder, name, content, content_type, intent)
            .await?;
        info!("uploaded {} ({:?})", key, intent);
        Ok(key)
    }

    /// Upload a file from the local filesystem, guessing its content type
    /// from `name`.
    pub async fn upload_file(
        &self,
        folder: &str,
        name: &str,
        path: impl AsRef<Path>,
        intent: AccessIntent,
    ) -> StoreResult<DirectLink> {
        let file = tokio::fs::File::open(path.as_ref())
            .await
            .map_err(|err| StoreError::Upload {
                key: format!("{}/{}", folder.trim(), name.trim()),
                source: UploadFailure::Read(err),
            })?;
        self.upload(folder, name, file, None, intent).await
    }

    /// Fetch the object an external link points at.
    pub async fn download(&self, link: &str) -> StoreResult<DownloadedFile> {
        const OPERATION: &str = "download";
        let (bucket, key) = self.resolve(OPERATION, link)?;

        let body = self
            .bounded(OPERATION, self.client.get_object(&bucket, &key))
            .await?
            .map_err(|err| client_failure(OPERATION, err))?;

        let filename = key.rsplit('/').next().unwrap_or(&key).to_string();
        let content_type = mime_guess::from_path(&filename)
            .first()
            .map(|mime| mime.to_string())
            .or(body.content_type)
            .unwrap_or_else(|| OCTET_STREAM.to_string());

        debug!("downloading {}/{} as {} ({})", bucket, key, filename, content_type);
        Ok(DownloadedFile {
            filename,
            content_type,
            content_length: body.content_length,
            stream: body.stream,
        })
    }

    /// Delete the object an external link points at.
    ///
    /// Deleting an object that does not exist is `StoreError::NotFound`.
    pub async fn delete(&self, link: &str) -> StoreResult<()> {
        const OPERATION: &str = "delete";
        let (bucket, key) = self.resolve(OPERATION, link)?;

        self.bounded(OPERATION, self.client.delete_object(&bucket, &key))
            .await?
            .map_err(|err| client_failure(OPERATION, err))?;

        info!("deleted {}/{}", bucket, key);
        Ok(())
    }

    /// A fresh GET link for `key`, valid for `expiration_millis` from now.
    ///
    /// Like direct links, signed links always use `https`.
    pub async fn presigned_url(
        &self,
        key: &ObjectKey,
        expiration_millis: i64,
    ) -> StoreResult<SignedLink> {
        let key = key.to_string();
        let signed = self
            .bounded(
                "presign",
                self.policy.sign_link(&self.bucket, &key, expiration_millis),
            )
            .await??;
        Ok(SignedLink {
            url: self.codec.encode(&signed.url)?.into_string(),
            expires_at: signed.expires_at,
        })
    }

    /// Direct link of an already stored object.
    pub fn direct_link(&self, key: &ObjectKey) -> StoreResult<DirectLink> {
        let native_url = self.client.native_url_for(&self.bucket, &key.to_string());
        Ok(self.codec.encode(&native_url)?)
    }

    async fn store<R>(
        &self,
        folder: &str,
        name: &str,
        mut content: R,
        content_type: Option<&str>,
        intent: AccessIntent,
    ) -> StoreResult<(ObjectKey, String)>
    where
        R: AsyncRead + Unpin + Send,
    {
        const OPERATION: &str = "upload";
        let key = build_key(folder, name)?;
        let acl = self.policy.acl_for(intent);

        let mut buf = Vec::new();
        content
            .read_to_end(&mut buf)
            .await
            .map_err(|err| StoreError::Upload {
                key: key.to_string(),
                source: UploadFailure::Read(err),
            })?;

        let content_type = content_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(key.name())
                    .first_or_octet_stream()
                    .to_string()
            });

        let request = PutObject {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_length: buf.len() as u64,
            body: Bytes::from(buf),
            content_type,
            acl,
        };
        debug!(
            "storing {} ({} bytes, {}, {})",
            request.key, request.content_length, request.content_type, acl
        );

        let native_url = self
            .bounded(OPERATION, self.client.put_object(request))
            .await?
            .map_err(|err| {
                warn!("storing {} failed: {}", key, err);
                StoreError::Upload {
                    key: key.to_string(),
                    source: UploadFailure::Store(err),
                }
            })?;
        Ok((key, native_url))
    }

    /// Decode `link` into (bucket, key), checking it belongs to this store's
    /// bucket and that the key is a canonical `folder/name`.
    pub fn resolve(&self, operation: &'static str, link: &str) -> StoreResult<(String, String)> {
        let (bucket, key) = self.codec.decode(link).map_err(|source| {
            warn!("{}: rejected link {}: {}", operation, link, source.reason);
            StoreError::LinkResolution { operation, source }
        })?;
        if bucket != self.bucket {
            warn!("{}: link {} targets foreign bucket `{}`", operation, link, bucket);
            return Err(StoreError::LinkResolution {
                operation,
                source: MalformedUrl::new(
                    link,
                    format!("bucket `{}` is not `{}`", bucket, self.bucket),
                ),
            });
        }

        let invalid = match key.parse::<ObjectKey>() {
            Ok(parsed) if parsed.to_string() == key => None,
            Ok(_) => Some(format!("key `{}` is not in canonical form", key)),
            Err(err) => Some(err.to_string()),
        };
        if let Some(reason) = invalid {
            warn!("{}: link {} carries an invalid key: {}", operation, link, reason);
            return Err(StoreError::LinkResolution {
                operation,
                source: MalformedUrl::new(link, reason),
            });
        }
        Ok((bucket, key))
    }

    /// Run a collaborator call under the configured timeout.
    async fn bounded<F>(&self, operation: &'static str, call: F) -> StoreResult<F::Output>
    where
        F: Future,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                warn!("{}: no answer within {:?}", operation, self.timeout);
                StoreError::Timeout {
                    operation,
                    after: self.timeout,
                }
            })
    }
}

fn client_failure(operation: &'static str, err: ClientError) -> StoreError {
    match err {
        ClientError::NotFound { bucket, key } => StoreError::NotFound {
            operation,
            bucket,
            key,
        },
        err @ ClientError::AccessDenied(_) => StoreError::AccessDenied {
            operation,
            source: err,
        },
        other => StoreError::Storage {
            operation,
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::access::AccessLevel,
        services::{
            memory_storage::MemoryStorage,
            storage_client::{ClientResult, HttpMethod, ObjectBody},
        },
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use url::Url;

    const ENDPOINT: &str = "http://storage.test/objects";

    fn memory_store() -> (Arc<MemoryStorage>, ObjectStore) {
        let backend = Arc::new(MemoryStorage::new(Url::parse(ENDPOINT).unwrap()));
        let codec = LinkCodec::with_endpoint(ENDPOINT).unwrap();
        let store = ObjectStore::new(backend.clone(), "media", codec);
        (backend, store)
    }

    #[tokio::test]
    async fn public_upload_returns_https_link_and_public_acl() {
        let (backend, store) = memory_store();

        let link = store
            .upload("docs", "report.pdf", &b"%PDF-"[..], Some("application/pdf"), AccessIntent::Public)
            .await
            .unwrap();

        assert_eq!(link.as_str(), "https://storage.test/objects/media/docs/report.pdf");
        let stored = backend.object("media", "docs/report.pdf").unwrap();
        assert_eq!(stored.acl, AccessLevel::PublicRead);
        assert_eq!(stored.content_type, "application/pdf");
        assert_eq!(&stored.body[..], b"%PDF-");
    }

    #[tokio::test]
    async fn path_upload_returns_key_and_private_acl() {
        let (backend, store) = memory_store();

        let key = store
            .upload_and_get_path("employees/7", "cv.docx", &b"abc"[..], None, AccessIntent::Private)
            .await
            .unwrap();

        assert_eq!(key.to_string(), "employees/7/cv.docx");
        let stored = backend.object("media", "employees/7/cv.docx").unwrap();
        assert_eq!(stored.acl, AccessLevel::Private);
        assert_eq!(
            stored.content_type,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
    }

    #[tokio::test]
    async fn invalid_key_never_reaches_storage() {
        let (backend, store) = memory_store();
        let err = store
            .upload("", "x.txt", &b"x"[..], None, AccessIntent::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn unreadable_content_is_an_upload_error() {
        struct Broken;
        impl AsyncRead for Broken {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")))
            }
        }

        let (backend, store) = memory_store();
        let err = store
            .upload("docs", "a.txt", Broken, None, AccessIntent::Public)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Upload {
                source: UploadFailure::Read(_),
                ..
            }
        ));
        assert!(err.is_retryable());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn download_streams_bytes_with_filename_hint() {
        let (_backend, store) = memory_store();
        let link = store
            .upload("docs", "notes.txt", &b"hello"[..], None, AccessIntent::Public)
            .await
            .unwrap();

        let file = store.download(link.as_str()).await.unwrap();
        assert_eq!(file.filename, "notes.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.content_length, 5);
        assert_eq!(&file.into_bytes().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn foreign_and_malformed_links_fail_resolution() {
        let (_backend, store) = memory_store();
        for link in [
            "definitely not a link",
            "https://storage.test/objects/other-bucket/docs/a.txt",
            "https://elsewhere.test/objects/media/docs/a.txt",
            "https://storage.test/objects/media/docs/a%5Cb.txt",
            "https://storage.test/objects/media/docs/",
            "https://storage.test/objects/media/docs//a.txt",
            "https://storage.test/objects/media/docs/%20a.txt",
        ] {
            match store.download(link).await {
                Err(err) => {
                    assert!(
                        matches!(err, StoreError::LinkResolution { operation: "download", .. }),
                        "{link}: unexpected error {err:?}"
                    );
                    assert!(err.is_caller_error());
                }
                Ok(_) => panic!("{link}: unexpectedly resolved"),
            }
        }
        let err = store.delete("ftp://media/docs/a.txt").await.unwrap_err();
        assert!(matches!(err, StoreError::LinkResolution { operation: "delete", .. }));
    }

    #[tokio::test]
    async fn deleting_twice_reports_not_found() {
        let (backend, store) = memory_store();
        let link = store
            .upload("docs", "a.txt", &b"x"[..], None, AccessIntent::Public)
            .await
            .unwrap();

        store.delete(link.as_str()).await.unwrap();
        assert!(backend.is_empty());

        let err = store.delete(link.as_str()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { operation: "delete", .. }));
        let err = store.download(link.as_str()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { operation: "download", .. }));
    }

    #[tokio::test]
    async fn presigned_url_reflects_current_time() {
        let (_backend, store) = memory_store();
        let key = store
            .upload_and_get_path("docs", "a.txt", &b"x"[..], None, AccessIntent::Private)
            .await
            .unwrap();

        let before = Utc::now();
        let signed = store.presigned_url(&key, 60_000).await.unwrap();
        assert!(signed.expires_at >= before + chrono::Duration::seconds(60));
        assert!(signed.url.starts_with("https://storage.test/objects/media/docs/a.txt?"));

        let (bucket, decoded) = store.codec().decode(&signed.url).unwrap();
        assert_eq!((bucket.as_str(), decoded.as_str()), ("media", "docs/a.txt"));

        let err = store.presigned_url(&key, -5).await.unwrap_err();
        assert!(matches!(err, StoreError::Signing { source: None, .. }));
    }

    #[tokio::test]
    async fn direct_link_matches_upload_link() {
        let (_backend, store) = memory_store();
        let link = store
            .upload("docs", "a b.txt", &b"x"[..], None, AccessIntent::Public)
            .await
            .unwrap();
        let key = build_key("docs", "a b.txt").unwrap();
        assert_eq!(store.direct_link(&key).unwrap(), link);
    }

    /// Collaborator that never answers in time.
    struct Stalled;

    #[async_trait]
    impl StorageClient for Stalled {
        async fn put_object(&self, _request: PutObject) -> ClientResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }

        async fn get_object(&self, _bucket: &str, _key: &str) -> ClientResult<ObjectBody> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(ClientError::AccessDenied("late".into()))
        }

        async fn delete_object(&self, _bucket: &str, _key: &str) -> ClientResult<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        async fn sign(
            &self,
            _bucket: &str,
            _key: &str,
            _method: HttpMethod,
            _expires_at: DateTime<Utc>,
        ) -> ClientResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }

        fn native_url_for(&self, bucket: &str, key: &str) -> String {
            format!("{}/{}/{}", ENDPOINT, bucket, key)
        }
    }

    #[tokio::test]
    async fn slow_collaborator_surfaces_timeout() {
        let store = ObjectStore::new(
            Arc::new(Stalled),
            "media",
            LinkCodec::with_endpoint(ENDPOINT).unwrap(),
        )
        .with_timeout(Duration::from_millis(20));

        let err = store
            .upload("docs", "a.txt", &b"x"[..], None, AccessIntent::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: "upload", .. }));

        let link = "https://storage.test/objects/media/docs/a.txt";
        let err = store.download(link).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: "download", .. }));
        let err = store.delete(link).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: "delete", .. }));

        let key = build_key("docs", "a.txt").unwrap();
        let err = store.presigned_url(&key, 1_000).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: "presign", .. }));
        assert!(err.is_retryable());
    }
}
