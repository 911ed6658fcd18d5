//! In-process `StorageClient` for tests and embedding.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use url::Url;

use crate::{
    models::access::AccessLevel,
    services::{
        link_codec::path_style_url,
        storage_client::{ClientError, ClientResult, HttpMethod, ObjectBody, PutObject, StorageClient},
    },
};

#[derive(Clone, Debug)]
pub struct MemoryObject {
    pub body: Bytes,
    pub content_type: String,
    pub acl: AccessLevel,
}

/// Objects kept in a map keyed by (bucket, key).
///
/// Native URLs are path-style under `endpoint`; signatures are not
/// cryptographic and only record the method and expiry.
#[derive(Debug)]
pub struct MemoryStorage {
    endpoint: Url,
    objects: Mutex<HashMap<(String, String), MemoryObject>>,
}

impl MemoryStorage {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Copy of the stored object, if any.
    pub fn object(&self, bucket: &str, key: &str) -> Option<MemoryObject> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), MemoryObject>> {
        // A panicking holder cannot leave the map half-updated.
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put_object(&self, request: PutObject) -> ClientResult<String> {
        let actual = request.body.len() as u64;
        if actual != request.content_length {
            return Err(ClientError::ContentLengthMismatch {
                declared: request.content_length,
                actual,
            });
        }
        let url = self.native_url_for(&request.bucket, &request.key);
        self.lock().insert(
            (request.bucket, request.key),
            MemoryObject {
                body: request.body,
                content_type: request.content_type,
                acl: request.acl,
            },
        );
        Ok(url)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectBody> {
        let object = self.object(bucket, key).ok_or_else(|| ClientError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        Ok(ObjectBody {
            content_type: Some(object.content_type),
            content_length: object.body.len() as u64,
            stream: Box::pin(stream::iter([Ok(object.body)])),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ClientResult<()> {
        match self.lock().remove(&(bucket.to_string(), key.to_string())) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }

    async fn sign(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> ClientResult<String> {
        let mut url = path_style_url(&self.endpoint, bucket, key);
        url.query_pairs_mut()
            .append_pair("X-Method", method.as_str())
            .append_pair("X-Expires", &expires_at.timestamp_millis().to_string());
        Ok(url.into())
    }

    fn native_url_for(&self, bucket: &str, key: &str) -> String {
        path_style_url(&self.endpoint, bucket, key).into()
    }
}
