//! Canned ACL selection and signed-link issuance.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    errors::{StoreError, StoreResult},
    models::{
        access::{AccessIntent, AccessLevel},
        link::SignedLink,
    },
    services::storage_client::{HttpMethod, StorageClient},
};

/// Longest validity a provider signature may carry (seven days).
pub const MAX_EXPIRATION_MILLIS: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Clone)]
pub struct AccessPolicy {
    signer: Arc<dyn StorageClient>,
}

impl AccessPolicy {
    pub fn new(signer: Arc<dyn StorageClient>) -> Self {
        Self { signer }
    }

    /// Canned ACL for an upload made with `intent`.
    pub fn acl_for(&self, intent: AccessIntent) -> AccessLevel {
        match intent {
            AccessIntent::Public => AccessLevel::PublicRead,
            AccessIntent::Private => AccessLevel::Private,
        }
    }

    /// Issue a GET link for (bucket, key) valid for `window_millis` from now.
    ///
    /// The window is checked before the signer is contacted. Every call signs
    /// afresh.
    pub async fn sign_link(
        &self,
        bucket: &str,
        key: &str,
        window_millis: i64,
    ) -> StoreResult<SignedLink> {
        if window_millis < 0 {
            return Err(StoreError::Signing {
                key: key.to_string(),
                reason: format!("expiration window {}ms is negative", window_millis),
                source: None,
            });
        }
        if window_millis > MAX_EXPIRATION_MILLIS {
            return Err(StoreError::Signing {
                key: key.to_string(),
                reason: format!(
                    "expiration window {}ms exceeds the {}ms maximum",
                    window_millis, MAX_EXPIRATION_MILLIS
                ),
                source: None,
            });
        }

        let expires_at = Utc::now() + Duration::milliseconds(window_millis);
        let url = self
            .signer
            .sign(bucket, key, HttpMethod::Get, expires_at)
            .await
            .map_err(|err| {
                warn!("signing `{}` in bucket `{}` failed: {}", key, bucket, err);
                StoreError::Signing {
                    key: key.to_string(),
                    reason: "storage client could not produce a signature".into(),
                    source: Some(err),
                }
            })?;

        debug!("signed link for `{}` expires at {}", key, expires_at);
        Ok(SignedLink { url, expires_at })
    }
}
