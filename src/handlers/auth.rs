//! Bearer-token guard for the management routes (upload, delete, presign).
//!
//! Downloads stay open: they are governed by the object's ACL and link
//! signature instead.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Proof that the request carried the configured API token.
#[derive(Debug, Clone, Copy)]
pub struct ApiAccess;

impl FromRequestParts<AppState> for ApiAccess {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_token.as_deref() else {
            return Err(AppError::forbidden(
                "management API is disabled; set OBJECT_LINKS_API_TOKEN",
            ));
        };

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim);

        match presented {
            Some(token) if tokens_match(token, expected) => Ok(ApiAccess),
            Some(_) => {
                debug!("rejected bearer token on {}", parts.uri.path());
                Err(AppError::unauthorized("invalid bearer token"))
            }
            None => Err(AppError::unauthorized("missing bearer token")),
        }
    }
}

/// Compares SHA-256 digests of both tokens.
fn tokens_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}
