//! External links handed back to callers.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// A stable, https link to a publicly readable object.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct DirectLink(String);

impl DirectLink {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DirectLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DirectLink {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A time-limited link carrying an opaque provider signature.
///
/// Generated fresh for every request and never persisted.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl SignedLink {
    /// Validity left at `now`, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Display for SignedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_goes_negative() {
        let now = Utc::now();
        let link = SignedLink {
            url: "https://example.com/b/k".into(),
            expires_at: now + Duration::seconds(30),
        };
        assert_eq!(link.remaining(now), Duration::seconds(30));
        assert!(!link.is_expired(now));

        let later = now + Duration::minutes(5);
        assert_eq!(link.remaining(later), Duration::zero());
        assert!(link.is_expired(later));
    }
}
