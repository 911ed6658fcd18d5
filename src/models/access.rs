//! Canned access levels and the caller intent that selects them.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// What the caller wants for a freshly uploaded object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccessIntent {
    /// Anyone holding the direct link may read the object.
    Public,
    /// Reads require a signed, time-limited link.
    Private,
}

/// Provider-level canned ACL attached to a stored object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    #[serde(rename = "public-read")]
    PublicRead,
    #[serde(rename = "private")]
    Private,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::PublicRead => "public-read",
            AccessLevel::Private => "private",
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, AccessLevel::PublicRead)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public-read" => Ok(AccessLevel::PublicRead),
            "private" => Ok(AccessLevel::Private),
            other => Err(format!("unknown canned acl `{}`", other)),
        }
    }
}

impl FromStr for AccessIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(AccessIntent::Public),
            "private" => Ok(AccessIntent::Private),
            other => Err(format!("unknown visibility `{}`", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_acl_parses_its_own_rendering() {
        for level in [AccessLevel::PublicRead, AccessLevel::Private] {
            assert_eq!(level.as_str().parse::<AccessLevel>().unwrap(), level);
        }
        assert!("authenticated-read".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn intent_is_case_insensitive() {
        assert_eq!("PUBLIC".parse::<AccessIntent>().unwrap(), AccessIntent::Public);
        assert_eq!("private".parse::<AccessIntent>().unwrap(), AccessIntent::Private);
        assert!("shared".parse::<AccessIntent>().is_err());
    }
}
