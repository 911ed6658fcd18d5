//! Canonical object keys built from a folder and a file name.

use serde::{Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::errors::{StoreError, StoreResult};

pub const MAX_OBJECT_KEY_LEN: usize = 1024;

/// A validated `folder/name` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    folder: String,
    name: String,
}

impl ObjectKey {
    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder, self.name)
    }
}

impl Serialize for ObjectKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses the serialised `folder/name` form, splitting at the last `/`.
impl FromStr for ObjectKey {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        match s.rsplit_once('/') {
            Some((folder, name)) => build_key(folder, name),
            None => Err(StoreError::invalid_key(s, "missing folder separator")),
        }
    }
}

/// Build the key for `name` inside `folder`.
///
/// Both parts are trimmed. `folder` may be nested (`reports/2025`) but may not
/// start or end with `/`, contain empty segments, or contain `.`/`..`
/// segments. `name` is a single segment. Control characters and backslashes
/// are rejected everywhere.
pub fn build_key(folder: &str, name: &str) -> StoreResult<ObjectKey> {
    let folder = folder.trim();
    let name = name.trim();
    let joined = format!("{}/{}", folder, name);

    if folder.is_empty() {
        return Err(StoreError::invalid_key(joined, "folder is empty"));
    }
    if name.is_empty() {
        return Err(StoreError::invalid_key(joined, "file name is empty"));
    }
    if name.contains('/') {
        return Err(StoreError::invalid_key(
            joined,
            "file name must not contain `/`",
        ));
    }
    if joined.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::invalid_key(
            joined,
            format!("key exceeds {} bytes", MAX_OBJECT_KEY_LEN),
        ));
    }
    if joined.chars().any(|c| c.is_control() || c == '\\') {
        return Err(StoreError::invalid_key(
            joined,
            "control characters and `\\` are not allowed",
        ));
    }
    for segment in folder.split('/').chain(std::iter::once(name)) {
        match segment {
            "" => {
                return Err(StoreError::invalid_key(joined, "empty path segment"));
            }
            "." | ".." => {
                return Err(StoreError::invalid_key(
                    joined,
                    "relative path segments are not allowed",
                ));
            }
            _ => {}
        }
    }

    Ok(ObjectKey {
        folder: folder.to_string(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(folder: &str, name: &str) {
        match build_key(folder, name) {
            Err(StoreError::InvalidKey { .. }) => {}
            other => panic!("expected InvalidKey for ({folder:?}, {name:?}), got {other:?}"),
        }
    }

    #[test]
    fn joins_folder_and_name() {
        let key = build_key("docs", "report.pdf").unwrap();
        assert_eq!(key.to_string(), "docs/report.pdf");
        assert_eq!(key.folder(), "docs");
        assert_eq!(key.name(), "report.pdf");
    }

    #[test]
    fn trims_components() {
        let key = build_key("  docs ", "\treport.pdf ").unwrap();
        assert_eq!(key.to_string(), "docs/report.pdf");
    }

    #[test]
    fn empty_components_are_rejected() {
        assert_invalid("", "x");
        assert_invalid("f", "");
        assert_invalid("   ", "x");
        assert_invalid("f", " ");
    }

    #[test]
    fn nested_folders_are_allowed() {
        let key = build_key("employees/42/avatars", "me.png").unwrap();
        assert_eq!(key.to_string(), "employees/42/avatars/me.png");
    }

    #[test]
    fn separator_abuse_is_rejected() {
        assert_invalid("/docs", "a.txt");
        assert_invalid("docs/", "a.txt");
        assert_invalid("docs//old", "a.txt");
        assert_invalid("docs", "sub/a.txt");
        assert_invalid("docs/..", "a.txt");
        assert_invalid("docs", "..");
        assert_invalid(".", "a.txt");
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        assert_invalid("docs", "a\u{0}.txt");
        assert_invalid("docs\n", "x\rb");
        assert_invalid("docs\\old", "a.txt");
        assert_invalid("docs", "a\u{7f}");
    }

    #[test]
    fn overlong_keys_are_rejected() {
        let name = "n".repeat(MAX_OBJECT_KEY_LEN);
        assert_invalid("docs", &name);
    }

    #[test]
    fn parses_serialised_form() {
        let key: ObjectKey = "employees/42/cv final.pdf".parse().unwrap();
        assert_eq!(key.folder(), "employees/42");
        assert_eq!(key.name(), "cv final.pdf");
        assert!("report.pdf".parse::<ObjectKey>().is_err());
        assert!("docs/".parse::<ObjectKey>().is_err());
    }
}
