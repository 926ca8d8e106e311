//! Common types used throughout blocksync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters a hierarchical remote store refuses inside a path segment.
const FORBIDDEN_SEGMENT_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Authenticated user as seen by the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    uid: String,
}

impl UserRef {
    /// Create a new user reference.
    ///
    /// # Errors
    /// - Returns error if `uid` is not a valid path segment
    pub fn new(uid: impl Into<String>) -> crate::Result<Self> {
        let uid = uid.into();
        validate_segment(&uid)?;
        Ok(Self { uid })
    }

    /// Stable unique id of the user.
    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uid)
    }
}

/// A path in the remote document store or blob store.
///
/// Segments are validated so that every path survives a trip through a
/// hierarchical key-value backend unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    components: Vec<String>,
}

impl RemotePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty or contains a forbidden character
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_segment(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a `/`-separated path string.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Last segment of the path.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child segment.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_segment(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

/// Check that `segment` can be used as a single remote path segment.
pub fn validate_segment(segment: &str) -> crate::Result<()> {
    if segment.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Path segment cannot be empty".to_string(),
        ));
    }
    if segment
        .chars()
        .any(|c| FORBIDDEN_SEGMENT_CHARS.contains(&c) || c.is_ascii_control())
    {
        return Err(crate::Error::InvalidInput(format!(
            "Path segment contains a forbidden character: {:?}",
            segment
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_ref_creation() {
        let user = UserRef::new("uid-123").unwrap();
        assert_eq!(user.uid(), "uid-123");
    }

    #[test]
    fn test_user_ref_rejects_separators() {
        assert!(UserRef::new("").is_err());
        assert!(UserRef::new("a/b").is_err());
    }

    #[test]
    fn test_remote_path_parse() {
        let path = RemotePath::parse("sync/default/users/u1").unwrap();
        assert_eq!(path.components(), &["sync", "default", "users", "u1"]);
        assert_eq!(path.to_string(), "sync/default/users/u1");
    }

    #[test]
    fn test_remote_path_root() {
        assert!(RemotePath::parse("").unwrap().is_root());
        assert!(RemotePath::parse("/").unwrap().is_root());
    }

    #[test]
    fn test_remote_path_join_and_parent() {
        let path = RemotePath::root().join("sync").unwrap().join("files").unwrap();
        assert_eq!(path.to_string(), "sync/files");
        assert_eq!(path.name(), Some("files"));
        assert_eq!(path.parent().unwrap().to_string(), "sync");
    }

    #[test]
    fn test_remote_path_forbidden_characters() {
        for bad in ["a.b", "a#b", "a$b", "a[b", "a]b", "a\u{7}b"] {
            assert!(RemotePath::root().join(bad).is_err(), "{bad:?} accepted");
        }
        assert!(RemotePath::parse("sync//files").is_err());
    }
}
