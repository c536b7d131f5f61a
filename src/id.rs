//! Hierarchical `/`-separated identifiers (`PathId`) with canonicalization
//! and relative-path resolution.
//!
//! Grounded on the teacher's `QoveryIdentifier` (`src/io_models.rs`) for the
//! newtype-over-`Display`-plus-validation shape, generalized from a bare UUID
//! wrapper to a path-structured identifier as spec.md §3 requires.

use derive_more::Display;

use crate::errors::CoreError;

/// Absolute or relative `/`-separated identifier, e.g. `/payments/api`.
///
/// Segment alphabet is `[a-z0-9]([a-z0-9-]*[a-z0-9])?`; segments may also
/// contain `.` internally (treated as part of the segment, not a separator).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, serde::Serialize, serde::Deserialize)]
pub struct PathId(String);

fn is_valid_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    let bytes = segment.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) {
        return false;
    }
    if bytes.len() == 1 {
        return true;
    }
    if !is_alnum(*bytes.last().unwrap()) {
        return false;
    }
    bytes[1..bytes.len() - 1]
        .iter()
        .all(|&b| is_alnum(b) || b == b'-' || b == b'.')
}

impl PathId {
    pub const ROOT: &'static str = "/";

    /// Parses and canonicalizes an absolute path id. Fails on empty segments
    /// (other than the bare root) or segments outside the allowed alphabet.
    pub fn parse_absolute(raw: &str) -> Result<Self, CoreError> {
        if !raw.starts_with('/') {
            return Err(CoreError::ValidationFailed(format!("path id must be absolute: {raw}")));
        }
        if raw == "/" {
            return Ok(PathId("/".to_string()));
        }
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        for segment in &segments {
            if !is_valid_segment(segment) {
                return Err(CoreError::ValidationFailed(format!(
                    "invalid path segment '{segment}' in '{raw}'"
                )));
            }
        }
        if segments.is_empty() {
            return Err(CoreError::ValidationFailed(format!("empty path id: {raw}")));
        }
        Ok(PathId(format!("/{}", segments.join("/"))))
    }

    pub fn root() -> Self {
        PathId("/".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> Vec<&str> {
        if self.is_root() {
            Vec::new()
        } else {
            self.0.split('/').filter(|s| !s.is_empty()).collect()
        }
    }

    /// Parent path id, or `None` for the root.
    pub fn parent(&self) -> Option<PathId> {
        let segs = self.segments();
        if segs.is_empty() {
            return None;
        }
        if segs.len() == 1 {
            return Some(PathId::root());
        }
        Some(PathId(format!("/{}", segs[..segs.len() - 1].join("/"))))
    }

    /// Last path segment ("name"), or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments().last().copied()
    }

    /// Appends a single relative segment and returns the resulting absolute id.
    pub fn append(&self, segment: &str) -> Result<PathId, CoreError> {
        if !is_valid_segment(segment) {
            return Err(CoreError::ValidationFailed(format!("invalid path segment '{segment}'")));
        }
        if self.is_root() {
            PathId::parse_absolute(&format!("/{segment}"))
        } else {
            PathId::parse_absolute(&format!("{}/{}", self.0, segment))
        }
    }

    /// Resolves `relative` against this id's enclosing group, matching the
    /// dependency-resolution semantics of spec.md §3 (`dependencies` may be
    /// absolute or relative). A relative reference is resolved against the
    /// parent of `self` (i.e. `self`'s own enclosing group), the same way a
    /// shell resolves a sibling file from a file's directory.
    pub fn resolve_relative(&self, relative: &str) -> Result<PathId, CoreError> {
        if relative.starts_with('/') {
            return PathId::parse_absolute(relative);
        }
        let base = self.parent().unwrap_or_else(PathId::root);
        let mut current = base;
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                current = current.parent().unwrap_or_else(PathId::root);
            } else if segment != "." {
                current = current.append(segment)?;
            }
        }
        Ok(current)
    }

    /// True if `other` is a direct child of `self`.
    pub fn is_direct_child_of(&self, other: &PathId) -> bool {
        self.parent().as_ref() == Some(other)
    }
}

impl std::str::FromStr for PathId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathId::parse_absolute(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_canonicalize() {
        // setup / execute:
        let id = PathId::parse_absolute("/a/b/c").unwrap();

        // verify:
        assert_eq!(id.as_str(), "/a/b/c");
        assert_eq!(id.segments(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejects_empty_segment() {
        assert!(PathId::parse_absolute("/a//b").is_err());
    }

    #[test]
    fn test_rejects_relative_input() {
        assert!(PathId::parse_absolute("a/b").is_err());
    }

    #[test]
    fn test_rejects_bad_alphabet() {
        assert!(PathId::parse_absolute("/A/b").is_err());
        assert!(PathId::parse_absolute("/-ab/b").is_err());
        assert!(PathId::parse_absolute("/ab-/b").is_err());
    }

    #[test]
    fn test_dot_allowed_inside_segment() {
        let id = PathId::parse_absolute("/my.app/v1").unwrap();
        assert_eq!(id.segments(), vec!["my.app", "v1"]);
    }

    #[test]
    fn test_parent_and_name() {
        // setup:
        let id = PathId::parse_absolute("/a/b/c").unwrap();

        // execute:
        let parent = id.parent().unwrap();

        // verify:
        assert_eq!(parent.as_str(), "/a/b");
        assert_eq!(id.name(), Some("c"));
        assert_eq!(PathId::root().parent(), None);
    }

    #[test]
    fn test_append() {
        let group = PathId::parse_absolute("/a/b").unwrap();
        assert_eq!(group.append("c").unwrap().as_str(), "/a/b/c");
    }

    #[test]
    fn test_resolve_relative_sibling() {
        // setup: app "/group1/app1" resolving dependency "app2" should find
        // the sibling under the same enclosing group.
        let app = PathId::parse_absolute("/group1/app1").unwrap();

        // execute:
        let resolved = app.resolve_relative("app2").unwrap();

        // verify:
        assert_eq!(resolved.as_str(), "/group1/app2");
    }

    #[test]
    fn test_resolve_relative_absolute_passthrough() {
        let app = PathId::parse_absolute("/group1/app1").unwrap();
        let resolved = app.resolve_relative("/other/app2").unwrap();
        assert_eq!(resolved.as_str(), "/other/app2");
    }

    #[test]
    fn test_is_direct_child_of() {
        let group = PathId::parse_absolute("/a/b").unwrap();
        let app = PathId::parse_absolute("/a/b/c").unwrap();
        assert!(app.is_direct_child_of(&group));
        assert!(!group.is_direct_child_of(&app));
    }
}
