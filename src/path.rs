//! Slash-delimited logical paths inside a container

use crate::container::Container;
use crate::error::Result;
use std::fmt;
use tracing::debug;

/// Path separator
pub const SEPARATOR: char = '/';

/// Split a path into its non-empty segments: `"/a//b/"` gives `["a", "b"]`
pub fn elements_of(path: &str) -> Vec<String> {
    path.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Canonical absolute form: a leading separator, no empty segments, no trailing separator
pub fn normalize(path: &str) -> String {
    let mut normalized = String::new();
    for segment in elements_of(path) {
        normalized.push(SEPARATOR);
        normalized.push_str(&segment);
    }
    if normalized.is_empty() {
        normalized.push(SEPARATOR);
    }
    normalized
}

/// Join two paths and normalize the result
pub fn join(base: &str, name: &str) -> String {
    normalize(&format!("{}{}{}", base, SEPARATOR, name))
}

/// Normalized path of the group containing `path`; the root is its own parent
pub fn parent(path: &str) -> String {
    let mut segments = elements_of(path);
    segments.pop();
    normalize(&segments.join("/"))
}

/// Whether an object exists at `path`. Never fails.
pub fn path_exists(container: &Container, path: &str) -> bool {
    container.exists(path)
}

/// A group known to exist in a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHandle {
    path: String,
}

impl GroupHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of a direct child of this group
    pub fn child(&self, name: &str) -> String {
        join(&self.path, name)
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Create every missing group along `path`.
///
/// Existing groups are left untouched, so repeated calls return the same group.
pub fn ensure_group(container: &mut Container, path: &str) -> Result<GroupHandle> {
    let mut prefix = String::new();
    for segment in elements_of(path) {
        prefix.push(SEPARATOR);
        prefix.push_str(&segment);
        if path_exists(container, &prefix) {
            continue;
        }
        container.create_group(&prefix)?;
        debug!("created group: {}", prefix);
    }

    Ok(GroupHandle {
        path: normalize(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements_of() {
        assert_eq!(elements_of("/a//b/"), vec!["a", "b"]);
        assert_eq!(elements_of("scan"), vec!["scan"]);
        assert!(elements_of("/").is_empty());
        assert!(elements_of("").is_empty());
    }

    #[test]
    fn test_normalize_and_join() {
        assert_eq!(normalize("a//b/"), "/a/b");
        assert_eq!(normalize("///"), "/");
        assert_eq!(join("/", "/data"), "/data");
        assert_eq!(join("/study/series/", "ITKMetaData"), "/study/series/ITKMetaData");
        assert_eq!(parent("/study/series/data"), "/study/series");
        assert_eq!(parent("/data"), "/");
        assert_eq!(parent("/"), "/");
    }

    #[test]
    fn test_ensure_group_is_idempotent() {
        let mut container = Container::in_memory().unwrap();
        let first = ensure_group(&mut container, "/study//series/").unwrap();
        let second = ensure_group(&mut container, "study/series").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.path(), "/study/series");
        assert_eq!(container.children("/study").unwrap(), vec!["series"]);
        assert_eq!(first.child("data"), "/study/series/data");

        let root = ensure_group(&mut container, "/").unwrap();
        assert_eq!(root.path(), "/");
    }

    #[test]
    fn test_path_exists_never_fails() {
        let container = Container::in_memory().unwrap();
        assert!(path_exists(&container, "/"));
        assert!(!path_exists(&container, "/missing/deeper"));
    }
}
