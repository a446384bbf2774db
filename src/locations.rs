//! Resource location resolution
//!
//! Classifies system identifiers (file paths, `file:` URLs, remote URLs) and
//! resolves relative identifiers against the referencing document.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Resource location - can be a URL, file path, or string identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// File system path
    Path(PathBuf),
    /// URL (http, https, ftp, etc.)
    Url(Url),
    /// String identifier (for in-memory resources)
    String(String),
}

impl Location {
    /// Classify a system identifier, resolving relative references against
    /// `base` (the directory of the referencing document) when given
    pub fn from_system_id(system_id: &str, base: Option<&Path>) -> Self {
        if let Some(url) = parse_url(system_id) {
            if url.scheme() == "file" {
                if let Ok(path) = url.to_file_path() {
                    return Location::Path(path);
                }
            }
            return Location::Url(url);
        }

        let path = PathBuf::from(system_id);
        if path.is_absolute() {
            return Location::Path(path);
        }
        match base {
            Some(dir) => Location::Path(dir.join(path)),
            None => Location::Path(path),
        }
    }

    /// Get the location as a string
    pub fn as_str(&self) -> String {
        self.to_string()
    }

    /// Check if this is a remote location (URL)
    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Url(_))
    }

    /// Check if this is a local file
    pub fn is_file(&self) -> bool {
        matches!(self, Location::Path(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(p) => write!(f, "{}", p.display()),
            Location::Url(u) => write!(f, "{}", u),
            Location::String(s) => write!(f, "{}", s),
        }
    }
}

/// Parse a string as an absolute URL with a real scheme
///
/// Single-letter schemes are Windows drive letters, not URLs.
fn parse_url(s: &str) -> Option<Url> {
    let url = Url::parse(s).ok()?;
    if url.scheme().len() < 2 {
        return None;
    }
    Some(url)
}

/// Lexically normalize a path, folding `.` and `..` components
///
/// Returns `None` when a `..` would climb above the start of the path.
pub fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_from_url() {
        let loc = Location::from_system_id("http://example.com/schema.xsd", None);
        assert!(matches!(loc, Location::Url(_)));
        assert!(loc.is_remote());
    }

    #[test]
    fn test_location_from_file_url() {
        let loc = Location::from_system_id("file:///tmp/schema.xsd", None);
        assert_eq!(loc, Location::Path(PathBuf::from("/tmp/schema.xsd")));
    }

    #[test]
    fn test_relative_location_uses_base() {
        let loc = Location::from_system_id("ents/a.ent", Some(Path::new("/data/docs")));
        assert_eq!(loc, Location::Path(PathBuf::from("/data/docs/ents/a.ent")));
        assert!(loc.is_file());
    }

    #[test]
    fn test_location_display() {
        let loc = Location::String("test".to_string());
        assert_eq!(loc.as_str(), "test");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            Some(PathBuf::from("/a/c/d"))
        );
        assert_eq!(normalize_path(Path::new("a/../../etc/passwd")), None);
        assert_eq!(normalize_path(Path::new("/../etc")), None);
    }
}
