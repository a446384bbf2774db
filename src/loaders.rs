//! Resource loading utilities
//!
//! Reads input streams and local resources into memory under the configured
//! size limits. The loader never decides *whether* a resource may be read;
//! that is the job of [`crate::resolver::ResolutionPolicy`].

use crate::error::{Error, Result};
use crate::limits::Limits;
use crate::locations::Location;
use std::fs::File;
use std::io::Read;

/// Resource loader for documents, entities and schemas
#[derive(Debug, Clone)]
pub struct Loader {
    /// Resource limits
    limits: Limits,
}

impl Loader {
    /// Create a new loader with default settings
    pub fn new() -> Self {
        Self {
            limits: Limits::default(),
        }
    }

    /// Set the limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Read a whole stream, refusing inputs larger than `max_xml_size`
    pub fn read_stream(&self, reader: impl Read) -> Result<Vec<u8>> {
        let max = self.limits.max_xml_size;
        let mut content = Vec::new();
        content.try_reserve(8 * 1024).map_err(|e| {
            Error::OutOfMemory(format!("cannot allocate input buffer: {}", e))
        })?;

        // One byte past the limit tells an oversized input from an exact fit
        reader
            .take(max as u64 + 1)
            .read_to_end(&mut content)?;

        self.limits.check_xml_size(content.len())?;
        Ok(content)
    }

    /// Load a resource as bytes
    pub fn load_bytes(&self, location: &Location) -> Result<Vec<u8>> {
        match location {
            Location::Path(path) => {
                let file = File::open(path).map_err(|e| {
                    Error::Resource(format!("Failed to read file '{}': {}", path.display(), e))
                })?;
                self.read_stream(file)
            }
            Location::Url(url) => Err(Error::Resource(format!(
                "remote resources are not fetched by the built-in loader: {}",
                url
            ))),
            Location::String(s) => {
                self.limits.check_xml_size(s.len())?;
                Ok(s.as_bytes().to_vec())
            }
        }
    }

    /// Load a resource as a UTF-8 string
    pub fn load(&self, location: &Location) -> Result<String> {
        let bytes = self.load_bytes(location)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("'{}' is not valid UTF-8: {}", location, e)))
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "<root>test</root>").unwrap();

        let location = Location::Path(file.path().to_path_buf());
        let loader = Loader::new();
        let content = loader.load(&location).unwrap();

        assert!(content.contains("<root>test</root>"));
    }

    #[test]
    fn test_load_from_string() {
        let location = Location::String("<root>test</root>".to_string());
        let loader = Loader::new();
        let content = loader.load(&location).unwrap();

        assert_eq!(content, "<root>test</root>");
    }

    #[test]
    fn test_remote_is_not_fetched() {
        let location = Location::from_system_id("http://example.invalid/secret", None);
        let result = Loader::new().load_bytes(&location);
        assert!(matches!(result, Err(Error::Resource(_))));
    }

    #[test]
    fn test_size_limit() {
        let limits = Limits {
            max_xml_size: 16,
            ..Limits::default()
        };
        let loader = Loader::new().with_limits(limits);

        assert!(loader.read_stream(&b"<a>exactly16</a>"[..]).is_ok());
        let result = loader.read_stream(&b"<a>seventeen!</a>"[..]);
        assert!(matches!(result, Err(Error::LimitExceeded(_))));
    }
}
