//! Error types for xmlguard
//!
//! Library operations return [`Result`] with the [`Error`] enum. Expected
//! document problems (malformed markup, schema violations, denied entities)
//! are not errors in this sense: the parser reports them as diagnostics, see
//! [`crate::diagnostics`].

use std::fmt;
use thiserror::Error;

/// Result type alias using xmlguard Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for xmlguard operations
#[derive(Error, Debug)]
pub enum Error {
    /// Instance validation error (simple type or facet mismatch)
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Schema compilation error
    #[error("schema error: {0}")]
    Schema(#[from] ParseError),

    /// No grammar is cached for the namespace
    #[error("no grammar for namespace '{0}'")]
    SchemaNotFound(String),

    /// Value error (invalid value for a type or option)
    #[error("value error: {0}")]
    Value(String),

    /// Encoding error (characters the target encoding cannot carry)
    #[error("encoding error: {0}")]
    Encode(String),

    /// Decoding error (input bytes invalid in the detected encoding)
    #[error("decoding error: {0}")]
    Decode(String),

    /// Resource loading error
    #[error("resource error: {0}")]
    Resource(String),

    /// Namespace error
    #[error("namespace error: {0}")]
    Namespace(String),

    /// Name error (invalid XML name)
    #[error("name error: {0}")]
    Name(String),

    /// Limit exceeded error
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Allocation refused while buffering input
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML tokenizer or writer error
    #[error("XML error: {0}")]
    Xml(String),

    /// URL parsing error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

/// Simple-type validation error with context
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Error message
    pub message: String,
    /// Path to the node that failed validation
    pub path: Option<String>,
    /// Offending value
    pub instance: Option<String>,
    /// Underlying reason
    pub reason: Option<String>,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            instance: None,
            reason: None,
        }
    }

    /// Set the path where validation failed
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the offending value
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(ref reason) = self.reason {
            write!(f, " ({})", reason)?;
        }

        if let Some(ref instance) = self.instance {
            write!(f, ", got '{}'", instance)?;
        }

        if let Some(ref path) = self.path {
            write!(f, " at {}", path)?;
        }

        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Schema compilation error
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Location in the schema source (`source:line:column`)
    pub location: Option<String>,
    /// Schema source identifier
    pub source: Option<String>,
}

impl ParseError {
    /// Create a new parse error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            source: None,
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(ref loc) = self.location {
            write!(f, " at {}", loc)?;
        }

        if let Some(ref src) = self.source {
            write!(f, " in '{}'", src)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("value is not a valid xs:integer")
            .with_instance("abc")
            .with_path("/person/id");

        let msg = format!("{}", err);
        assert!(msg.contains("xs:integer"));
        assert!(msg.contains("'abc'"));
        assert!(msg.contains("/person/id"));
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new("unknown type 'tns:missing'")
            .with_location("12:5")
            .with_source("person.xsd");

        let msg = format!("{}", err);
        assert!(msg.contains("unknown type"));
        assert!(msg.contains("12:5"));
        assert!(msg.contains("person.xsd"));
    }

    #[test]
    fn test_error_conversion() {
        let val_err = ValidationError::new("test");
        let err: Error = val_err.into();
        assert!(matches!(err, Error::Validation(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
