//! Diagnostic collection
//!
//! Warnings, errors and fatal errors found while parsing are recorded in
//! arrival order by a [`DiagnosticCollector`] scoped to one parse. Recording
//! never fails.

use serde::Serialize;
use std::fmt;

/// How serious a diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    /// Recoverable and informational
    Warning,
    /// Recoverable; fails the parse only under `strict_on_errors`
    Error,
    /// Unrecoverable; the parse stops immediately
    Fatal,
}

impl Severity {
    /// Parse a severity from its lowercase name
    pub fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            _ => Err(crate::Error::Value(format!(
                "Invalid severity: '{}'. Must be 'warning', 'error', or 'fatal'",
                s
            ))),
        }
    }

    /// Get the severity as it appears in diagnostic lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    /// Input is not well-formed XML
    MalformedXml,
    /// Element, attribute or content does not conform to the grammar
    SchemaViolation,
    /// The resolution policy denied an external reference, or it could not
    /// be fetched
    UnresolvedEntity,
    /// No grammar is cached for a namespace validation needs
    SchemaNotFound,
    /// An allocation was refused
    OutOfMemory,
    /// Reading the input or an allowed external resource failed
    IoFailure,
    /// A configured resource limit was exceeded
    LimitExceeded,
    /// Unexpected internal failure
    Internal,
}

/// Where a diagnostic was raised
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SourceLocation {
    /// 1-based line
    pub line: usize,
    /// 1-based column, counted in characters
    pub column: usize,
    /// System identifier of the document, when known
    pub source: Option<String>,
}

impl SourceLocation {
    /// Create a location without a source identifier
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            line,
            column,
            source: None,
        }
    }

    /// Set the source identifier
    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}:{}:{}", source, self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// One recorded problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Classification
    pub kind: DiagnosticKind,
    /// Human readable message
    pub message: String,
    /// Location, if the problem can be pinned to one
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    /// Create a diagnostic
    pub fn new(
        severity: Severity,
        kind: DiagnosticKind,
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
        }
    }

    /// Message with the location appended, for logs
    pub fn detailed(&self) -> String {
        match &self.location {
            Some(loc) => format!("{} (at {})", self.message, loc),
            None => self.message.clone(),
        }
    }
}

/// `<Severity>: <message>` - the line format collaborating sinks print
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Accumulates diagnostics for a single parse
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic
    pub fn record(
        &mut self,
        severity: Severity,
        kind: DiagnosticKind,
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) {
        self.push(Diagnostic::new(severity, kind, message, location));
    }

    /// Record an already built diagnostic
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => log::warn!("{:?}: {}", diagnostic.kind, diagnostic.detailed()),
            Severity::Error | Severity::Fatal => {
                log::error!("{:?}: {}", diagnostic.kind, diagnostic.detailed())
            }
        }
        self.diagnostics.push(diagnostic);
    }

    /// Take all diagnostics in arrival order, leaving the collector empty
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Forget everything recorded so far
    pub fn reset(&mut self) {
        self.diagnostics.clear();
    }

    /// Diagnostics recorded so far
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Whether a fatal diagnostic was recorded
    pub fn has_fatal(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Fatal)
    }

    /// Number of error-level diagnostics
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Number of warnings
    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == severity).count()
    }

    /// Number of recorded diagnostics
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let diag = Diagnostic::new(
            Severity::Error,
            DiagnosticKind::SchemaViolation,
            "invalid value 'abc' for element 'id'",
            Some(SourceLocation::new(3, 5)),
        );
        assert_eq!(diag.to_string(), "Error: invalid value 'abc' for element 'id'");
        assert!(diag.detailed().ends_with("(at 3:5)"));
    }

    #[test]
    fn test_collector_keeps_arrival_order() {
        let mut collector = DiagnosticCollector::new();
        collector.record(Severity::Warning, DiagnosticKind::SchemaViolation, "first", None);
        collector.record(Severity::Fatal, DiagnosticKind::MalformedXml, "second", None);
        collector.record(Severity::Error, DiagnosticKind::UnresolvedEntity, "third", None);

        assert!(collector.has_fatal());
        assert_eq!(collector.error_count(), 1);
        assert_eq!(collector.warning_count(), 1);

        let drained = collector.drain();
        let messages: Vec<_> = drained.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["first", "second", "third"]);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_reset() {
        let mut collector = DiagnosticCollector::new();
        collector.record(Severity::Error, DiagnosticKind::Internal, "boom", None);
        collector.reset();
        assert!(collector.is_empty());
        assert!(!collector.has_fatal());
    }

    #[test]
    fn test_severity_names() {
        assert_eq!(Severity::from_str("warning").unwrap(), Severity::Warning);
        assert!(Severity::from_str("loud").is_err());
        assert_eq!(Severity::Fatal.to_string(), "Fatal");
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_location_display() {
        let loc = SourceLocation::new(2, 7).with_source(Some("doc.xml".to_string()));
        assert_eq!(loc.to_string(), "doc.xml:2:7");
    }
}
