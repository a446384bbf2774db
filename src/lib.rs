//! # xmlguard
//!
//! Safe, schema-aware XML processing.
//!
//! The library parses XML into an owned document tree, optionally validating
//! it against W3C XML Schema grammars, and serializes trees back to text.
//!
//! ## Features
//!
//! - Deny-by-default resolution of external entities, DTD subsets and schema
//!   includes/imports, with local-directory, allow-list, catalog and custom
//!   policies
//! - Entity expansion limits against "billion laughs" style inputs
//! - A thread-safe cache of compiled grammars keyed by target namespace
//! - Ordered diagnostics with severity, kind and source location
//! - Serialization to UTF-8, UTF-16, ISO-8859-1 and US-ASCII
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xmlguard::{GrammarCache, ParseOptions, ValidatingParser};
//!
//! let cache = Arc::new(GrammarCache::new());
//! cache.compile_file("order.xsd")?;
//!
//! let mut parser = ValidatingParser::new().with_grammar_cache(cache);
//! let options = ParseOptions::default().with_validation(true);
//! match parser.parse_file("order.xml", &options) {
//!     Ok(parsed) => println!("root: {}", parsed.document.root().local_name()),
//!     Err(failure) => {
//!         for diagnostic in &failure.diagnostics {
//!             eprintln!("{}", diagnostic);
//!         }
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;
pub mod limits;

// Names and locations
pub mod namespaces;
pub mod names;
pub mod locations;

// Resource access
pub mod loaders;
pub mod catalog;
pub mod resolver;

// Document model and input handling
pub mod encoding;
pub mod diagnostics;
pub mod dtd;
pub mod documents;

// Schema support
pub mod validators;

// Processing
pub mod parser;
pub mod serializer;

// Re-exports for convenience
pub use diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind, Severity, SourceLocation};
pub use documents::{Attribute, Document, Element, Node};
pub use encoding::Encoding;
pub use error::{Error, Result};
pub use limits::Limits;
pub use namespaces::QName;
pub use parser::{ParseFailure, ParseOptions, ParseState, ParsedDocument, ValidatingParser};
pub use resolver::{EntityResolver, InputSource, ResolutionOutcome, ResolutionPolicy};
pub use serializer::{render, EscapePolicy, SerializeOptions, Serializer};
pub use validators::{CompiledGrammar, GrammarCache};

/// Version of the xmlguard library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// XSD namespace
pub use validators::builtins::XSD_NAMESPACE;

/// XML Schema instance namespace
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// XML namespace
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// XMLNS namespace
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";
