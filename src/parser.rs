//! Validating parser
//!
//! [`ValidatingParser`] turns input bytes into an owned [`Document`] tree.
//! While building the tree it expands entity references (asking the
//! [`ResolutionPolicy`] before anything external is read), enforces the
//! configured [`Limits`], and records every problem with a
//! [`DiagnosticCollector`]. When schema validation is requested, the finished
//! tree is checked against the grammars of a shared [`GrammarCache`].
//!
//! A parse moves through `Idle -> Parsing -> Succeeded | Failed`. Fatal
//! problems (malformed markup, I/O failures, exceeded limits, a missing root
//! grammar) abort the parse and no tree is returned. Errors and warnings are
//! collected while parsing continues; with `strict_on_errors` any error turns
//! the result into a failure.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use memchr::memchr;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind, Severity, SourceLocation};
use crate::documents::{Attribute, Document, Element, NamespaceDecl, Node};
use crate::dtd::{decode_char_ref, find_doctype, is_xml_char, parse_doctype, parse_dtd, DocTypeDecl, DtdDeclarations, DtdItem, EntityValue, ExternalId};
use crate::encoding::{normalize_newlines, Encoding};
use crate::error::{Error, Result};
use crate::limits::Limits;
use crate::loaders::Loader;
use crate::names::is_valid_name;
use crate::namespaces::{NamespaceScopes, QName};
use crate::resolver::{
    EntityReference, InputSource, ReferenceKind, ResolutionOutcome, ResolutionPolicy, ResolutionSession,
};
use crate::validators::cache::GrammarCache;
use crate::validators::document_validation::validate_document;

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    /// No parse has run yet
    #[default]
    Idle,
    /// A parse is in progress
    Parsing,
    /// The last parse returned a document
    Succeeded,
    /// The last parse failed
    Failed,
}

impl fmt::Display for ParseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseState::Idle => write!(f, "idle"),
            ParseState::Parsing => write!(f, "parsing"),
            ParseState::Succeeded => write!(f, "succeeded"),
            ParseState::Failed => write!(f, "failed"),
        }
    }
}

/// Options of a single parse
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Validate the tree against the grammar cache (off by default)
    pub validate_schema: bool,
    /// Keep entity references as [`Node::EntityReference`] nodes
    pub create_entity_reference_nodes: bool,
    /// Process `xmlns` declarations and resolve prefixes
    pub namespace_aware: bool,
    /// Fail when any error was recorded, not only on fatal problems
    pub strict_on_errors: bool,
    /// Request the external DTD subset from the resolution policy
    pub load_external_dtd: bool,
    /// Severity of entities the policy denied
    pub unresolved_entity_severity: Severity,
    /// Severity of schema violations
    pub schema_violation_severity: Severity,
    /// Input encoding, overriding detection
    pub encoding: Option<Encoding>,
    /// System identifier of the input, used for relative references
    pub system_id: Option<String>,
    /// Resource limits
    pub limits: Limits,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            validate_schema: false,
            create_entity_reference_nodes: false,
            namespace_aware: true,
            strict_on_errors: true,
            load_external_dtd: true,
            unresolved_entity_severity: Severity::Error,
            schema_violation_severity: Severity::Error,
            encoding: None,
            system_id: None,
            limits: Limits::default(),
        }
    }
}

impl ParseOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable schema validation
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_schema = validate;
        self
    }

    /// Keep entity reference nodes in the tree
    pub fn with_entity_reference_nodes(mut self, create: bool) -> Self {
        self.create_entity_reference_nodes = create;
        self
    }

    /// Enable or disable namespace processing
    pub fn with_namespaces(mut self, aware: bool) -> Self {
        self.namespace_aware = aware;
        self
    }

    /// Fail on errors, not only on fatal problems
    pub fn with_strict_on_errors(mut self, strict: bool) -> Self {
        self.strict_on_errors = strict;
        self
    }

    /// Request the external DTD subset
    pub fn with_external_dtd(mut self, load: bool) -> Self {
        self.load_external_dtd = load;
        self
    }

    /// Set the severity of denied entities
    pub fn with_unresolved_entity_severity(mut self, severity: Severity) -> Self {
        self.unresolved_entity_severity = severity;
        self
    }

    /// Set the severity of schema violations
    pub fn with_schema_violation_severity(mut self, severity: Severity) -> Self {
        self.schema_violation_severity = severity;
        self
    }

    /// Force the input encoding
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Set the system identifier of the input
    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    /// Set the resource limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

/// A successful parse
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// The document tree, owned by the caller
    pub document: Document,
    /// Non-fatal diagnostics in arrival order
    pub diagnostics: Vec<Diagnostic>,
}

/// A failed parse with everything recorded until it stopped
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse failed: {}", summary(.diagnostics))]
pub struct ParseFailure {
    /// Diagnostics in arrival order
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseFailure {
    /// Diagnostics of the given kind
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}

fn summary(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .find(|d| d.severity == Severity::Fatal)
        .or_else(|| diagnostics.iter().find(|d| d.severity == Severity::Error))
        .map(|d| d.detailed())
        .unwrap_or_else(|| "no diagnostics".to_string())
}

/// Parses documents; one instance serves one parse at a time
#[derive(Debug, Default)]
pub struct ValidatingParser {
    grammars: Arc<GrammarCache>,
    policy: ResolutionPolicy,
    state: ParseState,
    diagnostics: DiagnosticCollector,
}

impl ValidatingParser {
    /// Create a parser with an empty grammar cache and the deny-all policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a shared grammar cache
    pub fn with_grammar_cache(mut self, grammars: Arc<GrammarCache>) -> Self {
        self.grammars = grammars;
        self
    }

    /// Use an entity resolution policy
    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// State after the last operation
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// The grammar cache used for validation
    pub fn grammar_cache(&self) -> &Arc<GrammarCache> {
        &self.grammars
    }

    /// The entity resolution policy
    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Parse a byte stream
    pub fn parse(
        &mut self,
        input: impl Read,
        options: &ParseOptions,
    ) -> std::result::Result<ParsedDocument, ParseFailure> {
        self.begin();
        let loader = Loader::new().with_limits(options.limits.clone());
        match loader.read_stream(input) {
            Ok(bytes) => self.run(&bytes, options),
            Err(err) => {
                record_error(&mut self.diagnostics, &err, None);
                self.finish(None, options)
            }
        }
    }

    /// Parse in-memory bytes
    pub fn parse_bytes(
        &mut self,
        input: &[u8],
        options: &ParseOptions,
    ) -> std::result::Result<ParsedDocument, ParseFailure> {
        self.parse(input, options)
    }

    /// Parse a string
    pub fn parse_str(
        &mut self,
        input: &str,
        options: &ParseOptions,
    ) -> std::result::Result<ParsedDocument, ParseFailure> {
        let options = match options.encoding {
            Some(_) => options.clone(),
            None => options.clone().with_encoding(Encoding::Utf8),
        };
        self.parse(input.as_bytes(), &options)
    }

    /// Parse a file; its path becomes the system identifier unless one is set
    pub fn parse_file(
        &mut self,
        path: impl AsRef<Path>,
        options: &ParseOptions,
    ) -> std::result::Result<ParsedDocument, ParseFailure> {
        let path = path.as_ref();
        let mut options = options.clone();
        if options.system_id.is_none() {
            options.system_id = Some(path.display().to_string());
        }
        match File::open(path) {
            Ok(file) => self.parse(file, &options),
            Err(err) => {
                self.begin();
                let err = Error::Resource(format!("cannot open '{}': {}", path.display(), err));
                record_error(&mut self.diagnostics, &err, None);
                self.finish(None, &options)
            }
        }
    }

    fn begin(&mut self) {
        self.diagnostics.reset();
        self.state = ParseState::Parsing;
    }

    fn run(&mut self, bytes: &[u8], options: &ParseOptions) -> std::result::Result<ParsedDocument, ParseFailure> {
        let document = TreeBuilder::new(options, &self.policy, &mut self.diagnostics).build(bytes);

        if let Some(document) = &document {
            if options.validate_schema && !self.diagnostics.has_fatal() {
                validate_document(
                    document,
                    &self.grammars,
                    options.schema_violation_severity,
                    &mut self.diagnostics,
                );
            }
        }
        self.finish(document, options)
    }

    fn finish(
        &mut self,
        document: Option<Document>,
        options: &ParseOptions,
    ) -> std::result::Result<ParsedDocument, ParseFailure> {
        let failed = self.diagnostics.has_fatal()
            || (options.strict_on_errors && self.diagnostics.error_count() > 0);
        let diagnostics = self.diagnostics.drain();

        match document {
            Some(document) if !failed => {
                self.state = ParseState::Succeeded;
                Ok(ParsedDocument { document, diagnostics })
            }
            _ => {
                self.state = ParseState::Failed;
                log::debug!("parse failed with {} diagnostics", diagnostics.len());
                Err(ParseFailure { diagnostics })
            }
        }
    }
}

fn error_kind(err: &Error) -> DiagnosticKind {
    match err {
        Error::Xml(_) | Error::Namespace(_) | Error::Name(_) | Error::Decode(_) => DiagnosticKind::MalformedXml,
        Error::LimitExceeded(_) => DiagnosticKind::LimitExceeded,
        Error::OutOfMemory(_) => DiagnosticKind::OutOfMemory,
        Error::Io(_) | Error::Resource(_) | Error::Url(_) => DiagnosticKind::IoFailure,
        Error::SchemaNotFound(_) => DiagnosticKind::SchemaNotFound,
        _ => DiagnosticKind::Internal,
    }
}

fn error_message(err: &Error) -> String {
    match err {
        Error::Xml(msg) | Error::Namespace(msg) | Error::Name(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn record_error(diagnostics: &mut DiagnosticCollector, err: &Error, location: Option<SourceLocation>) {
    diagnostics.record(Severity::Fatal, error_kind(err), error_message(err), location);
}

fn malformed(message: impl Into<String>) -> Error {
    Error::Xml(message.into())
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))
}

fn predefined_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// Offset of the next event; the tokenizer may already have consumed its `<`
fn markup_start(text: &str, position: usize) -> usize {
    let bytes = text.as_bytes();
    if position > 0 && bytes.get(position) != Some(&b'<') && bytes.get(position - 1) == Some(&b'<') {
        position - 1
    } else {
        position
    }
}

/// Replace a byte range with spaces, keeping newlines and every byte offset
fn blank_out(text: &str, span: std::ops::Range<usize>) -> String {
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..span.start]);
    out.extend(text.as_bytes()[span.clone()].iter().map(|&b| if b == b'\n' { '\n' } else { ' ' }));
    out.push_str(&text[span.end..]);
    out
}

fn is_xml_whitespace(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
}

/// Decode fetched entity or DTD bytes and drop a leading text declaration
fn decode_external(content: &[u8]) -> Result<String> {
    let text = normalize_newlines(Encoding::detect(content)?.decode(content)?);
    if text.starts_with("<?xml") {
        if let Some(end) = text.find("?>") {
            return Ok(text[end + 2..].to_string());
        }
    }
    Ok(text)
}

/// Byte offset to line/column translation
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(memchr::memchr_iter(b'\n', text.as_bytes()).map(|i| i + 1));
        Self { starts }
    }

    fn locate(&self, text: &str, offset: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.starts[line];
        let column = text
            .get(start..offset.min(text.len()))
            .map(|s| s.chars().count())
            .unwrap_or(0);
        (line + 1, column + 1)
    }
}

/// Where the markup being processed comes from
enum Origin<'l> {
    /// The document itself, located against its unmasked text
    Document { lines: &'l LineIndex, source: &'l str },
    /// Replacement text of an entity referenced at the given location
    Entity(SourceLocation),
}

/// Per-parse tree construction
struct TreeBuilder<'p, 'd> {
    options: &'p ParseOptions,
    session: ResolutionSession<'p>,
    diagnostics: &'d mut DiagnosticCollector,
    entities: DtdDeclarations,
    dtd_incomplete: bool,
    scopes: NamespaceScopes,
    stack: Vec<Element>,
    depth: usize,
    entity_stack: Vec<String>,
    expansions: usize,
    expanded_size: usize,
    doctype: Option<DocTypeDecl>,
    prolog: Vec<Node>,
    epilog: Vec<Node>,
    root: Option<Element>,
    current: Option<SourceLocation>,
}

impl<'p, 'd> TreeBuilder<'p, 'd> {
    fn new(options: &'p ParseOptions, policy: &'p ResolutionPolicy, diagnostics: &'d mut DiagnosticCollector) -> Self {
        Self {
            options,
            session: ResolutionSession::new(policy, Loader::new().with_limits(options.limits.clone())),
            diagnostics,
            entities: DtdDeclarations::new(),
            dtd_incomplete: false,
            scopes: NamespaceScopes::new(),
            stack: Vec::new(),
            depth: 0,
            entity_stack: Vec::new(),
            expansions: 0,
            expanded_size: 0,
            doctype: None,
            prolog: Vec::new(),
            epilog: Vec::new(),
            root: None,
            current: None,
        }
    }

    /// Build the tree; `None` after a fatal problem was recorded
    fn build(mut self, bytes: &[u8]) -> Option<Document> {
        match self.build_document(bytes) {
            Ok(document) => Some(document),
            Err(err) => {
                let location = self.current.take();
                record_error(self.diagnostics, &err, location);
                None
            }
        }
    }

    fn build_document(&mut self, bytes: &[u8]) -> Result<Document> {
        let encoding = match self.options.encoding {
            Some(encoding) => encoding,
            None => Encoding::detect(bytes)?,
        };
        let text = normalize_newlines(encoding.decode(bytes)?);
        let lines = LineIndex::new(&text);

        if let Some((offset, c)) = text.char_indices().find(|(_, c)| !is_xml_char(*c)) {
            self.current = Some(self.locate(&lines, &text, offset));
            return Err(malformed(format!("illegal character U+{:04X}", c as u32)));
        }

        // The tokenizer ends a DOCTYPE at the first balanced `>`, which breaks on
        // literals and comments of the internal subset. The declaration is read
        // here and blanked out before tokenizing.
        let masked = match find_doctype(&text)? {
            Some(span) => {
                let location = self.locate(&lines, &text, span.start);
                self.current = Some(location.clone());
                let content = &text[span.start + "<!DOCTYPE".len()..span.end - 1];
                self.read_doctype(content, &location)?;
                Some(blank_out(&text, span))
            }
            None => None,
        };
        let origin = Origin::Document { lines: &lines, source: &text };
        self.process(masked.as_deref().unwrap_or(&text), origin)?;

        let root = self
            .root
            .take()
            .ok_or_else(|| malformed("document has no root element"))?;
        Ok(Document {
            root,
            prolog: std::mem::take(&mut self.prolog),
            epilog: std::mem::take(&mut self.epilog),
            doctype: self.doctype.take(),
            system_id: self.options.system_id.clone(),
        })
    }

    fn locate(&self, lines: &LineIndex, text: &str, offset: usize) -> SourceLocation {
        let (line, column) = lines.locate(text, offset);
        SourceLocation::new(line, column).with_source(self.options.system_id.clone())
    }

    /// Run the tokenizer over document text or entity replacement text
    fn process(&mut self, text: &str, origin: Origin<'_>) -> Result<()> {
        let mut reader = Reader::from_str(text);
        reader
            .trim_text(false)
            .expand_empty_elements(false)
            .check_end_names(true)
            .check_comments(true);

        let base = self.stack.len();
        loop {
            let offset = markup_start(text, reader.buffer_position());
            let location = match &origin {
                Origin::Document { lines, source } => self.locate(lines, source, offset),
                Origin::Entity(location) => location.clone(),
            };
            self.current = Some(location.clone());

            match reader.read_event()? {
                Event::Decl(_) => {
                    if !matches!(origin, Origin::Document { .. }) || offset != 0 {
                        return Err(malformed("XML declaration is only allowed at the start of the document"));
                    }
                }
                // a well placed declaration was read and blanked out already
                Event::DocType(_) => {
                    if self.doctype.is_some() && self.root.is_none() && self.stack.is_empty() {
                        return Err(malformed("more than one DOCTYPE declaration"));
                    }
                    return Err(malformed("DOCTYPE is only allowed before the root element"));
                }
                Event::Start(start) => self.start_element(&start, location, false)?,
                Event::Empty(start) => self.start_element(&start, location, true)?,
                Event::End(_) => {
                    if self.stack.len() <= base {
                        return Err(malformed("end tag does not match a start tag in the same entity"));
                    }
                    self.end_element()?;
                }
                Event::Text(content) => self.text(utf8(&content)?, &location)?,
                Event::CData(content) => {
                    if self.stack.is_empty() {
                        return Err(malformed("CDATA section outside the root element"));
                    }
                    let content = utf8(&content)?.to_string();
                    self.append_text(&content);
                }
                Event::Comment(content) => {
                    let content = utf8(&content)?.to_string();
                    self.append_node(Node::Comment(content));
                }
                Event::PI(content) => {
                    let content = utf8(&content)?;
                    let (target, data) = match content.find(|c: char| c.is_ascii_whitespace()) {
                        Some(i) => (&content[..i], content[i..].trim_start()),
                        None => (content, ""),
                    };
                    if target.eq_ignore_ascii_case("xml") || !is_valid_name(target) {
                        return Err(malformed(format!("invalid processing instruction target '{}'", target)));
                    }
                    self.append_node(Node::ProcessingInstruction {
                        target: target.to_string(),
                        data: data.to_string(),
                    });
                }
                Event::Eof => break,
            }
        }

        if self.stack.len() > base {
            let open = self.stack.last().map(|e| e.raw_name()).unwrap_or_default();
            return Err(malformed(format!("element '{}' is not closed", open)));
        }
        Ok(())
    }

    fn read_doctype(&mut self, content: &str, location: &SourceLocation) -> Result<()> {
        let decl = parse_doctype(content)?;
        if let Some(subset) = &decl.internal_subset {
            self.read_dtd(subset, location)?;
        }

        if let Some(id) = &decl.external_id {
            if !self.options.load_external_dtd {
                self.dtd_incomplete = true;
                self.diagnostics.record(
                    Severity::Warning,
                    DiagnosticKind::UnresolvedEntity,
                    format!("external DTD subset '{}' was not loaded", id.system_id),
                    Some(location.clone()),
                );
            } else {
                match self.fetch(id, ReferenceKind::ExternalSubset, "external DTD subset", location)? {
                    Some(text) => self.read_dtd(&text, location)?,
                    None => self.dtd_incomplete = true,
                }
            }
        }

        log::debug!(
            "DOCTYPE '{}' declares {} general entities",
            decl.name,
            self.entities.general_count()
        );
        self.doctype = Some(decl);
        Ok(())
    }

    /// Fetch an external resource through the policy; `None` when denied
    fn fetch(
        &mut self,
        id: &ExternalId,
        kind: ReferenceKind,
        what: &str,
        location: &SourceLocation,
    ) -> Result<Option<String>> {
        let reference = EntityReference::new(id.system_id.clone(), kind)
            .with_public_id(id.public_id.clone())
            .with_context(self.options.system_id.clone());

        match self.session.resolve(&reference)? {
            ResolutionOutcome::Resolved(InputSource::Bytes { content, .. }) => {
                Ok(Some(decode_external(&content)?))
            }
            ResolutionOutcome::Resolved(InputSource::Location(location)) => Err(Error::Resource(format!(
                "{} '{}' was resolved but not loaded",
                what, location
            ))),
            ResolutionOutcome::Denied { reason } => {
                self.diagnostics.record(
                    self.options.unresolved_entity_severity,
                    DiagnosticKind::UnresolvedEntity,
                    format!("{} '{}' was not resolved: {}", what, id.system_id, reason),
                    Some(location.clone()),
                );
                Ok(None)
            }
        }
    }

    fn read_dtd(&mut self, text: &str, location: &SourceLocation) -> Result<()> {
        for item in parse_dtd(text)? {
            match item {
                DtdItem::Entity { decl, parameter } => {
                    if !self.entities.add(decl, parameter) {
                        log::debug!("ignoring redeclared entity");
                    }
                }
                DtdItem::PeReference(name) => {
                    let decl = match self.entities.parameter(&name) {
                        Some(decl) => decl.clone(),
                        None if self.dtd_incomplete => {
                            self.unresolved(format!("parameter entity '%{};' is not declared", name), location);
                            continue;
                        }
                        None => return Err(malformed(format!("undeclared parameter entity '%{};'", name))),
                    };
                    let key = format!("%{}", name);
                    let text = match decl.value {
                        EntityValue::Internal(text) => text,
                        EntityValue::External(id) => {
                            match self.fetch(&id, ReferenceKind::ParameterEntity, "parameter entity", location)? {
                                Some(text) => text,
                                None => {
                                    self.dtd_incomplete = true;
                                    continue;
                                }
                            }
                        }
                        EntityValue::Unparsed { .. } => {
                            return Err(malformed(format!("parameter entity '%{};' is unparsed", name)))
                        }
                    };
                    self.enter_entity(&key, &text)?;
                    let result = self.read_dtd(&text, location);
                    self.entity_stack.pop();
                    result?;
                }
            }
        }
        Ok(())
    }

    fn unresolved(&mut self, message: String, location: &SourceLocation) {
        self.diagnostics.record(
            self.options.unresolved_entity_severity,
            DiagnosticKind::UnresolvedEntity,
            message,
            Some(location.clone()),
        );
    }

    /// Account for one expansion; pushes `name` on the entity stack
    fn enter_entity(&mut self, name: &str, replacement: &str) -> Result<()> {
        if self.entity_stack.iter().any(|n| n == name) {
            return Err(malformed(format!("entity '{}' references itself", name.trim_start_matches('%'))));
        }
        let limits = &self.options.limits;
        self.expansions += 1;
        limits.check_entity_expansions(self.expansions)?;
        self.expanded_size += replacement.len();
        limits.check_entity_expansion_size(self.expanded_size)?;
        limits.check_entity_depth(self.entity_stack.len() + 1)?;
        self.entity_stack.push(name.to_string());
        Ok(())
    }

    fn start_element(&mut self, start: &BytesStart<'_>, location: SourceLocation, empty: bool) -> Result<()> {
        if self.stack.is_empty() && self.root.is_some() {
            return Err(malformed("content after the root element"));
        }
        self.depth += 1;
        self.options.limits.check_xml_depth(self.depth)?;

        let raw_name = utf8(start.name().as_ref())?.to_string();
        if !is_valid_name(&raw_name) {
            return Err(malformed(format!("invalid element name '{}'", raw_name)));
        }

        let mut raw_attributes = Vec::new();
        let mut attributes = start.attributes();
        attributes.with_checks(true);
        for attribute in attributes {
            let attribute = attribute.map_err(|e| malformed(e.to_string()))?;
            let name = utf8(attribute.key.as_ref())?.to_string();
            if !is_valid_name(&name) {
                return Err(malformed(format!("invalid attribute name '{}'", name)));
            }
            let mut value = String::new();
            self.expand_attribute(utf8(&attribute.value)?, &mut value)?;
            raw_attributes.push((name, value));
        }
        self.options.limits.check_attributes(raw_attributes.len())?;

        self.scopes.push_frame();
        let element = if self.options.namespace_aware {
            self.namespaced_element(&raw_name, raw_attributes)?
        } else {
            let mut element = Element::new(QName::local(raw_name));
            element.attributes = raw_attributes
                .into_iter()
                .map(|(name, value)| Attribute::new(QName::local(name), value))
                .collect();
            element
        };

        self.stack.push(Element {
            position: Some(location),
            ..element
        });
        if empty {
            self.end_element()?;
        }
        Ok(())
    }

    fn namespaced_element(&mut self, raw_name: &str, raw_attributes: Vec<(String, String)>) -> Result<Element> {
        let mut decls = Vec::new();
        let mut plain = Vec::new();
        for (name, value) in raw_attributes {
            let prefix = if name == "xmlns" {
                None
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                Some(prefix.to_string())
            } else {
                plain.push((name, value));
                continue;
            };
            self.scopes.declare(prefix.as_deref(), &value)?;
            decls.push(NamespaceDecl { prefix, uri: value });
        }

        let (prefix, qname) = self.scopes.resolve_element(raw_name)?;
        let mut element = Element::new(qname);
        element.prefix = prefix;
        element.namespace_decls = decls;

        for (name, value) in plain {
            let (prefix, qname) = self.scopes.resolve_attribute(&name)?;
            if element.attributes.iter().any(|a| a.qname == qname) {
                return Err(malformed(format!("attribute '{}' is bound twice on '{}'", qname, raw_name)));
            }
            element.attributes.push(Attribute { qname, prefix, value });
        }
        Ok(element)
    }

    fn end_element(&mut self) -> Result<()> {
        self.scopes.pop_frame();
        self.depth = self.depth.saturating_sub(1);
        let element = self
            .stack
            .pop()
            .ok_or_else(|| malformed("end tag without start tag"))?;
        match self.stack.last_mut() {
            Some(parent) => parent.add_child(element),
            None => self.root = Some(element),
        }
        Ok(())
    }

    fn append_text(&mut self, text: &str) {
        if let Some(element) = self.stack.last_mut() {
            element.push_text(text);
        }
    }

    fn append_node(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(element) => match node {
                Node::Text(text) => element.push_text(&text),
                other => element.children.push(other),
            },
            None if self.root.is_none() => self.prolog.push(node),
            None => self.epilog.push(node),
        }
    }

    fn text(&mut self, raw: &str, location: &SourceLocation) -> Result<()> {
        if self.stack.is_empty() {
            if is_xml_whitespace(raw) {
                return Ok(());
            }
            return Err(malformed("text outside the root element"));
        }

        let bytes = raw.as_bytes();
        let mut start = 0;
        while let Some(i) = memchr(b'&', &bytes[start..]) {
            let amp = start + i;
            self.append_text(&raw[start..amp]);
            let end = memchr(b';', &bytes[amp..])
                .map(|j| amp + j)
                .ok_or_else(|| malformed("unterminated entity reference"))?;
            self.reference(&raw[amp + 1..end], location)?;
            start = end + 1;
        }
        self.append_text(&raw[start..]);
        Ok(())
    }

    fn reference(&mut self, name: &str, location: &SourceLocation) -> Result<()> {
        if let Some(body) = name.strip_prefix('#') {
            let c = decode_char_ref(body)?;
            self.append_text(c.encode_utf8(&mut [0; 4]));
            return Ok(());
        }
        if let Some(c) = predefined_entity(name) {
            self.append_text(c.encode_utf8(&mut [0; 4]));
            return Ok(());
        }
        if !is_valid_name(name) {
            return Err(malformed(format!("invalid entity reference '&{};'", name)));
        }

        let decl = match self.entities.general(name) {
            Some(decl) => decl.clone(),
            None if self.dtd_incomplete => {
                self.unresolved(
                    format!("entity '{}' is not declared in the DTD declarations that were read", name),
                    location,
                );
                self.placeholder(name);
                return Ok(());
            }
            None => return Err(malformed(format!("undeclared entity '{}'", name))),
        };

        let replacement = match decl.value {
            EntityValue::Internal(text) => text,
            EntityValue::External(id) => {
                match self.fetch(&id, ReferenceKind::GeneralEntity, "external entity", location)? {
                    Some(text) => text,
                    None => {
                        self.placeholder(name);
                        return Ok(());
                    }
                }
            }
            EntityValue::Unparsed { .. } => {
                return Err(malformed(format!("reference to unparsed entity '{}'", name)))
            }
        };

        self.enter_entity(name, &replacement)?;
        self.stack.push(Element::new(QName::local(name)));
        let result = self.process(&replacement, Origin::Entity(location.clone()));
        self.entity_stack.pop();
        let container = self
            .stack
            .pop()
            .ok_or_else(|| Error::Other("entity container missing".to_string()))?;
        result?;

        if self.options.create_entity_reference_nodes {
            self.append_node(Node::EntityReference {
                name: name.to_string(),
                children: container.children,
            });
        } else {
            for child in container.children {
                self.append_node(child);
            }
        }
        Ok(())
    }

    fn placeholder(&mut self, name: &str) {
        if self.options.create_entity_reference_nodes {
            self.append_node(Node::EntityReference {
                name: name.to_string(),
                children: Vec::new(),
            });
        }
    }

    /// Expand references in an attribute value and normalize white space
    fn expand_attribute(&mut self, raw: &str, out: &mut String) -> Result<()> {
        let mut rest = raw;
        while let Some(c) = rest.chars().next() {
            match c {
                '&' => {
                    let end = rest
                        .find(';')
                        .ok_or_else(|| malformed("unterminated entity reference in attribute value"))?;
                    let name = &rest[1..end];
                    rest = &rest[end + 1..];

                    if let Some(body) = name.strip_prefix('#') {
                        out.push(decode_char_ref(body)?);
                    } else if let Some(c) = predefined_entity(name) {
                        out.push(c);
                    } else {
                        let replacement = match self.entities.general(name).map(|d| &d.value) {
                            Some(EntityValue::Internal(text)) => text.clone(),
                            Some(_) => {
                                return Err(malformed(format!(
                                    "attribute value references external entity '{}'",
                                    name
                                )))
                            }
                            None => return Err(malformed(format!("undeclared entity '{}'", name))),
                        };
                        self.enter_entity(name, &replacement)?;
                        let result = self.expand_attribute(&replacement, out);
                        self.entity_stack.pop();
                        result?;
                    }
                    continue;
                }
                '<' => return Err(malformed("'<' is not allowed in attribute values")),
                '\t' | '\n' | '\r' => out.push(' '),
                other => out.push(other),
            }
            rest = &rest[c.len_utf8()..];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::EntityResolver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options() -> ParseOptions {
        ParseOptions::default().with_validation(false)
    }

    fn parse(xml: &str) -> std::result::Result<ParsedDocument, ParseFailure> {
        ValidatingParser::new().parse_str(xml, &options())
    }

    #[test]
    fn test_simple_document() {
        let parsed = parse("<a><b>1</b></a>").unwrap();
        let root = parsed.document.root();
        assert_eq!(root.local_name(), "a");
        let children = root.child_elements();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].local_name(), "b");
        assert_eq!(children[0].text(), "1");
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let mut parser = ValidatingParser::new();
        assert_eq!(parser.state(), ParseState::Idle);
        parser.parse_str("<a/>", &options()).unwrap();
        assert_eq!(parser.state(), ParseState::Succeeded);
        assert!(parser.parse_str("<a>", &options()).is_err());
        assert_eq!(parser.state(), ParseState::Failed);
        parser.parse_str("<b/>", &options()).unwrap();
        assert_eq!(parser.state(), ParseState::Succeeded);
    }

    #[test]
    fn test_malformed_inputs_are_fatal() {
        for xml in [
            "",
            "<a>",
            "<a></b>",
            "<a/><b/>",
            "text<a/>",
            "<a x='1' x='2'/>",
            "<a>&undeclared;</a>",
            "<a>\u{1}</a>",
            "<a b='<'/>",
            "<a><?xml version='1.0'?></a>",
        ] {
            let failure = parse(xml).unwrap_err();
            assert!(
                failure.diagnostics.iter().any(|d| d.severity == Severity::Fatal),
                "expected fatal for {:?}",
                xml
            );
        }
    }

    #[test]
    fn test_error_location() {
        let failure = parse("<a>\n  <b>\n</a>").unwrap_err();
        let diagnostic = &failure.diagnostics[0];
        assert_eq!(diagnostic.kind, DiagnosticKind::MalformedXml);
        assert!(diagnostic.location.is_some());
    }

    #[test]
    fn test_element_positions() {
        let parsed = parse("<a>\n  <b/>\n</a>").unwrap();
        let b = parsed.document.root().child_elements()[0].clone();
        assert_eq!(b.position, Some(SourceLocation::new(2, 3)));
    }

    #[test]
    fn test_internal_entities() {
        let xml = r#"<!DOCTYPE a [
  <!ENTITY who "world">
  <!ENTITY greeting "hello &who;">
  <!ENTITY item "<i>&who;</i>">
]>
<a title="&greeting;">&greeting; &#x21;&item;&lt;</a>"#;
        let parsed = parse(xml).unwrap();
        let root = parsed.document.root();
        assert_eq!(root.get_attribute("title"), Some("hello world"));
        assert_eq!(root.text(), "hello world !<");
        assert_eq!(root.child_elements()[0].text(), "world");
        assert_eq!(parsed.document.doctype.as_ref().map(|d| d.name.as_str()), Some("a"));
    }

    #[test]
    fn test_doctype_subset_with_gt_in_literal_and_comment() {
        let parsed = parse(r#"<!DOCTYPE a [<!ENTITY cmp "x > y">]><a>&cmp;</a>"#).unwrap();
        assert_eq!(parsed.document.root().text(), "x > y");

        let parsed = parse(r#"<!DOCTYPE a [<!-- x > y --><!ENTITY e "v">]><a>&e;</a>"#).unwrap();
        assert_eq!(parsed.document.root().text(), "v");
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_positions_after_multiline_doctype() {
        let xml = "<!DOCTYPE a [\n  <!ENTITY e \"caf\u{e9} > tea\">\n]>\n<a>\n  <b/>&e;</a>";
        let parsed = parse(xml).unwrap();
        let root = parsed.document.root();
        assert_eq!(root.position, Some(SourceLocation::new(4, 1)));
        assert_eq!(root.child_elements()[0].position, Some(SourceLocation::new(5, 3)));
        assert_eq!(root.text(), "\n  caf\u{e9} > tea");
    }

    #[test]
    fn test_misplaced_doctype() {
        let failure = parse("<!DOCTYPE a><!DOCTYPE a><a/>").unwrap_err();
        assert!(failure.to_string().contains("more than one DOCTYPE"));
        let failure = parse("<a><!DOCTYPE a></a>").unwrap_err();
        assert_eq!(failure.diagnostics[0].kind, DiagnosticKind::MalformedXml);
    }

    #[test]
    fn test_entity_reference_nodes() {
        let xml = r#"<!DOCTYPE a [<!ENTITY e "text">]><a>&e;</a>"#;
        let parsed = ValidatingParser::new()
            .parse_str(xml, &options().with_entity_reference_nodes(true))
            .unwrap();
        match &parsed.document.root().children[0] {
            Node::EntityReference { name, children } => {
                assert_eq!(name, "e");
                assert_eq!(children, &vec![Node::Text("text".to_string())]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_recursive_entity_is_fatal() {
        let xml = r#"<!DOCTYPE a [<!ENTITY x "&y;"><!ENTITY y "&x;">]><a>&x;</a>"#;
        let failure = parse(xml).unwrap_err();
        assert!(failure.diagnostics[0].message.contains("references itself"));
    }

    #[test]
    fn test_entity_expansion_limit() {
        let xml = r#"<!DOCTYPE lolz [
  <!ENTITY lol "lol">
  <!ENTITY lol1 "&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;">
  <!ENTITY lol2 "&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;">
  <!ENTITY lol3 "&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;">
  <!ENTITY lol4 "&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;">
  <!ENTITY lol5 "&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;">
]>
<lolz>&lol5;</lolz>"#;
        let failure = ValidatingParser::new()
            .parse_str(xml, &options().with_limits(Limits::strict()))
            .unwrap_err();
        assert_eq!(failure.diagnostics[0].kind, DiagnosticKind::LimitExceeded);
    }

    #[test]
    fn test_external_entity_denied_by_default() {
        let xml = r#"<!DOCTYPE a [<!ENTITY x SYSTEM "http://example.invalid/secret">]><a>&x;</a>"#;
        let failure = parse(xml).unwrap_err();
        let unresolved: Vec<_> = failure.of_kind(DiagnosticKind::UnresolvedEntity).collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].severity, Severity::Error);

        let lenient = ValidatingParser::new()
            .parse_str(xml, &options().with_strict_on_errors(false))
            .unwrap();
        assert_eq!(lenient.document.root().text(), "");
        assert_eq!(lenient.diagnostics.len(), 1);
    }

    #[test]
    fn test_denied_entity_severity_fatal() {
        let xml = r#"<!DOCTYPE a [<!ENTITY x SYSTEM "x.txt">]><a>&x;</a>"#;
        let failure = ValidatingParser::new()
            .parse_str(
                xml,
                &options()
                    .with_strict_on_errors(false)
                    .with_unresolved_entity_severity(Severity::Fatal),
            )
            .unwrap_err();
        assert_eq!(failure.diagnostics[0].severity, Severity::Fatal);
    }

    struct Counting(AtomicUsize);

    impl EntityResolver for Counting {
        fn resolve_entity(&self, _public_id: Option<&str>, system_id: &str) -> ResolutionOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            ResolutionOutcome::Resolved(InputSource::Bytes {
                system_id: system_id.to_string(),
                content: b"<i>fetched</i>".to_vec(),
            })
        }
    }

    #[test]
    fn test_custom_resolver_called_once_per_entity() {
        let resolver = Arc::new(Counting(AtomicUsize::new(0)));
        let policy = ResolutionPolicy::Custom(resolver.clone());
        let xml = r#"<!DOCTYPE a [<!ENTITY x SYSTEM "urn:x">]><a>&x;&x;</a>"#;
        let parsed = ValidatingParser::new()
            .with_policy(policy)
            .parse_str(xml, &options())
            .unwrap();
        assert_eq!(parsed.document.root().child_elements().len(), 2);
        assert_eq!(resolver.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_external_entity_allow_local() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("chapter.xml"), "<?xml version=\"1.0\"?><p>chapter</p>").unwrap();
        let doc_path = dir.path().join("book.xml");
        std::fs::write(
            &doc_path,
            r#"<!DOCTYPE book [<!ENTITY ch SYSTEM "chapter.xml">]><book>&ch;</book>"#,
        )
        .unwrap();

        let parsed = ValidatingParser::new()
            .with_policy(ResolutionPolicy::allow_local(dir.path()))
            .parse_file(&doc_path, &options())
            .unwrap();
        assert_eq!(parsed.document.root().child_elements()[0].text(), "chapter");
    }

    #[test]
    fn test_external_subset() {
        let xml = r#"<!DOCTYPE a SYSTEM "a.dtd"><a>&declared_outside;</a>"#;
        let failure = parse(xml).unwrap_err();
        assert!(failure
            .diagnostics
            .iter()
            .all(|d| d.kind == DiagnosticKind::UnresolvedEntity));

        let parsed = ValidatingParser::new()
            .parse_str(
                "<!DOCTYPE a SYSTEM \"a.dtd\"><a/>",
                &options().with_external_dtd(false),
            )
            .unwrap();
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn test_namespaces() {
        let xml = r#"<r:root xmlns:r="urn:r" xmlns="urn:d" r:id="1" plain="2"><child/></r:root>"#;
        let parsed = parse(xml).unwrap();
        let root = parsed.document.root();
        assert_eq!(root.qname, QName::namespaced("urn:r", "root"));
        assert_eq!(root.prefix.as_deref(), Some("r"));
        assert_eq!(root.namespace_decls.len(), 2);
        assert_eq!(root.get_attribute_qname(&QName::namespaced("urn:r", "id")), Some("1"));
        assert_eq!(root.get_attribute_qname(&QName::local("plain")), Some("2"));
        assert_eq!(root.child_elements()[0].qname, QName::namespaced("urn:d", "child"));

        assert!(parse("<p:a/>").is_err());
        assert!(parse(r#"<a xmlns:p="urn:p" xmlns:q="urn:p" p:x="1" q:x="2"/>"#).is_err());
    }

    #[test]
    fn test_without_namespaces() {
        let parsed = ValidatingParser::new()
            .parse_str("<p:a xmlns:p=\"urn:p\"/>", &options().with_namespaces(false))
            .unwrap();
        let root = parsed.document.root();
        assert_eq!(root.qname, QName::local("p:a"));
        assert_eq!(root.get_attribute("xmlns:p"), Some("urn:p"));
    }

    #[test]
    fn test_attribute_normalization() {
        let parsed = parse("<a v=\"x\ty\nz&#10;\"/>").unwrap();
        assert_eq!(parsed.document.root().get_attribute("v"), Some("x y z\n"));
    }

    #[test]
    fn test_prolog_and_epilog() {
        let parsed = parse("<?xml version=\"1.0\"?>\n<!--head--><?pi data?>\n<a/>\n<!--tail-->").unwrap();
        assert_eq!(parsed.document.prolog.len(), 2);
        assert_eq!(parsed.document.epilog, vec![Node::Comment("tail".to_string())]);
    }

    #[test]
    fn test_encoding_detection() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "<a>\u{e9}</a>".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let parsed = ValidatingParser::new().parse_bytes(&bytes, &options()).unwrap();
        assert_eq!(parsed.document.root().text(), "\u{e9}");

        let latin1 = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>\xE9</a>";
        let parsed = ValidatingParser::new().parse_bytes(latin1, &options()).unwrap();
        assert_eq!(parsed.document.root().text(), "\u{e9}");
    }

    #[test]
    fn test_unsupported_encoding_is_malformed() {
        let xml = b"<?xml version=\"1.0\" encoding=\"KOI8-R\"?><a/>";
        let failure = ValidatingParser::new().parse_bytes(xml, &options()).unwrap_err();
        assert_eq!(failure.diagnostics[0].kind, DiagnosticKind::MalformedXml);
        assert_eq!(failure.diagnostics[0].severity, Severity::Fatal);
        assert!(failure.to_string().contains("KOI8-R"));
    }

    #[test]
    fn test_default_options_skip_validation() {
        assert!(!ParseOptions::default().validate_schema);
        let mut parser = ValidatingParser::new();
        let parsed = parser.parse_str("<a><b>1</b></a>", &ParseOptions::default()).unwrap();
        assert_eq!(parser.state(), ParseState::Succeeded);
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let limits = Limits {
            max_xml_depth: 3,
            ..Limits::default()
        };
        let failure = ValidatingParser::new()
            .parse_str("<a><b><c><d/></c></b></a>", &options().with_limits(limits))
            .unwrap_err();
        assert_eq!(failure.diagnostics[0].kind, DiagnosticKind::LimitExceeded);
    }

    #[test]
    fn test_missing_file_is_io_failure() {
        let failure = ValidatingParser::new()
            .parse_file("/nonexistent/input.xml", &options())
            .unwrap_err();
        assert_eq!(failure.diagnostics[0].kind, DiagnosticKind::IoFailure);
        assert!(failure.to_string().contains("input.xml"));
    }
}
