//! Document validation
//!
//! Checks a parsed document tree against the grammars of a [`GrammarCache`]
//! and records every mismatch as a `SchemaViolation` diagnostic located at the
//! offending element.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::diagnostics::{DiagnosticCollector, DiagnosticKind, Severity, SourceLocation};
use crate::documents::{Attribute, Document, Element};
use crate::namespaces::{NamespaceScopes, QName};
use crate::XSI_NAMESPACE;

use super::builtins::{XsdValue, XSD_ID, XSD_IDREF};
use super::cache::GrammarCache;
use super::grammar::{AttributeUse, CompiledGrammar, ComplexType, ContentType, TypeDef, TypeId, ANY_TYPE};
use super::particles::{ChildMatch, ContentError, ElementId};
use super::wildcards::{ProcessContents, Wildcard};

/// Validate `document` against the grammars in `cache`
///
/// The grammar of the root element's namespace must be cached; a miss is a
/// fatal `SchemaNotFound`. Violations are recorded with `severity`.
pub fn validate_document(
    document: &Document,
    cache: &GrammarCache,
    severity: Severity,
    diagnostics: &mut DiagnosticCollector,
) {
    let mut validator = DocumentValidator {
        cache,
        severity,
        diagnostics,
        scopes: NamespaceScopes::new(),
        ids: HashSet::new(),
        idrefs: Vec::new(),
    };
    validator.check_schema_hints(&document.root);

    let root = &document.root;
    let namespace = root.namespace().unwrap_or("");
    let grammar = match cache.lookup(namespace) {
        Ok(grammar) => grammar,
        Err(_) => {
            validator.diagnostics.record(
                Severity::Fatal,
                DiagnosticKind::SchemaNotFound,
                format!(
                    "no grammar loaded for namespace '{}' of root element '{}'",
                    namespace,
                    root.raw_name()
                ),
                root.position.clone(),
            );
            return;
        }
    };

    match grammar.element(&root.qname) {
        Some(id) => validator.validate_element(&grammar, id, root),
        None => validator.violation(
            format!("no global declaration for root element '{}'", root.raw_name()),
            root.position.clone(),
        ),
    }
    validator.check_idrefs();
}

fn xsi(local: &str) -> QName {
    QName::namespaced(XSI_NAMESPACE, local)
}

/// `xsi:*` attributes and, without namespace processing, raw `xmlns` ones
fn is_instance_attribute(attribute: &Attribute) -> bool {
    match attribute.qname.namespace.as_deref() {
        Some(ns) => ns == XSI_NAMESPACE,
        None => {
            let name = &attribute.qname.local_name;
            name == "xmlns" || name.starts_with("xmlns:") || name.starts_with("xsi:")
        }
    }
}

fn same_value(a: &XsdValue, b: &XsdValue) -> bool {
    match a.compare(b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

struct DocumentValidator<'c, 'd> {
    cache: &'c GrammarCache,
    severity: Severity,
    diagnostics: &'d mut DiagnosticCollector,
    scopes: NamespaceScopes,
    ids: HashSet<String>,
    idrefs: Vec<(String, Option<SourceLocation>)>,
}

impl DocumentValidator<'_, '_> {
    fn violation(&mut self, message: String, location: Option<SourceLocation>) {
        self.diagnostics
            .record(self.severity, DiagnosticKind::SchemaViolation, message, location);
    }

    /// Schema location hints are never fetched; warn about namespaces the
    /// cache cannot serve
    fn check_schema_hints(&mut self, element: &Element) {
        if let Some(hint) = element.get_attribute_qname(&xsi("schemaLocation")) {
            let tokens: Vec<&str> = hint.split_whitespace().collect();
            for pair in tokens.chunks(2) {
                if !self.cache.contains(pair[0]) {
                    self.diagnostics.record(
                        Severity::Warning,
                        DiagnosticKind::SchemaNotFound,
                        format!(
                            "schema location hint for namespace '{}' ignored: namespace not in grammar cache",
                            pair[0]
                        ),
                        element.position.clone(),
                    );
                }
            }
        }
        if element.get_attribute_qname(&xsi("noNamespaceSchemaLocation")).is_some()
            && !self.cache.contains("")
        {
            self.diagnostics.record(
                Severity::Warning,
                DiagnosticKind::SchemaNotFound,
                "schema location hint for no namespace ignored: namespace not in grammar cache",
                element.position.clone(),
            );
        }
        for child in element.child_elements() {
            self.check_schema_hints(child);
        }
    }

    fn enter(&mut self, element: &Element) {
        self.scopes.push_frame();
        for decl in &element.namespace_decls {
            // Bad declarations were reported while parsing
            let _ = self.scopes.declare(decl.prefix.as_deref(), &decl.uri);
        }
    }

    fn leave(&mut self) {
        self.scopes.pop_frame();
    }

    fn validate_element(&mut self, grammar: &CompiledGrammar, id: ElementId, element: &Element) {
        let decl = grammar.element_decl(id);
        self.enter(element);

        if decl.is_abstract {
            self.violation(
                format!("element '{}' is abstract", element.raw_name()),
                element.position.clone(),
            );
        }

        let nil = element.get_attribute_qname(&xsi("nil")).map(str::trim);
        if matches!(nil, Some("true") | Some("1")) {
            if !decl.nillable {
                self.violation(
                    format!("element '{}' is not nillable", element.raw_name()),
                    element.position.clone(),
                );
            } else {
                if !element.child_elements().is_empty() || element.has_significant_text() {
                    self.violation(
                        format!("nilled element '{}' must be empty", element.raw_name()),
                        element.position.clone(),
                    );
                }
                if let TypeDef::Complex(ct) = grammar.type_def(decl.type_id) {
                    self.validate_attributes(grammar, ct, element);
                }
                self.leave();
                return;
            }
        }

        self.validate_type(
            grammar,
            decl.type_id,
            element,
            decl.fixed.as_deref(),
            decl.default.as_deref(),
        );
        self.leave();
    }

    fn validate_type(
        &mut self,
        grammar: &CompiledGrammar,
        type_id: TypeId,
        element: &Element,
        fixed: Option<&str>,
        default: Option<&str>,
    ) {
        let ct = match grammar.type_def(type_id) {
            TypeDef::Simple(_) => {
                for attribute in element.attributes.iter().filter(|a| !is_instance_attribute(a)) {
                    self.violation(
                        format!(
                            "attribute '{}' is not allowed on simple-typed element '{}'",
                            attribute.raw_name(),
                            element.raw_name()
                        ),
                        element.position.clone(),
                    );
                }
                self.validate_simple_content(grammar, type_id, element, fixed, default);
                return;
            }
            TypeDef::Complex(ct) => ct,
        };

        self.validate_attributes(grammar, ct, element);

        match &ct.content {
            ContentType::Empty => {
                if let Some(child) = element.child_elements().first() {
                    self.violation(
                        format!(
                            "element '{}' must be empty but contains '{}'",
                            element.raw_name(),
                            child.raw_name()
                        ),
                        child.position.clone(),
                    );
                } else if element.has_significant_text() {
                    self.violation(
                        format!("element '{}' must be empty but contains text", element.raw_name()),
                        element.position.clone(),
                    );
                }
            }
            ContentType::Simple(simple) => {
                self.validate_simple_content(grammar, *simple, element, fixed, default);
            }
            ContentType::Elements(group) => {
                if !ct.mixed && element.has_significant_text() {
                    self.violation(
                        format!(
                            "text is not allowed in element-only content of '{}'",
                            element.raw_name()
                        ),
                        element.position.clone(),
                    );
                }

                let children = element.child_elements();
                let names: Vec<QName> = children.iter().map(|c| c.qname.clone()).collect();
                match group.check_children(&names) {
                    Ok(()) => {}
                    Err(ContentError::Unexpected { index, expected }) => {
                        let child = children[index];
                        let hint = if expected.is_empty() {
                            String::new()
                        } else {
                            format!("; expected {}", expected.join(" or "))
                        };
                        self.violation(
                            format!(
                                "unexpected child element '{}' in '{}'{}",
                                child.raw_name(),
                                element.raw_name(),
                                hint
                            ),
                            child.position.clone(),
                        );
                    }
                    Err(ContentError::Incomplete { expected }) => {
                        self.violation(
                            format!(
                                "content of '{}' is incomplete; expected {}",
                                element.raw_name(),
                                expected.join(" or ")
                            ),
                            element.position.clone(),
                        );
                    }
                }

                for child in children {
                    match group.find_child(&child.qname) {
                        Some(ChildMatch::Declared(id)) => self.validate_element(grammar, id, child),
                        Some(ChildMatch::Wildcard(wildcard)) => {
                            self.validate_wildcard_element(grammar, wildcard, child)
                        }
                        None => {}
                    }
                }
            }
        }
    }

    fn validate_wildcard_element(&mut self, grammar: &CompiledGrammar, wildcard: &Wildcard, element: &Element) {
        if wildcard.process_contents == ProcessContents::Skip {
            return;
        }
        if let Some(id) = grammar.element(&element.qname) {
            self.validate_element(grammar, id, element);
            return;
        }
        if let Some(other) = self.cache.get(element.namespace().unwrap_or("")) {
            if let Some(id) = other.element(&element.qname) {
                self.validate_element(&other, id, element);
                return;
            }
        }

        if wildcard.process_contents == ProcessContents::Strict {
            self.violation(
                format!("no declaration found for element '{}'", element.raw_name()),
                element.position.clone(),
            );
        } else {
            self.enter(element);
            self.validate_type(grammar, ANY_TYPE, element, None, None);
            self.leave();
        }
    }

    fn validate_attributes(&mut self, grammar: &CompiledGrammar, ct: &ComplexType, element: &Element) {
        for attribute in element.attributes.iter().filter(|a| !is_instance_attribute(a)) {
            if let Some(decl) = ct.attributes.get(&attribute.qname) {
                self.validate_attribute(grammar, decl, attribute, element);
                continue;
            }

            let wildcard = match &ct.any_attribute {
                Some(w) if w.allows(attribute.qname.namespace_key()) => w,
                _ => {
                    self.violation(
                        format!(
                            "attribute '{}' is not allowed on element '{}'",
                            attribute.raw_name(),
                            element.raw_name()
                        ),
                        element.position.clone(),
                    );
                    continue;
                }
            };
            if wildcard.process_contents == ProcessContents::Skip {
                continue;
            }

            if let Some(decl) = grammar.attribute(&attribute.qname) {
                self.validate_attribute(grammar, decl, attribute, element);
                continue;
            }
            if let Some(other) = self.cache.get(attribute.qname.namespace_key()) {
                if let Some(decl) = other.attribute(&attribute.qname) {
                    self.validate_attribute(&other, decl, attribute, element);
                    continue;
                }
            }
            if wildcard.process_contents == ProcessContents::Strict {
                self.violation(
                    format!("no declaration found for attribute '{}'", attribute.raw_name()),
                    element.position.clone(),
                );
            }
        }

        for (name, decl) in &ct.attributes {
            if decl.required && element.get_attribute_qname(name).is_none() {
                self.violation(
                    format!(
                        "missing required attribute '{}' on element '{}'",
                        name.local_name,
                        element.raw_name()
                    ),
                    element.position.clone(),
                );
            }
        }
    }

    fn validate_attribute(
        &mut self,
        grammar: &CompiledGrammar,
        decl: &AttributeUse,
        attribute: &Attribute,
        element: &Element,
    ) {
        let subject = format!("attribute '{}' of element '{}'", attribute.raw_name(), element.raw_name());
        self.check_value(
            grammar,
            decl.type_id,
            &attribute.value,
            decl.fixed.as_deref(),
            &subject,
            element.position.clone(),
        );
    }

    fn validate_simple_content(
        &mut self,
        grammar: &CompiledGrammar,
        type_id: TypeId,
        element: &Element,
        fixed: Option<&str>,
        default: Option<&str>,
    ) {
        if let Some(child) = element.child_elements().first() {
            self.violation(
                format!(
                    "element '{}' has simple content but contains child element '{}'",
                    element.raw_name(),
                    child.raw_name()
                ),
                child.position.clone(),
            );
            return;
        }

        let mut text = element.text();
        if text.is_empty() {
            if let Some(value) = default.or(fixed) {
                text = value.to_string();
            }
        }
        let subject = format!("element '{}'", element.raw_name());
        self.check_value(grammar, type_id, &text, fixed, &subject, element.position.clone());
    }

    fn check_value(
        &mut self,
        grammar: &CompiledGrammar,
        type_id: TypeId,
        value: &str,
        fixed: Option<&str>,
        subject: &str,
        location: Option<SourceLocation>,
    ) {
        let parsed = match grammar.validate_simple(type_id, value) {
            Ok(parsed) => parsed,
            Err(reason) => {
                self.violation(
                    format!(
                        "invalid value '{}' for {} (type '{}'): {}",
                        value,
                        subject,
                        grammar.type_name(type_id),
                        reason
                    ),
                    location,
                );
                return;
            }
        };

        if let Some(fixed) = fixed {
            let matches = grammar
                .validate_simple(type_id, fixed)
                .map(|expected| same_value(&expected, &parsed))
                .unwrap_or(false);
            if !matches {
                self.violation(
                    format!("value '{}' of {} differs from fixed value '{}'", value, subject, fixed),
                    location.clone(),
                );
            }
        }

        if let XsdValue::QName(Some(prefix), _) = &parsed {
            if prefix != "xml" && self.scopes.lookup(Some(prefix)).is_none() {
                self.violation(
                    format!("unbound prefix '{}' in QName value '{}' of {}", prefix, value.trim(), subject),
                    location.clone(),
                );
            }
        }

        if let Some(builtin) = grammar.builtin_of(type_id) {
            let normalized = value.trim();
            if builtin.derives_from(XSD_ID) {
                if !self.ids.insert(normalized.to_string()) {
                    self.violation(format!("duplicate ID '{}' in {}", normalized, subject), location);
                }
            } else if builtin.derives_from(XSD_IDREF) {
                self.idrefs.push((normalized.to_string(), location));
            } else if builtin.derives_from("IDREFS") {
                for idref in normalized.split_whitespace() {
                    self.idrefs.push((idref.to_string(), location.clone()));
                }
            }
        }
    }

    fn check_idrefs(&mut self) {
        let dangling: Vec<(String, Option<SourceLocation>)> = self
            .idrefs
            .drain(..)
            .filter(|(idref, _)| !self.ids.contains(idref))
            .collect();
        for (idref, location) in dangling {
            self.violation(format!("IDREF '{}' has no matching ID", idref), location);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseOptions, ValidatingParser};

    const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    xmlns="urn:lib" targetNamespace="urn:lib" elementFormDefault="qualified">
  <xs:element name="library">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="book" maxOccurs="unbounded">
          <xs:complexType>
            <xs:sequence>
              <xs:element name="title" type="xs:string"/>
              <xs:element name="year" type="xs:gYear" minOccurs="0"/>
              <xs:element name="extra" minOccurs="0">
                <xs:complexType>
                  <xs:sequence>
                    <xs:any processContents="skip" minOccurs="0" maxOccurs="unbounded"/>
                  </xs:sequence>
                </xs:complexType>
              </xs:element>
            </xs:sequence>
            <xs:attribute name="id" type="xs:ID" use="required"/>
            <xs:attribute name="sequel" type="xs:IDREF"/>
            <xs:attribute name="lang" type="xs:language" fixed="en"/>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    fn validate(xml: &str) -> DiagnosticCollector {
        let cache = GrammarCache::new();
        cache.compile_and_store("urn:lib", SCHEMA).unwrap();
        let document = ValidatingParser::new()
            .parse_str(xml, &ParseOptions::default().with_validation(false))
            .unwrap()
            .document;
        let mut diagnostics = DiagnosticCollector::new();
        validate_document(&document, &cache, Severity::Error, &mut diagnostics);
        diagnostics
    }

    fn messages(diagnostics: &DiagnosticCollector) -> Vec<String> {
        diagnostics.diagnostics().iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn test_valid_document() {
        let diagnostics = validate(
            r#"<library xmlns="urn:lib">
  <book id="b1" lang="en"><title>Dune</title><year>1965</year></book>
  <book id="b2" sequel="b1"><title>Dune Messiah</title>
    <extra><anything xmlns="urn:free"><deep/></anything></extra>
  </book>
</library>"#,
        );
        assert!(diagnostics.is_empty(), "{:?}", messages(&diagnostics));
    }

    #[test]
    fn test_wrong_type_is_located() {
        let diagnostics = validate(
            "<library xmlns=\"urn:lib\">\n<book id=\"b1\">\n<title>T</title>\n<year>soon</year>\n</book>\n</library>",
        );
        assert_eq!(diagnostics.error_count(), 1);
        let diagnostic = &diagnostics.diagnostics()[0];
        assert_eq!(diagnostic.kind, DiagnosticKind::SchemaViolation);
        assert!(diagnostic.message.contains("soon"));
        assert_eq!(diagnostic.location.as_ref().map(|l| l.line), Some(4));
    }

    #[test]
    fn test_missing_child_and_attribute() {
        let diagnostics = validate(r#"<library xmlns="urn:lib"><book><year>1999</year></book></library>"#);
        let messages = messages(&diagnostics);
        assert!(messages.iter().any(|m| m.contains("unexpected child element 'year'")));
        assert!(messages.iter().any(|m| m.contains("missing required attribute 'id'")));
    }

    #[test]
    fn test_unexpected_attribute_and_text() {
        let diagnostics = validate(
            r#"<library xmlns="urn:lib" colour="red">loose<book id="a"><title>T</title></book></library>"#,
        );
        let messages = messages(&diagnostics);
        assert!(messages.iter().any(|m| m.contains("attribute 'colour' is not allowed")));
        assert!(messages.iter().any(|m| m.contains("text is not allowed")));
    }

    #[test]
    fn test_identity_and_fixed() {
        let diagnostics = validate(
            r#"<library xmlns="urn:lib">
  <book id="a" lang="fr"><title>T</title></book>
  <book id="a" sequel="zzz"><title>U</title></book>
</library>"#,
        );
        let messages = messages(&diagnostics);
        assert!(messages.iter().any(|m| m.contains("fixed value 'en'")));
        assert!(messages.iter().any(|m| m.contains("duplicate ID 'a'")));
        assert!(messages.iter().any(|m| m.contains("IDREF 'zzz'")));
    }

    #[test]
    fn test_unknown_root_namespace_is_fatal() {
        let diagnostics = validate(r#"<library xmlns="urn:elsewhere"/>"#);
        assert!(diagnostics.has_fatal());
        assert_eq!(diagnostics.diagnostics()[0].kind, DiagnosticKind::SchemaNotFound);
    }

    #[test]
    fn test_schema_location_hint_warning() {
        let diagnostics = validate(
            r#"<library xmlns="urn:lib" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
  xsi:schemaLocation="urn:lib lib.xsd urn:other other.xsd"><book id="x"><title>T</title></book></library>"#,
        );
        assert_eq!(diagnostics.warning_count(), 1);
        assert_eq!(diagnostics.error_count(), 0);
        assert!(diagnostics.diagnostics()[0].message.contains("urn:other"));
    }
}
