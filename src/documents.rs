//! Document tree
//!
//! The owned tree a successful parse hands to the caller, and the structural
//! equivalence check the serializer's round trip is measured against.

use std::collections::BTreeMap;

use crate::diagnostics::SourceLocation;
use crate::dtd::DocTypeDecl;
use crate::error::{Error, Result};
use crate::namespaces::QName;
use crate::parser::{ParseOptions, ValidatingParser};

/// Namespace declaration (`xmlns` or `xmlns:prefix`) on a start tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    /// Declared prefix (None for the default namespace)
    pub prefix: Option<String>,
    /// Namespace URI ("" undeclares the default namespace)
    pub uri: String,
}

/// An attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Expanded name
    pub qname: QName,
    /// Prefix as written
    pub prefix: Option<String>,
    /// Normalized value with references expanded
    pub value: String,
}

impl Attribute {
    /// Create an unprefixed attribute
    pub fn new(qname: QName, value: impl Into<String>) -> Self {
        Self {
            qname,
            prefix: None,
            value: value.into(),
        }
    }

    /// Name as written in markup
    pub fn raw_name(&self) -> String {
        raw_name(self.prefix.as_deref(), &self.qname.local_name)
    }
}

/// A node in the document tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Element
    Element(Element),
    /// Character data (CDATA sections are merged in)
    Text(String),
    /// Comment
    Comment(String),
    /// Processing instruction
    ProcessingInstruction {
        /// Target name
        target: String,
        /// Instruction data
        data: String,
    },
    /// Entity reference kept as a node; holds the expansion, empty when the
    /// reference was not resolved
    EntityReference {
        /// Entity name
        name: String,
        /// Expanded content
        children: Vec<Node>,
    },
}

impl Node {
    /// Get the element, if this node is one
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }
}

/// XML Element in the document tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Element qualified name
    pub qname: QName,
    /// Prefix as written
    pub prefix: Option<String>,
    /// Attributes in document order
    pub attributes: Vec<Attribute>,
    /// Namespace declarations made on this element
    pub namespace_decls: Vec<NamespaceDecl>,
    /// Child nodes in document order
    pub children: Vec<Node>,
    /// Position of the start tag
    pub position: Option<SourceLocation>,
}

impl Element {
    /// Create a new element
    pub fn new(qname: QName) -> Self {
        Self {
            qname,
            prefix: None,
            attributes: Vec::new(),
            namespace_decls: Vec::new(),
            children: Vec::new(),
            position: None,
        }
    }

    /// Get the local name of the element
    pub fn local_name(&self) -> &str {
        &self.qname.local_name
    }

    /// Get the namespace of the element
    pub fn namespace(&self) -> Option<&str> {
        self.qname.namespace.as_deref()
    }

    /// Name as written in markup
    pub fn raw_name(&self) -> String {
        raw_name(self.prefix.as_deref(), &self.qname.local_name)
    }

    /// Get an attribute value by local name
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.qname.local_name == name)
            .map(|a| a.value.as_str())
    }

    /// Get an attribute value by qualified name
    pub fn get_attribute_qname(&self, qname: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| &a.qname == qname)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, replacing an existing one with the same name
    pub fn set_attribute(&mut self, qname: QName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.qname == qname) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute::new(qname, value)),
        }
    }

    /// Add a child element
    pub fn add_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Append text, merging with a preceding text node
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.children.last_mut() {
            Some(Node::Text(existing)) => existing.push_str(text),
            _ => self.children.push(Node::Text(text.to_string())),
        }
    }

    /// Child elements in document order, looking through entity references
    pub fn child_elements(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_elements(&self.children, &mut out);
        out
    }

    /// Find child elements by local name
    pub fn find_children(&self, local_name: &str) -> Vec<&Element> {
        self.child_elements()
            .into_iter()
            .filter(|e| e.local_name() == local_name)
            .collect()
    }

    /// Concatenated character data of the direct children
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Whether any direct child is non-whitespace text
    pub fn has_significant_text(&self) -> bool {
        !self.text().trim().is_empty()
    }
}

fn raw_name(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) => format!("{}:{}", p, local),
        None => local.to_string(),
    }
}

fn collect_elements<'a>(nodes: &'a [Node], out: &mut Vec<&'a Element>) {
    for node in nodes {
        match node {
            Node::Element(e) => out.push(e),
            Node::EntityReference { children, .. } => collect_elements(children, out),
            _ => {}
        }
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::EntityReference { children, .. } => collect_text(children, out),
            _ => {}
        }
    }
}

/// XML Document representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Root element of the document
    pub root: Element,
    /// Comments and processing instructions before the root
    pub prolog: Vec<Node>,
    /// Comments and processing instructions after the root
    pub epilog: Vec<Node>,
    /// DOCTYPE summary, if the document had one
    pub doctype: Option<DocTypeDecl>,
    /// System identifier of the source, if known
    pub system_id: Option<String>,
}

impl Document {
    /// Create a document around a root element
    pub fn new(root: Element) -> Self {
        Self {
            root,
            prolog: Vec::new(),
            epilog: Vec::new(),
            doctype: None,
            system_id: None,
        }
    }

    /// Parse a well-formed document without validation or external access
    pub fn from_string(xml: &str) -> Result<Self> {
        let options = ParseOptions::default().with_validation(false);
        let mut parser = ValidatingParser::new();
        parser
            .parse_str(xml, &options)
            .map(|parsed| parsed.document)
            .map_err(|failure| Error::Xml(failure.to_string()))
    }

    /// Get the root element
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Get the root element mutably
    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    /// Structural equivalence
    ///
    /// Compares element names and namespaces, attribute sets regardless of
    /// order, and text content. Comments, processing instructions, namespace
    /// declarations and prefixes are ignored, entity references are looked
    /// through, adjacent text is merged and whitespace-only text is dropped.
    pub fn is_equivalent(&self, other: &Document) -> bool {
        elements_equivalent(&self.root, &other.root)
    }
}

#[derive(Debug, PartialEq)]
enum Item<'a> {
    Element(&'a Element),
    Text(String),
}

fn significant_items(nodes: &[Node]) -> Vec<Item<'_>> {
    fn walk<'a>(nodes: &'a [Node], pending: &mut String, out: &mut Vec<Item<'a>>) {
        for node in nodes {
            match node {
                Node::Text(t) => pending.push_str(t),
                Node::EntityReference { children, .. } => walk(children, pending, out),
                Node::Element(e) => {
                    flush(pending, out);
                    out.push(Item::Element(e));
                }
                Node::Comment(_) | Node::ProcessingInstruction { .. } => {}
            }
        }
    }

    fn flush(pending: &mut String, out: &mut Vec<Item<'_>>) {
        let text = pending.trim();
        if !text.is_empty() {
            out.push(Item::Text(text.to_string()));
        }
        pending.clear();
    }

    let mut out = Vec::new();
    let mut pending = String::new();
    walk(nodes, &mut pending, &mut out);
    flush(&mut pending, &mut out);
    out
}

fn elements_equivalent(a: &Element, b: &Element) -> bool {
    if a.qname != b.qname {
        return false;
    }

    let attrs_a: BTreeMap<&QName, &str> = a.attributes.iter().map(|x| (&x.qname, x.value.as_str())).collect();
    let attrs_b: BTreeMap<&QName, &str> = b.attributes.iter().map(|x| (&x.qname, x.value.as_str())).collect();
    if attrs_a != attrs_b {
        return false;
    }

    let items_a = significant_items(&a.children);
    let items_b = significant_items(&b.children);
    items_a.len() == items_b.len()
        && items_a.iter().zip(&items_b).all(|pair| match pair {
            (Item::Element(x), Item::Element(y)) => elements_equivalent(x, y),
            (Item::Text(x), Item::Text(y)) => x == y,
            _ => false,
        })
}
