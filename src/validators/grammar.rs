//! Grammar compilation
//!
//! Compiles XSD schema documents into an immutable [`CompiledGrammar`]:
//! arenas of element declarations and type definitions with content models
//! resolved to ids, ready for tree validation.
//!
//! `xs:include`, `xs:redefine` and `xs:import` locations are fetched only
//! through a [`ResolutionPolicy`]. A denied include fails compilation. A
//! denied or location-less import is skipped: references into that namespace
//! fall back to `xs:anyType` (types, elements) and `xs:anySimpleType`
//! (attributes).

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use roxmltree::Node;

use crate::encoding::Encoding;
use crate::error::{Error, ParseError, Result, ValidationError};
use crate::limits::Limits;
use crate::loaders::Loader;
use crate::names::split_qname;
use crate::namespaces::QName;
use crate::resolver::{
    EntityReference, InputSource, ReferenceKind, ResolutionOutcome, ResolutionPolicy,
    ResolutionSession,
};
use crate::validators::builtins::{
    get_builtin_type, BuiltinType, XsdValue, XSD_ANY_SIMPLE_TYPE, XSD_ANY_TYPE, XSD_NAMESPACE,
    XSD_STRING,
};
use crate::validators::facets::{Facet, Pattern, WhiteSpace};
use crate::validators::particles::{
    parse_occurs, Compositor, ElementId, ModelGroup, Occurs, Particle, Term,
};
use crate::validators::wildcards::{ProcessContents, Wildcard};
use crate::XML_NAMESPACE;

/// Index of a type definition in its grammar
pub type TypeId = usize;

/// Id of `xs:anyType` in every grammar
pub const ANY_TYPE: TypeId = 0;

/// An element declaration
#[derive(Debug, Clone)]
pub struct ElementDecl {
    /// Expanded name
    pub name: QName,
    /// Declared type
    pub type_id: TypeId,
    /// Whether `xsi:nil` is allowed
    pub nillable: bool,
    /// Fixed value constraint
    pub fixed: Option<String>,
    /// Default value
    pub default: Option<String>,
    /// Abstract elements cannot appear in instances
    pub is_abstract: bool,
}

impl ElementDecl {
    fn any(name: QName) -> Self {
        Self {
            name,
            type_id: ANY_TYPE,
            nillable: false,
            fixed: None,
            default: None,
            is_abstract: false,
        }
    }
}

/// An attribute declaration as used by a complex type
#[derive(Debug, Clone)]
pub struct AttributeUse {
    /// Expanded name
    pub name: QName,
    /// Simple type of the value
    pub type_id: TypeId,
    /// Whether the attribute must be present
    pub required: bool,
    /// Fixed value constraint
    pub fixed: Option<String>,
    /// Default value
    pub default: Option<String>,
}

/// Simple type variety
#[derive(Debug, Clone)]
pub enum Variety {
    /// Restriction of a built-in atomic type
    Atomic(&'static BuiltinType),
    /// Whitespace separated list of items of a simple type
    List(TypeId),
    /// Union of member simple types, tried in order
    Union(Vec<TypeId>),
}

/// A simple type definition with its accumulated facets
#[derive(Debug, Clone)]
pub struct SimpleType {
    /// Name, if global
    pub name: Option<QName>,
    /// Variety
    pub variety: Variety,
    /// White space normalization applied before facets
    pub white_space: WhiteSpace,
    /// Facets of every derivation step
    pub facets: Vec<Facet>,
}

/// Content of a complex type
#[derive(Debug, Clone)]
pub enum ContentType {
    /// No children, no text
    Empty,
    /// Text only, of the given simple type
    Simple(TypeId),
    /// Element children following a content model
    Elements(ModelGroup),
}

/// A complex type definition
#[derive(Debug, Clone)]
pub struct ComplexType {
    /// Name, if global
    pub name: Option<QName>,
    /// Content
    pub content: ContentType,
    /// Whether text may appear between child elements
    pub mixed: bool,
    /// Declared attributes
    pub attributes: IndexMap<QName, AttributeUse>,
    /// Attribute wildcard
    pub any_attribute: Option<Wildcard>,
}

impl ComplexType {
    fn empty(name: Option<QName>) -> Self {
        Self {
            name,
            content: ContentType::Empty,
            mixed: false,
            attributes: IndexMap::new(),
            any_attribute: None,
        }
    }

    fn any_type() -> Self {
        let lax = Wildcard {
            process_contents: ProcessContents::Lax,
            ..Wildcard::default()
        };
        Self {
            name: Some(QName::namespaced(XSD_NAMESPACE, XSD_ANY_TYPE)),
            content: ContentType::Elements(ModelGroup {
                compositor: Compositor::Sequence,
                particles: vec![Particle {
                    term: Term::Any(lax.clone()),
                    occurs: Occurs::new(0, None),
                }],
            }),
            mixed: true,
            attributes: IndexMap::new(),
            any_attribute: Some(lax),
        }
    }
}

/// A type definition
#[derive(Debug, Clone)]
pub enum TypeDef {
    /// Simple type
    Simple(SimpleType),
    /// Complex type
    Complex(ComplexType),
}

/// A compiled, immutable schema grammar
#[derive(Debug)]
pub struct CompiledGrammar {
    target_namespace: String,
    source: Option<String>,
    elements: Vec<ElementDecl>,
    global_elements: IndexMap<QName, ElementId>,
    types: Vec<TypeDef>,
    global_types: IndexMap<QName, TypeId>,
    global_attributes: IndexMap<QName, AttributeUse>,
    skipped_imports: Vec<String>,
}

impl CompiledGrammar {
    fn empty(target_namespace: String, source: Option<String>) -> Self {
        Self {
            target_namespace,
            source,
            elements: Vec::new(),
            global_elements: IndexMap::new(),
            types: vec![TypeDef::Complex(ComplexType::any_type())],
            global_types: IndexMap::new(),
            global_attributes: IndexMap::new(),
            skipped_imports: Vec::new(),
        }
    }

    /// Compile schema text without access to external schema documents
    pub fn parse_str(source: &str) -> Result<Self> {
        Self::compile(source, None, &ResolutionPolicy::DenyAll, &Limits::default())
    }

    /// Compile schema text; includes and imports go through `policy`
    pub fn compile(
        source: &str,
        system_id: Option<&str>,
        policy: &ResolutionPolicy,
        limits: &Limits,
    ) -> Result<Self> {
        let mut session = ResolutionSession::new(policy, Loader::new().with_limits(limits.clone()));
        let mut skipped = Vec::new();
        let sources = collect_sources(source, system_id, &mut session, limits, &mut skipped)?;

        let docs = sources
            .iter()
            .map(|s| {
                roxmltree::Document::parse(&s.text).map_err(|e| {
                    let err = ParseError::new(format!("invalid schema document: {}", e));
                    Error::Schema(match &s.system_id {
                        Some(id) => err.with_source(id.clone()),
                        None => err,
                    })
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let compiler = Compiler::new(&docs, &sources, skipped)?;
        let grammar = compiler.compile()?;
        log::debug!(
            "compiled grammar for '{}': {} elements, {} types",
            grammar.target_namespace,
            grammar.global_elements.len(),
            grammar.types.len()
        );
        Ok(grammar)
    }

    /// Target namespace ("" for none)
    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    /// System identifier of the main schema document
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Namespaces whose imports were skipped
    pub fn skipped_imports(&self) -> &[String] {
        &self.skipped_imports
    }

    /// Look up a global element declaration
    pub fn element(&self, name: &QName) -> Option<ElementId> {
        self.global_elements.get(name).copied()
    }

    /// Names of the global element declarations
    pub fn global_element_names(&self) -> impl Iterator<Item = &QName> {
        self.global_elements.keys()
    }

    /// Get an element declaration by id
    pub fn element_decl(&self, id: ElementId) -> &ElementDecl {
        &self.elements[id]
    }

    /// Look up a global type definition
    pub fn type_id(&self, name: &QName) -> Option<TypeId> {
        self.global_types.get(name).copied()
    }

    /// Get a type definition by id
    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id]
    }

    /// Look up a global attribute declaration
    pub fn attribute(&self, name: &QName) -> Option<&AttributeUse> {
        self.global_attributes.get(name)
    }

    /// Human readable name of a type
    pub fn type_name(&self, id: TypeId) -> String {
        let name = match &self.types[id] {
            TypeDef::Simple(s) => s.name.as_ref(),
            TypeDef::Complex(c) => c.name.as_ref(),
        };
        match name {
            Some(q) => q.local_name.clone(),
            None => "anonymous type".to_string(),
        }
    }

    /// Built-in type at the root of an atomic simple type
    pub fn builtin_of(&self, id: TypeId) -> Option<&'static BuiltinType> {
        match &self.types[id] {
            TypeDef::Simple(SimpleType {
                variety: Variety::Atomic(b),
                ..
            }) => Some(b),
            TypeDef::Complex(ComplexType {
                content: ContentType::Simple(s),
                ..
            }) => self.builtin_of(*s),
            _ => None,
        }
    }

    /// Validate a text value against a simple type (or simple content)
    ///
    /// Returns the parsed value, or a message describing the mismatch.
    pub fn validate_simple(&self, id: TypeId, value: &str) -> std::result::Result<XsdValue, String> {
        match &self.types[id] {
            TypeDef::Simple(st) => self.validate_simple_type(st, value),
            TypeDef::Complex(ct) => match &ct.content {
                ContentType::Simple(s) => self.validate_simple(*s, value),
                _ if id == ANY_TYPE => Ok(XsdValue::String(value.to_string())),
                _ => Err(format!("type '{}' has no simple content", self.type_name(id))),
            },
        }
    }

    fn validate_simple_type(&self, st: &SimpleType, value: &str) -> std::result::Result<XsdValue, String> {
        let normalized = st.white_space.normalize(value);
        let (parsed, length) = match &st.variety {
            Variety::Atomic(builtin) => (
                builtin.parse_normalized(&normalized).map_err(error_text)?,
                None,
            ),
            Variety::List(item) => {
                let items: Vec<&str> = normalized.split(' ').filter(|s| !s.is_empty()).collect();
                for item_value in &items {
                    self.validate_simple(*item, item_value)
                        .map_err(|e| format!("list item '{}': {}", item_value, e))?;
                }
                (XsdValue::String(normalized.clone()), Some(items.len()))
            }
            Variety::Union(members) => {
                let parsed = members
                    .iter()
                    .find_map(|m| self.validate_simple(*m, &normalized).ok())
                    .ok_or_else(|| "value matches no member type of the union".to_string())?;
                (parsed, None)
            }
        };
        for facet in &st.facets {
            facet.check(&normalized, &parsed, length)?;
        }
        Ok(parsed)
    }
}

fn error_text(err: Error) -> String {
    match err {
        Error::Validation(ValidationError { message, .. }) => message,
        other => other.to_string(),
    }
}

fn ns_opt(namespace: &str) -> Option<String> {
    if namespace.is_empty() {
        None
    } else {
        Some(namespace.to_string())
    }
}

/// One schema document to compile
struct SchemaSource {
    text: String,
    system_id: Option<String>,
    /// Target namespace of the including document, for chameleon includes
    inherited_namespace: Option<String>,
}

struct SchemaReference {
    kind: ReferenceKind,
    location: Option<String>,
    namespace: Option<String>,
}

/// Find include/import/redefine references and the target namespace
fn schema_references(text: &str) -> Result<(String, Vec<SchemaReference>)> {
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| Error::Schema(ParseError::new(format!("invalid schema document: {}", e))))?;
    let root = doc.root_element();
    let target = root.attribute("targetNamespace").unwrap_or("").to_string();
    let refs = xsd_children(root)
        .filter_map(|child| {
            let kind = match child.tag_name().name() {
                "include" | "redefine" => ReferenceKind::SchemaInclude,
                "import" => ReferenceKind::SchemaImport,
                _ => return None,
            };
            Some(SchemaReference {
                kind,
                location: child.attribute("schemaLocation").map(str::to_string),
                namespace: child.attribute("namespace").map(str::to_string),
            })
        })
        .collect();
    Ok((target, refs))
}

fn collect_sources(
    source: &str,
    system_id: Option<&str>,
    session: &mut ResolutionSession<'_>,
    limits: &Limits,
    skipped: &mut Vec<String>,
) -> Result<Vec<SchemaSource>> {
    let mut sources = vec![SchemaSource {
        text: source.to_string(),
        system_id: system_id.map(str::to_string),
        inherited_namespace: None,
    }];
    let mut depths = vec![0usize];
    let mut seen: HashSet<String> = system_id.map(str::to_string).into_iter().collect();

    let mut i = 0;
    while i < sources.len() {
        let (target, refs) = schema_references(&sources[i].text)?;
        let target = if target.is_empty() {
            sources[i].inherited_namespace.clone().unwrap_or_default()
        } else {
            target
        };

        for reference in refs {
            let import_namespace = reference.namespace.clone().unwrap_or_default();
            let location = match reference.location {
                Some(location) => location,
                None => {
                    if reference.kind == ReferenceKind::SchemaImport && import_namespace != XML_NAMESPACE {
                        skipped.push(import_namespace);
                    }
                    continue;
                }
            };
            limits.check_schema_depth(depths[i] + 1)?;

            let entity = EntityReference::new(location.clone(), reference.kind)
                .with_context(sources[i].system_id.clone());
            let outcome = session.resolve(&entity);
            let failure = match outcome {
                Ok(ResolutionOutcome::Resolved(InputSource::Bytes { system_id, content })) => {
                    if seen.insert(system_id.clone()) {
                        let text = Encoding::detect(&content)?.decode(&content)?;
                        sources.push(SchemaSource {
                            text,
                            system_id: Some(system_id),
                            inherited_namespace: match reference.kind {
                                ReferenceKind::SchemaInclude => Some(target.clone()),
                                _ => None,
                            },
                        });
                        depths.push(depths[i] + 1);
                    }
                    continue;
                }
                Ok(ResolutionOutcome::Resolved(other)) => {
                    format!("'{}' was not loaded", other.system_id())
                }
                Ok(ResolutionOutcome::Denied { reason }) => reason,
                Err(e) => e.to_string(),
            };

            if reference.kind == ReferenceKind::SchemaInclude {
                return Err(Error::Schema(ParseError::new(format!(
                    "cannot include schema '{}': {}",
                    location, failure
                ))));
            }
            log::warn!(
                "skipping import of namespace '{}' from '{}': {}",
                import_namespace,
                location,
                failure
            );
            skipped.push(import_namespace);
        }
        i += 1;
    }

    Ok(sources)
}

fn is_xsd(node: &Node<'_, '_>) -> bool {
    node.is_element() && node.tag_name().namespace() == Some(XSD_NAMESPACE)
}

fn xsd_children<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(is_xsd)
}

fn xsd_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    xsd_children(node).find(|c| c.tag_name().name() == name)
}

fn schema_error(node: Node<'_, '_>, message: impl Into<String>) -> Error {
    let pos = node.document().text_pos_at(node.range().start);
    Error::Schema(ParseError::new(message).with_location(format!("{}:{}", pos.row, pos.col)))
}

fn bool_attr(node: Node<'_, '_>, name: &str) -> Result<Option<bool>> {
    match node.attribute(name).map(str::trim) {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(schema_error(
            node,
            format!("invalid boolean '{}' for attribute '{}'", other, name),
        )),
    }
}

fn form_qualified(node: Node<'_, '_>, default: bool) -> Result<bool> {
    match node.attribute("form") {
        None => Ok(default),
        Some("qualified") => Ok(true),
        Some("unqualified") => Ok(false),
        Some(other) => Err(schema_error(node, format!("invalid form '{}'", other))),
    }
}

fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        schema_error(
            node,
            format!("'{}' requires attribute '{}'", node.tag_name().name(), name),
        )
    })
}

/// Per-document compilation settings
struct SchemaDoc {
    target_namespace: String,
    chameleon: bool,
    qualified_elements: bool,
    qualified_attributes: bool,
}

type Located<'a, 'input> = (usize, Node<'a, 'input>);

struct Compiler<'a, 'input> {
    docs: Vec<SchemaDoc>,
    grammar: CompiledGrammar,
    element_nodes: IndexMap<QName, Located<'a, 'input>>,
    type_nodes: IndexMap<QName, Located<'a, 'input>>,
    group_nodes: HashMap<QName, Located<'a, 'input>>,
    attribute_group_nodes: HashMap<QName, Located<'a, 'input>>,
    attribute_nodes: IndexMap<QName, Located<'a, 'input>>,
    type_memo: HashMap<QName, TypeId>,
    builtin_memo: HashMap<&'static str, TypeId>,
    group_memo: HashMap<QName, ModelGroup>,
    building: HashSet<TypeId>,
    groups_in_progress: HashSet<QName>,
    attribute_groups_in_progress: HashSet<QName>,
    skipped: HashSet<String>,
}

impl<'a, 'input> Compiler<'a, 'input> {
    fn new(
        documents: &'a [roxmltree::Document<'input>],
        sources: &[SchemaSource],
        skipped: Vec<String>,
    ) -> Result<Self> {
        let main_root = documents
            .first()
            .map(|d| d.root_element())
            .ok_or_else(|| Error::Schema(ParseError::new("no schema document")))?;
        let main_namespace = main_root.attribute("targetNamespace").unwrap_or("").to_string();

        let mut compiler = Self {
            docs: Vec::new(),
            grammar: CompiledGrammar::empty(
                main_namespace,
                sources.first().and_then(|s| s.system_id.clone()),
            ),
            element_nodes: IndexMap::new(),
            type_nodes: IndexMap::new(),
            group_nodes: HashMap::new(),
            attribute_group_nodes: HashMap::new(),
            attribute_nodes: IndexMap::new(),
            type_memo: HashMap::new(),
            builtin_memo: HashMap::new(),
            group_memo: HashMap::new(),
            building: HashSet::new(),
            groups_in_progress: HashSet::new(),
            attribute_groups_in_progress: HashSet::new(),
            skipped: skipped.iter().cloned().collect(),
        };
        compiler.grammar.skipped_imports = skipped;

        for (index, (document, source)) in documents.iter().zip(sources).enumerate() {
            let root = document.root_element();
            if !is_xsd(&root) || root.tag_name().name() != "schema" {
                return Err(schema_error(root, "root element is not xs:schema"));
            }
            let declared = root.attribute("targetNamespace");
            let target_namespace = declared
                .map(str::to_string)
                .or_else(|| source.inherited_namespace.clone())
                .unwrap_or_default();
            compiler.docs.push(SchemaDoc {
                chameleon: declared.is_none() && !target_namespace.is_empty(),
                qualified_elements: root.attribute("elementFormDefault") == Some("qualified"),
                qualified_attributes: root.attribute("attributeFormDefault") == Some("qualified"),
                target_namespace: target_namespace.clone(),
            });

            for child in xsd_children(root) {
                let kind = child.tag_name().name();
                let map = match kind {
                    "element" => &mut compiler.element_nodes,
                    "complexType" | "simpleType" => &mut compiler.type_nodes,
                    "attribute" => &mut compiler.attribute_nodes,
                    "group" => {
                        let name = QName::new(ns_opt(&target_namespace), required_attr(child, "name")?);
                        compiler.group_nodes.insert(name, (index, child));
                        continue;
                    }
                    "attributeGroup" => {
                        let name = QName::new(ns_opt(&target_namespace), required_attr(child, "name")?);
                        compiler.attribute_group_nodes.insert(name, (index, child));
                        continue;
                    }
                    _ => continue,
                };
                let name = QName::new(ns_opt(&target_namespace), required_attr(child, "name")?);
                if map.insert(name.clone(), (index, child)).is_some() {
                    return Err(schema_error(child, format!("duplicate global {} '{}'", kind, name)));
                }
            }
        }

        Ok(compiler)
    }

    fn compile(mut self) -> Result<CompiledGrammar> {
        let globals: Vec<(QName, Located<'a, 'input>)> =
            self.element_nodes.iter().map(|(q, l)| (q.clone(), *l)).collect();
        for (name, _) in &globals {
            let id = self.grammar.elements.len();
            self.grammar.elements.push(ElementDecl::any(name.clone()));
            self.grammar.global_elements.insert(name.clone(), id);
        }
        for (name, (doc, node)) in globals {
            let decl = self.element_decl(doc, node, name.clone())?;
            let id = self.grammar.global_elements[&name];
            self.grammar.elements[id] = decl;
        }

        let type_names: Vec<QName> = self.type_nodes.keys().cloned().collect();
        for name in type_names {
            let id = self.resolve_type(&name)?;
            self.grammar.global_types.insert(name, id);
        }

        let attribute_names: Vec<QName> = self.attribute_nodes.keys().cloned().collect();
        for name in attribute_names {
            let (doc, node) = self.attribute_nodes[&name];
            let decl = self.attribute_decl(doc, node, true)?;
            self.grammar.global_attributes.insert(name, decl);
        }

        Ok(self.grammar)
    }

    fn is_skipped(&self, name: &QName) -> bool {
        self.skipped.contains(name.namespace_key())
    }

    fn resolve_qname(&self, doc: usize, node: Node<'a, 'input>, value: &str) -> Result<QName> {
        let (prefix, local) = split_qname(value.trim());
        match node.lookup_namespace_uri(prefix) {
            Some(ns) if !ns.is_empty() => Ok(QName::namespaced(ns, local)),
            None if prefix.is_some() => Err(schema_error(
                node,
                format!("unbound prefix in QName '{}'", value),
            )),
            _ if self.docs[doc].chameleon => Ok(QName::new(ns_opt(&self.docs[doc].target_namespace), local)),
            _ => Ok(QName::local(local)),
        }
    }

    fn builtin_type(&mut self, local: &str) -> Result<TypeId> {
        if local == XSD_ANY_TYPE {
            return Ok(ANY_TYPE);
        }
        let builtin = get_builtin_type(local)
            .ok_or_else(|| Error::Schema(ParseError::new(format!("unknown built-in type 'xs:{}'", local))))?;
        if let Some(&id) = self.builtin_memo.get(builtin.name) {
            return Ok(id);
        }
        let id = self.grammar.types.len();
        self.grammar.types.push(TypeDef::Simple(SimpleType {
            name: Some(QName::namespaced(XSD_NAMESPACE, builtin.name)),
            variety: Variety::Atomic(builtin),
            white_space: builtin.white_space,
            facets: Vec::new(),
        }));
        self.builtin_memo.insert(builtin.name, id);
        Ok(id)
    }

    fn resolve_type(&mut self, name: &QName) -> Result<TypeId> {
        if name.namespace.as_deref() == Some(XSD_NAMESPACE) {
            return self.builtin_type(&name.local_name);
        }
        if let Some(&id) = self.type_memo.get(name) {
            return Ok(id);
        }
        if let Some(&(doc, node)) = self.type_nodes.get(name) {
            return match node.tag_name().name() {
                "complexType" => self.complex_type(doc, node, Some(name.clone())),
                _ => self.simple_type(doc, node, Some(name.clone())),
            };
        }
        if self.is_skipped(name) {
            log::warn!("type '{}' belongs to a skipped import, using anyType", name);
            return Ok(ANY_TYPE);
        }
        Err(Error::Schema(ParseError::new(format!("unknown type '{}'", name))))
    }

    fn reserve_type(&mut self, placeholder: TypeDef, name: Option<&QName>) -> TypeId {
        let id = self.grammar.types.len();
        self.grammar.types.push(placeholder);
        if let Some(name) = name {
            self.type_memo.insert(name.clone(), id);
        }
        self.building.insert(id);
        id
    }

    fn finish_type(&mut self, id: TypeId, def: TypeDef) -> TypeId {
        self.grammar.types[id] = def;
        self.building.remove(&id);
        id
    }

    fn element_decl(&mut self, doc: usize, node: Node<'a, 'input>, name: QName) -> Result<ElementDecl> {
        let type_id = if let Some(type_name) = node.attribute("type") {
            let q = self.resolve_qname(doc, node, type_name)?;
            self.resolve_type(&q)?
        } else if let Some(child) = xsd_child(node, "complexType") {
            self.complex_type(doc, child, None)?
        } else if let Some(child) = xsd_child(node, "simpleType") {
            self.simple_type(doc, child, None)?
        } else if let Some(head) = node.attribute("substitutionGroup") {
            let q = self.resolve_qname(doc, node, head)?;
            match self.element_nodes.get(&q).copied() {
                Some((head_doc, head_node)) if head_node != node => {
                    self.element_decl(head_doc, head_node, q)?.type_id
                }
                _ => ANY_TYPE,
            }
        } else {
            ANY_TYPE
        };

        let fixed = node.attribute("fixed").map(str::to_string);
        let default = node.attribute("default").map(str::to_string);
        if fixed.is_some() && default.is_some() {
            return Err(schema_error(node, format!("element '{}' has both fixed and default", name)));
        }
        for value in fixed.iter().chain(default.iter()) {
            if matches!(self.grammar.types[type_id], TypeDef::Simple(_)) {
                self.grammar.validate_simple(type_id, value).map_err(|e| {
                    schema_error(node, format!("invalid value constraint '{}' for '{}': {}", value, name, e))
                })?;
            }
        }

        Ok(ElementDecl {
            name,
            type_id,
            nillable: bool_attr(node, "nillable")?.unwrap_or(false),
            fixed,
            default,
            is_abstract: bool_attr(node, "abstract")?.unwrap_or(false),
        })
    }

    fn element_particle(&mut self, doc: usize, node: Node<'a, 'input>) -> Result<Particle> {
        let occurs = parse_occurs(node.attribute("minOccurs"), node.attribute("maxOccurs"))?;

        if let Some(reference) = node.attribute("ref") {
            let name = self.resolve_qname(doc, node, reference)?;
            let id = match self.grammar.global_elements.get(&name).copied() {
                Some(id) => id,
                None if self.is_skipped(&name) => {
                    let id = self.grammar.elements.len();
                    self.grammar.elements.push(ElementDecl::any(name.clone()));
                    id
                }
                None => return Err(schema_error(node, format!("unknown element '{}'", name))),
            };
            return Ok(Particle {
                term: Term::Element { name, id },
                occurs,
            });
        }

        let local = required_attr(node, "name")?;
        let qualified = form_qualified(node, self.docs[doc].qualified_elements)?;
        let namespace = if qualified {
            ns_opt(&self.docs[doc].target_namespace)
        } else {
            None
        };
        let name = QName::new(namespace, local);
        let decl = self.element_decl(doc, node, name.clone())?;
        let id = self.grammar.elements.len();
        self.grammar.elements.push(decl);
        Ok(Particle {
            term: Term::Element { name, id },
            occurs,
        })
    }

    fn model_group(&mut self, doc: usize, node: Node<'a, 'input>) -> Result<ModelGroup> {
        let compositor = match node.tag_name().name() {
            "sequence" => Compositor::Sequence,
            "choice" => Compositor::Choice,
            "all" => Compositor::All,
            other => return Err(schema_error(node, format!("unexpected '{}' in model group", other))),
        };

        let mut group = ModelGroup::new(compositor);
        for child in xsd_children(node) {
            let particle = match child.tag_name().name() {
                "element" => self.element_particle(doc, child)?,
                "sequence" | "choice" => Particle {
                    term: Term::Group(self.model_group(doc, child)?),
                    occurs: parse_occurs(child.attribute("minOccurs"), child.attribute("maxOccurs"))?,
                },
                "group" => self.group_ref(doc, child)?,
                "any" => Particle {
                    term: Term::Any(Wildcard::parse(
                        child.attribute("namespace"),
                        child.attribute("processContents"),
                        &self.docs[doc].target_namespace,
                    )?),
                    occurs: parse_occurs(child.attribute("minOccurs"), child.attribute("maxOccurs"))?,
                },
                "annotation" => continue,
                other => {
                    return Err(schema_error(child, format!("unexpected '{}' in {:?} group", other, compositor)))
                }
            };
            if compositor == Compositor::All && !matches!(particle.term, Term::Element { .. }) {
                return Err(schema_error(child, "xs:all may only contain element declarations"));
            }
            group.particles.push(particle);
        }
        Ok(group)
    }

    fn group_ref(&mut self, doc: usize, node: Node<'a, 'input>) -> Result<Particle> {
        let occurs = parse_occurs(node.attribute("minOccurs"), node.attribute("maxOccurs"))?;
        let name = self.resolve_qname(doc, node, required_attr(node, "ref")?)?;

        let group = match self.group_memo.get(&name).cloned() {
            Some(group) => group,
            None => {
                let (group_doc, group_node) = *self
                    .group_nodes
                    .get(&name)
                    .ok_or_else(|| schema_error(node, format!("unknown group '{}'", name)))?;
                if !self.groups_in_progress.insert(name.clone()) {
                    return Err(schema_error(node, format!("circular group reference '{}'", name)));
                }
                let inner = xsd_children(group_node)
                    .find(|c| matches!(c.tag_name().name(), "sequence" | "choice" | "all"))
                    .ok_or_else(|| schema_error(group_node, format!("group '{}' has no model group", name)))?;
                let group = self.model_group(group_doc, inner)?;
                self.groups_in_progress.remove(&name);
                self.group_memo.insert(name, group.clone());
                group
            }
        };

        Ok(Particle {
            term: Term::Group(group),
            occurs,
        })
    }

    fn complex_type(&mut self, doc: usize, node: Node<'a, 'input>, name: Option<QName>) -> Result<TypeId> {
        let id = self.reserve_type(TypeDef::Complex(ComplexType::empty(name.clone())), name.as_ref());
        let mut ct = ComplexType::empty(name);
        ct.mixed = bool_attr(node, "mixed")?.unwrap_or(false);

        for child in xsd_children(node) {
            match child.tag_name().name() {
                "simpleContent" => self.simple_content(doc, child, &mut ct)?,
                "complexContent" => self.complex_content(doc, child, &mut ct)?,
                "sequence" | "choice" | "all" => {
                    ct.content = ContentType::Elements(self.model_group(doc, child)?)
                }
                "group" => {
                    let particle = self.group_ref(doc, child)?;
                    let mut group = ModelGroup::new(Compositor::Sequence);
                    group.particles.push(particle);
                    ct.content = ContentType::Elements(group);
                }
                "attribute" | "attributeGroup" | "anyAttribute" | "annotation" | "assert" => {}
                other => return Err(schema_error(child, format!("unexpected '{}' in complexType", other))),
            }
        }
        let (mut attributes, mut any_attribute) = (std::mem::take(&mut ct.attributes), ct.any_attribute.take());
        self.attribute_uses(doc, node, &mut attributes, &mut any_attribute)?;
        ct.attributes = attributes;
        ct.any_attribute = any_attribute;

        if ct.mixed && matches!(ct.content, ContentType::Empty) {
            ct.content = ContentType::Elements(ModelGroup::new(Compositor::Sequence));
        }
        Ok(self.finish_type(id, TypeDef::Complex(ct)))
    }

    fn derivation(&self, node: Node<'a, 'input>) -> Result<Node<'a, 'input>> {
        xsd_children(node)
            .find(|c| matches!(c.tag_name().name(), "extension" | "restriction"))
            .ok_or_else(|| schema_error(node, "missing extension or restriction"))
    }

    fn base_type(&mut self, doc: usize, derivation: Node<'a, 'input>) -> Result<TypeId> {
        let base = self.resolve_qname(doc, derivation, required_attr(derivation, "base")?)?;
        let id = self.resolve_type(&base)?;
        if self.building.contains(&id) {
            return Err(schema_error(derivation, format!("circular derivation from '{}'", base)));
        }
        Ok(id)
    }

    fn simple_content(&mut self, doc: usize, node: Node<'a, 'input>, ct: &mut ComplexType) -> Result<()> {
        let derivation = self.derivation(node)?;
        let base_id = self.base_type(doc, derivation)?;

        let base_simple = match &self.grammar.types[base_id] {
            TypeDef::Simple(_) => Some(base_id),
            TypeDef::Complex(base) => {
                ct.attributes = base.attributes.clone();
                ct.any_attribute = base.any_attribute.clone();
                match base.content {
                    ContentType::Simple(s) => Some(s),
                    _ => None,
                }
            }
        };
        let base_simple = match base_simple {
            Some(id) => id,
            None if base_id == ANY_TYPE => self.builtin_type(XSD_ANY_SIMPLE_TYPE)?,
            None => return Err(schema_error(derivation, "simpleContent base has no simple content")),
        };

        ct.content = if derivation.tag_name().name() == "extension" {
            ContentType::Simple(base_simple)
        } else {
            let restricted = self.restricted(doc, derivation, base_simple, None)?;
            let id = self.grammar.types.len();
            self.grammar.types.push(TypeDef::Simple(restricted));
            ContentType::Simple(id)
        };
        self.attribute_uses(doc, derivation, &mut ct.attributes, &mut ct.any_attribute)
    }

    fn complex_content(&mut self, doc: usize, node: Node<'a, 'input>, ct: &mut ComplexType) -> Result<()> {
        let derivation = self.derivation(node)?;
        let base_id = self.base_type(doc, derivation)?;
        let base = match &self.grammar.types[base_id] {
            TypeDef::Complex(base) => base.clone(),
            TypeDef::Simple(_) => {
                return Err(schema_error(derivation, "complexContent base must be a complex type"))
            }
        };

        let own = match xsd_children(derivation)
            .find(|c| matches!(c.tag_name().name(), "sequence" | "choice" | "all" | "group"))
        {
            Some(child) if child.tag_name().name() == "group" => {
                let particle = self.group_ref(doc, child)?;
                let mut group = ModelGroup::new(Compositor::Sequence);
                group.particles.push(particle);
                Some(group)
            }
            Some(child) => Some(self.model_group(doc, child)?),
            None => None,
        };

        if let Some(mixed) = bool_attr(node, "mixed")? {
            ct.mixed = mixed;
        }

        if derivation.tag_name().name() == "extension" {
            ct.mixed = ct.mixed || base.mixed;
            ct.content = match (base.content, own) {
                (ContentType::Elements(b), Some(o)) => ContentType::Elements(ModelGroup {
                    compositor: Compositor::Sequence,
                    particles: vec![
                        Particle {
                            term: Term::Group(b),
                            occurs: Occurs::once(),
                        },
                        Particle {
                            term: Term::Group(o),
                            occurs: Occurs::once(),
                        },
                    ],
                }),
                (ContentType::Elements(b), None) => ContentType::Elements(b),
                (ContentType::Empty, Some(o)) => ContentType::Elements(o),
                (ContentType::Empty, None) => ContentType::Empty,
                (ContentType::Simple(_), _) => {
                    return Err(schema_error(derivation, "cannot extend simple content with complexContent"))
                }
            };
            ct.attributes = base.attributes;
            ct.any_attribute = base.any_attribute;
        } else {
            ct.content = own.map(ContentType::Elements).unwrap_or(ContentType::Empty);
            ct.attributes = base.attributes;
            ct.any_attribute = None;
        }
        self.attribute_uses(doc, derivation, &mut ct.attributes, &mut ct.any_attribute)
    }

    fn attribute_uses(
        &mut self,
        doc: usize,
        node: Node<'a, 'input>,
        attributes: &mut IndexMap<QName, AttributeUse>,
        any_attribute: &mut Option<Wildcard>,
    ) -> Result<()> {
        for child in xsd_children(node) {
            match child.tag_name().name() {
                "attribute" => {
                    let mut decl = self.attribute_decl(doc, child, false)?;
                    match child.attribute("use").unwrap_or("optional") {
                        "prohibited" => {
                            attributes.shift_remove(&decl.name);
                        }
                        "required" => {
                            decl.required = true;
                            attributes.insert(decl.name.clone(), decl);
                        }
                        "optional" => {
                            attributes.insert(decl.name.clone(), decl);
                        }
                        other => return Err(schema_error(child, format!("invalid use '{}'", other))),
                    }
                }
                "attributeGroup" => {
                    let name = self.resolve_qname(doc, child, required_attr(child, "ref")?)?;
                    let (group_doc, group_node) = *self
                        .attribute_group_nodes
                        .get(&name)
                        .ok_or_else(|| schema_error(child, format!("unknown attribute group '{}'", name)))?;
                    if !self.attribute_groups_in_progress.insert(name.clone()) {
                        return Err(schema_error(child, format!("circular attribute group '{}'", name)));
                    }
                    self.attribute_uses(group_doc, group_node, attributes, any_attribute)?;
                    self.attribute_groups_in_progress.remove(&name);
                }
                "anyAttribute" => {
                    *any_attribute = Some(Wildcard::parse(
                        child.attribute("namespace"),
                        child.attribute("processContents"),
                        &self.docs[doc].target_namespace,
                    )?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn attribute_decl(&mut self, doc: usize, node: Node<'a, 'input>, global: bool) -> Result<AttributeUse> {
        let fixed = node.attribute("fixed").map(str::to_string);
        let default = node.attribute("default").map(str::to_string);
        if fixed.is_some() && default.is_some() {
            return Err(schema_error(node, "attribute has both fixed and default"));
        }

        if let Some(reference) = node.attribute("ref") {
            let name = self.resolve_qname(doc, node, reference)?;
            let mut decl = if name.namespace.as_deref() == Some(XML_NAMESPACE) {
                AttributeUse {
                    type_id: self.builtin_type(XSD_STRING)?,
                    name,
                    required: false,
                    fixed: None,
                    default: None,
                }
            } else if let Some(decl) = self.grammar.global_attributes.get(&name) {
                decl.clone()
            } else if let Some(&(attr_doc, attr_node)) = self.attribute_nodes.get(&name) {
                self.attribute_decl(attr_doc, attr_node, true)?
            } else if self.is_skipped(&name) {
                AttributeUse {
                    type_id: self.builtin_type(XSD_ANY_SIMPLE_TYPE)?,
                    name,
                    required: false,
                    fixed: None,
                    default: None,
                }
            } else {
                return Err(schema_error(node, format!("unknown attribute '{}'", name)));
            };
            if fixed.is_some() {
                decl.fixed = fixed;
            }
            if default.is_some() {
                decl.default = default;
            }
            return Ok(decl);
        }

        let local = required_attr(node, "name")?;
        let qualified = global || form_qualified(node, self.docs[doc].qualified_attributes)?;
        let namespace = if qualified {
            ns_opt(&self.docs[doc].target_namespace)
        } else {
            None
        };
        let name = QName::new(namespace, local);

        let type_id = if let Some(type_name) = node.attribute("type") {
            let q = self.resolve_qname(doc, node, type_name)?;
            self.resolve_type(&q)?
        } else if let Some(child) = xsd_child(node, "simpleType") {
            self.simple_type(doc, child, None)?
        } else {
            self.builtin_type(XSD_ANY_SIMPLE_TYPE)?
        };
        if !matches!(self.grammar.types[type_id], TypeDef::Simple(_)) {
            return Err(schema_error(node, format!("attribute '{}' must have a simple type", name)));
        }
        for value in fixed.iter().chain(default.iter()) {
            self.grammar.validate_simple(type_id, value).map_err(|e| {
                schema_error(node, format!("invalid value constraint '{}' for '{}': {}", value, name, e))
            })?;
        }

        Ok(AttributeUse {
            name,
            type_id,
            required: false,
            fixed,
            default,
        })
    }

    fn simple_type(&mut self, doc: usize, node: Node<'a, 'input>, name: Option<QName>) -> Result<TypeId> {
        let placeholder = TypeDef::Simple(SimpleType {
            name: name.clone(),
            variety: Variety::Atomic(
                get_builtin_type(XSD_ANY_SIMPLE_TYPE)
                    .ok_or_else(|| Error::Other("anySimpleType missing".to_string()))?,
            ),
            white_space: WhiteSpace::Preserve,
            facets: Vec::new(),
        });
        let id = self.reserve_type(placeholder, name.as_ref());

        let derivation = xsd_children(node)
            .find(|c| matches!(c.tag_name().name(), "restriction" | "list" | "union"))
            .ok_or_else(|| schema_error(node, "simpleType needs restriction, list or union"))?;

        let st = match derivation.tag_name().name() {
            "restriction" => {
                let base_id = match derivation.attribute("base") {
                    Some(_) => self.base_type(doc, derivation)?,
                    None => {
                        let inline = xsd_child(derivation, "simpleType")
                            .ok_or_else(|| schema_error(derivation, "restriction needs a base type"))?;
                        self.simple_type(doc, inline, None)?
                    }
                };
                self.restricted(doc, derivation, base_id, name)?
            }
            "list" => {
                let item = match derivation.attribute("itemType") {
                    Some(item) => {
                        let q = self.resolve_qname(doc, derivation, item)?;
                        self.resolve_type(&q)?
                    }
                    None => {
                        let inline = xsd_child(derivation, "simpleType")
                            .ok_or_else(|| schema_error(derivation, "list needs an item type"))?;
                        self.simple_type(doc, inline, None)?
                    }
                };
                SimpleType {
                    name,
                    variety: Variety::List(item),
                    white_space: WhiteSpace::Collapse,
                    facets: Vec::new(),
                }
            }
            _ => {
                let mut members = Vec::new();
                for member in derivation.attribute("memberTypes").unwrap_or("").split_whitespace() {
                    let q = self.resolve_qname(doc, derivation, member)?;
                    members.push(self.resolve_type(&q)?);
                }
                for inline in xsd_children(derivation).filter(|c| c.tag_name().name() == "simpleType") {
                    members.push(self.simple_type(doc, inline, None)?);
                }
                if members.is_empty() {
                    return Err(schema_error(derivation, "union has no member types"));
                }
                SimpleType {
                    name,
                    variety: Variety::Union(members),
                    white_space: WhiteSpace::Collapse,
                    facets: Vec::new(),
                }
            }
        };

        Ok(self.finish_type(id, TypeDef::Simple(st)))
    }

    /// Apply the facets under a restriction element to a simple base type
    fn restricted(
        &mut self,
        _doc: usize,
        node: Node<'a, 'input>,
        base_id: TypeId,
        name: Option<QName>,
    ) -> Result<SimpleType> {
        let base = match &self.grammar.types[base_id] {
            TypeDef::Simple(s) => s.clone(),
            TypeDef::Complex(ComplexType {
                content: ContentType::Simple(s),
                ..
            }) => match &self.grammar.types[*s] {
                TypeDef::Simple(s) => s.clone(),
                TypeDef::Complex(_) => return Err(schema_error(node, "base is not a simple type")),
            },
            TypeDef::Complex(_) => return Err(schema_error(node, "base is not a simple type")),
        };

        let mut st = SimpleType { name, ..base };
        let mut patterns = Vec::new();
        let mut enumeration = Vec::new();

        for facet_node in xsd_children(node) {
            let facet = facet_node.tag_name().name();
            if matches!(
                facet,
                "annotation" | "simpleType" | "attribute" | "attributeGroup" | "anyAttribute"
            ) {
                continue;
            }
            let value = required_attr(facet_node, "value")?;
            if !admits(&st.variety, facet) {
                return Err(schema_error(
                    facet_node,
                    format!("facet '{}' is not applicable to this type", facet),
                ));
            }
            let parse_len = |v: &str| {
                v.trim().parse::<usize>().map_err(|_| {
                    schema_error(facet_node, format!("invalid {} value '{}'", facet, v))
                })
            };
            match facet {
                "whiteSpace" => {
                    let ws = WhiteSpace::from_str(value)?;
                    if !st.white_space.can_restrict_to(ws) {
                        return Err(schema_error(facet_node, format!("whiteSpace cannot be relaxed to '{}'", value)));
                    }
                    st.white_space = ws;
                }
                "pattern" => patterns.push(Pattern::new(value)?),
                "enumeration" => {
                    let parsed = self.facet_value(facet_node, base_id, value)?;
                    enumeration.push((value.to_string(), parsed));
                }
                "length" => st.facets.push(Facet::Length(parse_len(value)?)),
                "minLength" => st.facets.push(Facet::MinLength(parse_len(value)?)),
                "maxLength" => st.facets.push(Facet::MaxLength(parse_len(value)?)),
                "totalDigits" => st.facets.push(Facet::TotalDigits(parse_len(value)? as u32)),
                "fractionDigits" => st.facets.push(Facet::FractionDigits(parse_len(value)? as u32)),
                "minInclusive" | "maxInclusive" | "minExclusive" | "maxExclusive" => {
                    let bound = self.facet_value(facet_node, base_id, value)?;
                    if bound.compare(&bound).is_none() {
                        return Err(schema_error(
                            facet_node,
                            format!("facet '{}' needs an ordered type", facet),
                        ));
                    }
                    st.facets.push(match facet {
                        "minInclusive" => Facet::MinInclusive(bound),
                        "maxInclusive" => Facet::MaxInclusive(bound),
                        "minExclusive" => Facet::MinExclusive(bound),
                        _ => Facet::MaxExclusive(bound),
                    });
                }
                other => {
                    return Err(schema_error(facet_node, format!("unsupported facet '{}'", other)))
                }
            }
        }

        if !patterns.is_empty() {
            st.facets.push(Facet::Pattern(patterns));
        }
        if !enumeration.is_empty() {
            st.facets.push(Facet::Enumeration(enumeration));
        }
        Ok(st)
    }

    fn facet_value(&self, node: Node<'a, 'input>, base_id: TypeId, value: &str) -> Result<XsdValue> {
        self.grammar
            .validate_simple(base_id, value)
            .map_err(|e| schema_error(node, format!("invalid facet value '{}': {}", value, e)))
    }
}

fn admits(variety: &Variety, facet: &str) -> bool {
    match variety {
        Variety::Atomic(builtin) => builtin.admits(facet),
        Variety::List(_) => matches!(
            facet,
            "length" | "minLength" | "maxLength" | "pattern" | "enumeration" | "whiteSpace"
        ),
        Variety::Union(_) => matches!(facet, "pattern" | "enumeration"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::particles::ContentError;

    const ORDER_XSD: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:o="urn:order"
           targetNamespace="urn:order"
           elementFormDefault="qualified">
  <xs:element name="order" type="o:OrderType"/>
  <xs:complexType name="OrderType">
    <xs:sequence>
      <xs:element name="id" type="xs:integer"/>
      <xs:element name="status" type="o:Status" minOccurs="0"/>
      <xs:element name="item" type="o:Item" maxOccurs="unbounded"/>
    </xs:sequence>
    <xs:attribute name="version" type="xs:string" use="required"/>
  </xs:complexType>
  <xs:simpleType name="Status">
    <xs:restriction base="xs:token">
      <xs:enumeration value="open"/>
      <xs:enumeration value="closed"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:complexType name="Item">
    <xs:simpleContent>
      <xs:extension base="o:Sku">
        <xs:attribute name="qty" type="xs:positiveInteger" default="1"/>
      </xs:extension>
    </xs:simpleContent>
  </xs:complexType>
  <xs:simpleType name="Sku">
    <xs:restriction base="xs:string">
      <xs:pattern value="[A-Z]{3}-\d+"/>
    </xs:restriction>
  </xs:simpleType>
</xs:schema>"#;

    fn q(local: &str) -> QName {
        QName::namespaced("urn:order", local)
    }

    #[test]
    fn test_compile_order_schema() {
        let grammar = CompiledGrammar::parse_str(ORDER_XSD).unwrap();
        assert_eq!(grammar.target_namespace(), "urn:order");

        let order = grammar.element_decl(grammar.element(&q("order")).unwrap());
        let ct = match grammar.type_def(order.type_id) {
            TypeDef::Complex(ct) => ct,
            other => panic!("unexpected {:?}", other),
        };
        assert!(ct.attributes[&QName::local("version")].required);

        let group = match &ct.content {
            ContentType::Elements(g) => g,
            other => panic!("unexpected {:?}", other),
        };
        assert!(group.check_children(&[q("id"), q("item"), q("item")]).is_ok());
        assert!(matches!(
            group.check_children(&[q("id")]),
            Err(ContentError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_simple_type_facets() {
        let grammar = CompiledGrammar::parse_str(ORDER_XSD).unwrap();
        let status = grammar.type_id(&q("Status")).unwrap();
        assert!(grammar.validate_simple(status, "  open ").is_ok());
        assert!(grammar.validate_simple(status, "pending").is_err());

        let sku = grammar.type_id(&q("Sku")).unwrap();
        assert!(grammar.validate_simple(sku, "ABC-42").is_ok());
        assert!(grammar.validate_simple(sku, "abc-42").is_err());

        let item = grammar.type_id(&q("Item")).unwrap();
        assert!(grammar.validate_simple(item, "XYZ-1").is_ok());
    }

    #[test]
    fn test_list_and_union() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="Ints">
    <xs:list itemType="xs:int"/>
  </xs:simpleType>
  <xs:simpleType name="ShortInts">
    <xs:restriction base="Ints"><xs:maxLength value="2"/></xs:restriction>
  </xs:simpleType>
  <xs:simpleType name="IntOrAuto">
    <xs:union memberTypes="xs:int">
      <xs:simpleType>
        <xs:restriction base="xs:string"><xs:enumeration value="auto"/></xs:restriction>
      </xs:simpleType>
    </xs:union>
  </xs:simpleType>
</xs:schema>"#;
        let grammar = CompiledGrammar::parse_str(xsd).unwrap();
        let short = grammar.type_id(&QName::local("ShortInts")).unwrap();
        assert!(grammar.validate_simple(short, "1 2").is_ok());
        assert!(grammar.validate_simple(short, "1 2 3").is_err());
        assert!(grammar.validate_simple(short, "1 x").is_err());

        let union = grammar.type_id(&QName::local("IntOrAuto")).unwrap();
        assert!(grammar.validate_simple(union, "12").is_ok());
        assert!(grammar.validate_simple(union, "auto").is_ok());
        assert!(grammar.validate_simple(union, "manual").is_err());
    }

    #[test]
    fn test_extension_and_groups() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:group name="Names">
    <xs:sequence>
      <xs:element name="first" type="xs:string"/>
      <xs:element name="last" type="xs:string"/>
    </xs:sequence>
  </xs:group>
  <xs:attributeGroup name="Audit">
    <xs:attribute name="created" type="xs:date"/>
  </xs:attributeGroup>
  <xs:complexType name="Person">
    <xs:group ref="Names"/>
    <xs:attributeGroup ref="Audit"/>
  </xs:complexType>
  <xs:complexType name="Employee">
    <xs:complexContent>
      <xs:extension base="Person">
        <xs:sequence><xs:element name="badge" type="xs:int"/></xs:sequence>
      </xs:extension>
    </xs:complexContent>
  </xs:complexType>
  <xs:element name="employee" type="Employee"/>
</xs:schema>"#;
        let grammar = CompiledGrammar::parse_str(xsd).unwrap();
        let employee = grammar.type_id(&QName::local("Employee")).unwrap();
        match grammar.type_def(employee) {
            TypeDef::Complex(ct) => {
                assert!(ct.attributes.contains_key(&QName::local("created")));
                let group = match &ct.content {
                    ContentType::Elements(g) => g,
                    other => panic!("unexpected {:?}", other),
                };
                let names = [QName::local("first"), QName::local("last"), QName::local("badge")];
                assert!(group.check_children(&names).is_ok());
                assert!(group.check_children(&names[..2]).is_err());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_recursive_type() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="node" type="Node"/>
  <xs:complexType name="Node">
    <xs:sequence><xs:element ref="node" minOccurs="0" maxOccurs="unbounded"/></xs:sequence>
  </xs:complexType>
</xs:schema>"#;
        let grammar = CompiledGrammar::parse_str(xsd).unwrap();
        assert!(grammar.element(&QName::local("node")).is_some());
    }

    #[test]
    fn test_compile_errors() {
        let unknown_type = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="a" type="Missing"/>
</xs:schema>"#;
        assert!(matches!(CompiledGrammar::parse_str(unknown_type), Err(Error::Schema(_))));

        let bad_facet = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="B"><xs:restriction base="xs:boolean"><xs:maxLength value="1"/></xs:restriction></xs:simpleType>
</xs:schema>"#;
        assert!(CompiledGrammar::parse_str(bad_facet).is_err());

        assert!(CompiledGrammar::parse_str("<notaschema/>").is_err());
        assert!(CompiledGrammar::parse_str("<xs:schema").is_err());
    }

    #[test]
    fn test_denied_include_fails_and_denied_import_is_skipped() {
        let include = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:include schemaLocation="other.xsd"/>
</xs:schema>"#;
        assert!(CompiledGrammar::parse_str(include).is_err());

        let import = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:x="urn:x">
  <xs:import namespace="urn:x" schemaLocation="http://example.invalid/x.xsd"/>
  <xs:element name="a" type="x:Thing"/>
</xs:schema>"#;
        let grammar = CompiledGrammar::parse_str(import).unwrap();
        assert_eq!(grammar.skipped_imports().to_vec(), vec!["urn:x".to_string()]);
        let a = grammar.element_decl(grammar.element(&QName::local("a")).unwrap());
        assert_eq!(a.type_id, ANY_TYPE);
    }

    #[test]
    fn test_include_through_allow_local() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("types.xsd"),
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="Code"><xs:restriction base="xs:string"><xs:length value="2"/></xs:restriction></xs:simpleType>
</xs:schema>"#,
        )
        .unwrap();
        let main = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:c="urn:c" targetNamespace="urn:c">
  <xs:include schemaLocation="types.xsd"/>
  <xs:element name="code" type="c:Code"/>
</xs:schema>"#;
        let main_path = dir.path().join("main.xsd");
        let policy = ResolutionPolicy::allow_local(dir.path());
        let grammar = CompiledGrammar::compile(
            main,
            main_path.to_str(),
            &policy,
            &Limits::default(),
        )
        .unwrap();
        let code = grammar.element_decl(grammar.element(&QName::namespaced("urn:c", "code")).unwrap());
        assert!(grammar.validate_simple(code.type_id, "ab").is_ok());
        assert!(grammar.validate_simple(code.type_id, "abc").is_err());
    }
}
