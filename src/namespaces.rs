//! XML namespace handling
//!
//! Qualified names and the scoped prefix bindings the parser maintains while
//! walking nested elements.

use crate::error::{Error, Result};
use crate::{XMLNS_NAMESPACE, XML_NAMESPACE};
use std::collections::HashMap;
use std::fmt;

/// XML Namespace URI
pub type NamespaceUri = String;

/// Namespace prefix
pub type Prefix = String;

/// Qualified name (QName) - combination of namespace and local name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    /// Namespace URI (None for no namespace)
    pub namespace: Option<NamespaceUri>,
    /// Local name
    pub local_name: String,
}

impl QName {
    /// Create a new QName
    pub fn new(namespace: Option<impl Into<String>>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(|s| s.into()),
            local_name: local_name.into(),
        }
    }

    /// Create a QName without a namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local_name: local_name.into(),
        }
    }

    /// Create a QName with a namespace
    pub fn namespaced(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local_name: local_name.into(),
        }
    }

    /// Namespace as a cache key ("" for no namespace)
    pub fn namespace_key(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}

/// Namespace context for resolving prefixes
#[derive(Debug, Clone, Default)]
pub struct NamespaceContext {
    /// Mapping from prefix to namespace URI
    prefixes: HashMap<Prefix, NamespaceUri>,
    /// Default namespace (no prefix)
    default_namespace: Option<NamespaceUri>,
}

impl NamespaceContext {
    /// Create a new empty namespace context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a namespace prefix mapping
    pub fn add_prefix(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        self.prefixes.insert(prefix.into(), namespace.into());
    }

    /// Set the default namespace
    pub fn set_default_namespace(&mut self, namespace: impl Into<String>) {
        self.default_namespace = Some(namespace.into());
    }

    /// Get the namespace for a prefix
    pub fn get_namespace(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(|s| s.as_str())
    }

    /// Get the default namespace
    pub fn get_default_namespace(&self) -> Option<&str> {
        self.default_namespace.as_deref()
    }

    /// Resolve a prefixed name to a QName
    pub fn resolve(&self, prefixed_name: &str) -> Result<QName> {
        if let Some((prefix, local)) = prefixed_name.split_once(':') {
            let namespace = self
                .get_namespace(prefix)
                .ok_or_else(|| Error::Namespace(format!("Unknown prefix: {}", prefix)))?;
            Ok(QName::namespaced(namespace, local))
        } else {
            Ok(QName::new(self.default_namespace.clone(), prefixed_name))
        }
    }
}

/// One in-scope namespace binding
#[derive(Debug, Clone)]
struct Binding {
    prefix: Option<Prefix>,
    /// Empty string undeclares the default namespace
    uri: NamespaceUri,
}

/// Stack of namespace bindings following element nesting
///
/// Each element pushes a frame with the `xmlns` declarations found on its
/// start tag; lookups walk the frames from innermost to outermost.
#[derive(Debug, Default)]
pub struct NamespaceScopes {
    bindings: Vec<Binding>,
    frames: Vec<usize>,
}

impl NamespaceScopes {
    /// Create an empty scope stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new element scope
    pub fn push_frame(&mut self) {
        self.frames.push(self.bindings.len());
    }

    /// Close the innermost element scope
    pub fn pop_frame(&mut self) {
        if let Some(start) = self.frames.pop() {
            self.bindings.truncate(start);
        }
    }

    /// Declare a binding in the innermost scope
    pub fn declare(&mut self, prefix: Option<&str>, uri: &str) -> Result<()> {
        match prefix {
            Some("xml") if uri != XML_NAMESPACE => {
                return Err(Error::Namespace(
                    "prefix 'xml' cannot be rebound".to_string(),
                ))
            }
            Some("xmlns") => {
                return Err(Error::Namespace(
                    "prefix 'xmlns' cannot be declared".to_string(),
                ))
            }
            Some(p) if uri.is_empty() => {
                return Err(Error::Namespace(format!(
                    "prefix '{}' cannot be bound to an empty namespace",
                    p
                )))
            }
            _ => {}
        }
        if uri == XMLNS_NAMESPACE {
            return Err(Error::Namespace(format!(
                "namespace '{}' cannot be bound",
                XMLNS_NAMESPACE
            )));
        }
        self.bindings.push(Binding {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
        });
        Ok(())
    }

    /// Look up the namespace bound to a prefix (None = default namespace)
    pub fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix.as_deref() == prefix)
            .map(|b| b.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Resolve an element name (unprefixed names take the default namespace)
    pub fn resolve_element(&self, raw: &str) -> Result<(Option<Prefix>, QName)> {
        self.resolve(raw, true)
    }

    /// Resolve an attribute name (unprefixed names have no namespace)
    pub fn resolve_attribute(&self, raw: &str) -> Result<(Option<Prefix>, QName)> {
        self.resolve(raw, false)
    }

    fn resolve(&self, raw: &str, use_default: bool) -> Result<(Option<Prefix>, QName)> {
        match raw.split_once(':') {
            Some((prefix, local)) => {
                if prefix.is_empty() || local.is_empty() || local.contains(':') {
                    return Err(Error::Namespace(format!("malformed qualified name '{}'", raw)));
                }
                let ns = self
                    .lookup(Some(prefix))
                    .ok_or_else(|| Error::Namespace(format!("unbound prefix '{}' in '{}'", prefix, raw)))?;
                Ok((Some(prefix.to_string()), QName::namespaced(ns, local)))
            }
            None if use_default => Ok((None, QName::new(self.lookup(None), raw))),
            None => Ok((None, QName::local(raw))),
        }
    }

    /// Snapshot of the bindings currently in scope
    pub fn context(&self) -> NamespaceContext {
        let mut ctx = NamespaceContext::new();
        for binding in &self.bindings {
            match &binding.prefix {
                Some(p) => ctx.add_prefix(p.clone(), binding.uri.clone()),
                None => ctx.set_default_namespace(binding.uri.clone()),
            }
        }
        ctx
    }
}
