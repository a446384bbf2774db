//! XML Catalog support for entity and schema resolution
//!
//! OASIS XML Catalogs map public and system identifiers to local files. A
//! catalog backs [`crate::resolver::ResolutionPolicy::Catalog`]: only
//! identifiers the catalog maps are allowed, and they are redirected to the
//! mapped local copy.
//!
//! # Supported Elements
//!
//! - `<catalog>` - Root element
//! - `<group>` - Grouping element (honours `xml:base`)
//! - `<system>` - Maps system identifiers to URIs
//! - `<public>` - Maps public identifiers to URIs
//! - `<uri>` - Maps URN names to URIs
//! - `<nextCatalog>` - Includes another catalog file

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, ParseError, Result};
use crate::XML_NAMESPACE;

/// Maximum `<nextCatalog>` chain length
const MAX_CATALOG_DEPTH: usize = 16;

/// XML Catalog for resolving entity and schema locations
#[derive(Debug, Clone, Default)]
pub struct XmlCatalog {
    /// System ID to URI mappings (systemId -> uri)
    system_mappings: HashMap<String, String>,
    /// Public ID to URI mappings (publicId -> uri)
    public_mappings: HashMap<String, String>,
    /// URI name to URI mappings (name -> uri)
    uri_mappings: HashMap<String, String>,
}

impl XmlCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a file
    ///
    /// This will recursively load any catalogs referenced via `<nextCatalog>`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut catalog = Self::new();
        catalog.load_file(path.as_ref(), 0)?;
        Ok(catalog)
    }

    /// Parse catalog text, resolving relative URIs against `base_dir`
    pub fn parse_str(xml: &str, base_dir: Option<&Path>) -> Result<Self> {
        let mut catalog = Self::new();
        catalog.parse_catalog(xml, base_dir, 0)?;
        Ok(catalog)
    }

    fn load_file(&mut self, path: &Path, depth: usize) -> Result<()> {
        if depth > MAX_CATALOG_DEPTH {
            return Err(Error::LimitExceeded(format!(
                "catalog chain deeper than {} at '{}'",
                MAX_CATALOG_DEPTH,
                path.display()
            )));
        }
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Resource(format!("Failed to read catalog '{}': {}", path.display(), e))
        })?;
        let base_dir = path.parent().map(|p| p.to_path_buf());
        self.parse_catalog(&content, base_dir.as_deref(), depth)
    }

    /// Parse catalog XML content
    fn parse_catalog(&mut self, xml: &str, base_dir: Option<&Path>, depth: usize) -> Result<()> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| Error::Schema(ParseError::new(format!("invalid catalog: {}", e))))?;
        let root = doc.root_element();

        if root.tag_name().name() != "catalog" {
            return Err(Error::Schema(ParseError::new(format!(
                "Expected catalog root element, got {}",
                root.tag_name().name()
            ))));
        }

        self.process_children(root, base_dir, depth)
    }

    /// Process children of a catalog or group element
    fn process_children(
        &mut self,
        parent: roxmltree::Node<'_, '_>,
        base_dir: Option<&Path>,
        depth: usize,
    ) -> Result<()> {
        for child in parent.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "system" => {
                    if let (Some(id), Some(uri)) = (child.attribute("systemId"), child.attribute("uri")) {
                        self.system_mappings.insert(id.to_string(), resolve(base_dir, uri));
                    }
                }
                "public" => {
                    if let (Some(id), Some(uri)) = (child.attribute("publicId"), child.attribute("uri")) {
                        self.public_mappings.insert(id.to_string(), resolve(base_dir, uri));
                    }
                }
                "uri" => {
                    if let (Some(name), Some(uri)) = (child.attribute("name"), child.attribute("uri")) {
                        self.uri_mappings.insert(name.to_string(), resolve(base_dir, uri));
                    }
                }
                "nextCatalog" => {
                    if let Some(catalog_path) = child.attribute("catalog") {
                        let path = PathBuf::from(resolve(base_dir, catalog_path));
                        if let Err(e) = self.load_file(&path, depth + 1) {
                            log::warn!("skipping next catalog '{}': {}", path.display(), e);
                        }
                    }
                }
                "group" => {
                    let group_base = child
                        .attribute((XML_NAMESPACE, "base"))
                        .map(|b| PathBuf::from(resolve(base_dir, b)));
                    self.process_children(child, group_base.as_deref().or(base_dir), depth)?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Add a system identifier mapping
    pub fn add_system(&mut self, system_id: impl Into<String>, uri: impl Into<String>) {
        self.system_mappings.insert(system_id.into(), uri.into());
    }

    /// Resolve an external identifier using the catalog
    ///
    /// System mappings win over public mappings, which win over URI names.
    pub fn resolve(&self, public_id: Option<&str>, system_id: &str) -> Option<&str> {
        if let Some(uri) = self.system_mappings.get(system_id) {
            return Some(uri);
        }

        if let Some(uri) = public_id.and_then(|p| self.public_mappings.get(p)) {
            return Some(uri);
        }

        self.uri_mappings.get(system_id).map(|s| s.as_str())
    }

    /// Check if this catalog is empty (has no mappings)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the number of mappings
    pub fn len(&self) -> usize {
        self.system_mappings.len() + self.public_mappings.len() + self.uri_mappings.len()
    }

    /// Merge another catalog into this one; existing entries win
    pub fn merge(&mut self, other: &XmlCatalog) {
        for (k, v) in &other.system_mappings {
            self.system_mappings.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.public_mappings {
            self.public_mappings.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.uri_mappings {
            self.uri_mappings.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

fn resolve(base_dir: Option<&Path>, uri: &str) -> String {
    let uri = uri.strip_prefix("file://").unwrap_or(uri);
    match base_dir {
        Some(base) if !Path::new(uri).is_absolute() => base.join(uri).to_string_lossy().to_string(),
        _ => uri.to_string(),
    }
}
