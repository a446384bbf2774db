//! Grammar cache
//!
//! Compiled grammars keyed by target namespace, shared read-mostly between
//! parser instances.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::encoding::Encoding;
use crate::error::{Error, ParseError, Result};
use crate::limits::Limits;
use crate::loaders::Loader;
use crate::locations::Location;
use crate::resolver::ResolutionPolicy;
use crate::validators::grammar::CompiledGrammar;

/// Namespace URI ("" for none) to compiled grammar
///
/// A namespace is compiled at most once per cache. Lookups take a shared lock
/// and compilations are serialized, so a cache can sit behind an `Arc` and
/// serve many parsers.
#[derive(Debug, Default)]
pub struct GrammarCache {
    grammars: RwLock<HashMap<String, Arc<CompiledGrammar>>>,
    compile_lock: Mutex<()>,
    compiles: AtomicUsize,
    policy: ResolutionPolicy,
    limits: Limits,
}

impl GrammarCache {
    /// Create an empty cache; schema includes and imports are denied
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache fetching includes and imports through `policy`
    pub fn with_policy(policy: ResolutionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Set the limits applied while compiling
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Resolution policy for schema includes and imports
    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Compile `source` for `namespace` unless it is already cached
    pub fn compile_and_store(&self, namespace: &str, source: &str) -> Result<Arc<CompiledGrammar>> {
        self.compile_source(namespace, source, None)
    }

    /// Compile a schema file under its own target namespace
    pub fn compile_file(&self, path: impl AsRef<Path>) -> Result<Arc<CompiledGrammar>> {
        let path = path.as_ref();
        let loader = Loader::new().with_limits(self.limits.clone());
        let bytes = loader.load_bytes(&Location::Path(path.to_path_buf()))?;
        let text = Encoding::detect(&bytes)?.decode(&bytes)?;

        let namespace = roxmltree::Document::parse(&text)
            .map_err(|e| {
                Error::Schema(
                    ParseError::new(format!("invalid schema document: {}", e))
                        .with_source(path.display().to_string()),
                )
            })?
            .root_element()
            .attribute("targetNamespace")
            .unwrap_or("")
            .to_string();

        let system_id = path.display().to_string();
        self.compile_source(&namespace, &text, Some(&system_id))
    }

    fn compile_source(
        &self,
        namespace: &str,
        source: &str,
        system_id: Option<&str>,
    ) -> Result<Arc<CompiledGrammar>> {
        if let Some(grammar) = self.get(namespace) {
            return Ok(grammar);
        }

        let _guard = self
            .compile_lock
            .lock()
            .map_err(|_| Error::Other("grammar cache compile lock poisoned".to_string()))?;
        if let Some(grammar) = self.get(namespace) {
            return Ok(grammar);
        }

        let grammar = CompiledGrammar::compile(source, system_id, &self.policy, &self.limits)?;
        if grammar.target_namespace() != namespace {
            return Err(Error::Schema(ParseError::new(format!(
                "schema targetNamespace '{}' does not match requested namespace '{}'",
                grammar.target_namespace(),
                namespace
            ))));
        }

        let grammar = Arc::new(grammar);
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.grammars
            .write()
            .map_err(|_| Error::Other("grammar cache lock poisoned".to_string()))?
            .insert(namespace.to_string(), Arc::clone(&grammar));
        log::debug!("cached grammar for namespace '{}'", namespace);
        Ok(grammar)
    }

    /// Get the grammar for `namespace`
    pub fn lookup(&self, namespace: &str) -> Result<Arc<CompiledGrammar>> {
        self.get(namespace)
            .ok_or_else(|| Error::SchemaNotFound(namespace.to_string()))
    }

    /// Get the grammar for `namespace`, if cached
    pub fn get(&self, namespace: &str) -> Option<Arc<CompiledGrammar>> {
        self.grammars.read().ok()?.get(namespace).cloned()
    }

    /// Whether a grammar is cached for `namespace`
    pub fn contains(&self, namespace: &str) -> bool {
        self.get(namespace).is_some()
    }

    /// Cached namespaces, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .grammars
            .read()
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default();
        namespaces.sort();
        namespaces
    }

    /// Number of cached grammars
    pub fn len(&self) -> usize {
        self.grammars.read().map(|g| g.len()).unwrap_or(0)
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached grammar
    pub fn clear(&self) {
        if let Ok(mut grammars) = self.grammars.write() {
            grammars.clear();
        }
    }

    /// Number of compilations performed by this cache
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    targetNamespace="urn:cache" elementFormDefault="qualified">
  <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

    #[test]
    fn test_compile_is_idempotent() {
        let cache = GrammarCache::new();
        let first = cache.compile_and_store("urn:cache", SCHEMA).unwrap();
        let second = cache.compile_and_store("urn:cache", SCHEMA).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.compile_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lookup_miss() {
        let cache = GrammarCache::new();
        assert!(matches!(cache.lookup("urn:none"), Err(Error::SchemaNotFound(ns)) if ns == "urn:none"));
    }

    #[test]
    fn test_namespace_mismatch() {
        let cache = GrammarCache::new();
        assert!(cache.compile_and_store("urn:other", SCHEMA).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.compile_count(), 0);
    }

    #[test]
    fn test_compile_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.xsd");
        std::fs::write(&path, SCHEMA).unwrap();

        let cache = GrammarCache::new();
        cache.compile_file(&path).unwrap();
        assert_eq!(cache.namespaces(), vec!["urn:cache".to_string()]);

        cache.clear();
        assert!(!cache.contains("urn:cache"));
    }

    #[test]
    fn test_concurrent_lookups() {
        let cache = Arc::new(GrammarCache::new());
        cache.compile_and_store("urn:cache", SCHEMA).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.lookup("urn:cache").is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.compile_count(), 1);
    }
}
