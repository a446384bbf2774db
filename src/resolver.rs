//! Entity resolution policy
//!
//! Every external reference met while parsing (external general and parameter
//! entities, the external DTD subset, schema includes and imports) is put to a
//! [`ResolutionPolicy`] before any file or network access happens. The default
//! policy denies everything.
//!
//! Resolution is split in two steps: [`ResolutionPolicy::decide`] is a pure
//! check that never touches the filesystem, and [`ResolutionPolicy::resolve`]
//! fetches the content of an allowed reference through a [`Loader`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::XmlCatalog;
use crate::error::{Error, Result};
use crate::loaders::Loader;
use crate::locations::{normalize_path, Location};

/// What kind of construct an external reference comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// External general entity referenced from content
    GeneralEntity,
    /// External parameter entity referenced from the DTD
    ParameterEntity,
    /// External DTD subset named by the DOCTYPE
    ExternalSubset,
    /// `xs:include` or `xs:redefine` schema location
    SchemaInclude,
    /// `xs:import` schema location
    SchemaImport,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferenceKind::GeneralEntity => "external entity",
            ReferenceKind::ParameterEntity => "external parameter entity",
            ReferenceKind::ExternalSubset => "external DTD subset",
            ReferenceKind::SchemaInclude => "schema include",
            ReferenceKind::SchemaImport => "schema import",
        };
        f.write_str(s)
    }
}

/// One external reference awaiting a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReference {
    /// Public identifier, if declared
    pub public_id: Option<String>,
    /// System identifier (URI or path) as written
    pub system_id: String,
    /// System identifier of the referencing document, if known
    pub context: Option<String>,
    /// Origin of the reference
    pub kind: ReferenceKind,
}

impl EntityReference {
    /// Create a reference without public id or context
    pub fn new(system_id: impl Into<String>, kind: ReferenceKind) -> Self {
        Self {
            public_id: None,
            system_id: system_id.into(),
            context: None,
            kind,
        }
    }

    /// Set the public identifier
    pub fn with_public_id(mut self, public_id: Option<String>) -> Self {
        self.public_id = public_id;
        self
    }

    /// Set the referencing document
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Directory that relative system identifiers are resolved against
    fn base_dir(&self) -> Option<PathBuf> {
        let context = self.context.as_deref()?;
        match Location::from_system_id(context, None) {
            Location::Path(path) => path.parent().map(Path::to_path_buf),
            _ => None,
        }
    }

    /// Where the system identifier points, relative to the context
    pub fn location(&self) -> Location {
        let base = self.base_dir();
        Location::from_system_id(&self.system_id, base.as_deref())
    }
}

/// Content substituted for an allowed reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Content still to be read from this location
    Location(Location),
    /// Content already in memory
    Bytes {
        /// System identifier reported for the content
        system_id: String,
        /// Raw bytes
        content: Vec<u8>,
    },
}

impl InputSource {
    /// System identifier of the substituted content
    pub fn system_id(&self) -> String {
        match self {
            InputSource::Location(location) => location.to_string(),
            InputSource::Bytes { system_id, .. } => system_id.clone(),
        }
    }
}

/// Result of putting a reference to the policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The reference may be substituted with this source
    Resolved(InputSource),
    /// The reference must not be fetched
    Denied {
        /// Why the policy refused
        reason: String,
    },
}

impl ResolutionOutcome {
    /// Shorthand for a denial
    pub fn denied(reason: impl Into<String>) -> Self {
        ResolutionOutcome::Denied {
            reason: reason.into(),
        }
    }

    /// Whether the reference was denied
    pub fn is_denied(&self) -> bool {
        matches!(self, ResolutionOutcome::Denied { .. })
    }
}

/// Caller supplied resolution strategy
///
/// Implemented for every `Fn(Option<&str>, &str) -> ResolutionOutcome`
/// closure that is `Send + Sync`. Resolvers run inline on the parsing thread;
/// one that blocks on the network must apply its own timeout.
pub trait EntityResolver: Send + Sync {
    /// Decide on the reference `(public_id, system_id)`
    fn resolve_entity(&self, public_id: Option<&str>, system_id: &str) -> ResolutionOutcome;
}

impl<F> EntityResolver for F
where
    F: Fn(Option<&str>, &str) -> ResolutionOutcome + Send + Sync,
{
    fn resolve_entity(&self, public_id: Option<&str>, system_id: &str) -> ResolutionOutcome {
        self(public_id, system_id)
    }
}

/// Which external references may be fetched
#[derive(Clone, Default)]
pub enum ResolutionPolicy {
    /// Refuse every external reference
    #[default]
    DenyAll,
    /// Allow only local files inside this directory
    AllowLocal(PathBuf),
    /// Allow only these exact system identifiers
    AllowList(HashSet<String>),
    /// Allow only identifiers mapped by the catalog, redirected to the mapping
    Catalog(XmlCatalog),
    /// Delegate to a caller supplied resolver
    Custom(Arc<dyn EntityResolver>),
}

impl fmt::Debug for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionPolicy::DenyAll => write!(f, "DenyAll"),
            ResolutionPolicy::AllowLocal(dir) => f.debug_tuple("AllowLocal").field(dir).finish(),
            ResolutionPolicy::AllowList(set) => f.debug_tuple("AllowList").field(set).finish(),
            ResolutionPolicy::Catalog(catalog) => {
                write!(f, "Catalog({} mappings)", catalog.len())
            }
            ResolutionPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl ResolutionPolicy {
    /// Allow local files under `base_dir`
    pub fn allow_local(base_dir: impl Into<PathBuf>) -> Self {
        ResolutionPolicy::AllowLocal(base_dir.into())
    }

    /// Allow an explicit set of system identifiers
    pub fn allow_list<I, S>(system_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ResolutionPolicy::AllowList(system_ids.into_iter().map(Into::into).collect())
    }

    /// Use a caller supplied resolver
    pub fn custom(resolver: impl EntityResolver + 'static) -> Self {
        ResolutionPolicy::Custom(Arc::new(resolver))
    }

    /// Decide on a reference without performing any I/O
    pub fn decide(&self, reference: &EntityReference) -> ResolutionOutcome {
        match self {
            ResolutionPolicy::DenyAll => ResolutionOutcome::denied(format!(
                "{} '{}' denied: external resolution is disabled",
                reference.kind, reference.system_id
            )),
            ResolutionPolicy::AllowLocal(base_dir) => decide_local(base_dir, reference),
            ResolutionPolicy::AllowList(allowed) => {
                if allowed.contains(&reference.system_id) {
                    ResolutionOutcome::Resolved(InputSource::Location(reference.location()))
                } else {
                    ResolutionOutcome::denied(format!(
                        "{} '{}' is not in the allow list",
                        reference.kind, reference.system_id
                    ))
                }
            }
            ResolutionPolicy::Catalog(catalog) => {
                match catalog.resolve(reference.public_id.as_deref(), &reference.system_id) {
                    Some(mapped) => ResolutionOutcome::Resolved(InputSource::Location(
                        Location::from_system_id(mapped, None),
                    )),
                    None => ResolutionOutcome::denied(format!(
                        "{} '{}' is not mapped by the catalog",
                        reference.kind, reference.system_id
                    )),
                }
            }
            ResolutionPolicy::Custom(resolver) => {
                resolver.resolve_entity(reference.public_id.as_deref(), &reference.system_id)
            }
        }
    }

    /// Decide on a reference and, when allowed, fetch its content
    ///
    /// An allowed outcome always carries [`InputSource::Bytes`]. Fetch failures
    /// (missing files, remote locations) are returned as errors.
    pub fn resolve(&self, reference: &EntityReference, loader: &Loader) -> Result<ResolutionOutcome> {
        let source = match self.decide(reference) {
            ResolutionOutcome::Resolved(source) => source,
            denied => {
                log::debug!("denied {} '{}'", reference.kind, reference.system_id);
                return Ok(denied);
            }
        };

        match source {
            InputSource::Bytes { .. } => Ok(ResolutionOutcome::Resolved(source)),
            InputSource::Location(location) => {
                if let (ResolutionPolicy::AllowLocal(base_dir), Location::Path(path)) =
                    (self, &location)
                {
                    if let Some(reason) = escapes_via_links(base_dir, path)? {
                        return Ok(ResolutionOutcome::Denied { reason });
                    }
                }
                log::debug!("fetching {} '{}'", reference.kind, location);
                let content = loader.load_bytes(&location)?;
                Ok(ResolutionOutcome::Resolved(InputSource::Bytes {
                    system_id: location.to_string(),
                    content,
                }))
            }
        }
    }
}

fn decide_local(base_dir: &Path, reference: &EntityReference) -> ResolutionOutcome {
    let base = normalize_path(base_dir).unwrap_or_else(|| base_dir.to_path_buf());
    let path = match Location::from_system_id(&reference.system_id, None) {
        Location::Path(path) if path.is_absolute() => path,
        Location::Path(path) => reference
            .base_dir()
            .unwrap_or_else(|| base.clone())
            .join(path),
        other => {
            return ResolutionOutcome::denied(format!(
                "{} '{}' is not a local file",
                reference.kind, other
            ))
        }
    };

    match normalize_path(&path) {
        Some(normalized) if normalized.starts_with(&base) => {
            ResolutionOutcome::Resolved(InputSource::Location(Location::Path(normalized)))
        }
        _ => ResolutionOutcome::denied(format!(
            "{} '{}' resolves outside '{}'",
            reference.kind,
            reference.system_id,
            base_dir.display()
        )),
    }
}

/// Re-check an allowed path after resolving symbolic links
fn escapes_via_links(base_dir: &Path, path: &Path) -> Result<Option<String>> {
    let base = base_dir.canonicalize().map_err(|e| {
        Error::Resource(format!("cannot open base directory '{}': {}", base_dir.display(), e))
    })?;
    let target = path
        .canonicalize()
        .map_err(|e| Error::Resource(format!("Failed to read file '{}': {}", path.display(), e)))?;
    if target.starts_with(&base) {
        Ok(None)
    } else {
        Ok(Some(format!(
            "'{}' links outside '{}'",
            path.display(),
            base_dir.display()
        )))
    }
}

/// Per-parse memo of resolution outcomes
///
/// The policy is consulted at most once for each distinct
/// `(public id, system id)` pair; repeats get the memoized outcome.
#[derive(Debug)]
pub struct ResolutionSession<'p> {
    policy: &'p ResolutionPolicy,
    loader: Loader,
    memo: HashMap<(Option<String>, String), std::result::Result<ResolutionOutcome, String>>,
}

impl<'p> ResolutionSession<'p> {
    /// Start a session over a policy
    pub fn new(policy: &'p ResolutionPolicy, loader: Loader) -> Self {
        Self {
            policy,
            loader,
            memo: HashMap::new(),
        }
    }

    /// Resolve a reference, consulting the policy only on first sight
    pub fn resolve(&mut self, reference: &EntityReference) -> Result<ResolutionOutcome> {
        let key = (reference.public_id.clone(), reference.system_id.clone());
        let policy = self.policy;
        let loader = &self.loader;
        let entry = self.memo.entry(key).or_insert_with(|| {
            policy
                .resolve(reference, loader)
                .map_err(|e| e.to_string())
        });
        entry.clone().map_err(Error::Resource)
    }

    /// Number of distinct references put to the policy
    pub fn consulted(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn general(system_id: &str) -> EntityReference {
        EntityReference::new(system_id, ReferenceKind::GeneralEntity)
    }

    #[test]
    fn test_deny_all_is_default() {
        let policy = ResolutionPolicy::default();
        let outcome = policy.decide(&general("http://example.invalid/secret"));
        assert!(outcome.is_denied());
        let outcome = policy.resolve(&general("/etc/passwd"), &Loader::new()).unwrap();
        assert!(outcome.is_denied());
    }

    #[test]
    fn test_allow_local_rejects_traversal() {
        let policy = ResolutionPolicy::allow_local("/srv/ents");
        assert!(!policy.decide(&general("/srv/ents/a.ent")).is_denied());
        assert!(!policy.decide(&general("sub/a.ent")).is_denied());
        assert!(policy.decide(&general("../secret")).is_denied());
        assert!(policy.decide(&general("/srv/ents/../../etc/passwd")).is_denied());
        assert!(policy.decide(&general("/etc/passwd")).is_denied());
        assert!(policy.decide(&general("http://example.invalid/a.ent")).is_denied());
    }

    #[test]
    fn test_allow_local_resolves_relative_to_context() {
        let policy = ResolutionPolicy::allow_local("/srv/ents");
        let reference = general("b.ent").with_context(Some("/srv/ents/docs/doc.xml".to_string()));
        match policy.decide(&reference) {
            ResolutionOutcome::Resolved(InputSource::Location(Location::Path(p))) => {
                assert_eq!(p, PathBuf::from("/srv/ents/docs/b.ent"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_allow_local_fetches_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ent"), "hello").unwrap();
        let policy = ResolutionPolicy::allow_local(dir.path());
        let outcome = policy.resolve(&general("a.ent"), &Loader::new()).unwrap();
        match outcome {
            ResolutionOutcome::Resolved(InputSource::Bytes { content, .. }) => {
                assert_eq!(content, b"hello")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_allow_local_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), "top secret").unwrap();
        let base = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), base.path().join("link.ent"))
            .unwrap();

        let policy = ResolutionPolicy::allow_local(base.path());
        let outcome = policy.resolve(&general("link.ent"), &Loader::new()).unwrap();
        assert!(outcome.is_denied());
    }

    #[test]
    fn test_allow_list_is_exact() {
        let policy = ResolutionPolicy::allow_list(["urn:a"]);
        assert!(!policy.decide(&general("urn:a")).is_denied());
        assert!(policy.decide(&general("urn:a2")).is_denied());
    }

    #[test]
    fn test_allowed_remote_fails_to_fetch() {
        let policy = ResolutionPolicy::allow_list(["http://example.invalid/x"]);
        let result = policy.resolve(&general("http://example.invalid/x"), &Loader::new());
        assert!(matches!(result, Err(Error::Resource(_))));
    }

    #[test]
    fn test_catalog_policy_redirects() {
        let mut catalog = XmlCatalog::new();
        catalog.add_system("http://example.com/names.ent", "/local/names.ent");
        let policy = ResolutionPolicy::Catalog(catalog);
        match policy.decide(&general("http://example.com/names.ent")) {
            ResolutionOutcome::Resolved(source) => assert_eq!(source.system_id(), "/local/names.ent"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(policy.decide(&general("http://example.com/other.ent")).is_denied());
    }

    #[test]
    fn test_session_consults_policy_once_per_reference() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let policy = ResolutionPolicy::custom(move |_public: Option<&str>, system: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            ResolutionOutcome::Resolved(InputSource::Bytes {
                system_id: system.to_string(),
                content: b"text".to_vec(),
            })
        });

        let mut session = ResolutionSession::new(&policy, Loader::new());
        for _ in 0..3 {
            assert!(!session.resolve(&general("urn:x")).unwrap().is_denied());
        }
        session.resolve(&general("urn:y")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.consulted(), 2);
    }

    #[test]
    fn test_session_memoizes_failures() {
        let policy = ResolutionPolicy::allow_list(["http://example.invalid/x"]);
        let mut session = ResolutionSession::new(&policy, Loader::new());
        assert!(session.resolve(&general("http://example.invalid/x")).is_err());
        assert!(session.resolve(&general("http://example.invalid/x")).is_err());
        assert_eq!(session.consulted(), 1);
    }
}
