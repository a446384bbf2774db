//! XML Schema validators
//!
//! The supported XSD subset: built-in simple types, facets, wildcards and
//! content models, grammar compilation, the shared grammar cache and tree
//! validation.

pub mod builtins;
pub mod cache;
pub mod document_validation;
pub mod facets;
pub mod grammar;
pub mod particles;
pub mod wildcards;

// Re-exports
pub use builtins::{get_builtin_type, validate_builtin, BuiltinType, XsdValue};
pub use cache::GrammarCache;
pub use document_validation::validate_document;
pub use facets::{Facet, WhiteSpace};
pub use grammar::{CompiledGrammar, ElementDecl, TypeDef, TypeId};
pub use particles::{Compositor, ModelGroup, Occurs, Particle};
pub use wildcards::{ProcessContents, Wildcard};
