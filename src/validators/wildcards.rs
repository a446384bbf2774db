//! XSD wildcards
//!
//! `xs:any` and `xs:anyAttribute`: which namespaces a wildcard admits and how
//! matched content is processed.

use std::collections::HashSet;
use std::fmt;

use crate::error::ParseError;

/// Process contents mode for wildcards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessContents {
    /// Validate strictly - element/attribute must be declared
    #[default]
    Strict,
    /// Validate if declaration found, otherwise accept
    Lax,
    /// Skip validation entirely
    Skip,
}

impl ProcessContents {
    /// Parse from string value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Lax => write!(f, "lax"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Namespace constraint for wildcards
///
/// The empty string stands for "no namespace".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamespaceConstraint {
    /// Any namespace is allowed (##any)
    #[default]
    Any,
    /// Any namespace except the target namespace and no namespace (##other)
    Other {
        /// The target namespace to exclude
        target_namespace: String,
    },
    /// Specific set of allowed namespaces
    Enumeration(HashSet<String>),
}

impl NamespaceConstraint {
    /// Create from namespace attribute value
    pub fn from_namespace_attr(value: &str, target_namespace: &str) -> Result<Self, ParseError> {
        match value.trim() {
            "##any" => Ok(Self::Any),
            "##other" => Ok(Self::Other {
                target_namespace: target_namespace.to_string(),
            }),
            list => {
                let mut namespaces = HashSet::new();
                for ns in list.split_whitespace() {
                    match ns {
                        "##local" => {
                            namespaces.insert(String::new());
                        }
                        "##targetNamespace" => {
                            namespaces.insert(target_namespace.to_string());
                        }
                        s if s.starts_with("##") => {
                            return Err(ParseError::new(format!(
                                "wrong value '{}' in 'namespace' attribute",
                                s
                            )));
                        }
                        s => {
                            namespaces.insert(s.to_string());
                        }
                    }
                }
                Ok(Self::Enumeration(namespaces))
            }
        }
    }

    /// Whether a namespace ("" for none) is admitted
    pub fn allows(&self, namespace: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Other { target_namespace } => {
                !namespace.is_empty() && namespace != target_namespace
            }
            Self::Enumeration(set) => set.contains(namespace),
        }
    }
}

/// An `xs:any` or `xs:anyAttribute` wildcard
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Wildcard {
    /// Admitted namespaces
    pub namespaces: NamespaceConstraint,
    /// How matched content is validated
    pub process_contents: ProcessContents,
}

impl Wildcard {
    /// Build from the `namespace` and `processContents` attributes
    pub fn parse(
        namespace: Option<&str>,
        process_contents: Option<&str>,
        target_namespace: &str,
    ) -> Result<Self, ParseError> {
        let namespaces = match namespace {
            Some(value) => NamespaceConstraint::from_namespace_attr(value, target_namespace)?,
            None => NamespaceConstraint::Any,
        };
        let process_contents = match process_contents {
            Some(value) => ProcessContents::from_str(value).ok_or_else(|| {
                ParseError::new(format!("wrong value '{}' in 'processContents' attribute", value))
            })?,
            None => ProcessContents::Strict,
        };
        Ok(Self {
            namespaces,
            process_contents,
        })
    }

    /// Whether a namespace ("" for none) is admitted
    pub fn allows(&self, namespace: &str) -> bool {
        self.namespaces.allows(namespace)
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespaces {
            NamespaceConstraint::Any => write!(f, "any element"),
            NamespaceConstraint::Other { .. } => write!(f, "any element from another namespace"),
            NamespaceConstraint::Enumeration(set) => {
                let mut names: Vec<&str> = set
                    .iter()
                    .map(|s| if s.is_empty() { "##local" } else { s.as_str() })
                    .collect();
                names.sort_unstable();
                write!(f, "any element from [{}]", names.join(", "))
            }
        }
    }
}
