//! XSD particles and content model matching
//!
//! A complex type's content model is a tree of particles: element
//! declarations, wildcards and model groups (`sequence`, `choice`, `all`),
//! each with occurrence bounds.
//!
//! Matching tracks the *set* of child positions a particle can end at instead
//! of backtracking, so every content model is checked in polynomial time.
//! Children are tied to their declarations by name alone, which is sound
//! because XSD requires element declarations with the same name inside one
//! content model to agree on their type.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::error::{ParseError, Result};
use crate::namespaces::QName;
use crate::validators::wildcards::Wildcard;

/// Occurrence bounds for a particle (minOccurs, maxOccurs)
/// None for max means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurs {
    /// Minimum number of occurrences (default 1)
    pub min: u32,
    /// Maximum number of occurrences (None = unbounded, default 1)
    pub max: Option<u32>,
}

impl Occurs {
    /// Create new occurrence bounds
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    /// Default occurrence (1, 1)
    pub fn once() -> Self {
        Self { min: 1, max: Some(1) }
    }

    /// Check if this particle can be empty (minOccurs == 0)
    pub fn is_emptiable(&self) -> bool {
        self.min == 0
    }

    /// Check if this particle is empty (maxOccurs == 0)
    pub fn is_empty(&self) -> bool {
        self.max == Some(0)
    }
}

impl Default for Occurs {
    fn default() -> Self {
        Self::once()
    }
}

impl fmt::Display for Occurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..unbounded", self.min),
        }
    }
}

/// Parse minOccurs/maxOccurs from XML attribute values
pub fn parse_occurs(min_occurs: Option<&str>, max_occurs: Option<&str>) -> Result<Occurs> {
    let mut occurs = Occurs::once();

    if let Some(min_str) = min_occurs {
        occurs.min = min_str.trim().parse::<u32>().map_err(|_| {
            ParseError::new(format!(
                "minOccurs value '{}' is not a valid non-negative integer",
                min_str
            ))
        })?;
    }

    match max_occurs.map(str::trim) {
        Some("unbounded") => occurs.max = None,
        Some(max_str) => {
            let max = max_str.parse::<u32>().map_err(|_| {
                ParseError::new(format!(
                    "maxOccurs value '{}' must be a non-negative integer or 'unbounded'",
                    max_str
                ))
            })?;
            if occurs.min > max {
                return Err(ParseError::new("maxOccurs must be 'unbounded' or greater than minOccurs").into());
            }
            occurs.max = Some(max);
        }
        None if occurs.min > 1 => {
            return Err(ParseError::new("minOccurs must be lesser or equal than maxOccurs").into())
        }
        None => {}
    }

    Ok(occurs)
}

/// Index of an element declaration in its grammar
pub type ElementId = usize;

/// Model group compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compositor {
    /// Children in the given order
    Sequence,
    /// Exactly one alternative
    Choice,
    /// Each member at most once, in any order
    All,
}

/// What a particle matches
#[derive(Debug, Clone)]
pub enum Term {
    /// An element declaration
    Element {
        /// Expanded element name
        name: QName,
        /// Declaration in the owning grammar
        id: ElementId,
    },
    /// An `xs:any` wildcard
    Any(Wildcard),
    /// A nested model group
    Group(ModelGroup),
}

/// A term with occurrence bounds
#[derive(Debug, Clone)]
pub struct Particle {
    /// Matched term
    pub term: Term,
    /// Occurrence bounds
    pub occurs: Occurs,
}

/// A `sequence`, `choice` or `all` group
#[derive(Debug, Clone)]
pub struct ModelGroup {
    /// Compositor
    pub compositor: Compositor,
    /// Member particles in schema order
    pub particles: Vec<Particle>,
}

/// How a child element is tied to the content model
#[derive(Debug, Clone, Copy)]
pub enum ChildMatch<'a> {
    /// Matched an element declaration
    Declared(ElementId),
    /// Matched a wildcard
    Wildcard(&'a Wildcard),
}

/// Why a child sequence does not match a content model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// The child at `index` cannot appear there
    Unexpected {
        /// Index of the offending child element
        index: usize,
        /// Names that could have appeared instead
        expected: Vec<String>,
    },
    /// All children matched but required content is missing
    Incomplete {
        /// Names that could still appear
        expected: Vec<String>,
    },
}

impl ModelGroup {
    /// Create an empty group
    pub fn new(compositor: Compositor) -> Self {
        Self {
            compositor,
            particles: Vec::new(),
        }
    }

    /// Whether the group accepts no children
    pub fn is_emptiable(&self) -> bool {
        match self.compositor {
            Compositor::Sequence | Compositor::All => self.particles.iter().all(particle_emptiable),
            Compositor::Choice => {
                self.particles.is_empty() || self.particles.iter().any(particle_emptiable)
            }
        }
    }

    /// Check a sequence of child element names against this group
    pub fn check_children(&self, children: &[QName]) -> std::result::Result<(), ContentError> {
        let mut matcher = Matcher {
            children,
            furthest: 0,
            attempts: Vec::new(),
        };
        let start = BTreeSet::from([0usize]);
        let ends = matcher.group(self, &start);
        if ends.contains(&children.len()) {
            return Ok(());
        }

        let at = matcher.furthest;
        let expected: BTreeSet<String> = matcher
            .attempts
            .iter()
            .filter(|(pos, _)| *pos == at)
            .map(|(_, name)| name.clone())
            .collect();
        let expected = expected.into_iter().collect();
        if at < children.len() {
            Err(ContentError::Unexpected { index: at, expected })
        } else {
            Err(ContentError::Incomplete { expected })
        }
    }

    /// Find what a child element name binds to in this group
    ///
    /// Element declarations win over wildcards.
    pub fn find_child(&self, name: &QName) -> Option<ChildMatch<'_>> {
        self.find_declared(name).or_else(|| self.find_wildcard(name))
    }

    fn find_declared(&self, name: &QName) -> Option<ChildMatch<'_>> {
        self.particles.iter().find_map(|p| match &p.term {
            Term::Element { name: n, id } if n == name => Some(ChildMatch::Declared(*id)),
            Term::Group(g) => g.find_declared(name),
            _ => None,
        })
    }

    fn find_wildcard(&self, name: &QName) -> Option<ChildMatch<'_>> {
        self.particles.iter().find_map(|p| match &p.term {
            Term::Any(w) if w.allows(name.namespace_key()) => Some(ChildMatch::Wildcard(w)),
            Term::Group(g) => g.find_wildcard(name),
            _ => None,
        })
    }

    /// Element declarations referenced anywhere in the group
    pub fn element_ids(&self) -> HashSet<ElementId> {
        let mut ids = HashSet::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut HashSet<ElementId>) {
        for p in &self.particles {
            match &p.term {
                Term::Element { id, .. } => {
                    ids.insert(*id);
                }
                Term::Group(g) => g.collect_ids(ids),
                Term::Any(_) => {}
            }
        }
    }
}

fn particle_emptiable(p: &Particle) -> bool {
    p.occurs.is_emptiable()
        || p.occurs.is_empty()
        || matches!(&p.term, Term::Group(g) if g.is_emptiable())
}

struct Matcher<'a> {
    children: &'a [QName],
    /// Furthest child position any path reached
    furthest: usize,
    /// (position, expected name) for every element/wildcard attempt
    attempts: Vec<(usize, String)>,
}

impl<'a> Matcher<'a> {
    fn particle(&mut self, particle: &Particle, starts: &BTreeSet<usize>) -> BTreeSet<usize> {
        let occurs = particle.occurs;
        let mut result = BTreeSet::new();
        if occurs.min == 0 {
            result.extend(starts.iter().copied());
        }

        let mut current = starts.clone();
        let mut count = 0u32;
        while !current.is_empty() && occurs.max.map_or(true, |max| count < max) {
            let next = self.term(&particle.term, &current);
            count += 1;
            if count < occurs.min {
                current = next;
                continue;
            }
            current = next.difference(&result).copied().collect();
            result.extend(next);
        }
        result
    }

    fn term(&mut self, term: &Term, starts: &BTreeSet<usize>) -> BTreeSet<usize> {
        match term {
            Term::Element { name, .. } => {
                let label = name.to_string();
                self.single(starts, &label, |child| child == name)
            }
            Term::Any(wildcard) => {
                let label = wildcard.to_string();
                self.single(starts, &label, |child| wildcard.allows(child.namespace_key()))
            }
            Term::Group(group) => self.group(group, starts),
        }
    }

    fn single(
        &mut self,
        starts: &BTreeSet<usize>,
        label: &str,
        accepts: impl Fn(&QName) -> bool,
    ) -> BTreeSet<usize> {
        let mut ends = BTreeSet::new();
        for &pos in starts {
            self.attempts.push((pos, label.to_string()));
            if let Some(child) = self.children.get(pos) {
                if accepts(child) {
                    ends.insert(pos + 1);
                    self.furthest = self.furthest.max(pos + 1);
                }
            }
        }
        ends
    }

    fn group(&mut self, group: &ModelGroup, starts: &BTreeSet<usize>) -> BTreeSet<usize> {
        match group.compositor {
            Compositor::Sequence => group
                .particles
                .iter()
                .fold(starts.clone(), |current, p| self.particle(p, &current)),
            Compositor::Choice => {
                let mut ends = BTreeSet::new();
                for p in &group.particles {
                    ends.extend(self.particle(p, starts));
                }
                if group.particles.is_empty() {
                    ends.extend(starts.iter().copied());
                }
                ends
            }
            Compositor::All => self.all(group, starts),
        }
    }

    /// Members of an `all` group, each at most once in any order
    fn all(&mut self, group: &ModelGroup, starts: &BTreeSet<usize>) -> BTreeSet<usize> {
        let members = &group.particles[..group.particles.len().min(64)];
        let required: u64 = members
            .iter()
            .enumerate()
            .filter(|(_, p)| !particle_emptiable(p))
            .fold(0, |mask, (i, _)| mask | (1 << i));

        let mut seen: HashSet<(usize, u64)> = HashSet::new();
        let mut queue: Vec<(usize, u64)> = starts.iter().map(|&p| (p, 0)).collect();
        let mut ends = BTreeSet::new();

        while let Some((pos, used)) = queue.pop() {
            if !seen.insert((pos, used)) {
                continue;
            }
            if used & required == required {
                ends.insert(pos);
            }
            for (i, member) in members.iter().enumerate() {
                if used & (1 << i) != 0 || member.occurs.is_empty() {
                    continue;
                }
                let single = BTreeSet::from([pos]);
                for next in self.term(&member.term, &single) {
                    if next > pos {
                        queue.push((next, used | (1 << i)));
                    }
                }
            }
        }
        ends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::wildcards::ProcessContents;

    fn el(name: &str, id: ElementId, min: u32, max: Option<u32>) -> Particle {
        Particle {
            term: Term::Element {
                name: QName::local(name),
                id,
            },
            occurs: Occurs::new(min, max),
        }
    }

    fn names(list: &[&str]) -> Vec<QName> {
        list.iter().map(|n| QName::local(*n)).collect()
    }

    fn group(compositor: Compositor, particles: Vec<Particle>) -> ModelGroup {
        ModelGroup {
            compositor,
            particles,
        }
    }

    #[test]
    fn test_parse_occurs() {
        assert_eq!(parse_occurs(None, None).unwrap(), Occurs::once());
        assert_eq!(parse_occurs(Some("0"), Some("unbounded")).unwrap(), Occurs::new(0, None));
        assert!(parse_occurs(Some("2"), None).is_err());
        assert!(parse_occurs(Some("3"), Some("2")).is_err());
        assert!(parse_occurs(Some("-1"), None).is_err());
    }

    #[test]
    fn test_sequence() {
        let g = group(
            Compositor::Sequence,
            vec![el("a", 0, 1, Some(1)), el("b", 1, 0, None), el("c", 2, 1, Some(1))],
        );
        assert!(g.check_children(&names(&["a", "c"])).is_ok());
        assert!(g.check_children(&names(&["a", "b", "b", "c"])).is_ok());
        assert_eq!(
            g.check_children(&names(&["a", "x", "c"])),
            Err(ContentError::Unexpected {
                index: 1,
                expected: vec!["b".to_string(), "c".to_string()]
            })
        );
        assert_eq!(
            g.check_children(&names(&["a", "b"])),
            Err(ContentError::Incomplete {
                expected: vec!["b".to_string(), "c".to_string()]
            })
        );
    }

    #[test]
    fn test_choice_with_repetition() {
        let choice = group(Compositor::Choice, vec![el("a", 0, 1, Some(1)), el("b", 1, 1, Some(1))]);
        let wrapper = group(
            Compositor::Sequence,
            vec![Particle {
                term: Term::Group(choice),
                occurs: Occurs::new(2, Some(3)),
            }],
        );
        assert!(wrapper.check_children(&names(&["a", "b"])).is_ok());
        assert!(wrapper.check_children(&names(&["b", "b", "a"])).is_ok());
        assert!(wrapper.check_children(&names(&["a"])).is_err());
        assert!(matches!(
            wrapper.check_children(&names(&["a", "a", "a", "a"])),
            Err(ContentError::Unexpected { index: 3, .. })
        ));
    }

    #[test]
    fn test_all_group() {
        let g = group(
            Compositor::All,
            vec![el("a", 0, 1, Some(1)), el("b", 1, 0, Some(1)), el("c", 2, 1, Some(1))],
        );
        assert!(g.check_children(&names(&["c", "a"])).is_ok());
        assert!(g.check_children(&names(&["b", "c", "a"])).is_ok());
        assert!(g.check_children(&names(&["a", "a", "c"])).is_err());
        assert!(g.check_children(&names(&["a"])).is_err());
    }

    #[test]
    fn test_empty_children_against_emptiable_group() {
        let g = group(Compositor::Sequence, vec![el("a", 0, 0, None)]);
        assert!(g.is_emptiable());
        assert!(g.check_children(&[]).is_ok());
    }

    #[test]
    fn test_wildcard_and_find_child() {
        let any = Wildcard {
            namespaces: crate::validators::wildcards::NamespaceConstraint::Any,
            process_contents: ProcessContents::Lax,
        };
        let g = group(
            Compositor::Sequence,
            vec![
                el("a", 7, 1, Some(1)),
                Particle {
                    term: Term::Any(any),
                    occurs: Occurs::new(0, None),
                },
            ],
        );
        let children = vec![QName::local("a"), QName::namespaced("urn:x", "extra")];
        assert!(g.check_children(&children).is_ok());
        assert!(matches!(g.find_child(&children[0]), Some(ChildMatch::Declared(7))));
        assert!(matches!(g.find_child(&children[1]), Some(ChildMatch::Wildcard(_))));
        assert_eq!(g.element_ids(), HashSet::from([7]));
    }
}
