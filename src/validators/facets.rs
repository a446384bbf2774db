//! XSD constraining facets
//!
//! This module implements the facets that restrict simple types, and the
//! translation of XSD regular expressions into `regex` syntax.

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use rust_decimal::Decimal;

use crate::error::{Error, ParseError, Result};
use crate::validators::builtins::XsdValue;

/// White space handling modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhiteSpace {
    /// Preserve all white space
    Preserve,
    /// Replace tabs and newlines with spaces
    Replace,
    /// Replace and collapse multiple spaces
    Collapse,
}

impl WhiteSpace {
    /// Parse from string value
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "preserve" => Ok(WhiteSpace::Preserve),
            "replace" => Ok(WhiteSpace::Replace),
            "collapse" => Ok(WhiteSpace::Collapse),
            _ => Err(Error::Value(format!(
                "Invalid whiteSpace value: '{}'. Must be 'preserve', 'replace', or 'collapse'",
                s
            ))),
        }
    }

    /// Normalize a string according to this white space mode
    pub fn normalize(&self, s: &str) -> String {
        match self {
            WhiteSpace::Preserve => s.to_string(),
            WhiteSpace::Replace => s.replace(['\t', '\n', '\r'], " "),
            WhiteSpace::Collapse => s
                .split(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Whether restricting `self` to `other` is allowed
    pub fn can_restrict_to(&self, other: WhiteSpace) -> bool {
        match self {
            WhiteSpace::Preserve => true,
            WhiteSpace::Replace => other != WhiteSpace::Preserve,
            WhiteSpace::Collapse => other == WhiteSpace::Collapse,
        }
    }
}

/// A compiled `xs:pattern`
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Pattern as written in the schema
    pub source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile an XSD regular expression
    pub fn new(source: &str) -> Result<Self> {
        let translated = translate_pattern(source)?;
        let regex = Regex::new(&translated).map_err(|e| {
            Error::Schema(ParseError::new(format!("invalid pattern '{}': {}", source, e)))
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Whether the whole value matches
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

const NAME_START_CLASS: &str = r"\p{L}_:";
const NAME_CHAR_CLASS: &str = r"\p{L}\p{N}\p{Mn}\p{Mc}._:\-\u{B7}";

/// Translate XSD regular expression syntax into an anchored `regex` pattern
///
/// XSD patterns match the whole value, treat `^` and `$` as ordinary
/// characters, use `\i` and `\c` for XML name characters and `-[...]` for
/// character class subtraction.
pub fn translate_pattern(xsd: &str) -> Result<String> {
    let mut out = String::with_capacity(xsd.len() + 8);
    out.push_str("^(?:");
    let mut chars = xsd.chars().peekable();
    let mut class_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or_else(|| {
                    Error::Schema(ParseError::new(format!("pattern '{}' ends with '\\'", xsd)))
                })?;
                let inside = class_depth > 0;
                match escaped {
                    'i' if inside => out.push_str(NAME_START_CLASS),
                    'c' if inside => out.push_str(NAME_CHAR_CLASS),
                    'i' => out.push_str(&format!("[{}]", NAME_START_CLASS)),
                    'c' => out.push_str(&format!("[{}]", NAME_CHAR_CLASS)),
                    'I' if !inside => out.push_str(&format!("[^{}]", NAME_START_CLASS)),
                    'C' if !inside => out.push_str(&format!("[^{}]", NAME_CHAR_CLASS)),
                    'I' | 'C' => {
                        return Err(Error::Schema(ParseError::new(format!(
                            "pattern '{}': \\{} inside a character class is not supported",
                            xsd, escaped
                        ))))
                    }
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
            }
            '[' => {
                class_depth += 1;
                out.push('[');
                if chars.peek() == Some(&'^') {
                    out.push('^');
                    chars.next();
                }
            }
            ']' if class_depth > 0 => {
                class_depth -= 1;
                out.push(']');
            }
            '-' if class_depth > 0 && chars.peek() == Some(&'[') => out.push_str("--"),
            '^' | '$' if class_depth == 0 => {
                out.push('\\');
                out.push(c);
            }
            '&' | '~' if class_depth > 0 => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    out.push_str(")$");
    Ok(out)
}

/// A constraining facet applied to values of a simple type
#[derive(Debug, Clone)]
pub enum Facet {
    /// Exact length
    Length(usize),
    /// Minimum length
    MinLength(usize),
    /// Maximum length
    MaxLength(usize),
    /// Patterns of one derivation step; any may match
    Pattern(Vec<Pattern>),
    /// Allowed values (lexical form and value)
    Enumeration(Vec<(String, XsdValue)>),
    /// Inclusive lower bound
    MinInclusive(XsdValue),
    /// Inclusive upper bound
    MaxInclusive(XsdValue),
    /// Exclusive lower bound
    MinExclusive(XsdValue),
    /// Exclusive upper bound
    MaxExclusive(XsdValue),
    /// Maximum number of significant digits
    TotalDigits(u32),
    /// Maximum number of fraction digits
    FractionDigits(u32),
}

impl Facet {
    /// Facet name as used in schema documents
    pub fn name(&self) -> &'static str {
        match self {
            Facet::Length(_) => "length",
            Facet::MinLength(_) => "minLength",
            Facet::MaxLength(_) => "maxLength",
            Facet::Pattern(_) => "pattern",
            Facet::Enumeration(_) => "enumeration",
            Facet::MinInclusive(_) => "minInclusive",
            Facet::MaxInclusive(_) => "maxInclusive",
            Facet::MinExclusive(_) => "minExclusive",
            Facet::MaxExclusive(_) => "maxExclusive",
            Facet::TotalDigits(_) => "totalDigits",
            Facet::FractionDigits(_) => "fractionDigits",
        }
    }

    /// Check a value; `length` overrides the value's own length (list item
    /// count for list types)
    pub fn check(
        &self,
        lexical: &str,
        value: &XsdValue,
        length: Option<usize>,
    ) -> std::result::Result<(), String> {
        let length = length.or_else(|| value.length());
        match self {
            Facet::Length(n) => match length {
                Some(len) if len != *n => Err(format!("length {} differs from required {}", len, n)),
                _ => Ok(()),
            },
            Facet::MinLength(n) => match length {
                Some(len) if len < *n => Err(format!("length {} is shorter than {}", len, n)),
                _ => Ok(()),
            },
            Facet::MaxLength(n) => match length {
                Some(len) if len > *n => Err(format!("length {} is longer than {}", len, n)),
                _ => Ok(()),
            },
            Facet::Pattern(patterns) => {
                if patterns.iter().any(|p| p.is_match(lexical)) {
                    Ok(())
                } else {
                    let sources: Vec<&str> = patterns.iter().map(|p| p.source.as_str()).collect();
                    Err(format!("value does not match pattern '{}'", sources.join("' or '")))
                }
            }
            Facet::Enumeration(allowed) => {
                if allowed.iter().any(|(_, v)| v == value) {
                    Ok(())
                } else {
                    let names: Vec<&str> = allowed.iter().map(|(l, _)| l.as_str()).collect();
                    Err(format!("value is not one of [{}]", names.join(", ")))
                }
            }
            Facet::MinInclusive(bound) => bound_check(value, bound, "minInclusive", |o| o != Ordering::Less),
            Facet::MaxInclusive(bound) => bound_check(value, bound, "maxInclusive", |o| o != Ordering::Greater),
            Facet::MinExclusive(bound) => bound_check(value, bound, "minExclusive", |o| o == Ordering::Greater),
            Facet::MaxExclusive(bound) => bound_check(value, bound, "maxExclusive", |o| o == Ordering::Less),
            Facet::TotalDigits(n) => match value {
                XsdValue::Decimal(d) if total_digits(d) > *n => {
                    Err(format!("value has more than {} total digits", n))
                }
                _ => Ok(()),
            },
            Facet::FractionDigits(n) => match value {
                XsdValue::Decimal(d) if d.normalize().scale() > *n => {
                    Err(format!("value has more than {} fraction digits", n))
                }
                _ => Ok(()),
            },
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn bound_check(
    value: &XsdValue,
    bound: &XsdValue,
    facet: &str,
    accept: impl Fn(Ordering) -> bool,
) -> std::result::Result<(), String> {
    match value.compare(bound) {
        Some(ordering) if accept(ordering) => Ok(()),
        Some(_) => Err(format!("value violates {} {}", facet, bound)),
        None => Err(format!("value cannot be compared with {} {}", facet, bound)),
    }
}

/// Number of significant digits, ignoring leading and trailing zeros
fn total_digits(d: &Decimal) -> u32 {
    let normalized = d.normalize();
    let digits = normalized.mantissa().unsigned_abs().to_string();
    let integer_digits = digits.len() as u32;
    if normalized.is_zero() {
        1
    } else {
        integer_digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::builtins::validate_builtin;

    #[test]
    fn test_whitespace_normalize() {
        assert_eq!(WhiteSpace::Preserve.normalize(" a\tb "), " a\tb ");
        assert_eq!(WhiteSpace::Replace.normalize("a\tb\nc"), "a b c");
        assert_eq!(WhiteSpace::Collapse.normalize("  a \t\n b  "), "a b");
        assert!(WhiteSpace::from_str("squash").is_err());
    }

    #[test]
    fn test_whitespace_restriction() {
        assert!(WhiteSpace::Preserve.can_restrict_to(WhiteSpace::Collapse));
        assert!(!WhiteSpace::Collapse.can_restrict_to(WhiteSpace::Replace));
    }

    #[test]
    fn test_pattern_is_anchored() {
        let p = Pattern::new(r"\d{3}-\d{4}").unwrap();
        assert!(p.is_match("555-1234"));
        assert!(!p.is_match("x555-1234"));
        assert!(!p.is_match("555-12345"));
    }

    #[test]
    fn test_pattern_translation() {
        assert_eq!(translate_pattern("a$").unwrap(), r"^(?:a\$)$");
        assert!(Pattern::new(r"\i\c*").unwrap().is_match("xs:element"));
        assert!(!Pattern::new(r"\i\c*").unwrap().is_match("1abc"));
        let subtract = Pattern::new("[a-z-[aeiou]]+").unwrap();
        assert!(subtract.is_match("xyz"));
        assert!(!subtract.is_match("abc"));
        assert!(Pattern::new("(unclosed").is_err());
    }

    #[test]
    fn test_length_facets() {
        let v = XsdValue::String("hello".to_string());
        assert!(Facet::Length(5).check("hello", &v, None).is_ok());
        assert!(Facet::MinLength(6).check("hello", &v, None).is_err());
        assert!(Facet::MaxLength(4).check("hello", &v, None).is_err());
        assert!(Facet::MaxLength(2).check("a b", &v, Some(2)).is_ok());
    }

    #[test]
    fn test_enumeration_compares_values() {
        let allowed = vec![
            ("1.0".to_string(), validate_builtin("decimal", "1.0").unwrap()),
            ("2".to_string(), validate_builtin("decimal", "2").unwrap()),
        ];
        let facet = Facet::Enumeration(allowed);
        assert!(facet.check("1", &validate_builtin("decimal", "1").unwrap(), None).is_ok());
        assert!(facet.check("3", &validate_builtin("decimal", "3").unwrap(), None).is_err());
    }

    #[test]
    fn test_bounds() {
        let ten = validate_builtin("integer", "10").unwrap();
        let five = validate_builtin("integer", "5").unwrap();
        assert!(Facet::MaxInclusive(ten.clone()).check("10", &ten, None).is_ok());
        assert!(Facet::MaxExclusive(ten.clone()).check("10", &ten, None).is_err());
        assert!(Facet::MinExclusive(five.clone()).check("10", &ten, None).is_ok());
        assert!(Facet::MinInclusive(ten).check("5", &five, None).is_err());
    }

    #[test]
    fn test_digits() {
        let v = validate_builtin("decimal", "123.450").unwrap();
        assert!(Facet::TotalDigits(5).check("123.450", &v, None).is_ok());
        assert!(Facet::TotalDigits(4).check("123.450", &v, None).is_err());
        assert!(Facet::FractionDigits(2).check("123.450", &v, None).is_ok());
        assert!(Facet::FractionDigits(1).check("123.450", &v, None).is_err());
    }
}
