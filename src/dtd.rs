//! DOCTYPE and DTD declaration parsing
//!
//! Only what entity handling needs is understood: the document type name, the
//! external subset identifier and entity declarations. Element, attribute
//! list and notation declarations are skipped. Nothing here performs I/O;
//! external identifiers are handed back to the parser, which asks the
//! resolution policy before anything is fetched.

use std::collections::HashMap;
use std::ops::Range;

use crate::error::{Error, Result};
use crate::names::is_valid_name;

/// External identifier (`SYSTEM "..."` or `PUBLIC "..." "..."`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId {
    /// Public identifier
    pub public_id: Option<String>,
    /// System identifier (URI)
    pub system_id: String,
}

/// Summary of a `<!DOCTYPE ...>` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocTypeDecl {
    /// Declared root element name
    pub name: String,
    /// External subset, if any
    pub external_id: Option<ExternalId>,
    /// Raw internal subset text, if any
    pub internal_subset: Option<String>,
}

/// Definition of an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValue {
    /// Replacement text given literally (character references already expanded)
    Internal(String),
    /// Parsed external entity
    External(ExternalId),
    /// Unparsed entity (`NDATA`); never referenced from content
    Unparsed {
        /// External identifier
        id: ExternalId,
        /// Notation name
        notation: String,
    },
}

/// An entity declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDecl {
    /// Entity name
    pub name: String,
    /// Definition
    pub value: EntityValue,
}

/// One significant item of DTD text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtdItem {
    /// `<!ENTITY ...>`; `parameter` is true for `<!ENTITY % ...>`
    Entity {
        /// The declaration
        decl: EntityDecl,
        /// Whether this is a parameter entity
        parameter: bool,
    },
    /// Parameter entity reference `%name;` between declarations
    PeReference(String),
}

/// Entities declared so far in one document
#[derive(Debug, Default, Clone)]
pub struct DtdDeclarations {
    general: HashMap<String, EntityDecl>,
    parameter: HashMap<String, EntityDecl>,
}

impl DtdDeclarations {
    /// Create an empty declaration store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration; the first declaration of a name wins
    pub fn add(&mut self, decl: EntityDecl, parameter: bool) -> bool {
        let map = if parameter { &mut self.parameter } else { &mut self.general };
        if map.contains_key(&decl.name) {
            return false;
        }
        map.insert(decl.name.clone(), decl);
        true
    }

    /// Look up a general entity
    pub fn general(&self, name: &str) -> Option<&EntityDecl> {
        self.general.get(name)
    }

    /// Look up a parameter entity
    pub fn parameter(&self, name: &str) -> Option<&EntityDecl> {
        self.parameter.get(name)
    }

    /// Number of general entities
    pub fn general_count(&self) -> usize {
        self.general.len()
    }
}

/// Parse the content of a DOCTYPE event (the text after `<!DOCTYPE`)
pub fn parse_doctype(content: &str) -> Result<DocTypeDecl> {
    let mut s = Scanner::new(content);
    s.skip_ws();
    let name = s.name()?;
    s.skip_ws();

    let external_id = if s.starts_with("SYSTEM") || s.starts_with("PUBLIC") {
        Some(s.external_id()?)
    } else {
        None
    };
    s.skip_ws();

    let internal_subset = if s.eat("[") {
        let start = s.pos;
        let end = s.find_subset_end()?;
        let subset = content[start..end].to_string();
        s.pos = end + 1;
        Some(subset)
    } else {
        None
    };
    s.skip_ws();
    if !s.at_end() {
        return Err(malformed(format!(
            "unexpected text '{}' in DOCTYPE declaration",
            s.rest().trim()
        )));
    }

    Ok(DocTypeDecl {
        name,
        external_id,
        internal_subset,
    })
}

/// Locate the DOCTYPE declaration in the prolog of a document
///
/// Returns the byte range of the whole `<!DOCTYPE ... >` markup, or `None` when
/// the prolog has no declaration. A `>` inside a quoted literal, a comment or a
/// processing instruction of the internal subset does not end the declaration.
pub fn find_doctype(text: &str) -> Result<Option<Range<usize>>> {
    let mut s = Scanner::new(text);
    loop {
        s.skip_ws();
        let skipped = if s.eat("<?") {
            s.skip_past("?>")
        } else if s.eat("<!--") {
            s.skip_past("-->")
        } else if s.starts_with("<!DOCTYPE") {
            break;
        } else {
            return Ok(None);
        };
        // the tokenizer reports unterminated prolog markup itself
        if skipped.is_err() {
            return Ok(None);
        }
    }

    let start = s.pos;
    s.pos += "<!DOCTYPE".len();
    let end = s.find_declaration_end()?;
    Ok(Some(start..end))
}

/// Parse DTD text (an internal subset or an external subset / parameter entity)
pub fn parse_dtd(text: &str) -> Result<Vec<DtdItem>> {
    let text = strip_text_declaration(text);
    let mut s = Scanner::new(text);
    let mut items = Vec::new();

    loop {
        s.skip_ws();
        if s.at_end() {
            break;
        }
        if s.eat("<!--") {
            s.skip_past("-->")?;
        } else if s.eat("<?") {
            s.skip_past("?>")?;
        } else if s.eat("<!ENTITY") {
            items.push(s.entity_decl()?);
        } else if s.eat("<![") {
            s.skip_past("]]>")?;
        } else if s.starts_with("<!ELEMENT")
            || s.starts_with("<!ATTLIST")
            || s.starts_with("<!NOTATION")
        {
            s.skip_markup_decl()?;
        } else if s.eat("%") {
            let name = s.name()?;
            s.expect(";")?;
            items.push(DtdItem::PeReference(name));
        } else {
            return Err(malformed(format!(
                "unexpected text in DTD: '{}'",
                s.rest().chars().take(20).collect::<String>()
            )));
        }
    }

    Ok(items)
}

/// Drop a leading `<?xml ...?>` text declaration from external DTD text
fn strip_text_declaration(text: &str) -> &str {
    if text.starts_with("<?xml") {
        if let Some(end) = text.find("?>") {
            return &text[end + 2..];
        }
    }
    text
}

fn malformed(message: impl Into<String>) -> Error {
    Error::Xml(message.into())
}

struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn eat(&mut self, prefix: &str) -> bool {
        if self.starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, prefix: &str) -> Result<()> {
        if self.eat(prefix) {
            Ok(())
        } else {
            Err(malformed(format!("expected '{}' in DTD", prefix)))
        }
    }

    fn skip_ws(&mut self) -> bool {
        let rest = self.rest();
        let trimmed = rest.trim_start_matches([' ', '\t', '\n', '\r']);
        self.pos += rest.len() - trimmed.len();
        rest.len() != trimmed.len()
    }

    fn require_ws(&mut self) -> Result<()> {
        if self.skip_ws() {
            Ok(())
        } else {
            Err(malformed("expected whitespace in DTD declaration"))
        }
    }

    fn skip_past(&mut self, terminator: &str) -> Result<()> {
        match self.rest().find(terminator) {
            Some(idx) => {
                self.pos += idx + terminator.len();
                Ok(())
            }
            None => Err(malformed(format!("unterminated DTD construct, missing '{}'", terminator))),
        }
    }

    fn name(&mut self) -> Result<String> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '>' | '[' | ';' | '"' | '\'' | '%'))
            .unwrap_or(rest.len());
        let name = &rest[..end];
        if !is_valid_name(name) {
            return Err(malformed(format!("invalid name '{}' in DTD", name)));
        }
        self.pos += end;
        Ok(name.to_string())
    }

    fn quoted(&mut self) -> Result<&'a str> {
        let quote = match self.rest().chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(malformed("expected quoted literal in DTD")),
        };
        self.pos += 1;
        let rest = self.rest();
        let end = rest
            .find(quote)
            .ok_or_else(|| malformed("unterminated literal in DTD"))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    fn external_id(&mut self) -> Result<ExternalId> {
        if self.eat("SYSTEM") {
            self.require_ws()?;
            let system_id = self.quoted()?.to_string();
            Ok(ExternalId {
                public_id: None,
                system_id,
            })
        } else if self.eat("PUBLIC") {
            self.require_ws()?;
            let public_id = self.quoted()?.to_string();
            self.require_ws()?;
            let system_id = self.quoted()?.to_string();
            Ok(ExternalId {
                public_id: Some(public_id),
                system_id,
            })
        } else {
            Err(malformed("expected SYSTEM or PUBLIC identifier"))
        }
    }

    fn entity_decl(&mut self) -> Result<DtdItem> {
        self.require_ws()?;
        let parameter = self.eat("%");
        if parameter {
            self.require_ws()?;
        }
        let name = self.name()?;
        self.require_ws()?;

        let value = if self.starts_with("\"") || self.starts_with("'") {
            EntityValue::Internal(expand_char_refs(self.quoted()?)?)
        } else {
            let id = self.external_id()?;
            let had_ws = self.skip_ws();
            if had_ws && self.eat("NDATA") {
                if parameter {
                    return Err(malformed(format!(
                        "parameter entity '{}' cannot be unparsed",
                        name
                    )));
                }
                self.require_ws()?;
                let notation = self.name()?;
                EntityValue::Unparsed { id, notation }
            } else {
                EntityValue::External(id)
            }
        };

        self.skip_ws();
        self.expect(">")?;
        Ok(DtdItem::Entity {
            decl: EntityDecl { name, value },
            parameter,
        })
    }

    fn skip_markup_decl(&mut self) -> Result<()> {
        let mut quote: Option<char> = None;
        for (idx, c) in self.rest().char_indices() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '"' | '\'') => quote = Some(c),
                (None, '>') => {
                    self.pos += idx + 1;
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(malformed("unterminated markup declaration in DTD"))
    }

    /// Find the end of a DOCTYPE declaration, just past its closing `>`
    fn find_declaration_end(&mut self) -> Result<usize> {
        let mut quote: Option<char> = None;
        while let Some(c) = self.rest().chars().next() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '"' | '\'') => quote = Some(c),
                (None, '[') => self.pos = self.find_subset_end_from(self.pos + 1)?,
                (None, '>') => return Ok(self.pos + 1),
                _ => {}
            }
            self.pos += c.len_utf8();
        }
        Err(malformed("unterminated DOCTYPE declaration"))
    }

    /// Find the `]` closing the internal subset, skipping quoted text and comments
    fn find_subset_end(&self) -> Result<usize> {
        self.find_subset_end_from(self.pos)
    }

    fn find_subset_end_from(&self, start: usize) -> Result<usize> {
        let bytes = self.text.as_bytes();
        let mut i = start;
        let mut quote: Option<u8> = None;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if self.text[i..].starts_with("<!--") => {
                    let end = self.text[i..]
                        .find("-->")
                        .ok_or_else(|| malformed("unterminated comment in DTD"))?;
                    i += end + 3;
                    continue;
                }
                None if self.text[i..].starts_with("<?") => {
                    let end = self.text[i..]
                        .find("?>")
                        .ok_or_else(|| malformed("unterminated processing instruction in DTD"))?;
                    i += end + 2;
                    continue;
                }
                None if b == b']' => return Ok(i),
                None => {}
            }
            i += 1;
        }
        Err(malformed("unterminated internal subset in DOCTYPE"))
    }
}

/// Expand character references in an entity literal
///
/// General entity references are left in place; they are expanded when the
/// entity is referenced.
fn expand_char_refs(literal: &str) -> Result<String> {
    let mut out = String::with_capacity(literal.len());
    let mut rest = literal;
    while let Some(idx) = rest.find("&#") {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 2..];
        let end = after
            .find(';')
            .ok_or_else(|| malformed("unterminated character reference in entity value"))?;
        out.push(decode_char_ref(&after[..end])?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Decode the body of a character reference (`x41` or `65`)
pub fn decode_char_ref(body: &str) -> Result<char> {
    let code = match body.strip_prefix('x') {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => body.parse::<u32>(),
    }
    .map_err(|_| malformed(format!("invalid character reference '&#{};'", body)))?;

    char::from_u32(code)
        .filter(|c| is_xml_char(*c))
        .ok_or_else(|| malformed(format!("character reference '&#{};' is not a legal XML character", body)))
}

/// Whether a character may appear in an XML 1.0 document
pub fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_doctype_with_subset() {
        let decl = parse_doctype(
            r#" note [
  <!ENTITY x SYSTEM "http://example.invalid/secret">
  <!ENTITY greeting "hello">
]"#,
        )
        .unwrap();
        assert_eq!(decl.name, "note");
        assert!(decl.external_id.is_none());
        let items = parse_dtd(decl.internal_subset.as_deref().unwrap()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            DtdItem::Entity {
                decl: EntityDecl {
                    name: "x".to_string(),
                    value: EntityValue::External(ExternalId {
                        public_id: None,
                        system_id: "http://example.invalid/secret".to_string()
                    })
                },
                parameter: false
            }
        );
    }

    #[test]
    fn test_parse_doctype_public() {
        let decl = parse_doctype(r#" html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "xhtml1-strict.dtd""#).unwrap();
        let id = decl.external_id.unwrap();
        assert_eq!(id.public_id.as_deref(), Some("-//W3C//DTD XHTML 1.0 Strict//EN"));
        assert_eq!(id.system_id, "xhtml1-strict.dtd");
        assert!(decl.internal_subset.is_none());
    }

    #[test]
    fn test_subset_with_bracket_in_literal() {
        let decl = parse_doctype(r#" a [<!ENTITY e "]">]"#).unwrap();
        let items = parse_dtd(decl.internal_subset.as_deref().unwrap()).unwrap();
        assert!(matches!(&items[0], DtdItem::Entity { decl, .. } if decl.value == EntityValue::Internal("]".to_string())));
    }

    #[test]
    fn test_parameter_entities_and_skipped_decls() {
        let items = parse_dtd(
            r#"<!-- c --><!ELEMENT a (#PCDATA)><!ATTLIST a b CDATA "x>y">
<!ENTITY % ext SYSTEM "ext.dtd"> %ext; <!ENTITY u SYSTEM "img.png" NDATA png>"#,
        )
        .unwrap();
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], DtdItem::Entity { parameter: true, .. }));
        assert_eq!(items[1], DtdItem::PeReference("ext".to_string()));
        assert!(matches!(&items[2], DtdItem::Entity { decl, .. } if matches!(decl.value, EntityValue::Unparsed { .. })));
    }

    #[test]
    fn test_char_refs_expanded_at_declaration() {
        let items = parse_dtd(r#"<!ENTITY lt2 "&#38;#60;"><!ENTITY c "caf&#xE9;">"#).unwrap();
        assert!(matches!(&items[0], DtdItem::Entity { decl, .. } if decl.value == EntityValue::Internal("&#60;".to_string())));
        assert!(matches!(&items[1], DtdItem::Entity { decl, .. } if decl.value == EntityValue::Internal("caf\u{e9}".to_string())));
    }

    #[test]
    fn test_first_declaration_wins() {
        let mut decls = DtdDeclarations::new();
        let first = EntityDecl { name: "e".into(), value: EntityValue::Internal("1".into()) };
        let second = EntityDecl { name: "e".into(), value: EntityValue::Internal("2".into()) };
        assert!(decls.add(first.clone(), false));
        assert!(!decls.add(second, false));
        assert_eq!(decls.general("e"), Some(&first));
        assert!(decls.parameter("e").is_none());
    }

    #[test]
    fn test_malformed_dtd() {
        assert!(parse_dtd("<!ENTITY >").is_err());
        assert!(parse_dtd("garbage").is_err());
        assert!(parse_doctype(" a [ <!ENTITY x 'y'>").is_err());
    }

    #[test]
    fn test_find_doctype_skips_gt_in_literals_and_comments() {
        let xml = r#"<?xml version="1.0"?><!-- a > b --><!DOCTYPE a [<!ENTITY cmp "x > y"><!-- p > q --><?pi 'r > s'?>]><a/>"#;
        let span = find_doctype(xml).unwrap().unwrap();
        assert!(xml[span.clone()].starts_with("<!DOCTYPE a ["));
        assert!(xml[span.clone()].ends_with("?>]>"));
        assert_eq!(&xml[span.end..], "<a/>");

        let decl = parse_doctype(&xml[span.start + 9..span.end - 1]).unwrap();
        let items = parse_dtd(decl.internal_subset.as_deref().unwrap()).unwrap();
        assert!(matches!(&items[0], DtdItem::Entity { decl, .. } if decl.value == EntityValue::Internal("x > y".to_string())));
    }

    #[test]
    fn test_find_doctype_without_declaration() {
        assert_eq!(find_doctype("<a/>").unwrap(), None);
        assert_eq!(find_doctype("<!-- c --> <a><!DOCTYPE b></a>").unwrap(), None);
        let span = find_doctype(r#"<!DOCTYPE a SYSTEM "x>y.dtd"><a/>"#).unwrap().unwrap();
        assert_eq!(span, 0..29);
        assert!(find_doctype("<!DOCTYPE a [<!ENTITY e 'v'>").is_err());
    }

    #[test]
    fn test_decode_char_ref() {
        assert_eq!(decode_char_ref("x41").unwrap(), 'A');
        assert_eq!(decode_char_ref("65").unwrap(), 'A');
        assert!(decode_char_ref("0").is_err());
        assert!(decode_char_ref("xZZ").is_err());
    }
}
