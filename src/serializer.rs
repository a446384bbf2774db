//! Serialization of document trees
//!
//! Trees are written with the quick-xml [`Writer`] into UTF-8 and then encoded
//! into the target [`Encoding`]. Character data is escaped according to an
//! [`EscapePolicy`]. Entity reference nodes are written expanded and the
//! DOCTYPE is not written, so re-parsing the output needs no DTD.

use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::documents::{Document, Element, Node};
use crate::encoding::Encoding;
use crate::error::{Error, Result};

/// How characters in text and attribute values are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapePolicy {
    /// Escape markup characters only; anything the encoding cannot represent
    /// is an error
    RawPassthrough,
    /// Escape markup characters and write unrepresentable characters as
    /// numeric character references
    #[default]
    CharacterReferenceEscape,
}

impl EscapePolicy {
    /// Parse a policy name (`raw` or `charref`)
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "raw" => Ok(EscapePolicy::RawPassthrough),
            "charref" => Ok(EscapePolicy::CharacterReferenceEscape),
            other => Err(Error::Value(format!("unknown escape policy '{}'", other))),
        }
    }
}

/// Serializer configuration
#[derive(Debug, Clone)]
pub struct SerializeOptions {
    /// Output encoding
    pub encoding: Encoding,
    /// Escaping of character data
    pub escape: EscapePolicy,
    /// Write an XML declaration naming the encoding
    pub xml_declaration: bool,
    /// Indent nested elements by this many spaces
    pub indent: Option<usize>,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            escape: EscapePolicy::default(),
            xml_declaration: true,
            indent: None,
        }
    }
}

impl SerializeOptions {
    /// Set the output encoding
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the escape policy
    pub fn with_escape(mut self, escape: EscapePolicy) -> Self {
        self.escape = escape;
        self
    }

    /// Write or omit the XML declaration
    pub fn with_xml_declaration(mut self, declaration: bool) -> Self {
        self.xml_declaration = declaration;
        self
    }

    /// Indent nested elements
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = Some(indent);
        self
    }
}

/// Render a document with the XML declaration and no indentation
pub fn render(document: &Document, encoding: Encoding, escape: EscapePolicy) -> Result<Vec<u8>> {
    Serializer::new(
        SerializeOptions::default()
            .with_encoding(encoding)
            .with_escape(escape),
    )
    .serialize(document)
}

/// Writes documents as encoded bytes
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    options: SerializeOptions,
}

impl Serializer {
    /// Create a serializer
    pub fn new(options: SerializeOptions) -> Self {
        Self { options }
    }

    /// Options in use
    pub fn options(&self) -> &SerializeOptions {
        &self.options
    }

    /// Serialize to bytes in the configured encoding
    pub fn serialize(&self, document: &Document) -> Result<Vec<u8>> {
        let text = self.serialize_to_string(document)?;
        self.options.encoding.encode(&text)
    }

    /// Serialize into a writer
    pub fn write_to(&self, document: &Document, mut out: impl Write) -> Result<()> {
        out.write_all(&self.serialize(document)?)?;
        Ok(())
    }

    /// Serialize to text, before encoding
    ///
    /// Escaping already accounts for the configured encoding, so the result
    /// only needs [`Encoding::encode`] to become the final output.
    pub fn serialize_to_string(&self, document: &Document) -> Result<String> {
        let mut writer = match self.options.indent {
            Some(indent) => Writer::new_with_indent(Vec::new(), b' ', indent),
            None => Writer::new(Vec::new()),
        };

        if self.options.xml_declaration {
            writer.write_event(Event::Decl(BytesDecl::new(
                "1.0",
                Some(self.options.encoding.label()),
                None,
            )))?;
            writer.write_event(Event::Text(BytesText::from_escaped("\n")))?;
        }

        for node in &document.prolog {
            self.write_node(&mut writer, node)?;
        }
        self.write_element(&mut writer, &document.root)?;
        for node in &document.epilog {
            self.write_node(&mut writer, node)?;
        }

        String::from_utf8(writer.into_inner()).map_err(|e| Error::Encode(e.to_string()))
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, node: &Node) -> Result<()> {
        match node {
            Node::Element(element) => self.write_element(writer, element),
            Node::Text(text) => {
                if !text.is_empty() {
                    let escaped = self.escape(text, false);
                    writer.write_event(Event::Text(BytesText::from_escaped(escaped)))?;
                }
                Ok(())
            }
            Node::Comment(comment) => {
                if comment.contains("--") || comment.ends_with('-') {
                    return Err(Error::Encode(format!("comment '{}' cannot be written", comment)));
                }
                writer.write_event(Event::Comment(BytesText::from_escaped(comment.as_str())))?;
                Ok(())
            }
            Node::ProcessingInstruction { target, data } => {
                if data.contains("?>") {
                    return Err(Error::Encode(format!(
                        "processing instruction '{}' cannot be written",
                        target
                    )));
                }
                let content = if data.is_empty() {
                    target.clone()
                } else {
                    format!("{} {}", target, data)
                };
                writer.write_event(Event::PI(BytesText::from_escaped(content)))?;
                Ok(())
            }
            Node::EntityReference { children, .. } => {
                for child in children {
                    self.write_node(writer, child)?;
                }
                Ok(())
            }
        }
    }

    fn write_element(&self, writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<()> {
        let name = element.raw_name();
        let mut content = name.clone();
        for decl in &element.namespace_decls {
            content.push(' ');
            match &decl.prefix {
                Some(prefix) => {
                    content.push_str("xmlns:");
                    content.push_str(prefix);
                }
                None => content.push_str("xmlns"),
            }
            content.push_str("=\"");
            content.push_str(&self.escape(&decl.uri, true));
            content.push('"');
        }
        for attribute in &element.attributes {
            content.push(' ');
            content.push_str(&attribute.raw_name());
            content.push_str("=\"");
            content.push_str(&self.escape(&attribute.value, true));
            content.push('"');
        }
        let start = BytesStart::from_content(content, name.len());

        if element.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        for child in &element.children {
            self.write_node(writer, child)?;
        }
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn escape(&self, text: &str, attribute: bool) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' if attribute => out.push_str("&quot;"),
                '\t' | '\n' if attribute => push_char_ref(&mut out, c),
                '\r' => push_char_ref(&mut out, c),
                c if self.options.escape == EscapePolicy::CharacterReferenceEscape
                    && !self.options.encoding.can_represent(c) =>
                {
                    push_char_ref(&mut out, c)
                }
                c => out.push(c),
            }
        }
        out
    }
}

fn push_char_ref(out: &mut String, c: char) {
    out.push_str(&format!("&#x{:X};", c as u32));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::Attribute;
    use crate::namespaces::QName;

    fn document(xml: &str) -> Document {
        Document::from_string(xml).unwrap()
    }

    #[test]
    fn test_render_utf8() {
        let doc = document(r#"<a x="1 &amp; 2"><b>t&lt;u</b><!--c--><?p d?></a>"#);
        let out = render(&doc, Encoding::Utf8, EscapePolicy::RawPassthrough).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<a x=\"1 &amp; 2\"><b>t&lt;u</b><!--c--><?p d?></a>"
        );
    }

    #[test]
    fn test_raw_passthrough_rejects_unrepresentable() {
        let doc = document("<a>\u{20AC}</a>");
        let result = render(&doc, Encoding::Latin1, EscapePolicy::RawPassthrough);
        assert!(matches!(result, Err(Error::Encode(_))));
    }

    #[test]
    fn test_character_references() {
        let doc = document("<a v=\"\u{20AC}\">\u{e9}\u{20AC}</a>");
        let out = render(&doc, Encoding::Ascii, EscapePolicy::CharacterReferenceEscape).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("<a v=\"&#x20AC;\">&#xE9;&#x20AC;</a>"));
    }

    #[test]
    fn test_unrepresentable_name_fails() {
        let doc = Document::new(Element::new(QName::local("\u{e9}l\u{e9}ment")));
        let result = render(&doc, Encoding::Ascii, EscapePolicy::CharacterReferenceEscape);
        assert!(matches!(result, Err(Error::Encode(_))));
    }

    #[test]
    fn test_attribute_whitespace_survives() {
        let mut root = Element::new(QName::local("a"));
        root.attributes.push(Attribute::new(QName::local("v"), "x\ty\nz"));
        let doc = Document::new(root);
        let out = render(&doc, Encoding::Utf8, EscapePolicy::RawPassthrough).unwrap();
        let reparsed = document(std::str::from_utf8(&out).unwrap());
        assert_eq!(reparsed.root().get_attribute("v"), Some("x\ty\nz"));
    }

    #[test]
    fn test_utf16_round_trip() {
        let doc = document("<r:a xmlns:r=\"urn:r\"><r:b>\u{e9}</r:b></r:a>");
        let out = render(&doc, Encoding::Utf16Be, EscapePolicy::RawPassthrough).unwrap();
        assert_eq!(&out[..2], &[0xFE, 0xFF]);

        let reparsed = crate::parser::ValidatingParser::new()
            .parse_bytes(&out, &crate::parser::ParseOptions::default().with_validation(false))
            .unwrap()
            .document;
        assert!(doc.is_equivalent(&reparsed));
    }

    #[test]
    fn test_entity_references_written_expanded() {
        let parsed = crate::parser::ValidatingParser::new()
            .parse_str(
                r#"<!DOCTYPE a [<!ENTITY e "<b>x</b>">]><a>&e;</a>"#,
                &crate::parser::ParseOptions::default()
                    .with_validation(false)
                    .with_entity_reference_nodes(true),
            )
            .unwrap();
        let text = Serializer::new(SerializeOptions::default().with_xml_declaration(false))
            .serialize_to_string(&parsed.document)
            .unwrap();
        assert_eq!(text, "<a><b>x</b></a>");
    }

    #[test]
    fn test_indent() {
        let doc = document("<a><b/><c/></a>");
        let text = Serializer::new(
            SerializeOptions::default()
                .with_xml_declaration(false)
                .with_indent(2),
        )
        .serialize_to_string(&doc)
        .unwrap();
        assert_eq!(text, "<a>\n  <b/>\n  <c/>\n</a>");
    }

    #[test]
    fn test_escape_policy_names() {
        assert_eq!(EscapePolicy::from_name("raw").unwrap(), EscapePolicy::RawPassthrough);
        assert_eq!(
            EscapePolicy::from_name("charref").unwrap(),
            EscapePolicy::CharacterReferenceEscape
        );
        assert!(EscapePolicy::from_name("html").is_err());
    }
}
