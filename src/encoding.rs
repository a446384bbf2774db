//! Character encodings
//!
//! Detection of the input encoding (byte order mark, XML declaration, caller
//! override), decoding to UTF-8, and encoding of serializer output.

use crate::error::{Error, Result};
use std::fmt;

/// Character encodings understood by the parser and the serializer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-8
    #[default]
    Utf8,
    /// UTF-16, little endian
    Utf16Le,
    /// UTF-16, big endian
    Utf16Be,
    /// ISO-8859-1 (Latin-1)
    Latin1,
    /// US-ASCII
    Ascii,
}

impl Encoding {
    /// Look up an encoding by its IANA label (case-insensitive)
    pub fn from_label(label: &str) -> Result<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(Encoding::Utf8),
            "UTF-16" | "UTF-16LE" | "UTF16" => Ok(Encoding::Utf16Le),
            "UTF-16BE" => Ok(Encoding::Utf16Be),
            "ISO-8859-1" | "LATIN1" | "LATIN-1" | "ISO_8859-1" => Ok(Encoding::Latin1),
            "US-ASCII" | "ASCII" => Ok(Encoding::Ascii),
            other => Err(Error::Decode(format!("unsupported encoding '{}'", other))),
        }
    }

    /// Label written into the XML declaration
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le | Encoding::Utf16Be => "UTF-16",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Ascii => "US-ASCII",
        }
    }

    /// Whether a character can be written directly in this encoding
    pub fn can_represent(&self, c: char) -> bool {
        match self {
            Encoding::Utf8 | Encoding::Utf16Le | Encoding::Utf16Be => true,
            Encoding::Latin1 => (c as u32) <= 0xFF,
            Encoding::Ascii => c.is_ascii(),
        }
    }

    /// Detect the encoding of raw input
    ///
    /// A byte order mark wins; otherwise the `encoding` pseudo-attribute of
    /// the XML declaration is used; otherwise UTF-8.
    pub fn detect(input: &[u8]) -> Result<Self> {
        match input {
            [0xEF, 0xBB, 0xBF, ..] => return Ok(Encoding::Utf8),
            [0xFF, 0xFE, ..] => return Ok(Encoding::Utf16Le),
            [0xFE, 0xFF, ..] => return Ok(Encoding::Utf16Be),
            [0x00, b'<', ..] => return Ok(Encoding::Utf16Be),
            [b'<', 0x00, ..] => return Ok(Encoding::Utf16Le),
            _ => {}
        }
        match declared_encoding(input) {
            // A declared UTF-16 without BOM or NUL pattern is inconsistent;
            // the bytes are ASCII-compatible so read them as UTF-8.
            Some(label) => match Encoding::from_label(&label)? {
                Encoding::Utf16Le | Encoding::Utf16Be => Ok(Encoding::Utf8),
                enc => Ok(enc),
            },
            None => Ok(Encoding::Utf8),
        }
    }

    /// Decode input bytes to a string, dropping any byte order mark
    pub fn decode(&self, input: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => {
                let bytes = input.strip_prefix(&b"\xEF\xBB\xBF"[..]).unwrap_or(input);
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
            }
            Encoding::Utf16Le => {
                let bytes = input.strip_prefix(&b"\xFF\xFE"[..]).unwrap_or(input);
                decode_utf16(bytes, u16::from_le_bytes)
            }
            Encoding::Utf16Be => {
                let bytes = input.strip_prefix(&b"\xFE\xFF"[..]).unwrap_or(input);
                decode_utf16(bytes, u16::from_be_bytes)
            }
            Encoding::Latin1 => Ok(input.iter().map(|&b| b as char).collect()),
            Encoding::Ascii => {
                if let Some(pos) = input.iter().position(|b| !b.is_ascii()) {
                    return Err(Error::Decode(format!(
                        "non-ASCII byte 0x{:02X} at offset {}",
                        input[pos], pos
                    )));
                }
                Ok(input.iter().map(|&b| b as char).collect())
            }
        }
    }

    /// Encode text, failing on the first character the encoding cannot carry
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Utf16Le => {
                let mut out = vec![0xFF, 0xFE];
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                Ok(out)
            }
            Encoding::Utf16Be => {
                let mut out = vec![0xFE, 0xFF];
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
                Ok(out)
            }
            Encoding::Latin1 | Encoding::Ascii => text
                .chars()
                .map(|c| {
                    if self.can_represent(c) {
                        Ok(c as u32 as u8)
                    } else {
                        Err(Error::Encode(format!(
                            "character U+{:04X} cannot be represented in {}",
                            c as u32,
                            self.label()
                        )))
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf16Le => write!(f, "UTF-16LE"),
            Encoding::Utf16Be => write!(f, "UTF-16BE"),
            other => write!(f, "{}", other.label()),
        }
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode("invalid UTF-16: odd number of bytes".to_string()));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| to_unit([chunk[0], chunk[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| Error::Decode(format!("invalid UTF-16: {}", e)))
}

/// Read the `encoding` pseudo-attribute from an ASCII-compatible XML declaration
fn declared_encoding(input: &[u8]) -> Option<String> {
    let input = input.strip_prefix(&b"\xEF\xBB\xBF"[..]).unwrap_or(input);
    if !input.starts_with(b"<?xml") {
        return None;
    }
    let end = memchr::memmem::find(input, b"?>")?;
    let decl = std::str::from_utf8(&input[..end]).ok()?;
    let rest = &decl[decl.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &rest[1..];
    Some(value[..value.find(quote)?].to_string())
}

/// Normalize line endings: CRLF and lone CR become LF
pub fn normalize_newlines(text: String) -> String {
    if !text.contains('\r') {
        return text;
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}
