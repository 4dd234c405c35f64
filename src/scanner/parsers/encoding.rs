//! Character-encoding detection for FB2 headers.
//!
//! FB2 files in the wild frequently declare a legacy 8-bit encoding in
//! their XML prolog (or carry a UTF-16 BOM with no declaration at all);
//! the whole byte stream must be re-decoded before the XML parser sees it.

use encoding_rs::{IBM866, KOI8_R, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1251, WINDOWS_1252};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Cp866,
    Windows1251,
    Koi8R,
    Windows1252,
    Iso8859_1,
}

/// Detect the encoding of an XML document: BOM first, then the
/// `encoding="…"` attribute of the XML declaration, defaulting to UTF-8.
pub fn detect(bytes: &[u8]) -> TextEncoding {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return TextEncoding::Utf8;
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return TextEncoding::Utf16Le;
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return TextEncoding::Utf16Be;
    }

    declared_encoding(bytes)
        .and_then(|label| from_label(&label))
        .unwrap_or(TextEncoding::Utf8)
}

/// Decode a byte stream under a known encoding. Malformed sequences
/// become U+FFFD rather than failing the parse.
pub fn decode(bytes: &[u8], encoding: TextEncoding) -> String {
    let encoding = match encoding {
        TextEncoding::Utf8 => UTF_8,
        TextEncoding::Utf16Le => UTF_16LE,
        TextEncoding::Utf16Be => UTF_16BE,
        TextEncoding::Cp866 => IBM866,
        TextEncoding::Windows1251 => WINDOWS_1251,
        TextEncoding::Koi8R => KOI8_R,
        // ISO-8859-1 decodes as its windows-1252 superset.
        TextEncoding::Windows1252 | TextEncoding::Iso8859_1 => WINDOWS_1252,
    };
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Scan the XML declaration (if any) for an `encoding` attribute.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let head_len = bytes.len().min(256);
    let head = String::from_utf8_lossy(&bytes[..head_len]);
    let decl_start = head.find("<?xml")?;
    let decl_end = head[decl_start..].find("?>")? + decl_start;
    let decl = &head[decl_start..decl_end];

    let attr_pos = decl.find("encoding")?;
    let rest = &decl[attr_pos + "encoding".len()..];
    let quote_start = rest.find(['"', '\''])?;
    let quote = rest.as_bytes()[quote_start] as char;
    let value_start = quote_start + 1;
    let value_end = rest[value_start..].find(quote)? + value_start;
    Some(rest[value_start..value_end].trim().to_lowercase())
}

fn from_label(label: &str) -> Option<TextEncoding> {
    match label {
        "utf-8" | "utf8" => Some(TextEncoding::Utf8),
        "utf-16" | "utf-16le" => Some(TextEncoding::Utf16Le),
        "utf-16be" => Some(TextEncoding::Utf16Be),
        "cp866" | "ibm866" | "dos-866" => Some(TextEncoding::Cp866),
        "windows-1251" | "cp1251" | "win-1251" => Some(TextEncoding::Windows1251),
        "koi8-r" | "koi8r" => Some(TextEncoding::Koi8R),
        "windows-1252" | "cp1252" => Some(TextEncoding::Windows1252),
        "iso-8859-1" | "latin1" => Some(TextEncoding::Iso8859_1),
        _ => None,
    }
}
