//! FB2 header parser.
//!
//! Reads only `FictionBook/description`; the book body and binary
//! attachments are never materialized during cataloging. Malformed input
//! never raises: the caller receives a descriptor whose `is_valid()` is
//! false when required fields are missing.

use base64::Engine;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::library::book::Book;

use super::{
    capitalize, collapse_spaces, encoding, parse_date, resolve_entity, rewrite_nbsp,
    strip_illegal_xml_chars,
};

/// Parse FB2 metadata from raw bytes.
///
/// Tolerates the common corpus defects: a legacy 8-bit encoding declared
/// in the XML prolog (the stream is re-decoded before parsing), stray
/// `&nbsp;` entities (rewritten to their numeric form), and characters
/// outside the XML 1.0 range (stripped on retry).
pub fn parse(data: &[u8], file_name: &str) -> Book {
    let text = rewrite_nbsp(&encoding::decode(data, encoding::detect(data)));

    let mut fields = extract(&text);
    if !fields.clean {
        fields = extract(&strip_illegal_xml_chars(&text));
    }

    let mut book = Book::new(file_name);
    book.document_size = data.len() as u32;
    book.id = fields.id.trim().to_string();
    book.version = fields.version.trim().parse().unwrap_or(1.0);
    book.title = collapse_spaces(&fields.title);
    book.language = fields.lang.trim().to_string();
    book.annotation = fields.annotation_parts.join("\n");
    book.sequence = capitalize(&fields.sequence);
    book.number_in_sequence = fields.sequence_number.trim().parse().unwrap_or(0);
    book.book_date = parse_date(&fields.book_date);
    book.document_date = parse_date(&fields.document_date);
    book.has_cover = fields.has_cover;
    book.authors = fields.authors;
    book.translators = fields.translators;
    book.genres = fields.genres;
    book.ensure_id();
    book
}

/// Extract the cover image bytes referenced from `<coverpage>`.
pub fn cover(data: &[u8]) -> Option<Vec<u8>> {
    let text = encoding::decode(data, encoding::detect(data));
    let id = cover_ref(&text)?;
    binary_by_id(&text, &id)
}

#[derive(Default)]
struct Extracted {
    id: String,
    version: String,
    title: String,
    lang: String,
    annotation_parts: Vec<String>,
    sequence: String,
    sequence_number: String,
    book_date: String,
    document_date: String,
    has_cover: bool,
    authors: Vec<String>,
    translators: Vec<String>,
    genres: Vec<String>,
    /// Whether the parse reached the end of the description without an
    /// XML error (partial fields are kept either way).
    clean: bool,
}

/// Accumulator for one `<author>`/`<translator>` element.
#[derive(Default)]
struct PersonName {
    first: String,
    middle: String,
    last: String,
}

impl PersonName {
    /// `last first middle`, whitespace collapsed, each word capitalized.
    fn full(&self) -> String {
        capitalize(&collapse_spaces(&format!(
            "{} {} {}",
            self.last, self.first, self.middle
        )))
    }
}

fn extract(text: &str) -> Extracted {
    let mut fields = Extracted::default();
    let mut xml = Reader::from_reader(text.as_bytes());
    // Whitespace is kept so mixed content (text split around entity
    // references) reassembles correctly; fields are trimmed on build.
    xml.config_mut().check_end_names = false;
    xml.config_mut().check_comments = false;

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut person = PersonName::default();
    let mut in_annotation = false;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => {
                fields.clean = true;
                break;
            }
            Err(_) => break,

            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                handle_open_tag(&local, e, &path, &mut fields, xml.decoder());
                path.push(local);
                if matches_path(&path, &["description", "title-info", "annotation"]) {
                    in_annotation = true;
                }
            }

            Ok(Event::Empty(ref e)) => {
                let local = local_name(e.name().as_ref());
                handle_open_tag(&local, e, &path, &mut fields, xml.decoder());
            }

            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());

                if path_contains(&path, "title-info") {
                    if local == "author" {
                        let full = person.full();
                        if !full.is_empty() {
                            fields.authors.push(full);
                        }
                        person = PersonName::default();
                    } else if local == "translator" {
                        let full = person.full();
                        if !full.is_empty() {
                            fields.translators.push(full);
                        }
                        person = PersonName::default();
                    }
                }

                if local == "annotation" {
                    in_annotation = false;
                }
                if local == "description" {
                    // Header-only read: never descend into the body.
                    fields.clean = true;
                    break;
                }
                if !path.is_empty() {
                    path.pop();
                }
            }

            Ok(Event::Text(ref e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                append_text(&mut fields, &mut person, &path, in_annotation, &text);
            }

            // Entity references arrive as their own events; character
            // references and the predefined five are resolved inline.
            Ok(Event::GeneralRef(ref e)) => {
                let entity = String::from_utf8_lossy(e.as_ref()).into_owned();
                if let Some(resolved) = resolve_entity(&entity) {
                    append_text(&mut fields, &mut person, &path, in_annotation, &resolved);
                }
            }

            _ => {}
        }
        buf.clear();
    }

    fields
}

/// Route decoded text into the field addressed by the current tag path.
fn append_text(
    fields: &mut Extracted,
    person: &mut PersonName,
    path: &[String],
    in_annotation: bool,
    text: &str,
) {
    let tag = path.last().map(|s| s.as_str()).unwrap_or("");

    if tag == "book-title" && matches_path(path, &["description", "title-info", "book-title"]) {
        fields.title.push_str(text);
    } else if tag == "genre" && matches_path(path, &["description", "title-info", "genre"]) {
        let genre = text.trim().to_string();
        if !genre.is_empty() {
            fields.genres.push(genre);
        }
    } else if tag == "lang" && matches_path(path, &["description", "title-info", "lang"]) {
        fields.lang.push_str(text);
    } else if tag == "id" && matches_path(path, &["description", "document-info", "id"]) {
        fields.id.push_str(text);
    } else if tag == "version"
        && matches_path(path, &["description", "document-info", "version"])
    {
        fields.version.push_str(text);
    } else if tag == "date" && path_contains(path, "document-info") {
        if fields.document_date.is_empty() {
            fields.document_date = text.to_string();
        }
    } else if tag == "date" && path_contains(path, "title-info") {
        if fields.book_date.is_empty() {
            fields.book_date = text.to_string();
        }
    } else if path_contains(path, "title-info") {
        match tag {
            "first-name" => person.first.push_str(text),
            "middle-name" => person.middle.push_str(text),
            "last-name" => person.last.push_str(text),
            _ if in_annotation => {
                let part = text.trim().to_string();
                if !part.is_empty() {
                    fields.annotation_parts.push(part);
                }
            }
            _ => {}
        }
    }
}

fn handle_open_tag(
    local: &str,
    e: &quick_xml::events::BytesStart<'_>,
    path: &[String],
    fields: &mut Extracted,
    decoder: quick_xml::encoding::Decoder,
) {
    // <sequence name="..." number="..."/> — the first one wins.
    if local == "sequence" && path_contains(path, "title-info") && fields.sequence.is_empty() {
        for attr in e.attributes().flatten() {
            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
            let val = attr.decode_and_unescape_value(decoder).unwrap_or_default();
            match key {
                "name" => fields.sequence = val.to_string(),
                "number" => fields.sequence_number = val.to_string(),
                _ => {}
            }
        }
    }

    // <image l:href="#cover"/> inside <coverpage> — presence only.
    if local == "image" && path_contains(path, "coverpage") {
        fields.has_cover = true;
    }

    // <date value="2004-01-01"> — the attribute wins over element text.
    if local == "date" {
        for attr in e.attributes().flatten() {
            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
            if key == "value" {
                let val = attr
                    .decode_and_unescape_value(decoder)
                    .unwrap_or_default()
                    .to_string();
                if path_contains(path, "document-info") && fields.document_date.is_empty() {
                    fields.document_date = val;
                } else if path_contains(path, "title-info") && fields.book_date.is_empty() {
                    fields.book_date = val;
                }
            }
        }
    }
}

/// Find the cover reference id inside `<coverpage><image href="#id"/>`.
fn cover_ref(text: &str) -> Option<String> {
    let cp_start = text.find("<coverpage")?;
    let cp_end = text[cp_start..].find("</coverpage>")? + cp_start;
    let coverpage = &text[cp_start..cp_end];

    let img_start = coverpage.find("<image")?;
    let img_end = coverpage[img_start..].find('>')? + img_start;
    let img_tag = &coverpage[img_start..=img_end];

    let href_pos = img_tag.find("href=\"")?;
    let val_start = href_pos + 6;
    let val_end = img_tag[val_start..].find('"')? + val_start;
    let id = img_tag[val_start..val_end]
        .trim_start_matches('#')
        .to_lowercase();
    if id.is_empty() { None } else { Some(id) }
}

/// Locate `<binary id="...">` by id (case-insensitive) and decode its
/// base64 payload. Searches raw text so a malformed body cannot hide the
/// attachment.
fn binary_by_id(text: &str, wanted_id: &str) -> Option<Vec<u8>> {
    let wanted = wanted_id.to_lowercase();
    let mut search_pos = 0;

    while let Some(found) = text[search_pos..].find("<binary") {
        let abs_start = search_pos + found;
        let tag_end = match text[abs_start..].find('>') {
            Some(p) => abs_start + p,
            None => return None,
        };
        let tag = &text[abs_start..=tag_end];

        let id_match = attr_value(tag, "id")
            .map(|id| id.to_lowercase() == wanted)
            .unwrap_or(false);

        if id_match {
            let content_start = tag_end + 1;
            let close = text[content_start..].find("</binary>")?;
            let b64: String = text[content_start..content_start + close]
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            return base64::engine::general_purpose::STANDARD.decode(b64).ok();
        }
        search_pos = tag_end + 1;
    }
    None
}

fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!("{name}=\"");
    let start = tag.find(&pattern)? + pattern.len();
    let end = tag[start..].find('"')? + start;
    Some(&tag[start..end])
}

fn local_name(raw: &[u8]) -> String {
    let s = std::str::from_utf8(raw).unwrap_or("");
    match s.rfind(':') {
        Some(i) => s[i + 1..].to_lowercase(),
        None => s.to_lowercase(),
    }
}

fn matches_path(path: &[String], suffix: &[&str]) -> bool {
    if path.len() < suffix.len() {
        return false;
    }
    let start = path.len() - suffix.len();
    path[start..].iter().zip(suffix.iter()).all(|(a, b)| a == b)
}

fn path_contains(path: &[String], tag: &str) -> bool {
    path.iter().any(|s| s == tag)
}
