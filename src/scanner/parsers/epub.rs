//! EPUB metadata parser.
//!
//! An EPUB is a ZIP: `META-INF/container.xml` points at the OPF package
//! document, whose `dc:` metadata and manifest are all we read. Genres
//! come from `dc:subject` values fuzzy-matched against the genre
//! taxonomy's Soundex index.

use std::io::{Cursor, Read, Seek};

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::library::book::Book;
use crate::library::genres::{DEFAULT_GENRE, GenreTree};

use super::{capitalize, collapse_spaces, parse_date, resolve_entity};

/// Parse EPUB metadata from raw bytes. Unreadable archives yield an
/// invalid descriptor rather than an error.
pub fn parse(data: &[u8], file_name: &str, genres: &GenreTree) -> Book {
    let mut book = Book::new(file_name);
    book.document_size = data.len() as u32;

    let Ok(mut archive) = zip::ZipArchive::new(Cursor::new(data)) else {
        book.ensure_id();
        return book;
    };
    let Some(opf_path) = find_opf_path(&mut archive) else {
        book.ensure_id();
        return book;
    };
    let Some(opf_data) = read_zip_entry(&mut archive, &opf_path) else {
        book.ensure_id();
        return book;
    };

    let opf = parse_opf(&opf_data);

    book.id = normalize_identifier(&opf.identifier);
    book.title = collapse_spaces(&opf.title);
    book.language = opf.language.trim().to_string();
    book.annotation = opf.description.trim().to_string();
    book.book_date = parse_date(&opf.date);
    book.authors = opf
        .creators
        .iter()
        .map(|c| capitalize(&collapse_spaces(c)))
        .filter(|c| !c.is_empty())
        .collect();

    // Subjects resolve through the Soundex index; unresolvable (or
    // absent) subjects fall back to the default genre.
    let mut tags: Vec<String> = Vec::new();
    for subject in &opf.subjects {
        if let Some(tag) = genres.match_subject(subject)
            && !tags.iter().any(|t| t == tag)
        {
            tags.push(tag.to_string());
        }
    }
    if tags.is_empty() {
        tags.push(DEFAULT_GENRE.to_string());
    }
    book.genres = tags;

    book.has_cover = opf
        .manifest
        .iter()
        .any(|item| item.is_cover_candidate());

    book.ensure_id();
    book
}

/// Extract the cover image bytes from an EPUB archive.
pub fn cover(data: &[u8]) -> Option<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).ok()?;
    let opf_path = find_opf_path(&mut archive)?;
    let opf_data = read_zip_entry(&mut archive, &opf_path)?;
    let opf = parse_opf(&opf_data);

    let opf_dir = match opf_path.rfind('/') {
        Some(i) => &opf_path[..=i],
        None => "",
    };

    // Strategy 1: manifest item whose id mentions "cover".
    for item in &opf.manifest {
        if item.is_cover_candidate() {
            let path = resolve_path(opf_dir, &item.href);
            if let Some(bytes) = read_zip_entry(&mut archive, &path) {
                return Some(bytes);
            }
        }
    }

    // Strategy 2: item with properties="cover-image" (EPUB 3).
    for item in &opf.manifest {
        if item.properties.contains("cover-image") && item.media_type.starts_with("image/") {
            let path = resolve_path(opf_dir, &item.href);
            if let Some(bytes) = read_zip_entry(&mut archive, &path) {
                return Some(bytes);
            }
        }
    }

    // Strategy 3: <meta name="cover" content="id"/> lookup (EPUB 2).
    if let Some(ref id) = opf.cover_meta_id
        && let Some(item) = opf.manifest.iter().find(|m| &m.id == id)
        && item.media_type.starts_with("image/")
    {
        let path = resolve_path(opf_dir, &item.href);
        if let Some(bytes) = read_zip_entry(&mut archive, &path) {
            return Some(bytes);
        }
    }

    None
}

#[derive(Default)]
struct OpfMeta {
    title: String,
    creators: Vec<String>,
    identifier: String,
    language: String,
    description: String,
    date: String,
    subjects: Vec<String>,
    manifest: Vec<ManifestItem>,
    cover_meta_id: Option<String>,
}

struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

impl ManifestItem {
    /// The catalog's cover heuristic: an id mentioning "cover" with a
    /// JPEG or PNG media type.
    fn is_cover_candidate(&self) -> bool {
        self.id.to_lowercase().contains("cover")
            && matches!(self.media_type.as_str(), "image/jpeg" | "image/png")
    }
}

/// Locate the OPF root file inside the archive: container.xml first,
/// falling back to a scan for a single `*.opf` entry.
fn find_opf_path<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> Option<String> {
    if let Ok(entry) = archive.by_name("META-INF/container.xml") {
        if let Ok(data) = read_to_vec(entry)
            && let Some(path) = parse_container_xml(&data)
        {
            return Some(path);
        }
    }

    for i in 0..archive.len() {
        if let Ok(entry) = archive.by_index(i)
            && entry.name().ends_with(".opf")
        {
            return Some(entry.name().to_string());
        }
    }
    None
}

/// Parse META-INF/container.xml for the rootfile full-path, preferring
/// the entry with the OPF media type when several are present.
fn parse_container_xml(data: &[u8]) -> Option<String> {
    let mut xml = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut rootfiles: Vec<(String, bool)> = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if local_name(e.name().as_ref()) == "rootfile" {
                    let mut full_path = None;
                    let mut is_opf = false;
                    let decoder = xml.decoder();
                    for attr in e.attributes().flatten() {
                        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                        let val = attr.decode_and_unescape_value(decoder).unwrap_or_default();
                        if key == "full-path" {
                            full_path = Some(val.to_string());
                        }
                        if key == "media-type" && val == "application/oebps-package+xml" {
                            is_opf = true;
                        }
                    }
                    if let Some(path) = full_path {
                        rootfiles.push((path, is_opf));
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    match rootfiles.len() {
        0 => None,
        1 => Some(rootfiles.remove(0).0),
        _ => rootfiles
            .into_iter()
            .find(|(_, is_opf)| *is_opf)
            .map(|(path, _)| path),
    }
}

fn parse_opf(data: &[u8]) -> OpfMeta {
    let mut meta = OpfMeta::default();
    let mut xml = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current_text = String::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,

            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                handle_opf_open(&local, e, &mut meta, xml.decoder());
                path.push(local);
                current_text.clear();
            }

            Ok(Event::Empty(ref e)) => {
                let local = local_name(e.name().as_ref());
                handle_opf_open(&local, e, &mut meta, xml.decoder());
            }

            Ok(Event::End(_)) => {
                let tag = path.last().map(|s| s.as_str()).unwrap_or("");
                let text = current_text.trim().to_string();

                match tag {
                    "title" if in_metadata(&path) && meta.title.is_empty() => {
                        meta.title = text;
                    }
                    "creator" if in_metadata(&path) => {
                        if !text.is_empty() {
                            meta.creators.push(text);
                        }
                    }
                    "identifier" if in_metadata(&path) && meta.identifier.is_empty() => {
                        meta.identifier = text;
                    }
                    "language" if in_metadata(&path) && meta.language.is_empty() => {
                        meta.language = text;
                    }
                    "description" if in_metadata(&path) && meta.description.is_empty() => {
                        meta.description = text;
                    }
                    "date" if in_metadata(&path) && meta.date.is_empty() => {
                        meta.date = text;
                    }
                    "subject" if in_metadata(&path) => {
                        if !text.is_empty() {
                            meta.subjects.push(text);
                        }
                    }
                    _ => {}
                }

                if !path.is_empty() {
                    path.pop();
                }
                current_text.clear();
            }

            Ok(Event::Text(ref e)) => {
                current_text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }

            Ok(Event::GeneralRef(ref e)) => {
                let entity = String::from_utf8_lossy(e.as_ref()).into_owned();
                if let Some(resolved) = resolve_entity(&entity) {
                    current_text.push_str(&resolved);
                }
            }

            _ => {}
        }
        buf.clear();
    }

    meta
}

fn handle_opf_open(
    local: &str,
    e: &quick_xml::events::BytesStart<'_>,
    meta: &mut OpfMeta,
    decoder: quick_xml::encoding::Decoder,
) {
    if local == "item" {
        let mut id = String::new();
        let mut href = String::new();
        let mut media_type = String::new();
        let mut properties = String::new();
        for attr in e.attributes().flatten() {
            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
            let val = attr.decode_and_unescape_value(decoder).unwrap_or_default();
            match key {
                "id" => id = val.to_string(),
                "href" => href = val.to_string(),
                "media-type" => media_type = val.to_string(),
                "properties" => properties = val.to_string(),
                _ => {}
            }
        }
        meta.manifest.push(ManifestItem {
            id,
            href,
            media_type,
            properties,
        });
    }

    if local == "meta" {
        let mut name_attr = String::new();
        let mut content_attr = String::new();
        for attr in e.attributes().flatten() {
            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
            let val = attr.decode_and_unescape_value(decoder).unwrap_or_default();
            match key {
                "name" => name_attr = val.to_string(),
                "content" => content_attr = val.to_string(),
                _ => {}
            }
        }
        if name_attr == "cover" && !content_attr.is_empty() {
            meta.cover_meta_id = Some(content_attr);
        }
    }
}

/// Strip URN wrappers from a dc:identifier; the result is validated (and
/// possibly replaced) by `Book::ensure_id`.
fn normalize_identifier(id: &str) -> String {
    let id = id.trim();
    id.strip_prefix("urn:uuid:")
        .or_else(|| id.strip_prefix("uuid:"))
        .unwrap_or(id)
        .to_string()
}

fn resolve_path(base_dir: &str, href: &str) -> String {
    if href.starts_with('/') {
        href.trim_start_matches('/').to_string()
    } else {
        format!("{base_dir}{href}")
    }
}

fn local_name(raw: &[u8]) -> String {
    let s = std::str::from_utf8(raw).unwrap_or("");
    match s.rfind(':') {
        Some(i) => s[i + 1..].to_lowercase(),
        None => s.to_lowercase(),
    }
}

fn in_metadata(path: &[String]) -> bool {
    path.iter().any(|s| s == "metadata")
}

fn read_to_vec(mut entry: impl Read) -> Result<Vec<u8>, std::io::Error> {
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}

fn read_zip_entry<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let entry = archive.by_name(name).ok()?;
    read_to_vec(entry).ok()
}
