//! Book artifact serving: FB2 re-zipped on the fly, EPUB direct or
//! transcoded from FB2 through the external converter binary.

use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::library::book::{Book, BookType};
use crate::scanner;
use crate::state::AppState;

const FB2_ZIP_MIME: &str = "application/fb2+zip";
const EPUB_MIME: &str = "application/epub+zip";
const CONVERTER_BINARY: &str = "fb2toepub";
const CONVERTER_TIMEOUT: Duration = Duration::from_secs(10);

/// GET `/<bookId>/…/<file>.fb2.zip` — the FB2 source wrapped into a
/// fresh single-entry ZIP named after the transliterated author/title.
pub async fn serve_fb2_zip(state: &AppState, book_id: &str) -> Response {
    let Some(book) = state.library.get_book(book_id) else {
        return not_found();
    };
    if book.book_type() != BookType::Fb2 {
        return not_found();
    }

    let Some(fb2) = fetch_fb2_source(state, &book).await else {
        return not_found();
    };

    let inner_name = format!("{}.fb2", download_basename(&book));
    let zipped = match wrap_in_zip(&inner_name, &fb2) {
        Ok(z) => z,
        Err(e) => {
            tracing::warn!("failed to zip {}: {e}", book.file_name);
            return not_found();
        }
    };

    state.auth.stats.books_sent.fetch_add(1, Ordering::Relaxed);
    file_response(zipped, &format!("{inner_name}.zip"), FB2_ZIP_MIME)
}

/// GET `/<bookId>/…/<file>.epub` — EPUB as stored, or converted from an
/// FB2 source when a converter is configured. Conversion trouble answers
/// 404 and never disturbs other requests.
pub async fn serve_epub(state: &AppState, book_id: &str) -> Response {
    let Some(book) = state.library.get_book(book_id) else {
        return not_found();
    };

    let payload = match book.book_type() {
        BookType::Epub => {
            let root = state.library.library_path().to_path_buf();
            let file_name = book.file_name.clone();
            tokio::task::spawn_blocking(move || fetch_book_bytes(&root, &file_name).ok())
                .await
                .ok()
                .flatten()
        }
        BookType::Fb2 => {
            let converter_dir = state.config.converter.path.clone();
            if converter_dir.as_os_str().is_empty() {
                None
            } else {
                match fetch_fb2_source(state, &book).await {
                    Some(fb2) => convert_fb2_to_epub(&converter_dir, &fb2).await,
                    None => None,
                }
            }
        }
    };

    match payload {
        Some(epub) => {
            state.auth.stats.books_sent.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}.epub", download_basename(&book));
            file_response(epub, &name, EPUB_MIME)
        }
        None => not_found(),
    }
}

/// Raw FB2 bytes of a book, unwrapping `.fb2.zip` containers.
async fn fetch_fb2_source(state: &AppState, book: &Book) -> Option<Vec<u8>> {
    let root = state.library.library_path().to_path_buf();
    let file_name = book.file_name.clone();
    tokio::task::spawn_blocking(move || {
        let data = fetch_book_bytes(&root, &file_name).ok()?;
        if file_name.to_lowercase().ends_with(".fb2.zip") {
            scanner::first_fb2_entry(&data)
        } else {
            Some(data)
        }
    })
    .await
    .ok()
    .flatten()
}

/// Read a book's bytes from the filesystem or from inside its containing
/// archive (the `relative/archive.zip@entry` form).
pub fn fetch_book_bytes(root: &Path, file_name: &str) -> Result<Vec<u8>, std::io::Error> {
    match file_name.split_once('@') {
        None => std::fs::read(root.join(file_name)),
        Some((archive, entry)) => {
            let file = std::fs::File::open(root.join(archive))?;
            let reader = std::io::BufReader::new(file);
            let mut archive = zip::ZipArchive::new(reader).map_err(std::io::Error::other)?;
            let mut entry = archive
                .by_name(entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))?;
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            Ok(data)
        }
    }
}

/// Wrap file bytes into a new single-entry ZIP in memory.
pub fn wrap_in_zip(entry_name: &str, data: &[u8]) -> Result<Vec<u8>, zip::result::ZipError> {
    let buf = Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(buf);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    writer.start_file(entry_name, options)?;
    writer.write_all(data)?;
    Ok(writer.finish()?.into_inner())
}

/// `<translit(firstAuthor)>_<translit(title)>`, sanitized for filenames.
pub fn download_basename(book: &Book) -> String {
    let raw = match book.authors.first() {
        Some(author) => format!("{}_{}", transliterate(author), transliterate(&book.title)),
        None => transliterate(&book.title),
    };
    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() {
        book.id.clone()
    } else {
        sanitized
    }
}

/// Front transliteration of Cyrillic into ASCII.
pub fn transliterate(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match translit_char(c) {
            Some(mapped) => out.push_str(mapped),
            None => out.push(c),
        }
    }
    out
}

fn translit_char(c: char) -> Option<&'static str> {
    let mapped = match c {
        'а' => "a", 'б' => "b", 'в' => "v", 'г' => "g", 'д' => "d",
        'е' => "e", 'ё' => "yo", 'ж' => "zh", 'з' => "z", 'и' => "i",
        'й' => "j", 'к' => "k", 'л' => "l", 'м' => "m", 'н' => "n",
        'о' => "o", 'п' => "p", 'р' => "r", 'с' => "s", 'т' => "t",
        'у' => "u", 'ф' => "f", 'х' => "h", 'ц' => "c", 'ч' => "ch",
        'ш' => "sh", 'щ' => "sch", 'ъ' => "", 'ы' => "y", 'ь' => "",
        'э' => "e", 'ю' => "yu", 'я' => "ya",
        'А' => "A", 'Б' => "B", 'В' => "V", 'Г' => "G", 'Д' => "D",
        'Е' => "E", 'Ё' => "Yo", 'Ж' => "Zh", 'З' => "Z", 'И' => "I",
        'Й' => "J", 'К' => "K", 'Л' => "L", 'М' => "M", 'Н' => "N",
        'О' => "O", 'П' => "P", 'Р' => "R", 'С' => "S", 'Т' => "T",
        'У' => "U", 'Ф' => "F", 'Х' => "H", 'Ц' => "C", 'Ч' => "Ch",
        'Ш' => "Sh", 'Щ' => "Sch", 'Ъ' => "", 'Ы' => "Y", 'Ь' => "",
        'Э' => "E", 'Ю' => "Yu", 'Я' => "Ya",
        _ => return None,
    };
    Some(mapped)
}

/// Keep ASCII alphanumerics, dots and dashes; everything else collapses
/// into single underscores.
fn sanitize_filename(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_underscore = true; // trims leading underscores
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Run the external FB2→EPUB converter over temp files, bounded by a
/// wall-clock timeout. Any failure (missing binary, non-zero exit,
/// timeout) yields `None`.
async fn convert_fb2_to_epub(converter_dir: &Path, fb2: &[u8]) -> Option<Vec<u8>> {
    let stem = uuid::Uuid::new_v4().to_string();
    let in_path = std::env::temp_dir().join(format!("{stem}.fb2"));
    let out_path = std::env::temp_dir().join(format!("{stem}.epub"));

    if let Err(e) = tokio::fs::write(&in_path, fb2).await {
        tracing::warn!("cannot write converter input: {e}");
        return None;
    }

    let binary = converter_dir.join(CONVERTER_BINARY);
    let run = tokio::time::timeout(
        CONVERTER_TIMEOUT,
        tokio::process::Command::new(&binary)
            .arg(&in_path)
            .arg(&out_path)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let epub = match run {
        Ok(Ok(output)) if output.status.success() => tokio::fs::read(&out_path).await.ok(),
        Ok(Ok(output)) => {
            tracing::warn!("converter exited with {}", output.status);
            None
        }
        Ok(Err(e)) => {
            tracing::warn!("converter failed to start ({}): {e}", binary.display());
            None
        }
        Err(_) => {
            tracing::warn!("converter timed out after {CONVERTER_TIMEOUT:?}");
            None
        }
    };

    let _ = tokio::fs::remove_file(&in_path).await;
    let _ = tokio::fs::remove_file(&out_path).await;
    epub
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Bad request").into_response()
}

fn file_response(data: Vec<u8>, filename: &str, mime: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data,
    )
        .into_response()
}
