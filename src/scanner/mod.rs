pub mod parsers;

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::library::Library;
use crate::library::book::Book;

/// Events emitted by a scanner, in discovery order.
#[derive(Debug)]
pub enum ScanEvent {
    BookFound(Book),
    InvalidBook(String),
    /// Running total of files skipped as already cataloged.
    FileSkipped(u64),
    Completed(ScanStats),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub books_found: u64,
    pub invalid: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanStatus {
    Idle = 0,
    Scanning = 1,
    Stopped = 2,
}

fn status_of(cell: &AtomicU8) -> ScanStatus {
    match cell.load(Ordering::SeqCst) {
        1 => ScanStatus::Scanning,
        2 => ScanStatus::Stopped,
        _ => ScanStatus::Idle,
    }
}

/// Recursive directory scanner. Walks the library root on a background
/// worker, dispatching files to the right parser and archives to the
/// ZIP scanner, and streams events to the receiver.
#[derive(Clone, Default)]
pub struct DirectoryScanner {
    status: Arc<AtomicU8>,
}

impl DirectoryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ScanStatus {
        status_of(&self.status)
    }

    /// Request cancellation. Further enumeration stops; the in-flight
    /// parse completes.
    pub fn stop(&self) {
        self.status
            .store(ScanStatus::Stopped as u8, Ordering::SeqCst);
    }

    /// Start scanning on a blocking worker and return the event stream.
    pub fn start(
        &self,
        library: Arc<Library>,
        recursive: bool,
    ) -> mpsc::UnboundedReceiver<ScanEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = self.status.clone();
        status.store(ScanStatus::Scanning as u8, Ordering::SeqCst);

        tokio::task::spawn_blocking(move || {
            let root = library.library_path().to_path_buf();
            info!("scan started: {}", root.display());

            let mut stats = ScanStats::default();
            let mut emit = |event: ScanEvent| {
                let _ = tx.send(event);
            };

            let depth = if recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(&root)
                .max_depth(depth)
                .follow_links(true)
                .into_iter()
                .flatten()
            {
                if status_of(&status) != ScanStatus::Scanning {
                    break;
                }
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = rel_path(&root, entry.path());
                process_file(&library, entry.path(), &rel, &status, &mut stats, &mut emit);
            }

            info!(
                "scan finished: found={}, invalid={}, skipped={}",
                stats.books_found, stats.invalid, stats.skipped
            );
            emit(ScanEvent::Completed(stats));

            let _ = status.compare_exchange(
                ScanStatus::Scanning as u8,
                ScanStatus::Idle as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        });

        rx
    }
}

/// ZIP-archive scanner: enumerates accepted entries, extracts them into
/// memory and feeds the matching parser. Shares the cancellation status
/// of the scanner that delegated to it.
pub struct ZipScanner {
    status: Arc<AtomicU8>,
}

impl ZipScanner {
    pub fn with_status(status: Arc<AtomicU8>) -> Self {
        Self { status }
    }

    pub fn scan(
        &self,
        library: &Library,
        abs_zip: &Path,
        rel_zip: &str,
        stats: &mut ScanStats,
        emit: &mut dyn FnMut(ScanEvent),
    ) {
        let file = match fs::File::open(abs_zip) {
            Ok(f) => f,
            Err(e) => {
                debug!("cannot open archive {}: {e}", abs_zip.display());
                stats.invalid += 1;
                emit(ScanEvent::InvalidBook(rel_zip.to_string()));
                return;
            }
        };
        let mut archive = match zip::ZipArchive::new(std::io::BufReader::new(file)) {
            Ok(a) => a,
            Err(e) => {
                debug!("bad archive {}: {e}", abs_zip.display());
                stats.invalid += 1;
                emit(ScanEvent::InvalidBook(rel_zip.to_string()));
                return;
            }
        };

        for i in 0..archive.len() {
            if status_of(&self.status) != ScanStatus::Scanning {
                break;
            }
            let mut entry = match archive.by_index(i) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let lower = name.to_lowercase();
            if !lower.ends_with(".fb2") && !lower.ends_with(".epub") {
                continue;
            }

            let logical = format!("{rel_zip}@{name}");
            if library.contains(&logical) {
                stats.skipped += 1;
                emit(ScanEvent::FileSkipped(stats.skipped));
                continue;
            }

            let uncompressed = entry.size() as u32;
            let mut data = Vec::new();
            if let Err(e) = entry.read_to_end(&mut data) {
                // One bad entry never aborts the archive.
                debug!("cannot read {name} from {rel_zip}: {e}");
                stats.invalid += 1;
                emit(ScanEvent::InvalidBook(logical));
                continue;
            }

            match parse_book_bytes(library, &data, &logical) {
                Some(mut book) if book.is_valid() => {
                    // The parser saw only a stream; size comes from the
                    // archive directory.
                    book.document_size = uncompressed;
                    stats.books_found += 1;
                    emit(ScanEvent::BookFound(book));
                }
                _ => {
                    stats.invalid += 1;
                    emit(ScanEvent::InvalidBook(logical));
                }
            }
        }
    }
}

/// Dispatch one filesystem entry: archives go to the ZIP scanner,
/// book files to their parser, cataloged paths to the skip counter.
fn process_file(
    library: &Library,
    abs: &Path,
    rel: &str,
    status: &Arc<AtomicU8>,
    stats: &mut ScanStats,
    emit: &mut dyn FnMut(ScanEvent),
) {
    let lower = rel.to_lowercase();

    if lower.ends_with(".zip") && !lower.ends_with(".fb2.zip") {
        let zip_scanner = ZipScanner::with_status(status.clone());
        zip_scanner.scan(library, abs, rel, stats, emit);
        return;
    }

    if !lower.ends_with(".epub") && !lower.contains(".fb2") {
        return;
    }

    if library.contains(rel) {
        stats.skipped += 1;
        emit(ScanEvent::FileSkipped(stats.skipped));
        return;
    }

    let data = match fs::read(abs) {
        Ok(d) => d,
        Err(e) => {
            debug!("cannot read {}: {e}", abs.display());
            stats.invalid += 1;
            emit(ScanEvent::InvalidBook(rel.to_string()));
            return;
        }
    };

    match parse_book_bytes(library, &data, rel) {
        Some(book) if book.is_valid() => {
            stats.books_found += 1;
            emit(ScanEvent::BookFound(book));
        }
        _ => {
            stats.invalid += 1;
            emit(ScanEvent::InvalidBook(rel.to_string()));
        }
    }
}

/// Single-file scan used by the watcher: parses the path (or archive)
/// and admits every valid book found into the library, appending each
/// admitted record to the catalog log.
pub fn scan_single_file(library: &Library, abs: &Path) -> ScanStats {
    let root = library.library_path().to_path_buf();
    let rel = rel_path(&root, abs);
    let status = Arc::new(AtomicU8::new(ScanStatus::Scanning as u8));

    let mut stats = ScanStats::default();
    let mut events = Vec::new();
    process_file(library, abs, &rel, &status, &mut stats, &mut |ev| {
        events.push(ev)
    });

    for event in events {
        match event {
            ScanEvent::BookFound(book) => {
                if library.add(book.clone()) {
                    library.append(&book);
                    info!("book added: {} ({})", book.title, book.file_name);
                }
            }
            ScanEvent::InvalidBook(path) => debug!("invalid book: {path}"),
            _ => {}
        }
    }
    stats
}

/// Pick the parser from the logical name's extension. A `.fb2.zip` is a
/// single zipped FB2, cataloged under the archive's own name.
pub fn parse_book_bytes(library: &Library, data: &[u8], logical_name: &str) -> Option<Book> {
    let lower = logical_name.to_lowercase();
    if lower.ends_with(".epub") {
        Some(parsers::epub::parse(data, logical_name, library.genres()))
    } else if lower.ends_with(".fb2.zip") {
        let inner = first_fb2_entry(data)?;
        let mut book = parsers::fb2::parse(&inner, logical_name);
        book.document_size = inner.len() as u32;
        Some(book)
    } else if lower.contains(".fb2") {
        Some(parsers::fb2::parse(data, logical_name))
    } else {
        None
    }
}

/// Extract the first `.fb2` entry from a `.fb2.zip` wrapper archive.
pub fn first_fb2_entry(data: &[u8]) -> Option<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).ok()?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).ok()?;
        if entry.is_dir() || !entry.name().to_lowercase().ends_with(".fb2") {
            continue;
        }
        let mut inner = Vec::new();
        entry.read_to_end(&mut inner).ok()?;
        return Some(inner);
    }
    None
}

fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}
