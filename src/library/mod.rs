pub mod book;
pub mod database;
pub mod genres;
pub mod soundex;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use book::{Book, BookType, id_from_string, now_ticks};
use genres::GenreTree;

/// The process-wide book catalog.
///
/// Both indexes (`books` by ID, `paths` by relative file name) live under
/// a single mutex; every mutating and enumerating operation takes it.
pub struct Library {
    inner: Mutex<LibraryInner>,
    genres: GenreTree,
    library_path: PathBuf,
    database_path: PathBuf,
    russian: bool,
}

#[derive(Default)]
struct LibraryInner {
    books: HashMap<String, Book>,
    paths: HashMap<String, String>,
    fb2_count: usize,
    epub_count: usize,
    is_changed: bool,
}

impl Library {
    /// The database file name is derived from the library path, so
    /// switching libraries switches databases automatically.
    pub fn new(library_path: PathBuf, data_dir: &Path, genres: GenreTree, language: &str) -> Self {
        let db_name = format!("{}.db", id_from_string(&library_path.to_string_lossy()));
        Self {
            inner: Mutex::new(LibraryInner::default()),
            genres,
            database_path: data_dir.join(db_name),
            library_path,
            russian: language.eq_ignore_ascii_case("ru"),
        }
    }

    pub fn genres(&self) -> &GenreTree {
        &self.genres
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn is_russian(&self) -> bool {
        self.russian
    }

    fn lock(&self) -> MutexGuard<'_, LibraryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self) -> usize {
        self.lock().books.len()
    }

    pub fn fb2_count(&self) -> usize {
        self.lock().fb2_count
    }

    pub fn epub_count(&self) -> usize {
        self.lock().epub_count
    }

    pub fn is_changed(&self) -> bool {
        self.lock().is_changed
    }

    /// Constant-time duplicate-path check against the `paths` index.
    pub fn contains(&self, file_name: &str) -> bool {
        self.lock().paths.contains_key(file_name)
    }

    pub fn get_book(&self, id: &str) -> Option<Book> {
        self.lock().books.get(id).cloned()
    }

    /// Admit a book into the catalog.
    ///
    /// Admission rules, in order:
    /// 1. same ID but a different title: the incoming ID is re-derived
    ///    from the file name (colliding or intentionally duplicated IDs
    ///    in the source data);
    /// 2. unknown ID: insert, stamp `added_date`, count it;
    /// 3. known ID with an older stored version: overwrite in place;
    /// 4. otherwise reject.
    ///
    /// Returns true only for rule 2 (a genuinely new book).
    pub fn add(&self, mut book: Book) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(existing) = inner.books.get(&book.id)
            && existing.title != book.title
        {
            book.id = id_from_string(&book.file_name);
        }

        enum Admission {
            Insert,
            Replace { old_path: String, added_date: i64 },
            Reject,
        }

        let admission = match inner.books.get(&book.id) {
            None => Admission::Insert,
            Some(existing) if existing.version < book.version => Admission::Replace {
                old_path: existing.file_name.clone(),
                added_date: existing.added_date,
            },
            Some(_) => Admission::Reject,
        };

        match admission {
            Admission::Insert => {
                book.added_date = now_ticks();
                match book.book_type() {
                    BookType::Fb2 => inner.fb2_count += 1,
                    BookType::Epub => inner.epub_count += 1,
                }
                inner.paths.insert(book.file_name.clone(), book.id.clone());
                inner.books.insert(book.id.clone(), book);
                inner.is_changed = true;
                true
            }
            Admission::Replace {
                old_path,
                added_date,
            } => {
                book.added_date = added_date;
                inner.paths.remove(&old_path);
                inner.paths.insert(book.file_name.clone(), book.id.clone());
                inner.books.insert(book.id.clone(), book);
                inner.is_changed = true;
                false
            }
            Admission::Reject => {
                tracing::debug!("duplicate rejected: {} ({})", book.title, book.file_name);
                false
            }
        }
    }

    /// Remove a single book (for `.epub`/`.fb2`/`.fb2.zip` paths) or every
    /// book whose file name contains the path (directories and archives).
    pub fn delete(&self, path: &str) -> bool {
        let rel = self.to_relative(path);
        if rel.is_empty() {
            return false;
        }

        let mut inner = self.lock();
        let lower = rel.to_lowercase();
        let removed: Vec<String> = if lower.ends_with(".epub")
            || lower.ends_with(".fb2")
            || lower.ends_with(".fb2.zip")
        {
            inner
                .paths
                .get(&rel)
                .cloned()
                .into_iter()
                .collect()
        } else {
            inner
                .books
                .values()
                .filter(|b| b.file_name.contains(&rel))
                .map(|b| b.id.clone())
                .collect()
        };

        for id in &removed {
            if let Some(book) = inner.books.remove(id) {
                inner.paths.remove(&book.file_name);
                match book.book_type() {
                    BookType::Fb2 => inner.fb2_count -= 1,
                    BookType::Epub => inner.epub_count -= 1,
                }
            }
        }

        if removed.is_empty() {
            false
        } else {
            inner.is_changed = true;
            true
        }
    }

    /// Convert an absolute path under the library root into the stored
    /// relative form; relative inputs pass through.
    pub fn to_relative(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(&self.library_path)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string())
    }

    // --- Enumerations -----------------------------------------------------

    pub fn titles(&self) -> Vec<String> {
        let inner = self.lock();
        let values = inner.books.values().map(|b| b.title.clone());
        self.sorted_distinct(values)
    }

    pub fn authors(&self) -> Vec<String> {
        let inner = self.lock();
        let values = inner.books.values().flat_map(|b| b.authors.iter().cloned());
        self.sorted_distinct(values)
    }

    pub fn sequences(&self) -> Vec<String> {
        let inner = self.lock();
        let values = inner.books.values().map(|b| b.sequence.clone());
        self.sorted_distinct(values)
    }

    /// Genre tags actually present in the catalog.
    pub fn genre_tags(&self) -> Vec<String> {
        let inner = self.lock();
        let mut tags: Vec<String> = inner
            .books
            .values()
            .flat_map(|b| b.genres.iter().cloned())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    fn sorted_distinct(&self, values: impl Iterator<Item = String>) -> Vec<String> {
        let mut list: Vec<String> = values.filter(|s| s.chars().count() > 1).collect();
        list.sort_by(|a, b| collation_key(a, self.russian).cmp(&collation_key(b, self.russian)));
        list.dedup();
        list
    }

    // --- Queries ----------------------------------------------------------

    /// Case-insensitive substring match in title or sequence.
    pub fn books_by_title(&self, text: &str) -> Vec<Book> {
        let needle = text.to_lowercase();
        self.select(|b| {
            b.title.to_lowercase().contains(&needle)
                || b.sequence.to_lowercase().contains(&needle)
        })
    }

    pub fn books_by_author(&self, author: &str) -> Vec<Book> {
        self.select(|b| b.authors.iter().any(|a| a == author))
    }

    pub fn books_by_sequence(&self, sequence: &str) -> Vec<Book> {
        let needle = sequence.to_lowercase();
        self.select(|b| b.sequence.to_lowercase().contains(&needle))
    }

    pub fn books_by_genre(&self, tag: &str) -> Vec<Book> {
        self.select(|b| b.genres.iter().any(|g| g == tag))
    }

    /// Prefix match by default; substring match for OpenSearch. An empty
    /// result is retried with the words of the name reversed.
    pub fn authors_by_name(&self, name: &str, open_search: bool) -> Vec<String> {
        let found = self.match_authors(name, open_search);
        if !found.is_empty() {
            return found;
        }
        self.match_authors(&soundex::words_reversed(name), open_search)
    }

    fn match_authors(&self, name: &str, open_search: bool) -> Vec<String> {
        let needle = name.to_lowercase();
        let inner = self.lock();
        let values = inner
            .books
            .values()
            .flat_map(|b| b.authors.iter())
            .filter(|a| {
                let lower = a.to_lowercase();
                if open_search {
                    lower.contains(&needle)
                } else {
                    lower.starts_with(&needle)
                }
            })
            .cloned();
        self.sorted_distinct(values)
    }

    /// All books sorted by `added_date`, newest first.
    pub fn recent_books(&self) -> Vec<Book> {
        let mut books: Vec<Book> = self.lock().books.values().cloned().collect();
        books.sort_by(|a, b| b.added_date.cmp(&a.added_date).then(a.title.cmp(&b.title)));
        books
    }

    fn select(&self, predicate: impl Fn(&Book) -> bool) -> Vec<Book> {
        let inner = self.lock();
        let mut books: Vec<Book> = inner.books.values().filter(|b| predicate(b)).cloned().collect();
        books.sort_by(|a, b| {
            collation_key(&a.title, self.russian).cmp(&collation_key(&b.title, self.russian))
        });
        books
    }

    // --- Persistence ------------------------------------------------------

    /// Load the catalog from disk. I/O trouble leaves an empty (or
    /// partial) catalog and the server keeps running.
    pub fn load(&self) {
        match database::load(&self.database_path) {
            Ok(result) => {
                let upgraded = result.upgraded;
                let mut inner = self.lock();
                inner.books.clear();
                inner.paths.clear();
                inner.fb2_count = 0;
                inner.epub_count = 0;
                for book in result.books {
                    match book.book_type() {
                        BookType::Fb2 => inner.fb2_count += 1,
                        BookType::Epub => inner.epub_count += 1,
                    }
                    inner.paths.insert(book.file_name.clone(), book.id.clone());
                    inner.books.insert(book.id.clone(), book);
                }
                inner.is_changed = upgraded;
                tracing::info!(
                    "catalog loaded: {} books ({} fb2, {} epub){}",
                    inner.books.len(),
                    inner.fb2_count,
                    inner.epub_count,
                    if upgraded { ", upgraded from v1.0" } else { "" }
                );
            }
            Err(database::DatabaseError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no catalog at {:?}, starting empty", self.database_path);
            }
            Err(e) => {
                tracing::warn!("failed to load catalog {:?}: {e}", self.database_path);
            }
        }
    }

    /// Rewrite the database file. Skipped for an empty library.
    pub fn save(&self) {
        let mut inner = self.lock();
        if inner.books.is_empty() {
            return;
        }
        match database::save(&self.database_path, inner.books.values()) {
            Ok(()) => {
                inner.is_changed = false;
                tracing::info!("catalog saved: {} books", inner.books.len());
            }
            Err(e) => tracing::warn!("failed to save catalog {:?}: {e}", self.database_path),
        }
    }

    /// Append one record to the on-disk log. The log may trail the
    /// in-memory state; a full rescan rebuilds it.
    pub fn append(&self, book: &Book) {
        if let Err(e) = database::append(&self.database_path, book) {
            tracing::warn!("failed to append to catalog {:?}: {e}", self.database_path);
        }
    }
}

/// Collation key for locale-aware ordering: case-insensitive everywhere;
/// under Russian collation `ё` sorts directly after `е` instead of after
/// `я` (its code-point position).
fn collation_key(s: &str, russian: bool) -> Vec<u32> {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| {
            if russian && c == 'ё' {
                ('е' as u32) * 2 + 1
            } else {
                (c as u32) * 2
            }
        })
        .collect()
}
