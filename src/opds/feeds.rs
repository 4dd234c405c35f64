//! Atom feed generators for the catalog URL space.

use chrono::{SecondsFormat, Utc};

use crate::library::book::{Book, BookType, datetime_from_ticks};
use crate::state::AppState;

use super::param;
use super::xml::{FeedBuilder, HOST_PLACEHOLDER, REL_ACQUISITION, REL_IMAGE, REL_THUMBNAIL};

type FeedResult = Result<Vec<u8>, quick_xml::Error>;

fn now_updated() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn entry_updated(ticks: i64) -> String {
    datetime_from_ticks(ticks).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// GET `/` — the root catalog.
pub fn root_feed(state: &AppState) -> FeedResult {
    let updated = now_updated();
    let mut fb = FeedBuilder::new();
    fb.begin_feed("tag:root", &state.config.opds.title, &updated)?;
    fb.write_search_link()?;

    let library = &state.library;
    fb.write_nav_entry(
        "tag:root:authors",
        "By authors",
        &format!("{HOST_PLACEHOLDER}/authorsindex"),
        &format!("{} authors", library.authors().len()),
        &updated,
    )?;
    fb.write_nav_entry(
        "tag:root:sequences",
        "By series",
        &format!("{HOST_PLACEHOLDER}/sequencesindex"),
        &format!("{} series", library.sequences().len()),
        &updated,
    )?;
    fb.write_nav_entry(
        "tag:root:genres",
        "By genres",
        &format!("{HOST_PLACEHOLDER}/genres"),
        &format!("{} genres", library.genre_tags().len()),
        &updated,
    )?;
    fb.write_nav_entry(
        "tag:root:newdate",
        "New books",
        &format!("{HOST_PLACEHOLDER}/newdate"),
        &format!("{} books total", library.count()),
        &updated,
    )?;
    fb.finish()
}

/// GET `/authorsindex[/prefix]` — alphabetical author browsing by
/// growing prefix. Short result sets list the authors directly;
/// anything larger splits by the next character.
pub fn authors_index(state: &AppState, prefix: &str) -> FeedResult {
    let names = state.library.authors_by_name(prefix, false);
    index_feed(
        state,
        IndexKind::Authors,
        prefix,
        names,
    )
}

/// GET `/sequencesindex[/prefix]` — same browsing over series names.
pub fn sequences_index(state: &AppState, prefix: &str) -> FeedResult {
    let lower = prefix.to_lowercase();
    let names: Vec<String> = state
        .library
        .sequences()
        .into_iter()
        .filter(|s| s.to_lowercase().starts_with(&lower))
        .collect();
    index_feed(state, IndexKind::Sequences, prefix, names)
}

enum IndexKind {
    Authors,
    Sequences,
}

impl IndexKind {
    fn index_route(&self) -> &'static str {
        match self {
            IndexKind::Authors => "authorsindex",
            IndexKind::Sequences => "sequencesindex",
        }
    }

    fn item_route(&self) -> &'static str {
        match self {
            IndexKind::Authors => "author",
            IndexKind::Sequences => "sequence",
        }
    }

    fn title(&self, prefix: &str) -> String {
        let what = match self {
            IndexKind::Authors => "authors",
            IndexKind::Sequences => "series",
        };
        if prefix.is_empty() {
            format!("Browse {what}")
        } else {
            format!("Browse {what}: {prefix}")
        }
    }
}

fn index_feed(state: &AppState, kind: IndexKind, prefix: &str, names: Vec<String>) -> FeedResult {
    let updated = now_updated();
    let mut fb = FeedBuilder::new();
    fb.begin_feed(
        &format!("tag:{}:{prefix}", kind.index_route()),
        &kind.title(prefix),
        &updated,
    )?;

    if names.len() <= state.config.opds.items_per_page {
        for name in names {
            fb.write_nav_entry(
                &format!("tag:{}:{name}", kind.item_route()),
                &name,
                &format!("{HOST_PLACEHOLDER}/{}/{}", kind.item_route(), encode(&name)),
                "",
                &updated,
            )?;
        }
    } else {
        // Split by the next character; the entry content carries the
        // number of names behind each deeper prefix.
        let next_len = prefix.chars().count() + 1;
        let mut groups: Vec<(String, usize)> = Vec::new();
        for name in &names {
            let group: String = name.chars().take(next_len).collect();
            let key = group.to_lowercase();
            match groups.iter_mut().find(|(g, _)| g.to_lowercase() == key) {
                Some((_, count)) => *count += 1,
                None => groups.push((group, 1)),
            }
        }

        for (group, count) in groups {
            fb.write_nav_entry(
                &format!("tag:{}:group:{group}", kind.index_route()),
                &group,
                &format!(
                    "{HOST_PLACEHOLDER}/{}/{}",
                    kind.index_route(),
                    encode(&group)
                ),
                &format!("{count} under this prefix"),
                &updated,
            )?;
        }
    }
    fb.finish()
}

/// GET `/author/<name>` — the books of one author, paged.
pub fn books_by_author(state: &AppState, name: &str, page: usize, accept_fb2: bool) -> FeedResult {
    let books = state.library.books_by_author(name);
    book_list_feed(
        state,
        &format!("tag:author:{name}"),
        &format!("Books by {name}"),
        &format!("/author/{}", encode(name)),
        books,
        page,
        accept_fb2,
    )
}

/// GET `/sequence/<name>` — the books of one series, ordered by their
/// number in it.
pub fn books_by_sequence(
    state: &AppState,
    name: &str,
    page: usize,
    accept_fb2: bool,
) -> FeedResult {
    let mut books = state.library.books_by_sequence(name);
    books.sort_by_key(|b| b.number_in_sequence);
    book_list_feed(
        state,
        &format!("tag:sequence:{name}"),
        &format!("Series {name}"),
        &format!("/sequence/{}", encode(name)),
        books,
        page,
        accept_fb2,
    )
}

/// GET `/genres` — the taxonomy's top level.
pub fn genre_categories(state: &AppState) -> FeedResult {
    let updated = now_updated();
    let russian = state.library.is_russian();
    let in_use = state.library.genre_tags();

    let mut fb = FeedBuilder::new();
    fb.begin_feed("tag:genres", "By genres", &updated)?;
    for category in state.library.genres().categories() {
        let count = category
            .subgenres
            .iter()
            .filter(|g| in_use.iter().any(|t| t == &g.tag))
            .count();
        if count == 0 {
            continue;
        }
        let title = if russian {
            &category.translation
        } else {
            &category.name
        };
        fb.write_nav_entry(
            &format!("tag:genres:{}", category.name),
            title,
            &format!("{HOST_PLACEHOLDER}/genres/{}", encode(&category.name)),
            &format!("{count} genres"),
            &updated,
        )?;
    }
    fb.finish()
}

/// GET `/genres/<category>` — the subgenres of one category.
pub fn genre_subgenres(state: &AppState, category_name: &str) -> FeedResult {
    let updated = now_updated();
    let russian = state.library.is_russian();
    let in_use = state.library.genre_tags();

    let mut fb = FeedBuilder::new();
    fb.begin_feed(
        &format!("tag:genres:{category_name}"),
        category_name,
        &updated,
    )?;
    if let Some(category) = state.library.genres().category(category_name) {
        for genre in &category.subgenres {
            if !in_use.iter().any(|t| t == &genre.tag) {
                continue;
            }
            let title = if russian { &genre.translation } else { &genre.name };
            fb.write_nav_entry(
                &format!("tag:genre:{}", genre.tag),
                title,
                &format!("{HOST_PLACEHOLDER}/genre/{}", encode(&genre.tag)),
                "",
                &updated,
            )?;
        }
    }
    fb.finish()
}

/// GET `/genre/<tag>` — the books of one genre, paged.
pub fn books_by_genre(state: &AppState, tag: &str, page: usize, accept_fb2: bool) -> FeedResult {
    let books = state.library.books_by_genre(tag);
    let label = state
        .library
        .genres()
        .display_name(tag, state.library.is_russian());
    book_list_feed(
        state,
        &format!("tag:genre:{tag}"),
        &label,
        &format!("/genre/{}", encode(tag)),
        books,
        page,
        accept_fb2,
    )
}

/// GET `/newdate` — recently added books, newest first.
pub fn recent_feed(state: &AppState, page: usize, accept_fb2: bool) -> FeedResult {
    let books = state.library.recent_books();
    book_list_feed(
        state,
        "tag:newdate",
        "New books",
        "/newdate",
        books,
        page,
        accept_fb2,
    )
}

/// GET `/search?...` — OpenSearch. Phase 1 (no `searchType`) offers the
/// author/title partitions of the match set; phase 2 lists one
/// partition, paged, with the query parameters round-tripped.
pub fn search_feed(
    state: &AppState,
    params: &[(String, String)],
    page: usize,
    accept_fb2: bool,
) -> FeedResult {
    let term = param(params, "searchTerm").unwrap_or("").trim().to_string();
    let search_type = param(params, "searchType").unwrap_or("");

    match search_type {
        "authors" => search_authors(state, &term, page),
        "books" => search_books(state, &term, page, accept_fb2),
        _ => {
            let authors = state.library.authors_by_name(&term, true);
            let books = state.library.books_by_title(&term);
            match (authors.is_empty(), books.is_empty()) {
                (false, false) => search_partitions(&term, authors.len(), books.len()),
                (false, true) => search_authors(state, &term, page),
                (true, false) => search_books(state, &term, page, accept_fb2),
                (true, true) => {
                    let mut fb = FeedBuilder::new();
                    fb.begin_feed("tag:search", "No results", &now_updated())?;
                    fb.finish()
                }
            }
        }
    }
}

fn search_partitions(term: &str, author_count: usize, book_count: usize) -> FeedResult {
    let updated = now_updated();
    let encoded = encode(term);
    let mut fb = FeedBuilder::new();
    fb.begin_feed("tag:search", &format!("Search: {term}"), &updated)?;
    fb.write_nav_entry(
        "tag:search:authors",
        "Search in authors",
        &format!("{HOST_PLACEHOLDER}/search?searchType=authors&searchTerm={encoded}"),
        &format!("{author_count} authors"),
        &updated,
    )?;
    fb.write_nav_entry(
        "tag:search:books",
        "Search in titles",
        &format!("{HOST_PLACEHOLDER}/search?searchType=books&searchTerm={encoded}"),
        &format!("{book_count} books"),
        &updated,
    )?;
    fb.finish()
}

fn search_authors(state: &AppState, term: &str, page: usize) -> FeedResult {
    let updated = now_updated();
    let names = state.library.authors_by_name(term, true);
    let per_page = state.config.opds.items_per_page;
    let (slice, has_prev, has_next) = page_slice(&names, page, per_page);

    let mut fb = FeedBuilder::new();
    fb.begin_feed("tag:search:authors", &format!("Authors: {term}"), &updated)?;
    for name in slice {
        fb.write_nav_entry(
            &format!("tag:author:{name}"),
            name,
            &format!("{HOST_PLACEHOLDER}/author/{}", encode(name)),
            "",
            &updated,
        )?;
    }
    let base = format!("/search?searchType=authors&searchTerm={}", encode(term));
    write_page_links(&mut fb, &base, page, has_prev, has_next, true)?;
    fb.finish()
}

fn search_books(state: &AppState, term: &str, page: usize, accept_fb2: bool) -> FeedResult {
    let books = state.library.books_by_title(term);
    book_list_feed_with_base(
        state,
        "tag:search:books",
        &format!("Books: {term}"),
        &format!("/search?searchType=books&searchTerm={}", encode(term)),
        true,
        books,
        page,
        accept_fb2,
    )
}

fn book_list_feed(
    state: &AppState,
    id: &str,
    title: &str,
    base_path: &str,
    books: Vec<Book>,
    page: usize,
    accept_fb2: bool,
) -> FeedResult {
    book_list_feed_with_base(state, id, title, base_path, false, books, page, accept_fb2)
}

#[allow(clippy::too_many_arguments)]
fn book_list_feed_with_base(
    state: &AppState,
    id: &str,
    title: &str,
    base_path: &str,
    base_has_query: bool,
    books: Vec<Book>,
    page: usize,
    accept_fb2: bool,
) -> FeedResult {
    let updated = now_updated();
    let per_page = state.config.opds.items_per_page;
    let (slice, has_prev, has_next) = page_slice(&books, page, per_page);

    let mut fb = FeedBuilder::new();
    fb.begin_feed(id, title, &updated)?;
    for book in slice {
        write_book_entry(&mut fb, state, book, accept_fb2)?;
    }
    write_page_links(&mut fb, base_path, page, has_prev, has_next, base_has_query)?;
    fb.finish()
}

fn page_slice<T>(items: &[T], page: usize, per_page: usize) -> (&[T], bool, bool) {
    let per_page = per_page.max(1);
    let start = page.saturating_mul(per_page).min(items.len());
    let end = (start + per_page).min(items.len());
    (&items[start..end], page > 0, end < items.len())
}

fn write_page_links(
    fb: &mut FeedBuilder,
    base_path: &str,
    page: usize,
    has_prev: bool,
    has_next: bool,
    base_has_query: bool,
) -> Result<(), quick_xml::Error> {
    let sep = if base_has_query { '&' } else { '?' };
    let prev = has_prev.then(|| {
        format!(
            "{HOST_PLACEHOLDER}{base_path}{sep}pageNumber={}",
            page.saturating_sub(1)
        )
    });
    let next = has_next.then(|| format!("{HOST_PLACEHOLDER}{base_path}{sep}pageNumber={}", page + 1));
    fb.write_pagination(prev.as_deref(), next.as_deref())
}

/// One acquisition entry: authors, genre categories, annotation, cover
/// links and the download link matched to the client's capabilities.
fn write_book_entry(
    fb: &mut FeedBuilder,
    state: &AppState,
    book: &Book,
    accept_fb2: bool,
) -> Result<(), quick_xml::Error> {
    let updated = entry_updated(book.added_date);
    fb.begin_entry(&format!("tag:book:{}", book.id), &book.title, &updated)?;

    for author in &book.authors {
        fb.write_author(author)?;
    }

    let russian = state.library.is_russian();
    for tag in &book.genres {
        let label = state.library.genres().display_name(tag, russian);
        fb.write_category(tag, &label)?;
    }

    if !book.annotation.is_empty() {
        fb.write_content_text(&book.annotation)?;
    }

    if book.has_cover {
        fb.write_link(
            &format!("{HOST_PLACEHOLDER}/cover/{}.jpeg", book.id),
            REL_IMAGE,
            "image/jpeg",
            None,
        )?;
        fb.write_link(
            &format!("{HOST_PLACEHOLDER}/thumbnail/{}.jpeg", book.id),
            REL_THUMBNAIL,
            "image/jpeg",
            None,
        )?;
    }

    let basename = super::download::download_basename(book);
    match book.book_type() {
        BookType::Epub => {
            fb.write_link(
                &format!("{HOST_PLACEHOLDER}/{}/{basename}.epub", book.id),
                REL_ACQUISITION,
                "application/epub+zip",
                None,
            )?;
        }
        BookType::Fb2 if accept_fb2 => {
            fb.write_link(
                &format!("{HOST_PLACEHOLDER}/{}/{basename}.fb2.zip", book.id),
                REL_ACQUISITION,
                "application/fb2+zip",
                None,
            )?;
        }
        // FB2 for a reader without FB2 support: advertise the converted
        // EPUB artifact instead.
        BookType::Fb2 => {
            fb.write_link(
                &format!("{HOST_PLACEHOLDER}/{}/{basename}.epub", book.id),
                REL_ACQUISITION,
                "application/epub+zip",
                None,
            )?;
        }
    }

    fb.end_entry()
}
