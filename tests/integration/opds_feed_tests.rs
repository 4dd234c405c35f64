use tinyopds::library::book::Book;
use tinyopds::library::book::id_from_string;

use super::*;

fn seed_book(state: &AppState, file: &str, title: &str, author: &str) {
    let mut book = Book::new(file);
    book.id = id_from_string(file);
    book.title = title.to_string();
    book.authors.push(author.to_string());
    book.genres.push("sf".to_string());
    state.library.add(book);
}

fn empty_state() -> AppState {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    test_state(test_config(lib_dir.path(), data_dir.path(), ""))
}

#[tokio::test]
async fn root_feed_is_atom_with_host_substituted() {
    let state = empty_state();
    let resp = get_from(
        test_router(state),
        "/",
        [127, 0, 0, 1],
        &[("host", "books.example:8080")],
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/atom+xml;charset=utf-8")
    );

    let xml = body_string(resp).await;
    assert!(xml.contains(r#"<feed xmlns="http://www.w3.org/2005/Atom">"#));
    assert!(xml.contains("http://books.example:8080/authorsindex"));
    assert!(xml.contains("http://books.example:8080/favicon.ico"));
    assert!(!xml.contains("{$HOST}"));
}

#[tokio::test]
async fn root_prefix_is_stripped_and_reinjected() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let state = test_state(test_config(
        lib_dir.path(),
        data_dir.path(),
        "[server]\nroot_prefix = \"opds\"",
    ));

    let resp = get_from(
        test_router(state.clone()),
        "/opds/",
        [127, 0, 0, 1],
        &[("host", "h")],
    )
    .await;
    assert_eq!(resp.status(), 200);
    let xml = body_string(resp).await;
    assert!(xml.contains("http://h/opds/authorsindex"));

    // Double slashes collapse before routing.
    let resp = get_from(
        test_router(state),
        "/opds//authorsindex",
        [127, 0, 0, 1],
        &[("host", "h")],
    )
    .await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn authorsindex_filters_by_prefix() {
    let state = empty_state();
    seed_book(&state, "a.fb2", "One", "Adams Amy");
    seed_book(&state, "b.fb2", "Two", "Archer Ann");
    seed_book(&state, "c.fb2", "Three", "Baker Bill");

    let xml = body_string(get(test_router(state), "/authorsindex/A").await).await;
    assert!(xml.contains("Adams Amy"));
    assert!(xml.contains("Archer Ann"));
    assert!(!xml.contains("Baker Bill"));
}

#[tokio::test]
async fn author_feed_lists_exactly_that_authors_books() {
    let state = empty_state();
    seed_book(&state, "a.fb2", "Alpha", "Doe John");
    seed_book(&state, "b.fb2", "Beta", "Doe John");
    seed_book(&state, "c.fb2", "Gamma", "Smith Anna");

    let expected = state.library.books_by_author("Doe John");
    let xml = body_string(get(test_router(state), "/author/Doe%20John").await).await;

    for book in &expected {
        assert!(xml.contains(&book.title));
        assert!(xml.contains(&format!("tag:book:{}", book.id)));
    }
    assert!(!xml.contains("Gamma"));
}

#[tokio::test]
async fn genre_navigation_reaches_books() {
    let state = empty_state();
    seed_book(&state, "a.fb2", "Deep Space", "Doe John");

    let categories = body_string(get(test_router(state.clone()), "/genres").await).await;
    assert!(categories.contains("Science Fiction"));

    let books = body_string(get(test_router(state), "/genre/sf").await).await;
    assert!(books.contains("Deep Space"));
}

#[tokio::test]
async fn newdate_feed_lists_recent_first() {
    let state = empty_state();
    // Admission order fixes the added_date order.
    seed_book(&state, "old.fb2", "Older", "Doe John");
    seed_book(&state, "new.fb2", "Newer", "Doe John");

    let xml = body_string(get(test_router(state), "/newdate").await).await;
    let newer = xml.find("Newer").unwrap();
    let older = xml.find("Older").unwrap();
    assert!(newer < older);
}

#[tokio::test]
async fn opensearch_two_phase_flow() {
    let state = empty_state();
    seed_book(&state, "a.fb2", "War and Peace", "Tolstoy Leo");
    seed_book(&state, "b.fb2", "Tolstoy Essays", "Critic Carl");

    // Phase 1: the term hits both authors and titles.
    let xml = body_string(
        get(test_router(state.clone()), "/search?searchTerm=tolstoy").await,
    )
    .await;
    assert!(xml.contains("searchType=authors"));
    assert!(xml.contains("searchType=books"));

    // Phase 2: books partition, parameters round-tripped.
    let xml = body_string(
        get(
            test_router(state),
            "/search?searchType=books&searchTerm=tolstoy&pageNumber=0",
        )
        .await,
    )
    .await;
    assert!(xml.contains("Tolstoy Essays"));
    assert!(!xml.contains("War and Peace"));
}

#[tokio::test]
async fn favicon_served_for_ico_paths() {
    let state = empty_state();
    let resp = get(test_router(state), "/favicon.ico").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("image/x-icon")
    );
    let body = body_bytes(resp).await;
    assert!(!body.is_empty());
}

#[tokio::test]
async fn post_is_rejected() {
    let state = empty_state();
    let mut request = axum::http::Request::builder()
        .method("POST")
        .uri("/")
        .body(axum::body::Body::from("ignored"))
        .unwrap();
    request
        .extensions_mut()
        .insert(axum::extract::ConnectInfo(std::net::SocketAddr::from((
            [127, 0, 0, 1],
            54321,
        ))));
    let resp = test_router(state).oneshot(request).await.unwrap();
    assert_eq!(resp.status(), 404);
}
