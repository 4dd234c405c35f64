mod auth_tests;
mod download_tests;
mod opds_feed_tests;
mod scan_tests;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use http_body_util::BodyExt;
use tower::ServiceExt;

use tinyopds::config::Config;
use tinyopds::library::Library;
use tinyopds::library::genres::GenreTree;
use tinyopds::state::AppState;

/// Build a Config pointing at the given temp directories, with optional
/// extra TOML sections appended.
pub fn test_config(lib_dir: &Path, data_dir: &Path, extra: &str) -> Config {
    let toml_str = format!(
        r#"
[library]
path = {lib_dir:?}
data_path = {data_dir:?}
{extra}
"#
    );
    toml::from_str(&toml_str).expect("test config should parse")
}

/// Build an AppState with a freshly loaded library.
pub fn test_state(config: Config) -> AppState {
    let library = Arc::new(Library::new(
        config.library.path.clone(),
        &config.library.data_path,
        GenreTree::load(),
        &config.opds.language,
    ));
    library.load();
    AppState::new(config, library)
}

pub fn test_router(state: AppState) -> Router {
    tinyopds::build_router(state)
}

/// Send a GET request from the given client IP with extra headers.
pub async fn get_from(
    app: Router,
    path: &str,
    ip: [u8; 4],
    headers: &[(&str, &str)],
) -> axum::response::Response {
    let mut builder = axum::http::Request::builder().uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((ip, 54321))));
    app.oneshot(request).await.unwrap()
}

/// Send a GET request with default client address and Host header.
pub async fn get(app: Router, path: &str) -> axum::response::Response {
    get_from(app, path, [127, 0, 0, 1], &[("host", "test.host")]).await
}

pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_string(response: axum::response::Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// A minimal valid FB2 document.
pub fn fb2_doc(title: &str, author_last: &str, author_first: &str, id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0">
  <description>
    <title-info>
      <genre>sf</genre>
      <author><first-name>{author_first}</first-name><last-name>{author_last}</last-name></author>
      <book-title>{title}</book-title>
      <lang>en</lang>
    </title-info>
    <document-info>
      <id>{id}</id>
      <version>1.0</version>
    </document-info>
  </description>
  <body><p>text</p></body>
</FictionBook>"#
    )
}

/// A minimal valid EPUB archive.
pub fn epub_doc(title: &str, author: &str, id: &str) -> Vec<u8> {
    use std::io::Write;

    let opf = format!(
        r#"<package xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata>
    <dc:title>{title}</dc:title>
    <dc:creator>{author}</dc:creator>
    <dc:identifier>urn:uuid:{id}</dc:identifier>
    <dc:language>en</dc:language>
    <dc:subject>Science Fiction</dc:subject>
  </metadata>
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
</package>"#
    );

    let cursor = std::io::Cursor::new(Vec::new());
    let mut zip = zip::ZipWriter::new(cursor);
    let opts =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("META-INF/container.xml", opts).unwrap();
    zip.write_all(
        br#"<container><rootfiles><rootfile full-path="content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
    )
    .unwrap();
    zip.start_file("content.opf", opts).unwrap();
    zip.write_all(opf.as_bytes()).unwrap();
    zip.start_file("ch1.xhtml", opts).unwrap();
    zip.write_all(b"<html/>").unwrap();
    zip.finish().unwrap().into_inner()
}

/// Run a full recursive scan, admitting every found book.
pub async fn scan_into(state: &AppState) {
    let scanner = tinyopds::scanner::DirectoryScanner::new();
    let mut rx = scanner.start(state.library.clone(), true);
    while let Some(event) = rx.recv().await {
        if let tinyopds::scanner::ScanEvent::BookFound(book) = event {
            state.library.add(book);
        }
    }
}
