use std::io::Read;

use super::*;

/// 1x1 transparent PNG.
const PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

fn fb2_with_cover(title: &str, id: &str) -> String {
    format!(
        r##"<?xml version="1.0" encoding="utf-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0" xmlns:l="http://www.w3.org/1999/xlink">
  <description>
    <title-info>
      <genre>sf</genre>
      <author><first-name>Jane</first-name><last-name>Doe</last-name></author>
      <book-title>{title}</book-title>
      <coverpage><image l:href="#cover.png"/></coverpage>
    </title-info>
    <document-info><id>{id}</id></document-info>
  </description>
  <body><p>text</p></body>
  <binary id="cover.png" content-type="image/png">{PNG_B64}</binary>
</FictionBook>"##
    )
}

#[tokio::test]
async fn fb2_zip_download_repacks_archive_entry() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();

    let fb2 = fb2_doc("Dead Star", "Sidorov", "Ivan", "11111111-1111-4111-8111-111111111111");
    {
        use std::io::Write;
        let file = std::fs::File::create(lib_dir.path().join("archive.zip")).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        zip.start_file("pack/foo.fb2", opts).unwrap();
        zip.write_all(fb2.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    scan_into(&state).await;
    let book = state
        .library
        .get_book("11111111-1111-4111-8111-111111111111")
        .unwrap();
    assert_eq!(book.file_name, "archive.zip@pack/foo.fb2");

    let resp = get(
        test_router(state),
        &format!("/{}/foo.fb2.zip", book.id),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/fb2+zip")
    );

    // The body is a fresh zip with a single transliterated entry holding
    // the original FB2 bytes.
    let body = body_bytes(resp).await;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body)).unwrap();
    assert_eq!(archive.len(), 1);
    let mut entry = archive.by_index(0).unwrap();
    assert_eq!(entry.name(), "Sidorov_Ivan_Dead_Star.fb2");
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    assert_eq!(out, fb2.as_bytes());
}

#[tokio::test]
async fn epub_download_returns_stored_bytes() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();

    let epub = epub_doc("Stored Epub", "Mark Twain", "22222222-2222-4222-8222-222222222222");
    std::fs::write(lib_dir.path().join("stored.epub"), &epub).unwrap();

    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    scan_into(&state).await;

    let resp = get(
        test_router(state),
        "/22222222-2222-4222-8222-222222222222/stored.epub",
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/epub+zip")
    );
    assert_eq!(body_bytes(resp).await, epub);
}

#[tokio::test]
async fn fb2_to_epub_without_converter_answers_404() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        lib_dir.path().join("book.fb2"),
        fb2_doc("No Converter", "Doe", "Jane", "33333333-3333-4333-8333-333333333333"),
    )
    .unwrap();

    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    scan_into(&state).await;

    let resp = get(
        test_router(state),
        "/33333333-3333-4333-8333-333333333333/book.epub",
    )
    .await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn unknown_book_artifact_answers_404() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));

    let resp = get(test_router(state), "/no-such-id/file.fb2.zip").await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn cover_and_thumbnail_are_served_and_cached() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let id = "44444444-4444-4444-8444-444444444444";
    std::fs::write(lib_dir.path().join("covered.fb2"), fb2_with_cover("Covered", id)).unwrap();

    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    scan_into(&state).await;
    assert!(state.library.get_book(id).unwrap().has_cover);

    let resp = get(test_router(state.clone()), &format!("/cover/{id}.jpeg")).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("image/jpeg")
    );
    let body = body_bytes(resp).await;
    assert_eq!(
        image::guess_format(&body).unwrap(),
        image::ImageFormat::Jpeg
    );
    assert_eq!(state.covers.len(), 1);

    let resp = get(test_router(state.clone()), &format!("/thumbnail/{id}.jpeg")).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(state.covers.len(), 2);

    // A repeat hit is served from the cache.
    let resp = get(test_router(state.clone()), &format!("/cover/{id}.jpeg")).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(state.covers.len(), 2);
}

#[tokio::test]
async fn cover_for_coverless_book_answers_404() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let id = "55555555-5555-4555-8555-555555555555";
    std::fs::write(
        lib_dir.path().join("plain.fb2"),
        fb2_doc("Plain", "Doe", "Jane", id),
    )
    .unwrap();

    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    scan_into(&state).await;

    let resp = get(test_router(state), &format!("/cover/{id}.jpeg")).await;
    assert_eq!(resp.status(), 404);
}
