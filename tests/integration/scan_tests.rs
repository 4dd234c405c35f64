use tinyopds::library::book::id_from_string;
use tinyopds::scanner;

use super::*;

#[tokio::test]
async fn cold_start_scan_save_load_round_trip() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();

    for (name, title, id) in [
        ("one.fb2", "First Book", "11111111-1111-4111-8111-111111111111"),
        ("two.fb2", "Second Book", "22222222-2222-4222-8222-222222222222"),
        ("three.fb2", "Third Book", "33333333-3333-4333-8333-333333333333"),
    ] {
        std::fs::write(lib_dir.path().join(name), fb2_doc(title, "Doe", "Jane", id)).unwrap();
    }

    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    assert_eq!(state.library.count(), 0);

    scan_into(&state).await;
    assert_eq!(state.library.fb2_count(), 3);
    assert_eq!(state.library.epub_count(), 0);

    state.library.save();

    // A second library instance over the same paths sees the same catalog.
    let reloaded = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    assert_eq!(reloaded.library.count(), 3);
    for id in [
        "11111111-1111-4111-8111-111111111111",
        "22222222-2222-4222-8222-222222222222",
        "33333333-3333-4333-8333-333333333333",
    ] {
        let before = state.library.get_book(id).unwrap();
        let after = reloaded.library.get_book(id).unwrap();
        assert_eq!(before, after);
    }
}

#[tokio::test]
async fn duplicate_id_with_different_title_keeps_both_books() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let shared = "aaaaaaaa-bbbb-4ccc-8ddd-eeeeeeeeeeee";

    let first = lib_dir.path().join("first.fb2");
    let second = lib_dir.path().join("second.fb2");
    std::fs::write(&first, fb2_doc("Original Title", "Doe", "Jane", shared)).unwrap();
    std::fs::write(&second, fb2_doc("Different Title", "Doe", "Jane", shared)).unwrap();

    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    scanner::scan_single_file(&state.library, &first);
    scanner::scan_single_file(&state.library, &second);

    assert_eq!(state.library.count(), 2);
    assert_eq!(
        state.library.get_book(shared).unwrap().title,
        "Original Title"
    );
    let rewritten = state
        .library
        .get_book(&id_from_string("second.fb2"))
        .unwrap();
    assert_eq!(rewritten.title, "Different Title");
}

#[tokio::test]
async fn v1_0_database_upgrades_on_load_and_saves_with_marker() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();

    // Database path is derived from the library path.
    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    let db_path = state.library.database_path().to_path_buf();

    // Hand-roll one v1.0 record: no marker, no added_date field.
    let mut buf = Vec::new();
    let id = "11111111-1111-4111-8111-111111111111";
    write_v10_string(&mut buf, "old.fb2");
    write_v10_string(&mut buf, id);
    buf.extend_from_slice(&1.0f32.to_le_bytes()); // version
    write_v10_string(&mut buf, "Old Book");
    write_v10_string(&mut buf, "en");
    buf.push(0); // has_cover
    buf.extend_from_slice(&0i64.to_le_bytes()); // book_date
    buf.extend_from_slice(&0i64.to_le_bytes()); // document_date
    write_v10_string(&mut buf, ""); // sequence
    buf.extend_from_slice(&0u32.to_le_bytes()); // number_in_sequence
    write_v10_string(&mut buf, ""); // annotation
    buf.extend_from_slice(&100u32.to_le_bytes()); // document_size
    buf.extend_from_slice(&1i32.to_le_bytes()); // authors
    write_v10_string(&mut buf, "Doe Jane");
    buf.extend_from_slice(&0i32.to_le_bytes()); // translators
    buf.extend_from_slice(&1i32.to_le_bytes()); // genres
    write_v10_string(&mut buf, "sf");
    std::fs::write(&db_path, &buf).unwrap();

    let loaded = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    assert_eq!(loaded.library.count(), 1);
    // Upgrade back-fills added_date with the load time and marks the
    // catalog dirty.
    let book = loaded.library.get_book(id).unwrap();
    assert!(book.added_date > 0);
    assert!(loaded.library.is_changed());

    loaded.library.save();
    let bytes = std::fs::read(&db_path).unwrap();
    // A 7-bit length prefix of 6 followed by the marker text.
    assert_eq!(bytes[0], 6);
    assert_eq!(&bytes[1..7], b"VER1.1");
}

fn write_v10_string(buf: &mut Vec<u8>, s: &str) {
    assert!(s.len() < 128, "test strings stay single-byte-prefixed");
    buf.push(s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
}

#[tokio::test]
async fn mixed_tree_scan_counts_types_and_archives() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(lib_dir.path().join("nested")).unwrap();

    std::fs::write(
        lib_dir.path().join("plain.fb2"),
        fb2_doc("Plain", "Doe", "Jane", "11111111-1111-4111-8111-111111111111"),
    )
    .unwrap();
    std::fs::write(
        lib_dir.path().join("nested/book.epub"),
        epub_doc("Zipped Epub", "Mark Twain", "22222222-2222-4222-8222-222222222222"),
    )
    .unwrap();
    {
        use std::io::Write;
        let file = std::fs::File::create(lib_dir.path().join("nested/pack.zip")).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        zip.start_file("inside.fb2", opts).unwrap();
        zip.write_all(
            fb2_doc("Inside Archive", "Doe", "Jane", "33333333-3333-4333-8333-333333333333")
                .as_bytes(),
        )
        .unwrap();
        zip.finish().unwrap();
    }

    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));
    scan_into(&state).await;

    assert_eq!(state.library.count(), 3);
    assert_eq!(state.library.fb2_count(), 2);
    assert_eq!(state.library.epub_count(), 1);
    assert!(state.library.contains("nested/pack.zip@inside.fb2"));
    // The paths index stays aligned with the books index.
    for id in [
        "11111111-1111-4111-8111-111111111111",
        "22222222-2222-4222-8222-222222222222",
        "33333333-3333-4333-8333-333333333333",
    ] {
        let book = state.library.get_book(id).unwrap();
        assert!(state.library.contains(&book.file_name));
    }
}
