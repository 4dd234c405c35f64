//! Cover and thumbnail serving with an in-memory LRU cache.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use image::imageops::FilterType;

use crate::library::book::BookType;
use crate::state::AppState;

use super::download;

const JPEG_QUALITY: u8 = 85;
const CACHE_CAPACITY: usize = 1000;

/// LRU cache of encoded JPEG images keyed by `cover:<id>`/`thumb:<id>`.
/// A hit refreshes the key; inserting past capacity evicts the least
/// recently used entry.
pub struct CoverCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<String, Vec<u8>>,
    order: VecDeque<String>,
}

impl Default for CoverCache {
    fn default() -> Self {
        Self::with_capacity(CACHE_CAPACITY)
    }
}

impl CoverCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.lock();
        let data = inner.map.get(key)?.clone();
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
            inner.order.push_back(key.to_string());
        }
        Some(data)
    }

    pub fn put(&self, key: String, data: Vec<u8>) {
        let mut inner = self.lock();
        if inner.map.contains_key(&key) {
            if let Some(pos) = inner.order.iter().position(|k| k == &key) {
                inner.order.remove(pos);
            }
        } else {
            while inner.map.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.map.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        inner.order.push_back(key.clone());
        inner.map.insert(key, data);
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serve `/cover/<id>.jpeg` or `/thumbnail/<id>.jpeg`.
pub async fn serve(state: &AppState, book_id: &str, thumbnail: bool) -> Response {
    let kind = if thumbnail { "thumb" } else { "cover" };
    let key = format!("{kind}:{book_id}");

    if let Some(jpeg) = state.covers.get(&key) {
        state.auth.stats.images_sent.fetch_add(1, Ordering::Relaxed);
        return jpeg_response(jpeg);
    }

    let Some(book) = state.library.get_book(book_id) else {
        return (StatusCode::NOT_FOUND, "Bad request").into_response();
    };

    let root = state.library.library_path().to_path_buf();
    let (width, height) = if thumbnail {
        (
            state.config.opds.thumbnail_width,
            state.config.opds.thumbnail_height,
        )
    } else {
        (state.config.opds.cover_width, state.config.opds.cover_height)
    };

    let produced = tokio::task::spawn_blocking(move || {
        let data = download::fetch_book_bytes(&root, &book.file_name).ok()?;
        let raw = match book.book_type() {
            BookType::Fb2 => crate::scanner::parsers::fb2::cover(&data),
            BookType::Epub => crate::scanner::parsers::epub::cover(&data),
        }?;
        encode_jpeg(&raw, width, height).ok()
    })
    .await;

    match produced {
        Ok(Some(jpeg)) => {
            state.covers.put(key, jpeg.clone());
            state.auth.stats.images_sent.fetch_add(1, Ordering::Relaxed);
            jpeg_response(jpeg)
        }
        _ => (StatusCode::NOT_FOUND, "Bad request").into_response(),
    }
}

/// Decode, resize within the requested box and re-encode as JPEG.
fn encode_jpeg(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(data)?;
    let resized = img.resize(width, height, FilterType::Lanczos3);
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    resized.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

fn jpeg_response(data: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data,
    )
        .into_response()
}
