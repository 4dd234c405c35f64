//! Filesystem watcher for the library root.
//!
//! Create/rename/delete events on `.zip`/`.fb2`/`.epub` paths land in two
//! FIFO queues drained by a single consumer task. A path pending both
//! addition and deletion cancels out; files still being written are
//! re-queued at the tail until they open cleanly. Renames are modeled as
//! deletes of the new path and cancel against the matching create.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::library::Library;
use crate::scanner;

/// Idle sleep of the consumer loop; also the natural debounce interval
/// for files still being flushed by their writer.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct LibraryWatcher {
    added: Arc<Mutex<VecDeque<PathBuf>>>,
    deleted: Arc<Mutex<VecDeque<PathBuf>>>,
    active: Arc<AtomicBool>,
}

impl LibraryWatcher {
    /// Start watching the library root recursively. The notify backend
    /// and the consumer loop run until `stop` (or drop of the returned
    /// handle's tasks at shutdown).
    pub fn start(library: Arc<Library>) -> notify::Result<Self> {
        let root = library.library_path().to_path_buf();
        let added = Arc::new(Mutex::new(VecDeque::new()));
        let deleted = Arc::new(Mutex::new(VecDeque::new()));
        let active = Arc::new(AtomicBool::new(true));

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!("watcher error: {e}"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("watching library: {}", root.display());

        let handle = Self {
            added: added.clone(),
            deleted: deleted.clone(),
            active: active.clone(),
        };

        tokio::spawn(route_events(rx, watcher, added.clone(), deleted.clone()));
        tokio::spawn(consume(library, added, deleted, active));

        Ok(handle)
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn pending(&self) -> (usize, usize) {
        (lock(&self.added).len(), lock(&self.deleted).len())
    }
}

fn lock(queue: &Mutex<VecDeque<PathBuf>>) -> MutexGuard<'_, VecDeque<PathBuf>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_watched(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    lower.ends_with(".zip") || lower.ends_with(".fb2") || lower.ends_with(".epub")
}

/// Translate notify events into the two work queues. The watcher handle
/// is owned here so the backend lives as long as the routing task.
async fn route_events(
    mut rx: mpsc::UnboundedReceiver<Event>,
    _watcher: RecommendedWatcher,
    added: Arc<Mutex<VecDeque<PathBuf>>>,
    deleted: Arc<Mutex<VecDeque<PathBuf>>>,
) {
    while let Some(event) = rx.recv().await {
        for path in event.paths.iter().filter(|p| is_watched(p)) {
            match event.kind {
                EventKind::Create(_) => {
                    debug!("watch create: {}", path.display());
                    lock(&added).push_back(path.clone());
                }
                EventKind::Remove(_) => {
                    debug!("watch remove: {}", path.display());
                    lock(&deleted).push_back(path.clone());
                }
                // Renames behave as deletes of the new path; the paired
                // create event cancels in the consumer.
                EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
                    debug!("watch rename: {}", path.display());
                    lock(&deleted).push_back(path.clone());
                }
                _ => {}
            }
        }
    }
}

/// Serial consumer: additions first, then deletions, 100 ms naps when idle.
async fn consume(
    library: Arc<Library>,
    added: Arc<Mutex<VecDeque<PathBuf>>>,
    deleted: Arc<Mutex<VecDeque<PathBuf>>>,
    active: Arc<AtomicBool>,
) {
    while active.load(Ordering::SeqCst) {
        let next_added = lock(&added).pop_front();

        if let Some(path) = next_added {
            // A pending deletion of the same path cancels the pair.
            {
                let mut del = lock(&deleted);
                if let Some(pos) = del.iter().position(|p| p == &path) {
                    del.remove(pos);
                    continue;
                }
            }

            if !path.exists() {
                continue;
            }

            // Writer still holds the file: defer to the tail.
            if file_in_use(&path) {
                lock(&added).push_back(path);
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            // Short grace interval so a writer that created the file a
            // moment ago finishes flushing before the parse.
            tokio::time::sleep(POLL_INTERVAL).await;

            let lib = library.clone();
            let scan_path = path.clone();
            let _ = tokio::task::spawn_blocking(move || {
                scanner::scan_single_file(&lib, &scan_path)
            })
            .await;
            continue;
        }

        let next_deleted = lock(&deleted).pop_front();
        if let Some(path) = next_deleted {
            if library.delete(&path.to_string_lossy()) {
                info!("book(s) deleted: {}", path.display());
                library.save();
            }
            continue;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Probe whether another process still holds the file open for writing.
fn file_in_use(path: &Path) -> bool {
    std::fs::OpenOptions::new().read(true).open(path).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::genres::GenreTree;

    fn fb2_doc(title: &str) -> String {
        format!(
            r#"<FictionBook><description><title-info>
                <genre>sf</genre>
                <author><last-name>Doe</last-name></author>
                <book-title>{title}</book-title>
            </title-info><document-info><id>0f4e7d40-81ad-4c42-a107-bcc815f270a5</id></document-info></description></FictionBook>"#
        )
    }

    fn make_library(dir: &Path) -> Arc<Library> {
        Arc::new(Library::new(
            dir.to_path_buf(),
            dir,
            GenreTree::load(),
            "en",
        ))
    }

    #[test]
    fn test_is_watched_extensions() {
        assert!(is_watched(Path::new("/x/book.fb2")));
        assert!(is_watched(Path::new("/x/Book.EPUB")));
        assert!(is_watched(Path::new("/x/arc.zip")));
        assert!(!is_watched(Path::new("/x/readme.txt")));
    }

    #[tokio::test]
    async fn test_watcher_picks_up_created_book() {
        let dir = tempfile::tempdir().unwrap();
        let library = make_library(dir.path());
        let watcher = LibraryWatcher::start(library.clone()).unwrap();

        std::fs::write(dir.path().join("fresh.fb2"), fb2_doc("Fresh")).unwrap();

        // The backend delivers asynchronously; poll for the result.
        for _ in 0..50 {
            if library.count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(library.count(), 1);
        assert!(library.contains("fresh.fb2"));
        watcher.stop();
    }

    #[tokio::test]
    async fn test_watcher_removes_deleted_book() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.fb2");
        std::fs::write(&path, fb2_doc("Gone")).unwrap();

        let library = make_library(dir.path());
        scanner::scan_single_file(&library, &path);
        assert_eq!(library.count(), 1);

        let watcher = LibraryWatcher::start(library.clone()).unwrap();
        std::fs::remove_file(&path).unwrap();

        for _ in 0..50 {
            if library.count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(library.count(), 0);
        watcher.stop();
    }

    #[tokio::test]
    async fn test_matching_add_and_delete_cancel_out() {
        let dir = tempfile::tempdir().unwrap();
        let library = make_library(dir.path());

        let added = Arc::new(Mutex::new(VecDeque::new()));
        let deleted = Arc::new(Mutex::new(VecDeque::new()));
        let active = Arc::new(AtomicBool::new(true));

        let ghost = dir.path().join("ghost.fb2");
        lock(&added).push_back(ghost.clone());
        lock(&deleted).push_back(ghost);

        let consumer = tokio::spawn(consume(
            library.clone(),
            added.clone(),
            deleted.clone(),
            active.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;
        active.store(false, Ordering::SeqCst);
        let _ = consumer.await;

        assert!(lock(&added).is_empty());
        assert!(lock(&deleted).is_empty());
        assert_eq!(library.count(), 0);
    }
}
