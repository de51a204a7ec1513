//! File Index Cache over the recordings directory.
//!
//! One full scan per TTL window. The scan runs while the snapshot lock is
//! held, so callers arriving during a refresh wait for it and then share the
//! result instead of starting scans of their own. Filters and paging apply to
//! the snapshot; page contents can shift between snapshots.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use streamkeeper_protocol::{FileEntry, FilePage, FileQuery, Target, ValidationError};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::metrics::METRICS;

struct Snapshot {
    taken_at: Instant,
    /// Sorted by mtime, newest first.
    entries: Arc<Vec<FileEntry>>,
}

pub struct FileIndex {
    root: PathBuf,
    ttl: Duration,
    default_page_size: usize,
    max_page_size: usize,
    snapshot: Mutex<Option<Snapshot>>,
}

impl FileIndex {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration, default_page_size: usize, max_page_size: usize) -> Self {
        Self {
            root: root.into(),
            ttl,
            default_page_size,
            max_page_size: max_page_size.max(1),
            snapshot: Mutex::new(None),
        }
    }

    pub async fn list(&self, query: &FileQuery) -> Result<FilePage, ValidationError> {
        let page_size = self.page_size(query)?;
        if query.page < 1 {
            return Err(ValidationError::invalid("page", "page must be >= 1"));
        }
        let entries = self.entries().await;
        Ok(paginate(filter(&entries, query), query.page, page_size))
    }

    fn page_size(&self, query: &FileQuery) -> Result<usize, ValidationError> {
        let size = query.page_size.unwrap_or(self.default_page_size);
        if size < 1 || size > self.max_page_size {
            return Err(ValidationError::invalid(
                "page_size",
                format!("page_size must be between 1 and {}", self.max_page_size),
            ));
        }
        Ok(size)
    }

    /// Current snapshot, refreshed when older than the TTL.
    pub async fn entries(&self) -> Arc<Vec<FileEntry>> {
        let mut guard = self.snapshot.lock().await;
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.taken_at.elapsed() < self.ttl {
                return Arc::clone(&snapshot.entries);
            }
        }

        let root = self.root.clone();
        let entries = match tokio::task::spawn_blocking(move || scan(&root)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("File scan task failed: {}", e);
                Vec::new()
            }
        };
        METRICS.inc_scans();
        debug!(root = %self.root.display(), files = entries.len(), "Recordings rescanned");

        let entries = Arc::new(entries);
        *guard = Some(Snapshot {
            taken_at: Instant::now(),
            entries: Arc::clone(&entries),
        });
        entries
    }
}

fn scan(root: &Path) -> Vec<FileEntry> {
    let mut entries: Vec<FileEntry> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let mtime: DateTime<Utc> = metadata.modified().ok()?.into();
            Some(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().display().to_string(),
                size: metadata.len(),
                mtime,
            })
        })
        .collect();
    entries.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.path.cmp(&b.path)));
    entries
}

/// True if `needle` is a path component of `path` or part of the file name.
fn mentions(entry: &FileEntry, needle: &str) -> bool {
    entry.name.contains(needle)
        || Path::new(&entry.path)
            .components()
            .any(|c| c.as_os_str().to_string_lossy() == needle)
}

fn filter<'a>(entries: &'a [FileEntry], query: &FileQuery) -> Vec<&'a FileEntry> {
    let room_id = query.room_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let url_slug = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|url| Target::Url(url.to_string()).slug());

    entries
        .iter()
        .filter(|e| room_id.map_or(true, |id| mentions(e, id)))
        .filter(|e| url_slug.as_deref().map_or(true, |slug| mentions(e, slug)))
        .filter(|e| query.from.map_or(true, |from| e.mtime >= from))
        .filter(|e| query.to.map_or(true, |to| e.mtime <= to))
        .collect()
}

fn paginate(matches: Vec<&FileEntry>, page: usize, page_size: usize) -> FilePage {
    let total = matches.len();
    let start = (page - 1).saturating_mul(page_size);
    let items = matches
        .into_iter()
        .skip(start)
        .take(page_size)
        .cloned()
        .collect();
    FilePage {
        items,
        total,
        page,
        page_size,
    }
}
