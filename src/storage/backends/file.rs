//! Local filesystem blob backend for `file://` containers

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;
use url::Url;
use walkdir::WalkDir;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::BlobStore,
    types::{ByteStream, ListPage},
};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Container directory and prefix of one listing
type ListingKey = (PathBuf, String);

/// Blob store over a directory tree; object keys are `/`-separated relative paths
///
/// The tree is walked once per listing, on its first page. Later pages are
/// served from that snapshot, which is dropped once the last page is out.
#[derive(Debug, Clone, Default)]
pub struct LocalBlobStore {
    listings: Arc<Mutex<HashMap<ListingKey, Arc<Vec<String>>>>>,
}

impl LocalBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshots(&self) -> MutexGuard<'_, HashMap<ListingKey, Arc<Vec<String>>>> {
        self.listings.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn snapshot(&self, root: &Path, prefix: &str) -> StorageResult<Arc<Vec<String>>> {
        let walk_root = root.to_path_buf();
        let walk_prefix = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || collect_keys(&walk_root, &walk_prefix))
            .await
            .map_err(|e| StorageError::Other(anyhow::anyhow!("listing task failed: {}", e)))??;
        Ok(Arc::new(keys))
    }
}

/// Resolve a `file://` locator to a filesystem path
fn to_path(locator: &str) -> StorageResult<PathBuf> {
    let url = Url::parse(locator)?;
    if url.scheme() != "file" {
        return Err(StorageError::invalid_locator(format!(
            "expected file:// locator, got '{}'",
            locator
        )));
    }
    url.to_file_path()
        .map_err(|_| StorageError::invalid_locator(format!("not a local path: '{}'", locator)))
}

fn to_locator(path: &Path) -> StorageResult<String> {
    Url::from_file_path(path)
        .map(|url| url.to_string())
        .map_err(|_| StorageError::invalid_locator(format!("not an absolute path: {}", path.display())))
}

/// Collect every file key below `root` that starts with `prefix`, sorted
///
/// Only the directory named by the prefix up to its last `/` is walked.
fn collect_keys(root: &Path, prefix: &str) -> StorageResult<Vec<String>> {
    if !root.is_dir() {
        return Err(StorageError::not_found(format!("container {}", root.display())));
    }

    let prefix_dir = &prefix[..prefix.rfind('/').map_or(0, |i| i + 1)];
    let walk_root = root.join(prefix_dir);
    if !walk_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for entry in WalkDir::new(&walk_root).follow_links(true) {
        let entry = entry.map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
    }
    keys.sort();
    Ok(keys)
}

fn not_found_or_io(err: std::io::Error, what: &str) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::not_found(what)
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        page_size: usize,
    ) -> StorageResult<ListPage> {
        let root = to_path(container)?;
        let listing: ListingKey = (root.clone(), prefix.to_string());

        let cached = continuation_token.and_then(|_| self.snapshots().get(&listing).cloned());
        let keys = match cached {
            Some(keys) => keys,
            None => {
                let keys = self.snapshot(&root, prefix).await?;
                self.snapshots().insert(listing.clone(), Arc::clone(&keys));
                keys
            }
        };

        let start = continuation_token
            .map_or(0, |token| keys.partition_point(|key| key.as_str() <= token));
        let end = (start + page_size.max(1)).min(keys.len());
        let page = &keys[start..end];
        let continuation_token = if end < keys.len() {
            page.last().cloned()
        } else {
            self.snapshots().remove(&listing);
            None
        };

        debug!(
            "Listed {} object(s) under {} with prefix '{}'",
            page.len(),
            container,
            prefix
        );

        let items = page
            .iter()
            .map(|key| to_locator(&root.join(key)))
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(ListPage {
            items,
            continuation_token,
        })
    }

    async fn open(&self, locator: &str) -> StorageResult<ByteStream> {
        let path = to_path(locator)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, locator))?;

        let body = stream::unfold(Some(file), |state| async move {
            let mut file = state?;
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(file)))
                }
                Err(e) => Some((Err(StorageError::Io(e)), None)),
            }
        });

        Ok(body.boxed())
    }

    async fn write_text(&self, container: &str, name: &str, content: &str) -> StorageResult<String> {
        let root = to_path(container)?;
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;
        to_locator(&path)
    }
}
