//! Complete prefix listing across pages

use tracing::debug;

use super::errors::{MapReduceError, MapReduceResult};
use super::types::FileLocator;
use crate::storage::{BlobStore, StorageError};

/// List every object under `prefix`, concatenating pages in the order returned
///
/// An empty result is valid. Any storage error aborts the listing; no
/// partial list is ever returned.
pub async fn list_files(
    store: &dyn BlobStore,
    container: &str,
    prefix: &str,
    page_size: usize,
) -> MapReduceResult<Vec<FileLocator>> {
    let listing_error = |source: StorageError| MapReduceError::Listing {
        container: container.to_string(),
        prefix: prefix.to_string(),
        source,
    };

    let mut files = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = store
            .list_page(container, prefix, token.as_deref(), page_size)
            .await
            .map_err(listing_error)?;
        pages += 1;
        files.extend(page.items);

        match page.continuation_token {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(listing_error(StorageError::unavailable(format!(
                    "continuation token '{}' repeated",
                    next
                ))));
            }
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!(
        "Listed {} file(s) in {} page(s) from {} with prefix '{}'",
        files.len(),
        pages,
        container,
        prefix
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;

    #[tokio::test]
    async fn test_concatenates_all_pages_in_order() {
        let mut store = MemoryBlobStore::new().with_page_size(2);
        for i in 0..5 {
            store = store.with_object("mem://trips", &format!("2017/{:02}.csv", i), "x");
        }

        let files = list_files(&store, "mem://trips", "2017/", 5000).await.unwrap();
        assert_eq!(files.len(), 5);
        assert_eq!(files[0], "mem://trips/2017/00.csv");
        assert_eq!(files[4], "mem://trips/2017/04.csv");
        assert_eq!(store.list_calls().await, 3);
    }

    #[tokio::test]
    async fn test_no_matches_is_empty() {
        let store = MemoryBlobStore::new().with_object("mem://trips", "2017/a.csv", "x");
        let files = list_files(&store, "mem://trips", "2018/", 100).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_is_listing_error() {
        let store = MemoryBlobStore::new()
            .with_object("mem://trips", "2017/a.csv", "x")
            .with_listing_failure("service unavailable");
        let err = list_files(&store, "mem://trips", "", 100).await.unwrap_err();
        assert!(matches!(err, MapReduceError::Listing { .. }));
    }
}
