//! In-memory blob storage backend for testing

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::BlobStore,
    types::{join_locator, ByteStream, ListPage},
};

type Containers = HashMap<String, BTreeMap<String, Vec<u8>>>;

/// In-memory blob store with deterministic paging and fault injection
#[derive(Clone)]
pub struct MemoryBlobStore {
    containers: Arc<RwLock<Containers>>,
    page_size: Option<usize>,
    chunk_size: usize,
    listing_failure: Option<String>,
    transient_read_failures: Arc<RwLock<HashMap<String, u32>>>,
    read_counts: Arc<RwLock<HashMap<String, u32>>>,
    list_calls: Arc<RwLock<u32>>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            containers: Arc::new(RwLock::new(HashMap::new())),
            page_size: None,
            chunk_size: 4096,
            listing_failure: None,
            transient_read_failures: Arc::new(RwLock::new(HashMap::new())),
            read_counts: Arc::new(RwLock::new(HashMap::new())),
            list_calls: Arc::new(RwLock::new(0)),
        }
    }

    /// Seed an object at construction time
    pub fn with_object(self, container: &str, key: &str, content: impl Into<Vec<u8>>) -> Self {
        if let Ok(mut containers) = self.containers.try_write() {
            containers
                .entry(normalize(container))
                .or_default()
                .insert(key.to_string(), content.into());
        }
        self
    }

    /// Register an empty container so listings against it succeed
    pub fn with_container(self, container: &str) -> Self {
        if let Ok(mut containers) = self.containers.try_write() {
            containers.entry(normalize(container)).or_default();
        }
        self
    }

    /// Cap every page at `page_size` items, overriding the caller's request
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Deliver object bodies in chunks of `chunk_size` bytes
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Make every listing fail with an unavailable error
    pub fn with_listing_failure(mut self, message: &str) -> Self {
        self.listing_failure = Some(message.to_string());
        self
    }

    /// Fail the next `count` reads of `locator` with a retryable error
    pub async fn fail_reads(&self, locator: &str, count: u32) {
        self.transient_read_failures
            .write()
            .await
            .insert(locator.to_string(), count);
    }

    /// Insert or replace an object
    pub async fn put(&self, container: &str, key: &str, content: impl Into<Vec<u8>>) {
        self.containers
            .write()
            .await
            .entry(normalize(container))
            .or_default()
            .insert(key.to_string(), content.into());
    }

    /// Read an object back in full
    pub async fn get(&self, locator: &str) -> Option<Vec<u8>> {
        let (container, key) = self.split(locator).await.ok()?;
        self.containers
            .read()
            .await
            .get(&container)
            .and_then(|objects| objects.get(&key))
            .cloned()
    }

    /// Number of times `locator` has been opened
    pub async fn read_count(&self, locator: &str) -> u32 {
        self.read_counts
            .read()
            .await
            .get(locator)
            .copied()
            .unwrap_or(0)
    }

    /// Number of listing pages served
    pub async fn list_calls(&self) -> u32 {
        *self.list_calls.read().await
    }

    /// Split a full locator into its registered container and key
    async fn split(&self, locator: &str) -> StorageResult<(String, String)> {
        let containers = self.containers.read().await;
        containers
            .keys()
            .filter(|container| locator.starts_with(&format!("{}/", container)))
            .max_by_key(|container| container.len())
            .map(|container| {
                (
                    container.clone(),
                    locator[container.len() + 1..].to_string(),
                )
            })
            .ok_or_else(|| StorageError::not_found(locator))
    }
}

fn normalize(container: &str) -> String {
    container.trim_end_matches('/').to_string()
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        page_size: usize,
    ) -> StorageResult<ListPage> {
        *self.list_calls.write().await += 1;

        if let Some(message) = &self.listing_failure {
            return Err(StorageError::unavailable(message));
        }

        let container = normalize(container);
        let containers = self.containers.read().await;
        let objects = containers
            .get(&container)
            .ok_or_else(|| StorageError::not_found(format!("container {}", container)))?;

        let page_size = self.page_size.unwrap_or(page_size).max(1);
        let lower = match continuation_token {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };

        let mut matching = objects
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(prefix));

        let keys: Vec<&String> = matching.by_ref().take(page_size).collect();
        let has_more = matching.next().is_some();

        let continuation_token = if has_more {
            keys.last().map(|key| key.to_string())
        } else {
            None
        };

        Ok(ListPage {
            items: keys
                .into_iter()
                .map(|key| join_locator(&container, key))
                .collect(),
            continuation_token,
        })
    }

    async fn open(&self, locator: &str) -> StorageResult<ByteStream> {
        *self
            .read_counts
            .write()
            .await
            .entry(locator.to_string())
            .or_insert(0) += 1;

        {
            let mut failures = self.transient_read_failures.write().await;
            if let Some(remaining) = failures.get_mut(locator) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StorageError::unavailable(format!(
                        "injected read failure for {}",
                        locator
                    )));
                }
            }
        }

        let content = self
            .get(locator)
            .await
            .ok_or_else(|| StorageError::not_found(locator))?;

        let chunks: Vec<StorageResult<Vec<u8>>> = content
            .chunks(self.chunk_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();

        Ok(stream::iter(chunks).boxed())
    }

    async fn write_text(&self, container: &str, name: &str, content: &str) -> StorageResult<String> {
        self.put(container, name, content.as_bytes().to_vec()).await;
        Ok(join_locator(&normalize(container), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryBlobStore {
        MemoryBlobStore::new()
            .with_object("mem://trips", "2013/a.csv", "a")
            .with_object("mem://trips", "2013/b.csv", "b")
            .with_object("mem://trips", "2013/c.csv", "c")
            .with_object("mem://trips", "2014/d.csv", "d")
    }

    #[tokio::test]
    async fn test_list_page_follows_tokens() {
        let store = store().with_page_size(2);

        let first = store.list_page("mem://trips", "2013/", None, 100).await.unwrap();
        assert_eq!(
            first.items,
            vec!["mem://trips/2013/a.csv", "mem://trips/2013/b.csv"]
        );
        let token = first.continuation_token.clone().unwrap();

        let second = store
            .list_page("mem://trips", "2013/", Some(&token), 100)
            .await
            .unwrap();
        assert_eq!(second.items, vec!["mem://trips/2013/c.csv"]);
        assert!(second.continuation_token.is_none());
    }

    #[tokio::test]
    async fn test_list_page_missing_container() {
        let err = store()
            .list_page("mem://other", "", None, 10)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_open_counts_reads_and_injects_failures() {
        let store = store().with_chunk_size(1);
        store.fail_reads("mem://trips/2013/a.csv", 1).await;

        assert!(store.open("mem://trips/2013/a.csv").await.is_err());
        let chunks: Vec<_> = store
            .open("mem://trips/2013/a.csv")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(store.read_count("mem://trips/2013/a.csv").await, 2);
    }

    #[tokio::test]
    async fn test_write_text_round_trips() {
        let store = MemoryBlobStore::new();
        let locator = store
            .write_text("mem://results", "out.txt", "Sun: 1")
            .await
            .unwrap();
        assert_eq!(locator, "mem://results/out.txt");
        assert_eq!(store.get(&locator).await.unwrap(), b"Sun: 1".to_vec());
    }
}
