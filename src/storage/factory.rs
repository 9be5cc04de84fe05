//! Storage factory routing locators to the backend that serves their scheme

use async_trait::async_trait;
use std::sync::Arc;

use super::backends::{HttpBlobStore, LocalBlobStore, MemoryBlobStore};
#[cfg(feature = "s3")]
use super::backends::S3BlobStore;
use super::error::{StorageError, StorageResult};
use super::traits::BlobStore;
use super::types::{ByteStream, ListPage, LocatorScheme};

/// Blob store that dispatches each call by the locator's URI scheme
#[derive(Clone)]
pub struct RoutingBlobStore {
    local: Arc<dyn BlobStore>,
    http: Arc<dyn BlobStore>,
    s3: Option<Arc<dyn BlobStore>>,
    memory: Option<Arc<dyn BlobStore>>,
}

impl RoutingBlobStore {
    /// Route `file://` locally and `http(s)://` through `client`
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            local: Arc::new(LocalBlobStore::new()),
            http: Arc::new(HttpBlobStore::new(client)),
            s3: None,
            memory: None,
        }
    }

    /// Serve `mem://` locators from an in-memory store
    pub fn with_memory(mut self, store: MemoryBlobStore) -> Self {
        self.memory = Some(Arc::new(store));
        self
    }

    /// Serve `s3://` locators from the given store
    pub fn with_s3(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.s3 = Some(store);
        self
    }

    fn backend(&self, locator: &str) -> StorageResult<&Arc<dyn BlobStore>> {
        match LocatorScheme::of(locator)? {
            LocatorScheme::File => Ok(&self.local),
            LocatorScheme::Http => Ok(&self.http),
            LocatorScheme::S3 => self.s3.as_ref().ok_or_else(|| {
                StorageError::configuration("S3 backend not enabled. Enable with --features s3")
            }),
            LocatorScheme::Memory => self
                .memory
                .as_ref()
                .ok_or_else(|| StorageError::configuration("no in-memory store registered")),
        }
    }
}

#[async_trait]
impl BlobStore for RoutingBlobStore {
    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        page_size: usize,
    ) -> StorageResult<ListPage> {
        self.backend(container)?
            .list_page(container, prefix, continuation_token, page_size)
            .await
    }

    async fn open(&self, locator: &str) -> StorageResult<ByteStream> {
        self.backend(locator)?.open(locator).await
    }

    async fn write_text(&self, container: &str, name: &str, content: &str) -> StorageResult<String> {
        self.backend(container)?
            .write_text(container, name, content)
            .await
    }
}

/// Factory for creating storage instances
pub struct StorageFactory;

impl StorageFactory {
    /// Build the default routing store; S3 is attached when the feature is enabled
    pub async fn from_client(client: reqwest::Client) -> StorageResult<Arc<dyn BlobStore>> {
        #[allow(unused_mut)]
        let mut store = RoutingBlobStore::new(client);

        #[cfg(feature = "s3")]
        {
            let endpoint = std::env::var("TRIPREDUCE_S3_ENDPOINT").ok();
            let s3 = S3BlobStore::new(endpoint.as_deref()).await?;
            store = store.with_s3(Arc::new(s3));
        }

        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_memory_scheme() {
        let memory = MemoryBlobStore::new().with_object("mem://trips", "a.csv", "x");
        let store = RoutingBlobStore::new(reqwest::Client::new()).with_memory(memory);

        let page = store.list_page("mem://trips", "", None, 10).await.unwrap();
        assert_eq!(page.items, vec!["mem://trips/a.csv"]);
    }

    #[tokio::test]
    async fn test_unregistered_scheme_is_configuration_error() {
        let store = RoutingBlobStore::new(reqwest::Client::new());
        let err = store.list_page("mem://trips", "", None, 10).await.unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));

        let err = store.list_page("gopher://x", "", None, 10).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidLocator(_)));
    }

    #[tokio::test]
    async fn test_http_writes_are_unsupported() {
        let store = RoutingBlobStore::new(reqwest::Client::new());
        let err = store
            .write_text("https://example.invalid/results", "report.txt", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unsupported(_)));
    }
}
