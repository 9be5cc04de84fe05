//! Core trait definitions for the blob storage layer

use async_trait::async_trait;

use super::error::StorageResult;
use super::types::{ByteStream, ListPage};

/// Remote object storage as seen by the map-reduce activities
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch one page of objects under `container` whose key starts with `prefix`
    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        page_size: usize,
    ) -> StorageResult<ListPage>;

    /// Open a streaming read of one object
    async fn open(&self, locator: &str) -> StorageResult<ByteStream>;

    /// Write a text blob named `name` into `container`, returning its locator
    async fn write_text(&self, container: &str, name: &str, content: &str) -> StorageResult<String>;
}
