//! HTTP(S) blob container backend
//!
//! Containers addressed by `http://` or `https://` locators are read through
//! an injected [`reqwest::Client`]. Listing uses the blob-service
//! `restype=container&comp=list` API, one XML page per call, with the
//! service's `NextMarker` as continuation token. A query string on the
//! container locator (a SAS token) is carried over to every request.
//! Writing needs provider credentials and is rejected as unsupported.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::BlobStore,
    types::{ByteStream, ListPage},
};

/// Largest page the blob service returns
const MAX_RESULTS: usize = 5000;

/// Streaming reader and lister over HTTP
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    blob: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobItem {
    name: String,
}

impl HttpBlobStore {
    /// Wrap an existing client; the store owns no other connection state
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Parse one `EnumerationResults` page into item names and the next marker
fn parse_listing(xml: &str) -> StorageResult<(Vec<String>, Option<String>)> {
    let results: EnumerationResults = quick_xml::de::from_str(xml)
        .map_err(|e| StorageError::connection(format!("malformed listing response: {}", e)))?;

    let names = results.blobs.blob.into_iter().map(|blob| blob.name).collect();
    let next_marker = results
        .next_marker
        .map(|marker| marker.trim().to_string())
        .filter(|marker| !marker.is_empty());
    Ok((names, next_marker))
}

/// Locator of `name` inside `container`, keeping the container's query string
fn item_locator(container: &Url, name: &str) -> StorageResult<String> {
    let mut url = container.clone();
    url.path_segments_mut()
        .map_err(|_| StorageError::invalid_locator(container.as_str()))?
        .pop_if_empty()
        .extend(name.split('/'));
    Ok(url.to_string())
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        page_size: usize,
    ) -> StorageResult<ListPage> {
        let container_url = Url::parse(container.trim_end_matches('/'))?;
        let max_results = page_size.clamp(1, MAX_RESULTS).to_string();

        let mut query = vec![
            ("restype", "container"),
            ("comp", "list"),
            ("maxresults", max_results.as_str()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix", prefix));
        }
        if let Some(marker) = continuation_token {
            query.push(("marker", marker));
        }

        debug!("LIST {} prefix={:?} marker={:?}", container, prefix, continuation_token);
        let body = self
            .client
            .get(container_url.clone())
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let (names, continuation_token) = parse_listing(&body)?;
        let items = names
            .iter()
            .map(|name| item_locator(&container_url, name))
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(ListPage {
            items,
            continuation_token,
        })
    }

    async fn open(&self, locator: &str) -> StorageResult<ByteStream> {
        debug!("GET {}", locator);
        let response = self
            .client
            .get(locator)
            .send()
            .await?
            .error_for_status()?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(StorageError::from));

        Ok(body.boxed())
    }

    async fn write_text(&self, container: &str, _name: &str, _content: &str) -> StorageResult<String> {
        Err(StorageError::unsupported(format!(
            "writing is not available for HTTP container {}",
            container
        )))
    }
}
