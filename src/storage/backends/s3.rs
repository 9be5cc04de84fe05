//! S3 blob backend for `s3://bucket/...` locators

use async_trait::async_trait;
use aws_sdk_s3::Client;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::BlobStore,
    types::{ByteStream, ListPage},
};

/// S3 storage backend
#[derive(Clone)]
pub struct S3BlobStore {
    client: Arc<Client>,
}

impl S3BlobStore {
    /// Create a store from the ambient AWS configuration
    pub async fn new(endpoint: Option<&str>) -> StorageResult<Self> {
        info!("Initializing S3 blob store");

        let aws_config = if let Some(endpoint) = endpoint {
            aws_config::from_env().endpoint_url(endpoint).load().await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self {
            client: Arc::new(Client::new(&aws_config)),
        })
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

/// Split `s3://bucket/some/path` into `("bucket", "some/path")`
fn split_locator(locator: &str) -> StorageResult<(String, String)> {
    let rest = locator
        .strip_prefix("s3://")
        .ok_or_else(|| StorageError::invalid_locator(format!("expected s3:// locator, got '{}'", locator)))?;
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(StorageError::invalid_locator(format!("missing bucket in '{}'", locator)));
    }
    Ok((bucket.to_string(), key.to_string()))
}

fn join_key(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        page_size: usize,
    ) -> StorageResult<ListPage> {
        let (bucket, base) = split_locator(container)?;
        let key_prefix = join_key(&base, prefix);

        let output = self
            .client
            .list_objects_v2()
            .bucket(&bucket)
            .prefix(&key_prefix)
            .set_continuation_token(continuation_token.map(str::to_string))
            .max_keys(page_size.min(i32::MAX as usize) as i32)
            .send()
            .await
            .map_err(|e| StorageError::connection(format!("ListObjectsV2 failed: {}", e)))?;

        let items: Vec<String> = output
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .map(|key| format!("s3://{}/{}", bucket, key))
            .collect();

        debug!("Listed {} object(s) in s3://{}/{}", items.len(), bucket, key_prefix);

        Ok(ListPage {
            items,
            continuation_token: output.next_continuation_token().map(str::to_string),
        })
    }

    async fn open(&self, locator: &str) -> StorageResult<ByteStream> {
        let (bucket, key) = split_locator(locator)?;

        let output = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::not_found(locator)
                } else {
                    StorageError::connection(format!("GetObject failed: {}", service_error))
                }
            })?;

        let body = stream::unfold(Some(output.body), |state| async move {
            let mut body = state?;
            match body.next().await {
                Some(Ok(bytes)) => Some((Ok(bytes.to_vec()), Some(body))),
                Some(Err(e)) => Some((
                    Err(StorageError::connection(format!("S3 body read failed: {}", e))),
                    None,
                )),
                None => None,
            }
        });

        Ok(body.boxed())
    }

    async fn write_text(&self, container: &str, name: &str, content: &str) -> StorageResult<String> {
        let (bucket, base) = split_locator(container)?;
        let key = join_key(&base, name);

        self.client
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .body(content.as_bytes().to_vec().into())
            .send()
            .await
            .map_err(|e| StorageError::connection(format!("PutObject failed: {}", e)))?;

        Ok(format!("s3://{}/{}", bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_locator() {
        assert_eq!(
            split_locator("s3://trips/yellow/2013").unwrap(),
            ("trips".to_string(), "yellow/2013".to_string())
        );
        assert_eq!(
            split_locator("s3://trips").unwrap(),
            ("trips".to_string(), String::new())
        );
        assert!(split_locator("s3:///key").is_err());
        assert!(split_locator("file:///x").is_err());
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "a.csv"), "a.csv");
        assert_eq!(join_key("yellow/", "2013"), "yellow/2013");
    }
}
