//! Shared types for blob storage

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

/// Streaming body of one object, delivered as raw byte chunks
pub type ByteStream = BoxStream<'static, StorageResult<Vec<u8>>>;

/// One page of a prefix listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    /// Full locators of the objects on this page
    pub items: Vec<String>,
    /// Token to request the next page; `None` when the listing is exhausted
    pub continuation_token: Option<String>,
}

impl ListPage {
    /// A terminal page
    pub fn last(items: Vec<String>) -> Self {
        Self {
            items,
            continuation_token: None,
        }
    }
}

/// URI scheme families understood by the storage layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorScheme {
    File,
    Http,
    S3,
    Memory,
}

impl LocatorScheme {
    /// Classify a locator by its scheme
    pub fn of(locator: &str) -> StorageResult<Self> {
        let scheme = locator
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| StorageError::invalid_locator(format!("missing scheme in '{}'", locator)))?;

        match scheme.as_str() {
            "file" => Ok(Self::File),
            "http" | "https" => Ok(Self::Http),
            "s3" => Ok(Self::S3),
            "mem" => Ok(Self::Memory),
            other => Err(StorageError::invalid_locator(format!(
                "unsupported scheme '{}' in '{}'",
                other, locator
            ))),
        }
    }
}

/// Join a container locator and an object key with exactly one separator
pub fn join_locator(container: &str, key: &str) -> String {
    format!(
        "{}/{}",
        container.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_classification() {
        assert_eq!(LocatorScheme::of("file:///data").unwrap(), LocatorScheme::File);
        assert_eq!(
            LocatorScheme::of("https://acct.blob.core.windows.net/c").unwrap(),
            LocatorScheme::Http
        );
        assert_eq!(LocatorScheme::of("s3://bucket").unwrap(), LocatorScheme::S3);
        assert_eq!(LocatorScheme::of("mem://trips").unwrap(), LocatorScheme::Memory);
        assert!(LocatorScheme::of("ftp://host/x").is_err());
        assert!(LocatorScheme::of("no-scheme").is_err());
    }

    #[test]
    fn test_join_locator_normalizes_separators() {
        assert_eq!(join_locator("mem://c/", "/a.csv"), "mem://c/a.csv");
        assert_eq!(join_locator("mem://c", "y/a.csv"), "mem://c/y/a.csv");
    }
}
