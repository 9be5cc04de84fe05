//! Blob storage abstraction layer
//!
//! The map-reduce activities talk to remote object storage through the
//! [`BlobStore`] trait: paginated prefix listing, streaming object reads and
//! text writes. Locators are URIs; [`RoutingBlobStore`] picks the backend by
//! scheme (`file://`, `http(s)://`, `s3://` with the `s3` feature, `mem://`
//! for tests).

pub mod backends;
pub mod error;
pub mod factory;
pub mod traits;
pub mod types;

pub use backends::{HttpBlobStore, LocalBlobStore, MemoryBlobStore};
#[cfg(feature = "s3")]
pub use backends::S3BlobStore;
pub use error::{StorageError, StorageResult};
pub use factory::{RoutingBlobStore, StorageFactory};
pub use traits::BlobStore;
pub use types::{join_locator, ByteStream, ListPage, LocatorScheme};
