//! Blob storage backend implementations

pub mod file;
pub mod http;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use file::LocalBlobStore;
pub use http::HttpBlobStore;
pub use memory::MemoryBlobStore;
#[cfg(feature = "s3")]
pub use s3::S3BlobStore;
