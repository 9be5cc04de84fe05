//! # tripreduce
//!
//! Average taxi trip speed per day of week, computed over a container of CSV
//! trip logs with a durable fan-out/fan-in map-reduce.
//!
//! ## Modules
//!
//! - `orchestration` - Replay-driven durable orchestration engine with append-only history
//! - `mapreduce` - The trip-speed lister, mapper, reducer, result sink and coordinator
//! - `storage` - Blob storage abstraction with file, HTTP, S3 and in-memory backends
//! - `server` - HTTP trigger and status polling API
//! - `app` - Configuration, logging and engine wiring for the binary
pub mod app;
pub mod error;
pub mod mapreduce;
pub mod orchestration;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
