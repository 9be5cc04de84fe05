//! Application module
//!
//! Configuration loading, logging setup, engine wiring and fatal error
//! reporting for the binary.

pub mod config;
pub mod error_handling;
pub mod logging;
pub mod runtime;

pub use config::{AppConfig, EngineSettings};
pub use error_handling::handle_fatal_error;
pub use logging::init_logging;
pub use runtime::initialize_engine;
