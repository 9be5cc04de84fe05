//! Error types for the trip-speed map-reduce

use thiserror::Error;

use crate::orchestration::ActivityError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum MapReduceError {
    /// Trigger input that can never succeed
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// Listing the container failed; never partially returned
    #[error("Failed to list files in {container} with prefix '{prefix}': {source}")]
    Listing {
        container: String,
        prefix: String,
        #[source]
        source: StorageError,
    },

    /// Reading an object failed part-way or before the first byte
    #[error("Failed to read {locator}: {source}")]
    MapperTransport {
        locator: String,
        #[source]
        source: StorageError,
    },

    /// There is nothing to average over
    #[error("Reduction is undefined for zero aggregates")]
    ReductionUndefined,

    #[error("Failed to write result to {container}: {source}")]
    Sink {
        container: String,
        #[source]
        source: StorageError,
    },
}

impl MapReduceError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::InputValidation(message.into())
    }

    /// Only transport-level failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MapperTransport { source, .. } | Self::Sink { source, .. } => {
                source.is_retryable()
            }
            Self::InputValidation(_) | Self::Listing { .. } | Self::ReductionUndefined => false,
        }
    }
}

impl From<MapReduceError> for ActivityError {
    fn from(err: MapReduceError) -> Self {
        if err.is_retryable() {
            ActivityError::retryable(err.to_string())
        } else {
            ActivityError::fatal(err.to_string())
        }
    }
}

pub type MapReduceResult<T> = Result<T, MapReduceError>;
