use thiserror::Error;

use crate::mapreduce::MapReduceError;
use crate::orchestration::{HistoryError, OrchestrationError};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    MapReduce(#[from] MapReduceError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Exit code for the binary: 2 for bad input, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_) | Error::Config(_) | Error::Toml(_) => 2,
            Error::MapReduce(MapReduceError::InputValidation(_)) => 2,
            _ => 1,
        }
    }

    /// Whether the error was caused by the caller rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::MapReduce(MapReduceError::InputValidation(_))
                | Error::Orchestration(OrchestrationError::InstanceNotFound(_))
                | Error::Orchestration(OrchestrationError::InstanceExists(_))
                | Error::History(HistoryError::InvalidInstanceId(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_exit_with_argument_code() {
        let err: Error = MapReduceError::input("missing path").into();
        assert_eq!(err.exit_code(), 2);
        assert!(err.is_client_error());

        let err: Error = StorageError::unavailable("down").into();
        assert_eq!(err.exit_code(), 1);
        assert!(!err.is_client_error());
    }
}
