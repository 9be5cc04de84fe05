//! Error types for the durable orchestration engine

use thiserror::Error;

/// Failure reported by an activity implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActivityError {
    /// Transient failure; the dispatcher may try again within the retry policy
    #[error("{0}")]
    Retryable(String),

    /// Permanent failure; never retried
    #[error("{0}")]
    Fatal(String),
}

impl ActivityError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Input that cannot be decoded is a permanent failure
    pub fn invalid_input(err: serde_json::Error) -> Self {
        Self::Fatal(format!("invalid activity input: {}", err))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Errors from persisting or loading instance history
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid instance id '{0}'")]
    InvalidInstanceId(String),

    #[error("Corrupt history for instance {instance_id} at line {line}: {reason}")]
    Corrupt {
        instance_id: String,
        line: usize,
        reason: String,
    },
}

/// Errors surfaced by orchestrator code and the engine driving it
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// An awaited activity failed permanently
    #[error("Activity '{name}' (task {task_id}) failed: {message}")]
    ActivityFailed {
        name: String,
        task_id: u64,
        message: String,
    },

    /// Replayed code issued a different call than the one recorded at this position
    #[error("Non-deterministic orchestration: task {task_id} was recorded as '{recorded}' but replay called '{called}'")]
    NonDeterministic {
        task_id: u64,
        recorded: String,
        called: String,
    },

    /// The orchestrator is suspended but nothing is outstanding that could wake it
    #[error("Orchestration stalled: {0}")]
    Stalled(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown orchestrator '{0}'")]
    UnknownOrchestrator(String),

    #[error("Instance {0} not found")]
    InstanceNotFound(String),

    #[error("Instance {0} is already being driven by this engine")]
    AlreadyRunning(String),

    #[error("Instance {0} already exists")]
    InstanceExists(String),

    #[error("Timed out after {timeout:?} waiting for instance {instance_id}")]
    WaitTimeout {
        instance_id: String,
        timeout: std::time::Duration,
    },

    #[error(transparent)]
    History(#[from] HistoryError),

    /// Orchestrator-defined terminal failure
    #[error("{0}")]
    Custom(String),
}

impl OrchestrationError {
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
