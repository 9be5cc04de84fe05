//! Durable, replay-driven orchestration
//!
//! An orchestrator is ordinary async code that calls named activities through
//! an [`OrchestrationContext`]. The [`OrchestrationEngine`] records every
//! call and every result in an append-only history and re-runs the
//! orchestrator from the start whenever a result arrives. Calls that already
//! have a recorded result resolve immediately, so the orchestrator's local
//! state is rebuilt deterministically and only new calls are dispatched.
//!
//! ```text
//! ExecutionStarted
//! OrchestratorStarted(1)  -> run: schedules task 0
//! TaskScheduled(0)
//! TaskCompleted(0)
//! OrchestratorStarted(2)  -> run: task 0 replays, schedules 1..=n
//! ...
//! ExecutionCompleted
//! ```

pub mod activity;
pub mod context;
pub mod engine;
pub mod errors;
pub mod history;
pub mod replay;
pub mod status;
pub mod store;

pub use activity::{execute_with_policy, Activity, ActivityRegistry, RetryPolicy, TaskOutcome};
pub use context::{ActivityFuture, OrchestrationContext, Orchestrator};
pub use engine::OrchestrationEngine;
pub use errors::{ActivityError, HistoryError, OrchestrationError, OrchestrationResult};
pub use history::{HistoryEvent, ScheduledTask};
pub use replay::{run_episode, EpisodeOutcome, EpisodeResult};
pub use status::{InstanceStatus, RuntimeStatus, TaskCounts};
pub use store::{HistoryStore, InMemoryHistoryStore, JsonlHistoryStore};
