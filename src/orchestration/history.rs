//! Append-only execution history
//!
//! Every instance is fully described by its ordered list of
//! [`HistoryEvent`]s. Timestamps are informational; replay only reads the
//! order, the task ids and the recorded results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::activity::RetryPolicy;

/// One entry in an instance's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum HistoryEvent {
    ExecutionStarted {
        instance_id: String,
        orchestrator: String,
        input: Value,
        timestamp: DateTime<Utc>,
    },
    /// Marks the start of one replay episode
    OrchestratorStarted {
        episode: u32,
        timestamp: DateTime<Utc>,
    },
    TaskScheduled {
        task_id: u64,
        name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry: Option<RetryPolicy>,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: u64,
        result: Value,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        task_id: u64,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    CustomStatusSet {
        status: Option<Value>,
        timestamp: DateTime<Utc>,
    },
    ExecutionCompleted {
        output: Value,
        timestamp: DateTime<Utc>,
    },
    ExecutionFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl HistoryEvent {
    /// Get a human-readable name for this event type
    pub fn event_name(&self) -> &'static str {
        use HistoryEvent::*;
        match self {
            ExecutionStarted { .. } => "execution_started",
            OrchestratorStarted { .. } => "orchestrator_started",
            TaskScheduled { .. } => "task_scheduled",
            TaskCompleted { .. } => "task_completed",
            TaskFailed { .. } => "task_failed",
            CustomStatusSet { .. } => "custom_status_set",
            ExecutionCompleted { .. } => "execution_completed",
            ExecutionFailed { .. } => "execution_failed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        use HistoryEvent::*;
        match self {
            ExecutionStarted { timestamp, .. }
            | OrchestratorStarted { timestamp, .. }
            | TaskScheduled { timestamp, .. }
            | TaskCompleted { timestamp, .. }
            | TaskFailed { timestamp, .. }
            | CustomStatusSet { timestamp, .. }
            | ExecutionCompleted { timestamp, .. }
            | ExecutionFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Task id for task-scoped events
    pub fn task_id(&self) -> Option<u64> {
        use HistoryEvent::*;
        match self {
            TaskScheduled { task_id, .. }
            | TaskCompleted { task_id, .. }
            | TaskFailed { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HistoryEvent::ExecutionCompleted { .. } | HistoryEvent::ExecutionFailed { .. }
        )
    }
}

/// Recorded result of one task, with the history position it was written at
#[derive(Debug, Clone)]
pub(crate) struct RecordedOutcome {
    pub result: Result<Value, String>,
    pub position: usize,
}

/// A task scheduled in history
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task_id: u64,
    pub name: String,
    pub input: Value,
    pub retry: Option<RetryPolicy>,
}

/// Index over a history used by one replay episode
#[derive(Debug, Default)]
pub(crate) struct ReplayState {
    scheduled: HashMap<u64, ScheduledTask>,
    outcomes: HashMap<u64, RecordedOutcome>,
    /// Position of the previous episode marker; results written after it are new
    replay_horizon: Option<usize>,
}

impl ReplayState {
    pub fn from_history(history: &[HistoryEvent]) -> Self {
        let mut state = Self::default();
        let mut markers = Vec::new();

        for (position, event) in history.iter().enumerate() {
            match event {
                HistoryEvent::OrchestratorStarted { .. } => markers.push(position),
                HistoryEvent::TaskScheduled {
                    task_id,
                    name,
                    input,
                    retry,
                    ..
                } => {
                    state.scheduled.insert(
                        *task_id,
                        ScheduledTask {
                            task_id: *task_id,
                            name: name.clone(),
                            input: input.clone(),
                            retry: retry.clone(),
                        },
                    );
                }
                HistoryEvent::TaskCompleted { task_id, result, .. } => {
                    state.outcomes.insert(
                        *task_id,
                        RecordedOutcome {
                            result: Ok(result.clone()),
                            position,
                        },
                    );
                }
                HistoryEvent::TaskFailed { task_id, error, .. } => {
                    state.outcomes.insert(
                        *task_id,
                        RecordedOutcome {
                            result: Err(error.clone()),
                            position,
                        },
                    );
                }
                _ => {}
            }
        }

        if markers.len() >= 2 {
            state.replay_horizon = Some(markers[markers.len() - 2]);
        }
        state
    }

    pub fn scheduled_name(&self, task_id: u64) -> Option<&str> {
        self.scheduled.get(&task_id).map(|task| task.name.as_str())
    }

    pub fn outcome(&self, task_id: u64) -> Option<&RecordedOutcome> {
        self.outcomes.get(&task_id)
    }

    /// Whether the episode starts by re-running code a previous episode already ran
    pub fn starts_replaying(&self) -> bool {
        self.replay_horizon.is_some()
    }

    /// Whether a result at `position` was already visible to a previous episode
    pub fn is_replayed(&self, position: usize) -> bool {
        self.replay_horizon
            .is_some_and(|horizon| position < horizon)
    }
}

/// Tasks scheduled in history that have no recorded result yet, in task order
pub fn outstanding_tasks(history: &[HistoryEvent]) -> Vec<ScheduledTask> {
    let state = ReplayState::from_history(history);
    let mut pending: Vec<ScheduledTask> = state
        .scheduled
        .values()
        .filter(|task| !state.outcomes.contains_key(&task.task_id))
        .cloned()
        .collect();
    pending.sort_by_key(|task| task.task_id);
    pending
}

/// Number of replay episodes recorded so far
pub fn episode_count(history: &[HistoryEvent]) -> u32 {
    history
        .iter()
        .filter(|event| matches!(event, HistoryEvent::OrchestratorStarted { .. }))
        .count() as u32
}
