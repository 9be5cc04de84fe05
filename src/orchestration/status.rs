//! Instance status snapshots folded from history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::history::HistoryEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RuntimeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RuntimeStatus::Completed | RuntimeStatus::Failed)
    }
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RuntimeStatus::Pending => "Pending",
            RuntimeStatus::Running => "Running",
            RuntimeStatus::Completed => "Completed",
            RuntimeStatus::Failed => "Failed",
        };
        f.write_str(text)
    }
}

/// Activity counters for progress display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub scheduled: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Point-in-time view of one instance, as returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub instance_id: String,
    pub name: String,
    pub runtime_status: RuntimeStatus,
    pub input: Value,
    pub custom_status: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
    pub episodes: u32,
    pub tasks: TaskCounts,
}

impl InstanceStatus {
    /// Fold a history into a snapshot; `None` if the history has no start event
    pub fn from_history(history: &[HistoryEvent]) -> Option<Self> {
        let (instance_id, name, input, created_time) = match history.first()? {
            HistoryEvent::ExecutionStarted {
                instance_id,
                orchestrator,
                input,
                timestamp,
            } => (instance_id.clone(), orchestrator.clone(), input.clone(), *timestamp),
            _ => return None,
        };

        let mut status = Self {
            instance_id,
            name,
            runtime_status: RuntimeStatus::Pending,
            input,
            custom_status: None,
            output: None,
            error: None,
            created_time,
            last_updated_time: created_time,
            episodes: 0,
            tasks: TaskCounts::default(),
        };

        for event in &history[1..] {
            status.last_updated_time = event.timestamp();
            match event {
                HistoryEvent::OrchestratorStarted { .. } => {
                    status.episodes += 1;
                    if status.runtime_status == RuntimeStatus::Pending {
                        status.runtime_status = RuntimeStatus::Running;
                    }
                }
                HistoryEvent::TaskScheduled { .. } => status.tasks.scheduled += 1,
                HistoryEvent::TaskCompleted { .. } => status.tasks.completed += 1,
                HistoryEvent::TaskFailed { .. } => status.tasks.failed += 1,
                HistoryEvent::CustomStatusSet { status: custom, .. } => {
                    status.custom_status = custom.clone();
                }
                HistoryEvent::ExecutionCompleted { output, .. } => {
                    status.runtime_status = RuntimeStatus::Completed;
                    status.output = Some(output.clone());
                }
                HistoryEvent::ExecutionFailed { error, .. } => {
                    status.runtime_status = RuntimeStatus::Failed;
                    status.error = Some(error.clone());
                }
                HistoryEvent::ExecutionStarted { .. } => {}
            }
        }

        Some(status)
    }
}
