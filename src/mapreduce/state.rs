//! Progress of a trip-speed instance, derived purely from its history

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::activities::{LIST_FILES, MAP_TRIP_SPEEDS, REDUCE_SPEEDS, WRITE_RESULT};
use crate::orchestration::HistoryEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    ListingFiles,
    Mapping,
    Reducing,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Phase::ListingFiles => "listing files",
            Phase::Mapping => "mapping",
            Phase::Reducing => "reducing",
            Phase::Done => "done",
        };
        f.write_str(text)
    }
}

/// Completed work and current phase of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationState {
    pub phase: Phase,
    /// Files returned by the lister, once it has completed
    pub files_listed: Option<usize>,
    pub mappers_scheduled: usize,
    pub mappers_completed: usize,
    pub mappers_failed: usize,
}

impl OrchestrationState {
    pub fn from_history(history: &[HistoryEvent]) -> Self {
        let mut names: HashMap<u64, &str> = HashMap::new();
        let mut state = Self {
            phase: Phase::ListingFiles,
            files_listed: None,
            mappers_scheduled: 0,
            mappers_completed: 0,
            mappers_failed: 0,
        };

        for event in history {
            match event {
                HistoryEvent::TaskScheduled { task_id, name, .. } => {
                    names.insert(*task_id, name.as_str());
                    match name.as_str() {
                        MAP_TRIP_SPEEDS => {
                            state.mappers_scheduled += 1;
                            state.phase = Phase::Mapping;
                        }
                        REDUCE_SPEEDS | WRITE_RESULT => state.phase = Phase::Reducing,
                        _ => {}
                    }
                }
                HistoryEvent::TaskCompleted {
                    task_id, result, ..
                } => match names.get(task_id).copied() {
                    Some(LIST_FILES) => {
                        state.files_listed = Some(result.as_array().map_or(0, Vec::len));
                    }
                    Some(MAP_TRIP_SPEEDS) => state.mappers_completed += 1,
                    _ => {}
                },
                HistoryEvent::TaskFailed { task_id, .. } => {
                    if names.get(task_id).copied() == Some(MAP_TRIP_SPEEDS) {
                        state.mappers_failed += 1;
                    }
                }
                HistoryEvent::ExecutionCompleted { .. } | HistoryEvent::ExecutionFailed { .. } => {
                    state.phase = Phase::Done;
                }
                _ => {}
            }
        }

        state
    }
}
