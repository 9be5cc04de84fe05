//! Single-episode replay
//!
//! An episode rebuilds the orchestrator's state from history by running its
//! code from the start and polling it exactly once. Every awaited activity
//! with a recorded result resolves synchronously, so one poll either finishes
//! the orchestration or parks it on calls that have not completed yet.

use serde_json::Value;
use std::future::Future;
use std::task::{Context, Poll};

use super::context::{OrchestrationContext, Orchestrator};
use super::errors::OrchestrationError;
use super::history::{HistoryEvent, ReplayState, ScheduledTask};

/// How the orchestrator left this episode
#[derive(Debug)]
pub enum EpisodeResult {
    Completed(Value),
    Failed(OrchestrationError),
    /// Waiting on at least one activity without a recorded result
    Suspended,
}

#[derive(Debug)]
pub struct EpisodeOutcome {
    pub result: EpisodeResult,
    /// Calls to schedule and dispatch, in task-id order
    pub new_tasks: Vec<ScheduledTask>,
    pub custom_status: Option<Option<Value>>,
    /// Replay flag at the point the orchestrator stopped running
    pub replaying: bool,
}

/// Replay `history` through `orchestrator` once
pub fn run_episode(
    orchestrator: &dyn Orchestrator,
    instance_id: &str,
    input: Value,
    history: &[HistoryEvent],
) -> EpisodeOutcome {
    let replay = ReplayState::from_history(history);
    let ctx = OrchestrationContext::new(instance_id, &replay);

    let poll = {
        let mut future = orchestrator.run(&ctx, input);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        future.as_mut().poll(&mut cx)
    };

    let replaying = ctx.is_replaying();
    let effects = ctx.into_effects();

    // Divergence from history wins over whatever the orchestrator did with the error
    let result = match (effects.nondeterminism, poll) {
        (Some(err), _) => EpisodeResult::Failed(err),
        (None, Poll::Ready(Ok(output))) => EpisodeResult::Completed(output),
        (None, Poll::Ready(Err(err))) => EpisodeResult::Failed(err),
        (None, Poll::Pending) => EpisodeResult::Suspended,
    };

    let mut new_tasks = effects.new_tasks;
    new_tasks.sort_by_key(|task| task.task_id);

    EpisodeOutcome {
        result,
        new_tasks,
        custom_status: effects.custom_status,
        replaying,
    }
}
