//! Orchestrator-facing context for one replay episode
//!
//! Orchestrator code is plain `async` Rust, re-run from the top on every
//! episode. Each [`OrchestrationContext::call_activity`] takes the next task id
//! at call time, so ids follow program order rather than poll order. A call
//! whose id already has a recorded result resolves immediately; otherwise it
//! is queued for dispatch and its future stays pending for the rest of the
//! episode.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::activity::RetryPolicy;
use super::errors::{OrchestrationError, OrchestrationResult};
use super::history::{ReplayState, ScheduledTask};

/// Deterministic coordinator logic
///
/// Implementations must not read clocks, generate randomness or perform I/O
/// directly; all of that belongs in activities.
#[async_trait(?Send)]
pub trait Orchestrator: Send + Sync {
    async fn run(&self, ctx: &OrchestrationContext<'_>, input: Value) -> OrchestrationResult<Value>;
}

#[derive(Debug, Default)]
struct EpisodeState {
    next_task_id: u64,
    replaying: bool,
    new_tasks: Vec<ScheduledTask>,
    custom_status: Option<Option<Value>>,
    nondeterminism: Option<OrchestrationError>,
}

/// What one episode produced besides the orchestrator's return value
#[derive(Debug, Default)]
pub struct EpisodeEffects {
    /// Calls made this episode that have no history entry yet
    pub new_tasks: Vec<ScheduledTask>,
    /// `Some(..)` when the orchestrator set or cleared its custom status
    pub custom_status: Option<Option<Value>>,
    /// First divergence between replayed code and recorded history
    pub nondeterminism: Option<OrchestrationError>,
}

pub struct OrchestrationContext<'h> {
    instance_id: String,
    replay: &'h ReplayState,
    state: RefCell<EpisodeState>,
}

impl<'h> OrchestrationContext<'h> {
    pub(crate) fn new(instance_id: &str, replay: &'h ReplayState) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            replay,
            state: RefCell::new(EpisodeState {
                replaying: replay.starts_replaying(),
                ..EpisodeState::default()
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// True while the code being executed already ran in an earlier episode
    ///
    /// Flips to false once the orchestrator consumes a result recorded after
    /// the previous episode suspended.
    pub fn is_replaying(&self) -> bool {
        self.state.borrow().replaying
    }

    /// Publish an advisory status snapshot; `None` clears it
    pub fn set_custom_status(&self, status: Option<Value>) {
        self.state.borrow_mut().custom_status = Some(status);
    }

    /// Call an activity with a single attempt and no watchdog
    pub fn call_activity<I, O>(&self, name: &str, input: &I) -> ActivityFuture<'_, 'h, O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.schedule(name, input, None)
    }

    /// Call an activity under a retry/timeout policy applied by the dispatcher
    pub fn call_activity_with_retry<I, O>(
        &self,
        name: &str,
        input: &I,
        policy: &RetryPolicy,
    ) -> ActivityFuture<'_, 'h, O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.schedule(name, input, Some(policy.clone()))
    }

    fn schedule<I, O>(
        &self,
        name: &str,
        input: &I,
        retry: Option<RetryPolicy>,
    ) -> ActivityFuture<'_, 'h, O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let mut state = self.state.borrow_mut();
        let task_id = state.next_task_id;
        state.next_task_id += 1;

        let early = match self.replay.scheduled_name(task_id) {
            Some(recorded) if recorded != name => {
                let diverged = || OrchestrationError::NonDeterministic {
                    task_id,
                    recorded: recorded.to_string(),
                    called: name.to_string(),
                };
                if state.nondeterminism.is_none() {
                    state.nondeterminism = Some(diverged());
                }
                Some(diverged())
            }
            Some(_) => None,
            None => match serde_json::to_value(input) {
                Ok(input) => {
                    state.new_tasks.push(ScheduledTask {
                        task_id,
                        name: name.to_string(),
                        input,
                        retry,
                    });
                    None
                }
                Err(e) => Some(OrchestrationError::serialization(e)),
            },
        };

        ActivityFuture {
            ctx: self,
            task_id,
            name: name.to_string(),
            early,
            _output: PhantomData,
        }
    }

    /// Look up the recorded result for `task_id`, updating the replay flag
    fn resolve(&self, task_id: u64) -> Option<Result<Value, String>> {
        let outcome = self.replay.outcome(task_id)?;
        if !self.replay.is_replayed(outcome.position) {
            self.state.borrow_mut().replaying = false;
        }
        Some(outcome.result.clone())
    }

    pub(crate) fn into_effects(self) -> EpisodeEffects {
        let state = self.state.into_inner();
        EpisodeEffects {
            new_tasks: state.new_tasks,
            custom_status: state.custom_status,
            nondeterminism: state.nondeterminism,
        }
    }
}

/// Future for one activity call; ready only when history holds its result
pub struct ActivityFuture<'c, 'h, O> {
    ctx: &'c OrchestrationContext<'h>,
    task_id: u64,
    name: String,
    early: Option<OrchestrationError>,
    _output: PhantomData<fn() -> O>,
}

impl<O: DeserializeOwned> Future for ActivityFuture<'_, '_, O> {
    type Output = OrchestrationResult<O>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(err) = this.early.take() {
            return Poll::Ready(Err(err));
        }

        match this.ctx.resolve(this.task_id) {
            Some(Ok(value)) => Poll::Ready(
                serde_json::from_value(value).map_err(OrchestrationError::serialization),
            ),
            Some(Err(message)) => Poll::Ready(Err(OrchestrationError::ActivityFailed {
                name: this.name.clone(),
                task_id: this.task_id,
                message,
            })),
            // Suspended: the engine re-runs the orchestrator once a result is recorded
            None => Poll::Pending,
        }
    }
}
