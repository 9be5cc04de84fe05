//! The engine that drives instances to completion
//!
//! Driving an instance is a loop of episodes. Each episode appends an
//! episode marker, replays the orchestrator against the history, records
//! what it produced and dispatches newly scheduled activities as tokio
//! tasks. The engine then waits for at least one activity result, records
//! every result that is ready and replays again. All decisions are taken
//! from the persisted history, so a fresh engine can pick up an instance
//! after a crash by loading it and re-dispatching calls with no result.

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::activity::{execute_with_policy, ActivityRegistry, RetryPolicy, TaskOutcome};
use super::context::Orchestrator;
use super::errors::{HistoryError, OrchestrationError, OrchestrationResult};
use super::history::{episode_count, outstanding_tasks, HistoryEvent, ScheduledTask};
use super::replay::{run_episode, EpisodeResult};
use super::status::InstanceStatus;
use super::store::HistoryStore;

const DEFAULT_MAX_CONCURRENT: usize = 64;

type InFlight = JoinSet<(u64, TaskOutcome)>;

pub struct OrchestrationEngine {
    store: Arc<dyn HistoryStore>,
    orchestrators: HashMap<String, Arc<dyn Orchestrator>>,
    activities: ActivityRegistry,
    max_concurrent: usize,
    active: Mutex<HashSet<String>>,
}

/// Marks an instance as driven by this engine until dropped
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    instance_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.instance_id);
    }
}

impl OrchestrationEngine {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            orchestrators: HashMap::new(),
            activities: ActivityRegistry::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_orchestrator(
        mut self,
        name: impl Into<String>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        self.orchestrators.insert(name.into(), orchestrator);
        self
    }

    pub fn with_activities(mut self, activities: ActivityRegistry) -> Self {
        self.activities = activities;
        self
    }

    /// Upper bound on activities executing at the same time
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Record a new instance and return its id; nothing runs until it is driven
    pub async fn start_instance(&self, name: &str, input: Value) -> OrchestrationResult<String> {
        let instance_id = Uuid::new_v4().simple().to_string();
        self.start_instance_with_id(name, &instance_id, input).await?;
        Ok(instance_id)
    }

    pub async fn start_instance_with_id(
        &self,
        name: &str,
        instance_id: &str,
        input: Value,
    ) -> OrchestrationResult<()> {
        if !self.orchestrators.contains_key(name) {
            return Err(OrchestrationError::UnknownOrchestrator(name.to_string()));
        }
        if self.store.exists(instance_id).await? {
            return Err(OrchestrationError::InstanceExists(instance_id.to_string()));
        }

        self.store
            .append(
                instance_id,
                &[HistoryEvent::ExecutionStarted {
                    instance_id: instance_id.to_string(),
                    orchestrator: name.to_string(),
                    input,
                    timestamp: Utc::now(),
                }],
            )
            .await?;

        info!("Started instance {} of {}", instance_id, name);
        Ok(())
    }

    /// Start an instance and drive it to a terminal state
    pub async fn start_and_run(&self, name: &str, input: Value) -> OrchestrationResult<InstanceStatus> {
        let instance_id = self.start_instance(name, input).await?;
        self.run_instance(&instance_id).await
    }

    /// Drive `self.run_instance` on a background task
    ///
    /// A driver that stops on an error records the failure in the instance's
    /// history, so status queries report it even when the handle is dropped.
    pub fn spawn(
        self: &Arc<Self>,
        instance_id: &str,
    ) -> JoinHandle<OrchestrationResult<InstanceStatus>> {
        let engine = Arc::clone(self);
        let instance_id = instance_id.to_string();
        tokio::spawn(async move {
            let result = engine.run_instance(&instance_id).await;
            if let Err(err) = &result {
                engine.record_driver_failure(&instance_id, err).await;
            }
            result
        })
    }

    async fn record_driver_failure(&self, instance_id: &str, err: &OrchestrationError) {
        match err {
            // Another driver owns the instance, or there is nothing to mark
            OrchestrationError::AlreadyRunning(_)
            | OrchestrationError::InstanceNotFound(_)
            | OrchestrationError::History(HistoryError::InvalidInstanceId(_)) => {
                warn!("Driver for instance {} not started: {}", instance_id, err);
                return;
            }
            _ => error!("Driver for instance {} stopped: {}", instance_id, err),
        }

        let failed = HistoryEvent::ExecutionFailed {
            error: err.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(append_err) = self.store.append(instance_id, &[failed]).await {
            error!(
                "Could not record failure of instance {}: {}",
                instance_id, append_err
            );
        }
    }

    /// Drive an instance until it completes or fails
    ///
    /// Works the same for a fresh instance and for one whose previous driver
    /// died: scheduled calls without a recorded result are dispatched again.
    pub async fn run_instance(&self, instance_id: &str) -> OrchestrationResult<InstanceStatus> {
        let _guard = self.claim(instance_id)?;

        let mut history = self.store.load(instance_id).await?;
        let (name, input) = match history.first() {
            Some(HistoryEvent::ExecutionStarted {
                orchestrator,
                input,
                ..
            }) => (orchestrator.clone(), input.clone()),
            _ => return Err(OrchestrationError::InstanceNotFound(instance_id.to_string())),
        };

        if history.iter().any(HistoryEvent::is_terminal) {
            debug!("Instance {} already finished", instance_id);
            return snapshot(instance_id, &history);
        }

        let orchestrator = self
            .orchestrators
            .get(&name)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownOrchestrator(name.clone()))?;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut in_flight = InFlight::new();

        let outstanding = outstanding_tasks(&history);
        if !outstanding.is_empty() {
            info!(
                "Resuming instance {}: re-dispatching {} unfinished task(s)",
                instance_id,
                outstanding.len()
            );
        }
        for task in outstanding {
            self.dispatch(&mut in_flight, &semaphore, task);
        }

        loop {
            let episode = episode_count(&history) + 1;
            self.record(
                instance_id,
                &mut history,
                vec![HistoryEvent::OrchestratorStarted {
                    episode,
                    timestamp: Utc::now(),
                }],
            )
            .await?;

            let outcome = run_episode(orchestrator.as_ref(), instance_id, input.clone(), &history);
            debug!(
                instance_id,
                episode,
                replaying = outcome.replaying,
                new_tasks = outcome.new_tasks.len(),
                "Episode finished"
            );

            let mut events = Vec::new();
            if let Some(custom_status) = outcome.custom_status {
                if custom_status != current_custom_status(&history) {
                    events.push(HistoryEvent::CustomStatusSet {
                        status: custom_status,
                        timestamp: Utc::now(),
                    });
                }
            }

            match outcome.result {
                EpisodeResult::Completed(output) => {
                    events.push(HistoryEvent::ExecutionCompleted {
                        output,
                        timestamp: Utc::now(),
                    });
                    self.record(instance_id, &mut history, events).await?;
                    in_flight.abort_all();
                    info!("Instance {} completed after {} episode(s)", instance_id, episode);
                    return snapshot(instance_id, &history);
                }
                EpisodeResult::Failed(err) => {
                    warn!("Instance {} failed: {}", instance_id, err);
                    events.push(HistoryEvent::ExecutionFailed {
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    });
                    self.record(instance_id, &mut history, events).await?;
                    in_flight.abort_all();
                    return snapshot(instance_id, &history);
                }
                EpisodeResult::Suspended => {
                    let new_tasks = outcome.new_tasks;
                    events.extend(new_tasks.iter().map(|task| HistoryEvent::TaskScheduled {
                        task_id: task.task_id,
                        name: task.name.clone(),
                        input: task.input.clone(),
                        retry: task.retry.clone(),
                        timestamp: Utc::now(),
                    }));
                    // Scheduled events are durable before any dispatch happens
                    self.record(instance_id, &mut history, events).await?;
                    for task in new_tasks {
                        self.dispatch(&mut in_flight, &semaphore, task);
                    }
                }
            }

            if in_flight.is_empty() {
                let lost = outstanding_tasks(&history);
                if lost.is_empty() {
                    let err = OrchestrationError::Stalled(
                        "orchestrator is waiting but no activity is outstanding".to_string(),
                    );
                    warn!("Instance {} failed: {}", instance_id, err);
                    self.record(
                        instance_id,
                        &mut history,
                        vec![HistoryEvent::ExecutionFailed {
                            error: err.to_string(),
                            timestamp: Utc::now(),
                        }],
                    )
                    .await?;
                    return snapshot(instance_id, &history);
                }
                for task in lost {
                    self.dispatch(&mut in_flight, &semaphore, task);
                }
            }

            let results = next_results(&mut in_flight).await;
            let events = results
                .into_iter()
                .map(|(task_id, outcome)| match outcome {
                    TaskOutcome::Completed { result, attempts } => HistoryEvent::TaskCompleted {
                        task_id,
                        result,
                        attempts,
                        timestamp: Utc::now(),
                    },
                    TaskOutcome::Failed { error, attempts } => HistoryEvent::TaskFailed {
                        task_id,
                        error,
                        attempts,
                        timestamp: Utc::now(),
                    },
                })
                .collect();
            self.record(instance_id, &mut history, events).await?;
        }
    }

    pub async fn status(&self, instance_id: &str) -> OrchestrationResult<Option<InstanceStatus>> {
        let history = self.store.load(instance_id).await?;
        Ok(InstanceStatus::from_history(&history))
    }

    pub async fn history(&self, instance_id: &str) -> OrchestrationResult<Vec<HistoryEvent>> {
        Ok(self.store.load(instance_id).await?)
    }

    /// Snapshots of every known instance, ordered by id
    pub async fn list_instances(&self) -> OrchestrationResult<Vec<InstanceStatus>> {
        let mut statuses = Vec::new();
        for instance_id in self.store.list_instances().await? {
            match self.status(&instance_id).await {
                Ok(Some(status)) => statuses.push(status),
                Ok(None) => debug!("Skipping instance {} without a start event", instance_id),
                Err(e) => warn!("Failed to load instance {}: {}", instance_id, e),
            }
        }
        Ok(statuses)
    }

    /// Poll the store until the instance reaches a terminal state
    pub async fn wait_for_completion(
        &self,
        instance_id: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> OrchestrationResult<InstanceStatus> {
        let wait = async {
            loop {
                match self.status(instance_id).await? {
                    Some(status) if status.runtime_status.is_terminal() => return Ok(status),
                    Some(_) => tokio::time::sleep(poll_interval).await,
                    None => {
                        return Err(OrchestrationError::InstanceNotFound(
                            instance_id.to_string(),
                        ))
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| {
                Err(OrchestrationError::WaitTimeout {
                    instance_id: instance_id.to_string(),
                    timeout,
                })
            })
    }

    fn claim(&self, instance_id: &str) -> OrchestrationResult<ActiveGuard<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(instance_id.to_string()) {
            return Err(OrchestrationError::AlreadyRunning(instance_id.to_string()));
        }
        Ok(ActiveGuard {
            active: &self.active,
            instance_id: instance_id.to_string(),
        })
    }

    async fn record(
        &self,
        instance_id: &str,
        history: &mut Vec<HistoryEvent>,
        events: Vec<HistoryEvent>,
    ) -> Result<(), HistoryError> {
        if events.is_empty() {
            return Ok(());
        }
        self.store.append(instance_id, &events).await?;
        history.extend(events);
        Ok(())
    }

    fn dispatch(&self, in_flight: &mut InFlight, semaphore: &Arc<Semaphore>, task: ScheduledTask) {
        let activity = self.activities.get(&task.name);
        let semaphore = Arc::clone(semaphore);

        debug!("Dispatching task {} ({})", task.task_id, task.name);
        in_flight.spawn(async move {
            let ScheduledTask {
                task_id,
                name,
                input,
                retry,
            } = task;

            let Some(activity) = activity else {
                return (
                    task_id,
                    TaskOutcome::Failed {
                        error: format!("Unknown activity '{}'", name),
                        attempts: 0,
                    },
                );
            };

            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (
                    task_id,
                    TaskOutcome::Failed {
                        error: "Activity dispatcher shut down".to_string(),
                        attempts: 0,
                    },
                );
            };

            let policy = retry.unwrap_or_else(RetryPolicy::none);
            let outcome = AssertUnwindSafe(execute_with_policy(&name, activity, input, &policy))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| TaskOutcome::Failed {
                    error: format!("Activity '{}' panicked", name),
                    attempts: 1,
                });
            (task_id, outcome)
        });
    }
}

/// Wait for one result, then take every other result that is already available
async fn next_results(in_flight: &mut InFlight) -> Vec<(u64, TaskOutcome)> {
    let mut results = Vec::new();
    if let Some(joined) = in_flight.join_next().await {
        push_joined(&mut results, joined);
    }
    while let Some(joined) = in_flight.try_join_next() {
        push_joined(&mut results, joined);
    }
    results
}

fn push_joined(
    results: &mut Vec<(u64, TaskOutcome)>,
    joined: Result<(u64, TaskOutcome), tokio::task::JoinError>,
) {
    match joined {
        Ok(result) => results.push(result),
        // Its scheduled event stays without a result and is re-dispatched later
        Err(e) => warn!("Activity task did not finish: {}", e),
    }
}

fn current_custom_status(history: &[HistoryEvent]) -> Option<Value> {
    history
        .iter()
        .rev()
        .find_map(|event| match event {
            HistoryEvent::CustomStatusSet { status, .. } => Some(status.clone()),
            _ => None,
        })
        .flatten()
}

fn snapshot(instance_id: &str, history: &[HistoryEvent]) -> OrchestrationResult<InstanceStatus> {
    InstanceStatus::from_history(history)
        .ok_or_else(|| OrchestrationError::InstanceNotFound(instance_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::activity::Activity;
    use crate::orchestration::context::OrchestrationContext;
    use crate::orchestration::errors::ActivityError;
    use crate::orchestration::status::RuntimeStatus;
    use crate::orchestration::store::InMemoryHistoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Double {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Activity for Double {
        async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n: i64 = serde_json::from_value(input).map_err(ActivityError::invalid_input)?;
            if n < 0 {
                return Err(ActivityError::fatal("negative input"));
            }
            Ok(json!(n * 2))
        }
    }

    struct SumOfDoubles;

    #[async_trait(?Send)]
    impl Orchestrator for SumOfDoubles {
        async fn run(&self, ctx: &OrchestrationContext<'_>, input: Value) -> OrchestrationResult<Value> {
            let items: Vec<i64> =
                serde_json::from_value(input).map_err(OrchestrationError::serialization)?;
            ctx.set_custom_status(Some(json!({"items": items.len()})));
            let doubled: Vec<i64> = futures::future::try_join_all(
                items.iter().map(|item| ctx.call_activity::<_, i64>("double", item)),
            )
            .await?;
            ctx.set_custom_status(None);
            Ok(json!(doubled.iter().sum::<i64>()))
        }
    }

    /// Never calls anything and never finishes
    struct Stuck;

    #[async_trait(?Send)]
    impl Orchestrator for Stuck {
        async fn run(&self, _ctx: &OrchestrationContext<'_>, _input: Value) -> OrchestrationResult<Value> {
            futures::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    fn engine() -> (OrchestrationEngine, Arc<Double>) {
        let double = Arc::new(Double {
            calls: AtomicUsize::new(0),
        });
        let engine = OrchestrationEngine::new(Arc::new(InMemoryHistoryStore::new()))
            .with_orchestrator("sum_of_doubles", Arc::new(SumOfDoubles))
            .with_orchestrator("stuck", Arc::new(Stuck))
            .with_activities(ActivityRegistry::new().register("double", double.clone()))
            .with_max_concurrent(4);
        (engine, double)
    }

    #[tokio::test]
    async fn test_fan_out_runs_to_completion() {
        let (engine, double) = engine();
        let status = engine
            .start_and_run("sum_of_doubles", json!([1, 2, 3, 4, 5]))
            .await
            .unwrap();

        assert_eq!(status.runtime_status, RuntimeStatus::Completed);
        assert_eq!(status.output, Some(json!(30)));
        assert_eq!(status.custom_status, None);
        assert_eq!(status.tasks.scheduled, 5);
        assert_eq!(status.tasks.completed, 5);
        assert_eq!(double.calls.load(Ordering::SeqCst), 5);
    }

    /// Fails exactly one append, counted from the first
    struct FlakyStore {
        inner: InMemoryHistoryStore,
        appends: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl HistoryStore for FlakyStore {
        async fn append(&self, instance_id: &str, events: &[HistoryEvent]) -> Result<(), HistoryError> {
            if self.appends.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(HistoryError::Io(std::io::Error::other("disk full")));
            }
            self.inner.append(instance_id, events).await
        }

        async fn load(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, HistoryError> {
            self.inner.load(instance_id).await
        }

        async fn exists(&self, instance_id: &str) -> Result<bool, HistoryError> {
            self.inner.exists(instance_id).await
        }

        async fn list_instances(&self) -> Result<Vec<String>, HistoryError> {
            self.inner.list_instances().await
        }
    }

    #[tokio::test]
    async fn test_spawned_driver_failure_is_visible_in_status() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryHistoryStore::new(),
            appends: AtomicUsize::new(0),
            fail_on: 4,
        });
        let engine = Arc::new(
            OrchestrationEngine::new(store)
                .with_orchestrator("sum_of_doubles", Arc::new(SumOfDoubles))
                .with_activities(ActivityRegistry::new().register(
                    "double",
                    Arc::new(Double {
                        calls: AtomicUsize::new(0),
                    }),
                )),
        );
        let id = engine.start_instance("sum_of_doubles", json!([1, 2])).await.unwrap();

        // Start, marker and schedules land; recording the results fails
        let joined = engine.spawn(&id).await.unwrap();
        assert!(matches!(joined, Err(OrchestrationError::History(_))));

        let status = engine.status(&id).await.unwrap().unwrap();
        assert_eq!(status.runtime_status, RuntimeStatus::Failed);
        assert!(status.error.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_rejected_second_driver_leaves_history_alone() {
        let (engine, _) = engine();
        let engine = Arc::new(engine);
        let id = engine.start_instance("stuck", json!(null)).await.unwrap();
        let _claim = engine.claim(&id).unwrap();

        let joined = engine.spawn(&id).await.unwrap();
        assert!(matches!(joined, Err(OrchestrationError::AlreadyRunning(_))));
        let status = engine.status(&id).await.unwrap().unwrap();
        assert_eq!(status.runtime_status, RuntimeStatus::Pending);
    }

    #[tokio::test]
    async fn test_existing_instance_id_cannot_be_started_again() {
        let (engine, _) = engine();
        engine
            .start_instance_with_id("sum_of_doubles", "fixed-id", json!([1]))
            .await
            .unwrap();
        engine.run_instance("fixed-id").await.unwrap();

        let err = engine
            .start_instance_with_id("sum_of_doubles", "fixed-id", json!([2]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InstanceExists(id) if id == "fixed-id"));
    }

    #[tokio::test]
    async fn test_empty_fan_out_completes_without_dispatch() {
        let (engine, double) = engine();
        let status = engine.start_and_run("sum_of_doubles", json!([])).await.unwrap();
        assert_eq!(status.output, Some(json!(0)));
        assert_eq!(double.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_activity_failure_fails_instance() {
        let (engine, _) = engine();
        let status = engine
            .start_and_run("sum_of_doubles", json!([1, -1, 3]))
            .await
            .unwrap();
        assert_eq!(status.runtime_status, RuntimeStatus::Failed);
        assert!(status.error.unwrap().contains("negative input"));
    }

    #[tokio::test]
    async fn test_unknown_orchestrator_is_rejected() {
        let (engine, _) = engine();
        let err = engine.start_instance("missing", json!(null)).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownOrchestrator(_)));
    }

    #[tokio::test]
    async fn test_stalled_orchestrator_fails() {
        let (engine, _) = engine();
        let status = engine.start_and_run("stuck", json!(null)).await.unwrap();
        assert_eq!(status.runtime_status, RuntimeStatus::Failed);
        assert!(status.error.unwrap().contains("stalled"));
    }

    #[tokio::test]
    async fn test_resume_dispatches_only_unfinished_tasks() {
        let (engine, double) = engine();
        let id = engine
            .start_instance("sum_of_doubles", json!([1, 2, 3]))
            .await
            .unwrap();

        // Simulate a driver that scheduled three tasks and recorded one result before dying
        let now = Utc::now();
        let mut events = vec![HistoryEvent::OrchestratorStarted {
            episode: 1,
            timestamp: now,
        }];
        for (task_id, n) in [1i64, 2, 3].iter().enumerate() {
            events.push(HistoryEvent::TaskScheduled {
                task_id: task_id as u64,
                name: "double".to_string(),
                input: json!(n),
                retry: None,
                timestamp: now,
            });
        }
        events.push(HistoryEvent::TaskCompleted {
            task_id: 0,
            result: json!(2),
            attempts: 1,
            timestamp: now,
        });
        engine.store().append(&id, &events).await.unwrap();

        let status = engine.run_instance(&id).await.unwrap();
        assert_eq!(status.output, Some(json!(12)));
        assert_eq!(double.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_finished_instance_is_not_rerun() {
        let (engine, double) = engine();
        let status = engine.start_and_run("sum_of_doubles", json!([1])).await.unwrap();
        let again = engine.run_instance(&status.instance_id).await.unwrap();
        assert_eq!(again.output, Some(json!(2)));
        assert_eq!(double.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_for_completion_on_spawned_instance() {
        let (engine, _) = engine();
        let engine = Arc::new(engine);
        let id = engine
            .start_instance("sum_of_doubles", json!([10]))
            .await
            .unwrap();
        engine.spawn(&id);

        let status = engine
            .wait_for_completion(&id, Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status.output, Some(json!(20)));
    }
}
