//! Average trip speed per day of week, as a durable map-reduce
//!
//! - `lister` - complete paginated listing of the input files
//! - `mapper` - streaming per-file aggregation into a [`DayAggregate`]
//! - `reducer` - unweighted cross-file average and report rendering
//! - `sink` - optional write of the report to a result container
//! - `orchestrator` - the coordinator sequencing the above under replay

pub mod activities;
pub mod errors;
pub mod lister;
pub mod mapper;
pub mod orchestrator;
pub mod reducer;
pub mod request;
pub mod sink;
pub mod state;
pub mod types;

pub use errors::{MapReduceError, MapReduceResult};
pub use orchestrator::{TripSpeedOrchestrator, TRIP_SPEEDS};
pub use request::parse_trigger_path;
pub use state::{OrchestrationState, Phase};
pub use types::{DayAggregate, FileLocator, ReductionResult, ReportOutcome, WorkRequest};

use std::sync::Arc;

use crate::orchestration::{ActivityRegistry, HistoryStore, OrchestrationEngine, RetryPolicy};
use crate::storage::BlobStore;

/// Knobs for wiring the trip-speed engine
#[derive(Debug, Clone)]
pub struct MapReduceOptions {
    pub mapper_policy: RetryPolicy,
    pub page_size: usize,
    pub max_concurrent: usize,
}

impl Default for MapReduceOptions {
    fn default() -> Self {
        Self {
            mapper_policy: RetryPolicy::default(),
            page_size: activities::DEFAULT_PAGE_SIZE,
            max_concurrent: 64,
        }
    }
}

/// Engine with the trip-speed orchestrator and its activities registered
pub fn build_engine(
    history: Arc<dyn HistoryStore>,
    blobs: Arc<dyn BlobStore>,
    options: &MapReduceOptions,
) -> OrchestrationEngine {
    let activities = activities::register(ActivityRegistry::new(), blobs, options.page_size);
    OrchestrationEngine::new(history)
        .with_orchestrator(
            TRIP_SPEEDS,
            Arc::new(TripSpeedOrchestrator::new(options.mapper_policy.clone())),
        )
        .with_activities(activities)
        .with_max_concurrent(options.max_concurrent)
}
