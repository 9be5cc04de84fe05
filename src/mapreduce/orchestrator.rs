//! The trip-speed coordinator
//!
//! Lists the input files, fans out one mapper per file, waits for all of
//! them, reduces, and optionally writes the report. Runs under the replay
//! engine, so every log line and status update is emitted only when the
//! code is not replaying an earlier episode.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Value};
use tracing::info;

use super::activities::{
    ListFilesInput, WriteResultInput, LIST_FILES, MAP_TRIP_SPEEDS, REDUCE_SPEEDS, WRITE_RESULT,
};
use super::types::{DayAggregate, FileLocator, ReductionResult, ReportOutcome, WorkRequest};
use crate::orchestration::{
    OrchestrationContext, OrchestrationError, OrchestrationResult, Orchestrator, RetryPolicy,
};

pub const TRIP_SPEEDS: &str = "trip_speeds";

pub struct TripSpeedOrchestrator {
    mapper_policy: RetryPolicy,
}

impl TripSpeedOrchestrator {
    pub fn new(mapper_policy: RetryPolicy) -> Self {
        Self { mapper_policy }
    }
}

impl Default for TripSpeedOrchestrator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Publish a status snapshot and log line unless replaying
fn progress(ctx: &OrchestrationContext<'_>, replaying: bool, status: Value, message: &str) {
    if replaying {
        return;
    }
    info!(instance_id = ctx.instance_id(), "{}", message);
    ctx.set_custom_status(Some(status));
}

#[async_trait(?Send)]
impl Orchestrator for TripSpeedOrchestrator {
    async fn run(&self, ctx: &OrchestrationContext<'_>, input: Value) -> OrchestrationResult<Value> {
        let request: WorkRequest =
            serde_json::from_value(input).map_err(OrchestrationError::serialization)?;

        progress(
            ctx,
            ctx.is_replaying(),
            json!({
                "status": "Getting files to reduce",
                "container": request.container,
                "prefix": request.prefix,
            }),
            &format!(
                "Beginning MapReduce. Container: {} | Prefix: {}",
                request.container, request.prefix
            ),
        );

        let files: Vec<FileLocator> = ctx
            .call_activity(
                LIST_FILES,
                &ListFilesInput {
                    container: request.container.clone(),
                    prefix: request.prefix.clone(),
                },
            )
            .await?;

        if files.is_empty() {
            if !ctx.is_replaying() {
                info!(
                    instance_id = ctx.instance_id(),
                    "No files found, nothing to reduce"
                );
                ctx.set_custom_status(None);
            }
            let outcome = ReportOutcome::NoData {
                container: request.container,
                prefix: request.prefix,
            };
            return serde_json::to_value(outcome).map_err(OrchestrationError::serialization);
        }

        progress(
            ctx,
            ctx.is_replaying(),
            json!({"status": "Creating mappers", "files": files}),
            &format!("{} file(s) found, creating mappers...", files.len()),
        );

        let mappers: Vec<_> = files
            .iter()
            .map(|file| {
                ctx.call_activity_with_retry::<_, DayAggregate>(MAP_TRIP_SPEEDS, file, &self.mapper_policy)
            })
            .collect();

        progress(
            ctx,
            ctx.is_replaying(),
            json!("Waiting for mappers"),
            &format!("Waiting for all {} mappers to complete...", files.len()),
        );

        // Results come back in dispatch order, whatever order they finished in
        let aggregates = try_join_all(mappers).await?;

        progress(
            ctx,
            ctx.is_replaying(),
            json!("Executing reducer"),
            "Executing reducer...",
        );

        let reduction: ReductionResult = ctx.call_activity(REDUCE_SPEEDS, &aggregates).await?;

        let result_locator = match &request.result_container {
            Some(container) => {
                let locator: String = ctx
                    .call_activity(
                        WRITE_RESULT,
                        &WriteResultInput {
                            container: container.clone(),
                            report: reduction.report.clone(),
                        },
                    )
                    .await?;
                Some(locator)
            }
            None => None,
        };

        if !ctx.is_replaying() {
            info!(
                instance_id = ctx.instance_id(),
                "**FINISHED** Result: {}", reduction.report
            );
            ctx.set_custom_status(None);
        }

        let outcome = ReportOutcome::Report {
            report: reduction.report,
            averages: reduction.averages,
            files: reduction.files,
            result_locator,
        };
        serde_json::to_value(outcome).map_err(OrchestrationError::serialization)
    }
}
