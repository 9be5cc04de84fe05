//! Optional persistence of the final report

use chrono::{DateTime, TimeZone};
use tracing::info;

use super::errors::{MapReduceError, MapReduceResult};
use crate::storage::BlobStore;

/// `mapreduce_sample_result_<yyyy_dd_M_HH_mm_ss>.txt`
pub fn result_file_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("mapreduce_sample_result_{}.txt", at.format("%Y_%d_%-m_%H_%M_%S"))
}

/// Write `report` into `container` under a timestamped name; returns the locator
pub async fn write_result<Tz: TimeZone>(
    store: &dyn BlobStore,
    container: &str,
    report: &str,
    at: &DateTime<Tz>,
) -> MapReduceResult<String>
where
    Tz::Offset: std::fmt::Display,
{
    let name = result_file_name(at);
    let locator = store
        .write_text(container, &name, report)
        .await
        .map_err(|source| MapReduceError::Sink {
            container: container.to_string(),
            source,
        })?;
    info!("Wrote result to {}", locator);
    Ok(locator)
}
