//! Cross-file reduction of per-day averages

use super::errors::{MapReduceError, MapReduceResult};
use super::types::{DayAggregate, ReductionResult};

/// Average the per-file aggregates day by day
///
/// Every file weighs the same regardless of how many trips it held. Days a
/// file had no trips for contribute 0 to the sum.
pub fn reduce(aggregates: &[DayAggregate]) -> MapReduceResult<ReductionResult> {
    if aggregates.is_empty() {
        return Err(MapReduceError::ReductionUndefined);
    }

    let mut totals = [0.0; 7];
    for aggregate in aggregates {
        for (total, value) in totals.iter_mut().zip(aggregate.values()) {
            *total += value;
        }
    }

    let files = aggregates.len() as f64;
    let averages = DayAggregate(totals.map(|total| total / files));

    Ok(ReductionResult {
        report: render_report(&averages),
        averages,
        files: aggregates.len(),
    })
}

/// Fixed report layout consumed by existing callers; labels are kept as is
pub fn render_report(averages: &DayAggregate) -> String {
    let v = averages.values();
    format!(
        "Sun: {}, Mon: {}, Tue : {}, wed: {}, Thu: {}, Fri: {}, Sat: {}",
        v[0], v[1], v[2], v[3], v[4], v[5], v[6]
    )
}
