//! Data model of the trip-speed map-reduce

use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Locator of one object to map
pub type FileLocator = String;

/// Input of one orchestration instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    /// `scheme://authority/container`
    pub container: String,
    /// Object key prefix inside the container; may be empty
    pub prefix: String,
    /// Where to write the final report, when the result sink is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_container: Option<String>,
}

impl WorkRequest {
    pub fn new(container: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: prefix.into(),
            result_container: None,
        }
    }

    pub fn with_result_container(mut self, container: Option<String>) -> Self {
        self.result_container = container;
        self
    }
}

/// Average speed per day of week; index 0 is Sunday
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayAggregate(pub [f64; 7]);

impl DayAggregate {
    pub fn values(&self) -> &[f64; 7] {
        &self.0
    }
}

impl Index<usize> for DayAggregate {
    type Output = f64;

    fn index(&self, day: usize) -> &f64 {
        &self.0[day]
    }
}

/// Cross-file averages and their rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionResult {
    pub averages: DayAggregate,
    pub report: String,
    /// Number of per-file aggregates that were averaged
    pub files: usize,
}

/// Terminal value of a trip-speed instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    Report {
        report: String,
        averages: DayAggregate,
        files: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_locator: Option<String>,
    },
    /// The container held no objects under the prefix
    NoData { container: String, prefix: String },
}

impl ReportOutcome {
    /// Text printed to users for this outcome
    pub fn summary(&self) -> String {
        match self {
            ReportOutcome::Report { report, .. } => report.clone(),
            ReportOutcome::NoData { container, prefix } => {
                format!("No data: no files found in {} with prefix '{}'", container, prefix)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_day_aggregate_serializes_as_array() {
        let aggregate = DayAggregate([0.0, 20.0, 0.0, 0.0, 0.0, 0.0, 1.5]);
        let value = serde_json::to_value(aggregate).unwrap();
        assert_eq!(value, json!([0.0, 20.0, 0.0, 0.0, 0.0, 0.0, 1.5]));
        assert_eq!(aggregate[1], 20.0);
    }

    #[test]
    fn test_work_request_omits_missing_result_container() {
        let request = WorkRequest::new("mem://trips", "2017/");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"container": "mem://trips", "prefix": "2017/"}));
    }

    #[test]
    fn test_outcome_tagging() {
        let outcome = ReportOutcome::NoData {
            container: "mem://trips".to_string(),
            prefix: "none/".to_string(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "no_data");
        assert!(outcome.summary().starts_with("No data"));
    }
}
