//! Activities: the independently executed units of work an orchestrator awaits
//!
//! Activities may do I/O, read clocks and fail. The dispatcher in this module
//! applies the per-call [`RetryPolicy`]: a watchdog timeout per attempt and a
//! bounded number of attempts with exponential backoff for retryable errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::ActivityError;

/// A unit of work invoked by name with a JSON input
#[async_trait]
pub trait Activity: Send + Sync {
    async fn execute(&self, input: Value) -> Result<Value, ActivityError>;
}

/// Retry and watchdog policy attached to one activity call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub first_retry_interval: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_coefficient: f64,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_retry_interval: Duration,
    /// Maximum duration of one attempt; exceeding it counts as a retryable failure
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            first_retry_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_retry_interval: Duration::from_secs(30),
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no watchdog
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            timeout: None,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_first_retry_interval(mut self, interval: Duration) -> Self {
        self.first_retry_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.backoff_coefficient.max(1.0).powi(exponent);
        let delay = self.first_retry_interval.mul_f64(factor);
        delay.min(self.max_retry_interval)
    }
}

/// Final outcome of dispatching one task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { result: Value, attempts: u32 },
    Failed { error: String, attempts: u32 },
}

/// Run `activity` under `policy` until it succeeds, fails permanently or runs out of attempts
pub async fn execute_with_policy(
    name: &str,
    activity: Arc<dyn Activity>,
    input: Value,
    policy: &RetryPolicy,
) -> TaskOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, activity.execute(input.clone())).await {
                Ok(result) => result,
                Err(_) => Err(ActivityError::retryable(format!(
                    "attempt timed out after {:?}",
                    limit
                ))),
            },
            None => activity.execute(input.clone()).await,
        };

        match result {
            Ok(result) => {
                debug!("Activity {} succeeded on attempt {}", name, attempt);
                return TaskOutcome::Completed {
                    result,
                    attempts: attempt,
                };
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "Activity {} attempt {}/{} failed: {}; retrying in {:?}",
                    name, attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(
                    "Activity {} failed after {} attempt(s): {}",
                    name, attempt, err
                );
                return TaskOutcome::Failed {
                    error: err.to_string(),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Activities registered by name
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, activity: Arc<dyn Activity>) -> Self {
        self.activities.insert(name.into(), activity);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.activities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
