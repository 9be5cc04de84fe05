//! Activity adapters for the lister, mapper, reducer and result sink

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::lister::list_files;
use super::mapper::map_stream;
use super::reducer::reduce;
use super::sink::write_result;
use super::types::{DayAggregate, FileLocator};
use super::MapReduceError;
use crate::orchestration::{Activity, ActivityError, ActivityRegistry};
use crate::storage::BlobStore;

pub const LIST_FILES: &str = "list_files";
pub const MAP_TRIP_SPEEDS: &str = "map_trip_speeds";
pub const REDUCE_SPEEDS: &str = "reduce_speeds";
pub const WRITE_RESULT: &str = "write_result";

pub const DEFAULT_PAGE_SIZE: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesInput {
    pub container: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResultInput {
    pub container: String,
    pub report: String,
}

fn decode<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, ActivityError> {
    serde_json::from_value(input).map_err(ActivityError::invalid_input)
}

fn encode<T: Serialize>(output: &T) -> Result<Value, ActivityError> {
    serde_json::to_value(output)
        .map_err(|e| ActivityError::fatal(format!("failed to encode activity output: {}", e)))
}

pub struct ListFilesActivity {
    store: Arc<dyn BlobStore>,
    page_size: usize,
}

impl ListFilesActivity {
    pub fn new(store: Arc<dyn BlobStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl Activity for ListFilesActivity {
    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let input: ListFilesInput = decode(input)?;
        let files = list_files(
            self.store.as_ref(),
            &input.container,
            &input.prefix,
            self.page_size,
        )
        .await?;
        encode(&files)
    }
}

pub struct MapTripSpeedsActivity {
    store: Arc<dyn BlobStore>,
}

impl MapTripSpeedsActivity {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for MapTripSpeedsActivity {
    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let locator: FileLocator = decode(input)?;
        info!("Executing mapper for {}...", locator);

        let stream = self
            .store
            .open(&locator)
            .await
            .map_err(|source| MapReduceError::MapperTransport {
                locator: locator.clone(),
                source,
            })?;
        let accumulator = map_stream(&locator, stream).await?;
        let aggregate = accumulator.finish();

        info!(
            "{} mapper complete: {} trip(s) used, {} row(s) skipped",
            locator,
            accumulator.trips(),
            accumulator.skipped()
        );
        encode(&aggregate)
    }
}

pub struct ReduceSpeedsActivity;

#[async_trait]
impl Activity for ReduceSpeedsActivity {
    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let aggregates: Vec<DayAggregate> = decode(input)?;
        info!("Reducing {} result(s)...", aggregates.len());
        let result = reduce(&aggregates)?;
        info!("{}", result.report);
        encode(&result)
    }
}

pub struct WriteResultActivity {
    store: Arc<dyn BlobStore>,
}

impl WriteResultActivity {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for WriteResultActivity {
    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let input: WriteResultInput = decode(input)?;
        let now = chrono::Local::now();
        let locator =
            write_result(self.store.as_ref(), &input.container, &input.report, &now).await?;
        encode(&locator)
    }
}

/// Register every trip-speed activity against `store`
pub fn register(registry: ActivityRegistry, store: Arc<dyn BlobStore>, page_size: usize) -> ActivityRegistry {
    registry
        .register(
            LIST_FILES,
            Arc::new(ListFilesActivity::new(store.clone(), page_size)),
        )
        .register(
            MAP_TRIP_SPEEDS,
            Arc::new(MapTripSpeedsActivity::new(store.clone())),
        )
        .register(REDUCE_SPEEDS, Arc::new(ReduceSpeedsActivity))
        .register(WRITE_RESULT, Arc::new(WriteResultActivity::new(store)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapreduce::types::ReductionResult;
    use crate::storage::MemoryBlobStore;
    use serde_json::json;

    fn trip(pickup: &str, dropoff: &str, distance: &str) -> String {
        format!(
            "7,{},{},1,{},0,0,1,N,0,0,1,1,0,0,0,1\n",
            pickup, dropoff, distance
        )
    }

    #[tokio::test]
    async fn test_registered_names() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let registry = register(ActivityRegistry::new(), store, DEFAULT_PAGE_SIZE);
        assert_eq!(
            registry.names(),
            vec![LIST_FILES, MAP_TRIP_SPEEDS, REDUCE_SPEEDS, WRITE_RESULT]
        );
    }

    #[tokio::test]
    async fn test_list_then_map() {
        let store = Arc::new(
            MemoryBlobStore::new()
                .with_object("mem://trips", "2017/a.csv", trip("2017-01-02 08:00:00", "2017-01-02 09:00:00", "15"))
                .with_object("mem://trips", "other/b.csv", "ignored"),
        );

        let lister = ListFilesActivity::new(store.clone(), 10);
        let files = lister
            .execute(json!({"container": "mem://trips", "prefix": "2017/"}))
            .await
            .unwrap();
        assert_eq!(files, json!(["mem://trips/2017/a.csv"]));

        let mapper = MapTripSpeedsActivity::new(store.clone());
        let aggregate = mapper.execute(json!("mem://trips/2017/a.csv")).await.unwrap();
        assert_eq!(aggregate, json!([0.0, 15.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
    }

    #[tokio::test]
    async fn test_missing_object_is_fatal_and_flaky_read_is_retryable() {
        let store = Arc::new(MemoryBlobStore::new().with_object("mem://trips", "a.csv", "x"));
        let mapper = MapTripSpeedsActivity::new(store.clone());

        let missing = mapper.execute(json!("mem://trips/none.csv")).await.unwrap_err();
        assert!(!missing.is_retryable());

        store.fail_reads("mem://trips/a.csv", 1).await;
        let flaky = mapper.execute(json!("mem://trips/a.csv")).await.unwrap_err();
        assert!(flaky.is_retryable());
    }

    #[tokio::test]
    async fn test_reducer_rejects_bad_input_and_empty_list() {
        let bad = ReduceSpeedsActivity.execute(json!("nope")).await.unwrap_err();
        assert!(!bad.is_retryable());

        let empty = ReduceSpeedsActivity.execute(json!([])).await.unwrap_err();
        assert!(empty.to_string().contains("undefined"));

        let ok = ReduceSpeedsActivity
            .execute(json!([[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]]))
            .await
            .unwrap();
        let result: ReductionResult = serde_json::from_value(ok).unwrap();
        assert_eq!(result.files, 1);
    }
}
