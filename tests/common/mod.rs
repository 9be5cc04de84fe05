//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use tripreduce::mapreduce::{build_engine, MapReduceOptions, WorkRequest, TRIP_SPEEDS};
use tripreduce::orchestration::{
    HistoryEvent, HistoryStore, InMemoryHistoryStore, InstanceStatus, OrchestrationEngine,
};
use tripreduce::storage::{BlobStore, ByteStream, ListPage, MemoryBlobStore, StorageResult};

pub const CONTAINER: &str = "mem://local/trips";

/// One 17-column trip record; the pickup is `day_offset` days after
/// Sunday 2017-01-01 at 08:00 and the trip lasts `minutes`
pub fn trip_row(id: u32, day_offset: u32, minutes: u32, distance: f64) -> String {
    let pickup = format!("2017-01-{:02} 08:00:00", 1 + day_offset);
    let dropoff = format!(
        "2017-01-{:02} {:02}:{:02}:00",
        1 + day_offset,
        8 + minutes / 60,
        minutes % 60
    );
    format!(
        "{},{},{},1,{},-73.99,40.73,1,N,-73.98,40.75,1,10.5,0.5,0.5,2.0,13.5",
        id, pickup, dropoff, distance
    )
}

/// File content with the usual header line
pub fn csv_file(rows: &[String]) -> String {
    let mut content = String::from(
        "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,pickup_longitude,pickup_latitude,RatecodeID,store_and_fwd_flag,dropoff_longitude,dropoff_latitude,payment_type,fare_amount,extra,mta_tax,tip_amount,total_amount\n",
    );
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    content
}

/// Blob store that delays every object read, keeping mappers in flight
#[derive(Clone)]
pub struct DelayedBlobStore {
    inner: MemoryBlobStore,
    delay: Duration,
}

impl DelayedBlobStore {
    pub fn new(inner: MemoryBlobStore, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl BlobStore for DelayedBlobStore {
    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        page_size: usize,
    ) -> StorageResult<ListPage> {
        self.inner
            .list_page(container, prefix, continuation_token, page_size)
            .await
    }

    async fn open(&self, locator: &str) -> StorageResult<ByteStream> {
        tokio::time::sleep(self.delay).await;
        self.inner.open(locator).await
    }

    async fn write_text(&self, container: &str, name: &str, content: &str) -> StorageResult<String> {
        self.inner.write_text(container, name, content).await
    }
}

/// Engine over fresh in-memory history with fast retries
pub fn engine_with(
    blobs: Arc<dyn BlobStore>,
    history: InMemoryHistoryStore,
    max_concurrent: usize,
) -> OrchestrationEngine {
    let mut options = MapReduceOptions {
        max_concurrent,
        ..MapReduceOptions::default()
    };
    options.mapper_policy = options
        .mapper_policy
        .with_first_retry_interval(Duration::from_millis(1));
    build_engine(Arc::new(history), blobs, &options)
}

pub async fn run_request(engine: &OrchestrationEngine, request: &WorkRequest) -> InstanceStatus {
    let input = serde_json::to_value(request).unwrap();
    engine.start_and_run(TRIP_SPEEDS, input).await.unwrap()
}

/// Task ids of completed activities called `name`, with their inputs
pub async fn completed_inputs(
    history: &dyn HistoryStore,
    instance_id: &str,
    name: &str,
) -> Vec<serde_json::Value> {
    let events = history.load(instance_id).await.unwrap();
    let scheduled: std::collections::HashMap<u64, (&str, &serde_json::Value)> = events
        .iter()
        .filter_map(|event| match event {
            HistoryEvent::TaskScheduled {
                task_id,
                name,
                input,
                ..
            } => Some((*task_id, (name.as_str(), input))),
            _ => None,
        })
        .collect();

    events
        .iter()
        .filter_map(|event| match event {
            HistoryEvent::TaskCompleted { task_id, .. } => scheduled.get(task_id),
            _ => None,
        })
        .filter(|(task_name, _)| *task_name == name)
        .map(|(_, input)| (*input).clone())
        .collect()
}
