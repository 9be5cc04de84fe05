//! Interrupting a run mid fan-out and resuming it from the recorded history

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{completed_inputs, csv_file, engine_with, trip_row, DelayedBlobStore, CONTAINER};
use tripreduce::mapreduce::{WorkRequest, TRIP_SPEEDS};
use tripreduce::orchestration::{HistoryEvent, HistoryStore, InMemoryHistoryStore, RuntimeStatus};
use tripreduce::storage::MemoryBlobStore;

const FILES: u32 = 50;

fn fifty_files() -> MemoryBlobStore {
    (0..FILES).fold(MemoryBlobStore::new(), |store, i| {
        let rows = vec![
            trip_row(i * 10, i % 7, 30, 5.0 + i as f64),
            trip_row(i * 10 + 1, (i + 3) % 7, 45, 12.0),
            trip_row(i * 10 + 2, i % 7, 20, 3.5),
        ];
        store.with_object(CONTAINER, &format!("2017/trips_{:02}.csv", i), csv_file(&rows))
    })
}

#[tokio::test]
async fn test_resume_does_not_repeat_completed_mappers() {
    let blobs = fifty_files();
    let delayed = Arc::new(DelayedBlobStore::new(blobs.clone(), Duration::from_millis(20)));
    let history = InMemoryHistoryStore::new();
    let input = serde_json::to_value(WorkRequest::new(CONTAINER, "2017/")).unwrap();

    let first = Arc::new(engine_with(delayed.clone(), history.clone(), 5));
    let instance_id = first.start_instance(TRIP_SPEEDS, input.clone()).await.unwrap();
    let handle = first.spawn(&instance_id);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let done = completed_inputs(&history, &instance_id, "map_trip_speeds").await;
        if done.len() >= 10 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "mappers never completed");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    handle.abort();
    let joined = handle.await;
    assert!(joined.unwrap_err().is_cancelled());
    drop(first);

    let completed_before: Vec<String> =
        completed_inputs(&history, &instance_id, "map_trip_speeds")
            .await
            .into_iter()
            .map(|value| serde_json::from_value(value).unwrap())
            .collect();
    assert!(completed_before.len() >= 10);
    assert!(completed_before.len() < FILES as usize);

    let second = engine_with(delayed.clone(), history.clone(), 5);
    let resumed = second.run_instance(&instance_id).await.unwrap();
    assert_eq!(resumed.runtime_status, RuntimeStatus::Completed);

    for locator in &completed_before {
        assert_eq!(blobs.read_count(locator).await, 1, "{} was mapped again", locator);
    }

    let events = history.load(&instance_id).await.unwrap();
    let mapper_tasks = events
        .iter()
        .filter(|event| {
            matches!(event, HistoryEvent::TaskScheduled { name, .. } if name == "map_trip_speeds")
        })
        .count();
    assert_eq!(mapper_tasks, FILES as usize);
    assert_eq!(
        completed_inputs(&history, &instance_id, "map_trip_speeds").await.len(),
        FILES as usize
    );

    // Same answer as a run that was never interrupted
    let uninterrupted = engine_with(Arc::new(fifty_files()), InMemoryHistoryStore::new(), 5)
        .start_and_run(TRIP_SPEEDS, input)
        .await
        .unwrap();
    assert_eq!(resumed.output, uninterrupted.output);
}

#[tokio::test]
async fn test_second_driver_is_rejected_while_running() {
    let blobs = fifty_files();
    let delayed = Arc::new(DelayedBlobStore::new(blobs, Duration::from_millis(20)));
    let engine = Arc::new(engine_with(delayed, InMemoryHistoryStore::new(), 5));
    let input = serde_json::to_value(WorkRequest::new(CONTAINER, "2017/")).unwrap();

    let instance_id = engine.start_instance(TRIP_SPEEDS, input).await.unwrap();
    let handle = engine.spawn(&instance_id);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let err = engine.run_instance(&instance_id).await.unwrap_err();
    assert!(err.to_string().contains(&instance_id));

    let status = handle.await.unwrap().unwrap();
    assert_eq!(status.runtime_status, RuntimeStatus::Completed);
}
