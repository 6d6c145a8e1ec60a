mod common;

use common::{CountingPacer, FlakyStorage};
use concert_ingest::pipeline::Upserter;
use serde_json::{json, Value};
use std::sync::Arc;

fn rows(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({"ticketmaster_event_id": format!("tm-{}", i), "title": format!("Show {}", i)}))
        .collect()
}

#[tokio::test]
async fn test_rows_are_written_in_batches() {
    let storage = Arc::new(FlakyStorage::new(vec![]));
    let pacer = Arc::new(CountingPacer::default());
    let upserter = Upserter::new(storage.clone(), pacer.clone(), 500);

    let report = upserter.upsert("events", rows(1200), "ticketmaster_event_id").await;

    assert_eq!(storage.upsert_sizes(), vec![500, 500, 200]);
    assert_eq!(report.attempted, 1200);
    assert_eq!(report.upserted, 1200);
    assert_eq!(report.failed_chunks, 0);
    assert_eq!(pacer.count(), 2);
}

#[tokio::test]
async fn test_failed_chunk_does_not_block_the_others() {
    let storage = Arc::new(FlakyStorage::new(vec![2]));
    let pacer = Arc::new(CountingPacer::default());
    let upserter = Upserter::new(storage.clone(), pacer, 500);

    let report = upserter.upsert("events", rows(1200), "ticketmaster_event_id").await;

    assert_eq!(storage.upsert_sizes().len(), 3);
    assert_eq!(report.upserted, 700);
    assert_eq!(report.failed_chunks, 1);
    assert!(report.errors[0].starts_with("chunk 2:"));
    assert_eq!(storage.inner.count("events"), 700);

    let stored = storage.inner.rows("events");
    assert!(stored.iter().any(|r| r["ticketmaster_event_id"] == "tm-0"));
    assert!(stored.iter().any(|r| r["ticketmaster_event_id"] == "tm-1199"));
    assert!(!stored.iter().any(|r| r["ticketmaster_event_id"] == "tm-600"));
}

#[tokio::test]
async fn test_duplicate_keys_collapse_before_chunking() {
    let storage = Arc::new(FlakyStorage::new(vec![]));
    let upserter = Upserter::new(storage.clone(), Arc::new(CountingPacer::default()), 2);
    let batch = vec![
        json!({"ticketmaster_event_id": "a", "title": "First"}),
        json!({"ticketmaster_event_id": "b", "title": "Other"}),
        json!({"ticketmaster_event_id": "a", "title": "Latest"}),
    ];

    let report = upserter.upsert("events", batch, "ticketmaster_event_id").await;

    assert_eq!(report.attempted, 2);
    assert_eq!(storage.upsert_sizes(), vec![2]);
    let stored = storage.inner.rows("events");
    assert_eq!(stored.iter().find(|r| r["ticketmaster_event_id"] == "a").unwrap()["title"], "Latest");
}
