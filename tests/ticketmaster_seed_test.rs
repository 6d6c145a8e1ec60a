mod common;

use common::{json_response, CountingPacer, FakeHttp};
use concert_ingest::apis::ticketmaster::TicketmasterApi;
use concert_ingest::constants::EVENTS_TABLE;
use concert_ingest::pipeline::{city_seeds, RunSummary, SeedOrchestrator, Upserter};
use concert_ingest::storage::InMemoryStorage;
use serde_json::{json, Value};
use std::sync::Arc;

fn tm_event(id: &str, artist: &str) -> Value {
    json!({
        "id": id,
        "name": format!("{} Live", artist),
        "url": format!("https://www.ticketmaster.com/event/{}", id),
        "dates": {
            "start": {"localDate": "2025-09-12", "dateTime": "2025-09-13T02:00:00Z"},
            "status": {"code": "onsale"}
        },
        "_embedded": {
            "attractions": [{"id": format!("K{}", id), "name": artist}],
            "venues": [{
                "name": "Stubb's Waller Creek Amphitheater",
                "city": {"name": "Austin"},
                "state": {"stateCode": "TX"}
            }]
        }
    })
}

fn city_page(events: Vec<Value>) -> Value {
    json!({
        "_embedded": {"events": events},
        "page": {"number": 0, "totalPages": 1, "totalElements": 2}
    })
}

fn seeds() -> Vec<concert_ingest::types::SeedQuery> {
    city_seeds(Some(&["Austin".to_string(), "Dallas".to_string()]))
}

fn orchestrator(http: FakeHttp, storage: Arc<InMemoryStorage>, pacer: Arc<CountingPacer>) -> SeedOrchestrator {
    let api = TicketmasterApi::new(Arc::new(http), pacer.clone(), "tm-key".into());
    let upserter = Upserter::new(storage, pacer.clone(), 500);
    SeedOrchestrator::new(Arc::new(api), upserter, pacer, EVENTS_TABLE)
}

#[tokio::test]
async fn test_single_page_city_lands_its_events() {
    let http = FakeHttp::new()
        .on(
            "city=Austin",
            vec![json_response(200, city_page(vec![tm_event("G1", "Spoon"), tm_event("G2", "Black Pumas")]))],
        )
        .on("city=Dallas", vec![json_response(200, json!({"page": {"totalPages": 0}}))]);
    let storage = Arc::new(InMemoryStorage::new());
    let pacer = Arc::new(CountingPacer::default());
    let orchestrator = orchestrator(http, storage.clone(), pacer.clone());

    let summary = orchestrator.run(&seeds()).await;

    assert_eq!(summary.seeds, 2);
    assert_eq!(summary.seeds_failed, 0);
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.upserted, 2);
    assert_eq!(storage.count(EVENTS_TABLE), 2);
    // one pause between the two seeds; no second Austin page and a single chunk
    assert_eq!(pacer.count(), 1);

    let rows = storage.rows(EVENTS_TABLE);
    assert!(rows.iter().any(|r| r["ticketmaster_event_id"] == "G1" && r["artist_name"] == "Spoon"));
    assert!(rows.iter().all(|r| r["source"] == "ticketmaster"));
}

#[tokio::test]
async fn test_only_one_page_requested_per_small_city() {
    let http = Arc::new(FakeHttp::new().on(
        "city=Austin",
        vec![json_response(200, city_page(vec![tm_event("G1", "Spoon")]))],
    ));
    let pacer = Arc::new(CountingPacer::default());
    let api = TicketmasterApi::new(http.clone(), pacer.clone(), "tm-key".into());
    let outcome = api.fetch_city("Austin", "TX").await;

    assert_eq!(outcome.records.len(), 1);
    assert!(outcome.error.is_none());
    let requests = http.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].query_value("page"), Some("0"));
    assert_eq!(requests[0].query_value("classificationName"), Some("music"));
}

#[tokio::test]
async fn test_failing_city_does_not_stop_the_run() {
    let http = FakeHttp::new()
        .on("city=Austin", vec![json_response(500, json!({"fault": "upstream"}))])
        .on(
            "city=Dallas",
            vec![json_response(200, city_page(vec![tm_event("D1", "Leon Bridges"), tm_event("D2", "Sabrina Carpenter")]))],
        );
    let storage = Arc::new(InMemoryStorage::new());
    let pacer = Arc::new(CountingPacer::default());

    let summary = orchestrator(http, storage.clone(), pacer).run(&seeds()).await;

    assert_eq!(summary.seeds, 2);
    assert_eq!(summary.seeds_failed, 1);
    assert!(summary.errors[0].contains("Austin"));
    assert_eq!(summary.upserted, 2);
    assert_eq!(storage.count(EVENTS_TABLE), 2);
}

async fn austin_run(storage: Arc<InMemoryStorage>) -> RunSummary {
    let http = FakeHttp::new()
        .on(
            "city=Austin",
            vec![json_response(200, city_page(vec![tm_event("G1", "Spoon"), tm_event("G2", "Black Pumas")]))],
        )
        .on("city=Dallas", vec![json_response(200, json!({"page": {"totalPages": 0}}))]);
    let pacer = Arc::new(CountingPacer::default());
    orchestrator(http, storage, pacer).run(&seeds()).await
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_rows() {
    let storage = Arc::new(InMemoryStorage::new());

    let first = austin_run(storage.clone()).await;
    assert_eq!(first.upserted, 2);
    let second = austin_run(storage.clone()).await;

    assert_eq!(second.upserted, 2);
    assert_eq!(second.failed_chunks, 0);
    assert_eq!(second.seeds_failed, 0);
    assert!(second.errors.is_empty(), "rerun errors: {:?}", second.errors);
    assert_eq!(storage.count(EVENTS_TABLE), 2);
}

#[tokio::test]
async fn test_events_without_identity_are_skipped() {
    let mut undated = tm_event("G3", "Spoon");
    undated["dates"] = json!({});
    let http = FakeHttp::new().on(
        "city=Austin",
        vec![json_response(200, city_page(vec![tm_event("G1", "Spoon"), undated]))],
    );
    let storage = Arc::new(InMemoryStorage::new());
    let pacer = Arc::new(CountingPacer::default());

    let summary = orchestrator(http, storage.clone(), pacer).run(&seeds()).await;

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(storage.count(EVENTS_TABLE), 1);
}
