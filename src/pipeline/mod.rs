// Ingestion pipeline: chunked upserts, seed orchestration, syncs and enrichment

pub mod genre_backfill;
pub mod jambase_sync;
pub mod orchestrator;
pub mod resolve;
pub mod setlist_enrich;
pub mod spotify_seed;
pub mod upsert;

pub use orchestrator::{city_seeds, RunSummary, SeedOrchestrator};
pub use upsert::{UpsertReport, Upserter};
