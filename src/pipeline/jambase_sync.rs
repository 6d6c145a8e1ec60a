use crate::apis::jambase::{extract_artist, extract_venue, headliner, JamBaseApi};
use crate::app::ports::Pacer;
use crate::constants::{
    ARTISTS_TABLE, EXTERNAL_IDS_KEY, EXTERNAL_IDS_TABLE, JAMBASE, JAMBASE_ARTIST_KEY,
    JAMBASE_EVENT_KEY, JAMBASE_SYNC_PAGE_SIZE, JAMBASE_VENUE_KEY, VENUES_TABLE,
};
use crate::error::{IngestError, Result};
use crate::infra::ingest_meta::IngestMeta;
use crate::observability::metrics;
use crate::pipeline::resolve::EntityResolver;
use crate::pipeline::upsert::{UpsertReport, Upserter};
use crate::storage::{column_text, RowQuery, Storage};
use crate::types::{CanonicalArtist, CanonicalVenue, EventProvider, ExternalEntityId};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Checkpoint job of the unfiltered feed
pub const CHECKPOINT_JOB: &str = "jambase";

/// Checkpoint job for a feed filtered by modification date. Filtered feeds page
/// differently, so each gets its own resume point.
pub fn checkpoint_job(date_modified_from: Option<&str>) -> String {
    match date_modified_from {
        Some(from) => format!("{}:modified:{}", CHECKPOINT_JOB, from),
        None => CHECKPOINT_JOB.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub start_page: Option<u32>,
    /// Continue after the last checkpointed page
    pub resume: bool,
    pub max_pages: Option<u32>,
    pub date_modified_from: Option<String>,
    /// Only events modified since the newest stored JamBase modification.
    /// An explicit `date_modified_from` wins.
    pub incremental: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub first_page: u32,
    pub last_page: Option<u32>,
    pub pages: u32,
    pub events_fetched: usize,
    pub events_skipped: usize,
    pub events_upserted: usize,
    pub artists_upserted: usize,
    pub venues_upserted: usize,
    pub failed_chunks: usize,
    pub errors: Vec<String>,
    pub completed: bool,
    /// Modification cutoff the feed was filtered by, if any
    pub date_modified_from: Option<String>,
}

impl SyncSummary {
    fn absorb(&mut self, report: &UpsertReport) {
        self.failed_chunks += report.failed_chunks;
        self.errors.extend(report.errors.iter().cloned());
    }
}

/// Key used to deduplicate venues within a page
fn venue_key(venue: &CanonicalVenue) -> String {
    venue
        .jambase_venue_id
        .clone()
        .unwrap_or_else(|| format!("name:{}", venue.name))
}

fn external_id_row(entity_type: &str, uuid: &str, external_id: &str) -> Option<Value> {
    serde_json::to_value(ExternalEntityId {
        entity_type: entity_type.to_string(),
        entity_uuid: uuid.to_string(),
        source: JAMBASE.to_string(),
        external_id: external_id.to_string(),
    })
    .ok()
}

/// Page-by-page sync of the full JamBase event feed into the 3NF tables
pub struct JamBaseSync {
    api: Arc<JamBaseApi>,
    upserter: Upserter,
    resolver: EntityResolver,
    pacer: Arc<dyn Pacer>,
    meta: Option<Arc<IngestMeta>>,
    events_table: String,
    page_pause: Duration,
    per_page: u32,
}

impl JamBaseSync {
    pub fn new(api: Arc<JamBaseApi>, upserter: Upserter, pacer: Arc<dyn Pacer>, events_table: &str) -> Self {
        let resolver = EntityResolver::new(upserter.storage().clone());
        Self {
            api,
            upserter,
            resolver,
            pacer,
            meta: None,
            events_table: events_table.to_string(),
            page_pause: Duration::ZERO,
            per_page: JAMBASE_SYNC_PAGE_SIZE,
        }
    }

    pub fn with_checkpoints(mut self, meta: Arc<IngestMeta>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_page_pause(mut self, pause: Duration) -> Self {
        self.page_pause = pause;
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Newest `last_modified_at` among stored JamBase events
    pub async fn latest_modification(&self) -> Result<Option<String>> {
        let query = RowQuery::new()
            .eq("source", JAMBASE)
            .gte("last_modified_at", "1970-01-01")
            .order_by("last_modified_at", false)
            .range(0, 1);
        let (rows, _) = self
            .upserter
            .storage()
            .search(&self.events_table, &query)
            .await?;
        Ok(rows.first().and_then(|row| column_text(row, "last_modified_at")))
    }

    async fn modified_from(&self, options: &SyncOptions) -> Result<Option<String>> {
        if options.date_modified_from.is_some() || !options.incremental {
            return Ok(options.date_modified_from.clone());
        }
        match self.latest_modification().await? {
            Some(from) => {
                info!("Incremental sync of events modified since {}", from);
                Ok(Some(from))
            }
            None => Err(IngestError::Config(
                "no previous JamBase sync found; run a full sync first".to_string(),
            )),
        }
    }

    fn first_page(&self, options: &SyncOptions, job: &str) -> Result<u32> {
        if let Some(page) = options.start_page {
            return Ok(page.max(1));
        }
        if options.resume {
            if let Some(meta) = &self.meta {
                if let Some(checkpoint) = meta.get_checkpoint(job)? {
                    info!("Resuming after checkpointed page {}", checkpoint.last_page);
                    return Ok(checkpoint.last_page + 1);
                }
            }
        }
        Ok(1)
    }

    /// Walk pages until an empty page, the last page or the page cap.
    /// A failed page ends the run with its checkpoint left at the previous page.
    #[instrument(skip(self, options))]
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncSummary> {
        let started_at = Utc::now().timestamp();
        let modified_from = self.modified_from(options).await?;
        let job = checkpoint_job(modified_from.as_deref());
        let first_page = self.first_page(options, &job)?;
        let mut summary = SyncSummary {
            first_page,
            date_modified_from: modified_from.clone(),
            ..SyncSummary::default()
        };

        let mut page = first_page;
        loop {
            if options.max_pages.map_or(false, |max| summary.pages >= max) {
                info!("Reached page cap of {}", summary.pages);
                break;
            }
            if page > first_page {
                self.pacer.pause(self.page_pause).await;
            }

            let result = match self
                .api
                .fetch_events_page(page, self.per_page, modified_from.as_deref())
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!("JamBase page {} failed: {}", page, e);
                    summary.errors.push(format!("page {}: {}", page, e));
                    break;
                }
            };
            if result.records.is_empty() {
                summary.completed = true;
                break;
            }

            summary.pages += 1;
            summary.events_fetched += result.records.len();
            metrics::provider::records_fetched(JAMBASE, result.records.len());
            info!(
                "Page {}/{}: {} event(s)",
                page,
                result.total_pages.map_or("?".to_string(), |t| t.to_string()),
                result.records.len()
            );
            self.sync_page(&result.records, &mut summary).await;
            summary.last_page = Some(page);

            if let Some(meta) = &self.meta {
                meta.set_checkpoint(&job, page, result.total_pages)?;
            }
            if !result.has_next() {
                summary.completed = true;
                break;
            }
            page += 1;
        }

        if let Some(meta) = &self.meta {
            if summary.completed {
                meta.clear_checkpoint(&job)?;
            }
            meta.record_run(
                &job,
                started_at,
                summary.events_upserted as u64,
                (summary.failed_chunks + summary.errors.len()) as u64,
            )?;
        }
        Ok(summary)
    }

    /// Artists and venues first, then events carrying their uuids
    pub async fn sync_page(&self, records: &[Value], summary: &mut SyncSummary) {
        let artist_uuids = self.sync_artists(records, summary).await;
        let venue_uuids = self.sync_venues(records, summary).await;

        let mut rows = Vec::with_capacity(records.len());
        for raw in records {
            let mut event = self.api.map_event(raw);
            let (skip, reason) = self.api.should_skip(&event);
            if skip {
                debug!("Skipping event: {}", reason);
                summary.events_skipped += 1;
                continue;
            }
            event.artist_uuid = event
                .artist_id
                .as_ref()
                .and_then(|id| artist_uuids.get(id))
                .cloned();
            let venue_lookup = event
                .venue_id
                .clone()
                .unwrap_or_else(|| format!("name:{}", event.venue_name));
            event.venue_uuid = venue_uuids.get(&venue_lookup).cloned();
            rows.push(event.to_row());
        }

        let report = self
            .upserter
            .upsert(&self.events_table, rows, JAMBASE_EVENT_KEY)
            .await;
        summary.events_upserted += report.upserted;
        summary.absorb(&report);

        let links: Vec<Value> = report
            .rows
            .iter()
            .filter_map(|row| {
                let uuid = column_text(row, "id")?;
                let id = column_text(row, JAMBASE_EVENT_KEY)?;
                external_id_row("event", &uuid, &id)
            })
            .collect();
        self.link_external_ids(links, summary).await;
    }

    async fn sync_artists(&self, records: &[Value], summary: &mut SyncSummary) -> HashMap<String, String> {
        let mut seen = HashSet::new();
        let artists: Vec<CanonicalArtist> = records
            .iter()
            .filter_map(headliner)
            .filter_map(extract_artist)
            .filter(|a| seen.insert(a.jambase_artist_id.clone()))
            .collect();
        if artists.is_empty() {
            return HashMap::new();
        }

        let rows = artists.iter().map(CanonicalArtist::to_row).collect();
        let report = self.upserter.upsert(ARTISTS_TABLE, rows, JAMBASE_ARTIST_KEY).await;
        summary.artists_upserted += report.upserted;
        summary.absorb(&report);

        let uuids: HashMap<String, String> = report
            .rows
            .iter()
            .filter_map(|row| Some((column_text(row, JAMBASE_ARTIST_KEY)?, column_text(row, "id")?)))
            .collect();
        let links = uuids
            .iter()
            .filter_map(|(id, uuid)| external_id_row("artist", uuid, id))
            .collect();
        self.link_external_ids(links, summary).await;
        uuids
    }

    async fn sync_venues(&self, records: &[Value], summary: &mut SyncSummary) -> HashMap<String, String> {
        let mut seen = HashSet::new();
        let venues: Vec<CanonicalVenue> = records
            .iter()
            .filter_map(|r| r.get("location"))
            .filter_map(extract_venue)
            .filter(|v| seen.insert(venue_key(v)))
            .collect();

        let (with_id, without_id): (Vec<_>, Vec<_>) =
            venues.into_iter().partition(|v| v.jambase_venue_id.is_some());

        let mut uuids = HashMap::new();
        if !with_id.is_empty() {
            let rows = with_id.iter().map(CanonicalVenue::to_row).collect();
            let report = self.upserter.upsert(VENUES_TABLE, rows, JAMBASE_VENUE_KEY).await;
            summary.venues_upserted += report.upserted;
            summary.absorb(&report);

            let mut links = Vec::new();
            for row in &report.rows {
                if let (Some(id), Some(uuid)) = (column_text(row, JAMBASE_VENUE_KEY), column_text(row, "id")) {
                    links.extend(external_id_row("venue", &uuid, &id));
                    uuids.insert(id, uuid);
                }
            }
            self.link_external_ids(links, summary).await;
        }

        for venue in &without_id {
            match self.resolver.resolve_venue(venue, JAMBASE).await {
                Ok(resolution) => {
                    summary.venues_upserted += 1;
                    uuids.insert(venue_key(venue), resolution.uuid().to_string());
                }
                Err(e) => {
                    warn!("Could not resolve venue '{}': {}", venue.name, e);
                    summary.errors.push(format!("venue {}: {}", venue.name, e));
                }
            }
        }
        uuids
    }

    async fn link_external_ids(&self, rows: Vec<Value>, summary: &mut SyncSummary) {
        if rows.is_empty() {
            return;
        }
        let report = self.upserter.upsert(EXTERNAL_IDS_TABLE, rows, EXTERNAL_IDS_KEY).await;
        summary.absorb(&report);
    }
}
