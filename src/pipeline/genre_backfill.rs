use crate::apis::spotify::SpotifyApi;
use crate::constants::{ARTISTS_TABLE, EXISTING_ID_LOOKUP_CHUNK, EXTERNAL_IDS_TABLE, SPOTIFY};
use crate::error::Result;
use crate::extract::{first_str, genres};
use crate::observability::metrics;
use crate::storage::{column_text, RowQuery, Storage};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const ARTIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenreBackfillSummary {
    pub artists_found: usize,
    pub with_spotify_id: usize,
    pub updated: usize,
    /// Spotify had no genres for the artist
    pub no_genres: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

fn has_genres(row: &Value) -> bool {
    row.get("genres")
        .and_then(Value::as_array)
        .map_or(false, |g| !g.is_empty())
}

/// Spotify id from an artist's `external_identifiers`, e.g.
/// `[{"source": "spotify", "identifier": ["0NcPKaSNIHAM2RfioH9vMT"]}]`
pub fn spotify_id_from_identifiers(row: &Value) -> Option<String> {
    row.get("external_identifiers")?
        .as_array()?
        .iter()
        .find(|entry| first_str(entry, &["source"]).as_deref() == Some(SPOTIFY))
        .and_then(|entry| first_str(entry, &["identifier.0", "identifier"]))
}

/// Fills empty artist genres from Spotify
pub struct GenreBackfill {
    api: Arc<SpotifyApi>,
    storage: Arc<dyn Storage>,
}

impl GenreBackfill {
    pub fn new(api: Arc<SpotifyApi>, storage: Arc<dyn Storage>) -> Self {
        Self { api, storage }
    }

    /// Artists without genres, paged in creation order up to `limit`
    pub async fn artists_without_genres(&self, limit: Option<usize>) -> Result<Vec<Value>> {
        let mut found = Vec::new();
        let mut offset = 0;
        loop {
            let query = RowQuery::new()
                .order_by("created_at", true)
                .range(offset, ARTIST_PAGE_SIZE);
            let (rows, _) = self.storage.search(ARTISTS_TABLE, &query).await?;
            let fetched = rows.len();
            found.extend(rows.into_iter().filter(|r| !has_genres(r)));
            if let Some(limit) = limit {
                if found.len() >= limit {
                    found.truncate(limit);
                    break;
                }
            }
            if fetched < ARTIST_PAGE_SIZE {
                break;
            }
            offset += ARTIST_PAGE_SIZE;
        }
        Ok(found)
    }

    /// Spotify ids from the id mapping table, keyed by artist uuid
    async fn mapped_spotify_ids(&self, uuids: &[String]) -> HashMap<String, String> {
        let mut mapped = HashMap::new();
        for chunk in uuids.chunks(EXISTING_ID_LOOKUP_CHUNK) {
            let query = RowQuery::new()
                .eq("source", SPOTIFY)
                .eq("entity_type", "artist")
                .in_values("entity_uuid", chunk.to_vec());
            match self.storage.search(EXTERNAL_IDS_TABLE, &query).await {
                Ok((rows, _)) => {
                    for row in rows {
                        if let (Some(uuid), Some(id)) =
                            (column_text(&row, "entity_uuid"), column_text(&row, "external_id"))
                        {
                            mapped.insert(uuid, id);
                        }
                    }
                }
                Err(e) => warn!("Spotify id mapping lookup failed for {} artist(s): {}", chunk.len(), e),
            }
        }
        mapped
    }

    #[instrument(skip(self))]
    pub async fn run(&self, limit: Option<usize>) -> Result<GenreBackfillSummary> {
        let mut summary = GenreBackfillSummary::default();
        let artists = self.artists_without_genres(limit).await?;
        summary.artists_found = artists.len();
        info!("{} artist(s) without genres", artists.len());

        let uuids: Vec<String> = artists.iter().filter_map(|a| column_text(a, "id")).collect();
        let mapped = self.mapped_spotify_ids(&uuids).await;

        // spotify id -> artist uuids
        let mut targets: HashMap<String, Vec<String>> = HashMap::new();
        for artist in &artists {
            let Some(uuid) = column_text(artist, "id") else {
                continue;
            };
            let spotify_id = spotify_id_from_identifiers(artist).or_else(|| mapped.get(&uuid).cloned());
            if let Some(spotify_id) = spotify_id {
                targets.entry(spotify_id).or_default().push(uuid);
                summary.with_spotify_id += 1;
            }
        }
        if targets.is_empty() {
            return Ok(summary);
        }

        let ids: Vec<String> = targets.keys().cloned().collect();
        let fetch = self.api.get_artists(&ids).await;
        summary.failed += fetch.failed_ids;
        summary.errors.extend(fetch.errors);
        metrics::provider::records_fetched(SPOTIFY, fetch.artists.len());

        for raw in &fetch.artists {
            let Some(spotify_id) = first_str(raw, &["id"]) else {
                continue;
            };
            let Some(uuids) = targets.get(&spotify_id) else {
                continue;
            };
            let found = genres(raw, &["genres"]);
            if found.is_empty() {
                summary.no_genres += uuids.len();
                continue;
            }
            let patch = json!({"genres": found, "updated_at": Utc::now().to_rfc3339()});
            for uuid in uuids {
                match self.storage.update(ARTISTS_TABLE, "id", uuid, &patch).await {
                    Ok(n) if n > 0 => summary.updated += 1,
                    Ok(_) => summary.failed += 1,
                    Err(e) => {
                        warn!("Could not update genres for artist {}: {}", uuid, e);
                        summary.failed += 1;
                        summary.errors.push(format!("{}: {}", uuid, e));
                    }
                }
            }
        }
        metrics::upsert::rows_upserted(ARTISTS_TABLE, summary.updated);
        info!(
            "Genre backfill finished: {} updated, {} without Spotify genres, {} failed",
            summary.updated, summary.no_genres, summary.failed
        );
        Ok(summary)
    }
}
