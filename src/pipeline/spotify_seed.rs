use crate::apis::spotify::{map_artist, SpotifyApi};
use crate::constants::{
    ARTISTS_TABLE, EXISTING_ID_LOOKUP_CHUNK, EXTERNAL_IDS_KEY, EXTERNAL_IDS_TABLE,
    JAMBASE_ARTIST_KEY, SPOTIFY, SPOTIFY_MIN_DISCOVERY,
};
use crate::error::{IngestError, Result};
use crate::observability::metrics;
use crate::storage::{column_text, RowQuery, Storage};
use crate::types::{CanonicalArtist, ExternalEntityId};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Postgres function that normalizes raw genre strings onto an artist
pub const SYNC_GENRES_RPC: &str = "sync_artist_genres";

#[derive(Debug, Clone, Default, Serialize)]
pub struct SpotifySeedSummary {
    pub discovered: usize,
    pub already_known: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub linked: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Seeds artists from genre playlists, skipping ids already mapped
pub struct SpotifySeeder {
    api: Arc<SpotifyApi>,
    storage: Arc<dyn Storage>,
}

impl SpotifySeeder {
    pub fn new(api: Arc<SpotifyApi>, storage: Arc<dyn Storage>) -> Self {
        Self { api, storage }
    }

    /// Spotify ids among `ids` that already have an artist mapping
    pub async fn existing_ids(&self, ids: &[String]) -> HashSet<String> {
        let mut known = HashSet::new();
        for chunk in ids.chunks(EXISTING_ID_LOOKUP_CHUNK) {
            let query = RowQuery::new()
                .eq("source", SPOTIFY)
                .eq("entity_type", "artist")
                .in_values("external_id", chunk.to_vec());
            match self.storage.search(EXTERNAL_IDS_TABLE, &query).await {
                Ok((rows, _)) => {
                    known.extend(rows.iter().filter_map(|r| column_text(r, "external_id")));
                }
                Err(e) => warn!("Existing id lookup failed for {} id(s): {}", chunk.len(), e),
            }
        }
        known
    }

    #[instrument(skip(self, genres))]
    pub async fn run(&self, genres: &[String], limit: usize) -> SpotifySeedSummary {
        let mut summary = SpotifySeedSummary::default();
        let discover_cap = (limit * 2).max(SPOTIFY_MIN_DISCOVERY);
        let discovered = self.api.discover_artist_ids(genres, discover_cap).await;
        summary.discovered = discovered.len();

        let known = self.existing_ids(&discovered).await;
        summary.already_known = known.len();
        let new_ids: Vec<String> = discovered
            .into_iter()
            .filter(|id| !known.contains(id))
            .take(limit)
            .collect();
        info!(
            "{} new Spotify artist(s) to seed ({} already known)",
            new_ids.len(),
            summary.already_known
        );
        if new_ids.is_empty() {
            return summary;
        }

        let fetch = self.api.get_artists(&new_ids).await;
        if fetch.failed_ids > 0 {
            metrics::seeds::failed(SPOTIFY);
            summary.failed += fetch.failed_ids;
            summary.errors.extend(fetch.errors);
        }
        let raw_artists = fetch.artists;
        summary.fetched = raw_artists.len();
        metrics::provider::records_fetched(SPOTIFY, raw_artists.len());

        for raw in &raw_artists {
            let Some(artist) = map_artist(raw) else {
                metrics::provider::records_skipped(SPOTIFY, 1);
                continue;
            };
            match self.store_artist(&artist).await {
                Ok(true) => summary.inserted += 1,
                Ok(false) => summary.linked += 1,
                Err(e) => {
                    warn!("Could not store artist '{}': {}", artist.name, e);
                    summary.failed += 1;
                    summary.errors.push(format!("{}: {}", artist.name, e));
                }
            }
        }
        metrics::upsert::rows_upserted(ARTISTS_TABLE, summary.inserted);
        metrics::seeds::processed(SPOTIFY);
        info!(
            "Spotify seeding finished: {} inserted, {} linked, {} failed",
            summary.inserted, summary.linked, summary.failed
        );
        summary
    }

    /// Insert the artist and its id mapping. Returns false when the artist row
    /// already existed and was only linked.
    async fn store_artist(&self, artist: &CanonicalArtist) -> Result<bool> {
        let (uuid, created) = match self.storage.insert(ARTISTS_TABLE, &artist.to_row()).await {
            Ok(row) => (Self::row_id(&row)?, true),
            Err(IngestError::Conflict { .. }) => {
                debug!("Artist {} exists, linking", artist.jambase_artist_id);
                let query = RowQuery::new()
                    .eq(JAMBASE_ARTIST_KEY, &artist.jambase_artist_id)
                    .range(0, 1);
                let (rows, _) = self.storage.search(ARTISTS_TABLE, &query).await?;
                let row = rows.first().ok_or_else(|| IngestError::Storage {
                    table: ARTISTS_TABLE.to_string(),
                    message: format!("conflicting row {} not found", artist.jambase_artist_id),
                })?;
                (Self::row_id(row)?, false)
            }
            Err(e) => return Err(e),
        };

        let spotify_id = artist
            .identifier
            .strip_prefix("spotify:")
            .unwrap_or(&artist.identifier);
        let mapping = serde_json::to_value(ExternalEntityId {
            entity_type: "artist".to_string(),
            entity_uuid: uuid.clone(),
            source: SPOTIFY.to_string(),
            external_id: spotify_id.to_string(),
        })?;
        self.storage
            .upsert(EXTERNAL_IDS_TABLE, &[mapping], EXTERNAL_IDS_KEY)
            .await?;

        if !artist.genres.is_empty() {
            let args = json!({"p_artist_id": uuid, "p_raw_genres": artist.genres});
            if let Err(e) = self.storage.rpc(SYNC_GENRES_RPC, &args).await {
                debug!("Genre sync skipped for {}: {}", artist.name, e);
            }
        }
        Ok(created)
    }

    fn row_id(row: &Value) -> Result<String> {
        column_text(row, "id").ok_or_else(|| IngestError::Storage {
            table: ARTISTS_TABLE.to_string(),
            message: "row has no id".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpotifyCredentials;
    use crate::storage::InMemoryStorage;
    use crate::test_support::{json_response, RecordingPacer, ScriptedHttp};

    fn seeder(http: ScriptedHttp, storage: Arc<InMemoryStorage>) -> SpotifySeeder {
        let api = SpotifyApi::new(
            Arc::new(http),
            Arc::new(RecordingPacer::default()),
            SpotifyCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
        )
        .with_urls("http://spotify.test/v1", "http://spotify.test/api/token");
        SpotifySeeder::new(Arc::new(api), storage)
    }

    #[tokio::test]
    async fn test_known_ids_are_filtered_out() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .upsert(
                EXTERNAL_IDS_TABLE,
                &[json!({"entity_type": "artist", "entity_uuid": "u1", "source": "spotify", "external_id": "a"})],
                EXTERNAL_IDS_KEY,
            )
            .await
            .unwrap();
        let seeder = seeder(ScriptedHttp::new(), storage);
        let known = seeder
            .existing_ids(&["a".to_string(), "b".to_string()])
            .await;
        assert_eq!(known, HashSet::from(["a".to_string()]));
    }

    #[tokio::test]
    async fn test_failed_detail_batch_still_stores_the_rest() {
        let storage = Arc::new(InMemoryStorage::new());
        let items: Vec<Value> = (0..60)
            .map(|i| json!({"track": {"artists": [{"id": format!("a{}", i)}]}}))
            .collect();
        let http = ScriptedHttp::new()
            .route("api/token", vec![json_response(200, json!({"access_token": "t", "expires_in": 3600}))])
            .route("search", vec![json_response(200, json!({"playlists": {"items": [{"id": "p1"}]}}))])
            .route("playlists/p1/tracks", vec![json_response(200, json!({"items": items}))])
            .route(
                "/artists",
                vec![
                    json_response(503, json!({"error": "unavailable"})),
                    json_response(200, json!({"artists": [{"id": "a55", "name": "Wet Leg", "genres": []}]})),
                ],
            );
        let seeder = seeder(http, storage.clone());

        let summary = seeder.run(&["indie".to_string()], 60).await;
        assert_eq!(summary.discovered, 60);
        assert_eq!(summary.failed, 50);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(storage.count(ARTISTS_TABLE), 1);
    }

    #[tokio::test]
    async fn test_conflicting_artist_is_linked_not_duplicated() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .insert(ARTISTS_TABLE, &json!({"name": "Boygenius", "jambase_artist_id": "spotify-b"}))
            .await
            .unwrap();

        let http = ScriptedHttp::new()
            .route("api/token", vec![json_response(200, json!({"access_token": "t", "expires_in": 3600}))])
            .route("search", vec![json_response(200, json!({"playlists": {"items": [{"id": "p1"}]}}))])
            .route(
                "playlists/p1/tracks",
                vec![json_response(
                    200,
                    json!({"items": [{"track": {"artists": [{"id": "a"}, {"id": "b"}]}}]}),
                )],
            )
            .route(
                "/artists",
                vec![json_response(
                    200,
                    json!({"artists": [
                        {"id": "a", "name": "Alvvays", "genres": ["indie pop"]},
                        {"id": "b", "name": "Boygenius", "genres": []}
                    ]}),
                )],
            );
        let seeder = seeder(http, storage.clone());

        let summary = seeder.run(&["indie".to_string()], 10).await;
        assert_eq!(summary.discovered, 2);
        assert_eq!((summary.inserted, summary.linked, summary.failed), (1, 1, 0));
        assert_eq!(storage.count(ARTISTS_TABLE), 2);
        assert_eq!(storage.count(EXTERNAL_IDS_TABLE), 2);

        let calls = storage.rpc_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, SYNC_GENRES_RPC);
        assert_eq!(calls[0].1["p_raw_genres"], json!(["indie pop"]));
    }
}
