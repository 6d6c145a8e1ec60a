use crate::apis::send_checked;
use crate::app::ports::{HttpClientPort, HttpRequest, Pacer};
use crate::config::SpotifyCredentials;
use crate::constants::{
    SPOTIFY, SPOTIFY_API_URL, SPOTIFY_ARTISTS_BATCH, SPOTIFY_MAX_AUTH_RETRIES,
    SPOTIFY_MAX_RATE_LIMIT_RETRIES, SPOTIFY_PLAYLIST_TRACKS_LIMIT, SPOTIFY_RETRY_AFTER_DEFAULT_SECS,
    SPOTIFY_SEARCH_LIMIT, SPOTIFY_TOKEN_URL,
};
use crate::error::{IngestError, Result};
use crate::extract::{first_f64, first_str, genres};
use crate::observability::metrics;
use crate::types::CanonicalArtist;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tokens are refreshed this long before Spotify says they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Artists returned by a batched lookup plus the ids whose batch failed
#[derive(Debug, Clone, Default)]
pub struct ArtistFetch {
    pub artists: Vec<Value>,
    pub failed_ids: usize,
    pub errors: Vec<String>,
}

/// Client-credentials Spotify Web API client
pub struct SpotifyApi {
    http: Arc<dyn HttpClientPort>,
    pacer: Arc<dyn Pacer>,
    credentials: SpotifyCredentials,
    api_url: String,
    token_url: String,
    request_delay: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyApi {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        pacer: Arc<dyn Pacer>,
        credentials: SpotifyCredentials,
    ) -> Self {
        Self {
            http,
            pacer,
            credentials,
            api_url: SPOTIFY_API_URL.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
            request_delay: Duration::from_millis(300),
            token: Mutex::new(None),
        }
    }

    pub fn with_urls(mut self, api_url: &str, token_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self.token_url = token_url.to_string();
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Cached bearer token, fetched again when within five minutes of expiry
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let request = HttpRequest::post_form(
            &self.token_url,
            vec![("grant_type".to_string(), "client_credentials".to_string())],
        )
        .basic_auth(&self.credentials.client_id, &self.credentials.client_secret);
        let resp = send_checked(self.http.as_ref(), SPOTIFY, request)
            .await
            .map_err(|e| IngestError::Auth {
                provider: SPOTIFY.to_string(),
                message: e.to_string(),
            })?;
        let body: Value = resp.json()?;
        let access_token = first_str(&body, &["access_token"]).ok_or_else(|| IngestError::Auth {
            provider: SPOTIFY.to_string(),
            message: "token response has no access_token".to_string(),
        })?;
        let expires_in = first_f64(&body, &["expires_in"]).unwrap_or(3600.0) as u64;
        debug!("Fetched Spotify token valid for {}s", expires_in);

        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Authenticated GET. A 401 refreshes the token; a 429 waits `Retry-After` and retries.
    pub async fn get(&self, resource: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut auth_retries = 0;
        let mut rate_retries = 0;
        loop {
            let token = self.access_token().await?;
            let mut request =
                HttpRequest::get(format!("{}/{}", self.api_url, resource)).bearer(token);
            for (key, value) in query {
                request = request.query(key, value);
            }

            let started = Instant::now();
            let resp = self.http.send(request).await?;
            match resp.status {
                429 if rate_retries < SPOTIFY_MAX_RATE_LIMIT_RETRIES => {
                    rate_retries += 1;
                    metrics::provider::request_error(SPOTIFY, 429);
                    let wait = resp.retry_after.unwrap_or(SPOTIFY_RETRY_AFTER_DEFAULT_SECS);
                    warn!("Spotify rate limited; waiting {}s (retry {})", wait, rate_retries);
                    self.pacer.pause(Duration::from_secs(wait)).await;
                }
                401 if auth_retries < SPOTIFY_MAX_AUTH_RETRIES => {
                    auth_retries += 1;
                    metrics::provider::request_error(SPOTIFY, 401);
                    warn!("Spotify returned 401; refreshing token (retry {})", auth_retries);
                    self.invalidate_token().await;
                    self.pacer.pause(Duration::from_millis(500)).await;
                }
                _ if resp.is_success() => {
                    metrics::provider::request_success(SPOTIFY, started.elapsed().as_secs_f64());
                    return resp.json();
                }
                status => {
                    metrics::provider::request_error(SPOTIFY, status);
                    return Err(resp.error_for_status(SPOTIFY).err().unwrap_or(IngestError::Provider {
                        provider: SPOTIFY.to_string(),
                        message: format!("unexpected status {}", status),
                    }));
                }
            }
        }
    }

    /// Playlist ids for a `top <genre>` search
    pub async fn search_playlists(&self, genre: &str) -> Result<Vec<String>> {
        let body = self
            .get(
                "search",
                &[
                    ("type", "playlist".to_string()),
                    ("q", format!("top {}", genre)),
                    ("limit", SPOTIFY_SEARCH_LIMIT.to_string()),
                ],
            )
            .await?;
        Ok(body
            .pointer("/playlists/items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|p| first_str(p, &["id"])).collect())
            .unwrap_or_default())
    }

    /// Artist ids credited on a playlist's tracks, in order of appearance
    pub async fn playlist_artist_ids(&self, playlist_id: &str) -> Result<Vec<String>> {
        let body = self
            .get(
                &format!("playlists/{}/tracks", playlist_id),
                &[
                    ("limit", SPOTIFY_PLAYLIST_TRACKS_LIMIT.to_string()),
                    ("fields", "items(track(artists(id)))".to_string()),
                ],
            )
            .await?;
        let mut ids = Vec::new();
        for item in body.get("items").and_then(Value::as_array).into_iter().flatten() {
            let artists = item.pointer("/track/artists").and_then(Value::as_array);
            for artist in artists.into_iter().flatten() {
                if let Some(id) = first_str(artist, &["id"]) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Full artist objects, at most 50 ids per call. A failed batch is logged,
    /// counted and skipped; the batches around it still run.
    pub async fn get_artists(&self, ids: &[String]) -> ArtistFetch {
        let mut fetch = ArtistFetch::default();
        for (i, batch) in ids.chunks(SPOTIFY_ARTISTS_BATCH).enumerate() {
            if i > 0 {
                self.pacer.pause(self.request_delay).await;
            }
            match self.get("artists", &[("ids", batch.join(","))]).await {
                Ok(body) => fetch.artists.extend(
                    body.get("artists")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .filter(|a| a.is_object())
                        .cloned(),
                ),
                Err(e) => {
                    warn!("Spotify artist batch {} ({} id(s)) failed: {}", i + 1, batch.len(), e);
                    fetch.failed_ids += batch.len();
                    fetch.errors.push(format!("batch {}: {}", i + 1, e));
                }
            }
        }
        fetch
    }

    /// Unique artist ids from genre playlists, stopping once `max_ids` are known.
    /// Failed searches and playlists are logged and skipped.
    pub async fn discover_artist_ids(&self, genres: &[String], max_ids: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for genre in genres {
            if ordered.len() >= max_ids {
                break;
            }
            let playlists = match self.search_playlists(genre).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("Search playlists '{}' failed: {}", genre, e);
                    self.pacer.pause(self.request_delay).await;
                    continue;
                }
            };
            self.pacer.pause(self.request_delay).await;

            for playlist in playlists {
                if ordered.len() >= max_ids {
                    break;
                }
                match self.playlist_artist_ids(&playlist).await {
                    Ok(ids) => {
                        for id in ids {
                            if seen.insert(id.clone()) {
                                ordered.push(id);
                            }
                        }
                    }
                    Err(e) => debug!("Playlist {} skipped: {}", playlist, e),
                }
                self.pacer.pause(self.request_delay).await;
            }
        }
        info!("Discovered {} Spotify artist id(s)", ordered.len());
        ordered
    }
}

/// Artist row for a Spotify artist under a synthetic `spotify-<id>` provider id
pub fn map_artist(raw: &Value) -> Option<CanonicalArtist> {
    let id = first_str(raw, &["id"])?;
    Some(CanonicalArtist {
        name: first_str(raw, &["name"]).unwrap_or_else(|| "Unknown Artist".to_string()),
        jambase_artist_id: format!("spotify-{}", id),
        identifier: format!("spotify:{}", id),
        artist_data_source: SPOTIFY.to_string(),
        url: first_str(raw, &["external_urls.spotify"]),
        image_url: first_str(raw, &["images.0.url"]),
        genres: genres(raw, &["genres"]),
        artist_type: None,
        band_or_musician: None,
        founding_location: None,
        founding_date: None,
        external_identifiers: Value::Null,
        same_as: Value::Null,
        date_published: None,
        date_modified: None,
        last_synced_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{HttpMethod, HttpResponse};
    use crate::test_support::{json_response, RecordingPacer, ScriptedHttp};
    use serde_json::json;

    fn creds() -> SpotifyCredentials {
        SpotifyCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
        }
    }

    fn token() -> HttpResponse {
        json_response(200, json!({"access_token": "tok", "expires_in": 3600}))
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let http = Arc::new(
            ScriptedHttp::new()
                .route("api/token", vec![token()])
                .route("/artists", vec![json_response(200, json!({"artists": []}))]),
        );
        let api = SpotifyApi::new(http.clone(), Arc::new(RecordingPacer::default()), creds());
        api.get("artists", &[("ids", "a".into())]).await.unwrap();
        api.get("artists", &[("ids", "b".into())]).await.unwrap();

        assert_eq!(http.count("api/token"), 1);
        let token_request = &http.requests()[0];
        assert_eq!(token_request.basic_auth, Some(("id".into(), "secret".into())));
        assert!(matches!(&token_request.method, HttpMethod::PostForm(form) if form[0].1 == "client_credentials"));
        assert_eq!(http.requests()[1].bearer.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_401_refreshes_token_then_gives_up() {
        let http = Arc::new(
            ScriptedHttp::new()
                .route("api/token", vec![token()])
                .route("/artists", vec![json_response(401, json!({"error": "expired"}))]),
        );
        let api = SpotifyApi::new(http.clone(), Arc::new(RecordingPacer::default()), creds());
        let err = api.get("artists", &[]).await.unwrap_err();

        assert!(matches!(err, IngestError::Status { status: 401, .. }));
        assert_eq!(http.count("/artists"), 3);
        assert_eq!(http.count("api/token"), 3);
    }

    #[tokio::test]
    async fn test_429_waits_retry_after() {
        let mut limited = json_response(429, json!({}));
        limited.retry_after = Some(7);
        let http = Arc::new(
            ScriptedHttp::new()
                .route("api/token", vec![token()])
                .route("/artists", vec![limited, json_response(200, json!({"artists": [{"id": "x"}]}))]),
        );
        let pacer = Arc::new(RecordingPacer::default());
        let api = SpotifyApi::new(http, pacer.clone(), creds());
        let body = api.get("artists", &[]).await.unwrap();

        assert_eq!(body["artists"][0]["id"], "x");
        assert_eq!(pacer.calls(), vec![Duration::from_secs(7)]);
    }

    #[tokio::test]
    async fn test_failed_artist_batch_keeps_the_others() {
        let ids: Vec<String> = (0..120).map(|i| format!("id{}", i)).collect();
        let http = Arc::new(
            ScriptedHttp::new()
                .route("api/token", vec![token()])
                .route(
                    "/artists",
                    vec![
                        json_response(200, json!({"artists": [{"id": "id0", "name": "First"}]})),
                        json_response(500, json!({"error": "upstream"})),
                        json_response(200, json!({"artists": [{"id": "id100", "name": "Third"}, null]})),
                    ],
                ),
        );
        let api = SpotifyApi::new(http.clone(), Arc::new(RecordingPacer::default()), creds());

        let fetch = api.get_artists(&ids).await;
        assert_eq!(http.count("/artists"), 3);
        assert_eq!(fetch.artists.len(), 2);
        assert_eq!(fetch.artists[1]["name"], "Third");
        assert_eq!(fetch.failed_ids, 50);
        assert!(fetch.errors[0].starts_with("batch 2:"));
    }

    #[tokio::test]
    async fn test_discovery_dedupes_and_caps() {
        let http = Arc::new(
            ScriptedHttp::new()
                .route("api/token", vec![token()])
                .route("/search", vec![json_response(200, json!({"playlists": {"items": [{"id": "p1"}, null, {"id": "p2"}]}}))])
                .route("/playlists/p1/tracks", vec![json_response(200, json!({"items": [
                    {"track": {"artists": [{"id": "a1"}, {"id": "a2"}]}},
                    {"track": {"artists": [{"id": "a1"}]}},
                    {"track": null}
                ]}))])
                .route("/playlists/p2/tracks", vec![json_response(200, json!({"items": [
                    {"track": {"artists": [{"id": "a3"}]}}
                ]}))]),
        );
        let api = SpotifyApi::new(http.clone(), Arc::new(RecordingPacer::default()), creds());

        let ids = api.discover_artist_ids(&["rock".into(), "pop".into()], 2).await;
        assert_eq!(ids, vec!["a1", "a2"]);
        // the cap is reached inside the first genre
        assert_eq!(http.count("/search"), 1);
        assert_eq!(http.requests()[1].query_value("q"), Some("top rock"));
    }

    #[test]
    fn test_map_artist_uses_synthetic_ids() {
        let artist = map_artist(&json!({
            "id": "4Z8W4fKeB5YxbusRsdQVPb",
            "name": "Radiohead",
            "genres": ["alternative rock", "art rock"],
            "images": [{"url": "https://i.scdn.co/a.jpg"}],
            "external_urls": {"spotify": "https://open.spotify.com/artist/4Z8W"}
        }))
        .unwrap();
        assert_eq!(artist.jambase_artist_id, "spotify-4Z8W4fKeB5YxbusRsdQVPb");
        assert_eq!(artist.identifier, "spotify:4Z8W4fKeB5YxbusRsdQVPb");
        assert_eq!(artist.image_url.as_deref(), Some("https://i.scdn.co/a.jpg"));
        assert_eq!(artist.genres.len(), 2);
        assert!(map_artist(&json!({"name": "no id"})).is_none());
    }
}
