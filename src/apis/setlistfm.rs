//! Setlist search through Setlist.fm, search proxies and cached rows.

use crate::apis::send_checked;
use crate::app::ports::{HttpClientPort, HttpRequest};
use crate::constants::{SETLISTS_TABLE, SETLIST_FM, SETLIST_FM_BASE_URL, USER_AGENT};
use crate::error::{IngestError, Result};
use crate::extract::{first_bool, first_str, path};
use crate::storage::{RowQuery, Storage};
use crate::types::{CoverArtist, Setlist, SetlistArtist, SetlistSong, SetlistVenue};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Setlist.fm dates are `DD-MM-YYYY`. Accepts that form, `YYYY-MM-DD` or a full timestamp.
pub fn to_setlist_fm_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d-%m-%Y") {
        return Some(date.format("%d-%m-%Y").to_string());
    }
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%d-%m-%Y").to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetlistQuery {
    pub artist_name: String,
    pub date: Option<String>,
    pub venue_name: Option<String>,
    pub city_name: Option<String>,
    pub state_code: Option<String>,
}

impl SetlistQuery {
    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![("artistName".to_string(), self.artist_name.clone())];
        if let Some(date) = self.date.as_deref().and_then(to_setlist_fm_date) {
            params.push(("date".into(), date));
        }
        for (key, value) in [
            ("venueName", &self.venue_name),
            ("cityName", &self.city_name),
            ("stateCode", &self.state_code),
        ] {
            if let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                params.push((key.into(), v.to_string()));
            }
        }
        params
    }
}

/// Raw Setlist.fm setlist to the ordered song list
pub fn transform_setlist(raw: &Value) -> Setlist {
    let sets = path(raw, "sets.set")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut songs = Vec::new();
    for (set_index, set) in sets.iter().enumerate() {
        let set_number = set_index as u32 + 1;
        let set_name = first_str(set, &["name"]).unwrap_or_else(|| format!("Set {}", set_number));
        let set_songs = set.get("song").and_then(Value::as_array).into_iter().flatten();
        for (song_index, song) in set_songs.enumerate() {
            songs.push(SetlistSong {
                name: first_str(song, &["name"]).unwrap_or_default(),
                position: song_index as u32 + 1,
                set_number,
                set_name: set_name.clone(),
                cover: song.get("cover").filter(|c| c.is_object()).map(|c| CoverArtist {
                    artist: first_str(c, &["name"]).unwrap_or_default(),
                    mbid: first_str(c, &["mbid"]),
                }),
                info: first_str(song, &["info"]),
                tape: first_bool(song, &["tape"]).unwrap_or(false),
            });
        }
    }

    Setlist {
        setlist_fm_id: first_str(raw, &["id"]).unwrap_or_default(),
        version_id: first_str(raw, &["versionId"]),
        event_date: first_str(raw, &["eventDate"]),
        artist: SetlistArtist {
            name: first_str(raw, &["artist.name"]).unwrap_or_default(),
            mbid: first_str(raw, &["artist.mbid"]),
        },
        venue: SetlistVenue {
            name: first_str(raw, &["venue.name"]),
            city: first_str(raw, &["venue.city.name"]),
            state: first_str(raw, &["venue.city.state", "venue.city.stateCode"]),
            country: first_str(raw, &["venue.city.country.name"]),
        },
        tour: first_str(raw, &["tour.name"]),
        info: first_str(raw, &["info"]),
        url: first_str(raw, &["url"]),
        song_count: songs.len(),
        songs,
        last_updated: Some(Utc::now().to_rfc3339()),
    }
}

/// Setlists from a response body; accepts raw Setlist.fm items or already transformed ones
pub fn parse_setlists(body: &Value) -> Vec<Setlist> {
    let items = body
        .as_array()
        .or_else(|| body.get("setlist").and_then(Value::as_array))
        .or_else(|| body.get("setlists").and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or_default();
    items
        .iter()
        .map(|item| match serde_json::from_value::<Setlist>(item.clone()) {
            Ok(setlist) if item.get("setlistFmId").is_some() => setlist,
            _ => transform_setlist(item),
        })
        .collect()
}

/// Direct Setlist.fm search client
pub struct SetlistFmApi {
    http: Arc<dyn HttpClientPort>,
    api_key: String,
    base_url: String,
}

impl SetlistFmApi {
    pub fn new(http: Arc<dyn HttpClientPort>, api_key: String) -> Self {
        Self {
            http,
            api_key,
            base_url: SETLIST_FM_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Search setlists; a 404 means none were found
    pub async fn search(&self, query: &SetlistQuery) -> Result<Vec<Setlist>> {
        let mut request = HttpRequest::get(format!("{}/search/setlists", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);
        for (key, value) in query.params() {
            request = request.query(&key, value);
        }
        match send_checked(self.http.as_ref(), SETLIST_FM, request).await {
            Ok(resp) => Ok(parse_setlists(&resp.json::<Value>()?)),
            Err(IngestError::Status { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Where a resolved setlist came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetlistSource {
    SetlistFm,
    Proxy(String),
    Cache,
}

impl fmt::Display for SetlistSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetlistSource::SetlistFm => f.write_str("setlist.fm"),
            SetlistSource::Proxy(url) => write!(f, "proxy {}", url),
            SetlistSource::Cache => f.write_str("cache"),
        }
    }
}

/// Tries Setlist.fm (when a key is configured), then each proxy in order, then cached rows
pub struct SetlistResolver {
    http: Arc<dyn HttpClientPort>,
    direct: Option<SetlistFmApi>,
    proxies: Vec<String>,
    cache: Option<Arc<dyn Storage>>,
}

impl SetlistResolver {
    pub fn new(http: Arc<dyn HttpClientPort>, proxies: Vec<String>) -> Self {
        Self {
            http,
            direct: None,
            proxies,
            cache: None,
        }
    }

    pub fn with_direct(mut self, api: SetlistFmApi) -> Self {
        self.direct = Some(api);
        self
    }

    pub fn with_cache(mut self, storage: Arc<dyn Storage>) -> Self {
        self.cache = Some(storage);
        self
    }

    async fn search_proxy(&self, url: &str, query: &SetlistQuery) -> Result<Vec<Setlist>> {
        let mut request = HttpRequest::get(url).header("Accept", "application/json");
        for (key, value) in query.params() {
            request = request.query(&key, value);
        }
        let resp = send_checked(self.http.as_ref(), SETLIST_FM, request).await?;
        Ok(parse_setlists(&resp.json::<Value>()?))
    }

    async fn search_cache(&self, storage: &dyn Storage, query: &SetlistQuery) -> Result<Vec<Setlist>> {
        let mut row_query = RowQuery::new()
            .ilike("artist_name", &query.artist_name)
            .order_by("last_updated", false)
            .range(0, 5);
        if let Some(date) = query.date.as_deref().and_then(to_setlist_fm_date) {
            row_query = row_query.eq("event_date", &date);
        }
        let (rows, _) = storage.search(SETLISTS_TABLE, &row_query).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("setlist"))
            .filter_map(|s| serde_json::from_value::<Setlist>(s.clone()).ok())
            .collect())
    }

    /// First setlist found along the chain; sources that fail are logged and skipped
    pub async fn resolve(&self, query: &SetlistQuery) -> Option<(Setlist, SetlistSource)> {
        if let Some(api) = &self.direct {
            match api.search(query).await {
                Ok(found) => {
                    if let Some(first) = found.into_iter().next() {
                        return Some((first, SetlistSource::SetlistFm));
                    }
                    debug!("Setlist.fm has no setlist for {}", query.artist_name);
                }
                Err(e) => warn!("Setlist.fm search failed: {}", e),
            }
        }

        for url in &self.proxies {
            match self.search_proxy(url, query).await {
                Ok(found) => {
                    if let Some(first) = found.into_iter().next() {
                        return Some((first, SetlistSource::Proxy(url.clone())));
                    }
                }
                Err(e) => debug!("Setlist proxy {} failed: {}", url, e),
            }
        }

        if let Some(storage) = &self.cache {
            match self.search_cache(storage.as_ref(), query).await {
                Ok(found) => {
                    if let Some(first) = found.into_iter().next() {
                        info!("Using cached setlist for {}", query.artist_name);
                        return Some((first, SetlistSource::Cache));
                    }
                }
                Err(e) => warn!("Cached setlist lookup failed: {}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::test_support::{json_response, ScriptedHttp};
    use serde_json::json;

    fn raw_setlist() -> Value {
        json!({
            "id": "63de4613",
            "versionId": "7be1aaa0",
            "eventDate": "23-08-2024",
            "artist": {"mbid": "a74b1b7f", "name": "Phish"},
            "venue": {
                "name": "Dick's Sporting Goods Park",
                "city": {"name": "Commerce City", "state": "Colorado", "country": {"name": "United States"}}
            },
            "tour": {"name": "Summer Tour 2024"},
            "url": "https://www.setlist.fm/setlist/phish/2024/x.html",
            "sets": {"set": [
                {"song": [{"name": "Chalk Dust Torture"}, {"name": "Ghost", "info": "jam"}]},
                {"name": "Encore", "song": [{"name": "Loving Cup", "cover": {"name": "The Rolling Stones", "mbid": "b071f9fa"}}, {"name": "Intro", "tape": true}]}
            ]}
        })
    }

    #[test]
    fn test_date_conversion() {
        assert_eq!(to_setlist_fm_date("2024-08-23").as_deref(), Some("23-08-2024"));
        assert_eq!(to_setlist_fm_date("23-08-2024").as_deref(), Some("23-08-2024"));
        assert_eq!(to_setlist_fm_date("2024-08-23T19:00:00Z").as_deref(), Some("23-08-2024"));
        assert!(to_setlist_fm_date("Aug 23").is_none());
    }

    #[test]
    fn test_transform_setlist() {
        let setlist = transform_setlist(&raw_setlist());
        assert_eq!(setlist.setlist_fm_id, "63de4613");
        assert_eq!(setlist.song_count, 4);
        assert_eq!(setlist.venue.city.as_deref(), Some("Commerce City"));
        assert_eq!(setlist.venue.country.as_deref(), Some("United States"));
        assert_eq!(setlist.tour.as_deref(), Some("Summer Tour 2024"));

        let first = &setlist.songs[0];
        assert_eq!((first.position, first.set_number), (1, 1));
        assert_eq!(first.set_name, "Set 1");
        let cover = &setlist.songs[2];
        assert_eq!(cover.set_name, "Encore");
        assert_eq!((cover.position, cover.set_number), (1, 2));
        assert_eq!(cover.cover.as_ref().unwrap().artist, "The Rolling Stones");
        assert!(setlist.songs[3].tape);
    }

    #[tokio::test]
    async fn test_direct_search_404_is_empty() {
        let http = Arc::new(ScriptedHttp::new().route("search/setlists", vec![json_response(404, json!({}))]));
        let api = SetlistFmApi::new(http.clone(), "key".into());
        let query = SetlistQuery {
            artist_name: "Phish".into(),
            date: Some("2024-08-23".into()),
            ..Default::default()
        };
        assert!(api.search(&query).await.unwrap().is_empty());

        let request = &http.requests()[0];
        assert_eq!(request.query_value("date"), Some("23-08-2024"));
        assert!(request.headers.contains(&("x-api-key".to_string(), "key".to_string())));
    }

    #[tokio::test]
    async fn test_resolver_falls_through_proxies_to_cache() {
        let http = Arc::new(
            ScriptedHttp::new()
                .route("proxy-a", vec![json_response(500, json!({"error": "down"}))])
                .route("proxy-b", vec![json_response(200, json!({"setlist": []}))]),
        );
        let storage = Arc::new(InMemoryStorage::new());
        let cached = transform_setlist(&raw_setlist());
        storage
            .upsert(
                SETLISTS_TABLE,
                &[json!({
                    "setlist_fm_id": cached.setlist_fm_id,
                    "artist_name": "Phish",
                    "event_date": "23-08-2024",
                    "setlist": serde_json::to_value(&cached).unwrap()
                })],
                "setlist_fm_id",
            )
            .await
            .unwrap();

        let resolver = SetlistResolver::new(
            http.clone(),
            vec!["http://proxy-a/search".into(), "http://proxy-b/search".into()],
        )
        .with_cache(storage);
        let query = SetlistQuery {
            artist_name: "phish".into(),
            date: Some("2024-08-23".into()),
            ..Default::default()
        };

        let (setlist, source) = resolver.resolve(&query).await.unwrap();
        assert_eq!(source, SetlistSource::Cache);
        assert_eq!(setlist.song_count, 4);
        assert_eq!(http.count("proxy-"), 2);
    }

    #[tokio::test]
    async fn test_resolver_prefers_first_proxy_hit() {
        let http = Arc::new(
            ScriptedHttp::new().route("proxy-a", vec![json_response(200, json!({"setlist": [raw_setlist()]}))]),
        );
        let resolver = SetlistResolver::new(http, vec!["http://proxy-a/search".into()]);
        let query = SetlistQuery {
            artist_name: "Phish".into(),
            ..Default::default()
        };
        let (setlist, source) = resolver.resolve(&query).await.unwrap();
        assert_eq!(source, SetlistSource::Proxy("http://proxy-a/search".into()));
        assert_eq!(setlist.artist.name, "Phish");
    }
}
