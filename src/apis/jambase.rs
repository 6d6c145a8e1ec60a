use crate::apis::get_json;
use crate::app::ports::{HttpClientPort, HttpRequest, Pacer};
use crate::constants::{
    JAMBASE, JAMBASE_BASE_URL, JAMBASE_EVENT_KEY, JAMBASE_MAX_SEARCH_PAGES,
    JAMBASE_SEARCH_PAGE_SIZE, USER_AGENT,
};
use crate::error::{IngestError, Result};
use crate::extract::{
    combine_date_and_time, first_array, first_bool, first_f64, first_str, first_value, genres,
    parse_timestamp, path, placeholder_id, strip_provider_prefix,
};
use crate::observability::metrics;
use crate::types::{
    CanonicalArtist, CanonicalEvent, CanonicalVenue, EventProvider, FetchOutcome, Provider,
    RawRecord, SeedQuery,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One page of JamBase results with whatever pagination the response carried
#[derive(Debug, Clone, Default)]
pub struct JamBasePage {
    pub records: Vec<Value>,
    pub page: u32,
    pub total_pages: Option<u32>,
    pub total_items: Option<u64>,
}

impl JamBasePage {
    pub fn has_next(&self) -> bool {
        match self.total_pages {
            Some(total) => self.page < total,
            None => !self.records.is_empty(),
        }
    }
}

/// Result array at the top level or under `key`, `data` or `results`
pub fn extract_records(body: &Value, key: &str) -> Vec<Value> {
    if let Some(items) = body.as_array() {
        return items.clone();
    }
    [key, "data", "results"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

pub struct JamBaseApi {
    http: Arc<dyn HttpClientPort>,
    pacer: Arc<dyn Pacer>,
    api_key: String,
    base_url: String,
    page_pause: Duration,
    max_pages: u32,
}

impl JamBaseApi {
    pub fn new(http: Arc<dyn HttpClientPort>, pacer: Arc<dyn Pacer>, api_key: String) -> Self {
        Self {
            http,
            pacer,
            api_key,
            base_url: JAMBASE_BASE_URL.to_string(),
            page_pause: Duration::from_millis(300),
            max_pages: JAMBASE_MAX_SEARCH_PAGES,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_pause(mut self, pause: Duration) -> Self {
        self.page_pause = pause;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    fn request(&self, resource: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{}", self.base_url, resource))
            .query("apikey", &self.api_key)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
    }

    async fn fetch(&self, request: HttpRequest, key: &str, page: u32) -> Result<JamBasePage> {
        let body = get_json(self.http.as_ref(), JAMBASE, request).await?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = first_str(&body, &["errors.0.message", "error", "message"])
                .unwrap_or_else(|| "request unsuccessful".to_string());
            return Err(IngestError::Provider {
                provider: JAMBASE.to_string(),
                message,
            });
        }
        Ok(JamBasePage {
            records: extract_records(&body, key),
            page,
            total_pages: first_f64(&body, &["pagination.totalPages"]).map(|n| n as u32),
            total_items: first_f64(&body, &["pagination.totalItems"]).map(|n| n as u64),
        })
    }

    /// Page of the full event feed, with external identifiers expanded
    pub async fn fetch_events_page(
        &self,
        page: u32,
        per_page: u32,
        date_modified_from: Option<&str>,
    ) -> Result<JamBasePage> {
        let mut request = self
            .request("events")
            .query("expandExternalIdentifiers", "true")
            .query("perPage", per_page)
            .query("page", page);
        if let Some(from) = date_modified_from {
            request = request.query("dateModifiedFrom", from);
        }
        self.fetch(request, "events", page).await
    }

    /// Page of events for one artist
    pub async fn search_events(&self, artist_name: &str, page: u32, per_page: u32) -> Result<JamBasePage> {
        let request = self
            .request("events")
            .query("artistName", artist_name)
            .query("perPage", per_page)
            .query("page", page);
        self.fetch(request, "events", page).await
    }

    /// Page of artists matching a name
    pub async fn search_artists(&self, artist_name: &str, page: u32, per_page: u32) -> Result<JamBasePage> {
        let request = self
            .request("artists")
            .query("artistName", artist_name)
            .query("perPage", per_page)
            .query("page", page);
        self.fetch(request, "artists", page).await
    }

    /// Every page for an artist up to the page cap. Errors end paging early and are reported.
    pub async fn fetch_artist_events(&self, artist_name: &str) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        for page in 1..=self.max_pages {
            if page > 1 {
                self.pacer.pause(self.page_pause).await;
            }
            match self.search_events(artist_name, page, JAMBASE_SEARCH_PAGE_SIZE).await {
                Ok(result) => {
                    outcome.pages += 1;
                    debug!("JamBase '{}' page {}: {} event(s)", artist_name, page, result.records.len());
                    let more = result.has_next()
                        && result.records.len() >= JAMBASE_SEARCH_PAGE_SIZE as usize;
                    outcome.records.extend(result.records);
                    if !more {
                        break;
                    }
                }
                Err(e) => {
                    warn!("JamBase fetch failed for '{}' page {}: {}", artist_name, page, e);
                    outcome.error = Some(e.to_string());
                    break;
                }
            }
        }
        metrics::provider::records_fetched(JAMBASE, outcome.records.len());
        outcome
    }
}

#[async_trait]
impl EventProvider for JamBaseApi {
    fn provider(&self) -> Provider {
        Provider::Jambase
    }

    fn conflict_column(&self) -> &'static str {
        JAMBASE_EVENT_KEY
    }

    async fn fetch_events(&self, seed: &SeedQuery) -> FetchOutcome {
        match seed {
            SeedQuery::Artist(name) => self.fetch_artist_events(name).await,
            other => FetchOutcome {
                error: Some(format!("JamBase does not support seed {}", other)),
                ..FetchOutcome::default()
            },
        }
    }

    fn map_event(&self, raw: &RawRecord) -> CanonicalEvent {
        map_event(raw)
    }
}

/// Performer flagged `x-isHeadliner`, else the first performer
pub fn headliner(raw: &Value) -> Option<&Value> {
    let performers = raw.get("performer")?.as_array()?;
    performers
        .iter()
        .find(|p| first_bool(p, &["x-isHeadliner"]).unwrap_or(false))
        .or_else(|| performers.first())
}

fn provider_id(value: &Value, paths: &[&str]) -> Option<String> {
    first_str(value, paths).map(|id| strip_provider_prefix(&id))
}

fn iso_or_raw(raw: Option<String>) -> Option<String> {
    raw.map(|s| parse_timestamp(&s).map(|d| d.to_rfc3339()).unwrap_or(s))
}

fn price_text(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Map a JamBase JSON-LD event (or a cached canonical row) to a canonical event
pub fn map_event(raw: &Value) -> CanonicalEvent {
    let mut event = CanonicalEvent::new(Provider::Jambase);
    event.jambase_event_id = Some(
        provider_id(raw, &["identifier"])
            .or_else(|| first_str(raw, &["id"]))
            .or_else(|| provider_id(raw, &["@id"]))
            .unwrap_or_else(|| placeholder_id("event")),
    );
    event.title = first_str(raw, &["name", "title", "headline"])
        .unwrap_or_else(|| "Untitled Event".to_string());

    let headliner = headliner(raw);
    match headliner {
        Some(performer) => {
            event.artist_name = first_str(performer, &["name", "title"])
                .unwrap_or_else(|| "Unknown Artist".to_string());
            event.artist_id = provider_id(performer, &["identifier", "@id"]);
        }
        None => {
            event.artist_name = first_str(raw, &["artist_name"])
                .unwrap_or_else(|| "Unknown Artist".to_string());
            event.artist_id = first_str(raw, &["artist_id"]);
        }
    }

    match raw.get("location").filter(|l| l.is_object()) {
        Some(location) => {
            event.venue_name = first_str(location, &["name", "title"])
                .unwrap_or_else(|| "Unknown Venue".to_string());
            event.venue_id = provider_id(location, &["identifier", "@id"]);
            event.venue_address = first_str(location, &["address.streetAddress", "address.address"]);
            event.venue_city = first_str(location, &["address.addressLocality", "address.city"]);
            event.venue_state = first_str(
                location,
                &["address.addressRegion.name", "address.addressRegion", "address.state"],
            );
            event.venue_zip = first_str(location, &["address.postalCode", "address.zip"]);
            event.latitude = first_f64(location, &["geo.latitude"]);
            event.longitude = first_f64(location, &["geo.longitude"]);
        }
        None => {
            event.venue_name = first_str(raw, &["venue_name"])
                .unwrap_or_else(|| "Unknown Venue".to_string());
            event.venue_id = first_str(raw, &["venue_id"]);
            event.venue_address = first_str(raw, &["venue_address"]);
            event.venue_city = first_str(raw, &["venue_city"]);
            event.venue_state = first_str(raw, &["venue_state"]);
            event.venue_zip = first_str(raw, &["venue_zip"]);
            event.latitude = first_f64(raw, &["latitude"]);
            event.longitude = first_f64(raw, &["longitude"]);
        }
    }

    let start = first_str(raw, &["startDate", "event_date", "datePublished", "start_time"]);
    event.event_date = Some(
        start
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
    );
    event.doors_time = first_str(raw, &["doorTime", "doorsTime", "doors_time"])
        .and_then(|doors| combine_date_and_time(start.as_deref(), &doors));

    event.genres = genres(raw, &["genre", "genres"]);
    if event.genres.is_empty() {
        if let Some(performer) = headliner {
            event.genres = genres(performer, &["genre"]);
        }
    }
    event.description = first_str(raw, &["description"]);

    apply_offers(raw, &mut event);

    event.external_url = first_str(raw, &["sameAs.0", "url", "external_url"]);
    event.tour_name = first_str(raw, &["partOfTour.name", "tour.name", "tour_name"]);
    event.event_status = first_str(raw, &["eventStatus", "event_status"]);
    event.images = raw
        .get("image")
        .and_then(Value::as_array)
        .map(|images| {
            images
                .iter()
                .filter_map(|img| {
                    first_str(img, &["url"]).map(|url| json!({"url": url, "caption": first_str(img, &["caption"])}))
                })
                .collect()
        })
        .unwrap_or_default();
    event.media_urls = event
        .images
        .iter()
        .filter_map(|img| first_str(img, &["url"]))
        .collect();
    event.last_modified_at = first_str(raw, &["dateModified"])
        .as_deref()
        .and_then(parse_timestamp);
    event
}

fn apply_offers(raw: &Value, event: &mut CanonicalEvent) {
    let offers = match first_array(raw, &["offers"]) {
        Some(offers) => offers,
        None => {
            event.ticket_available = first_bool(raw, &["ticket_available"]).unwrap_or(false);
            event.price_range = first_str(raw, &["price_range"]);
            event.price_currency = Some("USD".to_string());
            return;
        }
    };

    event.ticket_available = offers
        .iter()
        .any(|o| first_str(o, &["availability"]).map_or(false, |a| a.ends_with("InStock")));
    event.ticket_urls = offers.iter().filter_map(|o| first_str(o, &["url"])).collect();

    let spec = path(raw, "offers.0.priceSpecification");
    event.price_min = spec.and_then(|s| first_f64(s, &["minPrice"]));
    event.price_max = spec.and_then(|s| first_f64(s, &["maxPrice"]));
    event.price_currency = Some(
        spec.and_then(|s| first_str(s, &["priceCurrency"]))
            .unwrap_or_else(|| "USD".to_string()),
    );
    event.price_range = match (event.price_min, event.price_max) {
        (Some(min), Some(max)) => Some(format!("${} - ${}", price_text(min), price_text(max))),
        _ => spec
            .and_then(|s| first_f64(s, &["price"]))
            .map(|p| format!("${}", price_text(p)))
            .or_else(|| {
                let prices: Vec<String> =
                    offers.iter().filter_map(|o| first_str(o, &["price"])).collect();
                (!prices.is_empty()).then(|| prices.join(" - "))
            }),
    };
}

/// Artist row from a JSON-LD performer; `None` without an identifier
pub fn extract_artist(performer: &Value) -> Option<CanonicalArtist> {
    let identifier = first_str(performer, &["identifier"])?;
    Some(CanonicalArtist {
        name: first_str(performer, &["name"]).unwrap_or_else(|| "Unknown Artist".to_string()),
        jambase_artist_id: strip_provider_prefix(&identifier),
        identifier,
        artist_data_source: JAMBASE.to_string(),
        url: first_str(performer, &["url"]),
        image_url: first_str(performer, &["image"]),
        genres: genres(performer, &["genre"]),
        artist_type: first_str(performer, &["@type"]),
        band_or_musician: first_str(performer, &["x-bandOrMusician"]),
        founding_location: first_str(performer, &["foundingLocation.name"]),
        founding_date: first_str(performer, &["foundingDate"]),
        external_identifiers: first_value(performer, &["x-externalIdentifiers"])
            .cloned()
            .unwrap_or(Value::Null),
        same_as: first_value(performer, &["sameAs"]).cloned().unwrap_or(Value::Null),
        date_published: iso_or_raw(first_str(performer, &["datePublished"])),
        date_modified: iso_or_raw(first_str(performer, &["dateModified"])),
        last_synced_at: Utc::now(),
    })
}

/// Venue row from a JSON-LD location; `None` without a name
pub fn extract_venue(location: &Value) -> Option<CanonicalVenue> {
    let name = first_str(location, &["name"])?;
    let identifier = first_str(location, &["identifier"]);
    Some(CanonicalVenue {
        name,
        jambase_venue_id: identifier.as_deref().map(strip_provider_prefix),
        identifier,
        url: first_str(location, &["url"]),
        image_url: first_str(location, &["image"]),
        address: location.get("address").cloned().unwrap_or(Value::Null),
        geo: location.get("geo").cloned().unwrap_or(Value::Null),
        street_address: first_str(location, &["address.streetAddress"]),
        city: first_str(location, &["address.addressLocality"]),
        state: first_str(location, &["address.addressRegion.name", "address.addressRegion"]),
        zip: first_str(location, &["address.postalCode"]),
        country: first_str(
            location,
            &["address.addressCountry.identifier", "address.addressCountry.name", "address.addressCountry"],
        ),
        latitude: first_f64(location, &["geo.latitude"]),
        longitude: first_f64(location, &["geo.longitude"]),
        maximum_attendee_capacity: first_f64(location, &["maximumAttendeeCapacity"]).map(|c| c as i64),
        same_as: location
            .get("sameAs")
            .filter(|s| s.is_array())
            .cloned()
            .unwrap_or(Value::Null),
        last_synced_at: Utc::now(),
    })
}

/// Artist as returned by the artist search endpoint of the cache API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub genres: Vec<String>,
    pub image_url: Option<String>,
    pub popularity_score: i64,
    pub source: String,
}

/// Summary of a JamBase artist search result
pub fn map_artist_summary(raw: &Value) -> ArtistSummary {
    let name = first_str(raw, &["name", "title"]).unwrap_or_else(|| "Unknown Artist".to_string());
    ArtistSummary {
        id: provider_id(raw, &["identifier"])
            .or_else(|| first_str(raw, &["id"]))
            .or_else(|| provider_id(raw, &["@id"]))
            .unwrap_or_else(|| placeholder_id("artist")),
        description: first_str(raw, &["description", "bio"])
            .unwrap_or_else(|| format!("Artist: {}", name)),
        genres: genres(raw, &["genre", "genres"]),
        image_url: first_str(raw, &["image", "photo", "thumbnail"]),
        popularity_score: first_f64(raw, &["x-numUpcomingEvents", "upcomingEvents"])
            .map_or(0, |n| n as i64),
        source: "api".to_string(),
        name,
    }
}
