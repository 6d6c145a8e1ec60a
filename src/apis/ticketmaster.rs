use crate::apis::get_json;
use crate::app::ports::{HttpClientPort, HttpRequest, Pacer};
use crate::constants::{
    TICKETMASTER, TICKETMASTER_BASE_URL, TICKETMASTER_DEEP_PAGING_LIMIT, TICKETMASTER_EVENT_KEY,
    TICKETMASTER_PAGE_SIZE,
};
use crate::error::Result;
use crate::extract::{first_array, first_bool, first_f64, first_str, parse_timestamp, path};
use crate::observability::metrics;
use crate::types::{CanonicalEvent, EventProvider, FetchOutcome, Provider, RawRecord, SeedQuery};
use async_trait::async_trait;
use chrono::{Months, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One page of the Discovery API event search
#[derive(Debug, Clone)]
pub struct TicketmasterPage {
    pub events: Vec<Value>,
    pub number: u32,
    pub total_pages: u32,
    pub total_elements: u64,
}

pub struct TicketmasterApi {
    http: Arc<dyn HttpClientPort>,
    pacer: Arc<dyn Pacer>,
    api_key: String,
    base_url: String,
    page_size: u32,
    page_pause: Duration,
    months_ahead: u32,
}

impl TicketmasterApi {
    pub fn new(http: Arc<dyn HttpClientPort>, pacer: Arc<dyn Pacer>, api_key: String) -> Self {
        Self {
            http,
            pacer,
            api_key,
            base_url: TICKETMASTER_BASE_URL.to_string(),
            page_size: TICKETMASTER_PAGE_SIZE,
            page_pause: Duration::from_millis(300),
            months_ahead: 6,
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

    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn with_months_ahead(mut self, months: u32) -> Self {
        self.months_ahead = months;
        self
    }

    fn window(&self) -> (String, String) {
        let now = Utc::now();
        let end = now
            .checked_add_months(Months::new(self.months_ahead))
            .unwrap_or(now);
        let fmt = "%Y-%m-%dT%H:%M:%SZ";
        (now.format(fmt).to_string(), end.format(fmt).to_string())
    }

    /// Fetch one page of music events for a city
    pub async fn fetch_page(&self, city: &str, state_code: &str, page: u32) -> Result<TicketmasterPage> {
        let (start, end) = self.window();
        let request = HttpRequest::get(format!("{}/events.json", self.base_url))
            .query("apikey", &self.api_key)
            .query("city", city)
            .query("stateCode", state_code)
            .query("countryCode", "US")
            .query("classificationName", "music")
            .query("size", self.page_size)
            .query("page", page)
            .query("sort", "date,asc")
            .query("startDateTime", start)
            .query("endDateTime", end)
            .header("Accept", "application/json");

        let body = get_json(self.http.as_ref(), TICKETMASTER, request).await?;
        Ok(TicketmasterPage {
            events: first_array(&body, &["_embedded.events"])
                .cloned()
                .unwrap_or_default(),
            number: first_f64(&body, &["page.number"]).map_or(page, |n| n as u32),
            total_pages: first_f64(&body, &["page.totalPages"]).map_or(0, |n| n as u32),
            total_elements: first_f64(&body, &["page.totalElements"]).map_or(0, |n| n as u64),
        })
    }

    /// Another page exists, this one was full, and the next stays under the deep-paging ceiling
    pub fn has_more(&self, page: u32, events_on_page: usize, total_pages: u32) -> bool {
        events_on_page >= self.page_size as usize
            && page + 1 < total_pages
            && self.page_size * (page + 1) < TICKETMASTER_DEEP_PAGING_LIMIT
    }

    /// Every page for one city. Errors end the city early and are reported, not raised.
    pub async fn fetch_city(&self, city: &str, state_code: &str) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let mut page = 0;
        loop {
            match self.fetch_page(city, state_code, page).await {
                Ok(result) => {
                    outcome.pages += 1;
                    let count = result.events.len();
                    debug!(
                        "{}, {} page {}: {} event(s) of {}",
                        city, state_code, page, count, result.total_elements
                    );
                    outcome.records.extend(result.events);
                    if !self.has_more(page, count, result.total_pages) {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Ticketmaster fetch failed for {}, {} page {}: {}", city, state_code, page, e);
                    outcome.error = Some(e.to_string());
                    break;
                }
            }
            self.pacer.pause(self.page_pause).await;
            page += 1;
        }
        metrics::provider::records_fetched(TICKETMASTER, outcome.records.len());
        outcome
    }
}

#[async_trait]
impl EventProvider for TicketmasterApi {
    fn provider(&self) -> Provider {
        Provider::Ticketmaster
    }

    fn conflict_column(&self) -> &'static str {
        TICKETMASTER_EVENT_KEY
    }

    async fn fetch_events(&self, seed: &SeedQuery) -> FetchOutcome {
        match seed {
            SeedQuery::City { city, state_code } => self.fetch_city(city, state_code).await,
            other => FetchOutcome {
                error: Some(format!("Ticketmaster does not support seed {}", other)),
                ..FetchOutcome::default()
            },
        }
    }

    fn map_event(&self, raw: &RawRecord) -> CanonicalEvent {
        map_event(raw)
    }

    fn should_skip(&self, event: &CanonicalEvent) -> (bool, String) {
        if event.ticketmaster_event_id.as_deref().map_or(true, str::is_empty) {
            return (true, "missing ticketmaster_event_id".into());
        }
        if event.title.is_empty() {
            return (true, "missing title".into());
        }
        if event.event_date.is_none() {
            return (true, "missing event date".into());
        }
        if event.artist_name.is_empty() || event.venue_name.is_empty() {
            return (true, "missing artist or venue name".into());
        }
        (false, String::new())
    }
}

/// Segment, genre, subGenre, type and subType names in first-seen order
pub fn extract_genres(raw: &Value) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let classifications = raw
        .get("classifications")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for c in classifications {
        for key in ["segment", "genre", "subGenre", "type", "subType"] {
            let name_path = format!("{}.name", key);
            if let Some(name) = first_str(c, &[name_path.as_str()]) {
                if name != "Undefined" && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    names
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceInfo {
    pub range: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub currency: String,
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Price from the first price range; currency defaults to USD
pub fn extract_price(raw: &Value) -> PriceInfo {
    let first = path(raw, "priceRanges.0");
    let min = first.and_then(|p| first_f64(p, &["min"]));
    let max = first.and_then(|p| first_f64(p, &["max"]));
    let currency = first
        .and_then(|p| first_str(p, &["currency"]))
        .unwrap_or_else(|| "USD".to_string());
    let parts: Vec<String> = [min, max].iter().flatten().map(|v| format_amount(*v)).collect();
    PriceInfo {
        range: (!parts.is_empty()).then(|| parts.join(" - ")),
        min,
        max,
        currency,
    }
}

/// Map a Discovery API event to a canonical row
pub fn map_event(raw: &Value) -> CanonicalEvent {
    let mut event = CanonicalEvent::new(Provider::Ticketmaster);
    event.ticketmaster_event_id = first_str(raw, &["id"]);
    event.title = first_str(raw, &["name"]).unwrap_or_default();
    event.description = first_str(raw, &["info", "pleaseNote", "description"]);

    event.event_date = first_str(raw, &["dates.start.dateTime", "dates.start.localDate"])
        .as_deref()
        .and_then(parse_timestamp);
    let no_fixed_time = first_bool(raw, &["dates.start.dateTBD"]).unwrap_or(false)
        || first_bool(raw, &["dates.start.dateTBA"]).unwrap_or(false)
        || first_bool(raw, &["dates.start.noSpecificTime"]).unwrap_or(false);
    event.doors_time = if no_fixed_time {
        None
    } else {
        first_str(raw, &["dates.start.dateTime"])
            .as_deref()
            .and_then(parse_timestamp)
    };

    let attractions = first_array(raw, &["_embedded.attractions"]);
    event.artist_name = first_str(raw, &["_embedded.attractions.0.name", "name"])
        .unwrap_or_else(|| "Unknown Artist".into());
    event.attraction_ids = attractions
        .map(|a| a.iter().filter_map(|x| first_str(x, &["id"])).collect())
        .unwrap_or_default();

    if let Some(venue) = path(raw, "_embedded.venues.0") {
        event.venue_name = first_str(venue, &["name"]).unwrap_or_default();
        event.venue_address = first_str(venue, &["address.line1"]);
        event.venue_city = first_str(venue, &["city.name"]);
        event.venue_state = first_str(venue, &["state.stateCode"]);
        event.venue_zip = first_str(venue, &["postalCode"]);
        event.latitude = first_f64(venue, &["location.latitude"]);
        event.longitude = first_f64(venue, &["location.longitude"]);
        event.venue_timezone = first_str(venue, &["timezone"]);
    }

    event.genres = extract_genres(raw);
    let price = extract_price(raw);
    event.price_range = price.range;
    event.price_min = price.min;
    event.price_max = price.max;
    event.price_currency = Some(price.currency);

    let status = first_str(raw, &["dates.status.code"]);
    event.ticket_available = status.as_deref() == Some("onsale")
        || first_str(raw, &["sales.public.startDateTime"]).is_some();
    event.event_status = status;

    event.external_url = first_str(raw, &["url"]);
    event.ticket_urls = event.external_url.iter().cloned().collect();
    event.tour_name = first_str(raw, &["promoter.name"]);

    if let Some(images) = raw.get("images").and_then(Value::as_array) {
        event.media_urls = images.iter().filter_map(|i| first_str(i, &["url"])).collect();
        event.images = images.clone();
    }
    event.classifications = raw.get("classifications").cloned();
    event.sales_info = raw.get("sales").cloned();
    event.ticket_metadata = Some(json!({
        "seatmap": raw.get("seatmap"),
        "promoters": raw.get("promoters").or_else(|| raw.get("promoter")),
        "products": raw.get("products"),
        "outlets": raw.get("outlets"),
        "accessibility": raw.get("accessibility"),
    }));
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{json_response, RecordingPacer, ScriptedHttp};

    fn tm_event(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Khruangbin",
            "url": "https://ticketmaster.com/e/1",
            "info": "All ages",
            "dates": {
                "start": {"localDate": "2025-05-01", "dateTime": "2025-05-02T01:00:00Z"},
                "status": {"code": "onsale"}
            },
            "classifications": [{
                "segment": {"name": "Music"},
                "genre": {"name": "Rock"},
                "subGenre": {"name": "Psychedelic"},
                "type": {"name": "Undefined"}
            }, {
                "segment": {"name": "Music"},
                "genre": {"name": "Funk"}
            }],
            "priceRanges": [{"min": 35.0, "max": 79.5, "currency": "USD"}],
            "promoter": {"name": "Live Nation"},
            "images": [{"url": "https://img/1.jpg", "ratio": "16_9"}],
            "_embedded": {
                "attractions": [{"id": "K1", "name": "Khruangbin"}, {"id": "K2", "name": "Opener"}],
                "venues": [{
                    "name": "Moody Center",
                    "city": {"name": "Austin"},
                    "state": {"stateCode": "TX"},
                    "postalCode": "78712",
                    "address": {"line1": "2001 Robert Dedman Dr"},
                    "location": {"latitude": "30.28", "longitude": "-97.73"},
                    "timezone": "America/Chicago"
                }]
            }
        })
    }

    #[test]
    fn test_map_event_fields() {
        let event = map_event(&tm_event("G5v"));
        assert_eq!(event.ticketmaster_event_id.as_deref(), Some("G5v"));
        assert_eq!(event.artist_name, "Khruangbin");
        assert_eq!(event.attraction_ids, vec!["K1", "K2"]);
        assert_eq!(event.venue_name, "Moody Center");
        assert_eq!(event.venue_state.as_deref(), Some("TX"));
        assert_eq!(event.latitude, Some(30.28));
        assert_eq!(event.genres, vec!["Music", "Rock", "Psychedelic", "Funk"]);
        assert_eq!(event.price_range.as_deref(), Some("35 - 79.5"));
        assert_eq!(event.price_currency.as_deref(), Some("USD"));
        assert!(event.ticket_available);
        assert_eq!(event.tour_name.as_deref(), Some("Live Nation"));
        assert_eq!(event.media_urls, vec!["https://img/1.jpg"]);
        assert_eq!(
            event.event_date.unwrap().to_rfc3339(),
            "2025-05-02T01:00:00+00:00"
        );
        assert_eq!(event.doors_time, event.event_date);
        assert_eq!(event.description.as_deref(), Some("All ages"));
    }

    #[test]
    fn test_local_date_only_and_tbd_time() {
        let raw = json!({
            "id": "x",
            "name": "Show",
            "dates": {"start": {"localDate": "2025-07-04", "noSpecificTime": true}}
        });
        let event = map_event(&raw);
        assert_eq!(event.event_date.unwrap().to_rfc3339(), "2025-07-04T12:00:00+00:00");
        assert!(event.doors_time.is_none());
        assert_eq!(event.artist_name, "Show");
        assert!(event.price_range.is_none());
        assert_eq!(event.price_currency.as_deref(), Some("USD"));
        assert!(!event.ticket_available);
    }

    #[test]
    fn test_should_skip_requires_venue() {
        let api = TicketmasterApi::new(
            Arc::new(ScriptedHttp::new()),
            Arc::new(RecordingPacer::default()),
            "k".into(),
        );
        let mut raw = tm_event("a");
        raw["_embedded"]["venues"] = json!([]);
        let (skip, reason) = api.should_skip(&api.map_event(&raw));
        assert!(skip);
        assert!(reason.contains("venue"));
        assert!(!api.should_skip(&api.map_event(&tm_event("b"))).0);
    }

    #[test]
    fn test_has_more_respects_deep_paging_cap() {
        let api = TicketmasterApi::new(
            Arc::new(ScriptedHttp::new()),
            Arc::new(RecordingPacer::default()),
            "k".into(),
        );
        assert!(api.has_more(0, 200, 10));
        assert!(!api.has_more(0, 150, 10));
        assert!(!api.has_more(1, 200, 2));
        // page 4 would reach 200 * 5 = 1000
        assert!(!api.has_more(4, 200, 50));
        assert!(api.has_more(3, 200, 50));
    }

    #[tokio::test]
    async fn test_fetch_city_pages_until_short_page() {
        let full: Vec<Value> = (0..2).map(|i| tm_event(&format!("p0-{}", i))).collect();
        let short = vec![tm_event("p1-0")];
        let http = Arc::new(ScriptedHttp::new().route(
            "events.json",
            vec![
                json_response(200, json!({"_embedded": {"events": full}, "page": {"number": 0, "totalPages": 3, "totalElements": 5}})),
                json_response(200, json!({"_embedded": {"events": short}, "page": {"number": 1, "totalPages": 3, "totalElements": 5}})),
            ],
        ));
        let pacer = Arc::new(RecordingPacer::default());
        let api = TicketmasterApi::new(http.clone(), pacer.clone(), "key".into()).with_page_size(2);

        let outcome = api.fetch_city("Austin", "TX").await;
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.pages, 2);
        assert!(outcome.error.is_none());
        assert_eq!(http.count("events.json"), 2);
        assert_eq!(pacer.calls().len(), 1);

        let first = &http.requests()[0];
        assert_eq!(first.query_value("city"), Some("Austin"));
        assert_eq!(first.query_value("classificationName"), Some("music"));
        assert_eq!(first.query_value("apikey"), Some("key"));
        assert_eq!(http.requests()[1].query_value("page"), Some("1"));
    }

    #[tokio::test]
    async fn test_fetch_city_absorbs_errors() {
        let http = Arc::new(
            ScriptedHttp::new().route("events.json", vec![json_response(429, json!({"fault": "rate"}))]),
        );
        let api = TicketmasterApi::new(http, Arc::new(RecordingPacer::default()), "k".into());
        let outcome = api.fetch_city("Dallas", "TX").await;
        assert!(outcome.records.is_empty());
        assert!(outcome.error.unwrap().contains("429"));
    }
}
