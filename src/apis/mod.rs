pub mod jambase;
pub mod setlistfm;
pub mod spotify;
pub mod ticketmaster;

use crate::app::ports::{HttpClientPort, HttpRequest, HttpResponse};
use crate::error::{IngestError, Result};
use crate::extract::{
    first_bool, first_f64, first_str, genres, parse_timestamp, path, placeholder_id, string_list,
};
use crate::observability::metrics;
use crate::types::{CanonicalEvent, Provider};
use serde_json::Value;
use std::time::Instant;

/// Send one provider request, record its metrics and reject non-2xx statuses
pub async fn send_checked(
    http: &dyn HttpClientPort,
    provider: &'static str,
    request: HttpRequest,
) -> Result<HttpResponse> {
    let started = Instant::now();
    match http.send(request).await {
        Ok(resp) if resp.is_success() => {
            metrics::provider::request_success(provider, started.elapsed().as_secs_f64());
            Ok(resp)
        }
        Ok(resp) => {
            metrics::provider::request_error(provider, resp.status);
            resp.error_for_status(provider)
        }
        Err(e) => {
            metrics::provider::request_error(provider, 0);
            Err(e)
        }
    }
}

/// GET and decode a JSON body
pub async fn get_json(
    http: &dyn HttpClientPort,
    provider: &'static str,
    request: HttpRequest,
) -> Result<Value> {
    let resp = send_checked(http, provider, request).await?;
    resp.json::<Value>().map_err(|e| match e {
        IngestError::Json(inner) => IngestError::Provider {
            provider: provider.to_string(),
            message: format!("invalid JSON body: {}", inner),
        },
        other => other,
    })
}

/// Which of the known raw event shapes a record has
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    JamBase,
    Ticketmaster,
    Generic,
}

pub fn detect_shape(raw: &Value) -> RecordShape {
    if path(raw, "_embedded").is_some() || path(raw, "dates.start").is_some() {
        RecordShape::Ticketmaster
    } else if path(raw, "performer").is_some()
        || path(raw, "location").is_some()
        || path(raw, "startDate").is_some()
        || path(raw, "identifier").is_some()
    {
        RecordShape::JamBase
    } else {
        RecordShape::Generic
    }
}

/// Map any supported raw event shape to a canonical row
pub fn map_event_any(raw: &Value) -> CanonicalEvent {
    match detect_shape(raw) {
        RecordShape::Ticketmaster => ticketmaster::map_event(raw),
        RecordShape::JamBase => jambase::map_event(raw),
        RecordShape::Generic => map_generic_event(raw),
    }
}

/// Rows that already use canonical column names
pub fn map_generic_event(raw: &Value) -> CanonicalEvent {
    let source = match first_str(raw, &["source"]).as_deref() {
        Some("ticketmaster") => Provider::Ticketmaster,
        _ => Provider::Jambase,
    };
    let mut event = CanonicalEvent::new(source);
    let id = first_str(raw, &["jambase_event_id", "ticketmaster_event_id", "id"])
        .unwrap_or_else(|| placeholder_id("event"));
    match source {
        Provider::Ticketmaster => event.ticketmaster_event_id = Some(id),
        _ => event.jambase_event_id = Some(id),
    }
    event.title = first_str(raw, &["title", "name"]).unwrap_or_else(|| "Untitled Event".into());
    event.artist_name = first_str(raw, &["artist_name"]).unwrap_or_else(|| "Unknown Artist".into());
    event.artist_id = first_str(raw, &["artist_id"]);
    event.venue_name = first_str(raw, &["venue_name"]).unwrap_or_else(|| "Unknown Venue".into());
    event.venue_id = first_str(raw, &["venue_id"]);
    event.event_date = first_str(raw, &["event_date", "start_time"])
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| Some(chrono::Utc::now()));
    event.doors_time = first_str(raw, &["doors_time"]).as_deref().and_then(parse_timestamp);
    event.description = first_str(raw, &["description"]);
    event.genres = genres(raw, &["genres", "genre"]);
    event.venue_address = first_str(raw, &["venue_address"]);
    event.venue_city = first_str(raw, &["venue_city"]);
    event.venue_state = first_str(raw, &["venue_state"]);
    event.venue_zip = first_str(raw, &["venue_zip"]);
    event.latitude = first_f64(raw, &["latitude"]);
    event.longitude = first_f64(raw, &["longitude"]);
    event.ticket_available = first_bool(raw, &["ticket_available"]).unwrap_or(false);
    event.price_range = first_str(raw, &["price_range"]);
    event.ticket_urls = path(raw, "ticket_urls")
        .map(string_list)
        .unwrap_or_default();
    event.external_url = first_str(raw, &["external_url", "url"]);
    event.tour_name = first_str(raw, &["tour_name"]);
    event
}
