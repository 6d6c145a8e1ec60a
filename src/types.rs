use crate::constants;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Raw provider record as returned by an API
pub type RawRecord = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Jambase,
    Ticketmaster,
    Spotify,
    Setlistfm,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Jambase => constants::JAMBASE,
            Provider::Ticketmaster => constants::TICKETMASTER,
            Provider::Spotify => constants::SPOTIFY,
            Provider::Setlistfm => constants::SETLIST_FM,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a seed list driven by an orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedQuery {
    City { city: String, state_code: String },
    Artist(String),
    Genre(String),
}

impl fmt::Display for SeedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedQuery::City { city, state_code } => write!(f, "{}, {}", city, state_code),
            SeedQuery::Artist(name) => write!(f, "artist '{}'", name),
            SeedQuery::Genre(genre) => write!(f, "genre '{}'", genre),
        }
    }
}

/// Provider-agnostic event row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub jambase_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ticketmaster_event_id: Option<String>,
    pub title: String,
    pub artist_name: String,
    pub artist_id: Option<String>,
    pub artist_uuid: Option<String>,
    pub venue_name: String,
    pub venue_id: Option<String>,
    pub venue_uuid: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub doors_time: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub venue_address: Option<String>,
    pub venue_city: Option<String>,
    pub venue_state: Option<String>,
    pub venue_zip: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub ticket_available: bool,
    pub price_range: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price_currency: Option<String>,
    pub ticket_urls: Vec<String>,
    pub external_url: Option<String>,
    pub setlist: Option<Value>,
    pub tour_name: Option<String>,
    pub source: Provider,
    pub event_status: Option<String>,
    pub attraction_ids: Vec<String>,
    pub venue_timezone: Option<String>,
    /// Provider image objects; at least `url`
    pub images: Vec<Value>,
    pub media_urls: Vec<String>,
    pub classifications: Option<Value>,
    pub sales_info: Option<Value>,
    pub ticket_metadata: Option<Value>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl CanonicalEvent {
    /// Empty row for a provider; mappers fill it field by field
    pub fn new(source: Provider) -> Self {
        Self {
            jambase_event_id: None,
            ticketmaster_event_id: None,
            title: String::new(),
            artist_name: String::new(),
            artist_id: None,
            artist_uuid: None,
            venue_name: String::new(),
            venue_id: None,
            venue_uuid: None,
            event_date: None,
            doors_time: None,
            description: None,
            genres: Vec::new(),
            venue_address: None,
            venue_city: None,
            venue_state: None,
            venue_zip: None,
            latitude: None,
            longitude: None,
            ticket_available: false,
            price_range: None,
            price_min: None,
            price_max: None,
            price_currency: None,
            ticket_urls: Vec::new(),
            external_url: None,
            setlist: None,
            tour_name: None,
            source,
            event_status: None,
            attraction_ids: Vec::new(),
            venue_timezone: None,
            images: Vec::new(),
            media_urls: Vec::new(),
            classifications: None,
            sales_info: None,
            ticket_metadata: None,
            last_modified_at: None,
        }
    }

    /// Provider event id, whichever provider produced the row
    pub fn provider_event_id(&self) -> Option<&str> {
        self.jambase_event_id
            .as_deref()
            .or(self.ticketmaster_event_id.as_deref())
    }

    pub fn to_row(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalArtist {
    pub name: String,
    pub jambase_artist_id: String,
    pub identifier: String,
    pub artist_data_source: String,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub genres: Vec<String>,
    pub artist_type: Option<String>,
    pub band_or_musician: Option<String>,
    pub founding_location: Option<String>,
    pub founding_date: Option<String>,
    pub external_identifiers: Value,
    pub same_as: Value,
    pub date_published: Option<String>,
    pub date_modified: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

impl CanonicalArtist {
    pub fn to_row(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalVenue {
    pub name: String,
    pub jambase_venue_id: Option<String>,
    pub identifier: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub address: Value,
    pub geo: Value,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub maximum_attendee_capacity: Option<i64>,
    pub same_as: Value,
    pub last_synced_at: DateTime<Utc>,
}

impl CanonicalVenue {
    pub fn to_row(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Mapping from a provider id to a canonical row uuid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEntityId {
    pub entity_type: String,
    pub entity_uuid: String,
    pub source: String,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SetlistArtist {
    pub name: String,
    pub mbid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SetlistVenue {
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverArtist {
    pub artist: String,
    pub mbid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetlistSong {
    pub name: String,
    pub position: u32,
    pub set_number: u32,
    pub set_name: String,
    pub cover: Option<CoverArtist>,
    pub info: Option<String>,
    pub tape: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setlist {
    pub setlist_fm_id: String,
    pub version_id: Option<String>,
    pub event_date: Option<String>,
    pub artist: SetlistArtist,
    pub venue: SetlistVenue,
    pub tour: Option<String>,
    pub info: Option<String>,
    pub url: Option<String>,
    pub songs: Vec<SetlistSong>,
    pub song_count: usize,
    pub last_updated: Option<String>,
}

/// Seed-level fetch result. Errors are recorded, never raised.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub records: Vec<RawRecord>,
    pub pages: u32,
    pub error: Option<String>,
}

/// Core trait that event providers driven by the seed orchestrator implement
#[async_trait]
pub trait EventProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Column the upsert resolves conflicts on
    fn conflict_column(&self) -> &'static str;

    /// Fetch every page for one seed
    async fn fetch_events(&self, seed: &SeedQuery) -> FetchOutcome;

    fn map_event(&self, raw: &RawRecord) -> CanonicalEvent;

    /// Rows missing minimal viable data are dropped before upsert
    fn should_skip(&self, event: &CanonicalEvent) -> (bool, String) {
        if event.provider_event_id().map_or(true, str::is_empty) {
            return (true, "missing provider event id".to_string());
        }
        if event.title.trim().is_empty() {
            return (true, "missing title".to_string());
        }
        if event.event_date.is_none() {
            return (true, "missing event date".to_string());
        }
        (false, String::new())
    }
}
