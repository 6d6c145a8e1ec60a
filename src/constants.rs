/// Provider names, endpoints, tables and seed lists shared across the pipeline

// Provider identifiers (also used as metric labels and CLI names)
pub const JAMBASE: &str = "jambase";
pub const TICKETMASTER: &str = "ticketmaster";
pub const SPOTIFY: &str = "spotify";
pub const SETLIST_FM: &str = "setlistfm";

// Provider endpoints
pub const JAMBASE_BASE_URL: &str = "https://www.jambase.com/jb-api/v1";
pub const TICKETMASTER_BASE_URL: &str = "https://app.ticketmaster.com/discovery/v2";
pub const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const SETLIST_FM_BASE_URL: &str = "https://api.setlist.fm/rest/1.0";

pub const USER_AGENT: &str = "ConcertIngest/0.1 (+https://github.com/concert-ingest)";

// Destination tables
pub const EVENTS_TABLE: &str = "events";
pub const CACHE_EVENTS_TABLE: &str = "jambase_events";
pub const ARTISTS_TABLE: &str = "artists";
pub const VENUES_TABLE: &str = "venues";
pub const EXTERNAL_IDS_TABLE: &str = "external_entity_ids";
pub const SETLISTS_TABLE: &str = "setlists";

// Conflict keys
pub const JAMBASE_EVENT_KEY: &str = "jambase_event_id";
pub const TICKETMASTER_EVENT_KEY: &str = "ticketmaster_event_id";
pub const JAMBASE_ARTIST_KEY: &str = "jambase_artist_id";
pub const JAMBASE_VENUE_KEY: &str = "jambase_venue_id";
pub const EXTERNAL_IDS_KEY: &str = "entity_uuid,source,entity_type";
pub const SETLIST_KEY: &str = "setlist_fm_id";

// Paging ceilings against deep-paging costs
pub const TICKETMASTER_PAGE_SIZE: u32 = 200;
pub const TICKETMASTER_DEEP_PAGING_LIMIT: u32 = 1000;
pub const JAMBASE_SYNC_PAGE_SIZE: u32 = 100;
pub const JAMBASE_SEARCH_PAGE_SIZE: u32 = 50;
pub const JAMBASE_MAX_SEARCH_PAGES: u32 = 5;

// Spotify limits
pub const SPOTIFY_ARTISTS_BATCH: usize = 50;
pub const SPOTIFY_SEARCH_LIMIT: u32 = 20;
pub const SPOTIFY_PLAYLIST_TRACKS_LIMIT: u32 = 100;
pub const SPOTIFY_RETRY_AFTER_DEFAULT_SECS: u64 = 60;
pub const SPOTIFY_MAX_RATE_LIMIT_RETRIES: u32 = 3;
pub const SPOTIFY_MAX_AUTH_RETRIES: u32 = 2;
pub const SPOTIFY_MIN_DISCOVERY: usize = 2000;
pub const DEFAULT_ARTIST_LIMIT: usize = 500;
pub const EXISTING_ID_LOOKUP_CHUNK: usize = 100;

pub const DEFAULT_GENRES: [&str; 5] = ["rock", "indie", "pop", "hip-hop", "electronic"];

// Setlist search proxies, tried in order before cached rows
pub const DEFAULT_SETLIST_PROXIES: [&str; 2] = [
    "http://localhost:3001/api/setlists/search",
    "http://localhost:3000/api/setlists/search",
];

/// Top 30 US cities (city, state code) used as Ticketmaster seed queries
pub const TOP_CITIES: [(&str, &str); 30] = [
    ("New York", "NY"),
    ("Los Angeles", "CA"),
    ("Chicago", "IL"),
    ("Houston", "TX"),
    ("Phoenix", "AZ"),
    ("Philadelphia", "PA"),
    ("San Antonio", "TX"),
    ("San Diego", "CA"),
    ("Dallas", "TX"),
    ("San Jose", "CA"),
    ("Austin", "TX"),
    ("Jacksonville", "FL"),
    ("San Francisco", "CA"),
    ("Columbus", "OH"),
    ("Fort Worth", "TX"),
    ("Indianapolis", "IN"),
    ("Charlotte", "NC"),
    ("Seattle", "WA"),
    ("Denver", "CO"),
    ("Washington", "DC"),
    ("Boston", "MA"),
    ("Nashville", "TN"),
    ("El Paso", "TX"),
    ("Detroit", "MI"),
    ("Portland", "OR"),
    ("Memphis", "TN"),
    ("Oklahoma City", "OK"),
    ("Las Vegas", "NV"),
    ("Louisville", "KY"),
    ("Baltimore", "MD"),
];

/// Get all supported provider names
pub fn get_supported_providers() -> Vec<&'static str> {
    vec![JAMBASE, TICKETMASTER, SPOTIFY, SETLIST_FM]
}
