use crate::apis::jambase::{self, map_artist_summary, JamBaseApi};
use crate::constants::JAMBASE_EVENT_KEY;
use crate::error::{IngestError, Result};
use crate::extract::apostrophe_variants;
use crate::observability::metrics;
use crate::storage::{column_text, RowQuery, Storage};
use axum::{
    extract::Query,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use hyper::Server;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PER_PAGE: usize = 20;
const MAX_PER_PAGE: usize = 100;
const CACHE_CONTROL: &str = "s-maxage=300, stale-while-revalidate=600";

/// Shared state behind the cache API handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    /// Live fallback when the cache has nothing; `None` disables it
    pub jambase: Option<Arc<JamBaseApi>>,
    pub events_table: String,
    pub response_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsParams {
    pub artist_name: Option<String>,
    pub venue_name: Option<String>,
    pub event_date_from: Option<String>,
    pub event_date_to: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistsParams {
    pub artist_name: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn paging(page: Option<usize>, per_page: Option<usize>) -> (usize, usize, usize) {
    let page = page.unwrap_or(DEFAULT_PAGE).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page, (page - 1) * per_page)
}

/// Standard list envelope shared by both endpoints
#[allow(clippy::too_many_arguments)]
fn list_body(
    key: &str,
    items: Vec<Value>,
    total: u64,
    page: usize,
    per_page: usize,
    has_next: bool,
    source: &str,
) -> Value {
    json!({
        "success": true,
        key: items,
        "total": total,
        "page": page,
        "perPage": per_page,
        "hasNextPage": has_next,
        "hasPreviousPage": source == "database" && page > 1,
        "source": source,
    })
}

fn with_cache_headers(status: StatusCode, body: Value) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    response
}

fn error_body(key: &str, e: &IngestError) -> Value {
    json!({
        "success": false,
        "error": e.to_string(),
        key: [],
        "total": 0,
        "page": DEFAULT_PAGE,
        "perPage": DEFAULT_PER_PAGE,
        "hasNextPage": false,
        "hasPreviousPage": false,
    })
}

/// Run a handler body under the response deadline. Errors become a 500 envelope,
/// an expired deadline a 504.
async fn respond<F>(state: &AppState, key: &'static str, work: F) -> Response
where
    F: Future<Output = Result<Value>>,
{
    match tokio::time::timeout(state.response_timeout, work).await {
        Ok(Ok(body)) => with_cache_headers(StatusCode::OK, body),
        Ok(Err(e)) => {
            error!("Cache API {} request failed: {}", key, e);
            with_cache_headers(StatusCode::INTERNAL_SERVER_ERROR, error_body(key, &e))
        }
        Err(_) => {
            warn!("Cache API {} request timed out", key);
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({"error": "Request timeout"})),
            )
                .into_response()
        }
    }
}

fn artist_filter(query: RowQuery, artist: Option<&str>) -> RowQuery {
    match artist {
        Some(name) => apostrophe_variants(name)
            .iter()
            .fold(query, |q, term| q.any_ilike("artist_name", term)),
        None => query,
    }
}

/// Cached events first, then a live JamBase lookup that is stored before returning
pub async fn search_events(state: &AppState, params: &EventsParams) -> Result<Value> {
    let (page, per_page, offset) = paging(params.page, params.per_page);
    let artist = non_empty(&params.artist_name);

    let mut query = artist_filter(RowQuery::new(), artist);
    if let Some(venue) = non_empty(&params.venue_name) {
        query = query.ilike("venue_name", venue);
    }
    if let Some(from) = non_empty(&params.event_date_from) {
        query = query.gte("event_date", from);
    }
    if let Some(to) = non_empty(&params.event_date_to) {
        query = query.lte("event_date", to);
    }
    let query = query.order_by("event_date", true).range(offset, per_page);

    let (rows, total) = state.storage.search(&state.events_table, &query).await?;
    if !rows.is_empty() {
        metrics::api::request("events", "database");
        let has_next = ((offset + per_page) as u64) < total;
        return Ok(list_body("events", rows, total, page, per_page, has_next, "database"));
    }

    if let (Some(api), Some(artist)) = (&state.jambase, artist) {
        match api.search_events(artist, page as u32, per_page as u32).await {
            Ok(result) if !result.records.is_empty() => {
                let rows: Vec<Value> = result
                    .records
                    .iter()
                    .map(|raw| jambase::map_event(raw).to_row())
                    .collect();
                let stored = match state
                    .storage
                    .upsert(&state.events_table, &rows, JAMBASE_EVENT_KEY)
                    .await
                {
                    Ok(stored) => stored,
                    Err(e) => {
                        warn!("Could not cache {} live event(s): {}", rows.len(), e);
                        rows
                    }
                };
                info!("Served {} live JamBase event(s) for '{}'", stored.len(), artist);
                metrics::api::request("events", "api");
                let total = stored.len() as u64;
                return Ok(list_body("events", stored, total, page, per_page, false, "api"));
            }
            Ok(_) => {}
            Err(e) => warn!("Live JamBase event lookup failed: {}", e),
        }
    }

    metrics::api::request("events", "none");
    Ok(list_body("events", Vec::new(), 0, page, per_page, false, "none"))
}

fn db_artist_id(name: &str) -> String {
    let slug: Vec<&str> = name.split_whitespace().collect();
    format!("db-{}", slug.join("-").to_lowercase())
}

/// Distinct artists from cached events, then a live JamBase artist search
pub async fn search_artists(state: &AppState, params: &ArtistsParams) -> Result<Value> {
    let (page, per_page, offset) = paging(params.page, params.per_page);
    let artist = non_empty(&params.artist_name);

    let query = artist_filter(RowQuery::new(), artist).range(offset, per_page);
    let (rows, total) = state.storage.search(&state.events_table, &query).await?;

    let mut seen = HashSet::new();
    let artists: Vec<Value> = rows
        .iter()
        .filter_map(|row| {
            let name = column_text(row, "artist_name")?;
            if !seen.insert(name.to_lowercase()) {
                return None;
            }
            let artist_id = column_text(row, "artist_id");
            Some(json!({
                "id": artist_id.clone().unwrap_or_else(|| db_artist_id(&name)),
                "jambase_artist_id": artist_id,
                "name": name,
                "description": "Artist found in our database",
                "genres": row.get("genres").cloned().unwrap_or_else(|| json!([])),
                "image_url": null,
                "popularity_score": 1,
                "source": "database",
            }))
        })
        .collect();

    if !artists.is_empty() {
        metrics::api::request("artists", "database");
        let has_next = ((offset + per_page) as u64) < total;
        let count = artists.len() as u64;
        return Ok(list_body("artists", artists, count, page, per_page, has_next, "database"));
    }

    if let (Some(api), Some(artist)) = (&state.jambase, artist) {
        match api.search_artists(artist, page as u32, per_page as u32).await {
            Ok(result) if !result.records.is_empty() => {
                let artists: Vec<Value> = result
                    .records
                    .iter()
                    .map(map_artist_summary)
                    .filter_map(|a| serde_json::to_value(a).ok())
                    .collect();
                metrics::api::request("artists", "api");
                let count = artists.len() as u64;
                return Ok(list_body("artists", artists, count, page, per_page, false, "api"));
            }
            Ok(_) => {}
            Err(e) => warn!("Live JamBase artist lookup failed: {}", e),
        }
    }

    metrics::api::request("artists", "none");
    Ok(list_body("artists", Vec::new(), 0, page, per_page, false, "none"))
}

async fn events_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<EventsParams>,
) -> Response {
    respond(&state, "events", search_events(&state, &params)).await
}

async fn artists_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<ArtistsParams>,
) -> Response {
    respond(&state, "artists", search_artists(&state, &params)).await
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "concert-ingest-cache-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::observability::render(),
    )
}

pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/jambase/events", get(events_handler))
        .route("/api/jambase/artists", get(artists_handler))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the cache API on the given port
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Cache API listening on http://localhost:{}", port);
    println!("🚀 Cache API running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");

    let io_error = |e: hyper::Error| IngestError::Io(std::io::Error::new(std::io::ErrorKind::Other, e));
    Server::try_bind(&addr)
        .map_err(io_error)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(io_error)?;
    Ok(())
}
