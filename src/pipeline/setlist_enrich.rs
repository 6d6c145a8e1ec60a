use crate::apis::setlistfm::{SetlistQuery, SetlistResolver, SetlistSource};
use crate::constants::{JAMBASE_EVENT_KEY, SETLISTS_TABLE, SETLIST_KEY, TICKETMASTER_EVENT_KEY};
use crate::error::Result;
use crate::storage::Storage;
use crate::types::Setlist;
use chrono::Utc;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

/// Where a setlist was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredIn {
    Event { column: &'static str, id: String },
    SetlistsTable,
}

impl fmt::Display for StoredIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredIn::Event { column, id } => write!(f, "event {}={}", column, id),
            StoredIn::SetlistsTable => f.write_str(SETLISTS_TABLE),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub setlist: Setlist,
    pub source: SetlistSource,
    pub stored_in: StoredIn,
}

/// Row for the standalone setlists table
pub fn setlist_row(setlist: &Setlist, query: &SetlistQuery) -> Result<Value> {
    let artist_name = if setlist.artist.name.is_empty() {
        &query.artist_name
    } else {
        &setlist.artist.name
    };
    Ok(json!({
        "setlist_fm_id": setlist.setlist_fm_id,
        "artist_name": artist_name,
        "event_date": setlist.event_date,
        "venue_name": setlist.venue.name,
        "city": setlist.venue.city,
        "tour_name": setlist.tour,
        "song_count": setlist.song_count,
        "setlist": serde_json::to_value(setlist)?,
        "last_updated": Utc::now().to_rfc3339(),
    }))
}

/// Resolves one setlist and stores it on its event, or in the setlists table
pub struct SetlistEnricher {
    resolver: SetlistResolver,
    storage: Arc<dyn Storage>,
    events_table: String,
}

impl SetlistEnricher {
    pub fn new(resolver: SetlistResolver, storage: Arc<dyn Storage>, events_table: &str) -> Self {
        Self {
            resolver,
            storage,
            events_table: events_table.to_string(),
        }
    }

    #[instrument(skip(self, query), fields(artist = %query.artist_name))]
    pub async fn enrich(&self, query: &SetlistQuery, event_id: Option<&str>) -> Result<Option<EnrichmentOutcome>> {
        let Some((setlist, source)) = self.resolver.resolve(query).await else {
            info!("No setlist found");
            return Ok(None);
        };
        let stored_in = self.store(&setlist, query, event_id).await?;
        info!(
            "Stored {}-song setlist {} from {} in {}",
            setlist.song_count, setlist.setlist_fm_id, source, stored_in
        );
        Ok(Some(EnrichmentOutcome {
            setlist,
            source,
            stored_in,
        }))
    }

    async fn store(&self, setlist: &Setlist, query: &SetlistQuery, event_id: Option<&str>) -> Result<StoredIn> {
        if let Some(id) = event_id {
            let patch = json!({"setlist": serde_json::to_value(setlist)?});
            for column in [JAMBASE_EVENT_KEY, TICKETMASTER_EVENT_KEY] {
                if self.storage.update(&self.events_table, column, id, &patch).await? > 0 {
                    return Ok(StoredIn::Event {
                        column,
                        id: id.to_string(),
                    });
                }
            }
            info!("Event {} not found; keeping setlist in {}", id, SETLISTS_TABLE);
        }
        let row = setlist_row(setlist, query)?;
        self.storage.upsert(SETLISTS_TABLE, &[row], SETLIST_KEY).await?;
        Ok(StoredIn::SetlistsTable)
    }
}
