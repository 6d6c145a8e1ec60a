//! Find-or-create for canonical artists and venues.
//!
//! Lookup order is provider id, then a case-insensitive substring match on
//! name. Name matching is fuzzy: an exact case-insensitive hit wins, otherwise
//! the first hit is taken.

use crate::constants::{
    ARTISTS_TABLE, EXTERNAL_IDS_KEY, EXTERNAL_IDS_TABLE, JAMBASE_ARTIST_KEY, JAMBASE_VENUE_KEY,
    VENUES_TABLE,
};
use crate::error::{IngestError, Result};
use crate::extract::normalize_name;
use crate::storage::{column_text, RowQuery, Storage};
use crate::types::{CanonicalArtist, CanonicalVenue, ExternalEntityId};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const NAME_CANDIDATES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Artist,
    Venue,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Artist => ARTISTS_TABLE,
            EntityKind::Venue => VENUES_TABLE,
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            EntityKind::Artist => JAMBASE_ARTIST_KEY,
            EntityKind::Venue => JAMBASE_VENUE_KEY,
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Venue => "venue",
        }
    }
}

/// How a row was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    ProviderId(String),
    Name(String),
    Created(String),
}

impl Resolution {
    pub fn uuid(&self) -> &str {
        match self {
            Resolution::ProviderId(id) | Resolution::Name(id) | Resolution::Created(id) => id,
        }
    }
}

pub struct EntityResolver {
    storage: Arc<dyn Storage>,
}

impl EntityResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn resolve_artist(&self, artist: &CanonicalArtist, source: &str) -> Result<Resolution> {
        let provider_id = Some(artist.jambase_artist_id.as_str()).filter(|id| !id.is_empty());
        self.resolve(EntityKind::Artist, provider_id, &artist.name, artist.to_row(), source)
            .await
    }

    pub async fn resolve_venue(&self, venue: &CanonicalVenue, source: &str) -> Result<Resolution> {
        self.resolve(
            EntityKind::Venue,
            venue.jambase_venue_id.as_deref(),
            &venue.name,
            venue.to_row(),
            source,
        )
        .await
    }

    /// Find by provider id, then by name, else insert `row`. The provider id
    /// mapping is recorded for every resolution that has one.
    pub async fn resolve(
        &self,
        kind: EntityKind,
        provider_id: Option<&str>,
        name: &str,
        row: Value,
        source: &str,
    ) -> Result<Resolution> {
        if let Some(id) = provider_id {
            if let Some(uuid) = self.find_by_provider_id(kind, id, source).await? {
                return Ok(Resolution::ProviderId(uuid));
            }
        }

        let resolution = match self.find_by_name(kind, name).await? {
            Some(uuid) => Resolution::Name(uuid),
            None => Resolution::Created(self.create(kind, provider_id, row).await?),
        };

        if let Some(id) = provider_id {
            if let Err(e) = self.link(kind, resolution.uuid(), source, id).await {
                warn!("Could not record {} id {} for {}: {}", source, id, name, e);
            }
        }
        Ok(resolution)
    }

    async fn find_by_provider_id(&self, kind: EntityKind, id: &str, source: &str) -> Result<Option<String>> {
        let (rows, _) = self
            .storage
            .search(kind.table(), &RowQuery::new().eq(kind.id_column(), id).range(0, 1))
            .await?;
        if let Some(uuid) = rows.first().and_then(|r| column_text(r, "id")) {
            return Ok(Some(uuid));
        }

        let (links, _) = self
            .storage
            .search(
                EXTERNAL_IDS_TABLE,
                &RowQuery::new()
                    .eq("source", source)
                    .eq("entity_type", kind.entity_type())
                    .eq("external_id", id)
                    .range(0, 1),
            )
            .await?;
        Ok(links.first().and_then(|r| column_text(r, "entity_uuid")))
    }

    async fn find_by_name(&self, kind: EntityKind, name: &str) -> Result<Option<String>> {
        let wanted = normalize_name(name);
        if wanted.is_empty() {
            return Ok(None);
        }
        let (rows, _) = self
            .storage
            .search(
                kind.table(),
                &RowQuery::new().ilike("name", name.trim()).range(0, NAME_CANDIDATES),
            )
            .await?;
        let exact = rows.iter().find(|r| {
            column_text(r, "name").map_or(false, |n| normalize_name(&n) == wanted)
        });
        Ok(exact.or_else(|| rows.first()).and_then(|r| column_text(r, "id")))
    }

    async fn create(&self, kind: EntityKind, provider_id: Option<&str>, row: Value) -> Result<String> {
        match self.storage.insert(kind.table(), &row).await {
            Ok(stored) => column_text(&stored, "id").ok_or_else(|| IngestError::Storage {
                table: kind.table().to_string(),
                message: "insert returned no id".into(),
            }),
            Err(IngestError::Conflict { table, message }) => {
                debug!("Insert into {} raced an existing row: {}", table, message);
                let id = provider_id.ok_or(IngestError::Conflict {
                    table: table.clone(),
                    message: message.clone(),
                })?;
                let (rows, _) = self
                    .storage
                    .search(kind.table(), &RowQuery::new().eq(kind.id_column(), id).range(0, 1))
                    .await?;
                rows.first()
                    .and_then(|r| column_text(r, "id"))
                    .ok_or(IngestError::Conflict { table, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Record a provider id for a canonical row; idempotent on the mapping key
    pub async fn link(&self, kind: EntityKind, uuid: &str, source: &str, external_id: &str) -> Result<()> {
        let mapping = ExternalEntityId {
            entity_type: kind.entity_type().to_string(),
            entity_uuid: uuid.to_string(),
            source: source.to_string(),
            external_id: external_id.to_string(),
        };
        let row = serde_json::to_value(&mapping)?;
        self.storage
            .upsert(EXTERNAL_IDS_TABLE, &[row], EXTERNAL_IDS_KEY)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn venue(name: &str, id: Option<&str>) -> Value {
        json!({"name": name, "jambase_venue_id": id})
    }

    #[tokio::test]
    async fn test_name_match_prefers_exact_case_insensitive_hit() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert(VENUES_TABLE, &venue("The Fillmore Annex", None)).await.unwrap();
        let fillmore = storage.insert(VENUES_TABLE, &venue("The Fillmore", None)).await.unwrap();

        let resolver = EntityResolver::new(storage.clone());
        let resolution = resolver
            .resolve(EntityKind::Venue, None, "the fillmore", venue("the fillmore", None), "jambase")
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Name(column_text(&fillmore, "id").unwrap()));
        assert_eq!(storage.count(VENUES_TABLE), 2);
    }

    #[tokio::test]
    async fn test_creates_then_finds_by_provider_id() {
        let storage = Arc::new(InMemoryStorage::new());
        let resolver = EntityResolver::new(storage.clone());

        let first = resolver
            .resolve(EntityKind::Venue, Some("v1"), "Red Rocks", venue("Red Rocks", Some("v1")), "jambase")
            .await
            .unwrap();
        assert!(matches!(first, Resolution::Created(_)));

        let second = resolver
            .resolve(EntityKind::Venue, Some("v1"), "Red Rocks Amphitheatre", venue("x", Some("v1")), "jambase")
            .await
            .unwrap();
        assert_eq!(second, Resolution::ProviderId(first.uuid().to_string()));
        assert_eq!(storage.count(VENUES_TABLE), 1);
        assert_eq!(storage.count(EXTERNAL_IDS_TABLE), 1);
    }

    #[tokio::test]
    async fn test_external_mapping_resolves_renamed_rows() {
        let storage = Arc::new(InMemoryStorage::new());
        let row = storage.insert(ARTISTS_TABLE, &json!({"name": "Goose"})).await.unwrap();
        let uuid = column_text(&row, "id").unwrap();

        let resolver = EntityResolver::new(storage.clone());
        resolver.link(EntityKind::Artist, &uuid, "spotify", "abc").await.unwrap();

        let resolution = resolver
            .resolve(EntityKind::Artist, Some("abc"), "Goose (band)", json!({}), "spotify")
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::ProviderId(uuid));
    }
}
