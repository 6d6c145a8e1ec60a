use crate::constants;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Row filter understood by every storage backend.
/// `ilike` terms are case-insensitive substring matches.
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    /// OR group: any (column, term) pair matching keeps the row
    pub any_ilike: Vec<(String, String)>,
    pub ilike: Vec<(String, String)>,
    pub eq: Vec<(String, String)>,
    pub gte: Vec<(String, String)>,
    pub lte: Vec<(String, String)>,
    pub in_values: Option<(String, Vec<String>)>,
    /// Column and ascending flag
    pub order_by: Option<(String, bool)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn any_ilike(mut self, column: &str, term: &str) -> Self {
        self.any_ilike.push((column.to_string(), term.to_string()));
        self
    }

    pub fn ilike(mut self, column: &str, term: &str) -> Self {
        self.ilike.push((column.to_string(), term.to_string()));
        self
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.eq.push((column.to_string(), value.to_string()));
        self
    }

    pub fn gte(mut self, column: &str, value: &str) -> Self {
        self.gte.push((column.to_string(), value.to_string()));
        self
    }

    pub fn lte(mut self, column: &str, value: &str) -> Self {
        self.lte.push((column.to_string(), value.to_string()));
        self
    }

    pub fn in_values(mut self, column: &str, values: Vec<String>) -> Self {
        self.in_values = Some((column.to_string(), values));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order_by = Some((column.to_string(), ascending));
        self
    }

    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Row store behind the pipeline. Rows are JSON objects keyed by column name.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or merge rows on the comma-separated conflict columns; returns stored rows
    async fn upsert(&self, table: &str, rows: &[Value], on_conflict: &str) -> Result<Vec<Value>>;

    /// Plain insert; a unique violation is `IngestError::Conflict`
    async fn insert(&self, table: &str, row: &Value) -> Result<Value>;

    /// Patch rows where `column = value`; returns the number updated
    async fn update(&self, table: &str, column: &str, value: &str, patch: &Value) -> Result<u64>;

    /// Matching rows for the requested range plus the total match count
    async fn search(&self, table: &str, query: &RowQuery) -> Result<(Vec<Value>, u64)>;

    /// Call a stored procedure
    async fn rpc(&self, function: &str, args: &Value) -> Result<Value>;
}

/// String form of a column value used for comparisons
pub fn column_text(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn key_of(row: &Value, columns: &[&str]) -> Option<Vec<String>> {
    columns.iter().map(|c| column_text(row, c)).collect()
}

fn merge_into(target: &mut Value, patch: &Value) {
    if let (Value::Object(dst), Value::Object(src)) = (target, patch) {
        for (k, v) in src {
            if k != "id" {
                dst.insert(k.clone(), v.clone());
            }
        }
    }
}

fn contains_ci(haystack: Option<String>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

fn matches(row: &Value, query: &RowQuery) -> bool {
    if !query.any_ilike.is_empty()
        && !query
            .any_ilike
            .iter()
            .any(|(c, t)| contains_ci(column_text(row, c), t))
    {
        return false;
    }
    if !query.ilike.iter().all(|(c, t)| contains_ci(column_text(row, c), t)) {
        return false;
    }
    if !query
        .eq
        .iter()
        .all(|(c, v)| column_text(row, c).as_deref() == Some(v.as_str()))
    {
        return false;
    }
    if !query
        .gte
        .iter()
        .all(|(c, v)| column_text(row, c).map_or(false, |x| x.as_str() >= v.as_str()))
    {
        return false;
    }
    if !query
        .lte
        .iter()
        .all(|(c, v)| column_text(row, c).map_or(false, |x| x.as_str() <= v.as_str()))
    {
        return false;
    }
    if let Some((column, values)) = &query.in_values {
        return column_text(row, column).map_or(false, |x| values.contains(&x));
    }
    true
}

/// In-memory storage for dry runs and tests
pub struct InMemoryStorage {
    tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    unique_keys: Arc<Mutex<HashMap<String, Vec<String>>>>,
    rpc_calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        let storage = Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            unique_keys: Arc::new(Mutex::new(HashMap::new())),
            rpc_calls: Arc::new(Mutex::new(Vec::new())),
        };
        for (table, key) in [
            (constants::EVENTS_TABLE, constants::TICKETMASTER_EVENT_KEY),
            (constants::EVENTS_TABLE, constants::JAMBASE_EVENT_KEY),
            (constants::CACHE_EVENTS_TABLE, constants::JAMBASE_EVENT_KEY),
            (constants::CACHE_EVENTS_TABLE, constants::TICKETMASTER_EVENT_KEY),
            (constants::ARTISTS_TABLE, constants::JAMBASE_ARTIST_KEY),
            (constants::VENUES_TABLE, constants::JAMBASE_VENUE_KEY),
            (constants::EXTERNAL_IDS_TABLE, constants::EXTERNAL_IDS_KEY),
            (constants::SETLISTS_TABLE, constants::SETLIST_KEY),
        ] {
            storage.add_unique_key(table, key);
        }
        storage
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a comma-separated unique key enforced by `insert`
    pub fn add_unique_key(&self, table: &str, columns: &str) {
        Self::lock(&self.unique_keys)
            .entry(table.to_string())
            .or_default()
            .push(columns.to_string());
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        Self::lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn count(&self, table: &str) -> usize {
        Self::lock(&self.tables).get(table).map_or(0, Vec::len)
    }

    pub fn rpc_calls(&self) -> Vec<(String, Value)> {
        Self::lock(&self.rpc_calls).clone()
    }

    fn with_id(row: &Value) -> Value {
        let mut row = row.clone();
        if let Value::Object(map) = &mut row {
            if !map.contains_key("id") {
                map.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
            }
        }
        row
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn upsert(&self, table: &str, rows: &[Value], on_conflict: &str) -> Result<Vec<Value>> {
        let columns: Vec<&str> = on_conflict.split(',').map(str::trim).collect();
        let mut tables = Self::lock(&self.tables);
        let existing = tables.entry(table.to_string()).or_default();
        let mut stored = Vec::with_capacity(rows.len());

        for row in rows {
            if !row.is_object() {
                return Err(IngestError::Storage {
                    table: table.to_string(),
                    message: "row is not a JSON object".into(),
                });
            }
            let key = key_of(row, &columns).ok_or_else(|| IngestError::Storage {
                table: table.to_string(),
                message: format!("row is missing conflict column(s) {}", on_conflict),
            })?;
            match existing
                .iter_mut()
                .find(|r| key_of(r, &columns).as_ref() == Some(&key))
            {
                Some(current) => {
                    merge_into(current, row);
                    stored.push(current.clone());
                }
                None => {
                    let new_row = Self::with_id(row);
                    existing.push(new_row.clone());
                    stored.push(new_row);
                }
            }
        }
        debug!("Upserted {} row(s) into {}", stored.len(), table);
        Ok(stored)
    }

    async fn insert(&self, table: &str, row: &Value) -> Result<Value> {
        let keys = Self::lock(&self.unique_keys)
            .get(table)
            .cloned()
            .unwrap_or_default();
        let mut tables = Self::lock(&self.tables);
        let existing = tables.entry(table.to_string()).or_default();

        for unique in &keys {
            let columns: Vec<&str> = unique.split(',').map(str::trim).collect();
            if let Some(key) = key_of(row, &columns) {
                if existing.iter().any(|r| key_of(r, &columns).as_ref() == Some(&key)) {
                    return Err(IngestError::Conflict {
                        table: table.to_string(),
                        message: format!("duplicate key ({}) = ({})", unique, key.join(", ")),
                    });
                }
            }
        }
        let new_row = Self::with_id(row);
        existing.push(new_row.clone());
        Ok(new_row)
    }

    async fn update(&self, table: &str, column: &str, value: &str, patch: &Value) -> Result<u64> {
        let mut tables = Self::lock(&self.tables);
        let mut updated = 0;
        if let Some(rows) = tables.get_mut(table) {
            for row in rows
                .iter_mut()
                .filter(|r| column_text(r, column).as_deref() == Some(value))
            {
                merge_into(row, patch);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn search(&self, table: &str, query: &RowQuery) -> Result<(Vec<Value>, u64)> {
        let tables = Self::lock(&self.tables);
        let mut hits: Vec<Value> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches(r, query)).cloned().collect())
            .unwrap_or_default();
        let total = hits.len() as u64;

        if let Some((column, ascending)) = &query.order_by {
            hits.sort_by(|a, b| {
                let ord = column_text(a, column)
                    .partial_cmp(&column_text(b, column))
                    .unwrap_or(Ordering::Equal);
                if *ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        let page = hits
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    async fn rpc(&self, function: &str, args: &Value) -> Result<Value> {
        Self::lock(&self.rpc_calls).push((function.to_string(), args.clone()));
        Ok(Value::Object(Map::new()))
    }
}
