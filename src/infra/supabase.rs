use crate::config::SupabaseCredentials;
use crate::error::{IngestError, Result};
use crate::storage::{RowQuery, Storage};
use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const UNIQUE_VIOLATION: &str = "23505";

/// Storage backed by the Supabase PostgREST API, authenticated with the service role key
pub struct SupabaseStorage {
    client: reqwest::Client,
    rest_url: String,
    key: String,
}

impl SupabaseStorage {
    pub fn new(credentials: &SupabaseCredentials, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", credentials.url.trim_end_matches('/')),
            key: credentials.service_key.clone(),
        })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
            .header(CONTENT_TYPE, "application/json")
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    async fn finish(table: &str, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&body)?);
        }
        let message: String = body.chars().take(300).collect();
        if status == StatusCode::CONFLICT || body.contains(UNIQUE_VIOLATION) {
            return Err(IngestError::Conflict {
                table: table.to_string(),
                message,
            });
        }
        Err(IngestError::Storage {
            table: table.to_string(),
            message: format!("HTTP {}: {}", status.as_u16(), message),
        })
    }
}

/// Quote a value for PostgREST `or=(...)` and `in.(...)` lists
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn like_pattern(term: &str) -> String {
    format!("*{}*", term)
}

/// Translate a row query into PostgREST query parameters
pub fn build_search_params(query: &RowQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    if !query.any_ilike.is_empty() {
        let terms: Vec<String> = query
            .any_ilike
            .iter()
            .map(|(c, t)| format!("{}.ilike.{}", c, quote(&like_pattern(t))))
            .collect();
        params.push(("or".into(), format!("({})", terms.join(","))));
    }
    for (c, t) in &query.ilike {
        params.push((c.clone(), format!("ilike.{}", like_pattern(t))));
    }
    for (c, v) in &query.eq {
        params.push((c.clone(), format!("eq.{}", v)));
    }
    for (c, v) in &query.gte {
        params.push((c.clone(), format!("gte.{}", v)));
    }
    for (c, v) in &query.lte {
        params.push((c.clone(), format!("lte.{}", v)));
    }
    if let Some((c, values)) = &query.in_values {
        let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
        params.push((c.clone(), format!("in.({})", quoted.join(","))));
    }
    if let Some((c, ascending)) = &query.order_by {
        let dir = if *ascending { "asc" } else { "desc" };
        params.push(("order".into(), format!("{}.{}", c, dir)));
    }
    if query.offset > 0 {
        params.push(("offset".into(), query.offset.to_string()));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    params
}

/// Total from a `Content-Range: 0-9/123` header; `*` means unknown
pub fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl Storage for SupabaseStorage {
    async fn upsert(&self, table: &str, rows: &[Value], on_conflict: &str) -> Result<Vec<Value>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Upserting {} row(s) into {} on {}", rows.len(), table, on_conflict);
        let resp = self
            .authed(self.client.post(self.table_url(table)))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(rows)
            .send()
            .await?;
        match Self::finish(table, resp).await? {
            Value::Array(stored) => Ok(stored),
            _ => Ok(Vec::new()),
        }
    }

    async fn insert(&self, table: &str, row: &Value) -> Result<Value> {
        let resp = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        match Self::finish(table, resp).await? {
            Value::Array(mut stored) if !stored.is_empty() => Ok(stored.remove(0)),
            other => Ok(other),
        }
    }

    async fn update(&self, table: &str, column: &str, value: &str, patch: &Value) -> Result<u64> {
        let resp = self
            .authed(self.client.patch(self.table_url(table)))
            .query(&[(column, format!("eq.{}", value))])
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await?;
        match Self::finish(table, resp).await? {
            Value::Array(updated) => Ok(updated.len() as u64),
            _ => Ok(0),
        }
    }

    async fn search(&self, table: &str, query: &RowQuery) -> Result<(Vec<Value>, u64)> {
        let resp = self
            .authed(self.client.get(self.table_url(table)))
            .query(&build_search_params(query))
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let total_header = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let rows = match Self::finish(table, resp).await? {
            Value::Array(rows) => rows,
            _ => Vec::new(),
        };
        let total = total_header.unwrap_or_else(|| {
            warn!("No usable Content-Range from {}; using page length", table);
            (query.offset + rows.len()) as u64
        });
        Ok((rows, total))
    }

    async fn rpc(&self, function: &str, args: &Value) -> Result<Value> {
        let resp = self
            .authed(self.client.post(format!("{}/rpc/{}", self.rest_url, function)))
            .json(args)
            .send()
            .await?;
        Self::finish(function, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_params_translate_filters() {
        let query = RowQuery::new()
            .any_ilike("artist_name", "Guns N' Roses")
            .any_ilike("artist_name", "Guns N Roses")
            .ilike("venue_name", "Stubb")
            .gte("event_date", "2025-01-01")
            .in_values("external_id", vec!["a".into(), "b".into()])
            .order_by("event_date", true)
            .range(20, 10);
        let params = build_search_params(&query);
        let get = |k: &str| params.iter().find(|(p, _)| p == k).map(|(_, v)| v.as_str());

        assert_eq!(get("select"), Some("*"));
        assert_eq!(
            get("or"),
            Some("(artist_name.ilike.\"*Guns N' Roses*\",artist_name.ilike.\"*Guns N Roses*\")")
        );
        assert_eq!(get("venue_name"), Some("ilike.*Stubb*"));
        assert_eq!(get("event_date"), Some("gte.2025-01-01"));
        assert_eq!(get("external_id"), Some("in.(\"a\",\"b\")"));
        assert_eq!(get("order"), Some("event_date.asc"));
        assert_eq!(get("offset"), Some("20"));
        assert_eq!(get("limit"), Some("10"));
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("0-9/123"), Some(123));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-9/*"), None);
    }
}
