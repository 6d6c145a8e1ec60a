//! Field extractors over provider JSON.
//!
//! Every extractor takes a list of candidate paths and returns the first one
//! that holds usable data. Nulls and empty strings count as absent. Nothing
//! here fails; missing data degrades to `None` or an empty list.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde_json::Value;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static TIME_OF_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}(:\d{2})?$").unwrap());

/// Walk a dotted path such as `_embedded.venues.0.city.name`.
/// Numeric segments index into arrays.
pub fn path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// First present value among the candidate paths
pub fn first_value<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|p| path(value, p))
        .find(|v| is_present(v))
}

/// First non-empty string; numbers are stringified
pub fn first_str(value: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().filter_map(|p| path(value, p)).find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First numeric value; numeric strings are parsed
pub fn first_f64(value: &Value, paths: &[&str]) -> Option<f64> {
    paths.iter().filter_map(|p| path(value, p)).find_map(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

pub fn first_bool(value: &Value, paths: &[&str]) -> Option<bool> {
    paths.iter().filter_map(|p| path(value, p)).find_map(|v| match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// First path holding a non-empty array
pub fn first_array<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Vec<Value>> {
    paths
        .iter()
        .filter_map(|p| path(value, p))
        .find_map(|v| v.as_array().filter(|a| !a.is_empty()))
}

/// Strings out of an array of strings, or a single string as a one-item list
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Genres from the first path that yields any
pub fn genres(value: &Value, paths: &[&str]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| path(value, p))
        .map(string_list)
        .find(|list| !list.is_empty())
        .unwrap_or_default()
}

/// `jambase:123` -> `123`. URLs and bare ids pass through untouched.
pub fn strip_provider_prefix(id: &str) -> String {
    match id.split_once(':') {
        Some((prefix, rest))
            if !prefix.is_empty()
                && !rest.starts_with("//")
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            rest.to_string()
        }
        _ => id.to_string(),
    }
}

/// Synthetic id `<prefix>-<unix millis>-<9 base36 chars>` for records without one
pub fn placeholder_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), suffix)
}

/// RFC 3339, naive date-time (taken as UTC) or a bare date (noon UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Doors time for providers that may send only a time of day.
/// A bare `19:00[:00]` takes its date from `start_date`.
pub fn combine_date_and_time(start_date: Option<&str>, time: &str) -> Option<DateTime<Utc>> {
    let time = time.trim();
    if !TIME_OF_DAY.is_match(time) {
        return parse_timestamp(time);
    }
    let date_part = start_date?.trim().get(..10)?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let tod = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(tod)))
}

/// Lowercase, trimmed, single-spaced name for comparisons
pub fn normalize_name(name: &str) -> String {
    WHITESPACE
        .replace_all(name.trim(), " ")
        .to_lowercase()
}

pub fn slugify(name: &str) -> String {
    NON_SLUG
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Search terms covering straight and curly apostrophes, plus a stripped form
pub fn apostrophe_variants(term: &str) -> Vec<String> {
    let term = term.trim();
    let mut variants = vec![term.to_string()];
    for candidate in [
        term.replace('\'', "\u{2019}"),
        term.replace('\u{2019}', "'"),
        term.replace(['\'', '\u{2019}'], ""),
    ] {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_path_walks_objects_and_arrays() {
        let v = json!({"_embedded": {"venues": [{"city": {"name": "Austin"}}]}});
        assert_eq!(
            path(&v, "_embedded.venues.0.city.name").and_then(Value::as_str),
            Some("Austin")
        );
        assert!(path(&v, "_embedded.venues.1.city").is_none());
        assert!(path(&v, "_embedded.venues.x").is_none());
    }

    #[test]
    fn test_first_str_skips_empty_and_null() {
        let v = json!({"a": "", "b": null, "c": "  x ", "d": 42});
        assert_eq!(first_str(&v, &["a", "b", "c"]), Some("x".to_string()));
        assert_eq!(first_str(&v, &["a", "d"]), Some("42".to_string()));
        assert_eq!(first_str(&v, &["missing"]), None);
    }

    #[test]
    fn test_first_f64_parses_strings() {
        let v = json!({"lat": "30.26", "lng": -97.74});
        assert_eq!(first_f64(&v, &["lat"]), Some(30.26));
        assert_eq!(first_f64(&v, &["nope", "lng"]), Some(-97.74));
    }

    #[test]
    fn test_genres_accepts_string_or_array() {
        assert_eq!(genres(&json!({"genre": "jazz"}), &["genre", "genres"]), vec!["jazz"]);
        assert_eq!(
            genres(&json!({"genre": [], "genres": ["rock", "indie"]}), &["genre", "genres"]),
            vec!["rock", "indie"]
        );
        assert!(genres(&json!({}), &["genre"]).is_empty());
    }

    #[test]
    fn test_strip_provider_prefix() {
        assert_eq!(strip_provider_prefix("jambase:123"), "123");
        assert_eq!(strip_provider_prefix("123"), "123");
        assert_eq!(
            strip_provider_prefix("https://www.jambase.com/show/1"),
            "https://www.jambase.com/show/1"
        );
    }

    #[test]
    fn test_placeholder_ids_do_not_collide() {
        let ids: HashSet<String> = (0..1000).map(|_| placeholder_id("event")).collect();
        assert_eq!(ids.len(), 1000);
        let sample = placeholder_id("artist");
        let parts: Vec<&str> = sample.split('-').collect();
        assert_eq!(parts[0], "artist");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("2025-03-01T20:00:00-06:00").unwrap().to_rfc3339(),
            "2025-03-02T02:00:00+00:00"
        );
        assert_eq!(
            parse_timestamp("2025-03-01T20:00:00").unwrap().to_rfc3339(),
            "2025-03-01T20:00:00+00:00"
        );
        assert_eq!(
            parse_timestamp("2025-03-01").unwrap().to_rfc3339(),
            "2025-03-01T12:00:00+00:00"
        );
        assert!(parse_timestamp("soon").is_none());
    }

    #[test]
    fn test_combine_date_and_time() {
        let doors = combine_date_and_time(Some("2025-03-01T20:00:00"), "19:00").unwrap();
        assert_eq!(doors.to_rfc3339(), "2025-03-01T19:00:00+00:00");
        let full = combine_date_and_time(None, "2025-03-01T18:30:00Z").unwrap();
        assert_eq!(full.to_rfc3339(), "2025-03-01T18:30:00+00:00");
        assert!(combine_date_and_time(None, "19:00").is_none());
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(normalize_name("  The   Black Keys "), "the black keys");
        assert_eq!(slugify("Guns N' Roses"), "guns-n-roses");
        let variants = apostrophe_variants("Guns N' Roses");
        assert_eq!(
            variants,
            vec!["Guns N' Roses", "Guns N\u{2019} Roses", "Guns N Roses"]
        );
        assert_eq!(apostrophe_variants("Phish"), vec!["Phish"]);
    }
}
