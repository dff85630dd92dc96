//! Alias-tolerant field access over `serde_json::Value`

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Depth-first search for the first object containing any of `keys`;
/// returns the value under the matching key
pub(crate) fn find<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            for key in keys {
                if let Some(found) = map.get(*key)
                    && !found.is_null()
                {
                    return Some(found);
                }
            }
            map.values().find_map(|v| find(v, keys))
        }
        Value::Array(items) => items.iter().find_map(|v| find(v, keys)),
        _ => None,
    }
}

/// Value of the first alias present directly on `obj`
pub(crate) fn field<'a>(obj: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| obj.get(*key))
        .find(|v| !v.is_null())
}

pub(crate) fn u64_of(obj: &Value, aliases: &[&str]) -> Option<u64> {
    field(obj, aliases).and_then(as_u64)
}

pub(crate) fn f64_of(obj: &Value, aliases: &[&str]) -> Option<f64> {
    field(obj, aliases).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn string_of(obj: &Value, aliases: &[&str]) -> Option<String> {
    field(obj, aliases).and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn bool_of(obj: &Value, aliases: &[&str]) -> bool {
    field(obj, aliases).is_some_and(|v| match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(s.as_str(), "true" | "1"),
        _ => false,
    })
}

/// Unix seconds (number or string), unix milliseconds or RFC 3339
pub(crate) fn datetime_of(obj: &Value, aliases: &[&str]) -> Option<DateTime<Utc>> {
    let value = field(obj, aliases)?;
    if let Some(secs) = as_u64(value) {
        // millisecond timestamps are 13 digits
        let secs = if secs > 100_000_000_000 { secs / 1_000 } else { secs };
        return Utc.timestamp_opt(i64::try_from(secs).ok()?, 0).single();
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn u64_array_of(obj: &Value, aliases: &[&str]) -> Vec<u64> {
    field(obj, aliases)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(as_u64).collect())
        .unwrap_or_default()
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.is_finite()).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
