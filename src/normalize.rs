//! Record normalizer: raw telemetry records to canonical points.
//!
//! Upstream records come in two shapes:
//!
//! ```text
//! [lat, lon, alt?]                          positional tuple, never carries an id
//! {"lat": .., "lon": .., "alt": .., ...}    keyed object, several aliases per field
//! ```
//!
//! Aliases are probed in a fixed order and the first present value wins.
//! Case variants are separate probe entries, there is no case-insensitive lookup.

use crate::types::{NormalizedPoint, RawRecord, HOUR_MS};
use chrono::DateTime;
use serde_json::{Map, Value};

const LAT_KEYS: &[&str] = &["lat", "latitude", "lat_dd", "Lat", "LAT"];
const LON_KEYS: &[&str] = &["lon", "lng", "longitude", "lon_dd", "Lon", "LON"];
const ALT_KEYS: &[&str] = &["alt", "altitude", "alt_m", "elevation", "Alt", "ALT"];
const TIME_KEYS: &[&str] = &["t", "timestamp", "time"];
const ID_KEYS: &[&str] = &["id", "uid", "name", "label"];

/// Normalize one raw record observed in snapshot `hour`.
///
/// Returns `None` when latitude or longitude is missing or not finite; that is
/// the only validity gate. A missing timestamp is replaced by
/// `now_ms - hour * HOUR_MS`.
pub fn normalize(record: &RawRecord, hour: usize, now_ms: i64) -> Option<NormalizedPoint> {
    let (lat, lon, alt, timestamp, explicit_id) = match record {
        RawRecord::Array(items) => {
            let lat = items.first().and_then(coerce)?;
            let lon = items.get(1).and_then(coerce)?;
            let alt = items.get(2).and_then(coerce);
            (lat, lon, alt, None, None)
        }
        RawRecord::Object(map) => {
            let lat = probe(map, LAT_KEYS).and_then(coerce)?;
            let lon = probe(map, LON_KEYS).and_then(coerce)?;
            let alt = probe(map, ALT_KEYS).and_then(coerce);
            let timestamp = probe(map, TIME_KEYS).and_then(timestamp_of);
            (lat, lon, alt, timestamp, explicit_id(map))
        }
        RawRecord::Other(_) => return None,
    };

    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }

    Some(NormalizedPoint {
        lat,
        lon,
        alt: alt.filter(|a| a.is_finite()).unwrap_or(0.0),
        timestamp: timestamp.unwrap_or_else(|| synthesized_timestamp(hour, now_ms)),
        explicit_id,
        raw: record.clone(),
        weather: None,
    })
}

/// Timestamp assigned to records of `hour` that carry none.
pub fn synthesized_timestamp(hour: usize, now_ms: i64) -> i64 {
    now_ms - hour as i64 * HOUR_MS
}

/// Identifier used by the single-snapshot view.
///
/// The explicit id when the record has one, otherwise built from the position
/// and the record's index in its snapshot. The hourly resolver never uses it.
pub fn display_id(point: &NormalizedPoint, position: usize) -> String {
    if let Some(id) = &point.explicit_id {
        return id.clone();
    }
    if point.raw.is_array() {
        format!("arr-{}_{}_{}", point.lat, point.lon, position)
    } else {
        format!("{}_{}_{}", point.lat, point.lon, position)
    }
}

fn probe<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| !value.is_null())
}

fn coerce(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn timestamp_of(value: &Value) -> Option<i64> {
    let millis = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(t) => Some(t),
                Err(_) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis() as f64),
            }
        }
        _ => None,
    }?;

    if millis.is_finite() && millis != 0.0 {
        Some(millis as i64)
    } else {
        None
    }
}

/// First alias holding a usable id. Empty strings and non-scalar values are
/// skipped like missing keys.
fn explicit_id(map: &Map<String, Value>) -> Option<String> {
    ID_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
