//! Core data types for balloon flight reconstruction.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Milliseconds in one hour.
pub const HOUR_MS: i64 = 3_600_000;

/// One telemetry record exactly as it arrived from upstream.
///
/// The upstream feed mixes positional tuples and keyed objects, sometimes in
/// the same document. Records are never mutated; the normalizer reads them
/// and the resolved point keeps a copy for downstream inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// `[lat, lon, alt?]`
    Array(Vec<Value>),
    /// Keyed mapping with aliased field names.
    Object(Map<String, Value>),
    /// Scalars and nulls. Never yields a point.
    Other(Value),
}

impl RawRecord {
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }
}

impl From<Value> for RawRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Array(items),
            Value::Object(map) => Self::Object(map),
            other => Self::Other(other),
        }
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Array(items) => items.serialize(serializer),
            Self::Object(map) => map.serialize(serializer),
            Self::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for RawRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

/// Weather conditions observed at one trajectory point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Air temperature at 2 m, °C
    pub temperature_c: Option<f64>,
    /// Relative humidity at 2 m, %
    pub relative_humidity: Option<f64>,
    /// Wind speed at 10 m, km/h
    pub wind_speed_kmh: Option<f64>,
    /// Wind direction at 10 m, degrees
    pub wind_direction_deg: Option<f64>,
    /// Surface pressure, hPa
    pub surface_pressure_hpa: Option<f64>,
    /// WMO weather code
    pub weather_code: Option<i32>,
}

/// A validated position sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedPoint {
    pub lat: f64,
    pub lon: f64,
    /// Altitude, 0 when the record carries none.
    pub alt: f64,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    #[serde(skip)]
    pub explicit_id: Option<String>,
    pub raw: RawRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<Observation>,
}

impl NormalizedPoint {
    pub fn position(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }
}

/// Identifier invented for a flight first seen without an explicit id.
///
/// Coordinates are kept in thousandths of a degree so the rendered id is
/// stable for a given first point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntheticId {
    pub seq: usize,
    pub lat_milli: i64,
    pub lon_milli: i64,
}

impl SyntheticId {
    pub fn new(seq: usize, lat: f64, lon: f64) -> Self {
        Self {
            seq,
            lat_milli: (lat * 1000.0).round() as i64,
            lon_milli: (lon * 1000.0).round() as i64,
        }
    }
}

impl fmt::Display for SyntheticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "anon-{}-{}_{}", self.seq, self.lat_milli, self.lon_milli)
    }
}

/// A reconstructed flight: every sample believed to belong to one balloon.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    pub id: String,
    pub points: Vec<NormalizedPoint>,
    /// Index of the chronologically last point once finalized.
    pub latest_index: usize,
}

impl Flight {
    pub fn new(id: String, first: NormalizedPoint) -> Self {
        Self {
            id,
            points: vec![first],
            latest_index: 0,
        }
    }

    pub fn push(&mut self, point: NormalizedPoint) {
        self.points.push(point);
        self.latest_index = self.points.len() - 1;
    }

    /// Most recently appended point, the one spatial matching compares against.
    pub fn last_appended(&self) -> Option<&NormalizedPoint> {
        self.points.last()
    }

    pub fn latest(&self) -> Option<&NormalizedPoint> {
        self.points.get(self.latest_index)
    }

    pub fn summary(&self) -> Option<BalloonSummary> {
        self.latest().map(|p| BalloonSummary {
            id: self.id.clone(),
            lat: p.lat,
            lon: p.lon,
            alt: p.alt,
        })
    }
}

/// Flights of one run, keyed by id and kept in creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightSet {
    flights: Vec<Flight>,
    index: HashMap<String, usize>,
}

impl FlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Flight> {
        self.index.get(id).map(|&i| &self.flights[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Flight> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.flights[i]),
            None => None,
        }
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn at_mut(&mut self, i: usize) -> &mut Flight {
        &mut self.flights[i]
    }

    /// Add a new flight. Returns its position in creation order.
    pub(crate) fn insert(&mut self, flight: Flight) -> usize {
        let i = self.flights.len();
        self.index.insert(flight.id.clone(), i);
        self.flights.push(flight);
        i
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.flights.iter().map(|f| f.id.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Flight> {
        self.flights.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Flight> {
        self.flights.iter_mut()
    }
}

impl<'a> IntoIterator for &'a FlightSet {
    type Item = &'a Flight;
    type IntoIter = std::slice::Iter<'a, Flight>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for FlightSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.flights.len()))?;
        for flight in &self.flights {
            map.serialize_entry(&flight.id, flight)?;
        }
        map.end()
    }
}

/// Overview entry: a flight reduced to its latest position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalloonSummary {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(lat: f64, lon: f64, timestamp: i64) -> NormalizedPoint {
        NormalizedPoint {
            lat,
            lon,
            alt: 0.0,
            timestamp,
            explicit_id: None,
            raw: RawRecord::from(json!([lat, lon])),
            weather: None,
        }
    }

    #[test]
    fn test_synthetic_id() {
        let id = SyntheticId::new(3, 12.34567, -45.6789);
        assert_eq!(id.lat_milli, 12346);
        assert_eq!(id.lon_milli, -45679);
        assert_eq!(format!("{}", id), "anon-3-12346_-45679");
    }

    #[test]
    fn test_raw_record_shapes() {
        assert!(RawRecord::from(json!([1.0, 2.0])).is_array());
        assert!(matches!(
            RawRecord::from(json!({"lat": 1.0})),
            RawRecord::Object(_)
        ));
        assert!(matches!(RawRecord::from(json!(null)), RawRecord::Other(_)));

        let raw: RawRecord = serde_json::from_value(json!({"id": "B1", "lat": 3})).unwrap();
        assert_eq!(serde_json::to_value(&raw).unwrap(), json!({"id": "B1", "lat": 3}));
    }

    #[test]
    fn test_flight_set_keeps_creation_order() {
        let mut set = FlightSet::new();
        set.insert(Flight::new("zulu".to_string(), point(1.0, 1.0, 1)));
        set.insert(Flight::new("alpha".to_string(), point(2.0, 2.0, 2)));

        assert_eq!(set.ids().collect::<Vec<_>>(), vec!["zulu", "alpha"]);
        assert!(set.contains("alpha"));
        assert_eq!(set.get("zulu").unwrap().points.len(), 1);

        let out = serde_json::to_string(&set).unwrap();
        assert!(out.find("zulu").unwrap() < out.find("alpha").unwrap());
    }

    #[test]
    fn test_flight_serialization() {
        let mut flight = Flight::new("B7".to_string(), point(10.0, 20.0, 5));
        flight.push(point(10.5, 20.5, 6));

        let value = serde_json::to_value(&flight).unwrap();
        assert_eq!(value["id"], "B7");
        assert_eq!(value["latestIndex"], 1);
        assert_eq!(value["points"][0]["raw"], json!([10.0, 20.0]));
        assert!(value["points"][0].get("weather").is_none());
        assert!(value["points"][0].get("explicit_id").is_none());
        assert_eq!(
            flight.summary(),
            Some(BalloonSummary {
                id: "B7".to_string(),
                lat: 10.5,
                lon: 20.5,
                alt: 0.0,
            })
        );
    }
}
