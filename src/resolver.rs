//! Flight identity resolution across hourly snapshots.
//!
//! Records are consumed strictly in hour order, then in list order within an
//! hour. Each record is resolved against the state left by every record
//! before it, including earlier records of the same hour:
//!
//! 1. A record with an explicit id joins the flight of that id, created on
//!    first sight. Distance is never consulted.
//! 2. An anonymous record joins the flight whose most recently appended point
//!    is nearest (great-circle), provided it is within the match threshold.
//!    Ties go to the flight created first.
//! 3. Otherwise it starts a new flight under a synthesized id.
//!
//! This is a greedy heuristic. Two balloons passing within the threshold of
//! each other can swap or merge, and a balloon jumping further than the
//! threshold in one hour fragments into two flights.

use crate::normalize::normalize;
use crate::types::{Flight, FlightSet, NormalizedPoint, RawRecord, SyntheticId};

/// Mean Earth radius used for haversine distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Maximum distance between an anonymous point and a flight's last point.
pub const MATCH_THRESHOLD_KM: f64 = 200.0;

/// Great-circle distance in kilometres between two `(lat, lon)` positions.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let lat1 = a.0.to_radians();
    let lat2 = b.0.to_radians();
    let delta_lat = (b.0 - a.0).to_radians();
    let delta_lon = (b.1 - a.1).to_radians();

    // rounding can push h just past 1 for near-antipodal points
    let h = ((delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2))
    .clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Configuration for the resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub match_threshold_km: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            match_threshold_km: MATCH_THRESHOLD_KM,
        }
    }
}

/// Single-pass resolver. Owns the flight collection for one run.
#[derive(Debug)]
pub struct FlightResolver {
    config: ResolverConfig,
    flights: FlightSet,
    synthesized: usize,
    accepted: usize,
    rejected: usize,
}

impl FlightResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            flights: FlightSet::new(),
            synthesized: 0,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Normalize and resolve every record of one hour, in list order.
    pub fn ingest_hour(&mut self, hour: usize, records: &[RawRecord], now_ms: i64) {
        for record in records {
            match normalize(record, hour, now_ms) {
                Some(point) => self.ingest(point),
                None => {
                    self.rejected += 1;
                    tracing::trace!("Rejected record in hour {:02}: {:?}", hour, record);
                }
            }
        }
    }

    /// Resolve one normalized point and append it to its flight.
    pub fn ingest(&mut self, point: NormalizedPoint) {
        self.accepted += 1;

        if let Some(id) = point.explicit_id.clone() {
            match self.flights.position(&id) {
                Some(i) => self.flights.at_mut(i).push(point),
                None => {
                    self.flights.insert(Flight::new(id, point));
                }
            }
            return;
        }

        match self.nearest(&point) {
            Some((i, distance)) if distance <= self.config.match_threshold_km => {
                self.flights.at_mut(i).push(point);
            }
            _ => {
                let id = self.next_synthetic_id(&point);
                self.flights.insert(Flight::new(id, point));
            }
        }
    }

    /// Next free synthesized id. Sequence numbers whose id an upstream
    /// record already claimed are skipped.
    fn next_synthetic_id(&mut self, point: &NormalizedPoint) -> String {
        loop {
            let id = SyntheticId::new(self.synthesized, point.lat, point.lon).to_string();
            self.synthesized += 1;
            if !self.flights.contains(&id) {
                return id;
            }
        }
    }

    /// Nearest flight by distance to its most recently appended point.
    fn nearest(&self, point: &NormalizedPoint) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;

        for (i, flight) in self.flights.iter().enumerate() {
            let Some(last) = flight.last_appended() else {
                continue;
            };
            let distance = haversine_km(point.position(), last.position());
            if !distance.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        best
    }

    pub fn flights(&self) -> &FlightSet {
        &self.flights
    }

    /// Points placed into flights so far.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Records dropped for bad coordinates so far.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Hand over the accumulated flights, points still in append order.
    pub fn into_flights(self) -> FlightSet {
        self.flights
    }
}

/// Resolve a full window of hourly record lists, index 0 first.
pub fn resolve(hours: &[Vec<RawRecord>], now_ms: i64, config: &ResolverConfig) -> FlightSet {
    let mut resolver = FlightResolver::new(config.clone());
    for (hour, records) in hours.iter().enumerate() {
        resolver.ingest_hour(hour, records, now_ms);
    }
    resolver.into_flights()
}
