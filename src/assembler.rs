//! Trajectory assembly: ordered per-flight point sequences and overviews.

use crate::normalize::{display_id, normalize};
use crate::types::{BalloonSummary, FlightSet, RawRecord};

/// Sort every flight's points by timestamp and point `latest_index` at the
/// chronologically last one.
///
/// The sort is stable, so points sharing a timestamp keep their append order.
/// This is the only place points are reordered.
pub fn finalize(mut flights: FlightSet) -> FlightSet {
    for flight in flights.iter_mut() {
        flight.points.sort_by_key(|p| p.timestamp);
        flight.latest_index = flight.points.len().saturating_sub(1);
    }
    flights
}

/// One entry per flight, taken from its latest point.
pub fn summaries(flights: &FlightSet) -> Vec<BalloonSummary> {
    flights.iter().filter_map(|f| f.summary()).collect()
}

/// Overview of a single snapshot without any cross-hour matching.
///
/// Anonymous records get a display id built from their position and index.
pub fn snapshot_view(records: &[RawRecord], hour: usize, now_ms: i64) -> Vec<BalloonSummary> {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let point = normalize(record, hour, now_ms)?;
            Some(BalloonSummary {
                id: display_id(&point, i),
                lat: point.lat,
                lon: point.lon,
                alt: point.alt,
            })
        })
        .collect()
}
