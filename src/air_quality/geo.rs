//! Great-circle distance and nearest-station lookup

use serde::Serialize;

use super::moe::Station;

/// Mean Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// Haversine distance between two points, in kilometers
pub fn haversine_km(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Closest station to `origin`; the first one wins on ties.
/// Stations without a finite distance are never picked.
pub fn nearest_station(origin: LatLon, stations: &[Station]) -> Option<(&Station, f64)> {
    stations.iter().fold(None, |best, station| {
        let distance = haversine_km(origin, station.location());
        if !distance.is_finite() {
            return best;
        }
        match best {
            Some((_, best_distance)) if best_distance <= distance => best,
            _ => Some((station, distance)),
        }
    })
}
