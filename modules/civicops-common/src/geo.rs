use serde::{Deserialize, Serialize};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_meters(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Haversine great-circle distance between two lat/lng points in meters.
pub fn haversine_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    EARTH_RADIUS_METERS * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Arithmetic mean of a set of points. `None` for an empty set.
pub fn centroid<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<GeoPoint> {
    let mut n = 0usize;
    let (mut lat, mut lng) = (0.0, 0.0);
    for p in points {
        lat += p.lat;
        lng += p.lng;
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some(GeoPoint::new(lat / n as f64, lng / n as f64))
}

/// Round coordinates to `decimals` places. At 4 places a cell is roughly 11m.
pub fn snap_to_grid(point: GeoPoint, decimals: u32) -> GeoPoint {
    let factor = 10f64.powi(decimals as i32);
    GeoPoint::new(
        (point.lat * factor).round() / factor,
        (point.lng * factor).round() / factor,
    )
}
