use crate::constants::{DEG_TO_RAD, EARTH_RADIUS_KM};
use crate::models::{BoundingBox, Coordinate};

/// Great-circle distance in kilometers on a sphere of mean earth radius.
pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let dlat = (b.latitude - a.latitude) * DEG_TO_RAD;
    let dlon = (b.longitude - a.longitude) * DEG_TO_RAD;

    let h = (dlat / 2.0).sin().powi(2)
        + (a.latitude * DEG_TO_RAD).cos()
            * (b.latitude * DEG_TO_RAD).cos()
            * (dlon / 2.0).sin().powi(2);

    // Rounding can push h a hair past 1 for antipodal points.
    let c = 2.0 * h.min(1.0).sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Equirectangular box around `center`. Covers the circle of `radius_km` up to
/// millimetres at the east and west edges; near the poles `cos(lat)` tends to
/// zero and the longitude span grows without bound.
pub fn bounding_box(center: &Coordinate, radius_km: f64) -> BoundingBox {
    let lat_delta = radius_km / (EARTH_RADIUS_KM * DEG_TO_RAD);
    let lon_delta =
        radius_km / (EARTH_RADIUS_KM * (center.latitude * DEG_TO_RAD).cos() * DEG_TO_RAD);

    BoundingBox {
        min_lat: center.latitude - lat_delta,
        max_lat: center.latitude + lat_delta,
        min_lon: center.longitude - lon_delta,
        max_lon: center.longitude + lon_delta,
    }
}

/// Point at `distance_km` from `origin` along `bearing_deg` (0 = north, 90 = east).
pub fn destination_point(origin: &Coordinate, bearing_deg: f64, distance_km: f64) -> Coordinate {
    let angular = distance_km / EARTH_RADIUS_KM;
    let bearing = bearing_deg * DEG_TO_RAD;
    let lat1 = origin.latitude * DEG_TO_RAD;
    let lon1 = origin.longitude * DEG_TO_RAD;

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

    Coordinate {
        latitude: lat2 / DEG_TO_RAD,
        longitude: ((lon2 / DEG_TO_RAD) + 540.0) % 360.0 - 180.0,
    }
}
