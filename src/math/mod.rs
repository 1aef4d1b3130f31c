pub mod polyline;

use std::f64::consts::PI;

use crate::model::{BoundingBox, Point};

/// In meters, the radius Google Maps uses.
const EARTH_RADIUS: f64 = 6_378_137.;

/// Latitude lines are always spaced evenly apart, so this doesn't need to be
/// an approximation.
pub const LAT_M_PER_DEGREE: f64 = EARTH_RADIUS * (PI / 180.);

#[inline]
pub fn lng_m_per_degree(lat_deg: f64) -> f64 {
    LAT_M_PER_DEGREE * lat_deg.to_radians().cos()
}

/// Great-circle distance in meters. Used where accuracy matters past a few
/// kilometers (request validation, reported straight-line distance).
#[inline]
pub fn haversine(a: Point, b: Point) -> f64 {
    let theta1 = a.lat.to_radians();
    let theta2 = b.lat.to_radians();
    let delta_theta = (b.lat - a.lat).to_radians();
    let delta_lambda = (b.lng - a.lng).to_radians();

    let h = (delta_theta / 2.).sin().powi(2)
        + theta1.cos() * theta2.cos() * (delta_lambda / 2.).sin().powi(2);
    EARTH_RADIUS * 2. * h.sqrt().asin()
}

/// Equirectangular approximation in meters, using `cos(mean_lat)`. Error is
/// under 0.1% below ~5km, which covers every proximity query and edge length
/// in a request bbox. This is the hot-path distance.
#[inline]
pub fn fast_distance(a: Point, b: Point) -> f64 {
    let mean_lat = ((a.lat + b.lat) / 2.).to_radians();
    let dy = (b.lat - a.lat) * LAT_M_PER_DEGREE;
    let dx = (b.lng - a.lng) * LAT_M_PER_DEGREE * mean_lat.cos();
    (dx * dx + dy * dy).sqrt()
}

/// Min/max over the points, expanded by `buffer_m` on every side. `None` on
/// empty input.
pub fn bbox_from_points(points: &[Point], buffer_m: f64) -> Option<BoundingBox> {
    let first = points.first()?;

    let mut south = first.lat;
    let mut north = first.lat;
    let mut west = first.lng;
    let mut east = first.lng;
    for p in &points[1..] {
        south = south.min(p.lat);
        north = north.max(p.lat);
        west = west.min(p.lng);
        east = east.max(p.lng);
    }

    let mean_lat = (south + north) / 2.;
    let lat_buffer = buffer_m / LAT_M_PER_DEGREE;
    let lng_buffer = buffer_m / lng_m_per_degree(mean_lat);

    Some(BoundingBox {
        south: south - lat_buffer,
        west: west - lng_buffer,
        north: north + lat_buffer,
        east: east + lng_buffer,
    })
}
