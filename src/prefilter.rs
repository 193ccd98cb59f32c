//! Bounding-box prefilter for movement scans.
//!
//! The box handed to the store is the path's bounds grown by the proximity
//! radius converted to degrees. Records inside the box but outside the true
//! radius are rejected later by the scorer.

use crate::geo_utils::{mean_latitude, meters_to_lat_degrees, meters_to_lng_degrees};
use crate::{Bounds, GpsPoint};

/// Candidate search box for a path and proximity radius (meters).
///
/// Latitude grows by `radius / 111_000` degrees. Longitude grows by
/// `radius / (111_000 * max(0.1, cos(mean_lat)))` degrees, where `mean_lat`
/// is the mean latitude of the path points. Returns `None` for an empty path.
///
/// # Example
///
/// ```rust
/// use route_congestion::{GpsPoint, search_bounds};
///
/// let path = [GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.001)];
/// let bounds = search_bounds(&path, 111.0).unwrap();
/// assert!((bounds.min_lat + 0.001).abs() < 1e-12);
/// assert!((bounds.max_lng - 0.002).abs() < 1e-12);
/// ```
pub fn search_bounds(path: &[GpsPoint], radius_meters: f64) -> Option<Bounds> {
    let bounds = Bounds::from_points(path)?;
    let lat_delta = meters_to_lat_degrees(radius_meters);
    let lng_delta = meters_to_lng_degrees(radius_meters, mean_latitude(path));
    Some(bounds.expanded(lat_delta, lng_delta))
}
