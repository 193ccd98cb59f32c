//! # Geographic Utilities
//!
//! Core geographic computation utilities for congestion scoring.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`point_to_segment_distance`] | Distance from a point to a path segment (local plane) |
//! | [`local_offset`] | East/north offset of a point from an origin, in meters |
//! | [`polyline_length`] | Total length of a path in meters |
//! | [`mean_latitude`] | Arithmetic mean latitude of a path |
//! | [`meters_to_lat_degrees`] | Convert meters to degrees of latitude |
//! | [`meters_to_lng_degrees`] | Convert meters to degrees of longitude at a latitude |
//!
//! ## Example
//!
//! ```rust
//! use route_congestion::{GpsPoint, geo_utils};
//!
//! let a = GpsPoint::new(0.0, 0.0);
//! let b = GpsPoint::new(0.0, 0.001);
//! let mid = GpsPoint::new(0.0, 0.0005);
//!
//! // ~111m segment along the equator
//! let length = geo_utils::haversine_distance(&a, &b);
//! assert!((length - 111.19).abs() < 0.01);
//!
//! // The midpoint lies on the segment
//! assert!(geo_utils::point_to_segment_distance(&mid, &a, &b) < 1e-6);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! Distances use a spherical Earth with mean radius 6,371,000 m.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)
//!
//! ### Local Plane
//!
//! [`point_to_segment_distance`] flattens the neighbourhood of the segment start
//! into a plane whose axes are haversine legs along a single coordinate. The
//! north axis is exact (meridian arcs); the east axis is measured along the
//! start point's parallel. Accuracy degrades for long segments and near the
//! poles.

use crate::GpsPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree used by the bounding-box prefilter.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Floor on `cos(latitude)` when converting meters to longitude degrees.
pub const MIN_LNG_SCALE: f64 = 0.1;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters along the Earth's surface. Symmetric, zero for
/// identical points and finite for antipodal points.
///
/// # Example
///
/// ```rust
/// use route_congestion::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_500.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lng = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Offset of `point` from `origin` in a local plane, as `(east, north)` meters.
///
/// Each axis is the haversine distance along one coordinate with the other held
/// at the origin's value, signed by the direction of the coordinate change.
#[inline]
pub fn local_offset(origin: &GpsPoint, point: &GpsPoint) -> (f64, f64) {
    let east = haversine_distance(origin, &GpsPoint::new(origin.latitude, point.longitude));
    let north = haversine_distance(origin, &GpsPoint::new(point.latitude, origin.longitude));

    let x = if point.longitude < origin.longitude {
        -east
    } else {
        east
    };
    let y = if point.latitude < origin.latitude {
        -north
    } else {
        north
    };
    (x, y)
}

/// Distance in meters from `point` to the segment `a -> b`.
///
/// Projects the point onto the segment in the local plane centered at `a`
/// (see [`local_offset`]), clamps the projection parameter to `[0, 1]` and
/// returns the planar distance to the clamped projection. A zero-length
/// segment falls back to [`haversine_distance`] to `a`.
///
/// # Example
///
/// ```rust
/// use route_congestion::{GpsPoint, geo_utils};
///
/// let a = GpsPoint::new(0.0, 0.0);
/// let p = GpsPoint::new(0.001, 0.0);
///
/// // Degenerate segment: plain point distance
/// assert_eq!(
///     geo_utils::point_to_segment_distance(&p, &a, &a),
///     geo_utils::haversine_distance(&p, &a),
/// );
/// ```
pub fn point_to_segment_distance(point: &GpsPoint, a: &GpsPoint, b: &GpsPoint) -> f64 {
    if a == b {
        return haversine_distance(point, a);
    }

    let (bx, by) = local_offset(a, b);
    let (px, py) = local_offset(a, point);

    let seg_len_sq = bx * bx + by * by;
    if seg_len_sq == 0.0 {
        return haversine_distance(point, a);
    }

    let t = ((px * bx + py * by) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * bx;
    let dy = py - t * by;

    (dx * dx + dy * dy).sqrt()
}

/// Calculate the total length of a polyline in meters.
///
/// Empty or single-point paths return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Degree Conversions
// =============================================================================

/// Arithmetic mean of the latitudes of `points`. Returns 0.0 for empty input.
pub fn mean_latitude(points: &[GpsPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.latitude).sum::<f64>() / points.len() as f64
}

/// Convert meters to degrees of latitude (111,000 m per degree).
#[inline]
pub fn meters_to_lat_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Convert meters to degrees of longitude at the given latitude.
///
/// The cosine factor is floored at [`MIN_LNG_SCALE`] so the delta stays
/// bounded close to the poles.
#[inline]
pub fn meters_to_lng_degrees(meters: f64, latitude: f64) -> f64 {
    let scale = latitude.to_radians().cos().max(MIN_LNG_SCALE);
    meters / (METERS_PER_DEGREE * scale)
}

// =============================================================================
// Unit Tests
// =============================================================================
