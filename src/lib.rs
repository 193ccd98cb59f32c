//! # Route Congestion
//!
//! Congestion density prediction along a proposed travel path, scored against
//! the movement history shared by members of a room.
//!
//! This library provides:
//! - Geodesic primitives (haversine distance, local-plane point-to-segment distance)
//! - Path validation and a bounding-box prefilter for candidate movements
//! - Recency-decayed, distance-weighted density scoring per path node
//! - Normalization to 0-100 node indices and an overall index
//! - In-memory and SQLite movement stores behind a common [`MovementStore`] trait
//! - Geofence monitoring for room members
//!
//! ## Features
//!
//! - **`parallel`** - Score candidate movements in parallel with rayon
//! - **`persistence`** - Enable the SQLite movement store
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use route_congestion::{GpsPoint, InMemoryMovementStore, TrafficEngine};
//!
//! let mut store = InMemoryMovementStore::new();
//! store.create_room(1);
//! let now = Utc::now();
//! store
//!     .record_movement(1, 7, GpsPoint::new(0.0, 0.0005), now - Duration::minutes(5))
//!     .unwrap();
//!
//! let engine = TrafficEngine::new(store);
//! let response = engine
//!     .predict_json_at(
//!         r#"{"room_id": 1, "path": [{"lat": 0, "lng": 0}, {"lat": 0, "lng": 0.001}]}"#,
//!         now,
//!     )
//!     .unwrap();
//! assert_eq!(response.node_indices, vec![100.0, 100.0]);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{CongestionError, ErrorKind, OptionExt, Result};

// Geographic utilities (distance, segment projection, bounds)
pub mod geo_utils;

// Path validation
pub mod path;
pub use path::validate_path;

// Bounding-box prefilter for store scans
pub mod prefilter;
pub use prefilter::search_bounds;

// Movement history read contract and in-memory store
pub mod store;
pub use store::{
    InMemoryMovementStore, MovementQuery, MovementRecord, MovementScope, MovementStore,
    TimeWindow,
};

// SQLite-backed movement store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteMovementStore;

// Density scoring (decay + nearest segment)
pub mod scoring;
pub use scoring::{DecayModel, DensityScorer, NearestSegment, ScoreVector};

// Score normalization
pub mod normalize;
pub use normalize::{normalize_scores, NormalizedScores};

// Request/response wire types
pub mod request;
pub use request::{ErrorResponse, PredictionRequest, PredictionResponse, RawPredictionRequest};

// Prediction pipeline
pub mod engine;
pub use engine::{CancellationToken, PredictionConfig, TrafficEngine};

// Geofence and meeting point coordination
pub mod geofence;
pub use geofence::{Geofence, GeofenceAlert, GeofenceMonitor, MeetingPoint};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RouteCongestionRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// Room identifier.
pub type RoomId = i64;

/// User identifier.
pub type UserId = i64;

/// A GPS coordinate with latitude and longitude in degrees.
///
/// Used for path nodes, movement positions and fence centers.
///
/// # Example
/// ```
/// use route_congestion::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check that both coordinates are finite numbers.
    ///
    /// Ranges are not enforced; path points are only required to be finite.
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Grow the box by the given deltas (degrees) on every side.
    pub fn expanded(&self, lat_delta: f64, lng_delta: f64) -> Self {
        Self {
            min_lat: self.min_lat - lat_delta,
            max_lat: self.max_lat + lat_delta,
            min_lng: self.min_lng - lng_delta,
            max_lng: self.max_lng + lng_delta,
        }
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_finite() {
        assert!(GpsPoint::new(51.5074, -0.1278).is_finite());
        // Out-of-range but finite values are accepted
        assert!(GpsPoint::new(91.0, 181.0).is_finite());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_finite());
        assert!(!GpsPoint::new(0.0, f64::INFINITY).is_finite());
    }

    #[test]
    fn test_bounds_from_points() {
        assert!(Bounds::from_points(&[]).is_none());

        let bounds = Bounds::from_points(&[
            GpsPoint::new(51.50, -0.13),
            GpsPoint::new(51.51, -0.12),
            GpsPoint::new(51.505, -0.125),
        ])
        .unwrap();
        assert_eq!(bounds.min_lat, 51.50);
        assert_eq!(bounds.max_lat, 51.51);
        assert_eq!(bounds.min_lng, -0.13);
        assert_eq!(bounds.max_lng, -0.12);
    }

    #[test]
    fn test_bounds_expand_and_contains() {
        let bounds = Bounds {
            min_lat: 0.0,
            max_lat: 1.0,
            min_lng: 0.0,
            max_lng: 1.0,
        };
        let grown = bounds.expanded(0.5, 0.25);
        assert_eq!(grown.min_lat, -0.5);
        assert_eq!(grown.max_lng, 1.25);

        assert!(bounds.contains(&GpsPoint::new(1.0, 0.0))); // edges are inclusive
        assert!(!bounds.contains(&GpsPoint::new(1.1, 0.5)));
        assert!(grown.contains(&GpsPoint::new(1.1, 0.5)));
    }
}
