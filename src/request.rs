//! # Wire Types
//!
//! JSON request, response and error bodies for congestion prediction.
//!
//! Requests are decoded leniently into [`RawPredictionRequest`] (every field
//! kept as an untyped JSON value) and then validated into a typed
//! [`PredictionRequest`]. All validation happens here, before any store access.
//!
//! ## Request
//!
//! ```json
//! {
//!   "scope": "room",
//!   "room_id": 12,
//!   "path": [{"lat": 40.0, "lng": -3.7}, {"lat": 40.001, "lng": -3.699}],
//!   "radius_m": 50,
//!   "window_minutes": 60
//! }
//! ```
//!
//! `scope` defaults to `"room"`, `radius_m` and `window_minutes` to the
//! engine's configured defaults. Integers may be sent as JSON numbers or
//! numeric strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::PredictionConfig;
use crate::path::{parse_finite, parse_path, validate_path};
use crate::store::MovementScope;
use crate::{CongestionError, GpsPoint, Result, RoomId};

// ============================================================================
// Request
// ============================================================================

/// Undecoded request body; `null` and missing fields are equivalent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPredictionRequest {
    #[serde(default)]
    pub scope: Option<Value>,
    #[serde(default)]
    pub room_id: Option<Value>,
    #[serde(default)]
    pub room_ids: Option<Value>,
    #[serde(default)]
    pub path: Option<Value>,
    #[serde(default)]
    pub radius_m: Option<Value>,
    #[serde(default)]
    pub window_minutes: Option<Value>,
}

impl RawPredictionRequest {
    /// Decode a JSON request body.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// A validated prediction request.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub scope: MovementScope,
    pub path: Vec<GpsPoint>,
    pub radius_m: i64,
    pub window_minutes: i64,
}

impl PredictionRequest {
    /// Request with the default radius (50 m) and window (60 min).
    pub fn new(scope: MovementScope, path: Vec<GpsPoint>) -> Self {
        let defaults = PredictionConfig::default();
        Self {
            scope,
            path,
            radius_m: defaults.default_radius_m,
            window_minutes: defaults.default_window_minutes,
        }
    }

    pub fn with_radius(mut self, radius_m: i64) -> Self {
        self.radius_m = radius_m;
        self
    }

    pub fn with_window(mut self, window_minutes: i64) -> Self {
        self.window_minutes = window_minutes;
        self
    }

    /// Validate and type a raw request, filling defaults from `config`.
    ///
    /// Checks run in order: scope and its identifiers, path, radius, window.
    /// The first failure is returned.
    pub fn from_raw(raw: &RawPredictionRequest, config: &PredictionConfig) -> Result<Self> {
        let scope = parse_scope(raw)?;
        let path = parse_path(raw.path.as_ref())?;

        let radius_m = match &raw.radius_m {
            None => config.default_radius_m,
            Some(v) => parse_positive(v)
                .ok_or_else(|| CongestionError::InvalidRadius { value: v.to_string() })?,
        };
        let window_minutes = match &raw.window_minutes {
            None => config.default_window_minutes,
            Some(v) => parse_positive(v)
                .ok_or_else(|| CongestionError::InvalidWindow { value: v.to_string() })?,
        };

        Ok(Self {
            scope,
            path,
            radius_m,
            window_minutes,
        })
    }

    /// Re-check a request built in code rather than decoded from JSON.
    pub fn validate(&self) -> Result<()> {
        match &self.scope {
            MovementScope::Rooms(ids) if ids.is_empty() => {
                return Err(CongestionError::MissingRoomIds)
            }
            _ => {}
        }
        validate_path(&self.path)?;
        if self.radius_m <= 0 {
            return Err(CongestionError::InvalidRadius {
                value: self.radius_m.to_string(),
            });
        }
        if self.window_minutes <= 0 {
            return Err(CongestionError::InvalidWindow {
                value: self.window_minutes.to_string(),
            });
        }
        Ok(())
    }

    /// The single room being scored, if any.
    pub fn room_id(&self) -> Option<RoomId> {
        match self.scope {
            MovementScope::Room(id) => Some(id),
            _ => None,
        }
    }
}

fn parse_scope(raw: &RawPredictionRequest) -> Result<MovementScope> {
    let name = match &raw.scope {
        None => "room",
        Some(Value::String(s)) => s.trim(),
        Some(other) => {
            return Err(CongestionError::InvalidScope {
                scope: other.to_string(),
            })
        }
    };

    match name {
        "room" => raw
            .room_id
            .as_ref()
            .and_then(parse_integer)
            .map(MovementScope::Room)
            .ok_or(CongestionError::MissingRoomId),
        "rooms" => parse_room_ids(raw.room_ids.as_ref()).map(MovementScope::Rooms),
        "global" => Ok(MovementScope::Global),
        other => Err(CongestionError::InvalidScope {
            scope: other.to_string(),
        }),
    }
}

fn parse_room_ids(value: Option<&Value>) -> Result<Vec<RoomId>> {
    let items = match value {
        None => return Err(CongestionError::MissingRoomIds),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(CongestionError::InvalidRoomIds {
                message: "expected a list".to_string(),
            })
        }
    };
    if items.is_empty() {
        return Err(CongestionError::MissingRoomIds);
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            parse_integer(item).ok_or_else(|| CongestionError::InvalidRoomIds {
                message: format!("entry {} is not an integer: {}", i, item),
            })
        })
        .collect()
}

/// Coerce a JSON integer, integral float or numeric string to `i64`.
fn parse_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Value::String(s) = value {
        if let Ok(n) = s.trim().parse::<i64>() {
            return Some(n);
        }
    }
    let f = parse_finite(value)?;
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then_some(f as i64)
}

fn parse_positive(value: &Value) -> Option<i64> {
    parse_integer(value).filter(|n| *n > 0)
}

// ============================================================================
// Responses
// ============================================================================

/// Successful prediction body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub ok: bool,
    /// Echo of the single room scored; `null` for multi-room and global scope
    pub room_id: Option<RoomId>,
    pub window_minutes: i64,
    pub radius_m: i64,
    pub counted_movements: u64,
    pub overall_index: f64,
    pub node_indices: Vec<f64>,
}

impl PredictionResponse {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| CongestionError::Internal { message: e.to_string() })
    }
}

/// Failure body: `{"ok": false, "error": .., "kind": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    pub kind: String,
    #[serde(skip)]
    pub status: u16,
}

impl From<&CongestionError> for ErrorResponse {
    fn from(err: &CongestionError) -> Self {
        Self {
            ok: false,
            error: err.to_string(),
            kind: err.kind().as_str().to_string(),
            status: err.status_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawPredictionRequest {
        serde_json::from_value(value).unwrap()
    }

    fn two_points() -> Value {
        json!([{"lat": 0, "lng": 0}, {"lat": 0, "lng": 0.001}])
    }

    fn parse(value: Value) -> Result<PredictionRequest> {
        PredictionRequest::from_raw(&raw(value), &PredictionConfig::default())
    }

    #[test]
    fn test_defaults() {
        let req = parse(json!({"room_id": 3, "path": two_points()})).unwrap();
        assert_eq!(req.scope, MovementScope::Room(3));
        assert_eq!(req.radius_m, 50);
        assert_eq!(req.window_minutes, 60);
        assert_eq!(req.room_id(), Some(3));
    }

    #[test]
    fn test_null_fields_use_defaults() {
        let req = parse(json!({
            "scope": null, "room_id": "7", "path": two_points(),
            "radius_m": null, "window_minutes": null
        }))
        .unwrap();
        assert_eq!(req.scope, MovementScope::Room(7));
        assert_eq!(req.radius_m, 50);
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let req = parse(json!({
            "scope": "rooms", "room_ids": [1, "2", 3.0],
            "path": two_points(), "radius_m": "120", "window_minutes": 30.0
        }))
        .unwrap();
        assert_eq!(req.scope, MovementScope::Rooms(vec![1, 2, 3]));
        assert_eq!(req.radius_m, 120);
        assert_eq!(req.window_minutes, 30);
        assert_eq!(req.room_id(), None);
    }

    #[test]
    fn test_global_scope_needs_no_ids() {
        let req = parse(json!({"scope": "global", "path": two_points()})).unwrap();
        assert_eq!(req.scope, MovementScope::Global);
    }

    #[test]
    fn test_scope_errors() {
        assert_eq!(
            parse(json!({"path": two_points()})),
            Err(CongestionError::MissingRoomId)
        );
        assert_eq!(
            parse(json!({"room_id": "abc", "path": two_points()})),
            Err(CongestionError::MissingRoomId)
        );
        assert_eq!(
            parse(json!({"scope": "rooms", "path": two_points()})),
            Err(CongestionError::MissingRoomIds)
        );
        assert_eq!(
            parse(json!({"scope": "rooms", "room_ids": [], "path": two_points()})),
            Err(CongestionError::MissingRoomIds)
        );
        assert!(matches!(
            parse(json!({"scope": "rooms", "room_ids": [1, "x"], "path": two_points()})),
            Err(CongestionError::InvalidRoomIds { .. })
        ));
        assert!(matches!(
            parse(json!({"scope": "rooms", "room_ids": [1.5], "path": two_points()})),
            Err(CongestionError::InvalidRoomIds { .. })
        ));
        assert_eq!(
            parse(json!({"scope": "city", "path": two_points()})),
            Err(CongestionError::InvalidScope { scope: "city".to_string() })
        );
    }

    #[test]
    fn test_non_positive_radius_and_window_rejected() {
        for bad in [json!(0), json!(-5), json!("ten"), json!(2.5)] {
            let r = parse(json!({"room_id": 1, "path": two_points(), "radius_m": bad}));
            assert!(matches!(r, Err(CongestionError::InvalidRadius { .. })), "{r:?}");

            let w = parse(json!({"room_id": 1, "path": two_points(), "window_minutes": bad}));
            assert!(matches!(w, Err(CongestionError::InvalidWindow { .. })), "{w:?}");
        }
    }

    #[test]
    fn test_path_errors_propagate() {
        assert_eq!(
            parse(json!({"room_id": 1, "path": [{"lat": 0, "lng": 0}]})),
            Err(CongestionError::InvalidPath { point_count: 1 })
        );
        assert_eq!(
            parse(json!({"room_id": 1, "path": [{"lat": 0, "lng": 0}, {"lat": "x", "lng": 0}]})),
            Err(CongestionError::InvalidPathPoint { index: 1 })
        );
    }

    #[test]
    fn test_malformed_json() {
        let err = RawPredictionRequest::from_json("{not json").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_typed_request() {
        let path = vec![GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.001)];
        let req = PredictionRequest::new(MovementScope::Global, path.clone());
        assert!(req.validate().is_ok());
        assert!(req.clone().with_radius(0).validate().is_err());
        assert!(req.clone().with_window(-1).validate().is_err());
        assert_eq!(
            PredictionRequest::new(MovementScope::Rooms(vec![]), path).validate(),
            Err(CongestionError::MissingRoomIds)
        );
    }

    #[test]
    fn test_error_response_shape() {
        let body = ErrorResponse::from(&CongestionError::RoomNotFound { room_id: 9 });
        assert_eq!(body.status, 404);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["ok"], json!(false));
        assert_eq!(json["kind"], json!("not_found"));
        assert!(json.get("status").is_none());
    }
}
