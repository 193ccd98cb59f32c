//! Path validation.
//!
//! Turns the caller-supplied path into an ordered list of [`GpsPoint`]s.
//! Coordinates may arrive as JSON numbers or numeric strings; anything that
//! does not parse to a finite number rejects the whole path, naming the first
//! offending position.

use serde_json::Value;

use crate::{CongestionError, GpsPoint, Result};

/// Minimum number of points in a scorable path (one segment).
pub const MIN_PATH_POINTS: usize = 2;

/// Parse a JSON path (`[{"lat": .., "lng": ..}, ...]`) into validated points.
///
/// Fails with [`CongestionError::InvalidPath`] if the value is missing, not an
/// array, or has fewer than two entries, and with
/// [`CongestionError::InvalidPathPoint`] for the first entry whose `lat` or
/// `lng` is missing or not a finite number. Later entries are not inspected.
pub fn parse_path(value: Option<&Value>) -> Result<Vec<GpsPoint>> {
    let items = match value {
        Some(Value::Array(items)) => items,
        _ => return Err(CongestionError::InvalidPath { point_count: 0 }),
    };

    if items.len() < MIN_PATH_POINTS {
        return Err(CongestionError::InvalidPath {
            point_count: items.len(),
        });
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            parse_point(item).ok_or(CongestionError::InvalidPathPoint { index })
        })
        .collect()
}

/// Validate an already-typed path.
///
/// Same rules as [`parse_path`]: at least two points, every coordinate finite,
/// first failure wins.
pub fn validate_path(points: &[GpsPoint]) -> Result<()> {
    if points.len() < MIN_PATH_POINTS {
        return Err(CongestionError::InvalidPath {
            point_count: points.len(),
        });
    }

    match points.iter().position(|p| !p.is_finite()) {
        Some(index) => Err(CongestionError::InvalidPathPoint { index }),
        None => Ok(()),
    }
}

fn parse_point(item: &Value) -> Option<GpsPoint> {
    let obj = item.as_object()?;
    let lat = parse_finite(obj.get("lat")?)?;
    let lng = parse_finite(obj.get("lng")?)?;
    Some(GpsPoint::new(lat, lng))
}

/// Coerce a JSON number or numeric string to a finite `f64`.
pub(crate) fn parse_finite(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_path() {
        let value = json!([{"lat": 0, "lng": 0}, {"lat": "0.5", "lng": 1.25}]);
        let path = parse_path(Some(&value)).unwrap();
        assert_eq!(path, vec![GpsPoint::new(0.0, 0.0), GpsPoint::new(0.5, 1.25)]);
    }

    #[test]
    fn test_path_too_short() {
        let value = json!([{"lat": 0, "lng": 0}]);
        assert_eq!(
            parse_path(Some(&value)),
            Err(CongestionError::InvalidPath { point_count: 1 })
        );
        assert_eq!(
            parse_path(Some(&json!([]))),
            Err(CongestionError::InvalidPath { point_count: 0 })
        );
    }

    #[test]
    fn test_path_missing_or_wrong_type() {
        assert!(matches!(
            parse_path(None),
            Err(CongestionError::InvalidPath { .. })
        ));
        assert!(matches!(
            parse_path(Some(&json!({"lat": 0, "lng": 0}))),
            Err(CongestionError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_first_invalid_point_reported() {
        let value = json!([
            {"lat": 0, "lng": 0},
            {"lat": "abc", "lng": 0},
            {"lat": null, "lng": 0},
        ]);
        assert_eq!(
            parse_path(Some(&value)),
            Err(CongestionError::InvalidPathPoint { index: 1 })
        );
    }

    #[test]
    fn test_non_finite_strings_rejected() {
        for bad in ["NaN", "inf", "-infinity", ""] {
            let value = json!([{"lat": 0, "lng": 0}, {"lat": 1, "lng": bad}]);
            assert_eq!(
                parse_path(Some(&value)),
                Err(CongestionError::InvalidPathPoint { index: 1 }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_coordinate_key() {
        let value = json!([{"lat": 0}, {"lat": 1, "lng": 1}]);
        assert_eq!(
            parse_path(Some(&value)),
            Err(CongestionError::InvalidPathPoint { index: 0 })
        );
    }

    #[test]
    fn test_validate_typed_path() {
        assert!(validate_path(&[GpsPoint::new(0.0, 0.0), GpsPoint::new(1.0, 1.0)]).is_ok());
        assert_eq!(
            validate_path(&[GpsPoint::new(0.0, 0.0)]),
            Err(CongestionError::InvalidPath { point_count: 1 })
        );
        assert_eq!(
            validate_path(&[
                GpsPoint::new(0.0, 0.0),
                GpsPoint::new(f64::NAN, 0.0),
                GpsPoint::new(f64::INFINITY, 0.0),
            ]),
            Err(CongestionError::InvalidPathPoint { index: 1 })
        );
    }
}
