//! Unified error handling for the route-congestion library.
//!
//! Errors fall into four classes that callers treat differently:
//! request validation (nothing was touched), not-found / forbidden,
//! transient store failures (safe to retry), and aborted scans
//! (cancellation or deadline).

use std::fmt;

use crate::RoomId;

/// Unified error type for congestion prediction and movement storage.
#[derive(Debug, Clone, PartialEq)]
pub enum CongestionError {
    /// Request body could not be decoded at all
    InvalidRequest { message: String },
    /// Path is missing, not a list, or has fewer than two points
    InvalidPath { point_count: usize },
    /// A path point has a latitude/longitude that is not a finite number
    InvalidPathPoint { index: usize },
    /// Scope is not one of "room", "rooms", "global"
    InvalidScope { scope: String },
    /// `room_id` missing or not an integer for single-room scope
    MissingRoomId,
    /// `room_ids` missing or empty for multi-room scope
    MissingRoomIds,
    /// `room_ids` contains a value that is not an integer
    InvalidRoomIds { message: String },
    /// Proximity radius is not a positive integer
    InvalidRadius { value: String },
    /// Time window is not a positive integer
    InvalidWindow { value: String },
    /// A movement or fence has non-finite coordinates
    InvalidCoordinates { message: String },
    /// Room does not exist
    RoomNotFound { room_id: RoomId },
    /// Caller may not write records for this room
    Forbidden { message: String },
    /// Movement store failure (connection, query, or mid-stream error)
    Store { message: String },
    /// Scan aborted through a cancellation token
    Cancelled,
    /// Scan exceeded its deadline
    Timeout { elapsed_ms: u64 },
    /// Generic internal error
    Internal { message: String },
}

/// Coarse error classes, used for wire responses and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Transient,
    Cancelled,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Transient => "transient",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl CongestionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CongestionError::InvalidRequest { .. }
            | CongestionError::InvalidPath { .. }
            | CongestionError::InvalidPathPoint { .. }
            | CongestionError::InvalidScope { .. }
            | CongestionError::MissingRoomId
            | CongestionError::MissingRoomIds
            | CongestionError::InvalidRoomIds { .. }
            | CongestionError::InvalidRadius { .. }
            | CongestionError::InvalidWindow { .. }
            | CongestionError::InvalidCoordinates { .. } => ErrorKind::Validation,
            CongestionError::RoomNotFound { .. } => ErrorKind::NotFound,
            CongestionError::Forbidden { .. } => ErrorKind::Forbidden,
            CongestionError::Store { .. } => ErrorKind::Transient,
            CongestionError::Cancelled => ErrorKind::Cancelled,
            CongestionError::Timeout { .. } => ErrorKind::Timeout,
            CongestionError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// True for errors raised before any store access.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// True for store failures a caller may choose to retry.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Cancelled => 499,
            ErrorKind::Internal => 500,
            ErrorKind::Transient => 503,
            ErrorKind::Timeout => 504,
        }
    }
}

impl fmt::Display for CongestionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CongestionError::InvalidRequest { message } => {
                write!(f, "Invalid request: {}", message)
            }
            CongestionError::InvalidPath { point_count } => {
                write!(
                    f,
                    "path must contain at least 2 points (got {})",
                    point_count
                )
            }
            CongestionError::InvalidPathPoint { index } => {
                write!(f, "invalid path point at index {}", index)
            }
            CongestionError::InvalidScope { scope } => {
                write!(
                    f,
                    "invalid scope '{}' (expected room, rooms or global)",
                    scope
                )
            }
            CongestionError::MissingRoomId => write!(f, "room_id required"),
            CongestionError::MissingRoomIds => write!(f, "room_ids required"),
            CongestionError::InvalidRoomIds { message } => {
                write!(f, "invalid room_ids: {}", message)
            }
            CongestionError::InvalidRadius { value } => {
                write!(f, "radius_m must be a positive integer (got {})", value)
            }
            CongestionError::InvalidWindow { value } => {
                write!(
                    f,
                    "window_minutes must be a positive integer (got {})",
                    value
                )
            }
            CongestionError::InvalidCoordinates { message } => {
                write!(f, "invalid coordinates: {}", message)
            }
            CongestionError::RoomNotFound { room_id } => {
                write!(f, "room {} not found", room_id)
            }
            CongestionError::Forbidden { message } => write!(f, "forbidden: {}", message),
            CongestionError::Store { message } => {
                write!(f, "movement store unavailable: {}", message)
            }
            CongestionError::Cancelled => write!(f, "prediction cancelled"),
            CongestionError::Timeout { elapsed_ms } => {
                write!(f, "prediction timed out after {}ms", elapsed_ms)
            }
            CongestionError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CongestionError {}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for CongestionError {
    fn from(err: rusqlite::Error) -> Self {
        CongestionError::Store {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CongestionError {
    fn from(err: serde_json::Error) -> Self {
        CongestionError::InvalidRequest {
            message: err.to_string(),
        }
    }
}

/// Result type alias for route-congestion operations.
pub type Result<T> = std::result::Result<T, CongestionError>;

/// Extension trait for converting Option to CongestionError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a room-not-found error.
    fn ok_or_room_not_found(self, room_id: RoomId) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_room_not_found(self, room_id: RoomId) -> Result<T> {
        self.ok_or(CongestionError::RoomNotFound { room_id })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| CongestionError::Internal {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CongestionError::InvalidPathPoint { index: 3 };
        assert!(err.to_string().contains("index 3"));

        let err = CongestionError::RoomNotFound { room_id: 42 };
        assert_eq!(err.to_string(), "room 42 not found");
    }

    #[test]
    fn test_error_classes() {
        assert!(CongestionError::InvalidPath { point_count: 1 }.is_validation());
        assert!(CongestionError::InvalidRadius {
            value: "0".to_string()
        }
        .is_validation());
        assert!(!CongestionError::RoomNotFound { room_id: 1 }.is_validation());

        let store = CongestionError::Store {
            message: "disk I/O error".to_string(),
        };
        assert!(store.is_transient());
        assert!(!store.is_validation());
        assert_eq!(store.status_code(), 503);

        assert_eq!(CongestionError::MissingRoomId.status_code(), 400);
        assert_eq!(CongestionError::RoomNotFound { room_id: 1 }.status_code(), 404);
        assert_eq!(CongestionError::Cancelled.kind().as_str(), "cancelled");
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_room_not_found(7);
        assert!(matches!(
            result,
            Err(CongestionError::RoomNotFound { room_id: 7 })
        ));

        assert_eq!(Some(5).ok_or_internal("unused"), Ok(5));
    }
}
