//! FFI bindings for mobile platforms (iOS/Android).
//!
//! Exposes a process-wide prediction engine over a SQLite movement store and
//! a geofence monitor to Kotlin and Swift. Predictions cross the boundary as
//! JSON strings so the wire format matches the HTTP-style bodies.

use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use log::{info, warn};
use once_cell::sync::Lazy;

use crate::engine::error_json;
use crate::{
    init_logging, CongestionError, Geofence, GeofenceMonitor, GpsPoint, MeetingPoint, RoomId,
    SqliteMovementStore, TrafficEngine, UserId,
};

// ============================================================================
// Global State
// ============================================================================

/// Global engine, created by [`traffic_engine_init`].
///
/// One mutex guards the engine and its single SQLite connection, and it is
/// held for the whole scan. Concurrent predictions, ingestion and cleanup
/// from the host app therefore run one at a time, and a long scan delays
/// every other call into the engine.
pub static ENGINE: Lazy<Mutex<Option<TrafficEngine<SqliteMovementStore>>>> =
    Lazy::new(|| Mutex::new(None));

/// Global geofence monitor.
pub static GEOFENCES: Lazy<Mutex<GeofenceMonitor>> =
    Lazy::new(|| Mutex::new(GeofenceMonitor::new()));

/// Run `f` against the global engine, if initialized.
pub fn with_engine<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut TrafficEngine<SqliteMovementStore>) -> R,
{
    let mut guard = ENGINE.lock().ok()?;
    guard.as_mut().map(f)
}

fn with_geofences<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut GeofenceMonitor) -> R,
{
    let mut guard = GEOFENCES.lock().ok()?;
    Some(f(&mut guard))
}

fn not_initialized() -> CongestionError {
    CongestionError::Internal {
        message: "engine not initialized".to_string(),
    }
}

// ============================================================================
// Prediction Engine
// ============================================================================

/// Open the movement database and install the global engine.
#[uniffi::export]
pub fn traffic_engine_init(db_path: String) -> bool {
    init_logging();
    match SqliteMovementStore::new(&db_path) {
        Ok(store) => match ENGINE.lock() {
            Ok(mut guard) => {
                *guard = Some(TrafficEngine::new(store));
                info!("[TrafficEngine] Initialized with {}", db_path);
                true
            }
            Err(_) => false,
        },
        Err(e) => {
            warn!("[TrafficEngine] Failed to initialize: {:?}", e);
            false
        }
    }
}

#[uniffi::export]
pub fn traffic_engine_is_initialized() -> bool {
    ENGINE.lock().map(|guard| guard.is_some()).unwrap_or(false)
}

/// Score a JSON prediction request; always returns a JSON body.
#[uniffi::export]
pub fn traffic_predict_json(request_json: String) -> String {
    with_engine(|e| e.respond_json_at(&request_json, Utc::now()))
        .unwrap_or_else(|| error_json(&not_initialized()))
}

#[uniffi::export]
pub fn traffic_create_room(room_id: RoomId) -> bool {
    with_engine(|e| e.store_mut().create_room(room_id))
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// Record a movement. `timestamp_ms` of 0 means now.
#[uniffi::export]
pub fn traffic_record_movement(
    room_id: RoomId,
    user_id: UserId,
    latitude: f64,
    longitude: f64,
    timestamp_ms: i64,
) -> bool {
    let timestamp = if timestamp_ms == 0 {
        Utc::now()
    } else {
        match Utc.timestamp_millis_opt(timestamp_ms).single() {
            Some(ts) => ts,
            None => return false,
        }
    };

    let result = with_engine(|e| {
        e.store_mut().record_movement(
            room_id,
            user_id,
            GpsPoint::new(latitude, longitude),
            timestamp,
        )
    });

    match result {
        Some(Ok(())) => true,
        Some(Err(e)) => {
            warn!("[TrafficEngine] record_movement failed: {}", e);
            false
        }
        None => false,
    }
}

/// Delete movements older than `retention_days`. Returns rows removed.
#[uniffi::export]
pub fn traffic_cleanup(retention_days: u32) -> u64 {
    with_engine(|e| e.store_mut().cleanup_older_than(retention_days, Utc::now()))
        .and_then(|r| r.ok())
        .unwrap_or(0)
}

// ============================================================================
// Geofences
// ============================================================================

#[uniffi::export]
pub fn geofence_register_room(room_id: RoomId, created_by: UserId) -> bool {
    with_geofences(|m| m.register_room(room_id, created_by)).unwrap_or(false)
}

#[uniffi::export]
pub fn geofence_set(
    room_id: RoomId,
    requester: UserId,
    center_lat: f64,
    center_lng: f64,
    radius_m: f64,
) -> bool {
    let fence = match Geofence::new(GpsPoint::new(center_lat, center_lng), radius_m) {
        Ok(fence) => fence,
        Err(e) => {
            warn!("[Geofence] Rejected fence for room {}: {}", room_id, e);
            return false;
        }
    };
    with_geofences(|m| m.set_geofence(room_id, requester, fence).is_ok()).unwrap_or(false)
}

/// Remove a room's fence. Only the room creator may clear it.
#[uniffi::export]
pub fn geofence_clear(room_id: RoomId, requester: UserId) -> bool {
    with_geofences(|m| m.clear_geofence(room_id, requester).is_ok()).unwrap_or(false)
}

#[uniffi::export]
pub fn geofence_set_meeting_point(
    room_id: RoomId,
    requester: UserId,
    place_name: String,
    latitude: f64,
    longitude: f64,
    reach_by_ms: Option<i64>,
) -> bool {
    let meeting = MeetingPoint {
        place_name,
        latitude,
        longitude,
        reach_by: reach_by_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
    };
    with_geofences(|m| m.set_meeting_point(room_id, requester, meeting).is_ok()).unwrap_or(false)
}

#[uniffi::export]
pub fn geofence_join(room_id: RoomId, user_id: UserId) -> bool {
    with_geofences(|m| m.join(room_id, user_id).is_ok()).unwrap_or(false)
}

#[uniffi::export]
pub fn geofence_leave(room_id: RoomId, user_id: UserId) -> bool {
    with_geofences(|m| m.leave(room_id, user_id).is_ok()).unwrap_or(false)
}

/// Feed a member position. Returns the alert as JSON when they leave the fence.
#[uniffi::export]
pub fn geofence_update_location(
    room_id: RoomId,
    user_id: UserId,
    latitude: f64,
    longitude: f64,
) -> Option<String> {
    let alert = with_geofences(|m| {
        m.update_location(room_id, user_id, GpsPoint::new(latitude, longitude))
    })?;

    match alert {
        Ok(Some(alert)) => serde_json::to_string(&alert).ok(),
        Ok(None) => None,
        Err(e) => {
            warn!("[Geofence] update_location failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_engine_calls_run_one_at_a_time() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ffi.db").to_string_lossy().to_string();
        assert!(traffic_engine_init(path));
        assert!(traffic_create_room(1));

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    with_engine(|_| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    // The monitor is process-wide, so each test uses its own room ids.

    #[test]
    fn test_geofence_clear_requires_creator() {
        assert!(geofence_register_room(9_001, 1));
        assert!(geofence_join(9_001, 2));
        assert!(geofence_set(9_001, 1, 0.0, 0.0, 100.0));

        assert!(!geofence_clear(9_001, 2));
        assert!(geofence_update_location(9_001, 2, 0.01, 0.0).is_some());

        assert!(geofence_clear(9_001, 1));
        assert!(geofence_update_location(9_001, 2, 0.02, 0.0).is_none());
        assert!(!geofence_clear(9_002, 1));
    }
}
