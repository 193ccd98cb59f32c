//! # Geofence Monitoring
//!
//! Per-room circular fences and meeting points, plus leave detection for
//! members sharing their location.
//!
//! Each joined member starts out inside the fence. A location update that
//! moves a member from inside to outside produces a single
//! [`GeofenceAlert`]; staying outside does not repeat it, and coming back
//! re-arms it. Only the room's creator may change the fence or the meeting
//! point.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::store::check_position;
use crate::{CongestionError, GpsPoint, OptionExt, Result, RoomId, UserId};

// ============================================================================
// Types
// ============================================================================

/// Circular fence around a room's area of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub center: GpsPoint,
    pub radius_m: f64,
}

impl Geofence {
    pub fn new(center: GpsPoint, radius_m: f64) -> Result<Self> {
        check_position(&center)?;
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(CongestionError::InvalidRadius {
                value: radius_m.to_string(),
            });
        }
        Ok(Self { center, radius_m })
    }

    /// Distance from the fence center in meters.
    pub fn distance_to(&self, point: &GpsPoint) -> f64 {
        haversine_distance(point, &self.center)
    }

    /// Points exactly on the boundary count as inside.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        self.distance_to(point) <= self.radius_m
    }
}

/// Announced gathering place for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingPoint {
    pub place_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reach_by: Option<DateTime<Utc>>,
}

impl MeetingPoint {
    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Emitted when a member leaves the fence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeofenceAlert {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// Distance from the fence center, rounded to whole meters
    pub distance_m: i64,
    /// How far past the boundary, rounded, never negative
    pub outside_by_m: i64,
}

#[derive(Debug, Clone)]
struct RoomFences {
    created_by: UserId,
    fence: Option<Geofence>,
    meeting_point: Option<MeetingPoint>,
    inside: HashMap<UserId, bool>,
}

impl RoomFences {
    fn authorize(&self, room_id: RoomId, requester: UserId) -> Result<()> {
        if requester == self.created_by {
            Ok(())
        } else {
            Err(CongestionError::Forbidden {
                message: format!("user {} did not create room {}", requester, room_id),
            })
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Fence state for every active room.
#[derive(Debug, Clone, Default)]
pub struct GeofenceMonitor {
    rooms: HashMap<RoomId, RoomFences>,
}

impl GeofenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a room and its creator. Returns `false` if already tracked.
    pub fn register_room(&mut self, room_id: RoomId, created_by: UserId) -> bool {
        if self.rooms.contains_key(&room_id) {
            return false;
        }
        self.rooms.insert(
            room_id,
            RoomFences {
                created_by,
                fence: None,
                meeting_point: None,
                inside: HashMap::new(),
            },
        );
        true
    }

    fn room(&self, room_id: RoomId) -> Result<&RoomFences> {
        self.rooms.get(&room_id).ok_or_room_not_found(room_id)
    }

    fn room_mut(&mut self, room_id: RoomId) -> Result<&mut RoomFences> {
        self.rooms.get_mut(&room_id).ok_or_room_not_found(room_id)
    }

    /// Replace the room's fence. Member inside/outside state is kept.
    pub fn set_geofence(&mut self, room_id: RoomId, requester: UserId, fence: Geofence) -> Result<()> {
        let room = self.room_mut(room_id)?;
        room.authorize(room_id, requester)?;

        info!(
            "[Geofence] Room {} fence set: ({:.5}, {:.5}) r={}m",
            room_id, fence.center.latitude, fence.center.longitude, fence.radius_m
        );
        room.fence = Some(fence);
        Ok(())
    }

    /// Remove the room's fence. Location updates stop producing alerts.
    pub fn clear_geofence(&mut self, room_id: RoomId, requester: UserId) -> Result<()> {
        let room = self.room_mut(room_id)?;
        room.authorize(room_id, requester)?;
        room.fence = None;

        info!("[Geofence] Room {} fence cleared", room_id);
        Ok(())
    }

    pub fn geofence(&self, room_id: RoomId) -> Option<&Geofence> {
        self.rooms.get(&room_id)?.fence.as_ref()
    }

    pub fn set_meeting_point(
        &mut self,
        room_id: RoomId,
        requester: UserId,
        meeting_point: MeetingPoint,
    ) -> Result<()> {
        check_position(&meeting_point.position())?;
        let room = self.room_mut(room_id)?;
        room.authorize(room_id, requester)?;

        info!(
            "[Geofence] Room {} meeting point: {}",
            room_id, meeting_point.place_name
        );
        room.meeting_point = Some(meeting_point);
        Ok(())
    }

    pub fn clear_meeting_point(&mut self, room_id: RoomId, requester: UserId) -> Result<()> {
        let room = self.room_mut(room_id)?;
        room.authorize(room_id, requester)?;
        room.meeting_point = None;
        Ok(())
    }

    pub fn meeting_point(&self, room_id: RoomId) -> Option<&MeetingPoint> {
        self.rooms.get(&room_id)?.meeting_point.as_ref()
    }

    /// Start tracking a member; they begin inside the fence.
    pub fn join(&mut self, room_id: RoomId, user_id: UserId) -> Result<()> {
        self.room_mut(room_id)?.inside.insert(user_id, true);
        Ok(())
    }

    pub fn leave(&mut self, room_id: RoomId, user_id: UserId) -> Result<()> {
        self.room_mut(room_id)?.inside.remove(&user_id);
        Ok(())
    }

    /// Number of members currently tracked in a room.
    pub fn member_count(&self, room_id: RoomId) -> Result<usize> {
        Ok(self.room(room_id)?.inside.len())
    }

    /// Feed a member's latest position.
    ///
    /// Returns an alert only on an inside-to-outside transition. Updates for
    /// members who have not joined, or for rooms without a fence, are ignored.
    pub fn update_location(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
        position: GpsPoint,
    ) -> Result<Option<GeofenceAlert>> {
        check_position(&position)?;
        let room = self.room_mut(room_id)?;

        let fence = match &room.fence {
            Some(fence) => fence,
            None => return Ok(None),
        };
        let Some(was_inside) = room.inside.get_mut(&user_id) else {
            debug!("[Geofence] Ignoring update from non-member {} in room {}", user_id, room_id);
            return Ok(None);
        };

        let distance = fence.distance_to(&position);
        let is_inside = distance <= fence.radius_m;
        let left = *was_inside && !is_inside;
        *was_inside = is_inside;

        if !left {
            return Ok(None);
        }

        let alert = GeofenceAlert {
            room_id,
            user_id,
            distance_m: distance.round() as i64,
            outside_by_m: ((distance - fence.radius_m).round() as i64).max(0),
        };
        warn!(
            "[Geofence] User {} left room {} fence ({}m from center)",
            user_id, room_id, alert.distance_m
        );
        Ok(Some(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATOR: UserId = 1;
    const MEMBER: UserId = 2;

    fn monitor_with_fence(radius_m: f64) -> GeofenceMonitor {
        let mut monitor = GeofenceMonitor::new();
        monitor.register_room(10, CREATOR);
        monitor
            .set_geofence(10, CREATOR, Geofence::new(GpsPoint::new(0.0, 0.0), radius_m).unwrap())
            .unwrap();
        monitor.join(10, MEMBER).unwrap();
        monitor
    }

    #[test]
    fn test_geofence_validation() {
        assert!(Geofence::new(GpsPoint::new(0.0, 0.0), 0.0).is_err());
        assert!(Geofence::new(GpsPoint::new(0.0, 0.0), f64::NAN).is_err());
        assert!(Geofence::new(GpsPoint::new(f64::INFINITY, 0.0), 10.0).is_err());

        let fence = Geofence::new(GpsPoint::new(0.0, 0.0), 100.0).unwrap();
        assert!(fence.contains(&GpsPoint::new(0.0005, 0.0)));
        assert!(!fence.contains(&GpsPoint::new(0.002, 0.0)));
    }

    #[test]
    fn test_only_creator_may_set() {
        let mut monitor = GeofenceMonitor::new();
        monitor.register_room(10, CREATOR);
        let fence = Geofence::new(GpsPoint::new(0.0, 0.0), 100.0).unwrap();

        assert!(matches!(
            monitor.set_geofence(10, MEMBER, fence.clone()),
            Err(CongestionError::Forbidden { .. })
        ));
        assert_eq!(
            monitor.set_geofence(11, CREATOR, fence.clone()),
            Err(CongestionError::RoomNotFound { room_id: 11 })
        );
        monitor.set_geofence(10, CREATOR, fence.clone()).unwrap();
        assert_eq!(monitor.geofence(10), Some(&fence));
    }

    #[test]
    fn test_alert_on_leaving_once() {
        let mut monitor = monitor_with_fence(100.0);

        // ~55m from center: inside
        assert_eq!(monitor.update_location(10, MEMBER, GpsPoint::new(0.0005, 0.0)).unwrap(), None);

        // ~222m: leaves
        let alert = monitor
            .update_location(10, MEMBER, GpsPoint::new(0.002, 0.0))
            .unwrap()
            .unwrap();
        assert_eq!(alert.user_id, MEMBER);
        assert_eq!(alert.distance_m, 222);
        assert_eq!(alert.outside_by_m, 122);

        // Still outside: no repeat
        assert_eq!(monitor.update_location(10, MEMBER, GpsPoint::new(0.003, 0.0)).unwrap(), None);

        // Back inside re-arms
        monitor.update_location(10, MEMBER, GpsPoint::new(0.0, 0.0)).unwrap();
        assert!(monitor
            .update_location(10, MEMBER, GpsPoint::new(0.002, 0.0))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_first_update_outside_alerts() {
        let mut monitor = monitor_with_fence(100.0);
        assert!(monitor
            .update_location(10, MEMBER, GpsPoint::new(0.01, 0.0))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_no_fence_or_non_member() {
        let mut monitor = GeofenceMonitor::new();
        monitor.register_room(10, CREATOR);
        monitor.join(10, MEMBER).unwrap();
        assert_eq!(monitor.update_location(10, MEMBER, GpsPoint::new(5.0, 5.0)).unwrap(), None);

        let mut monitor = monitor_with_fence(100.0);
        assert_eq!(monitor.update_location(10, 99, GpsPoint::new(5.0, 5.0)).unwrap(), None);
        monitor.leave(10, MEMBER).unwrap();
        assert_eq!(monitor.member_count(10).unwrap(), 0);
    }

    #[test]
    fn test_clear_geofence_stops_alerts() {
        let mut monitor = monitor_with_fence(100.0);

        assert!(matches!(
            monitor.clear_geofence(10, MEMBER),
            Err(CongestionError::Forbidden { .. })
        ));
        assert!(monitor.geofence(10).is_some());
        assert_eq!(
            monitor.clear_geofence(11, CREATOR),
            Err(CongestionError::RoomNotFound { room_id: 11 })
        );

        monitor.clear_geofence(10, CREATOR).unwrap();
        assert!(monitor.geofence(10).is_none());
        assert_eq!(monitor.update_location(10, MEMBER, GpsPoint::new(0.01, 0.0)).unwrap(), None);
    }

    #[test]
    fn test_meeting_point_permissions() {
        let mut monitor = monitor_with_fence(100.0);
        let meeting = MeetingPoint {
            place_name: "North gate".to_string(),
            latitude: 0.001,
            longitude: 0.001,
            reach_by: None,
        };

        assert!(matches!(
            monitor.set_meeting_point(10, MEMBER, meeting.clone()),
            Err(CongestionError::Forbidden { .. })
        ));
        monitor.set_meeting_point(10, CREATOR, meeting.clone()).unwrap();
        assert_eq!(monitor.meeting_point(10), Some(&meeting));

        assert!(monitor.clear_meeting_point(10, MEMBER).is_err());
        monitor.clear_meeting_point(10, CREATOR).unwrap();
        assert!(monitor.meeting_point(10).is_none());
    }
}
