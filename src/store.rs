//! # Movement Store
//!
//! Read contract for the movement history consumed by the prediction
//! pipeline, plus an in-memory implementation backed by an R-tree.
//!
//! Records are streamed to a visitor one at a time so that implementations
//! never have to materialize a full result set. The visitor may abort a scan
//! by returning an error; the store must stop and hand that error back
//! unchanged.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use log::debug;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::{Bounds, CongestionError, GpsPoint, Result, RoomId, UserId};

// ============================================================================
// Types
// ============================================================================

/// A timestamped location observation contributed by a room member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl MovementRecord {
    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Which rooms' movements take part in a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementScope {
    /// A single room (existence is checked before scanning)
    Room(RoomId),
    /// An explicit set of rooms; unknown ids simply match nothing
    Rooms(Vec<RoomId>),
    /// No room filter
    Global,
}

impl MovementScope {
    /// Check whether a record from `room_id` is in scope.
    pub fn includes(&self, room_id: RoomId) -> bool {
        match self {
            MovementScope::Room(id) => *id == room_id,
            MovementScope::Rooms(ids) => ids.contains(&room_id),
            MovementScope::Global => true,
        }
    }

    /// Wire name of the scope.
    pub fn name(&self) -> &'static str {
        match self {
            MovementScope::Room(_) => "room",
            MovementScope::Rooms(_) => "rooms",
            MovementScope::Global => "global",
        }
    }
}

/// Longest window accepted by [`TimeWindow::ending_at`] (about 1,900 years).
const MAX_WINDOW_MINUTES: i64 = 1_000_000_000;

/// Inclusive time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The `minutes` leading up to and including `now`.
    ///
    /// Windows reaching past the representable range start at the earliest
    /// representable instant.
    pub fn ending_at(now: DateTime<Utc>, minutes: i64) -> Self {
        let span = Duration::minutes(minutes.clamp(0, MAX_WINDOW_MINUTES));
        Self {
            start: now
                .checked_sub_signed(span)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now,
        }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.start && *timestamp <= self.end
    }
}

/// Filters for a movement scan.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementQuery {
    pub window: TimeWindow,
    pub bounds: Bounds,
    pub scope: MovementScope,
}

impl MovementQuery {
    /// Check a record against all three filters.
    pub fn matches(&self, record: &MovementRecord) -> bool {
        self.scope.includes(record.room_id)
            && self.window.contains(&record.timestamp)
            && self.bounds.contains(&record.position())
    }
}

/// Read side of the movement history.
pub trait MovementStore {
    /// Check whether a room exists.
    fn room_exists(&self, room_id: RoomId) -> Result<bool>;

    /// Stream every record matching `query` into `visit`, in any order.
    ///
    /// An error returned by `visit` stops the scan and is returned as-is.
    /// Failures of the store itself are reported as
    /// [`CongestionError::Store`].
    fn scan(
        &self,
        query: &MovementQuery,
        visit: &mut dyn FnMut(MovementRecord) -> Result<()>,
    ) -> Result<()>;
}

impl<S: MovementStore + ?Sized> MovementStore for &S {
    fn room_exists(&self, room_id: RoomId) -> Result<bool> {
        (**self).room_exists(room_id)
    }

    fn scan(
        &self,
        query: &MovementQuery,
        visit: &mut dyn FnMut(MovementRecord) -> Result<()>,
    ) -> Result<()> {
        (**self).scan(query, visit)
    }
}

/// Reject movements whose coordinates are not finite.
pub(crate) fn check_position(position: &GpsPoint) -> Result<()> {
    if position.is_finite() {
        Ok(())
    } else {
        Err(CongestionError::InvalidCoordinates {
            message: format!("({}, {})", position.latitude, position.longitude),
        })
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// R-tree entry for a movement record.
#[derive(Debug, Clone)]
struct IndexedMovement(MovementRecord);

impl RTreeObject for IndexedMovement {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.0.longitude, self.0.latitude])
    }
}

/// Movement store held entirely in memory.
///
/// Records are indexed in an R-tree keyed on position, so bounding-box scans
/// only touch nearby records. Useful for tests and embedded deployments.
#[derive(Debug)]
pub struct InMemoryMovementStore {
    rooms: HashSet<RoomId>,
    spatial_index: RTree<IndexedMovement>,
}

impl Default for InMemoryMovementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMovementStore {
    pub fn new() -> Self {
        Self {
            rooms: HashSet::new(),
            spatial_index: RTree::new(),
        }
    }

    /// Register a room. Returns `false` if it already existed.
    pub fn create_room(&mut self, room_id: RoomId) -> bool {
        self.rooms.insert(room_id)
    }

    /// Append a movement for a known room.
    pub fn record_movement(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
        position: GpsPoint,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        check_position(&position)?;
        if !self.rooms.contains(&room_id) {
            return Err(CongestionError::RoomNotFound { room_id });
        }

        self.spatial_index.insert(IndexedMovement(MovementRecord {
            user_id,
            room_id,
            latitude: position.latitude,
            longitude: position.longitude,
            timestamp,
        }));
        Ok(())
    }

    /// Number of stored movements.
    pub fn movement_count(&self) -> usize {
        self.spatial_index.size()
    }

    /// Drop movements recorded before `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.spatial_index.size();
        let kept: Vec<IndexedMovement> = self
            .spatial_index
            .iter()
            .filter(|m| m.0.timestamp >= cutoff)
            .cloned()
            .collect();
        self.spatial_index = RTree::bulk_load(kept);

        let removed = before - self.spatial_index.size();
        if removed > 0 {
            debug!("[MovementStore] Pruned {} movements older than {}", removed, cutoff);
        }
        removed
    }
}

impl MovementStore for InMemoryMovementStore {
    fn room_exists(&self, room_id: RoomId) -> Result<bool> {
        Ok(self.rooms.contains(&room_id))
    }

    fn scan(
        &self,
        query: &MovementQuery,
        visit: &mut dyn FnMut(MovementRecord) -> Result<()>,
    ) -> Result<()> {
        let envelope = AABB::from_corners(
            [query.bounds.min_lng, query.bounds.min_lat],
            [query.bounds.max_lng, query.bounds.max_lat],
        );

        for entry in self.spatial_index.locate_in_envelope(&envelope) {
            let record = &entry.0;
            if query.matches(record) {
                visit(record.clone())?;
            }
        }
        Ok(())
    }
}
