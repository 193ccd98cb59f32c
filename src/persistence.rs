//! # SQLite Movement Store
//!
//! Movement history persisted in SQLite.
//!
//! ## Schema
//!
//! - `rooms`: known room ids
//! - `movements`: one row per observation, timestamps as Unix milliseconds,
//!   indexed on `(room_id, created_at)` and `(user_id, created_at)`
//!
//! Scans run prepared statements with all filters pushed into SQL and walk
//! the row cursor, handing each record to the visitor as it is decoded.
//! Nothing is buffered, so scans over large histories stay flat in memory.
//! Long room lists are deduplicated and split across several statements.

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{debug, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Result as SqlResult, Row};

use crate::store::{check_position, MovementQuery, MovementRecord, MovementScope, MovementStore};
use crate::{CongestionError, GpsPoint, Result, RoomId, UserId};

/// Movement store backed by a SQLite database.
pub struct SqliteMovementStore {
    db: Connection,
    db_path: String,
}

impl std::fmt::Debug for SqliteMovementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMovementStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl SqliteMovementStore {
    /// Open (or create) a database at `db_path`.
    pub fn new(db_path: &str) -> SqlResult<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;

        info!("[MovementStore] Opened {}", db_path);
        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqlResult<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> SqlResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS movements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_movements_room_time
                ON movements(room_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_movements_user_time
                ON movements(user_id, created_at);

            PRAGMA foreign_keys = ON;
        "#,
        )?;
        Ok(())
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Register a room. Returns `false` if it already existed.
    pub fn create_room(&mut self, room_id: RoomId) -> SqlResult<bool> {
        let inserted = self
            .db
            .execute("INSERT OR IGNORE INTO rooms (id) VALUES (?)", params![room_id])?;
        Ok(inserted == 1)
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
        if !self.room_exists(room_id)? {
            return Err(CongestionError::RoomNotFound { room_id });
        }

        self.db.execute(
            "INSERT INTO movements (room_id, user_id, latitude, longitude, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                room_id,
                user_id,
                position.latitude,
                position.longitude,
                timestamp.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Number of stored movements.
    pub fn movement_count(&self) -> SqlResult<u64> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM movements", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete movements older than the retention period, measured from `now`.
    ///
    /// A retention of 0 days keeps everything.
    pub fn cleanup_older_than(&mut self, retention_days: u32, now: DateTime<Utc>) -> SqlResult<u64> {
        if retention_days == 0 {
            info!("[MovementStore] Cleanup skipped: retention period is 0 (keep all)");
            return Ok(0);
        }

        // A cutoff before the earliest representable instant matches nothing
        let Some(cutoff) = now.checked_sub_signed(Duration::days(retention_days as i64)) else {
            debug!(
                "[MovementStore] Cleanup skipped: {} days reaches past the calendar",
                retention_days
            );
            return Ok(0);
        };
        let deleted = self.db.execute(
            "DELETE FROM movements WHERE created_at < ?",
            params![cutoff.timestamp_millis()],
        )?;

        if deleted > 0 {
            info!(
                "[MovementStore] Cleaned up {} movements older than {} days",
                deleted, retention_days
            );
        }
        Ok(deleted as u64)
    }
}

/// Most room ids bound into a single scan statement. SQLite caps bound
/// variables per statement (999 on older builds), six go to the window and box.
const MAX_ROOMS_PER_QUERY: usize = 900;

/// Build the scan statement and its positional parameters.
///
/// `rooms` restricts the scan to those ids; `None` means no room filter.
fn scan_sql(query: &MovementQuery, rooms: Option<&[RoomId]>) -> (String, Vec<SqlValue>) {
    let mut sql = String::from(
        "SELECT user_id, room_id, latitude, longitude, created_at FROM movements
         WHERE created_at >= ? AND created_at <= ?
           AND latitude >= ? AND latitude <= ?
           AND longitude >= ? AND longitude <= ?",
    );
    let mut values = vec![
        SqlValue::Integer(query.window.start.timestamp_millis()),
        SqlValue::Integer(query.window.end.timestamp_millis()),
        SqlValue::Real(query.bounds.min_lat),
        SqlValue::Real(query.bounds.max_lat),
        SqlValue::Real(query.bounds.min_lng),
        SqlValue::Real(query.bounds.max_lng),
    ];

    match rooms {
        Some([id]) => {
            sql.push_str(" AND room_id = ?");
            values.push(SqlValue::Integer(*id));
        }
        Some(ids) => {
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" AND room_id IN ({})", placeholders));
            values.extend(ids.iter().map(|id| SqlValue::Integer(*id)));
        }
        None => {}
    }

    (sql, values)
}

fn row_to_record(row: &Row<'_>) -> Result<MovementRecord> {
    let millis: i64 = row.get(4)?;
    let timestamp = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| CongestionError::Store {
            message: format!("movement timestamp out of range: {}", millis),
        })?;

    Ok(MovementRecord {
        user_id: row.get(0)?,
        room_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        timestamp,
    })
}

impl MovementStore for SqliteMovementStore {
    fn room_exists(&self, room_id: RoomId) -> Result<bool> {
        let exists: bool = self.db.query_row(
            "SELECT EXISTS(SELECT 1 FROM rooms WHERE id = ?)",
            params![room_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn scan(
        &self,
        query: &MovementQuery,
        visit: &mut dyn FnMut(MovementRecord) -> Result<()>,
    ) -> Result<()> {
        let streamed = match &query.scope {
            MovementScope::Room(id) => {
                self.scan_rooms(query, Some(std::slice::from_ref(id)), visit)?
            }
            MovementScope::Rooms(ids) => {
                // Distinct ids keep chunks disjoint, so no record streams twice
                let mut ids = ids.clone();
                ids.sort_unstable();
                ids.dedup();

                let mut total = 0;
                for chunk in ids.chunks(MAX_ROOMS_PER_QUERY) {
                    total += self.scan_rooms(query, Some(chunk), visit)?;
                }
                total
            }
            MovementScope::Global => self.scan_rooms(query, None, visit)?,
        };

        debug!(
            "[MovementStore] Streamed {} movements for scope {}",
            streamed,
            query.scope.name()
        );
        Ok(())
    }
}

impl SqliteMovementStore {
    /// Run one scan statement, returning how many records were streamed.
    fn scan_rooms(
        &self,
        query: &MovementQuery,
        rooms: Option<&[RoomId]>,
        visit: &mut dyn FnMut(MovementRecord) -> Result<()>,
    ) -> Result<u64> {
        let (sql, values) = scan_sql(query, rooms);
        let mut stmt = self.db.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;

        let mut streamed = 0u64;
        while let Some(row) = rows.next()? {
            visit(row_to_record(row)?)?;
            streamed += 1;
        }
        Ok(streamed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TimeWindow;
    use crate::Bounds;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn everywhere() -> Bounds {
        Bounds {
            min_lat: -90.0,
            max_lat: 90.0,
            min_lng: -180.0,
            max_lng: 180.0,
        }
    }

    fn query(scope: MovementScope, minutes: i64) -> MovementQuery {
        MovementQuery {
            window: TimeWindow::ending_at(t0(), minutes),
            bounds: everywhere(),
            scope,
        }
    }

    fn collect(store: &SqliteMovementStore, query: &MovementQuery) -> Vec<MovementRecord> {
        let mut out = Vec::new();
        store
            .scan(query, &mut |r| {
                out.push(r);
                Ok(())
            })
            .unwrap();
        out
    }

    fn sample_store() -> SqliteMovementStore {
        let mut store = SqliteMovementStore::in_memory().unwrap();
        store.create_room(1).unwrap();
        store.create_room(2).unwrap();
        store
            .record_movement(1, 10, GpsPoint::new(0.0, 0.0), t0())
            .unwrap();
        store
            .record_movement(2, 11, GpsPoint::new(0.0, 0.0005), t0() - Duration::minutes(30))
            .unwrap();
        store
            .record_movement(2, 12, GpsPoint::new(10.0, 10.0), t0() - Duration::minutes(90))
            .unwrap();
        store
    }

    #[test]
    fn test_create_room() {
        let mut store = SqliteMovementStore::in_memory().unwrap();
        assert!(store.create_room(5).unwrap());
        assert!(!store.create_room(5).unwrap());
        assert!(store.room_exists(5).unwrap());
        assert!(!store.room_exists(6).unwrap());
    }

    #[test]
    fn test_record_requires_room_and_finite_position() {
        let mut store = SqliteMovementStore::in_memory().unwrap();
        assert_eq!(
            store.record_movement(3, 1, GpsPoint::new(0.0, 0.0), t0()),
            Err(CongestionError::RoomNotFound { room_id: 3 })
        );

        store.create_room(3).unwrap();
        assert!(matches!(
            store.record_movement(3, 1, GpsPoint::new(f64::NAN, 0.0), t0()),
            Err(CongestionError::InvalidCoordinates { .. })
        ));
        assert_eq!(store.movement_count().unwrap(), 0);
    }

    #[test]
    fn test_scan_round_trips_records() {
        let store = sample_store();
        let records = collect(&store, &query(MovementScope::Room(1), 60));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, 10);
        assert_eq!(records[0].timestamp, t0());
        assert_eq!(records[0].position(), GpsPoint::new(0.0, 0.0));
    }

    #[test]
    fn test_scan_scopes() {
        let store = sample_store();
        assert_eq!(collect(&store, &query(MovementScope::Global, 120)).len(), 3);
        assert_eq!(collect(&store, &query(MovementScope::Rooms(vec![2, 7]), 120)).len(), 2);
        assert!(collect(&store, &query(MovementScope::Rooms(vec![]), 120)).is_empty());
    }

    #[test]
    fn test_scan_window_and_bounds() {
        let store = sample_store();
        // The 30-minute-old record sits exactly on the window start
        assert_eq!(collect(&store, &query(MovementScope::Global, 30)).len(), 2);
        assert_eq!(collect(&store, &query(MovementScope::Global, 29)).len(), 1);

        let mut q = query(MovementScope::Global, 120);
        q.bounds = Bounds {
            min_lat: -1.0,
            max_lat: 1.0,
            min_lng: -1.0,
            max_lng: 1.0,
        };
        assert_eq!(collect(&store, &q).len(), 2);
    }

    #[test]
    fn test_visitor_error_aborts_scan() {
        let store = sample_store();
        let mut seen = 0;
        let result = store.scan(&query(MovementScope::Global, 120), &mut |_| {
            seen += 1;
            Err(CongestionError::Cancelled)
        });
        assert_eq!(result, Err(CongestionError::Cancelled));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_cleanup_older_than() {
        let mut store = sample_store();
        assert_eq!(store.cleanup_older_than(0, t0()).unwrap(), 0);

        let later = t0() + Duration::days(1) - Duration::minutes(45);
        assert_eq!(store.cleanup_older_than(1, later).unwrap(), 1);
        assert_eq!(store.movement_count().unwrap(), 2);
    }

    #[test]
    fn test_cleanup_with_retention_past_calendar_keeps_all() {
        let mut store = sample_store();
        assert_eq!(store.cleanup_older_than(u32::MAX, t0()).unwrap(), 0);
        assert_eq!(store.movement_count().unwrap(), 3);
    }

    #[test]
    fn test_scan_many_room_ids_in_chunks() {
        let store = sample_store();
        // Far more ids than SQLite binds in one statement
        let mut ids: Vec<RoomId> = (1000..41_000).collect();
        ids.push(2);
        let records = collect(&store, &query(MovementScope::Rooms(ids), 120));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.room_id == 2));
    }

    #[test]
    fn test_scan_duplicate_room_ids_stream_once() {
        let store = sample_store();
        let ids = vec![2; 2 * MAX_ROOMS_PER_QUERY + 1];
        assert_eq!(collect(&store, &query(MovementScope::Rooms(ids), 120)).len(), 2);

        let mixed = vec![1, 2, 1, 2];
        assert_eq!(collect(&store, &query(MovementScope::Rooms(mixed), 120)).len(), 3);
    }
}
