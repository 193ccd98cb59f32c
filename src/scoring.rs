//! # Density Scoring
//!
//! Turns candidate movement records into a raw score per path node.
//!
//! Each record is matched to its nearest path segment. Records within the
//! proximity radius contribute `(1 - distance / radius) * time_weight` to both
//! endpoints of that segment, where `time_weight` halves every half-life.
//!
//! ## Nearest segment
//!
//! Segments are compared with a strict `<`, so when two segments are exactly
//! equidistant the one earlier in the path wins. Before computing a full
//! distance, a segment is skipped if the record's latitude is further than the
//! radius from the segment's latitude band. The north axis of the local plane
//! is an exact meridian arc, so a skipped segment is always beyond the radius
//! and skipping never changes which segment wins.
//!
//! ## Parallelism
//!
//! With the `parallel` feature, batches of records are scored with a rayon
//! fold/reduce into partial [`ScoreVector`]s that are summed element-wise.

use chrono::{DateTime, Utc};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::geo_utils::{point_to_segment_distance, EARTH_RADIUS_METERS};
use crate::store::MovementRecord;
use crate::GpsPoint;

/// Shortest half-life regardless of window length, in minutes.
pub const MIN_HALF_LIFE_MINUTES: f64 = 10.0;

/// Half-life is this fraction of the window (window / 4).
pub const HALF_LIFE_WINDOW_DIVISOR: f64 = 4.0;

// ============================================================================
// Time Decay
// ============================================================================

/// Exponential recency weighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayModel {
    half_life_minutes: f64,
    decay_rate: f64,
}

impl DecayModel {
    /// Decay for a time window: half-life is `max(10, window / 4)` minutes.
    pub fn for_window(window_minutes: f64) -> Self {
        Self::with_half_life(
            (window_minutes / HALF_LIFE_WINDOW_DIVISOR).max(MIN_HALF_LIFE_MINUTES),
        )
    }

    /// Decay with an explicit half-life in minutes.
    pub fn with_half_life(half_life_minutes: f64) -> Self {
        Self {
            half_life_minutes,
            decay_rate: std::f64::consts::LN_2 / half_life_minutes,
        }
    }

    pub fn half_life_minutes(&self) -> f64 {
        self.half_life_minutes
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    /// Weight of an observation `minutes_ago` old; negative ages count as 0.
    #[inline]
    pub fn weight(&self, minutes_ago: f64) -> f64 {
        (-self.decay_rate * minutes_ago.max(0.0)).exp()
    }
}

/// Fractional minutes from `timestamp` to `now`, floored at zero.
#[inline]
pub fn minutes_ago(now: DateTime<Utc>, timestamp: DateTime<Utc>) -> f64 {
    let millis = now.signed_duration_since(timestamp).num_milliseconds();
    (millis as f64 / 60_000.0).max(0.0)
}

// ============================================================================
// Score Vector
// ============================================================================

/// Raw per-node scores plus scan counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector {
    values: Vec<f64>,
    counted: u64,
    contributing: u64,
}

impl ScoreVector {
    /// All-zero scores for a path with `node_count` nodes.
    pub fn new(node_count: usize) -> Self {
        Self {
            values: vec![0.0; node_count],
            counted: 0,
            contributing: 0,
        }
    }

    /// Add `amount` to both endpoints of segment `segment_index`.
    #[inline]
    pub fn add_to_segment(&mut self, segment_index: usize, amount: f64) {
        self.values[segment_index] += amount;
        self.values[segment_index + 1] += amount;
    }

    /// Element-wise sum of another partial vector into this one.
    pub fn merge(&mut self, other: &ScoreVector) {
        debug_assert_eq!(self.values.len(), other.values.len());
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += b;
        }
        self.counted += other.counted;
        self.contributing += other.contributing;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every candidate record examined, contributing or not.
    pub fn counted_movements(&self) -> u64 {
        self.counted
    }

    /// Records that fell within the radius of some segment.
    pub fn contributing_movements(&self) -> u64 {
        self.contributing
    }
}

// ============================================================================
// Density Scorer
// ============================================================================

/// Nearest segment of a path to some point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestSegment {
    /// Segment index `i` (connects node `i` and `i + 1`)
    pub index: usize,
    /// Distance in meters
    pub distance: f64,
}

/// Latitude extent of a segment, in radians.
#[derive(Debug, Clone, Copy)]
struct LatBand {
    min_rad: f64,
    max_rad: f64,
}

impl LatBand {
    fn new(a: &GpsPoint, b: &GpsPoint) -> Self {
        Self {
            min_rad: a.latitude.min(b.latitude).to_radians(),
            max_rad: a.latitude.max(b.latitude).to_radians(),
        }
    }

    /// Meridian distance from `lat_rad` to the band; zero inside it.
    #[inline]
    fn gap_meters(&self, lat_rad: f64) -> f64 {
        let gap = (self.min_rad - lat_rad).max(lat_rad - self.max_rad).max(0.0);
        gap * EARTH_RADIUS_METERS
    }
}

/// Scores movement records against a validated path.
#[derive(Debug, Clone)]
pub struct DensityScorer<'a> {
    path: &'a [GpsPoint],
    bands: Vec<LatBand>,
    radius_meters: f64,
    /// Segments whose latitude gap exceeds this are skipped
    prune_limit: f64,
    decay: DecayModel,
    now: DateTime<Utc>,
}

impl<'a> DensityScorer<'a> {
    /// Create a scorer for `path` (at least two points) and a positive radius.
    pub fn new(
        path: &'a [GpsPoint],
        radius_meters: f64,
        decay: DecayModel,
        now: DateTime<Utc>,
    ) -> Self {
        let bands = path.windows(2).map(|w| LatBand::new(&w[0], &w[1])).collect();
        Self {
            path,
            bands,
            radius_meters,
            // Slack absorbs rounding in the haversine legs
            prune_limit: radius_meters * (1.0 + 1e-9) + 1e-6,
            decay,
            now,
        }
    }

    pub fn node_count(&self) -> usize {
        self.path.len()
    }

    pub fn decay(&self) -> &DecayModel {
        &self.decay
    }

    /// Nearest segment by exhaustive scan; ties keep the earliest segment.
    ///
    /// Returns `None` for paths with fewer than two points.
    pub fn nearest_segment(&self, point: &GpsPoint) -> Option<NearestSegment> {
        let mut best: Option<NearestSegment> = None;
        for (index, w) in self.path.windows(2).enumerate() {
            let distance = point_to_segment_distance(point, &w[0], &w[1]);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(NearestSegment { index, distance });
            }
        }
        best
    }

    /// Nearest segment if it lies within the radius, skipping segments whose
    /// latitude band is already out of reach.
    pub fn nearest_within_radius(&self, point: &GpsPoint) -> Option<NearestSegment> {
        let lat_rad = point.latitude.to_radians();
        let mut best: Option<NearestSegment> = None;

        for (index, w) in self.path.windows(2).enumerate() {
            if self.bands[index].gap_meters(lat_rad) > self.prune_limit {
                continue;
            }
            let distance = point_to_segment_distance(point, &w[0], &w[1]);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(NearestSegment { index, distance });
            }
        }

        best.filter(|b| b.distance <= self.radius_meters)
    }

    /// Contribution of one record as `(segment_index, amount)`, or `None` if
    /// the record is beyond the radius of every segment.
    pub fn contribution(&self, record: &MovementRecord) -> Option<(usize, f64)> {
        let nearest = self.nearest_within_radius(&record.position())?;
        let spatial = 1.0 - nearest.distance / self.radius_meters;
        let temporal = self.decay.weight(minutes_ago(self.now, record.timestamp));
        Some((nearest.index, spatial * temporal))
    }

    /// Count `record` and add its contribution (if any) to `scores`.
    #[inline]
    pub fn accumulate(&self, record: &MovementRecord, scores: &mut ScoreVector) {
        scores.counted += 1;
        if let Some((index, amount)) = self.contribution(record) {
            scores.add_to_segment(index, amount);
            scores.contributing += 1;
        }
    }

    /// Score a batch of records into a fresh partial vector.
    #[cfg(not(feature = "parallel"))]
    pub fn score_batch(&self, records: &[MovementRecord]) -> ScoreVector {
        let mut scores = ScoreVector::new(self.node_count());
        for record in records {
            self.accumulate(record, &mut scores);
        }
        scores
    }

    /// Score a batch of records into a fresh partial vector.
    #[cfg(feature = "parallel")]
    pub fn score_batch(&self, records: &[MovementRecord]) -> ScoreVector {
        let nodes = self.node_count();
        records
            .par_iter()
            .fold(
                || ScoreVector::new(nodes),
                |mut acc, record| {
                    self.accumulate(record, &mut acc);
                    acc
                },
            )
            .reduce(
                || ScoreVector::new(nodes),
                |mut a, b| {
                    a.merge(&b);
                    a
                },
            )
    }
}

/// Buffers streamed records into fixed-size batches for [`DensityScorer::score_batch`].
#[derive(Debug)]
pub struct ScoreAccumulator<'s, 'a> {
    scorer: &'s DensityScorer<'a>,
    pending: Vec<MovementRecord>,
    batch_size: usize,
    scores: ScoreVector,
}

impl<'s, 'a> ScoreAccumulator<'s, 'a> {
    pub fn new(scorer: &'s DensityScorer<'a>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            scorer,
            pending: Vec::with_capacity(batch_size),
            batch_size,
            scores: ScoreVector::new(scorer.node_count()),
        }
    }

    pub fn push(&mut self, record: MovementRecord) {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let partial = self.scorer.score_batch(&self.pending);
        self.scores.merge(&partial);
        self.pending.clear();
    }

    /// Records buffered or scored so far.
    pub fn seen(&self) -> u64 {
        self.scores.counted + self.pending.len() as u64
    }

    pub fn finish(mut self) -> ScoreVector {
        self.flush();
        self.scores
    }
}
