//! # Prediction Engine
//!
//! Runs the congestion pipeline against a [`MovementStore`]:
//!
//! 1. validate the request (no store access on failure)
//! 2. check the room exists (single-room scope only)
//! 3. expand the path bounds by the radius into a search box
//! 4. stream candidate records from the store into the density scorer
//! 5. normalize raw scores to 0..100
//!
//! The store and the evaluation time are explicit inputs, so a prediction is
//! a pure function of the request, the store snapshot and `now`.
//! Cancellation and deadlines are checked between streamed records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::normalize::normalize_scores;
use crate::prefilter::search_bounds;
use crate::request::{ErrorResponse, PredictionRequest, PredictionResponse, RawPredictionRequest};
use crate::scoring::{DecayModel, DensityScorer, ScoreAccumulator};
use crate::store::{MovementQuery, MovementScope, MovementStore, TimeWindow};
use crate::{geo_utils, CongestionError, OptionExt, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for congestion prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionConfig {
    /// Radius used when a request omits `radius_m`.
    /// Default: 50 meters
    pub default_radius_m: i64,

    /// Window used when a request omits `window_minutes`.
    /// Default: 60 minutes
    pub default_window_minutes: i64,

    /// Records buffered per scoring batch. With the `parallel` feature each
    /// batch is split across the rayon pool.
    /// Default: 4096
    pub batch_size: usize,

    /// Abort scans running longer than this.
    /// Default: none
    pub scan_timeout: Option<Duration>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            default_radius_m: 50,
            default_window_minutes: 60,
            batch_size: 4096,
            scan_timeout: None,
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag for aborting an in-flight prediction from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-scan abort conditions.
struct ScanGuard<'a> {
    token: Option<&'a CancellationToken>,
    started: Instant,
    deadline: Option<Instant>,
}

impl<'a> ScanGuard<'a> {
    fn new(token: Option<&'a CancellationToken>, timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            token,
            started,
            deadline: timeout.and_then(|t| started.checked_add(t)),
        }
    }

    fn check(&self) -> Result<()> {
        if self.token.map_or(false, |t| t.is_cancelled()) {
            return Err(CongestionError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CongestionError::Timeout {
                    elapsed_ms: self.started.elapsed().as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Congestion prediction over a movement store.
#[derive(Debug)]
pub struct TrafficEngine<S> {
    store: S,
    config: PredictionConfig,
}

impl<S: MovementStore> TrafficEngine<S> {
    /// Create an engine with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, PredictionConfig::default())
    }

    pub fn with_config(store: S, config: PredictionConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Predict at the current time.
    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionResponse> {
        self.predict_at(request, Utc::now())
    }

    /// Predict as of `now`.
    pub fn predict_at(
        &self,
        request: &PredictionRequest,
        now: DateTime<Utc>,
    ) -> Result<PredictionResponse> {
        self.run(request, now, None)
    }

    /// Predict as of `now`, aborting with [`CongestionError::Cancelled`] once
    /// `token` is cancelled.
    pub fn predict_with_cancel(
        &self,
        request: &PredictionRequest,
        now: DateTime<Utc>,
        token: &CancellationToken,
    ) -> Result<PredictionResponse> {
        self.run(request, now, Some(token))
    }

    /// Decode, validate and score a JSON request body as of `now`.
    pub fn predict_json_at(&self, body: &str, now: DateTime<Utc>) -> Result<PredictionResponse> {
        let raw = RawPredictionRequest::from_json(body)?;
        let request = PredictionRequest::from_raw(&raw, &self.config)?;
        self.run(&request, now, None)
    }

    /// Like [`predict_json_at`](Self::predict_json_at) but always returns a
    /// JSON body, either a prediction or an [`ErrorResponse`].
    pub fn respond_json_at(&self, body: &str, now: DateTime<Utc>) -> String {
        let result = self
            .predict_json_at(body, now)
            .and_then(|response| response.to_json());

        match result {
            Ok(json) => json,
            Err(e) => error_json(&e),
        }
    }

    fn run(
        &self,
        request: &PredictionRequest,
        now: DateTime<Utc>,
        token: Option<&CancellationToken>,
    ) -> Result<PredictionResponse> {
        request.validate()?;

        if let MovementScope::Room(room_id) = request.scope {
            if !self.store.room_exists(room_id)? {
                return Err(CongestionError::RoomNotFound { room_id });
            }
        }

        let radius = request.radius_m as f64;
        let bounds = search_bounds(&request.path, radius).ok_or_internal("empty path")?;
        let query = MovementQuery {
            window: TimeWindow::ending_at(now, request.window_minutes),
            bounds,
            scope: request.scope.clone(),
        };

        let decay = DecayModel::for_window(request.window_minutes as f64);
        let scorer = DensityScorer::new(&request.path, radius, decay, now);
        let guard = ScanGuard::new(token, self.config.scan_timeout);

        debug!(
            "[Predict] scope={} nodes={} path={:.0}m radius={}m window={}min half_life={}min",
            request.scope.name(),
            request.path.len(),
            geo_utils::polyline_length(&request.path),
            request.radius_m,
            request.window_minutes,
            decay.half_life_minutes()
        );

        guard.check()?;
        let mut accumulator = ScoreAccumulator::new(&scorer, self.config.batch_size);
        let scanned = self.store.scan(&query, &mut |record| {
            guard.check()?;
            accumulator.push(record);
            Ok(())
        });

        if let Err(e) = scanned {
            match &e {
                CongestionError::Cancelled | CongestionError::Timeout { .. } => {
                    info!("[Predict] scan aborted after {} records: {}", accumulator.seen(), e)
                }
                _ => warn!("[Predict] scan failed: {}", e),
            }
            return Err(e);
        }

        let scores = accumulator.finish();
        let normalized = normalize_scores(scores.values());

        info!(
            "[Predict] scope={} counted={} contributing={} overall={} in {:?}",
            request.scope.name(),
            scores.counted_movements(),
            scores.contributing_movements(),
            normalized.overall_index,
            guard.started.elapsed()
        );

        Ok(PredictionResponse {
            ok: true,
            room_id: request.room_id(),
            window_minutes: request.window_minutes,
            radius_m: request.radius_m,
            counted_movements: scores.counted_movements(),
            overall_index: normalized.overall_index,
            node_indices: normalized.node_indices,
        })
    }
}

/// Serialize an error into a wire body.
pub fn error_json(err: &CongestionError) -> String {
    serde_json::to_string(&ErrorResponse::from(err)).unwrap_or_else(|_| {
        r#"{"ok":false,"error":"internal error","kind":"internal"}"#.to_string()
    })
}
