//! Score normalization to the 0..100 congestion scale.

use serde::Serialize;

/// Per-node congestion indices and their mean, all rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedScores {
    pub node_indices: Vec<f64>,
    pub overall_index: f64,
}

/// Scale raw scores so the maximum maps to 100.
///
/// All-zero input (or an empty slice) yields all zeros. The overall index is
/// the mean of the already-rounded node indices, rounded again.
pub fn normalize_scores(raw: &[f64]) -> NormalizedScores {
    let max = raw.iter().copied().fold(0.0_f64, f64::max);
    let scale = if max > 0.0 { 100.0 / max } else { 0.0 };

    let node_indices: Vec<f64> = raw.iter().map(|s| round2(s * scale)).collect();

    let overall_index = if node_indices.is_empty() {
        0.0
    } else {
        round2(node_indices.iter().sum::<f64>() / node_indices.len() as f64)
    };

    NormalizedScores {
        node_indices,
        overall_index,
    }
}

/// Round to two decimal places, ties to even.
///
/// Rounding is decided on the exact binary value, so `2.675` (stored just
/// below the half) gives `2.67` and an exact `0.125` gives `0.12`.
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    // Error of the product, exact under fused multiply-add
    let residual = value.mul_add(100.0, -scaled);

    let nearest = if residual == 0.0 {
        scaled.round_ties_even()
    } else if (scaled - scaled.trunc()).abs() == 0.5 {
        // The product only looked like a tie after rounding
        if residual > 0.0 {
            scaled.ceil()
        } else {
            scaled.floor()
        }
    } else {
        scaled.round()
    };
    nearest / 100.0
}
