//! Retrieval confidence and the text approval gate.

use crate::retrieval::RetrievedChunk;

/// Distance that normalizes to zero confidence.
pub const REFERENCE_DISTANCE: f64 = 2.0;

/// Answers below this confidence wait for human approval.
pub const APPROVAL_THRESHOLD: f64 = 0.8;

/// Confidence assigned to an empty result set.
pub const EMPTY_RETRIEVAL_CONFIDENCE: f64 = 0.0;

/// Map one distance onto `[0, 1]` via `1 - d / D`.
pub fn normalize_distance(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance / REFERENCE_DISTANCE).clamp(0.0, 1.0)
}

/// Mean normalized distance over `chunks`, rounded to three decimals.
///
/// Empty input yields [`EMPTY_RETRIEVAL_CONFIDENCE`].
pub fn compute_confidence(chunks: &[RetrievedChunk]) -> f64 {
    if chunks.is_empty() {
        return EMPTY_RETRIEVAL_CONFIDENCE;
    }
    let total: f64 = chunks.iter().map(|c| normalize_distance(c.distance)).sum();
    round3(total / chunks.len() as f64)
}

/// Whether an answer with this confidence must be reviewed.
pub fn requires_text_approval(confidence: f64) -> bool {
    confidence < APPROVAL_THRESHOLD
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
