//! Confidence scoring pipeline.
//!
//! Pure functions only: weighted aggregation, boost factors,
//! batch-relative normalization and candidate selection. Nothing in here
//! touches the filesystem.

use crate::detection::types::DetectionResult;

/// Weighted score of matched signals over the total declared weight.
///
/// Each item is `(weight, matched)`. Returns 0 when the total weight is
/// zero, so a target without signals can never be detected.
pub fn calculate_confidence(signals: &[(f64, bool)]) -> f64 {
    let total: f64 = signals.iter().map(|(weight, _)| weight).sum();

    if total <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = signals
        .iter()
        .filter(|(_, matched)| *matched)
        .map(|(weight, _)| weight)
        .sum();

    (weighted / total).clamp(0.0, 1.0)
}

/// Combined multiplier for the boost factors whose indicator is present.
///
/// Each item is `(multiplier, present)`. Boosts add up as
/// `1 + Σ(multiplier - 1)`. The result is exactly 1.0 when fewer than
/// `minimum_signals` signals matched or no indicator is present.
pub fn boost_multiplier(
    signal_count: usize,
    minimum_signals: usize,
    indicators: &[(f64, bool)],
) -> f64 {
    if signal_count < minimum_signals {
        return 1.0;
    }

    indicators
        .iter()
        .filter(|(_, present)| *present)
        .fold(1.0, |acc, (multiplier, _)| acc + (multiplier - 1.0))
}

/// Multiply `confidence` by `multiplier`, capped at 1.0.
pub fn apply_boost(confidence: f64, multiplier: f64) -> f64 {
    (confidence * multiplier).clamp(0.0, 1.0)
}

/// Set each result's `normalized_confidence` relative to the best
/// confidence in the batch. Left as `None` when nothing scored above 0.
pub fn normalize(results: &mut [DetectionResult]) {
    let max = results
        .iter()
        .map(|r| r.confidence)
        .fold(0.0_f64, f64::max);

    for result in results.iter_mut() {
        result.normalized_confidence = if max > 0.0 {
            Some((result.confidence / max).clamp(0.0, 1.0))
        } else {
            None
        };
    }
}

/// Sort by confidence descending. The sort is stable, so ties keep
/// catalog order.
pub fn rank(results: &mut [DetectionResult]) {
    results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

/// Candidates from an already ranked list: confidence above zero and at
/// least `threshold`, truncated to `max_candidates`.
pub fn select_candidates(
    ranked: &[DetectionResult],
    threshold: f64,
    max_candidates: usize,
) -> Vec<DetectionResult> {
    ranked
        .iter()
        .filter(|r| r.confidence > 0.0 && r.confidence >= threshold)
        .take(max_candidates)
        .cloned()
        .collect()
}
