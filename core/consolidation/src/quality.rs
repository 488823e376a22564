use memory_ledger_schemas::{clamp_unit, QualityIndicators};

pub const CONFIDENCE_WEIGHT: f64 = 0.4;
pub const EVIDENCE_WEIGHT: f64 = 0.3;
pub const GENERALIZATION_WEIGHT: f64 = 0.2;
pub const CONSISTENCY_WEIGHT: f64 = 0.1;

/// Stand-in for any missing or non-finite input.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Weighted quality of an extracted candidate, always within `[0, 1]`.
pub fn quality_score(
    confidence: Option<f64>,
    evidence_strength: Option<f64>,
    indicators: Option<&QualityIndicators>,
) -> f64 {
    let generalization = indicators.and_then(|q| q.generalization);
    let consistency = indicators.and_then(|q| q.consistency);

    let score = CONFIDENCE_WEIGHT * sanitize(confidence)
        + EVIDENCE_WEIGHT * sanitize(evidence_strength)
        + GENERALIZATION_WEIGHT * sanitize(generalization)
        + CONSISTENCY_WEIGHT * sanitize(consistency);

    score.clamp(0.0, 1.0)
}

pub(crate) fn sanitize(value: Option<f64>) -> f64 {
    value.map_or(NEUTRAL_SCORE, |v| clamp_unit(v, NEUTRAL_SCORE))
}
