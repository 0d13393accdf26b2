// src/models/confidence.rs

//! Validation result attached to a locator set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Field;

/// Weights of the three composite metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub accuracy: f64,
    pub stability: f64,
    pub completeness: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.4,
            stability: 0.4,
            completeness: 0.2,
        }
    }
}

/// Per-field and composite confidence for a locator set.
///
/// Immutable once built; re-validation produces a new report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    field_scores: BTreeMap<Field, f64>,
    single_page_accuracy: f64,
    multi_page_stability: f64,
    data_completeness: f64,
    overall_score: f64,
    sampled_pages: usize,
}

impl ConfidenceReport {
    pub fn new(
        field_scores: BTreeMap<Field, f64>,
        single_page_accuracy: f64,
        multi_page_stability: f64,
        data_completeness: f64,
        sampled_pages: usize,
        weights: ScoreWeights,
    ) -> Self {
        let accuracy = unit(single_page_accuracy);
        let stability = unit(multi_page_stability);
        let completeness = unit(data_completeness);

        let total = weights.accuracy + weights.stability + weights.completeness;
        let overall = if total > 0.0 {
            (weights.accuracy * accuracy
                + weights.stability * stability
                + weights.completeness * completeness)
                / total
        } else {
            0.0
        };

        Self {
            field_scores: field_scores.into_iter().map(|(f, s)| (f, unit(s))).collect(),
            single_page_accuracy: accuracy,
            multi_page_stability: stability,
            data_completeness: completeness,
            overall_score: unit(overall),
            sampled_pages,
        }
    }

    pub fn field_score(&self, field: Field) -> f64 {
        self.field_scores.get(&field).copied().unwrap_or(0.0)
    }

    pub fn field_scores(&self) -> &BTreeMap<Field, f64> {
        &self.field_scores
    }

    pub fn single_page_accuracy(&self) -> f64 {
        self.single_page_accuracy
    }

    pub fn multi_page_stability(&self) -> f64 {
        self.multi_page_stability
    }

    pub fn data_completeness(&self) -> f64 {
        self.data_completeness
    }

    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }

    /// Number of additional pages attempted during stability sampling.
    pub fn sampled_pages(&self) -> usize {
        self.sampled_pages
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_uses_default_weights() {
        let report = ConfidenceReport::new(BTreeMap::new(), 1.0, 0.5, 0.0, 3, ScoreWeights::default());
        assert!((report.overall_score() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_scores_are_clamped() {
        let mut fields = BTreeMap::new();
        fields.insert(Field::JobList, 1.7);
        let report = ConfidenceReport::new(fields, 2.0, -1.0, f64::NAN, 0, ScoreWeights::default());
        assert_eq!(report.field_score(Field::JobList), 1.0);
        assert_eq!(report.single_page_accuracy(), 1.0);
        assert_eq!(report.multi_page_stability(), 0.0);
        assert_eq!(report.data_completeness(), 0.0);
        assert!((0.0..=1.0).contains(&report.overall_score()));
    }

    #[test]
    fn test_zero_weights_yield_zero_overall() {
        let weights = ScoreWeights {
            accuracy: 0.0,
            stability: 0.0,
            completeness: 0.0,
        };
        let report = ConfidenceReport::new(BTreeMap::new(), 1.0, 1.0, 1.0, 0, weights);
        assert_eq!(report.overall_score(), 0.0);
    }
}
