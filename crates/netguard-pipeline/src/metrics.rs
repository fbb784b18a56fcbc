//! Binary classification metrics. The positive class is `1` (not safe).

use crate::transform::TargetVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    #[must_use]
    pub fn from_labels(actual: &TargetVector, predicted: &TargetVector) -> Self {
        let mut cm = Self::default();
        for (&a, &p) in actual.iter().zip(predicted.iter()) {
            match (a == 1, p == 1) {
                (true, true) => cm.true_positive += 1,
                (false, true) => cm.false_positive += 1,
                (false, false) => cm.true_negative += 1,
                (true, false) => cm.false_negative += 1,
            }
        }
        cm
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
}

impl EvaluationMetrics {
    /// Metrics for `predicted` against `actual`. Any zero denominator yields `0.0`.
    #[must_use]
    pub fn compute(actual: &TargetVector, predicted: &TargetVector) -> Self {
        let confusion = ConfusionMatrix::from_labels(actual, predicted);
        let ConfusionMatrix { true_positive: tp, false_positive: fp, true_negative: tn, false_negative: fn_ } =
            confusion;

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall == 0.0 { 0.0 } else { 2.0 * precision * recall / (precision + recall) };
        Self { accuracy: ratio(tp + tn, confusion.total()), precision, recall, f1, confusion }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_compute_known_values() {
        let actual = array![1u8, 1, 1, 0, 0, 0];
        let predicted = array![1u8, 1, 0, 1, 0, 0];
        let m = EvaluationMetrics::compute(&actual, &predicted);

        assert_eq!(
            m.confusion,
            ConfusionMatrix { true_positive: 2, false_positive: 1, true_negative: 2, false_negative: 1 }
        );
        assert!((m.accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_positive_predictions_scores_zero() {
        let m = EvaluationMetrics::compute(&array![1u8, 0], &array![0u8, 0]);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert!((m.accuracy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        let m = EvaluationMetrics::compute(&TargetVector::from(vec![]), &TargetVector::from(vec![]));
        assert_eq!(m, EvaluationMetrics::default());
    }
}
