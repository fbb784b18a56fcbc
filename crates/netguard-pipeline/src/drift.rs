//! Distribution drift between the train and evaluation splits.
//!
//! Uses the two-sample Kolmogorov-Smirnov test per feature. The report is
//! informational and never fails a run.

use crate::transform::FeatureMatrix;
use ndarray::Axis;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub feature: String,
    pub statistic: f64,
    pub p_value: f64,
    pub drifted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub p_value_threshold: f64,
    pub columns: Vec<ColumnDrift>,
}

impl DriftReport {
    #[must_use]
    pub fn drifted(&self) -> Vec<&str> {
        self.columns.iter().filter(|c| c.drifted).map(|c| c.feature.as_str()).collect()
    }
}

/// Two-sample KS statistic and asymptotic p-value.
///
/// Returns `(0.0, 1.0)` when either sample is empty.
#[must_use]
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> (f64, f64) {
    if a.is_empty() || b.is_empty() {
        return (0.0, 1.0);
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d = 0.0f64;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    let en = (n1 * n2 / (n1 + n2)).sqrt();
    (d, kolmogorov_q((en + 0.12 + 0.11 / en) * d))
}

/// Complementary Kolmogorov distribution `Q_KS(lambda)`.
fn kolmogorov_q(lambda: f64) -> f64 {
    if lambda < 1e-3 {
        return 1.0;
    }
    let a2 = -2.0 * lambda * lambda;
    let mut sum = 0.0;
    let mut sign = 1.0;
    let mut prev_term = 0.0;
    for j in 1..=100 {
        let j = f64::from(j);
        let term = sign * 2.0 * (a2 * j * j).exp();
        sum += term;
        if term.abs() <= 1e-10 * prev_term || term.abs() <= 1e-12 * sum.abs() {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        prev_term = term.abs();
    }
    // Series failed to converge; only happens for tiny lambda.
    1.0
}

/// Compare every feature column of `train` against `eval`.
#[must_use]
pub fn detect_drift(
    feature_names: &[String],
    train: &FeatureMatrix,
    eval: &FeatureMatrix,
    p_value_threshold: f64,
) -> DriftReport {
    let columns = feature_names
        .iter()
        .zip(train.axis_iter(Axis(1)).zip(eval.axis_iter(Axis(1))))
        .map(|(name, (tr, ev))| {
            let (statistic, p_value) = ks_two_sample(&tr.to_vec(), &ev.to_vec());
            ColumnDrift { feature: name.clone(), statistic, p_value, drifted: p_value < p_value_threshold }
        })
        .collect();
    DriftReport { p_value_threshold, columns }
}
