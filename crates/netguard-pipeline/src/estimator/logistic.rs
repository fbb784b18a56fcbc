//! L2-regularized logistic regression fit by batch gradient descent.

use super::{Estimator, check_fit_shapes, check_width, decode_payload};
use crate::error::{PipelineError, PipelineResult};
use crate::transform::{FeatureMatrix, TargetVector};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub learning_rate: f64,
    pub max_iter: usize,
    /// L2 penalty
    pub alpha: f64,
    pub tol: f64,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl LogisticRegression {
    pub const ALGORITHM: &'static str = "logistic_regression";

    #[must_use]
    pub fn new(learning_rate: f64, max_iter: usize, alpha: f64) -> Self {
        Self { learning_rate, max_iter, alpha, tol: 1e-6, coefficients: None, intercept: 0.0 }
    }

    fn sigmoid(z: f64) -> f64 {
        1.0 / (1.0 + (-z).exp())
    }

    /// Probability of the not-safe class for each row.
    pub fn predict_proba(&self, features: &FeatureMatrix) -> PipelineResult<Array1<f64>> {
        let weights = self
            .coefficients
            .as_ref()
            .ok_or_else(|| PipelineError::Estimator("logistic regression is not fitted".to_string()))?;
        check_width(weights.len(), features)?;
        Ok((features.dot(weights) + self.intercept).mapv(Self::sigmoid))
    }

    pub fn decode(version: u16, payload: &[u8]) -> PipelineResult<Self> {
        decode_payload(Self::ALGORITHM, version, payload)
    }
}

impl Estimator for LogisticRegression {
    fn algorithm(&self) -> &'static str {
        Self::ALGORITHM
    }

    fn fit(&mut self, features: &FeatureMatrix, labels: &TargetVector) -> PipelineResult<()> {
        check_fit_shapes(features, labels)?;
        let n_samples = features.nrows() as f64;
        let y = labels.mapv(f64::from);

        let mut weights = Array1::<f64>::zeros(features.ncols());
        let mut bias = 0.0;
        for _ in 0..self.max_iter {
            let predictions = (features.dot(&weights) + bias).mapv(Self::sigmoid);
            let errors = &predictions - &y;
            let dw = features.t().dot(&errors) / n_samples + &weights * self.alpha;
            let db = errors.sum() / n_samples;

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }
            weights = weights - dw * self.learning_rate;
            bias -= self.learning_rate * db;
        }

        if weights.iter().any(|w| !w.is_finite()) || !bias.is_finite() {
            return Err(PipelineError::Estimator("logistic regression diverged".to_string()));
        }
        self.coefficients = Some(weights);
        self.intercept = bias;
        Ok(())
    }

    fn predict(&self, features: &FeatureMatrix) -> PipelineResult<TargetVector> {
        Ok(self.predict_proba(features)?.mapv(|p| u8::from(p >= 0.5)))
    }

    fn encode(&self) -> PipelineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_predict_proba_orders_classes() {
        let x = array![[0.0, 0.0], [10.0, 10.0]];
        let y = array![0u8, 1];
        let mut model = LogisticRegression::new(0.1, 500, 0.0);
        model.fit(&x, &y).unwrap();

        let proba = model.predict_proba(&x).unwrap();
        assert!(proba[0] < 0.5);
        assert!(proba[1] > 0.5);
    }

    #[test]
    fn test_unfitted_model_refuses_to_predict() {
        let model = LogisticRegression::new(0.1, 10, 0.0);
        assert!(model.predict(&array![[1.0]]).is_err());
    }

    #[test]
    fn test_fit_rejects_misaligned_labels() {
        let mut model = LogisticRegression::new(0.1, 10, 0.0);
        assert!(model.fit(&array![[1.0], [2.0]], &array![1u8]).is_err());
    }
}
