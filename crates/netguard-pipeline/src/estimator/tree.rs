//! CART decision trees (Gini impurity) and a bagged random forest.

use super::{Estimator, check_fit_shapes, check_width, decode_payload};
use crate::error::{PipelineError, PipelineResult};
use crate::transform::{FeatureMatrix, TargetVector};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        label: u8,
        n_samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict_row(&self, row: ndarray::ArrayView1<'_, f64>) -> u8 {
        let mut node = self;
        loop {
            match node {
                Self::Leaf { label, .. } => return *label,
                Self::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

/// Grows one tree over the sample rows in `indices`.
struct Grower<'a> {
    features: &'a FeatureMatrix,
    labels: &'a TargetVector,
    max_depth: usize,
    min_samples_split: usize,
    max_features: Option<usize>,
}

impl Grower<'_> {
    fn grow(&self, indices: &[usize], depth: usize, rng: &mut ChaCha8Rng) -> TreeNode {
        let positives = indices.iter().filter(|&&i| self.labels[i] == 1).count();
        let n = indices.len();
        let leaf = TreeNode::Leaf { label: u8::from(positives * 2 > n), n_samples: n };

        if depth >= self.max_depth || n < self.min_samples_split || positives == 0 || positives == n {
            return leaf;
        }
        // A zero-gain split is still taken: interactions such as XOR only pay
        // off one level down. Depth and sample limits bound the recursion.
        let Some(best) = self.best_split(indices, rng) else {
            return leaf;
        };

        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| self.features[[i, best.feature]] <= best.threshold);
        TreeNode::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.grow(&left, depth + 1, rng)),
            right: Box::new(self.grow(&right, depth + 1, rng)),
        }
    }

    fn candidate_features(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        let n_features = self.features.ncols();
        match self.max_features {
            Some(k) if k < n_features => {
                let mut chosen = sample(rng, n_features, k).into_vec();
                chosen.sort_unstable();
                chosen
            }
            _ => (0..n_features).collect(),
        }
    }

    fn best_split(&self, indices: &[usize], rng: &mut ChaCha8Rng) -> Option<BestSplit> {
        let n = indices.len();
        let total_pos = indices.iter().filter(|&&i| self.labels[i] == 1).count();
        let mut best: Option<BestSplit> = None;
        let mut sorted = indices.to_vec();

        for feature in self.candidate_features(rng) {
            sorted.sort_by(|&a, &b| self.features[[a, feature]].total_cmp(&self.features[[b, feature]]));
            let mut left_pos = 0usize;
            for k in 1..n {
                if self.labels[sorted[k - 1]] == 1 {
                    left_pos += 1;
                }
                let lo = self.features[[sorted[k - 1], feature]];
                let hi = self.features[[sorted[k], feature]];
                if hi <= lo {
                    continue;
                }
                let impurity = (k as f64 * gini(left_pos, k) + (n - k) as f64 * gini(total_pos - left_pos, n - k))
                    / n as f64;
                if best.as_ref().is_none_or(|b| impurity < b.impurity) {
                    best = Some(BestSplit { feature, threshold: (lo + hi) / 2.0, impurity });
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub max_depth: usize,
    pub min_samples_split: usize,
    n_features: usize,
    root: Option<TreeNode>,
}

impl DecisionTree {
    pub const ALGORITHM: &'static str = "decision_tree";

    #[must_use]
    pub fn new(max_depth: usize, min_samples_split: usize) -> Self {
        Self { max_depth, min_samples_split, n_features: 0, root: None }
    }

    pub fn decode(version: u16, payload: &[u8]) -> PipelineResult<Self> {
        decode_payload(Self::ALGORITHM, version, payload)
    }

    fn fit_rows(
        &mut self,
        features: &FeatureMatrix,
        labels: &TargetVector,
        rows: &[usize],
        max_features: Option<usize>,
        rng: &mut ChaCha8Rng,
    ) {
        let grower = Grower {
            features,
            labels,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            max_features,
        };
        self.n_features = features.ncols();
        self.root = Some(grower.grow(rows, 0, rng));
    }

    fn root(&self) -> PipelineResult<&TreeNode> {
        self.root.as_ref().ok_or_else(|| PipelineError::Estimator("decision tree is not fitted".to_string()))
    }
}

impl Estimator for DecisionTree {
    fn algorithm(&self) -> &'static str {
        Self::ALGORITHM
    }

    fn fit(&mut self, features: &FeatureMatrix, labels: &TargetVector) -> PipelineResult<()> {
        check_fit_shapes(features, labels)?;
        let rows: Vec<usize> = (0..features.nrows()).collect();
        // A single tree considers every feature, so the rng is never consulted.
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        self.fit_rows(features, labels, &rows, None, &mut rng);
        Ok(())
    }

    fn predict(&self, features: &FeatureMatrix) -> PipelineResult<TargetVector> {
        let root = self.root()?;
        check_width(self.n_features, features)?;
        Ok(features.rows().into_iter().map(|row| root.predict_row(row)).collect())
    }

    fn encode(&self) -> PipelineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Bootstrap-aggregated trees with per-split feature subsampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub const ALGORITHM: &'static str = "random_forest";

    #[must_use]
    pub fn new(n_trees: usize, max_depth: usize, min_samples_split: usize, seed: u64) -> Self {
        Self { n_trees, max_depth, min_samples_split, seed, n_features: 0, trees: Vec::new() }
    }

    pub fn decode(version: u16, payload: &[u8]) -> PipelineResult<Self> {
        decode_payload(Self::ALGORITHM, version, payload)
    }
}

impl Estimator for RandomForest {
    fn algorithm(&self) -> &'static str {
        Self::ALGORITHM
    }

    fn fit(&mut self, features: &FeatureMatrix, labels: &TargetVector) -> PipelineResult<()> {
        check_fit_shapes(features, labels)?;
        let n_rows = features.nrows();
        let max_features = (features.ncols() as f64).sqrt().ceil().max(1.0) as usize;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        self.trees = (0..self.n_trees)
            .map(|_| {
                let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                let mut tree = DecisionTree::new(self.max_depth, self.min_samples_split);
                tree.fit_rows(features, labels, &rows, Some(max_features), &mut rng);
                tree
            })
            .collect();
        self.n_features = features.ncols();
        Ok(())
    }

    fn predict(&self, features: &FeatureMatrix) -> PipelineResult<TargetVector> {
        if self.trees.is_empty() {
            return Err(PipelineError::Estimator("random forest is not fitted".to_string()));
        }
        check_width(self.n_features, features)?;
        let roots = self.trees.iter().map(DecisionTree::root).collect::<PipelineResult<Vec<_>>>()?;
        Ok(features
            .rows()
            .into_iter()
            .map(|row| {
                let votes = roots.iter().filter(|root| root.predict_row(row) == 1).count();
                u8::from(votes * 2 > roots.len())
            })
            .collect())
    }

    fn encode(&self) -> PipelineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
