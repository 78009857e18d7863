//! Gradient-boosted regression trees for the session-duration predictor.
//!
//! Squared-error boosting: start from the target mean, then fit each stage's
//! tree to the current residuals and add it back scaled by the learning rate.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::tree::{RegressionTree, TreeParams};
use super::ModelError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostParams {
    pub n_stages: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_stages: 100,
            max_depth: 5,
            min_samples_split: 2,
            learning_rate: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    /// Normalized impurity-decrease importance per feature column.
    pub feature_importances: Vec<f64>,
}

impl GradientBoostedTrees {
    /// Fit on standardized session-feature rows and duration targets (seconds).
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: &BoostParams) -> Result<Self, ModelError> {
        if rows.is_empty() || rows.len() != targets.len() {
            return Err(ModelError::NoTrainingData);
        }
        let n = rows.len();
        let n_features = rows[0].len();
        let init = targets.iter().sum::<f64>() / n as f64;

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            max_features: None,
        };
        let indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut importances = vec![0.0; n_features];

        let mut predictions = vec![init; n];
        let mut residuals = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_stages);

        for _ in 0..params.n_stages {
            for i in 0..n {
                residuals[i] = targets[i] - predictions[i];
            }
            let tree = RegressionTree::fit(
                rows,
                &residuals,
                &indices,
                &tree_params,
                &mut rng,
                &mut importances,
            );
            for (pred, row) in predictions.iter_mut().zip(rows) {
                *pred += params.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in &mut importances {
                *v /= total;
            }
        }

        Ok(GradientBoostedTrees {
            init,
            learning_rate: params.learning_rate,
            trees,
            feature_importances: importances,
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let boosted: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        self.init + self.learning_rate * boosted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> BoostParams {
        BoostParams {
            n_stages: 50,
            max_depth: 3,
            min_samples_split: 2,
            learning_rate: 0.1,
            seed: 42,
        }
    }

    #[test]
    fn test_constant_target_predicts_mean() {
        let rows = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![1800.0, 1800.0, 1800.0];
        let model = GradientBoostedTrees::fit(&rows, &targets, &small_params()).unwrap();
        assert!((model.predict_row(&[2.0]) - 1800.0).abs() < 1e-9);
    }

    #[test]
    fn test_step_function_learned() {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for i in 0..20 {
            rows.push(vec![i as f64]);
            targets.push(if i < 10 { 600.0 } else { 3600.0 });
        }
        let model = GradientBoostedTrees::fit(&rows, &targets, &small_params()).unwrap();
        assert!((model.predict_row(&[2.0]) - 600.0).abs() < 50.0);
        assert!((model.predict_row(&[15.0]) - 3600.0).abs() < 50.0);
    }

    #[test]
    fn test_fit_deterministic() {
        let rows: Vec<Vec<f64>> = (0..12).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let targets: Vec<f64> = (0..12).map(|i| (i * 100) as f64).collect();
        let a = GradientBoostedTrees::fit(&rows, &targets, &small_params()).unwrap();
        let b = GradientBoostedTrees::fit(&rows, &targets, &small_params()).unwrap();
        assert_eq!(a.predict_row(&[5.0, 1.0]), b.predict_row(&[5.0, 1.0]));
    }

    #[test]
    fn test_serde_roundtrip() {
        let rows = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![100.0, 200.0, 1000.0, 1100.0];
        let model = GradientBoostedTrees::fit(&rows, &targets, &small_params()).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: GradientBoostedTrees = serde_json::from_str(&json).unwrap();
        for row in &rows {
            assert_eq!(restored.predict_row(row), model.predict_row(row));
        }
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(
            GradientBoostedTrees::fit(&[], &[], &small_params()),
            Err(ModelError::NoTrainingData)
        ));
    }
}
