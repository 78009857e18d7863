//! Bagged-tree classifier for the skip predictor.
//!
//! Each tree trains on a bootstrap sample with √d feature subsampling per
//! split. Leaf values are positive fractions, so the forest's averaged
//! prediction is a probability in [0, 1]. Fitting is deterministic: every
//! tree's RNG is seeded from the base seed plus its index, so rayon's
//! scheduling order cannot change the result.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{RegressionTree, TreeParams};
use super::ModelError;

/// Fixed ensemble shape: shallow-ish trees, many of them, to avoid memorizing
/// a long-tailed artist/track vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaggedForest {
    trees: Vec<RegressionTree>,
    /// Normalized impurity-decrease importance per feature column.
    pub feature_importances: Vec<f64>,
}

impl BaggedForest {
    /// Fit the forest on standardized feature rows and 0/1 targets.
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: &ForestParams) -> Result<Self, ModelError> {
        if rows.is_empty() || rows.len() != targets.len() {
            return Err(ModelError::NoTrainingData);
        }
        let n = rows.len();
        let n_features = rows[0].len();
        let max_features = ((n_features as f64).sqrt().round() as usize).max(1);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            max_features: Some(max_features),
        };

        let fitted: Vec<(RegressionTree, Vec<f64>)> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut importances = vec![0.0; n_features];
                let tree = RegressionTree::fit(
                    rows,
                    targets,
                    &indices,
                    &tree_params,
                    &mut rng,
                    &mut importances,
                );
                (tree, importances)
            })
            .collect();

        let mut feature_importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(params.n_trees);
        for (tree, importances) in fitted {
            for (total, gain) in feature_importances.iter_mut().zip(&importances) {
                *total += gain;
            }
            trees.push(tree);
        }
        let total: f64 = feature_importances.iter().sum();
        if total > 0.0 {
            for v in &mut feature_importances {
                *v /= total;
            }
        }

        Ok(BaggedForest {
            trees,
            feature_importances,
        })
    }

    /// Probability of the positive class: mean of per-tree leaf fractions.
    pub fn predict_probability(&self, row: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        sum / self.trees.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> ForestParams {
        ForestParams {
            n_trees: 25,
            max_depth: 4,
            min_samples_split: 2,
            seed: 42,
        }
    }

    /// Two well-separated clusters in feature 0.
    fn separable() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for i in 0..20 {
            rows.push(vec![i as f64 * 0.1, 1.0]);
            targets.push(0.0);
            rows.push(vec![10.0 + i as f64 * 0.1, 1.0]);
            targets.push(1.0);
        }
        (rows, targets)
    }

    #[test]
    fn test_probability_in_unit_interval() {
        let (rows, targets) = separable();
        let forest = BaggedForest::fit(&rows, &targets, &small_params()).unwrap();
        for row in &rows {
            let p = forest.predict_probability(row);
            assert!((0.0..=1.0).contains(&p), "p = {p}");
        }
    }

    #[test]
    fn test_separable_classes_learned() {
        let (rows, targets) = separable();
        let forest = BaggedForest::fit(&rows, &targets, &small_params()).unwrap();
        assert!(forest.predict_probability(&[0.5, 1.0]) < 0.3);
        assert!(forest.predict_probability(&[10.5, 1.0]) > 0.7);
    }

    #[test]
    fn test_fit_deterministic() {
        let (rows, targets) = separable();
        let a = BaggedForest::fit(&rows, &targets, &small_params()).unwrap();
        let b = BaggedForest::fit(&rows, &targets, &small_params()).unwrap();
        for row in rows.iter().take(5) {
            assert_eq!(a.predict_probability(row), b.predict_probability(row));
        }
    }

    #[test]
    fn test_importances_normalized() {
        let (rows, targets) = separable();
        let forest = BaggedForest::fit(&rows, &targets, &small_params()).unwrap();
        let total: f64 = forest.feature_importances.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Feature 0 carries all the signal; feature 1 is constant
        assert!(forest.feature_importances[0] > forest.feature_importances[1]);
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(
            BaggedForest::fit(&[], &[], &small_params()),
            Err(ModelError::NoTrainingData)
        ));
    }
}
