//! CART regression tree: variance-reduction splits over numeric features.
//!
//! One tree implementation serves both ensembles. For 0/1 targets a leaf's
//! mean is the positive fraction, so bagged trees average to a probability;
//! for residual targets the same machinery does least-squares boosting.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Growth limits for a single tree.
#[derive(Debug, Clone)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Number of features considered at each split. None = all features.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    /// Sum of child SSEs after the split.
    children_sse: f64,
}

impl RegressionTree {
    /// Fit a tree on `rows[indices]` (duplicates allowed — bootstrap samples
    /// pass repeated indices). Impurity decrease per feature is accumulated
    /// into `importances`.
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        indices: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> Self {
        let root = build(rows, targets, indices, 0, params, rng, importances);
        RegressionTree { root }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

fn build(
    rows: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
    depth: usize,
    params: &TreeParams,
    rng: &mut StdRng,
    importances: &mut [f64],
) -> Node {
    let n = indices.len();
    let (sum, sum_sq) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
        (s + targets[i], sq + targets[i] * targets[i])
    });
    let mean = sum / n as f64;
    let sse = sum_sq - sum * sum / n as f64;

    if depth >= params.max_depth || n < params.min_samples_split || sse <= 1e-12 {
        return Node::Leaf { value: mean };
    }

    let Some(split) = find_best_split(rows, targets, indices, params, rng) else {
        return Node::Leaf { value: mean };
    };

    let gain = sse - split.children_sse;
    if gain <= 1e-12 {
        return Node::Leaf { value: mean };
    }
    importances[split.feature] += gain;

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| rows[i][split.feature] <= split.threshold);

    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(build(
            rows, targets, &left_idx, depth + 1, params, rng, importances,
        )),
        right: Box::new(build(
            rows, targets, &right_idx, depth + 1, params, rng, importances,
        )),
    }
}

/// Scan candidate features for the split minimizing the summed child SSE.
/// Candidate thresholds are midpoints between distinct consecutive values.
fn find_best_split(
    rows: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
    params: &TreeParams,
    rng: &mut StdRng,
) -> Option<BestSplit> {
    let n_features = rows[indices[0]].len();
    let features: Vec<usize> = match params.max_features {
        Some(k) if k < n_features => rand::seq::index::sample(rng, n_features, k).into_vec(),
        _ => (0..n_features).collect(),
    };

    let mut best: Option<BestSplit> = None;

    for &feature in &features {
        let mut pairs: Vec<(f64, f64)> = indices
            .iter()
            .map(|&i| (rows[i][feature], targets[i]))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = pairs.len();
        let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
        let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();

        // Running left-side sums; evaluate each boundary between distinct values
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for i in 1..n {
            let (value, target) = pairs[i - 1];
            left_sum += target;
            left_sq += target * target;

            if pairs[i].0 <= value {
                continue;
            }

            let left_n = i as f64;
            let right_n = (n - i) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;

            let left_sse = left_sq - left_sum * left_sum / left_n;
            let right_sse = right_sq - right_sum * right_sum / right_n;
            let children_sse = left_sse + right_sse;

            if best
                .as_ref()
                .map_or(true, |b| children_sse < b.children_sse)
            {
                best = Some(BestSplit {
                    feature,
                    threshold: (value + pairs[i].0) / 2.0,
                    children_sse,
                });
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            min_samples_split: 2,
            max_features: None,
        }
    }

    fn fit(rows: &[Vec<f64>], targets: &[f64], max_depth: usize) -> RegressionTree {
        let indices: Vec<usize> = (0..rows.len()).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let mut importances = vec![0.0; rows[0].len()];
        RegressionTree::fit(rows, targets, &indices, &params(max_depth), &mut rng, &mut importances)
    }

    #[test]
    fn test_perfect_split_on_one_feature() {
        let rows = vec![
            vec![1.0, 5.0],
            vec![2.0, 5.0],
            vec![10.0, 5.0],
            vec![11.0, 5.0],
        ];
        let targets = vec![0.0, 0.0, 1.0, 1.0];
        let tree = fit(&rows, &targets, 3);
        assert_eq!(tree.predict_row(&[1.5, 5.0]), 0.0);
        assert_eq!(tree.predict_row(&[10.5, 5.0]), 1.0);
    }

    #[test]
    fn test_constant_target_single_leaf() {
        let rows = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![4.0, 4.0, 4.0];
        let tree = fit(&rows, &targets, 5);
        assert_eq!(tree.predict_row(&[99.0]), 4.0);
    }

    #[test]
    fn test_depth_zero_predicts_mean() {
        let rows = vec![vec![1.0], vec![2.0]];
        let targets = vec![0.0, 1.0];
        let tree = fit(&rows, &targets, 0);
        assert_eq!(tree.predict_row(&[1.0]), 0.5);
        assert_eq!(tree.predict_row(&[2.0]), 0.5);
    }

    #[test]
    fn test_importances_credit_splitting_feature() {
        let rows = vec![
            vec![0.0, 7.0],
            vec![0.0, 8.0],
            vec![1.0, 7.5],
            vec![1.0, 8.5],
        ];
        let targets = vec![10.0, 10.0, 20.0, 20.0];
        let indices: Vec<usize> = (0..rows.len()).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let mut importances = vec![0.0; 2];
        let tree = RegressionTree::fit(
            &rows, &targets, &indices, &params(3), &mut rng, &mut importances,
        );
        assert!(importances[0] > 0.0);
        assert_eq!(importances[1], 0.0);
        assert_eq!(tree.predict_row(&[0.0, 7.2]), 10.0);
    }

    #[test]
    fn test_serde_roundtrip() {
        let rows = vec![vec![1.0], vec![2.0], vec![10.0], vec![12.0]];
        let targets = vec![1.0, 1.0, 5.0, 5.0];
        let tree = fit(&rows, &targets, 4);
        let json = serde_json::to_string(&tree).unwrap();
        let restored: RegressionTree = serde_json::from_str(&json).unwrap();
        for row in &rows {
            assert_eq!(restored.predict_row(row), tree.predict_row(row));
        }
    }
}
