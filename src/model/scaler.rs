//! Per-feature standardization state, fitted once at training time and reused
//! unmodified for every later transform.

use serde::{Deserialize, Serialize};

use super::ModelError;

/// Mean/std normalization over feature columns. Population standard deviation;
/// a zero-variance column scales by 1.0 so constant features pass through
/// centered instead of dividing by zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        !self.means.is_empty()
    }

    /// Fit mean and std per column. Called exactly once per model training;
    /// inference must never re-fit (a size-1 batch would zero every feature).
    pub fn fit(&mut self, rows: &[Vec<f64>]) -> Result<(), ModelError> {
        let n = rows.len();
        if n == 0 {
            return Err(ModelError::NoTrainingData);
        }
        let cols = rows[0].len();

        let mut means = vec![0.0; cols];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n as f64;
        }

        let mut stds = vec![0.0; cols];
        for row in rows {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                let d = v - m;
                *s += d * d;
            }
        }
        for s in &mut stds {
            *s = (*s / n as f64).sqrt();
            if *s == 0.0 {
                *s = 1.0;
            }
        }

        self.means = means;
        self.stds = stds;
        Ok(())
    }

    /// Standardize one row against the fitted statistics.
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        if !self.is_fitted() {
            return Err(ModelError::NotFitted);
        }
        Ok(row
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}
