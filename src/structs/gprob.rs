use crate::error::{Result, WeightError};
use crate::structs::groups::{GroupIndex, GroupLabel};
use ndarray::{Array2, ArrayView1, Axis};

/// Rows must sum to one within this tolerance before they are renormalized.
const ROW_TOLERANCE: f64 = 1e-6;

/// Soft group-membership posteriors for the training set.
///
/// An `n × k` row-stochastic matrix whose columns follow the canonical group ordering.
/// Typically produced by an auxiliary classifier predicting the group from the features.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupProbabilities {
    matrix: Array2<f64>,
}

impl GroupProbabilities {
    /// Validate and wrap a posterior matrix.
    ///
    /// Entries must be finite and non-negative and every row must sum to one; rows are
    /// renormalized afterwards so that the sum is exact.
    pub fn new(mut matrix: Array2<f64>) -> Result<Self> {
        if matrix.ncols() == 0 {
            return Err(WeightError::ShapeMismatch(
                "group probabilities need at least one column".to_string(),
            ));
        }
        if matrix.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(WeightError::InvalidInput(
                "group probabilities must be finite and non-negative".to_string(),
            ));
        }
        for (i, mut row) in matrix.axis_iter_mut(Axis(0)).enumerate() {
            let sum = row.sum();
            if (sum - 1.0).abs() > ROW_TOLERANCE {
                return Err(WeightError::InvalidProbabilityVector(format!(
                    "row {} of the group probabilities sums to {}",
                    i, sum
                )));
            }
            row /= sum;
        }
        Ok(Self { matrix })
    }

    /// One-hot posteriors built from observed labels.
    pub fn from_labels(index: &GroupIndex, groups: &[GroupLabel]) -> Result<Self> {
        let positions = index.positions(groups)?;
        let mut matrix = Array2::zeros((groups.len(), index.len()));
        for (i, &j) in positions.iter().enumerate() {
            matrix[[i, j]] = 1.0;
        }
        Ok(Self { matrix })
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.matrix.row(i)
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ngroups(&self) -> usize {
        self.matrix.ncols()
    }

    /// Blend toward `target`: `(1 - alpha) * self + alpha * target`.
    ///
    /// With `alpha = 1` the result equals `target`. Used to anneal a soft posterior toward
    /// hard labels between optimization runs.
    pub fn anneal(&self, target: &GroupProbabilities, alpha: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(WeightError::InvalidInput(format!(
                "annealing factor must be in [0, 1], got {}",
                alpha
            )));
        }
        if self.matrix.dim() != target.matrix.dim() {
            return Err(WeightError::ShapeMismatch(format!(
                "cannot anneal {:?} toward {:?}",
                self.matrix.dim(),
                target.matrix.dim()
            )));
        }
        let matrix = &self.matrix * (1.0 - alpha) + &target.matrix * alpha;
        Ok(Self { matrix })
    }
}
