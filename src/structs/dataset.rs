use crate::error::{Result, WeightError};
use crate::structs::groups::GroupLabel;
use ndarray::{Array1, Array2};

/// One data split: features, targets and observed group labels.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f64>,
    y: Array1<f64>,
    groups: Vec<GroupLabel>,
}

impl Dataset {
    /// Row counts of `x`, `y` and `groups` must agree and all values must be finite.
    pub fn new(x: Array2<f64>, y: Array1<f64>, groups: Vec<GroupLabel>) -> Result<Self> {
        if x.nrows() != y.len() || x.nrows() != groups.len() {
            return Err(WeightError::ShapeMismatch(format!(
                "x has {} rows, y has {} entries and g has {} labels",
                x.nrows(),
                y.len(),
                groups.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(WeightError::ShapeMismatch("split is empty".to_string()));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(WeightError::InvalidInput(
                "features and targets must be finite".to_string(),
            ));
        }
        Ok(Self { x, y, groups })
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn groups(&self) -> &[GroupLabel] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }
}
