use super::{
    check_weights, ridge_gradient, ridge_hessian, weighted_gram, with_intercept,
    DifferentiableModel,
};
use crate::error::{Result, WeightError};
use crate::routines::linalg::regularized_solve_vec;
use ndarray::{s, Array1, Array2, Axis};

/// Weighted ridge least squares with an unpenalized intercept.
///
/// Minimizes `(1/n) Σ w_i ½ (y_i - b - x_iᵀ β)² + (alpha/2) ||β||²`, solved in closed form.
#[derive(Debug, Clone)]
pub struct WeightedLinearRegression {
    alpha: f64,
    theta: Option<Array1<f64>>,
}

impl Default for WeightedLinearRegression {
    fn default() -> Self {
        Self {
            alpha: 1e-3,
            theta: None,
        }
    }
}

impl WeightedLinearRegression {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, theta: None }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn intercept(&self) -> Result<f64> {
        Ok(self.params()?[0])
    }

    pub fn coefficients(&self) -> Result<Array1<f64>> {
        Ok(self.params()?.slice(s![1..]).to_owned())
    }

    fn residuals(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(Array2<f64>, Array1<f64>)> {
        let xa = with_intercept(x);
        let residual = y - &xa.dot(self.params()?);
        Ok((xa, residual))
    }
}

impl DifferentiableModel for WeightedLinearRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: &Array1<f64>) -> Result<()> {
        check_weights(x, sample_weight)?;
        if y.len() != x.nrows() {
            return Err(WeightError::ShapeMismatch(format!(
                "{} targets for {} rows",
                y.len(),
                x.nrows()
            )));
        }
        if sample_weight.sum() <= 0.0 {
            return Err(WeightError::FitFailure(
                "sample weights sum to zero".to_string(),
            ));
        }

        let xa = with_intercept(x);
        let n = xa.nrows() as f64;
        let normal = weighted_gram(&xa, sample_weight) + ridge_hessian(xa.ncols(), self.alpha);
        let rhs = xa.t().dot(&(y * sample_weight)) / n;
        let (theta, ridge, _) = regularized_solve_vec(&normal, &rhs, 1e-12, 1e14, 8)
            .map_err(|e| WeightError::FitFailure(e.to_string()))?;
        if ridge > 0.0 {
            tracing::trace!("Normal equations needed a ridge of {:e}", ridge);
        }
        self.theta = Some(theta);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(with_intercept(x).dot(self.params()?))
    }

    fn params(&self) -> Result<&Array1<f64>> {
        self.theta.as_ref().ok_or(WeightError::NotFitted)
    }

    fn per_example_loss(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array1<f64>> {
        let (_, residual) = self.residuals(x, y)?;
        Ok(residual.mapv(|r| 0.5 * r * r))
    }

    fn per_example_gradients(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array2<f64>> {
        let (xa, residual) = self.residuals(x, y)?;
        Ok(&xa * &(-residual).insert_axis(Axis(1)))
    }

    fn loss_hessian(
        &self,
        x: &Array2<f64>,
        _y: &Array1<f64>,
        w: &Array1<f64>,
    ) -> Result<Array2<f64>> {
        check_weights(x, w)?;
        Ok(weighted_gram(&with_intercept(x), w))
    }

    fn penalty_gradient(&self) -> Result<Array1<f64>> {
        Ok(ridge_gradient(self.params()?, self.alpha))
    }

    fn penalty_hessian(&self) -> Result<Array2<f64>> {
        Ok(ridge_hessian(self.params()?.len(), self.alpha))
    }
}
