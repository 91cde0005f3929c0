use super::{
    check_weights, ridge_gradient, ridge_hessian, weighted_gram, with_intercept,
    DifferentiableModel,
};
use crate::error::{Result, WeightError};
use crate::routines::linalg::regularized_solve_vec;
use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ndarray::{s, Array1, Array2, Axis};

/// Newton refinements applied after L-BFGS when the fit is not yet stationary.
const POLISH_STEPS: usize = 50;

/// Binary logistic regression with sample weights and an L2 penalty on the coefficients.
///
/// Minimizes `(1/n) Σ w_i [softplus(z_i) - y_i z_i] + (alpha/2) ||β||²` with
/// `z_i = b + x_iᵀ β`. The intercept `b` is not penalized. Parameters are laid out as
/// `[b, β_1, ..., β_p]`.
///
/// The fit runs L-BFGS and then, if the gradient is still above `tol`, a few Newton steps
/// using the analytic Hessian so that the solution is stationary to high accuracy.
#[derive(Debug, Clone)]
pub struct WeightedLogisticRegression {
    alpha: f64,
    max_iter: u64,
    tol: f64,
    warm_start: bool,
    theta: Option<Array1<f64>>,
}

impl Default for WeightedLogisticRegression {
    fn default() -> Self {
        Self {
            alpha: 1e-3,
            max_iter: 500,
            tol: 1e-10,
            warm_start: false,
            theta: None,
        }
    }
}

impl WeightedLogisticRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            ..Default::default()
        }
    }

    pub fn with_max_iter(mut self, max_iter: u64) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Start each fit from the previous solution instead of zero.
    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
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

    /// Hard 0/1 predictions at a 0.5 threshold.
    pub fn predict_labels(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict(x)?.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    fn probabilities(&self, xa: &Array2<f64>) -> Result<Array1<f64>> {
        let mut z = xa.dot(self.params()?);
        z.par_mapv_inplace(sigmoid);
        Ok(z)
    }

    fn polish(&self, problem: &LogLoss<'_>, mut theta: Array1<f64>) -> Result<Array1<f64>> {
        for _ in 0..POLISH_STEPS {
            let grad = problem.grad(&theta);
            let norm = max_abs(&grad);
            if norm <= self.tol {
                break;
            }
            let hess = problem.hessian(&theta);
            let (step, _, _) = regularized_solve_vec(&hess, &grad, 1e-10, 1e14, 8)?;
            let current = problem.objective(&theta);
            let mut scale = 1.0;
            let mut improved = false;
            for _ in 0..30 {
                let candidate = &theta - &(&step * scale);
                // near the optimum the objective is flat to rounding, so accept on the gradient too
                if problem.objective(&candidate) <= current
                    || max_abs(&problem.grad(&candidate)) < norm
                {
                    theta = candidate;
                    improved = true;
                    break;
                }
                scale *= 0.5;
            }
            if !improved {
                break;
            }
        }
        Ok(theta)
    }
}

impl DifferentiableModel for WeightedLogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: &Array1<f64>) -> Result<()> {
        check_weights(x, sample_weight)?;
        if y.len() != x.nrows() {
            return Err(WeightError::ShapeMismatch(format!(
                "{} targets for {} rows",
                y.len(),
                x.nrows()
            )));
        }
        if y.iter().any(|&v| v != 0.0 && v != 1.0) {
            return Err(WeightError::InvalidInput(
                "logistic regression targets must be 0 or 1".to_string(),
            ));
        }
        if sample_weight.sum() <= 0.0 {
            return Err(WeightError::FitFailure(
                "sample weights sum to zero".to_string(),
            ));
        }

        let xa = with_intercept(x);
        let d = xa.ncols();
        let theta0 = match (&self.theta, self.warm_start) {
            (Some(theta), true) if theta.len() == d => theta.clone(),
            _ => Array1::zeros(d),
        };

        let problem = LogLoss {
            xa: &xa,
            y,
            w: sample_weight,
            alpha: self.alpha,
        };
        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, 10)
            .with_tolerance_grad(self.tol)
            .map_err(|e| WeightError::FitFailure(e.to_string()))?;
        let start = theta0.clone();
        let theta = match Executor::new(problem.clone(), solver)
            .configure(|state| state.param(theta0).max_iters(self.max_iter))
            .run()
        {
            Ok(res) => res.state().best_param.clone().unwrap_or(start),
            Err(err) => {
                // Newton refinement below still converges from the starting point
                tracing::debug!("L-BFGS stopped early: {}", err);
                start
            }
        };

        let theta = self.polish(&problem, theta)?;
        if theta.iter().any(|v| !v.is_finite()) {
            return Err(WeightError::FitFailure(
                "logistic regression diverged".to_string(),
            ));
        }
        self.theta = Some(theta);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.probabilities(&with_intercept(x))
    }

    fn params(&self) -> Result<&Array1<f64>> {
        self.theta.as_ref().ok_or(WeightError::NotFitted)
    }

    fn per_example_loss(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array1<f64>> {
        let z = with_intercept(x).dot(self.params()?);
        Ok(ndarray::Zip::from(&z)
            .and(y)
            .map_collect(|&zi, &yi| log_loss(zi, yi)))
    }

    fn per_example_gradients(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array2<f64>> {
        let xa = with_intercept(x);
        let residual = self.probabilities(&xa)? - y;
        Ok(&xa * &residual.insert_axis(Axis(1)))
    }

    fn loss_hessian(
        &self,
        x: &Array2<f64>,
        _y: &Array1<f64>,
        w: &Array1<f64>,
    ) -> Result<Array2<f64>> {
        check_weights(x, w)?;
        let xa = with_intercept(x);
        let prob = self.probabilities(&xa)?;
        let curvature = ndarray::Zip::from(&prob)
            .and(w)
            .map_collect(|&pi, &wi| wi * pi * (1.0 - pi));
        Ok(weighted_gram(&xa, &curvature))
    }

    fn penalty_gradient(&self) -> Result<Array1<f64>> {
        Ok(ridge_gradient(self.params()?, self.alpha))
    }

    fn penalty_hessian(&self) -> Result<Array2<f64>> {
        Ok(ridge_hessian(self.params()?.len(), self.alpha))
    }
}

/// Weighted, penalized log loss in the parameter layout of [WeightedLogisticRegression].
#[derive(Clone)]
struct LogLoss<'a> {
    xa: &'a Array2<f64>,
    y: &'a Array1<f64>,
    w: &'a Array1<f64>,
    alpha: f64,
}

impl LogLoss<'_> {
    fn objective(&self, theta: &Array1<f64>) -> f64 {
        let z = self.xa.dot(theta);
        let data: f64 = z
            .iter()
            .zip(self.y.iter())
            .zip(self.w.iter())
            .map(|((&zi, &yi), &wi)| wi * log_loss(zi, yi))
            .sum();
        let penalty: f64 = theta.slice(s![1..]).iter().map(|b| b * b).sum();
        data / self.xa.nrows() as f64 + 0.5 * self.alpha * penalty
    }

    fn grad(&self, theta: &Array1<f64>) -> Array1<f64> {
        let z = self.xa.dot(theta);
        let scaled = ndarray::Zip::from(&z)
            .and(self.y)
            .and(self.w)
            .map_collect(|&zi, &yi, &wi| wi * (sigmoid(zi) - yi));
        self.xa.t().dot(&scaled) / self.xa.nrows() as f64 + ridge_gradient(theta, self.alpha)
    }

    fn hessian(&self, theta: &Array1<f64>) -> Array2<f64> {
        let z = self.xa.dot(theta);
        let curvature = ndarray::Zip::from(&z).and(self.w).map_collect(|&zi, &wi| {
            let p = sigmoid(zi);
            wi * p * (1.0 - p)
        });
        weighted_gram(self.xa, &curvature) + ridge_hessian(theta.len(), self.alpha)
    }
}

impl CostFunction for LogLoss<'_> {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        Ok(self.objective(theta))
    }
}

impl Gradient for LogLoss<'_> {
    type Param = Array1<f64>;
    type Gradient = Array1<f64>;

    fn gradient(&self, theta: &Self::Param) -> std::result::Result<Self::Gradient, ArgminError> {
        Ok(self.grad(theta))
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn max_abs(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// `log(1 + e^z) - y z`, evaluated without overflow.
fn log_loss(z: f64, y: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p() - y * z
}
