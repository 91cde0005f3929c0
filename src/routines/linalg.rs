use crate::error::{Result, WeightError};
use linfa_linalg::cholesky::Cholesky;
use linfa_linalg::triangular::{SolveTriangular, UPLO};
use ndarray::{Array1, Array2, Axis};

/// Solution of a symmetric positive definite system, with the regularization that was needed.
#[derive(Debug, Clone)]
pub struct RegularizedSolve {
    pub solution: Array2<f64>,
    /// Ridge added to the diagonal, zero when the matrix was well conditioned.
    pub ridge: f64,
    /// Condition estimate of the matrix that was finally factorized.
    pub condition: f64,
}

/// Squared ratio of the extreme diagonal entries of a Cholesky factor.
///
/// A cheap lower bound on the 2-norm condition number of `L Lᵀ`.
pub fn condition_estimate(l: &Array2<f64>) -> f64 {
    let diag = l.diag();
    let max = diag.iter().fold(0.0_f64, |acc, &d| acc.max(d.abs()));
    let min = diag.iter().fold(f64::INFINITY, |acc, &d| acc.min(d.abs()));
    if min == 0.0 {
        f64::INFINITY
    } else {
        (max / min).powi(2)
    }
}

/// Solve `a x = b` by Cholesky factorization. Returns the solution and the condition estimate.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array2<f64>) -> Result<(Array2<f64>, f64)> {
    let l = a.cholesky()?;
    let condition = condition_estimate(&l);
    let z = l.solve_triangular(b, UPLO::Lower)?;
    let x = l.t().solve_triangular(&z, UPLO::Upper)?;
    Ok((x, condition))
}

/// Solve a symmetric system, adding a growing ridge to the diagonal when the matrix is not
/// positive definite or its condition estimate exceeds `max_condition`.
///
/// The ridge starts at `base_ridge` times the mean diagonal magnitude and grows tenfold per
/// attempt.
pub fn regularized_solve(
    a: &Array2<f64>,
    b: &Array2<f64>,
    base_ridge: f64,
    max_condition: f64,
    max_attempts: usize,
) -> Result<RegularizedSolve> {
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return Err(WeightError::ShapeMismatch(format!(
            "cannot solve a {:?} system with a {:?} right-hand side",
            a.dim(),
            b.dim()
        )));
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(WeightError::InvalidInput(
            "linear system has non-finite entries".to_string(),
        ));
    }

    let mut condition = f64::INFINITY;
    match cholesky_solve(a, b) {
        Ok((solution, cond)) if cond <= max_condition && is_finite(&solution) => {
            return Ok(RegularizedSolve {
                solution,
                ridge: 0.0,
                condition: cond,
            });
        }
        Ok((_, cond)) => condition = cond,
        Err(err) => tracing::trace!("Cholesky factorization failed: {}", err),
    }

    let n = a.nrows().max(1) as f64;
    let scale = a.diag().iter().map(|d| d.abs()).sum::<f64>() / n;
    let scale = if scale > 0.0 { scale } else { 1.0 };
    let mut ridge = base_ridge.max(f64::EPSILON) * scale;

    for attempt in 0..max_attempts {
        let shifted = a + &(Array2::<f64>::eye(a.nrows()) * ridge);
        match cholesky_solve(&shifted, b) {
            Ok((solution, cond)) if cond <= max_condition && is_finite(&solution) => {
                tracing::trace!(
                    "Regularized solve succeeded at attempt {} with ridge {:e} (condition {:e})",
                    attempt + 1,
                    ridge,
                    cond
                );
                return Ok(RegularizedSolve {
                    solution,
                    ridge,
                    condition: cond,
                });
            }
            Ok((_, cond)) => condition = cond,
            Err(err) => tracing::trace!("Cholesky failed with ridge {:e}: {}", ridge, err),
        }
        ridge *= 10.0;
    }

    Err(WeightError::SingularHessian { condition })
}

/// Solve for a single right-hand side vector.
pub fn regularized_solve_vec(
    a: &Array2<f64>,
    b: &Array1<f64>,
    base_ridge: f64,
    max_condition: f64,
    max_attempts: usize,
) -> Result<(Array1<f64>, f64, f64)> {
    let rhs = b.clone().insert_axis(Axis(1));
    let solved = regularized_solve(a, &rhs, base_ridge, max_condition, max_attempts)?;
    let solution = solved.solution.column(0).to_owned();
    Ok((solution, solved.ridge, solved.condition))
}

fn is_finite(a: &Array2<f64>) -> bool {
    a.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn solves_well_conditioned_system() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let b = array![1.0, 2.0];
        let (x, ridge, _) = regularized_solve_vec(&a, &b, 1e-8, 1e12, 8).unwrap();
        assert_eq!(ridge, 0.0);
        let residual = a.dot(&x) - &b;
        assert!(residual.iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn singular_system_gets_ridge() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let b = array![1.0, 1.0];
        let (x, ridge, condition) = regularized_solve_vec(&a, &b, 1e-8, 1e12, 12).unwrap();
        assert!(ridge > 0.0);
        assert!(condition <= 1e12);
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn non_finite_system_is_rejected() {
        let a = array![[f64::NAN, 0.0], [0.0, 1.0]];
        let b = array![1.0, 1.0];
        assert!(regularized_solve_vec(&a, &b, 1e-8, 1e12, 8).is_err());
    }

    #[test]
    fn condition_estimate_of_identity_is_one() {
        assert_eq!(condition_estimate(&Array2::eye(3)), 1.0);
    }
}
