//! Euclidean projection onto the probability simplex

use crate::error::{Result, WeightError};
use ndarray::Array1;
use ndarray_stats::QuantileExt;

/// Project a vector onto `{q : q_i >= 0, Σ q_i = 1}`.
///
/// Uses the sort-and-threshold method: sort descending, find the largest `ρ` with
/// `u_ρ > (Σ_{j<=ρ} u_j - 1) / (ρ + 1)`, and shift every entry down by that threshold,
/// clipping at zero.
///
/// Input that is already on the simplex is returned unchanged (up to rounding). Input whose
/// entries are all equal, including the zero vector, maps to the uniform distribution.
///
/// # Errors
///
/// Returns [WeightError::InvalidInput] if the vector is empty or has non-finite entries.
pub fn project(v: &Array1<f64>) -> Result<Array1<f64>> {
    let k = v.len();
    if k == 0 {
        return Err(WeightError::InvalidInput(
            "cannot project an empty vector onto the simplex".to_string(),
        ));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(WeightError::InvalidInput(format!(
            "cannot project a vector with non-finite entries: {}",
            v
        )));
    }

    // Work relative to the largest entry so that `- 1` below is never lost to rounding
    let max = *v.max_skipnan();
    let shifted = v.mapv(|x| x - max);
    let mut u = shifted.to_vec();
    u.sort_unstable_by(|a, b| b.total_cmp(a));

    // ρ = 0 always qualifies
    let mut cumsum = 0.0;
    let mut theta = u[0] - 1.0;
    for (j, &uj) in u.iter().enumerate() {
        cumsum += uj;
        let t = (cumsum - 1.0) / (j + 1) as f64;
        if uj > t {
            theta = t;
        }
    }

    Ok(shifted.mapv(|x| (x - theta).max(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn assert_feasible(p: &Array1<f64>) {
        assert!(p.iter().all(|&x| x >= 0.0), "negative entry in {}", p);
        assert!((p.sum() - 1.0).abs() < 1e-12, "sum of {} is {}", p, p.sum());
    }

    #[test]
    fn projects_outside_point() {
        let p = project(&array![0.8, 0.6]).unwrap();
        assert_feasible(&p);
        assert!((p[0] - 0.6).abs() < 1e-12);
        assert!((p[1] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn clips_to_vertex() {
        let p = project(&array![2.0, -1.0, 0.0]).unwrap();
        assert_eq!(p, array![1.0, 0.0, 0.0]);
    }

    #[test]
    fn negative_vector_is_not_just_clipped() {
        // Clipping would give the zero vector; the projection is a proper distribution
        let p = project(&array![-0.1, -0.3, -0.2]).unwrap();
        assert_feasible(&p);
        assert!(p[0] > p[2] && p[2] > p[1]);
    }

    #[test]
    fn idempotent_on_simplex() {
        let q = array![0.2, 0.5, 0.3];
        let p = project(&q).unwrap();
        for (a, b) in p.iter().zip(q.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn degenerate_inputs_give_uniform() {
        assert_eq!(project(&array![0.0, 0.0, 0.0, 0.0]).unwrap(), array![0.25, 0.25, 0.25, 0.25]);
        assert_eq!(project(&array![7.0, 7.0]).unwrap(), array![0.5, 0.5]);
    }

    #[test]
    fn large_magnitudes_stay_feasible() {
        let p = project(&array![0.0, 1e16]).unwrap();
        assert_feasible(&p);
        assert_eq!(p, array![0.0, 1.0]);

        let p = project(&array![1e17, 2e17]).unwrap();
        assert_feasible(&p);
        assert_eq!(p, array![0.0, 1.0]);

        let p = project(&array![3e16, -2e16, 1.0]).unwrap();
        assert_feasible(&p);
        assert_eq!(p, array![1.0, 0.0, 0.0]);

        let p = project(&array![-1e300, 1e300]).unwrap();
        assert_feasible(&p);

        // Nearly equal but more than one apart
        let p = project(&array![1e17, 1e17 + 16.0]).unwrap();
        assert_eq!(p, array![0.0, 1.0]);
    }

    #[test]
    fn rejects_non_finite() {
        assert!(matches!(
            project(&array![0.5, f64::NAN]),
            Err(WeightError::InvalidInput(_))
        ));
        assert!(project(&array![f64::INFINITY, 0.0]).is_err());
        assert!(project(&Array1::zeros(0)).is_err());
    }
}
