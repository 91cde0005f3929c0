#![allow(dead_code)]

use ndarray::{Array1, Array2};
use optweights::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Draw `n` group labels, group 1 with probability `p1` and group 2 otherwise.
pub fn groups(n: usize, p1: f64, rng: &mut StdRng) -> Vec<GroupLabel> {
    (0..n)
        .map(|_| if rng.gen::<f64>() < p1 { 1 } else { 2 })
        .collect()
}

fn features(n: usize, rng: &mut StdRng) -> Array2<f64> {
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array2::from_shape_fn((n, 2), |_| normal.sample(&mut *rng))
}

/// Binary classification where the two groups have shifted decision boundaries.
///
/// `P(y = 1 | x, g) = sigmoid(2 x_1 - x_2 + shift_g)` with `shift_1 = 1` and `shift_2 = -1`,
/// so a single model trained mostly on group 1 is miscalibrated for group 2.
pub fn logistic_split(n: usize, p1: f64, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let g = groups(n, p1, &mut rng);
    let x = features(n, &mut rng);
    let y = Array1::from_shape_fn(n, |i| {
        let shift = if g[i] == 1 { 1.0 } else { -1.0 };
        let z: f64 = 2.0 * x[[i, 0]] - x[[i, 1]] + shift;
        let p = 1.0 / (1.0 + (-z).exp());
        if rng.gen::<f64>() < p {
            1.0
        } else {
            0.0
        }
    });
    Dataset::new(x, y, g).unwrap()
}

/// Regression where group 2 sits `offset` above group 1:
/// `y = 1 + x_1 - 0.5 x_2 + offset·[g = 2] + ε`.
pub fn linear_split(n: usize, p1: f64, offset: f64, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let g = groups(n, p1, &mut rng);
    let x = features(n, &mut rng);
    let noise = Normal::new(0.0, 0.1).unwrap();
    let y = Array1::from_shape_fn(n, |i| {
        let shift = if g[i] == 2 { offset } else { 0.0 };
        1.0 + x[[i, 0]] - 0.5 * x[[i, 1]] + shift + noise.sample(&mut rng)
    });
    Dataset::new(x, y, g).unwrap()
}

pub fn uniform_target() -> std::collections::BTreeMap<GroupLabel, f64> {
    std::collections::BTreeMap::from([(1, 0.5), (2, 0.5)])
}
