use eyre::Result;
use ndarray::Array1;
use optweights::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

fn random_vector(k: usize, scale: f64, rng: &mut StdRng) -> Array1<f64> {
    let normal = Normal::new(0.0, scale).unwrap();
    Array1::from_shape_fn(k, |_| normal.sample(&mut *rng))
}

fn random_simplex_point(k: usize, rng: &mut StdRng) -> Array1<f64> {
    let raw = Array1::from_shape_fn(k, |_| rng.gen::<f64>() + 1e-3);
    let sum = raw.sum();
    raw / sum
}

/// Projection of any finite vector is a probability vector
#[test]
fn test_projection_is_feasible() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(347);
    for k in 1..12 {
        for scale in [1e-3, 1.0, 1e3, 1e8, 1e16, 1e20] {
            let v = random_vector(k, scale, &mut rng);
            let p = project(&v)?;
            assert!(p.iter().all(|&x| x >= 0.0), "negative entry projecting {}", v);
            assert!((p.sum() - 1.0).abs() < 1e-9, "projection of {} sums to {}", v, p.sum());
        }
    }
    Ok(())
}

/// Entries far larger than one still project onto a vertex or edge of the simplex
#[test]
fn test_projection_of_large_offsets() -> Result<()> {
    for v in [
        Array1::from_vec(vec![0.0, 1e16]),
        Array1::from_vec(vec![1e17, 2e17]),
        Array1::from_vec(vec![3e16, -2e16, 1.0]),
        Array1::from_vec(vec![5e15 + 0.25, 5e15, -5e15]),
    ] {
        let p = project(&v)?;
        assert!(p.iter().all(|&x| x >= 0.0), "negative entry projecting {}", v);
        assert!((p.sum() - 1.0).abs() < 1e-9, "projection of {} sums to {}", v, p.sum());
    }
    Ok(())
}

/// Points on the simplex are fixed points
#[test]
fn test_projection_is_idempotent() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    for k in 2..10 {
        let q = random_simplex_point(k, &mut rng);
        let p = project(&q)?;
        let twice = project(&p)?;
        for ((a, b), c) in q.iter().zip(p.iter()).zip(twice.iter()) {
            assert!((a - b).abs() < 1e-12);
            assert!((b - c).abs() < 1e-12);
        }
    }
    Ok(())
}

/// No point on the simplex is closer to the input than its projection
#[test]
fn test_projection_is_closest_point() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..50 {
        let v = random_vector(4, 2.0, &mut rng);
        let p = project(&v)?;
        let d = (&v - &p).mapv(|x| x * x).sum();
        for _ in 0..50 {
            let q = random_simplex_point(4, &mut rng);
            let dq = (&v - &q).mapv(|x| x * x).sum();
            assert!(d <= dq + 1e-12, "{} is closer to {} than {}", q, v, p);
        }
    }
    Ok(())
}

/// Shifting every entry by a constant does not change the projection
#[test]
fn test_projection_is_shift_invariant() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    let v = random_vector(6, 1.0, &mut rng);
    let p = project(&v)?;
    let shifted = project(&(&v + 3.5))?;
    for (a, b) in p.iter().zip(shifted.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
    Ok(())
}
