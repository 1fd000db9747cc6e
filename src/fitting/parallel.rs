//! Population helpers shared by the optimizers.
//!
//! Evaluation fans out over rayon when the `parallel` feature is on. Random
//! streams are derived from the seed and the particle index, so results do
//! not depend on thread scheduling.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::parameters::Bounds;
use crate::problem::FitProblem;

/// Log-likelihood of a point; NaN is mapped to −∞.
pub fn fitness<P: FitProblem + ?Sized>(problem: &P, point: &Array1<f64>) -> f64 {
    let value = problem.log_likelihood(point);
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

/// Evaluate every point of a population.
pub fn evaluate_population<P: FitProblem + Sync + ?Sized>(problem: &P, population: &[Array1<f64>]) -> Vec<f64> {
    #[cfg(feature = "parallel")]
    return population.par_iter().map(|point| fitness(problem, point)).collect();
    #[cfg(not(feature = "parallel"))]
    return population.iter().map(|point| fitness(problem, point)).collect();
}

/// Random generator of one population member.
pub fn member_rng(seed: u64, stream: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(
        seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .wrapping_add(index as u64),
    )
}

/// Uniform random point inside per-dimension windows.
pub fn random_point(windows: &[(f64, f64)], rng: &mut impl Rng) -> Array1<f64> {
    windows
        .iter()
        .map(|&(lo, hi)| if lo < hi { rng.gen_range(lo..hi) } else { lo })
        .collect()
}

/// Initial population: `init` itself plus uniform draws in the windows.
pub fn create_population(init: &Array1<f64>, windows: &[(f64, f64)], size: usize, seed: u64) -> Vec<Array1<f64>> {
    let mut population = Vec::with_capacity(size);
    population.push(init.clone());
    population.extend((1..size).map(|i| random_point(windows, &mut member_rng(seed, 0, i))));
    population
}

/// Clip a point to the bounds; returns which coordinates were clipped.
pub fn clip_to_bounds(point: &mut Array1<f64>, bounds: &[Bounds]) -> Vec<bool> {
    point
        .iter_mut()
        .zip(bounds)
        .map(|(v, b)| {
            let clipped = b.clamp(*v);
            let changed = clipped != *v;
            *v = clipped;
            changed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::FnProblem;
    use ndarray::array;

    #[test]
    fn test_population_is_reproducible() {
        let init = array![0.0, 1.0];
        let windows = [(-1.0, 1.0), (1.0, 1.0)];
        let a = create_population(&init, &windows, 10, 7);
        let b = create_population(&init, &windows, 10, 7);
        assert_eq!(a, b);
        assert_eq!(a[0], init);
        for p in &a {
            assert!(p[0] >= -1.0 && p[0] < 1.0);
            assert_eq!(p[1], 1.0);
        }
        assert_ne!(a, create_population(&init, &windows, 10, 8));
    }

    #[test]
    fn test_evaluate_population() {
        let problem = FnProblem::new(1, |x: &Array1<f64>| if x[0] < 0.0 { f64::NAN } else { -x[0] });
        let values = evaluate_population(&problem, &[array![1.0], array![-1.0], array![0.0]]);
        assert_eq!(values, vec![-1.0, f64::NEG_INFINITY, 0.0]);
    }

    #[test]
    fn test_clip() {
        let bounds = [Bounds::new(0.0, 1.0).unwrap(), Bounds::unbounded()];
        let mut point = array![2.0, -5.0];
        assert_eq!(clip_to_bounds(&mut point, &bounds), vec![true, false]);
        assert_eq!(point, array![1.0, -5.0]);
    }
}
