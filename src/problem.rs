//! Problem definition trait consumed by the optimizers.
//!
//! A `FitProblem` maps a flat parameter vector to a log-likelihood. The
//! optimizers only ever see this trait, so anything from a toy quadratic to
//! a full [`LikelihoodModule`](crate::likelihood::LikelihoodModule) can be
//! fitted.

use ndarray::Array1;

use crate::parameters::Bounds;

/// A trait representing a log-likelihood to be maximised.
pub trait FitProblem {
    /// Evaluate the log-likelihood at the given parameters.
    ///
    /// Must never panic; invalid or failing points return
    /// `f64::NEG_INFINITY`.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values at which to evaluate
    fn log_likelihood(&self, params: &Array1<f64>) -> f64;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Per-parameter bounds; unbounded by default.
    fn bounds(&self) -> Vec<Bounds> {
        vec![Bounds::unbounded(); self.parameter_count()]
    }

    /// Cost minimised by the optimizers: `−logL`.
    fn cost(&self, params: &Array1<f64>) -> f64 {
        -self.log_likelihood(params)
    }
}

/// Wrap a closure as a problem.
///
/// # Example
///
/// ```
/// use lensfit_rs::problem::{FitProblem, FnProblem};
/// use ndarray::array;
///
/// let problem = FnProblem::new(2, |x| -(x[0] * x[0] + x[1] * x[1]));
/// assert_eq!(problem.cost(&array![1.0, 2.0]), 5.0);
/// ```
pub struct FnProblem<F> {
    dim: usize,
    func: F,
    bounds: Option<Vec<Bounds>>,
}

impl<F> FnProblem<F>
where
    F: Fn(&Array1<f64>) -> f64,
{
    pub fn new(dim: usize, func: F) -> Self {
        Self {
            dim,
            func,
            bounds: None,
        }
    }

    /// Restrict the problem to `bounds`; points outside evaluate to −∞.
    pub fn with_bounds(mut self, bounds: Vec<Bounds>) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

impl<F> FitProblem for FnProblem<F>
where
    F: Fn(&Array1<f64>) -> f64,
{
    fn log_likelihood(&self, params: &Array1<f64>) -> f64 {
        if params.len() != self.dim {
            return f64::NEG_INFINITY;
        }
        if let Some(bounds) = &self.bounds {
            if params.iter().zip(bounds).any(|(&v, b)| !b.contains(v)) {
                return f64::NEG_INFINITY;
            }
        }
        let value = (self.func)(params);
        if value.is_nan() {
            f64::NEG_INFINITY
        } else {
            value
        }
    }

    fn parameter_count(&self) -> usize {
        self.dim
    }

    fn bounds(&self) -> Vec<Bounds> {
        self.bounds
            .clone()
            .unwrap_or_else(|| vec![Bounds::unbounded(); self.dim])
    }
}
