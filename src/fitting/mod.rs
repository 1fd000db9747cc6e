//! Optimizers that maximise a [`FitProblem`](crate::problem::FitProblem).
//!
//! - [`ParticleSwarm`]: global search with a parallel particle swarm
//! - [`NelderMead`]: downhill simplex refinement
//! - [`FittingSequence`]: a list of steps, each starting from the previous
//!   best, driven by a [`LikelihoodModule`](crate::likelihood::LikelihoodModule)

use ndarray::Array1;
use std::fmt;

pub mod parallel;
mod pso;
mod sequence;
mod simplex;

pub use pso::ParticleSwarm;
pub use sequence::{FitStep, FittingSequence, SequenceResult};
pub use simplex::NelderMead;

/// Why an optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The iteration budget was used up
    MaxIterations,
    /// The best value improved by less than the tolerance for too long
    NoImprovement,
    /// The simplex shrank below the tolerances
    Converged,
    /// The wall-clock budget was exceeded
    TimeLimit,
    /// The interrupt flag was raised
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            StopReason::MaxIterations => "reached maximum iterations",
            StopReason::NoImprovement => "no improvement within tolerance",
            StopReason::Converged => "converged",
            StopReason::TimeLimit => "time limit exceeded",
            StopReason::Interrupted => "interrupted",
        };
        f.write_str(message)
    }
}

/// State of the optimizer after one iteration.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub best_log_likelihood: f64,
    pub best_position: Array1<f64>,
    /// Mean particle speed; zero for the simplex
    pub mean_velocity: f64,
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// The best parameters found
    pub params: Array1<f64>,

    /// Log-likelihood at the best parameters
    pub log_likelihood: f64,

    /// The number of iterations performed
    pub iterations: usize,

    /// The number of function evaluations
    pub func_evals: usize,

    pub stop_reason: StopReason,

    /// One entry per iteration
    pub chain: Vec<ChainEntry>,
}

impl FitResult {
    /// The minimised cost, `−logL`.
    pub fn cost(&self) -> f64 {
        -self.log_likelihood
    }

    /// Whether a finite log-likelihood was found.
    pub fn success(&self) -> bool {
        self.log_likelihood.is_finite()
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit Result:")?;
        writeln!(f, "  Success: {}", self.success())?;
        writeln!(f, "  Log-likelihood: {:.6e}", self.log_likelihood)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Stop reason: {}", self.stop_reason)?;
        writeln!(f, "  Parameters: {:?}", self.params)
    }
}
