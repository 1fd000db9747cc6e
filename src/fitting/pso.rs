//! Particle swarm optimization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{LensFitError, Result};
use crate::problem::FitProblem;

use super::parallel::{clip_to_bounds, create_population, evaluate_population, member_rng};
use super::{ChainEntry, FitResult, StopReason};

/// Particle swarm optimizer maximising a log-likelihood.
///
/// Particles start uniformly within `init ± sigma_scale · sigma` (intersected
/// with the bounds) and move with
/// `v ← w v + c1 r1 (p_best − x) + c2 r2 (g_best − x)`. Each generation is
/// evaluated in parallel; bests are updated afterwards on the calling thread.
///
/// # Example
///
/// ```
/// use lensfit_rs::fitting::ParticleSwarm;
/// use lensfit_rs::problem::FnProblem;
/// use ndarray::{array, Array1};
///
/// let problem = FnProblem::new(2, |x: &Array1<f64>| -((x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2)));
/// let pso = ParticleSwarm::new()
///     .with_particles(30)
///     .with_max_iterations(200)
///     .with_seed(3);
/// let result = pso.optimize(&problem, &array![0.0, 0.0], &array![3.0, 3.0]).unwrap();
/// assert!((result.params[0] - 1.0).abs() < 1e-3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSwarm {
    /// Number of particles
    n_particles: usize,

    /// Inertia weight w
    inertia: f64,

    /// Attraction to the personal best (c1)
    cognitive: f64,

    /// Attraction to the global best (c2)
    social: f64,

    /// Width of the initial window in units of sigma
    sigma_scale: f64,

    max_iterations: usize,

    /// Generations without an improvement of at least `tol` before stopping
    max_no_improvement: usize,

    tol: f64,

    /// Wall-clock budget in seconds
    max_time_secs: Option<f64>,

    /// Random number generator seed
    seed: u64,

    #[serde(skip)]
    interrupt: Option<Arc<AtomicBool>>,
}

impl Default for ParticleSwarm {
    fn default() -> Self {
        Self {
            n_particles: 50,
            inertia: 0.7298,
            cognitive: 1.49618,
            social: 1.49618,
            sigma_scale: 1.0,
            max_iterations: 100,
            max_no_improvement: usize::MAX,
            tol: 0.0,
            max_time_secs: None,
            seed: 42,
            interrupt: None,
        }
    }
}

impl ParticleSwarm {
    /// Create a swarm with the constriction coefficients w = 0.7298 and
    /// c1 = c2 = 1.49618.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_particles(mut self, n: usize) -> Self {
        self.n_particles = n.max(2);
        self
    }

    pub fn with_coefficients(mut self, inertia: f64, cognitive: f64, social: f64) -> Self {
        self.inertia = inertia;
        self.cognitive = cognitive;
        self.social = social;
        self
    }

    pub fn with_sigma_scale(mut self, scale: f64) -> Self {
        self.sigma_scale = scale.abs();
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Stop after `generations` whose global best improved by less than `tol`.
    pub fn with_stagnation(mut self, generations: usize, tol: f64) -> Self {
        self.max_no_improvement = generations.max(1);
        self.tol = tol;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.max_time_secs = Some(limit.as_secs_f64());
        self
    }

    /// Stop between generations once `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn n_particles(&self) -> usize {
        self.n_particles
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Maximise `problem` starting around `init`.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `init` - Initial guess, always part of the first generation
    /// * `sigma` - Per-parameter spread of the initial population
    ///
    /// # Errors
    ///
    /// `ParameterCountMismatch` when `init`, `sigma` or the problem bounds
    /// disagree with the problem dimension.
    pub fn optimize<P: FitProblem + Sync>(
        &self,
        problem: &P,
        init: &Array1<f64>,
        sigma: &Array1<f64>,
    ) -> Result<FitResult> {
        let dim = problem.parameter_count();
        let bounds = problem.bounds();
        for got in [init.len(), sigma.len(), bounds.len()] {
            if got != dim {
                return Err(LensFitError::ParameterCountMismatch { expected: dim, got });
            }
        }
        if self.n_particles < 2 {
            return Err(LensFitError::config("a swarm needs at least two particles"));
        }
        if let Some(s) = sigma.iter().find(|s| !(s.is_finite() && **s >= 0.0)) {
            return Err(LensFitError::config(format!(
                "initial spreads must be finite and non-negative, got {}",
                s
            )));
        }
        if init.iter().any(|x| !x.is_finite()) {
            return Err(LensFitError::NonFiniteValue("initial swarm position".into()));
        }

        let start = Instant::now();
        let time_limit = self.max_time_secs.map(Duration::from_secs_f64);

        let mut init = init.clone();
        clip_to_bounds(&mut init, &bounds);

        let windows: Vec<(f64, f64)> = bounds
            .iter()
            .zip(init.iter().zip(sigma))
            .map(|(b, (&x, &s))| b.window(x, self.sigma_scale * s))
            .collect();
        if windows.iter().any(|(lo, hi)| !(hi - lo).is_finite()) {
            return Err(LensFitError::config("initial swarm window is not finite"));
        }
        let v_max: Array1<f64> = bounds
            .iter()
            .zip(&windows)
            .map(|(b, &(lo, hi))| if b.is_finite() { b.width() } else { hi - lo })
            .collect();

        let mut positions = create_population(&init, &windows, self.n_particles, self.seed);
        let mut velocities = vec![Array1::<f64>::zeros(dim); self.n_particles];

        let mut fitness = evaluate_population(problem, &positions);
        let mut func_evals = self.n_particles;
        let mut personal_best = positions.clone();
        let mut personal_fitness = fitness.clone();

        let (mut best_index, mut best_fitness) = argmax(&fitness);
        let mut best_position = positions[best_index].clone();

        let mut chain = Vec::with_capacity(self.max_iterations);
        let mut iterations = 0;
        let mut stagnant = 0;
        let stop_reason = loop {
            if iterations >= self.max_iterations {
                break StopReason::MaxIterations;
            }
            if self.interrupted() {
                break StopReason::Interrupted;
            }
            if time_limit.is_some_and(|limit| start.elapsed() >= limit) {
                break StopReason::TimeLimit;
            }

            for (p, (x, v)) in positions.iter_mut().zip(velocities.iter_mut()).enumerate() {
                let mut rng = member_rng(self.seed, iterations as u64 + 1, p);
                for i in 0..dim {
                    let r1: f64 = rng.gen();
                    let r2: f64 = rng.gen();
                    let step = self.inertia * v[i]
                        + self.cognitive * r1 * (personal_best[p][i] - x[i])
                        + self.social * r2 * (best_position[i] - x[i]);
                    v[i] = step.clamp(-v_max[i], v_max[i]);
                    x[i] += v[i];
                }
                for (i, clipped) in clip_to_bounds(x, &bounds).into_iter().enumerate() {
                    if clipped {
                        v[i] = 0.0;
                    }
                }
            }

            fitness = evaluate_population(problem, &positions);
            func_evals += self.n_particles;

            for (p, &f) in fitness.iter().enumerate() {
                if f > personal_fitness[p] {
                    personal_fitness[p] = f;
                    personal_best[p] = positions[p].clone();
                }
            }

            let previous = best_fitness;
            let (index, value) = argmax(&personal_fitness);
            if value > best_fitness {
                best_index = index;
                best_fitness = value;
                best_position = personal_best[best_index].clone();
            }
            let improved = if previous.is_finite() {
                best_fitness - previous > self.tol
            } else {
                best_fitness > previous
            };
            stagnant = if improved { 0 } else { stagnant + 1 };
            iterations += 1;

            let mean_velocity =
                velocities.iter().map(|v| v.dot(v).sqrt()).sum::<f64>() / self.n_particles as f64;
            debug!(
                "PSO iteration {}: best logL = {:.6e}, mean velocity = {:.3e}",
                iterations, best_fitness, mean_velocity
            );
            chain.push(ChainEntry {
                best_log_likelihood: best_fitness,
                best_position: best_position.clone(),
                mean_velocity,
            });

            if stagnant >= self.max_no_improvement {
                break StopReason::NoImprovement;
            }
        };

        info!(
            "PSO stopped after {} iterations ({}): best logL = {:.6e}",
            iterations, stop_reason, best_fitness
        );

        Ok(FitResult {
            params: best_position,
            log_likelihood: best_fitness,
            iterations,
            func_evals,
            stop_reason,
            chain,
        })
    }
}

/// Index and value of the largest entry; ties keep the first.
fn argmax(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}
