//! Chained fitting steps on a likelihood module.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::info;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{LensFitError, Result};
use crate::likelihood::LikelihoodModule;
use crate::parameters::ModelKwargs;

use super::{FitResult, NelderMead, ParticleSwarm};

/// One step of a fitting sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FitStep {
    Pso(ParticleSwarm),
    Simplex(NelderMead),
}

impl FitStep {
    fn name(&self) -> &'static str {
        match self {
            FitStep::Pso(_) => "PSO",
            FitStep::Simplex(_) => "simplex",
        }
    }
}

/// Outcome of a fitting sequence.
#[derive(Debug, Clone)]
pub struct SequenceResult {
    /// Result of each step, in order
    pub steps: Vec<FitResult>,

    /// Best vector over all steps
    pub params: Array1<f64>,

    pub param_names: Vec<String>,

    pub log_likelihood: f64,

    /// Best kwargs with linear amplitudes filled in
    pub kwargs: ModelKwargs,
}

/// Runs fitting steps, each starting from the best point of the previous one.
#[derive(Debug, Clone)]
pub struct FittingSequence<'a> {
    likelihood: &'a LikelihoodModule,
    init: Array1<f64>,
    sigma: Array1<f64>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> FittingSequence<'a> {
    /// Create a sequence from initial values and initial spreads.
    ///
    /// # Arguments
    ///
    /// * `likelihood` - The likelihood to maximise
    /// * `init` - Initial values of every free parameter
    /// * `sigma` - Initial spread of every free parameter
    ///
    /// # Errors
    ///
    /// `ConfigError` when a free parameter is missing from `init` or `sigma`.
    pub fn new(likelihood: &'a LikelihoodModule, init: &ModelKwargs, sigma: &ModelKwargs) -> Result<Self> {
        let (init, _) = likelihood.param().to_vector(init)?;
        let (sigma, _) = likelihood.param().to_vector(sigma)?;
        Ok(Self {
            likelihood,
            init,
            sigma,
            interrupt: None,
        })
    }

    /// Stop particle swarm steps once `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Run `steps` in order.
    ///
    /// # Errors
    ///
    /// `ConfigError` for an empty step list, plus any optimizer error.
    pub fn run(&self, steps: &[FitStep]) -> Result<SequenceResult> {
        if steps.is_empty() {
            return Err(LensFitError::config("a fitting sequence needs at least one step"));
        }

        let mut current = self.init.clone();
        let mut best = (current.clone(), self.likelihood.log_likelihood(&current));
        let mut results = Vec::with_capacity(steps.len());

        for (i, step) in steps.iter().enumerate() {
            let result = match step {
                FitStep::Pso(pso) => {
                    let pso = match &self.interrupt {
                        Some(flag) => pso.clone().with_interrupt(flag.clone()),
                        None => pso.clone(),
                    };
                    pso.optimize(self.likelihood, &current, &self.sigma)?
                }
                FitStep::Simplex(simplex) => simplex.optimize(self.likelihood, &current, &self.sigma)?,
            };
            info!(
                "step {} ({}) finished: logL = {:.6e}",
                i + 1,
                step.name(),
                result.log_likelihood
            );
            if result.log_likelihood > best.1 || !best.1.is_finite() {
                best = (result.params.clone(), result.log_likelihood);
            }
            current = best.0.clone();
            results.push(result);
        }

        let (params, log_likelihood) = best;
        let kwargs = self.likelihood.evaluate(&params)?.kwargs;
        Ok(SequenceResult {
            steps: results,
            param_names: self.likelihood.param().param_names().to_vec(),
            params,
            log_likelihood,
            kwargs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_json() {
        let json = r#"[{"method": "pso", "n_particles": 20, "max_iterations": 10},
                       {"method": "simplex", "max_iterations": 50}]"#;
        let steps: Vec<FitStep> = serde_json::from_str(json).unwrap();
        match &steps[0] {
            FitStep::Pso(pso) => {
                assert_eq!(pso.n_particles(), 20);
                assert_eq!(pso.max_iterations(), 10);
                assert_eq!(pso.seed(), 42);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(matches!(steps[1], FitStep::Simplex(_)));
    }
}
