//! Downhill simplex (Nelder–Mead) refinement.

use log::info;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{LensFitError, Result};
use crate::problem::FitProblem;

use super::parallel::{clip_to_bounds, fitness};
use super::{ChainEntry, FitResult, StopReason};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Nelder–Mead minimisation of `−logL`.
///
/// The initial simplex is `init` plus one vertex per parameter displaced by
/// `sigma`. Stops when both the vertex spread and the cost spread fall below
/// their tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NelderMead {
    max_iterations: usize,
    xtol: f64,
    ftol: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            xtol: 1e-8,
            ftol: 1e-8,
        }
    }
}

impl NelderMead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_tolerances(mut self, xtol: f64, ftol: f64) -> Self {
        self.xtol = xtol;
        self.ftol = ftol;
        self
    }

    /// Refine `init` with initial steps `sigma`.
    ///
    /// # Errors
    ///
    /// `ParameterCountMismatch` when `init` or `sigma` disagree with the
    /// problem dimension.
    pub fn optimize<P: FitProblem>(&self, problem: &P, init: &Array1<f64>, sigma: &Array1<f64>) -> Result<FitResult> {
        let dim = problem.parameter_count();
        for got in [init.len(), sigma.len()] {
            if got != dim {
                return Err(LensFitError::ParameterCountMismatch { expected: dim, got });
            }
        }
        if dim == 0 {
            return Err(LensFitError::config("the simplex needs at least one free parameter"));
        }
        let bounds = problem.bounds();
        let cost = |x: &Array1<f64>| -fitness(problem, x);

        let mut vertices = Vec::with_capacity(dim + 1);
        vertices.push(init.clone());
        for i in 0..dim {
            let mut vertex = init.clone();
            let step = if sigma[i] != 0.0 {
                sigma[i]
            } else if init[i] != 0.0 {
                0.05 * init[i]
            } else {
                0.00025
            };
            vertex[i] += step;
            if bounds.len() == dim && !bounds[i].contains(vertex[i]) {
                vertex[i] = init[i] - step;
                clip_to_bounds(&mut vertex, &bounds);
            }
            vertices.push(vertex);
        }
        let mut costs: Vec<f64> = vertices.iter().map(&cost).collect();
        let mut func_evals = vertices.len();

        let mut chain = Vec::new();
        let mut iterations = 0;
        let stop_reason = loop {
            sort_simplex(&mut vertices, &mut costs);
            if self.converged(&vertices, &costs) {
                break StopReason::Converged;
            }
            if iterations >= self.max_iterations {
                break StopReason::MaxIterations;
            }
            iterations += 1;

            let worst = dim;
            let centroid = vertices[..worst]
                .iter()
                .fold(Array1::zeros(dim), |acc, v| acc + v)
                / dim as f64;
            let direction = &centroid - &vertices[worst];
            let towards = |coefficient: f64| &centroid + &(&direction * coefficient);

            let reflected = towards(REFLECTION);
            let reflected_cost = cost(&reflected);
            func_evals += 1;

            if reflected_cost < costs[0] {
                let expanded = towards(REFLECTION * EXPANSION);
                let expanded_cost = cost(&expanded);
                func_evals += 1;
                if expanded_cost < reflected_cost {
                    vertices[worst] = expanded;
                    costs[worst] = expanded_cost;
                } else {
                    vertices[worst] = reflected;
                    costs[worst] = reflected_cost;
                }
            } else if reflected_cost < costs[worst - 1] {
                vertices[worst] = reflected;
                costs[worst] = reflected_cost;
            } else {
                let (contracted, target) = if reflected_cost < costs[worst] {
                    (towards(REFLECTION * CONTRACTION), reflected_cost)
                } else {
                    (towards(-CONTRACTION), costs[worst])
                };
                let contracted_cost = cost(&contracted);
                func_evals += 1;
                if contracted_cost <= target {
                    vertices[worst] = contracted;
                    costs[worst] = contracted_cost;
                } else {
                    let best = vertices[0].clone();
                    for (vertex, c) in vertices.iter_mut().zip(costs.iter_mut()).skip(1) {
                        *vertex = &best + &((&*vertex - &best) * SHRINK);
                        *c = cost(vertex);
                    }
                    func_evals += dim;
                }
            }

            let (best_index, best_cost) = costs
                .iter()
                .copied()
                .enumerate()
                .fold((0, f64::INFINITY), |b, (i, c)| if c < b.1 { (i, c) } else { b });
            chain.push(ChainEntry {
                best_log_likelihood: -best_cost,
                best_position: vertices[best_index].clone(),
                mean_velocity: 0.0,
            });
        };

        info!(
            "simplex stopped after {} iterations ({}): best logL = {:.6e}",
            iterations, stop_reason, -costs[0]
        );

        Ok(FitResult {
            params: vertices[0].clone(),
            log_likelihood: -costs[0],
            iterations,
            func_evals,
            stop_reason,
            chain,
        })
    }

    fn converged(&self, vertices: &[Array1<f64>], costs: &[f64]) -> bool {
        let best = &vertices[0];
        let x_spread = vertices[1..]
            .iter()
            .flat_map(|v| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let f_spread = costs[1..]
            .iter()
            .map(|c| (c - costs[0]).abs())
            .fold(0.0, f64::max);
        costs[0].is_finite() && x_spread <= self.xtol && f_spread <= self.ftol
    }
}

fn sort_simplex(vertices: &mut Vec<Array1<f64>>, costs: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..costs.len()).collect();
    order.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));
    *vertices = order.iter().map(|&i| vertices[i].clone()).collect();
    *costs = order.iter().map(|&i| costs[i]).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Bounds;
    use crate::problem::FnProblem;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_rosenbrock() {
        let problem = FnProblem::new(2, |x: &Array1<f64>| {
            -(100.0 * (x[1] - x[0] * x[0]).powi(2) + (1.0 - x[0]).powi(2))
        });
        let result = NelderMead::new()
            .with_max_iterations(5000)
            .with_tolerances(1e-10, 1e-14)
            .optimize(&problem, &array![-1.2, 1.0], &array![0.1, 0.1])
            .unwrap();
        assert_eq!(result.stop_reason, StopReason::Converged);
        assert_abs_diff_eq!(result.params[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(result.params[1], 1.0, epsilon = 1e-4);
        assert!(result.log_likelihood > -1e-8);
    }

    #[test]
    fn test_respects_infinite_cost_region() {
        let bounds = vec![Bounds::new(0.5, 10.0).unwrap()];
        let problem = FnProblem::new(1, |x: &Array1<f64>| -x[0] * x[0]).with_bounds(bounds);
        let result = NelderMead::new().optimize(&problem, &array![3.0], &array![1.0]).unwrap();
        assert!(result.params[0] >= 0.5);
        assert_abs_diff_eq!(result.params[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_iteration_budget() {
        let problem = FnProblem::new(2, |x: &Array1<f64>| -(x[0].powi(2) + x[1].powi(2)));
        let result = NelderMead::new()
            .with_max_iterations(3)
            .optimize(&problem, &array![5.0, 5.0], &array![1.0, 1.0])
            .unwrap();
        assert_eq!(result.stop_reason, StopReason::MaxIterations);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.chain.len(), 3);
        assert!(result.log_likelihood > -50.0);
    }
}
