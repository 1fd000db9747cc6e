//! Joint linear inversion of amplitude parameters.
//!
//! Basis images `M` (one per linear amplitude) and the fixed image are
//! rendered by [`ImageModel::linear_basis`]; the weighted normal equations
//! `MᵀWM a = MᵀW(d − fixed)` are then solved jointly with a Cholesky
//! factorisation. A rank-deficient system is reported as
//! [`LensFitError::SingularDesignMatrix`] unless a [`LinearFallback`] is
//! configured.

use log::warn;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::ImageData;
use crate::error::{LensFitError, Result};
use crate::image_model::{apply_amplitudes, ImageModel, LinearBasis};
use crate::parameters::ModelKwargs;

/// Relative singular-value threshold for the rank test.
pub const RANK_TOLERANCE: f64 = 1e-12;

/// What to do when the normal matrix is rank deficient.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinearFallback {
    /// Return `SingularDesignMatrix`
    #[default]
    Fail,
    /// Add `lambda` times the mean diagonal to the diagonal
    Regularize { lambda: f64 },
    /// SVD pseudo-inverse, singular values below `rcond · σ_max` dropped
    PseudoInverse { rcond: f64 },
}

impl LinearFallback {
    fn validate(&self) -> Result<()> {
        match *self {
            LinearFallback::Regularize { lambda } if !(lambda > 0.0 && lambda.is_finite()) => Err(
                LensFitError::config(format!("ridge lambda must be positive, got {}", lambda)),
            ),
            LinearFallback::PseudoInverse { rcond } if !(rcond >= 0.0 && rcond < 1.0) => Err(
                LensFitError::config(format!("rcond must lie in [0, 1), got {}", rcond)),
            ),
            _ => Ok(()),
        }
    }
}

/// Solution of the normal equations.
#[derive(Debug, Clone)]
pub struct NormalSolution {
    pub amplitudes: Vec<f64>,

    /// Inverse of the normal matrix, when it was invertible
    pub covariance: Option<Array2<f64>>,

    /// `ln det(MᵀWM)` (over the retained singular values for the
    /// pseudo-inverse)
    pub log_det: f64,

    pub used_fallback: bool,
}

/// Solve `A a = b` for a symmetric positive semi-definite `A`.
///
/// # Errors
///
/// `SingularDesignMatrix` when `A` is rank deficient and `fallback` is
/// `Fail`; `LinearAlgebra` when even the fallback cannot factorise it.
pub fn solve_normal_equations(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    fallback: LinearFallback,
) -> Result<NormalSolution> {
    let size = a.nrows();
    if a.ncols() != size || b.len() != size {
        return Err(LensFitError::ShapeMismatch(format!(
            "normal matrix is {}x{}, right-hand side has {} entries",
            a.nrows(),
            a.ncols(),
            b.len()
        )));
    }
    if size == 0 {
        return Ok(NormalSolution {
            amplitudes: Vec::new(),
            covariance: None,
            log_det: 0.0,
            used_fallback: false,
        });
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(LensFitError::NonFiniteValue("normal equations".into()));
    }

    let singular_values = a.clone().svd(false, false).singular_values;
    let sigma_max = singular_values.max();
    let rank = singular_values
        .iter()
        .filter(|&&s| s > sigma_max * RANK_TOLERANCE * size as f64)
        .count();

    if rank == size {
        if let Some(solution) = cholesky_solve(a.clone(), b, false) {
            return Ok(solution);
        }
    }

    let error = LensFitError::SingularDesignMatrix { rank, size };
    match fallback {
        LinearFallback::Fail => Err(error),
        LinearFallback::Regularize { lambda } => {
            warn!("{}; regularising with lambda = {}", error, lambda);
            let ridge = lambda * (a.trace() / size as f64).max(f64::MIN_POSITIVE);
            let mut regularised = a.clone();
            for i in 0..size {
                regularised[(i, i)] += ridge;
            }
            cholesky_solve(regularised, b, true)
                .ok_or_else(|| LensFitError::LinearAlgebra("regularised Cholesky failed".into()))
        }
        LinearFallback::PseudoInverse { rcond } => {
            warn!("{}; using the pseudo-inverse", error);
            let eps = rcond * sigma_max;
            let svd = a.clone().svd(true, true);
            let x = svd.solve(b, eps).map_err(|e| LensFitError::LinearAlgebra(e.to_string()))?;
            let log_det = svd
                .singular_values
                .iter()
                .filter(|&&s| s > eps && s > 0.0)
                .map(|s| s.ln())
                .sum();
            let pinv = svd
                .pseudo_inverse(eps)
                .map_err(|e| LensFitError::LinearAlgebra(e.to_string()))?;
            Ok(NormalSolution {
                amplitudes: x.iter().copied().collect(),
                covariance: Some(to_array(&pinv)),
                log_det,
                used_fallback: true,
            })
        }
    }
}

fn cholesky_solve(a: DMatrix<f64>, b: &DVector<f64>, used_fallback: bool) -> Option<NormalSolution> {
    let chol = a.cholesky()?;
    let log_det = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
    let x = chol.solve(b);
    if !log_det.is_finite() || x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(NormalSolution {
        amplitudes: x.iter().copied().collect(),
        covariance: Some(to_array(&chol.inverse())),
        log_det,
        used_fallback,
    })
}

fn to_array(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Result of a linear inversion.
#[derive(Debug, Clone)]
pub struct LinearSolution {
    pub amplitudes: Vec<f64>,

    /// Model image with the solved amplitudes
    pub model_image: Array2<f64>,

    pub covariance: Option<Array2<f64>>,

    pub log_det: f64,

    pub used_fallback: bool,

    /// Input kwargs with the solved amplitudes filled in
    pub kwargs: ModelKwargs,
}

impl LinearSolution {
    /// Whether every solved amplitude is non-negative.
    pub fn all_positive(&self) -> bool {
        self.amplitudes.iter().all(|&a| a >= 0.0)
    }
}

/// Solves linear amplitudes against observed data.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearSolver {
    fallback: LinearFallback,
}

impl LinearSolver {
    /// Create a solver with the given rank-deficiency fallback.
    pub fn new(fallback: LinearFallback) -> Result<Self> {
        fallback.validate()?;
        Ok(Self { fallback })
    }

    pub fn fallback(&self) -> LinearFallback {
        self.fallback
    }

    /// Render the basis images of `kwargs` and solve for the missing
    /// amplitudes.
    ///
    /// # Errors
    ///
    /// Any rendering error, `ShapeMismatch` when data and model grids differ,
    /// and the errors of [`solve_normal_equations`].
    pub fn solve(&self, model: &ImageModel, kwargs: &ModelKwargs, data: &ImageData) -> Result<LinearSolution> {
        let basis = model.linear_basis(kwargs)?;
        let solution = self.solve_basis(&basis, data)?;
        let model_image = basis.image(&solution.amplitudes);
        Ok(LinearSolution {
            kwargs: apply_amplitudes(kwargs, &basis.slots, &solution.amplitudes),
            amplitudes: solution.amplitudes,
            model_image,
            covariance: solution.covariance,
            log_det: solution.log_det,
            used_fallback: solution.used_fallback,
        })
    }

    /// Solve pre-rendered basis images against the data.
    pub fn solve_basis(&self, basis: &LinearBasis, data: &ImageData) -> Result<NormalSolution> {
        if basis.fixed.dim() != data.data().dim() {
            return Err(LensFitError::ShapeMismatch(format!(
                "model has shape {:?}, data has shape {:?}",
                basis.fixed.dim(),
                data.data().dim()
            )));
        }

        let weights: Array1<f64> = data.weights().iter().copied().collect();
        let residual: Array1<f64> = data
            .data()
            .iter()
            .zip(basis.fixed.iter())
            .map(|(d, f)| d - f)
            .collect();
        let columns: Vec<Array1<f64>> = basis
            .columns
            .iter()
            .map(|c| c.iter().copied().collect())
            .collect();
        let weighted: Vec<Array1<f64>> = columns.iter().map(|c| c * &weights).collect();

        let n = columns.len();
        let a = DMatrix::from_fn(n, n, |i, j| weighted[i].dot(&columns[j]));
        let b = DVector::from_fn(n, |i, _| weighted[i].dot(&residual));
        solve_normal_equations(&a, &b, self.fallback)
    }
}
