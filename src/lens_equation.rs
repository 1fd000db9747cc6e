//! Lens equation solver.
//!
//! Finds every image-plane position that maps to a given source position:
//! a coarse grid search for local minima of the source-plane distance,
//! followed by damped Newton refinement of each candidate.

use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{LensFitError, Result};
use crate::lens_model::{BoundLensModel, DEGENERATE_DETERMINANT};

/// Maximum number of step halvings per Newton iteration.
const MAX_BACKTRACK: usize = 8;

/// Configuration of the lens equation solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Side length of the square search window (arcsec)
    pub search_window: f64,

    /// Grid spacing; images closer than a quarter of it are merged
    pub min_distance: f64,

    /// Source-plane residual at which Newton iterations stop
    pub precision_limit: f64,

    /// Maximum number of Newton iterations per candidate
    pub num_iter_max: usize,

    /// Largest source-plane residual of an accepted image
    pub solution_tolerance: f64,

    /// Center of the search window
    pub x_center: f64,
    pub y_center: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            search_window: 5.0,
            min_distance: 0.05,
            precision_limit: 1e-10,
            num_iter_max: 50,
            solution_tolerance: 1e-7,
            x_center: 0.0,
            y_center: 0.0,
        }
    }
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_window(mut self, search_window: f64) -> Self {
        self.search_window = search_window;
        self
    }

    pub fn with_min_distance(mut self, min_distance: f64) -> Self {
        self.min_distance = min_distance;
        self
    }

    pub fn with_precision_limit(mut self, precision_limit: f64) -> Self {
        self.precision_limit = precision_limit;
        self
    }

    pub fn with_num_iter_max(mut self, num_iter_max: usize) -> Self {
        self.num_iter_max = num_iter_max;
        self
    }

    pub fn with_solution_tolerance(mut self, solution_tolerance: f64) -> Self {
        self.solution_tolerance = solution_tolerance;
        self
    }

    pub fn with_center(mut self, x_center: f64, y_center: f64) -> Self {
        self.x_center = x_center;
        self.y_center = y_center;
        self
    }

    /// Check the numeric settings.
    pub fn validate(&self) -> Result<()> {
        if !(self.search_window > 0.0 && self.min_distance > 0.0) {
            return Err(LensFitError::config(
                "search window and minimum distance must be positive",
            ));
        }
        if self.min_distance > self.search_window {
            return Err(LensFitError::config(
                "minimum distance must not exceed the search window",
            ));
        }
        if !(self.precision_limit > 0.0 && self.solution_tolerance > 0.0) {
            return Err(LensFitError::config("solver tolerances must be positive"));
        }
        if self.num_iter_max == 0 {
            return Err(LensFitError::config("num_iter_max must be at least 1"));
        }
        Ok(())
    }
}

/// Solves `β(θ) = β_s` for all θ within the search window.
#[derive(Debug, Clone)]
pub struct LensEquationSolver {
    config: SolverConfig,
}

impl Default for LensEquationSolver {
    fn default() -> Self {
        Self {
            config: SolverConfig::default(),
        }
    }
}

impl LensEquationSolver {
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Image positions of a source.
    ///
    /// Returns an empty list when no image is found. Single-plane results are
    /// ordered by arrival time (Fermat potential), multi-plane results by
    /// position.
    pub fn image_positions(
        &self,
        lens: &BoundLensModel<'_>,
        source_x: f64,
        source_y: f64,
    ) -> Vec<(f64, f64)> {
        let candidates = self.candidates(lens, source_x, source_y);
        let merge_distance = self.config.min_distance / 4.0;

        let mut images: Vec<(f64, f64)> = Vec::new();
        for (x0, y0) in candidates {
            let Some((x, y)) = self.refine(lens, source_x, source_y, x0, y0) else {
                continue;
            };
            if !self.in_window(x, y) {
                continue;
            }
            if images
                .iter()
                .all(|&(ix, iy)| (ix - x).hypot(iy - y) >= merge_distance)
            {
                images.push((x, y));
            }
        }

        if lens.is_multi_plane() {
            images.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        } else {
            let mut keyed: Vec<(f64, (f64, f64))> = images
                .into_iter()
                .map(|(x, y)| {
                    let phi = lens
                        .fermat_potential(x, y, source_x, source_y)
                        .unwrap_or(f64::INFINITY);
                    (phi, (x, y))
                })
                .collect();
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
            images = keyed.into_iter().map(|(_, pos)| pos).collect();
        }

        debug!(
            "lens equation: {} image(s) for source ({:.4}, {:.4})",
            images.len(),
            source_x,
            source_y
        );
        images
    }

    /// Like [`LensEquationSolver::image_positions`], but an empty result is
    /// an error.
    pub fn require_image_positions(
        &self,
        lens: &BoundLensModel<'_>,
        source_x: f64,
        source_y: f64,
    ) -> Result<Vec<(f64, f64)>> {
        let images = self.image_positions(lens, source_x, source_y);
        if images.is_empty() {
            return Err(LensFitError::NoSolutionFound(format!(
                "no image of the source at ({}, {}) within the search window",
                source_x, source_y
            )));
        }
        Ok(images)
    }

    fn in_window(&self, x: f64, y: f64) -> bool {
        let half = 0.5 * self.config.search_window;
        (x - self.config.x_center).abs() <= half && (y - self.config.y_center).abs() <= half
    }

    /// Grid points whose source-plane distance is a local minimum.
    ///
    /// Samples sit at cell centers so that singular profile centers are
    /// never hit exactly. One ring of cells outside the window is sampled
    /// so that every cell inside it has a full neighbourhood.
    fn candidates(&self, lens: &BoundLensModel<'_>, sx: f64, sy: f64) -> Vec<(f64, f64)> {
        let step = self.config.min_distance;
        let n = (self.config.search_window / step).round().max(1.0) as usize;
        let origin = |c: f64| c - 0.5 * n as f64 * step - 0.5 * step;
        let (x0, y0) = (origin(self.config.x_center), origin(self.config.y_center));

        let distance = Array2::from_shape_fn((n + 2, n + 2), |(row, col)| {
            let (bx, by) = lens.ray_shoot(x0 + col as f64 * step, y0 + row as f64 * step);
            (bx - sx).hypot(by - sy)
        });

        let mut candidates = Vec::new();
        for row in 1..=n {
            for col in 1..=n {
                let d = distance[[row, col]];
                if !d.is_finite() {
                    continue;
                }
                let is_minimum = (row - 1..=row + 1)
                    .flat_map(|r| (col - 1..=col + 1).map(move |c| (r, c)))
                    .filter(|&(r, c)| (r, c) != (row, col))
                    .all(|(r, c)| d <= distance[[r, c]]);
                if is_minimum {
                    candidates.push((x0 + col as f64 * step, y0 + row as f64 * step));
                }
            }
        }
        candidates
    }

    /// Damped Newton iterations; `None` if the candidate does not converge.
    fn refine(
        &self,
        lens: &BoundLensModel<'_>,
        sx: f64,
        sy: f64,
        mut x: f64,
        mut y: f64,
    ) -> Option<(f64, f64)> {
        let residual = |x: f64, y: f64| {
            let (bx, by) = lens.ray_shoot(x, y);
            (sx - bx, sy - by)
        };

        let (mut rx, mut ry) = residual(x, y);
        let mut norm = rx.hypot(ry);

        for _ in 0..self.config.num_iter_max {
            if norm < self.config.precision_limit {
                break;
            }

            let h = lens.hessian(x, y);
            let (a11, a12, a21, a22) = (1.0 - h.f_xx, -h.f_xy, -h.f_yx, 1.0 - h.f_yy);
            let det = a11 * a22 - a12 * a21;
            let (dx, dy) = if det.abs() > DEGENERATE_DETERMINANT && det.is_finite() {
                ((a22 * rx - a12 * ry) / det, (a11 * ry - a21 * rx) / det)
            } else {
                (rx, ry)
            };

            let mut damping = 1.0;
            let mut improved = false;
            for _ in 0..=MAX_BACKTRACK {
                let (nx, ny) = (x + damping * dx, y + damping * dy);
                let (nrx, nry) = residual(nx, ny);
                let new_norm = nrx.hypot(nry);
                if new_norm.is_finite() && new_norm < norm {
                    x = nx;
                    y = ny;
                    rx = nrx;
                    ry = nry;
                    norm = new_norm;
                    improved = true;
                    break;
                }
                damping *= 0.5;
            }
            if !improved {
                break;
            }
        }

        (norm <= self.config.solution_tolerance).then_some((x, y))
    }
}
