//! Log-likelihood of a parameter vector.
//!
//! [`LikelihoodModule`] expands the vector into [`ModelKwargs`], rejects
//! points outside the bounds, renders the image (solving linear amplitudes
//! when any are free) and adds the optional point-source terms. Evaluation
//! never fails from the caller's point of view: every internal error is
//! logged at debug level and mapped to `f64::NEG_INFINITY`.

use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::ImageData;
use crate::error::{LensFitError, Result};
use crate::image_model::ImageModel;
use crate::lens_model::BoundLensModel;
use crate::linear_solver::{LinearFallback, LinearSolver};
use crate::parameters::{Bounds, ModelKwargs, Param};
use crate::point_source::{max_distance_from_mean, mean_position};
use crate::problem::FitProblem;

/// Which likelihood terms are evaluated and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LikelihoodConfig {
    /// Reject points outside the parameter bounds
    pub check_bounds: bool,

    /// Compare the rendered image with the data
    pub image_likelihood: bool,

    /// Subtract `½ ln det(MᵀWM)` (marginalise over linear amplitudes)
    pub marginalize_linear: bool,

    /// Reject solutions with negative linear amplitudes
    pub check_positive_flux: bool,

    pub linear_fallback: LinearFallback,

    /// Penalise the source-plane scatter of `LENSED_POSITION` images
    pub source_position_likelihood: bool,

    /// Source-plane scatter scale (arcsec)
    pub source_position_sigma: f64,

    /// Reject when images map back further than this from their mean
    pub source_position_tolerance: Option<f64>,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            check_bounds: true,
            image_likelihood: true,
            marginalize_linear: false,
            check_positive_flux: false,
            linear_fallback: LinearFallback::default(),
            source_position_likelihood: false,
            source_position_sigma: 0.001,
            source_position_tolerance: None,
        }
    }
}

impl LikelihoodConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check_bounds(mut self, check: bool) -> Self {
        self.check_bounds = check;
        self
    }

    pub fn with_image_likelihood(mut self, enabled: bool) -> Self {
        self.image_likelihood = enabled;
        self
    }

    pub fn with_marginalize_linear(mut self, enabled: bool) -> Self {
        self.marginalize_linear = enabled;
        self
    }

    pub fn with_check_positive_flux(mut self, check: bool) -> Self {
        self.check_positive_flux = check;
        self
    }

    pub fn with_linear_fallback(mut self, fallback: LinearFallback) -> Self {
        self.linear_fallback = fallback;
        self
    }

    pub fn with_source_position_likelihood(mut self, sigma: f64, tolerance: Option<f64>) -> Self {
        self.source_position_likelihood = true;
        self.source_position_sigma = sigma;
        self.source_position_tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_position_likelihood && !(self.source_position_sigma > 0.0) {
            return Err(LensFitError::config("source position sigma must be positive"));
        }
        if let Some(t) = self.source_position_tolerance {
            if !(t > 0.0) {
                return Err(LensFitError::config("source position tolerance must be positive"));
            }
        }
        Ok(())
    }
}

/// Observed image positions of one point source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePositionData {
    pub source_index: usize,
    pub positions: Vec<(f64, f64)>,
    /// Astrometric uncertainty (arcsec)
    pub sigma: f64,
}

/// Measured time delays of one point source relative to its first image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDelayData {
    pub source_index: usize,
    /// `t_i − t_0` for images `1..n`, in days
    pub delays: Vec<f64>,
    pub sigmas: Vec<f64>,
}

/// Breakdown of one likelihood evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub log_likelihood: f64,

    /// Expanded kwargs with solved amplitudes filled in
    pub kwargs: ModelKwargs,

    pub model_image: Option<Array2<f64>>,
}

/// Log-likelihood of a parameter vector against data.
#[derive(Debug, Clone)]
pub struct LikelihoodModule {
    image_model: ImageModel,
    param: Param,
    config: LikelihoodConfig,
    solver: LinearSolver,
    data: Option<ImageData>,
    bounds: Vec<Bounds>,
    image_positions: Vec<ImagePositionData>,
    time_delays: Vec<TimeDelayData>,
}

impl LikelihoodModule {
    /// Create a likelihood without data or bounds.
    pub fn new(image_model: ImageModel, param: Param, config: LikelihoodConfig) -> Result<Self> {
        config.validate()?;
        let solver = LinearSolver::new(config.linear_fallback)?;
        let bounds = vec![Bounds::unbounded(); param.num_params()];
        Ok(Self {
            image_model,
            param,
            config,
            solver,
            data: None,
            bounds,
            image_positions: Vec::new(),
            time_delays: Vec::new(),
        })
    }

    /// Attach observed image data.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when the data grid differs from the model grid.
    pub fn with_data(mut self, data: ImageData) -> Result<Self> {
        if data.grid().shape() != self.image_model.grid().shape() {
            return Err(LensFitError::ShapeMismatch(format!(
                "data has shape {:?}, model grid has shape {:?}",
                data.grid().shape(),
                self.image_model.grid().shape()
            )));
        }
        self.data = Some(data);
        Ok(self)
    }

    /// Attach one bound per vector slot.
    pub fn with_bounds(mut self, bounds: Vec<Bounds>) -> Result<Self> {
        if bounds.len() != self.param.num_params() {
            return Err(LensFitError::ParameterCountMismatch {
                expected: self.param.num_params(),
                got: bounds.len(),
            });
        }
        self.bounds = bounds;
        Ok(self)
    }

    pub fn with_image_positions(mut self, data: ImagePositionData) -> Result<Self> {
        if !(data.sigma > 0.0) {
            return Err(LensFitError::config("image position sigma must be positive"));
        }
        self.check_source_index(data.source_index)?;
        self.image_positions.push(data);
        Ok(self)
    }

    pub fn with_time_delays(mut self, data: TimeDelayData) -> Result<Self> {
        if data.delays.len() != data.sigmas.len() {
            return Err(LensFitError::config(format!(
                "{} time delays given with {} uncertainties",
                data.delays.len(),
                data.sigmas.len()
            )));
        }
        if data.sigmas.iter().any(|&s| !(s > 0.0)) {
            return Err(LensFitError::config("time delay uncertainties must be positive"));
        }
        self.check_source_index(data.source_index)?;
        self.time_delays.push(data);
        Ok(self)
    }

    fn check_source_index(&self, index: usize) -> Result<()> {
        if index >= self.image_model.point_source().len() {
            return Err(LensFitError::config(format!("no point source {}", index)));
        }
        Ok(())
    }

    pub fn image_model(&self) -> &ImageModel {
        &self.image_model
    }

    pub fn param(&self) -> &Param {
        &self.param
    }

    pub fn config(&self) -> &LikelihoodConfig {
        &self.config
    }

    pub fn data(&self) -> Option<&ImageData> {
        self.data.as_ref()
    }

    /// Log-likelihood of `x`; `f64::NEG_INFINITY` on any failure.
    pub fn log_likelihood(&self, x: &Array1<f64>) -> f64 {
        match self.evaluate(x) {
            Ok(evaluation) if !evaluation.log_likelihood.is_nan() => evaluation.log_likelihood,
            Ok(_) => {
                debug!("likelihood evaluated to NaN");
                f64::NEG_INFINITY
            }
            Err(e) => {
                debug!("likelihood evaluation failed: {}", e);
                f64::NEG_INFINITY
            }
        }
    }

    /// Evaluate `x`, returning the expanded kwargs alongside the value.
    ///
    /// Points outside the bounds evaluate to −∞ without error.
    ///
    /// # Errors
    ///
    /// `ParameterCountMismatch` for a wrong-length vector, plus any error
    /// raised while rendering or solving.
    pub fn evaluate(&self, x: &Array1<f64>) -> Result<Evaluation> {
        let kwargs = self.param.from_vector(x)?;

        if self.config.check_bounds {
            if let Some(i) = x.iter().zip(&self.bounds).position(|(&v, b)| !b.contains(v)) {
                debug!(
                    "parameter {} = {} outside [{}, {}]",
                    self.param.param_names()[i],
                    x[i],
                    self.bounds[i].min,
                    self.bounds[i].max
                );
                return Ok(Evaluation {
                    log_likelihood: f64::NEG_INFINITY,
                    kwargs,
                    model_image: None,
                });
            }
        }

        let mut log_l = 0.0;
        let lens = self.image_model.bind_lens(&kwargs)?;

        if self.config.source_position_likelihood {
            match self.source_position_term(&kwargs, &lens)? {
                Some(term) => log_l += term,
                None => {
                    return Ok(Evaluation {
                        log_likelihood: f64::NEG_INFINITY,
                        kwargs,
                        model_image: None,
                    })
                }
            }
        }
        for data in &self.image_positions {
            log_l += self.image_position_term(data, &kwargs, &lens)?;
        }
        for data in &self.time_delays {
            log_l += self.time_delay_term(data, &kwargs, &lens)?;
        }

        let (kwargs, model_image) = match (&self.data, self.config.image_likelihood) {
            (Some(data), true) => {
                let solution = self.solver.solve(&self.image_model, &kwargs, data)?;
                if self.config.check_positive_flux && !solution.all_positive() {
                    debug!("negative linear amplitude {:?}", solution.amplitudes);
                    return Ok(Evaluation {
                        log_likelihood: f64::NEG_INFINITY,
                        kwargs: solution.kwargs,
                        model_image: Some(solution.model_image),
                    });
                }
                log_l += data.log_likelihood(&solution.model_image)?;
                if self.config.marginalize_linear {
                    log_l -= 0.5 * solution.log_det;
                }
                (solution.kwargs, Some(solution.model_image))
            }
            _ => (kwargs, None),
        };

        Ok(Evaluation {
            log_likelihood: log_l,
            kwargs,
            model_image,
        })
    }

    /// `None` when the hard tolerance is violated.
    fn source_position_term(&self, kwargs: &ModelKwargs, lens: &BoundLensModel<'_>) -> Result<Option<f64>> {
        let sigma2 = self.config.source_position_sigma.powi(2);
        let mut term = 0.0;
        for positions in self
            .image_model
            .point_source()
            .source_positions(&kwargs.point_source, lens)?
        {
            let Some((mx, my)) = mean_position(&positions) else {
                continue;
            };
            if let (Some(tol), Some(spread)) = (self.config.source_position_tolerance, max_distance_from_mean(&positions)) {
                if spread > tol {
                    debug!("source-plane scatter {} exceeds {}", spread, tol);
                    return Ok(None);
                }
            }
            term -= positions
                .iter()
                .map(|&(x, y)| ((x - mx).powi(2) + (y - my).powi(2)) / (2.0 * sigma2))
                .sum::<f64>();
        }
        Ok(Some(term))
    }

    fn image_position_term(&self, data: &ImagePositionData, kwargs: &ModelKwargs, lens: &BoundLensModel<'_>) -> Result<f64> {
        let images = self.image_model.point_source().images(&kwargs.point_source, lens)?;
        let model = &images[data.source_index].positions;
        if model.is_empty() {
            return Err(LensFitError::NoSolutionFound(format!(
                "point source {} has no images",
                data.source_index
            )));
        }
        let sigma2 = data.sigma * data.sigma;
        Ok(-data
            .positions
            .iter()
            .map(|&(x, y)| {
                let d2 = model
                    .iter()
                    .map(|&(mx, my)| (x - mx).powi(2) + (y - my).powi(2))
                    .fold(f64::INFINITY, f64::min);
                d2 / (2.0 * sigma2)
            })
            .sum::<f64>())
    }

    fn time_delay_term(&self, data: &TimeDelayData, kwargs: &ModelKwargs, lens: &BoundLensModel<'_>) -> Result<f64> {
        let times = self
            .image_model
            .point_source()
            .arrival_times(data.source_index, &kwargs.point_source, lens)?;
        if times.len() != data.delays.len() + 1 {
            return Err(LensFitError::ShapeMismatch(format!(
                "{} model images for {} measured delays",
                times.len(),
                data.delays.len()
            )));
        }
        Ok(-times[1..]
            .iter()
            .zip(data.delays.iter().zip(&data.sigmas))
            .map(|(t, (d, s))| ((t - times[0] - d) / s).powi(2) / 2.0)
            .sum::<f64>())
    }
}

impl FitProblem for LikelihoodModule {
    fn log_likelihood(&self, params: &Array1<f64>) -> f64 {
        LikelihoodModule::log_likelihood(self, params)
    }

    fn parameter_count(&self) -> usize {
        self.param.num_params()
    }

    fn bounds(&self) -> Vec<Bounds> {
        self.bounds.clone()
    }
}
