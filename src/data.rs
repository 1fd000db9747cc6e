//! Observed image data and its noise model.
//!
//! Pixels are independent Gaussians with variance
//! `background_rms² + max(d, 0) / t_exp`, where `d` is the observed count
//! rate and `t_exp` the exposure time of the pixel.

use ndarray::{Array2, Zip};

use crate::error::{LensFitError, Result};
use crate::grid::PixelGrid;

/// Exposure time, uniform or per pixel.
#[derive(Debug, Clone, PartialEq)]
pub enum Exposure {
    Uniform(f64),
    Map(Array2<f64>),
}

impl Exposure {
    fn at(&self, index: (usize, usize)) -> f64 {
        match self {
            Exposure::Uniform(t) => *t,
            Exposure::Map(map) => map[index],
        }
    }
}

/// An observed image with its grid, noise properties and likelihood mask.
#[derive(Debug, Clone)]
pub struct ImageData {
    grid: PixelGrid,
    data: Array2<f64>,
    background_rms: f64,
    exposure: Exposure,
    mask: Array2<f64>,
    variance: Array2<f64>,
}

impl ImageData {
    /// Create image data.
    ///
    /// # Arguments
    ///
    /// * `grid` - Pixel grid of the image
    /// * `data` - Observed counts per second, shape `(ny, nx)`
    /// * `background_rms` - Gaussian background noise per pixel
    /// * `exposure` - Exposure time(s) in seconds
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when the data or exposure map disagree with the grid,
    /// `ConfigError` for a negative background or non-positive exposure.
    pub fn new(grid: PixelGrid, data: Array2<f64>, background_rms: f64, exposure: Exposure) -> Result<Self> {
        if data.dim() != grid.shape() {
            return Err(LensFitError::ShapeMismatch(format!(
                "data has shape {:?}, grid has shape {:?}",
                data.dim(),
                grid.shape()
            )));
        }
        if !(background_rms.is_finite() && background_rms >= 0.0) {
            return Err(LensFitError::config("background rms must be non-negative"));
        }
        match &exposure {
            Exposure::Uniform(t) if !(*t > 0.0) => {
                return Err(LensFitError::config("exposure time must be positive"));
            }
            Exposure::Map(map) if map.dim() != grid.shape() => {
                return Err(LensFitError::ShapeMismatch(format!(
                    "exposure map has shape {:?}, grid has shape {:?}",
                    map.dim(),
                    grid.shape()
                )));
            }
            Exposure::Map(map) if map.iter().any(|&t| !(t > 0.0)) => {
                return Err(LensFitError::config("exposure map values must be positive"));
            }
            _ => {}
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(LensFitError::NonFiniteValue("observed data".into()));
        }

        let variance = Array2::from_shape_fn(data.dim(), |idx| {
            background_rms * background_rms + data[idx].max(0.0) / exposure.at(idx)
        });
        if variance.iter().any(|&v| !(v > 0.0)) {
            return Err(LensFitError::config(
                "pixel variance must be positive; set a background rms",
            ));
        }

        let mask = Array2::ones(data.dim());
        Ok(Self {
            grid,
            data,
            background_rms,
            exposure,
            mask,
            variance,
        })
    }

    /// Restrict the likelihood to pixels where `mask` is non-zero.
    pub fn with_mask(mut self, mask: Array2<f64>) -> Result<Self> {
        if mask.dim() != self.grid.shape() {
            return Err(LensFitError::ShapeMismatch(format!(
                "mask has shape {:?}, grid has shape {:?}",
                mask.dim(),
                self.grid.shape()
            )));
        }
        self.mask = mask.mapv(|m| if m != 0.0 { 1.0 } else { 0.0 });
        Ok(self)
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn background_rms(&self) -> f64 {
        self.background_rms
    }

    pub fn exposure(&self) -> &Exposure {
        &self.exposure
    }

    pub fn mask(&self) -> &Array2<f64> {
        &self.mask
    }

    /// Per-pixel noise variance.
    pub fn variance(&self) -> &Array2<f64> {
        &self.variance
    }

    /// Least-squares weights: mask / variance.
    pub fn weights(&self) -> Array2<f64> {
        &self.mask / &self.variance
    }

    /// Number of pixels entering the likelihood.
    pub fn num_data_points(&self) -> usize {
        self.mask.iter().filter(|&&m| m != 0.0).count()
    }

    /// χ² of a model image over the masked pixels.
    pub fn chi_squared(&self, model: &Array2<f64>) -> Result<f64> {
        if model.dim() != self.data.dim() {
            return Err(LensFitError::ShapeMismatch(format!(
                "model has shape {:?}, data has shape {:?}",
                model.dim(),
                self.data.dim()
            )));
        }
        let mut chi2 = 0.0;
        Zip::from(&self.data)
            .and(model)
            .and(&self.mask)
            .and(&self.variance)
            .for_each(|&d, &m, &w, &v| {
                if w != 0.0 {
                    chi2 += (d - m) * (d - m) / v;
                }
            });
        Ok(chi2)
    }

    /// Gaussian log-likelihood `−½ χ²` of a model image.
    pub fn log_likelihood(&self, model: &Array2<f64>) -> Result<f64> {
        Ok(-0.5 * self.chi_squared(model)?)
    }
}
