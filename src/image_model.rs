//! Image rendering.
//!
//! Extended light is evaluated on a supersampled grid (source light at
//! ray-shot positions, lens light unlensed), scaled by the pixel area and
//! combined with PSF convolution in the configured order. Point sources are
//! added afterwards at native resolution.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{LensFitError, Result};
use crate::grid::PixelGrid;
use crate::lens_model::{BoundLensModel, LensModel};
use crate::light_model::{BoundLightModel, LightModel};
use crate::parameters::{ModelKwargs, ModelSchema, ParamSpec};
use crate::point_source::{Amplitude, PointSourceModel};
use crate::psf::{convolve_same, Psf};

/// Order of PSF convolution and sub-pixel averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvolutionOrder {
    /// Average sub-pixels, then convolve with the native kernel
    #[default]
    DownsampleThenConvolve,
    /// Convolve at the supersampled resolution, then average
    ConvolveThenDownsample,
}

/// Numerical rendering options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericsConfig {
    /// Sub-pixels per pixel side
    pub supersampling_factor: usize,

    pub convolution_order: ConvolutionOrder,
}

impl Default for NumericsConfig {
    fn default() -> Self {
        Self {
            supersampling_factor: 1,
            convolution_order: ConvolutionOrder::default(),
        }
    }
}

impl NumericsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supersampling_factor(mut self, factor: usize) -> Self {
        self.supersampling_factor = factor;
        self
    }

    pub fn with_convolution_order(mut self, order: ConvolutionOrder) -> Self {
        self.convolution_order = order;
        self
    }
}

/// The model components rendered into an image.
#[derive(Debug, Clone, Default)]
pub struct ModelComponents {
    pub lens_model: LensModel,
    pub source_light: LightModel,
    pub lens_light: LightModel,
    pub point_source: PointSourceModel,
}

/// Where a linear amplitude is written back into the kwargs.
#[derive(Debug, Clone, PartialEq)]
pub enum AmplitudeSlot {
    SourceLight { index: usize, name: &'static str },
    LensLight { index: usize, name: &'static str },
    /// `source_amp` of a point source
    PointShared { index: usize },
    /// One element of `point_amp` of a point source
    PointImage { index: usize, image: usize, num_images: usize },
}

/// Fixed image plus one unit-amplitude basis image per linear parameter.
#[derive(Debug, Clone)]
pub struct LinearBasis {
    pub fixed: Array2<f64>,
    pub columns: Vec<Array2<f64>>,
    pub slots: Vec<AmplitudeSlot>,
}

impl LinearBasis {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Model image for the given amplitudes.
    pub fn image(&self, amplitudes: &[f64]) -> Array2<f64> {
        let mut image = self.fixed.clone();
        for (column, &a) in self.columns.iter().zip(amplitudes) {
            image.scaled_add(a, column);
        }
        image
    }
}

/// Write solved amplitudes into a copy of `kwargs`.
pub fn apply_amplitudes(kwargs: &ModelKwargs, slots: &[AmplitudeSlot], amplitudes: &[f64]) -> ModelKwargs {
    let mut out = kwargs.clone();
    for (slot, &a) in slots.iter().zip(amplitudes) {
        match *slot {
            AmplitudeSlot::SourceLight { index, name } => {
                if let Some(kw) = out.source_light.get_mut(index) {
                    kw.insert(name, a);
                }
            }
            AmplitudeSlot::LensLight { index, name } => {
                if let Some(kw) = out.lens_light.get_mut(index) {
                    kw.insert(name, a);
                }
            }
            AmplitudeSlot::PointShared { index } => {
                if let Some(kw) = out.point_source.get_mut(index) {
                    kw.insert("source_amp", a);
                }
            }
            AmplitudeSlot::PointImage {
                index,
                image,
                num_images,
            } => {
                if let Some(kw) = out.point_source.get_mut(index) {
                    let mut amps = kw
                        .get("point_amp")
                        .and_then(|v| v.as_array())
                        .map(<[f64]>::to_vec)
                        .unwrap_or_else(|| vec![0.0; num_images]);
                    if let Some(slot) = amps.get_mut(image) {
                        *slot = a;
                    }
                    kw.insert("point_amp", amps);
                }
            }
        }
    }
    out
}

/// Renders model images on a pixel grid.
#[derive(Debug, Clone)]
pub struct ImageModel {
    grid: PixelGrid,
    psf: Psf,
    numerics: NumericsConfig,
    components: ModelComponents,
    sample_ra: Vec<f64>,
    sample_dec: Vec<f64>,
    fine_kernel: Option<Array2<f64>>,
}

impl ImageModel {
    /// Create an image model.
    ///
    /// # Errors
    ///
    /// `ConfigError` for a zero supersampling factor.
    pub fn new(grid: PixelGrid, psf: Psf, numerics: NumericsConfig, components: ModelComponents) -> Result<Self> {
        let factor = numerics.supersampling_factor;
        let (sample_ra, sample_dec) = grid.supersampled_coordinates(factor)?;
        let fine_kernel = match numerics.convolution_order {
            ConvolutionOrder::ConvolveThenDownsample => psf.supersampled_kernel(factor)?,
            ConvolutionOrder::DownsampleThenConvolve => None,
        };
        Ok(Self {
            grid,
            psf,
            numerics,
            components,
            sample_ra,
            sample_dec,
            fine_kernel,
        })
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    pub fn psf(&self) -> &Psf {
        &self.psf
    }

    pub fn numerics(&self) -> &NumericsConfig {
        &self.numerics
    }

    pub fn components(&self) -> &ModelComponents {
        &self.components
    }

    pub fn lens_model(&self) -> &LensModel {
        &self.components.lens_model
    }

    pub fn point_source(&self) -> &PointSourceModel {
        &self.components.point_source
    }

    /// Parameter schema of the full model.
    pub fn schema(&self, special: Vec<ParamSpec>) -> ModelSchema {
        ModelSchema::new(
            self.components.lens_model.param_specs(),
            self.components.source_light.param_specs(),
            self.components.lens_light.param_specs(),
            self.components.point_source.param_specs(),
            special,
        )
    }

    /// Bind the lens model, honouring a `D_dt` special parameter.
    pub fn bind_lens<'a>(&'a self, kwargs: &ModelKwargs) -> Result<BoundLensModel<'a>> {
        let bound = self.components.lens_model.bind(&kwargs.lens)?;
        Ok(match kwargs.special.get("D_dt").and_then(|v| v.as_scalar()) {
            Some(d_dt) => bound.with_time_delay_distance(d_dt),
            None => bound,
        })
    }

    /// Model image with the amplitudes present in `kwargs`.
    ///
    /// Components in linear mode (absent amplitude) contribute nothing.
    pub fn image(&self, kwargs: &ModelKwargs) -> Result<Array2<f64>> {
        Ok(self.linear_basis(kwargs)?.fixed)
    }

    /// Split the model into a fixed image and linear basis images.
    pub fn linear_basis(&self, kwargs: &ModelKwargs) -> Result<LinearBasis> {
        let lens = self.bind_lens(kwargs)?;
        let source = self.components.source_light.bind(&kwargs.source_light)?;
        let lens_light = self.components.lens_light.bind(&kwargs.lens_light)?;

        let (beta_ra, beta_dec) = self.ray_shoot_samples(&lens);
        let mut columns = Vec::new();
        let mut slots = Vec::new();

        let mut fixed = {
            let samples = self.evaluate_samples(|i| {
                source.surface_brightness(beta_ra[i], beta_dec[i])
                    + lens_light.surface_brightness(self.sample_ra[i], self.sample_dec[i])
            });
            self.finish(samples)?
        };

        self.light_columns(&source, &beta_ra, &beta_dec, &mut columns, &mut slots, |index, name| {
            AmplitudeSlot::SourceLight { index, name }
        })?;
        self.light_columns(
            &lens_light,
            &self.sample_ra,
            &self.sample_dec,
            &mut columns,
            &mut slots,
            |index, name| AmplitudeSlot::LensLight { index, name },
        )?;

        let images = self.components.point_source.images(&kwargs.point_source, &lens)?;
        for (index, ps) in images.iter().enumerate() {
            if let Some(fluxes) = ps.fluxes() {
                for (&(ra, dec), flux) in ps.positions.iter().zip(fluxes) {
                    self.psf.add_point_source(&mut fixed, &self.grid, ra, dec, flux);
                }
                continue;
            }
            match ps.amplitude {
                Amplitude::Shared(_) => {
                    let mut column = Array2::zeros(self.grid.shape());
                    for (&(ra, dec), &unit) in ps.positions.iter().zip(&ps.unit_fluxes) {
                        self.psf.add_point_source(&mut column, &self.grid, ra, dec, unit);
                    }
                    columns.push(column);
                    slots.push(AmplitudeSlot::PointShared { index });
                }
                Amplitude::PerImage(_) => {
                    let num_images = ps.positions.len();
                    for (image, (&(ra, dec), &unit)) in ps.positions.iter().zip(&ps.unit_fluxes).enumerate() {
                        let mut column = Array2::zeros(self.grid.shape());
                        self.psf.add_point_source(&mut column, &self.grid, ra, dec, unit);
                        columns.push(column);
                        slots.push(AmplitudeSlot::PointImage {
                            index,
                            image,
                            num_images,
                        });
                    }
                }
            }
        }

        if fixed.iter().any(|v| !v.is_finite()) {
            return Err(LensFitError::NonFiniteValue("model image".into()));
        }

        Ok(LinearBasis {
            fixed,
            columns,
            slots,
        })
    }

    /// Unconvolved surface brightness of the source light, per pixel.
    pub fn source_surface_brightness(&self, kwargs: &ModelKwargs) -> Result<Array2<f64>> {
        let lens = self.bind_lens(kwargs)?;
        let source = self.components.source_light.bind(&kwargs.source_light)?;
        let (ra, dec) = self.ray_shoot_samples(&lens);
        let samples = self.evaluate_samples(|i| source.surface_brightness(ra[i], dec[i]));
        Ok(self.downsample(&self.to_fine(samples)?))
    }

    fn light_columns(
        &self,
        light: &BoundLightModel<'_>,
        ra: &[f64],
        dec: &[f64],
        columns: &mut Vec<Array2<f64>>,
        slots: &mut Vec<AmplitudeSlot>,
        slot: impl Fn(usize, &'static str) -> AmplitudeSlot,
    ) -> Result<()> {
        for index in light.linear_indices() {
            let samples = self.evaluate_samples(|i| light.basis_brightness(index, ra[i], dec[i]));
            columns.push(self.finish(samples)?);
            let name = light.amplitude_name(index).unwrap_or("amp");
            slots.push(slot(index, name));
        }
        Ok(())
    }

    fn ray_shoot_samples(&self, lens: &BoundLensModel<'_>) -> (Vec<f64>, Vec<f64>) {
        let shot = self.evaluate_pairs(|i| lens.ray_shoot(self.sample_ra[i], self.sample_dec[i]));
        shot.into_iter().unzip()
    }

    fn evaluate_samples<F>(&self, f: F) -> Vec<f64>
    where
        F: Fn(usize) -> f64 + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        return (0..self.sample_ra.len()).into_par_iter().map(f).collect();
        #[cfg(not(feature = "parallel"))]
        return (0..self.sample_ra.len()).map(f).collect();
    }

    fn evaluate_pairs<F>(&self, f: F) -> Vec<(f64, f64)>
    where
        F: Fn(usize) -> (f64, f64) + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        return (0..self.sample_ra.len()).into_par_iter().map(f).collect();
        #[cfg(not(feature = "parallel"))]
        return (0..self.sample_ra.len()).map(f).collect();
    }

    /// Supersampled flux array: surface brightness times pixel area.
    fn to_fine(&self, samples: Vec<f64>) -> Result<Array2<f64>> {
        let f = self.numerics.supersampling_factor;
        let (ny, nx) = self.grid.shape();
        let area = self.grid.pixel_area();
        Array2::from_shape_vec((ny * f, nx * f), samples)
            .map(|a| a * area)
            .map_err(|e| LensFitError::ShapeMismatch(e.to_string()))
    }

    /// Average `f × f` blocks to native pixels.
    fn downsample(&self, fine: &Array2<f64>) -> Array2<f64> {
        let f = self.numerics.supersampling_factor;
        if f == 1 {
            return fine.clone();
        }
        let norm = (f * f) as f64;
        Array2::from_shape_fn(self.grid.shape(), |(y, x)| {
            let mut sum = 0.0;
            for r in y * f..(y + 1) * f {
                for c in x * f..(x + 1) * f {
                    sum += fine[[r, c]];
                }
            }
            sum / norm
        })
    }

    /// Supersampled samples to a convolved native image.
    fn finish(&self, samples: Vec<f64>) -> Result<Array2<f64>> {
        let fine = self.to_fine(samples)?;
        Ok(match self.numerics.convolution_order {
            ConvolutionOrder::DownsampleThenConvolve => self.psf.convolve(&self.downsample(&fine)),
            ConvolutionOrder::ConvolveThenDownsample => match &self.fine_kernel {
                Some(kernel) => self.downsample(&convolve_same(&fine.view(), &kernel.view())),
                None => self.downsample(&fine),
            },
        })
    }
}
