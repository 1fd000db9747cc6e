//! Serde configuration records and their builders.
//!
//! A complete fit is described by a [`FitConfig`]: the model components by
//! profile name, the imaging setup, parameter settings, likelihood options
//! and the fitting steps. Records are plain data; they are validated when
//! built into engine objects.
//!
//! # Example
//!
//! ```
//! use lensfit_rs::config::FitConfig;
//! use lensfit_rs::profiles::ProfileRegistry;
//!
//! let json = r#"{
//!     "model": {"lens_models": ["SIS"], "source_light": ["GAUSSIAN"]},
//!     "imaging": {
//!         "grid": {"nx": 20, "ny": 20, "transform_pix2angle": [[-0.1, 0.0], [0.0, 0.1]],
//!                  "ra_at_xy_0": 0.95, "dec_at_xy_0": -0.95},
//!         "psf": {"psf_type": "GAUSSIAN", "fwhm": 0.2}
//!     }
//! }"#;
//! let config = FitConfig::from_json(json).unwrap();
//! let image_model = config.build_image_model(&ProfileRegistry::default()).unwrap();
//! assert_eq!(image_model.grid().shape(), (20, 20));
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cosmology::HubbleLawCosmology;
use crate::data::ImageData;
use crate::error::{LensFitError, Result};
use crate::fitting::FitStep;
use crate::grid::PixelGrid;
use crate::image_model::{ImageModel, ModelComponents, NumericsConfig};
use crate::lens_equation::{LensEquationSolver, SolverConfig};
use crate::lens_model::LensModel;
use crate::likelihood::{LikelihoodConfig, LikelihoodModule};
use crate::light_model::LightModel;
use crate::parameters::{JointConstraint, ModelKwargs, Param, ParamSpec};
use crate::point_source::{PointSourceModel, PointSourceSpec};
use crate::profiles::ProfileRegistry;
use crate::psf::PsfConfig;

/// Special parameters that may be sampled alongside the profiles.
const SPECIAL_PARAMS: [ParamSpec; 1] = [ParamSpec::nonlinear("D_dt")];

/// Model components by profile name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub lens_models: Vec<String>,

    /// Per-deflector redshifts; enables multi-plane ray tracing
    pub lens_redshifts: Option<Vec<f64>>,

    /// Lens redshift of a single-plane model, for time delays
    pub z_lens: Option<f64>,

    pub z_source: Option<f64>,

    /// Hubble constant of the distance provider (km/s/Mpc)
    pub h0: f64,

    pub source_light: Vec<String>,

    pub lens_light: Vec<String>,

    pub point_sources: Vec<PointSourceSpec>,

    pub solver: SolverConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            lens_models: Vec::new(),
            lens_redshifts: None,
            z_lens: None,
            z_source: None,
            h0: 70.0,
            source_light: Vec::new(),
            lens_light: Vec::new(),
            point_sources: Vec::new(),
            solver: SolverConfig::default(),
        }
    }
}

impl ModelConfig {
    /// Resolve profile names and build the model components.
    ///
    /// # Errors
    ///
    /// `ConfigError` for unknown profile names, inconsistent redshifts or an
    /// invalid solver configuration.
    pub fn build(&self, registry: &ProfileRegistry) -> Result<ModelComponents> {
        let lenses = self
            .lens_models
            .iter()
            .map(|name| registry.lens(name))
            .collect::<Result<Vec<_>>>()?;

        let lens_model = match (&self.lens_redshifts, self.z_lens, self.z_source) {
            (Some(redshifts), _, Some(z_source)) => {
                let cosmology = HubbleLawCosmology::new(self.h0)?;
                LensModel::multi_plane(lenses, redshifts.clone(), z_source, &cosmology)?
            }
            (Some(_), _, None) => {
                return Err(LensFitError::config("multi-plane lensing needs a source redshift"))
            }
            (None, Some(z_lens), Some(z_source)) => {
                let cosmology = Arc::new(HubbleLawCosmology::new(self.h0)?);
                LensModel::new(lenses).with_cosmology(z_lens, z_source, cosmology)?
            }
            _ => LensModel::new(lenses),
        };

        let light = |names: &[String]| -> Result<LightModel> {
            Ok(LightModel::new(
                names.iter().map(|name| registry.light(name)).collect::<Result<Vec<_>>>()?,
            ))
        };

        Ok(ModelComponents {
            lens_model,
            source_light: light(&self.source_light)?,
            lens_light: light(&self.lens_light)?,
            point_source: PointSourceModel::new(
                self.point_sources.clone(),
                LensEquationSolver::new(self.solver.clone())?,
            )?,
        })
    }
}

/// Pixel grid, PSF and numerics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagingConfig {
    pub grid: PixelGrid,

    #[serde(default)]
    pub psf: PsfConfig,

    #[serde(default)]
    pub numerics: NumericsConfig,
}

/// Initial values, spreads, fixed values, bounds and joints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamConfig {
    pub init: ModelKwargs,

    pub sigma: ModelKwargs,

    pub fixed: ModelKwargs,

    pub lower: Option<ModelKwargs>,

    pub upper: Option<ModelKwargs>,

    pub joints: Vec<JointConstraint>,

    /// Special parameters to sample, e.g. `"D_dt"`
    pub special: Vec<String>,

    /// Solve linear amplitudes by least squares instead of sampling them
    pub linear_solver: bool,
}

impl Default for ParamConfig {
    fn default() -> Self {
        Self {
            init: ModelKwargs::default(),
            sigma: ModelKwargs::default(),
            fixed: ModelKwargs::default(),
            lower: None,
            upper: None,
            joints: Vec::new(),
            special: Vec::new(),
            linear_solver: true,
        }
    }
}

impl ParamConfig {
    fn special_specs(&self) -> Result<Vec<ParamSpec>> {
        self.special
            .iter()
            .map(|name| {
                SPECIAL_PARAMS
                    .iter()
                    .find(|s| s.name == name.as_str())
                    .copied()
                    .ok_or_else(|| LensFitError::config(format!("unknown special parameter '{}'", name)))
            })
            .collect()
    }
}

/// A complete fit description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub model: ModelConfig,

    pub imaging: ImagingConfig,

    #[serde(default)]
    pub params: ParamConfig,

    #[serde(default)]
    pub likelihood: LikelihoodConfig,

    #[serde(default)]
    pub steps: Vec<FitStep>,
}

impl FitConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LensFitError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn build_image_model(&self, registry: &ProfileRegistry) -> Result<ImageModel> {
        let components = self.model.build(registry)?;
        let grid = self.imaging.grid.clone();
        let psf = self.imaging.psf.build(grid.pixel_width())?;
        ImageModel::new(grid, psf, self.imaging.numerics.clone(), components)
    }

    /// Parameter marshaling for `image_model`.
    pub fn build_param(&self, image_model: &ImageModel) -> Result<Param> {
        let schema = image_model.schema(self.params.special_specs()?);
        Param::new(
            schema,
            self.params.fixed.clone(),
            self.params.joints.clone(),
            self.params.linear_solver,
        )
    }

    /// Build the likelihood, attaching `data` and the configured bounds.
    pub fn build_likelihood(&self, registry: &ProfileRegistry, data: Option<ImageData>) -> Result<LikelihoodModule> {
        let image_model = self.build_image_model(registry)?;
        let param = self.build_param(&image_model)?;
        let bounds = match (&self.params.lower, &self.params.upper) {
            (Some(lower), Some(upper)) => Some(param.bounds(lower, upper)?),
            (None, None) => None,
            _ => return Err(LensFitError::config("lower and upper bounds must be given together")),
        };

        let mut likelihood = LikelihoodModule::new(image_model, param, self.likelihood.clone())?;
        if let Some(bounds) = bounds {
            likelihood = likelihood.with_bounds(bounds)?;
        }
        if let Some(data) = data {
            likelihood = likelihood.with_data(data)?;
        }
        Ok(likelihood)
    }
}
