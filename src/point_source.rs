//! Point sources and their lensed images.
//!
//! Three parameterisations are supported:
//!
//! - `SOURCE_POSITION`: a source-plane position; images come from the lens
//!   equation solver and their amplitudes are `source_amp · |μ|`
//! - `LENSED_POSITION`: image-plane positions with one amplitude per image,
//!   or `source_amp · |μ|` when the magnification is fixed by the lens model
//! - `UNLENSED`: image-plane positions not subject to lensing

use serde::{Deserialize, Serialize};

use crate::error::{LensFitError, Result};
use crate::lens_equation::LensEquationSolver;
use crate::lens_model::BoundLensModel;
use crate::parameters::{Kwargs, ParamSpec};

/// Point source parameterisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointSourceType {
    SourcePosition,
    LensedPosition,
    Unlensed,
}

/// A point source declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSourceSpec {
    pub kind: PointSourceType,

    /// Number of images, for image-plane parameterisations
    #[serde(default)]
    pub num_images: usize,

    /// Tie image amplitudes to the lens model magnification
    #[serde(default)]
    pub fixed_magnification: bool,
}

impl PointSourceSpec {
    pub fn source_position() -> Self {
        Self {
            kind: PointSourceType::SourcePosition,
            num_images: 0,
            fixed_magnification: true,
        }
    }

    pub fn lensed_position(num_images: usize) -> Self {
        Self {
            kind: PointSourceType::LensedPosition,
            num_images,
            fixed_magnification: false,
        }
    }

    pub fn unlensed(num_images: usize) -> Self {
        Self {
            kind: PointSourceType::Unlensed,
            num_images,
            fixed_magnification: false,
        }
    }

    pub fn with_fixed_magnification(mut self, fixed: bool) -> Self {
        self.fixed_magnification = fixed;
        self
    }

    /// Whether the amplitudes scale with the magnification.
    fn uses_magnification(&self) -> bool {
        match self.kind {
            PointSourceType::SourcePosition => true,
            PointSourceType::LensedPosition => self.fixed_magnification,
            PointSourceType::Unlensed => false,
        }
    }

    /// Declared parameters of this source.
    pub fn param_specs(&self) -> Vec<ParamSpec> {
        let n = self.num_images;
        match self.kind {
            PointSourceType::SourcePosition => vec![
                ParamSpec::nonlinear("ra_source"),
                ParamSpec::nonlinear("dec_source"),
                ParamSpec::amplitude("source_amp"),
            ],
            PointSourceType::LensedPosition if self.fixed_magnification => vec![
                ParamSpec::nonlinear("ra_image").array(n),
                ParamSpec::nonlinear("dec_image").array(n),
                ParamSpec::amplitude("source_amp"),
            ],
            PointSourceType::LensedPosition | PointSourceType::Unlensed => vec![
                ParamSpec::nonlinear("ra_image").array(n),
                ParamSpec::nonlinear("dec_image").array(n),
                ParamSpec::amplitude("point_amp").array(n),
            ],
        }
    }

    fn validate(&self) -> Result<()> {
        let needs_images = self.kind != PointSourceType::SourcePosition;
        if needs_images && self.num_images == 0 {
            return Err(LensFitError::config(format!(
                "point source {:?} needs at least one image",
                self.kind
            )));
        }
        if self.kind == PointSourceType::Unlensed && self.fixed_magnification {
            return Err(LensFitError::config(
                "unlensed point sources cannot have a fixed magnification",
            ));
        }
        Ok(())
    }
}

/// Amplitude parameter of a resolved point source.
#[derive(Debug, Clone, PartialEq)]
pub enum Amplitude {
    /// One amplitude shared by all images, `None` when solved linearly
    Shared(Option<f64>),
    /// One amplitude per image, `None` when solved linearly
    PerImage(Option<Vec<f64>>),
}

/// Images of a point source with their relative fluxes.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSourceImages {
    pub positions: Vec<(f64, f64)>,

    /// Flux of each image per unit amplitude (`|μ|` or 1)
    pub unit_fluxes: Vec<f64>,

    pub amplitude: Amplitude,
}

impl PointSourceImages {
    /// Image fluxes, when the amplitude is known.
    pub fn fluxes(&self) -> Option<Vec<f64>> {
        match &self.amplitude {
            Amplitude::Shared(Some(a)) => Some(self.unit_fluxes.iter().map(|u| a * u).collect()),
            Amplitude::PerImage(Some(amps)) => Some(
                amps.iter()
                    .zip(&self.unit_fluxes)
                    .map(|(a, u)| a * u)
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Number of linear parameters this source contributes.
    pub fn num_linear(&self) -> usize {
        match &self.amplitude {
            Amplitude::Shared(None) => 1,
            Amplitude::PerImage(None) => self.positions.len(),
            _ => 0,
        }
    }
}

/// The point sources of a model.
#[derive(Debug, Clone, Default)]
pub struct PointSourceModel {
    sources: Vec<PointSourceSpec>,
    solver: LensEquationSolver,
}

impl PointSourceModel {
    pub fn new(sources: Vec<PointSourceSpec>, solver: LensEquationSolver) -> Result<Self> {
        for source in &sources {
            source.validate()?;
        }
        Ok(Self { sources, solver })
    }

    pub fn sources(&self) -> &[PointSourceSpec] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn solver(&self) -> &LensEquationSolver {
        &self.solver
    }

    /// Parameter declarations of every source, in order.
    pub fn param_specs(&self) -> Vec<Vec<ParamSpec>> {
        self.sources.iter().map(|s| s.param_specs()).collect()
    }

    fn check_count(&self, kwargs: &[Kwargs]) -> Result<()> {
        if kwargs.len() != self.sources.len() {
            return Err(LensFitError::config(format!(
                "{} point source kwargs given for {} point sources",
                kwargs.len(),
                self.sources.len()
            )));
        }
        Ok(())
    }

    /// Resolve image positions and fluxes of every source.
    ///
    /// A `SOURCE_POSITION` source without images in the search window yields
    /// an empty image list.
    pub fn images(&self, kwargs: &[Kwargs], lens: &BoundLensModel<'_>) -> Result<Vec<PointSourceImages>> {
        self.check_count(kwargs)?;
        self.sources
            .iter()
            .zip(kwargs)
            .map(|(spec, kw)| self.resolve(spec, kw, lens))
            .collect()
    }

    fn resolve(&self, spec: &PointSourceSpec, kw: &Kwargs, lens: &BoundLensModel<'_>) -> Result<PointSourceImages> {
        kw.validate(&spec.param_specs(), "point source", true)?;

        let positions = match spec.kind {
            PointSourceType::SourcePosition => {
                let (ra, dec) = (kw.scalar("ra_source")?, kw.scalar("dec_source")?);
                self.solver.image_positions(lens, ra, dec)
            }
            PointSourceType::LensedPosition | PointSourceType::Unlensed => kw
                .array("ra_image")?
                .iter()
                .copied()
                .zip(kw.array("dec_image")?.iter().copied())
                .collect(),
        };
        if positions.iter().any(|(x, y)| !(x.is_finite() && y.is_finite())) {
            return Err(LensFitError::NonFiniteValue("point source image position".into()));
        }

        let unit_fluxes = if spec.uses_magnification() {
            positions
                .iter()
                .map(|&(x, y)| lens.magnification(x, y).map(f64::abs))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![1.0; positions.len()]
        };

        let amplitude = if spec.uses_magnification() {
            Amplitude::Shared(kw.get("source_amp").and_then(|v| v.as_scalar()))
        } else {
            Amplitude::PerImage(kw.get("point_amp").and_then(|v| v.as_array()).map(<[f64]>::to_vec))
        };

        Ok(PointSourceImages {
            positions,
            unit_fluxes,
            amplitude,
        })
    }

    /// Source-plane positions of the images of each `LENSED_POSITION` source.
    ///
    /// Other parameterisations yield an empty list.
    pub fn source_positions(&self, kwargs: &[Kwargs], lens: &BoundLensModel<'_>) -> Result<Vec<Vec<(f64, f64)>>> {
        self.check_count(kwargs)?;
        self.sources
            .iter()
            .zip(kwargs)
            .map(|(spec, kw)| {
                if spec.kind != PointSourceType::LensedPosition {
                    return Ok(Vec::new());
                }
                let ra = kw.array("ra_image")?;
                let dec = kw.array("dec_image")?;
                Ok(ra.iter().zip(dec).map(|(&x, &y)| lens.ray_shoot(x, y)).collect())
            })
            .collect()
    }

    /// Whether the images of every `LENSED_POSITION` source map back to a
    /// common source position within `tolerance`.
    pub fn check_image_positions(&self, kwargs: &[Kwargs], lens: &BoundLensModel<'_>, tolerance: f64) -> Result<bool> {
        for positions in self.source_positions(kwargs, lens)? {
            if let Some(spread) = max_distance_from_mean(&positions) {
                if spread > tolerance {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Arrival times (days) of the images of source `index`, with the source
    /// position taken from the parameters or the mean ray-shot position.
    pub fn arrival_times(&self, index: usize, kwargs: &[Kwargs], lens: &BoundLensModel<'_>) -> Result<Vec<f64>> {
        self.check_count(kwargs)?;
        let spec = self
            .sources
            .get(index)
            .ok_or_else(|| LensFitError::config(format!("no point source {}", index)))?;
        let kw = &kwargs[index];
        let images = self.resolve(spec, kw, lens)?;

        let (sx, sy) = match spec.kind {
            PointSourceType::SourcePosition => (kw.scalar("ra_source")?, kw.scalar("dec_source")?),
            PointSourceType::LensedPosition => {
                let shot: Vec<(f64, f64)> = images.positions.iter().map(|&(x, y)| lens.ray_shoot(x, y)).collect();
                mean_position(&shot).ok_or_else(|| LensFitError::config("point source has no images"))?
            }
            PointSourceType::Unlensed => {
                return Err(LensFitError::config("unlensed point sources have no time delays"))
            }
        };

        images
            .positions
            .iter()
            .map(|&(x, y)| lens.arrival_time(x, y, sx, sy))
            .collect()
    }
}

pub(crate) fn mean_position(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    Some((sx / n, sy / n))
}

/// Largest distance of a point from the mean of all points.
pub(crate) fn max_distance_from_mean(points: &[(f64, f64)]) -> Option<f64> {
    let (mx, my) = mean_position(points)?;
    Some(
        points
            .iter()
            .map(|&(x, y)| (x - mx).hypot(y - my))
            .fold(0.0, f64::max),
    )
}
