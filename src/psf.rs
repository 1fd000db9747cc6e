//! Point spread functions and 2-D convolution.
//!
//! A PSF is either absent, an analytic Gaussian or Moffat profile rendered
//! to a pixel kernel, or an explicit pixel kernel. Kernels have odd
//! dimensions, are centered and sum to one.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{LensFitError, Result};
use crate::grid::PixelGrid;

/// FWHM of a unit-sigma Gaussian, `2 sqrt(2 ln 2)`.
pub const FWHM_TO_SIGMA: f64 = 2.354_820_045_030_949_3;

/// Analytic kernels extend to this many FWHM from their center.
const DEFAULT_TRUNCATION: f64 = 3.0;

/// Serialisable PSF description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "psf_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PsfConfig {
    None,
    Gaussian {
        fwhm: f64,
        #[serde(default = "default_truncation")]
        truncation: f64,
    },
    Moffat {
        fwhm: f64,
        beta: f64,
        #[serde(default = "default_truncation")]
        truncation: f64,
    },
    Pixel {
        kernel: Vec<Vec<f64>>,
        #[serde(default)]
        supersampled_kernel: Option<Vec<Vec<f64>>>,
        #[serde(default)]
        supersampling_factor: Option<usize>,
    },
}

fn default_truncation() -> f64 {
    DEFAULT_TRUNCATION
}

impl Default for PsfConfig {
    fn default() -> Self {
        PsfConfig::None
    }
}

impl PsfConfig {
    /// Build the PSF for a detector with the given pixel size (arcsec).
    pub fn build(&self, pixel_size: f64) -> Result<Psf> {
        match self {
            PsfConfig::None => Ok(Psf::none()),
            PsfConfig::Gaussian { fwhm, truncation } => Psf::gaussian(*fwhm, pixel_size, *truncation),
            PsfConfig::Moffat {
                fwhm,
                beta,
                truncation,
            } => Psf::moffat(*fwhm, *beta, pixel_size, *truncation),
            PsfConfig::Pixel {
                kernel,
                supersampled_kernel,
                supersampling_factor,
            } => {
                let psf = Psf::pixel(nested_to_array(kernel)?)?;
                match (supersampled_kernel, supersampling_factor) {
                    (Some(k), Some(f)) => psf.with_supersampled_kernel(nested_to_array(k)?, *f),
                    (None, _) => Ok(psf),
                    (Some(_), None) => Err(LensFitError::config(
                        "a supersampled PSF kernel needs its supersampling factor",
                    )),
                }
            }
        }
    }
}

fn nested_to_array(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(LensFitError::ShapeMismatch("PSF kernel rows differ in length".into()));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), ncols), flat)
        .map_err(|e| LensFitError::ShapeMismatch(e.to_string()))
}

/// Analytic PSF shapes, radii in arcsec.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Analytic {
    Gaussian { sigma: f64 },
    Moffat { alpha: f64, beta: f64 },
}

impl Analytic {
    /// Normalised profile value at radius `r`.
    fn value(&self, r: f64) -> f64 {
        match *self {
            Analytic::Gaussian { sigma } => {
                (-r * r / (2.0 * sigma * sigma)).exp() / (2.0 * std::f64::consts::PI * sigma * sigma)
            }
            Analytic::Moffat { alpha, beta } => {
                (beta - 1.0) / (std::f64::consts::PI * alpha * alpha)
                    * (1.0 + (r / alpha).powi(2)).powf(-beta)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PsfKind {
    None,
    Analytic { shape: Analytic, radius: f64 },
    Pixel,
}

/// A point spread function.
#[derive(Debug, Clone, PartialEq)]
pub struct Psf {
    kind: PsfKind,
    /// Kernel at native resolution; `None` for no PSF
    kernel: Option<Array2<f64>>,
    /// Explicit kernel at a supersampled resolution
    supersampled: Option<(usize, Array2<f64>)>,
    pixel_size: f64,
}

impl Psf {
    /// No blurring.
    pub fn none() -> Self {
        Self {
            kind: PsfKind::None,
            kernel: None,
            supersampled: None,
            pixel_size: 1.0,
        }
    }

    /// Gaussian PSF with the given FWHM (arcsec).
    pub fn gaussian(fwhm: f64, pixel_size: f64, truncation: f64) -> Result<Self> {
        check_positive("FWHM", fwhm)?;
        let shape = Analytic::Gaussian {
            sigma: fwhm / FWHM_TO_SIGMA,
        };
        Self::analytic(shape, fwhm * truncation, pixel_size)
    }

    /// Moffat PSF `(1 + (r/α)²)^−β` with the given FWHM (arcsec).
    pub fn moffat(fwhm: f64, beta: f64, pixel_size: f64, truncation: f64) -> Result<Self> {
        check_positive("FWHM", fwhm)?;
        if !(beta > 1.0) {
            return Err(LensFitError::config(format!(
                "Moffat beta must exceed 1, got {}",
                beta
            )));
        }
        let alpha = fwhm / (2.0 * (2f64.powf(1.0 / beta) - 1.0).sqrt());
        Self::analytic(Analytic::Moffat { alpha, beta }, fwhm * truncation, pixel_size)
    }

    fn analytic(shape: Analytic, radius: f64, pixel_size: f64) -> Result<Self> {
        check_positive("pixel size", pixel_size)?;
        check_positive("truncation radius", radius)?;
        let kernel = render_kernel(shape, radius, pixel_size);
        Ok(Self {
            kind: PsfKind::Analytic { shape, radius },
            kernel: Some(kernel),
            supersampled: None,
            pixel_size,
        })
    }

    /// PSF from an explicit pixel kernel; it is normalised to unit sum.
    ///
    /// # Errors
    ///
    /// `ConfigError` for even dimensions or a non-positive sum.
    pub fn pixel(kernel: Array2<f64>) -> Result<Self> {
        Ok(Self {
            kind: PsfKind::Pixel,
            kernel: Some(normalise_kernel(kernel)?),
            supersampled: None,
            pixel_size: 1.0,
        })
    }

    /// Attach an explicit kernel sampled `factor` times finer.
    pub fn with_supersampled_kernel(mut self, kernel: Array2<f64>, factor: usize) -> Result<Self> {
        if factor == 0 {
            return Err(LensFitError::config("supersampling factor must be at least 1"));
        }
        self.supersampled = Some((factor, normalise_kernel(kernel)?));
        Ok(self)
    }

    pub fn is_none(&self) -> bool {
        self.kind == PsfKind::None
    }

    /// Kernel at native resolution.
    pub fn kernel(&self) -> Option<&Array2<f64>> {
        self.kernel.as_ref()
    }

    /// Kernel sampled `factor` times finer than the native pixels.
    ///
    /// Uses the explicit supersampled kernel when its factor matches;
    /// analytic shapes are re-rendered; pixel kernels are upsampled by
    /// bilinear interpolation.
    pub fn supersampled_kernel(&self, factor: usize) -> Result<Option<Array2<f64>>> {
        if factor == 0 {
            return Err(LensFitError::config("supersampling factor must be at least 1"));
        }
        if factor == 1 {
            return Ok(self.kernel.clone());
        }
        if let Some((f, kernel)) = &self.supersampled {
            if *f == factor {
                return Ok(Some(kernel.clone()));
            }
        }
        match (&self.kind, &self.kernel) {
            (PsfKind::None, _) | (_, None) => Ok(None),
            (PsfKind::Analytic { shape, radius }, _) => Ok(Some(render_kernel(
                *shape,
                *radius,
                self.pixel_size / factor as f64,
            ))),
            (PsfKind::Pixel, Some(kernel)) => Ok(Some(upsample_kernel(kernel, factor)?)),
        }
    }

    /// Convolve an image with the native kernel.
    pub fn convolve(&self, image: &Array2<f64>) -> Array2<f64> {
        match &self.kernel {
            Some(kernel) => convolve_same(&image.view(), &kernel.view()),
            None => image.clone(),
        }
    }

    /// Image of a unit-flux point source at `(ra, dec)`.
    ///
    /// Analytic PSFs are evaluated at every pixel center within their
    /// truncation radius and the stamp is normalised to unit sum; pixel
    /// kernels are shifted to the sub-pixel position with bilinear weights;
    /// without PSF the flux is split bilinearly over the four nearest pixels.
    pub fn point_source_image(&self, grid: &PixelGrid, ra: f64, dec: f64) -> Array2<f64> {
        let mut image = Array2::zeros(grid.shape());
        self.add_point_source(&mut image, grid, ra, dec, 1.0);
        image
    }

    /// Add a point source of flux `flux` to `image`.
    ///
    /// Positions whose stamp lies wholly off the grid, or that are not
    /// finite, contribute nothing.
    pub fn add_point_source(&self, image: &mut Array2<f64>, grid: &PixelGrid, ra: f64, dec: f64, flux: f64) {
        let (px, py) = grid.angle_to_pixel(ra, dec);
        if !(px.is_finite() && py.is_finite()) {
            return;
        }
        let reach = self.stamp_reach(grid);
        let margin = reach as f64 + 1.0;
        let (rows, cols) = image.dim();
        if px < -margin || py < -margin || px > cols as f64 + margin || py > rows as f64 + margin {
            return;
        }

        match (&self.kind, &self.kernel) {
            (PsfKind::Analytic { shape, radius }, _) => {
                let (xc, yc) = (px.round() as isize, py.round() as isize);
                let mut stamp = Vec::new();
                let mut total = 0.0;
                for y in (yc - reach)..=(yc + reach) {
                    for x in (xc - reach)..=(xc + reach) {
                        let (pra, pdec) = grid.pixel_to_angle(x as f64, y as f64);
                        let r = (pra - ra).hypot(pdec - dec);
                        if r <= *radius {
                            let v = shape.value(r);
                            total += v;
                            stamp.push((x, y, v));
                        }
                    }
                }
                if !(total > 0.0) {
                    // PSF narrower than the pixel sampling
                    add_bilinear(image, px, py, flux);
                    return;
                }
                for (x, y, v) in stamp {
                    if let Some(pixel) = pixel_mut(image, x, y) {
                        *pixel += flux * v / total;
                    }
                }
            }
            (PsfKind::Pixel, Some(kernel)) => {
                let (half_r, half_c) = ((kernel.nrows() / 2) as isize, (kernel.ncols() / 2) as isize);
                for ((dy, dx), w) in bilinear_weights(px, py) {
                    for ((kr, kc), k) in kernel.indexed_iter() {
                        let y = dy + kr as isize - half_r;
                        let x = dx + kc as isize - half_c;
                        if let Some(pixel) = pixel_mut(image, x, y) {
                            *pixel += flux * w * k;
                        }
                    }
                }
            }
            _ => add_bilinear(image, px, py, flux),
        }
    }

    /// Half-size in native pixels of the stamp a point source touches.
    fn stamp_reach(&self, grid: &PixelGrid) -> isize {
        match (&self.kind, &self.kernel) {
            (PsfKind::Analytic { radius, .. }, _) => (radius / grid.pixel_width()).ceil() as isize + 1,
            (PsfKind::Pixel, Some(kernel)) => (kernel.nrows().max(kernel.ncols()) / 2) as isize + 1,
            _ => 1,
        }
    }
}

fn add_bilinear(image: &mut Array2<f64>, px: f64, py: f64, flux: f64) {
    for ((y, x), w) in bilinear_weights(px, py) {
        if let Some(pixel) = pixel_mut(image, x, y) {
            *pixel += flux * w;
        }
    }
}

fn check_positive(what: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(LensFitError::config(format!("{} must be positive, got {}", what, value)));
    }
    Ok(())
}

fn pixel_mut(image: &mut Array2<f64>, x: isize, y: isize) -> Option<&mut f64> {
    if x < 0 || y < 0 {
        return None;
    }
    image.get_mut((y as usize, x as usize))
}

/// The four integer pixels around a fractional position with their weights.
fn bilinear_weights(px: f64, py: f64) -> [((isize, isize), f64); 4] {
    let (x0, y0) = (px.floor(), py.floor());
    let (fx, fy) = (px - x0, py - y0);
    let (x0, y0) = (x0 as isize, y0 as isize);
    [
        ((y0, x0), (1.0 - fx) * (1.0 - fy)),
        ((y0, x0 + 1), fx * (1.0 - fy)),
        ((y0 + 1, x0), (1.0 - fx) * fy),
        ((y0 + 1, x0 + 1), fx * fy),
    ]
}

/// Render an analytic shape onto an odd, normalised kernel.
fn render_kernel(shape: Analytic, radius: f64, pixel_size: f64) -> Array2<f64> {
    let half = (radius / pixel_size).ceil().max(1.0) as usize;
    let size = 2 * half + 1;
    let mut kernel = Array2::from_shape_fn((size, size), |(i, j)| {
        let dy = (i as f64 - half as f64) * pixel_size;
        let dx = (j as f64 - half as f64) * pixel_size;
        shape.value(dx.hypot(dy))
    });
    let sum = kernel.sum();
    kernel.mapv_inplace(|v| v / sum);
    kernel
}

/// Check dimensions and normalise a kernel to unit sum.
pub fn normalise_kernel(mut kernel: Array2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = kernel.dim();
    if rows % 2 == 0 || cols % 2 == 0 {
        return Err(LensFitError::config(format!(
            "PSF kernel must have odd dimensions, got {}x{}",
            rows, cols
        )));
    }
    if kernel.iter().any(|v| !v.is_finite()) {
        return Err(LensFitError::NonFiniteValue("PSF kernel".into()));
    }
    let sum = kernel.sum();
    if !(sum > 0.0) {
        return Err(LensFitError::config("PSF kernel must have a positive sum"));
    }
    kernel.mapv_inplace(|v| v / sum);
    Ok(kernel)
}

/// Upsample a kernel by bilinear interpolation, keeping it odd and centered.
fn upsample_kernel(kernel: &Array2<f64>, factor: usize) -> Result<Array2<f64>> {
    let (rows, cols) = kernel.dim();
    let out_rows = rows * factor + (1 - (rows * factor) % 2);
    let out_cols = cols * factor + (1 - (cols * factor) % 2);
    let (cr_in, cc_in) = ((rows / 2) as f64, (cols / 2) as f64);
    let (cr_out, cc_out) = ((out_rows / 2) as f64, (out_cols / 2) as f64);
    let f = factor as f64;

    let sample = |r: f64, c: f64| -> f64 {
        let (r0, c0) = (r.floor(), c.floor());
        let (fr, fc) = (r - r0, c - c0);
        let at = |rr: f64, cc: f64| -> f64 {
            if rr < 0.0 || cc < 0.0 {
                return 0.0;
            }
            kernel.get((rr as usize, cc as usize)).copied().unwrap_or(0.0)
        };
        at(r0, c0) * (1.0 - fr) * (1.0 - fc)
            + at(r0, c0 + 1.0) * (1.0 - fr) * fc
            + at(r0 + 1.0, c0) * fr * (1.0 - fc)
            + at(r0 + 1.0, c0 + 1.0) * fr * fc
    };

    let upsampled = Array2::from_shape_fn((out_rows, out_cols), |(i, j)| {
        sample(cr_in + (i as f64 - cr_out) / f, cc_in + (j as f64 - cc_out) / f)
    });
    normalise_kernel(upsampled)
}

/// 2-D convolution in "same" mode with zero padding.
///
/// The output has the shape of `image`; the kernel is flipped, so an
/// asymmetric kernel shifts flux in the direction of its offset.
pub fn convolve_same(image: &ArrayView2<f64>, kernel: &ArrayView2<f64>) -> Array2<f64> {
    let (img_rows, img_cols) = image.dim();
    let (ker_rows, ker_cols) = kernel.dim();
    let pad_rows = (ker_rows / 2) as isize;
    let pad_cols = (ker_cols / 2) as isize;

    let row = |i: usize| -> Vec<f64> {
        (0..img_cols)
            .map(|j| {
                let mut sum = 0.0;
                for ki in 0..ker_rows {
                    let img_row = i as isize + pad_rows - ki as isize;
                    if img_row < 0 || img_row >= img_rows as isize {
                        continue;
                    }
                    for kj in 0..ker_cols {
                        let img_col = j as isize + pad_cols - kj as isize;
                        if img_col >= 0 && img_col < img_cols as isize {
                            sum += image[[img_row as usize, img_col as usize]] * kernel[[ki, kj]];
                        }
                    }
                }
                sum
            })
            .collect()
    };

    #[cfg(feature = "parallel")]
    let rows: Vec<Vec<f64>> = (0..img_rows).into_par_iter().map(row).collect();
    #[cfg(not(feature = "parallel"))]
    let rows: Vec<Vec<f64>> = (0..img_rows).map(row).collect();

    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((img_rows, img_cols), flat).unwrap_or_else(|_| Array2::zeros((img_rows, img_cols)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_convolution_preserves_flux_and_shifts() {
        let mut image = Array2::zeros((7, 7));
        image[[3, 3]] = 1.0;

        // Kernel with all weight one pixel to the right of center
        let kernel = array![[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0, 0.0]];
        let out = convolve_same(&image.view(), &kernel.view());
        assert_relative_eq!(out[[3, 4]], 1.0);
        assert_relative_eq!(out.sum(), 1.0);
    }

    #[test]
    fn test_convolution_zero_padding_loses_edge_flux() {
        let image = Array2::from_elem((3, 3), 1.0);
        let kernel = Array2::from_elem((3, 3), 1.0 / 9.0);
        let out = convolve_same(&image.view(), &kernel.view());
        assert_relative_eq!(out[[1, 1]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(out[[0, 0]], 4.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gaussian_kernel_properties() {
        let psf = Psf::gaussian(0.2, 0.05, 3.0).unwrap();
        let kernel = psf.kernel().unwrap();
        assert_eq!(kernel.nrows() % 2, 1);
        assert_relative_eq!(kernel.sum(), 1.0, epsilon = 1e-12);
        let c = kernel.nrows() / 2;
        assert!(kernel[[c, c]] > kernel[[c, c + 1]]);
        assert_relative_eq!(kernel[[c, c + 1]], kernel[[c + 1, c]], epsilon = 1e-15);
    }

    #[test]
    fn test_moffat_half_maximum() {
        let psf = Psf::moffat(0.5, 3.0, 0.05, 4.0).unwrap();
        if let PsfKind::Analytic { shape, .. } = psf.kind {
            assert_relative_eq!(shape.value(0.25) / shape.value(0.0), 0.5, epsilon = 1e-12);
        } else {
            panic!("Expected an analytic PSF");
        }
        assert!(Psf::moffat(0.5, 1.0, 0.05, 4.0).is_err());
    }

    #[test]
    fn test_pixel_kernel_validation() {
        assert!(Psf::pixel(Array2::from_elem((2, 3), 1.0)).is_err());
        assert!(Psf::pixel(Array2::zeros((3, 3))).is_err());
        let psf = Psf::pixel(Array2::from_elem((3, 3), 2.0)).unwrap();
        assert_relative_eq!(psf.kernel().unwrap().sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_supersampled_kernel() {
        let psf = Psf::pixel(array![[0.0, 0.1, 0.0], [0.1, 0.6, 0.1], [0.0, 0.1, 0.0]]).unwrap();
        let fine = psf.supersampled_kernel(3).unwrap().unwrap();
        assert_eq!(fine.dim(), (9, 9));
        assert_relative_eq!(fine.sum(), 1.0, epsilon = 1e-12);
        assert_eq!(fine.iter().cloned().fold(f64::MIN, f64::max), fine[[4, 4]]);

        let explicit = Array2::from_elem((5, 5), 1.0);
        let psf = psf.with_supersampled_kernel(explicit, 2).unwrap();
        let k = psf.supersampled_kernel(2).unwrap().unwrap();
        assert_eq!(k.dim(), (5, 5));
        assert!(Psf::none().supersampled_kernel(2).unwrap().is_none());
    }

    #[test]
    fn test_point_source_flux_is_conserved() {
        let grid = PixelGrid::centered(41, 0.05).unwrap();
        let psf = Psf::gaussian(0.15, 0.05, 4.0).unwrap();
        let image = psf.point_source_image(&grid, 0.013, -0.021);
        assert_relative_eq!(image.sum(), 1.0, max_relative = 1e-3);

        let pixel = Psf::pixel(array![[0.0, 0.1, 0.0], [0.1, 0.6, 0.1], [0.0, 0.1, 0.0]]).unwrap();
        let image = pixel.point_source_image(&grid, 0.013, -0.021);
        assert_relative_eq!(image.sum(), 1.0, epsilon = 1e-12);

        let image = Psf::none().point_source_image(&grid, 0.0, 0.0);
        assert_relative_eq!(image[[20, 20]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_narrow_point_source_keeps_unit_flux() {
        let grid = PixelGrid::centered(21, 0.1).unwrap();
        let (corner_ra, corner_dec) = grid.pixel_to_angle(10.5, 10.5);
        for fwhm in [0.03, 0.05, 0.08, 0.3] {
            let psf = Psf::gaussian(fwhm, 0.1, 3.0).unwrap();
            let at_center = psf.point_source_image(&grid, 0.0, 0.0);
            assert_relative_eq!(at_center.sum(), 1.0, epsilon = 1e-9);
            let at_corner = psf.point_source_image(&grid, corner_ra, corner_dec);
            assert_relative_eq!(at_corner.sum(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_point_source_off_grid_is_ignored() {
        let grid = PixelGrid::centered(11, 0.1).unwrap();
        let analytic = Psf::gaussian(0.2, 0.1, 3.0).unwrap();
        let pixel = Psf::pixel(array![[0.0, 0.1, 0.0], [0.1, 0.6, 0.1], [0.0, 0.1, 0.0]]).unwrap();
        for psf in [analytic, pixel, Psf::none()] {
            for ra in [1e30, -1e30, f64::INFINITY, f64::NAN, 5.0] {
                let image = psf.point_source_image(&grid, ra, 0.0);
                assert_eq!(image.sum(), 0.0);
            }
        }
    }

    #[test]
    fn test_config_build() {
        let cfg: PsfConfig = serde_json::from_str(r#"{"psf_type": "GAUSSIAN", "fwhm": 0.1}"#).unwrap();
        assert!(cfg.build(0.05).unwrap().kernel().is_some());

        let cfg: PsfConfig = serde_json::from_str(r#"{"psf_type": "PIXEL", "kernel": [[1.0, 2.0], [3.0]]}"#).unwrap();
        assert!(cfg.build(0.05).is_err());
        assert!(PsfConfig::default().build(0.05).unwrap().is_none());
    }
}
