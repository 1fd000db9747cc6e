//! Pixel grids and the affine pixel ↔ angle transform.
//!
//! Pixel `(x, y)` is column `x`, row `y` of a row-major image. Angles are in
//! arcseconds: `ra = ra_at_xy_0 + M[0][0] x + M[0][1] y`,
//! `dec = dec_at_xy_0 + M[1][0] x + M[1][1] y`.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{LensFitError, Result};

/// Relative tolerance below which the transform matrix counts as singular.
const SINGULAR_TOLERANCE: f64 = 1e-15;

/// A rectangular pixel grid with an invertible affine coordinate transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PixelGridConfig", into = "PixelGridConfig")]
pub struct PixelGrid {
    nx: usize,
    ny: usize,
    transform: [[f64; 2]; 2],
    inverse: [[f64; 2]; 2],
    ra_at_xy_0: f64,
    dec_at_xy_0: f64,
}

/// Serialised form of a [`PixelGrid`], validated on conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelGridConfig {
    pub nx: usize,
    pub ny: usize,
    pub transform_pix2angle: [[f64; 2]; 2],
    pub ra_at_xy_0: f64,
    pub dec_at_xy_0: f64,
}

impl TryFrom<PixelGridConfig> for PixelGrid {
    type Error = LensFitError;

    fn try_from(cfg: PixelGridConfig) -> Result<Self> {
        PixelGrid::new(cfg.nx, cfg.ny, cfg.transform_pix2angle, cfg.ra_at_xy_0, cfg.dec_at_xy_0)
    }
}

impl From<PixelGrid> for PixelGridConfig {
    fn from(grid: PixelGrid) -> Self {
        Self {
            nx: grid.nx,
            ny: grid.ny,
            transform_pix2angle: grid.transform,
            ra_at_xy_0: grid.ra_at_xy_0,
            dec_at_xy_0: grid.dec_at_xy_0,
        }
    }
}

impl PixelGrid {
    /// Create a grid from an explicit pixel → angle transform.
    ///
    /// # Arguments
    ///
    /// * `nx`, `ny` - Number of columns and rows
    /// * `transform` - 2×2 matrix mapping pixel offsets to angular offsets
    /// * `ra_at_xy_0`, `dec_at_xy_0` - Angular coordinate of pixel (0, 0)
    ///
    /// # Errors
    ///
    /// `ConfigError` if the grid is empty, a value is not finite, or the
    /// matrix is singular.
    pub fn new(
        nx: usize,
        ny: usize,
        transform: [[f64; 2]; 2],
        ra_at_xy_0: f64,
        dec_at_xy_0: f64,
    ) -> Result<Self> {
        if nx == 0 || ny == 0 {
            return Err(LensFitError::config("pixel grid must have at least one pixel"));
        }
        let finite = transform.iter().flatten().all(|v| v.is_finite())
            && ra_at_xy_0.is_finite()
            && dec_at_xy_0.is_finite();
        if !finite {
            return Err(LensFitError::config("pixel grid transform must be finite"));
        }

        let [[a, b], [c, d]] = transform;
        let det = a * d - b * c;
        let scale = transform
            .iter()
            .flatten()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if scale == 0.0 || det.abs() <= SINGULAR_TOLERANCE * scale * scale {
            return Err(LensFitError::config(format!(
                "pixel grid transform is singular (det = {:e})",
                det
            )));
        }
        let inverse = [[d / det, -b / det], [-c / det, a / det]];

        Ok(Self {
            nx,
            ny,
            transform,
            inverse,
            ra_at_xy_0,
            dec_at_xy_0,
        })
    }

    /// Square grid of `num_pix` pixels of size `delta_pix`, centered on (0, 0).
    ///
    /// RA increases to the left (towards smaller column index), as on the sky.
    pub fn centered(num_pix: usize, delta_pix: f64) -> Result<Self> {
        if !(delta_pix > 0.0) {
            return Err(LensFitError::config("pixel size must be positive"));
        }
        let half = (num_pix as f64 - 1.0) / 2.0;
        Self::new(
            num_pix,
            num_pix,
            [[-delta_pix, 0.0], [0.0, delta_pix]],
            half * delta_pix,
            -half * delta_pix,
        )
    }

    /// Angular coordinate of a (possibly fractional) pixel position.
    pub fn pixel_to_angle(&self, x: f64, y: f64) -> (f64, f64) {
        let [[a, b], [c, d]] = self.transform;
        (
            self.ra_at_xy_0 + a * x + b * y,
            self.dec_at_xy_0 + c * x + d * y,
        )
    }

    /// Pixel position of an angular coordinate.
    pub fn angle_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let [[a, b], [c, d]] = self.inverse;
        let dra = ra - self.ra_at_xy_0;
        let ddec = dec - self.dec_at_xy_0;
        (a * dra + b * ddec, c * dra + d * ddec)
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Image shape as `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    pub fn num_pixels(&self) -> usize {
        self.nx * self.ny
    }

    pub fn transform(&self) -> [[f64; 2]; 2] {
        self.transform
    }

    /// Solid angle of one pixel in arcsec².
    pub fn pixel_area(&self) -> f64 {
        let [[a, b], [c, d]] = self.transform;
        (a * d - b * c).abs()
    }

    /// Characteristic pixel size, the square root of the pixel area.
    pub fn pixel_width(&self) -> f64 {
        self.pixel_area().sqrt()
    }

    /// RA and Dec of every pixel center.
    pub fn coordinates(&self) -> (Array2<f64>, Array2<f64>) {
        let ra = Array2::from_shape_fn(self.shape(), |(y, x)| self.pixel_to_angle(x as f64, y as f64).0);
        let dec = Array2::from_shape_fn(self.shape(), |(y, x)| self.pixel_to_angle(x as f64, y as f64).1);
        (ra, dec)
    }

    /// Sub-pixel sample coordinates for an integer supersampling factor.
    ///
    /// Returns flat RA and Dec vectors of a `(ny·f) × (nx·f)` row-major grid;
    /// sub-pixel `k` of a pixel sits at offset `(k + 0.5) / f − 0.5`.
    pub fn supersampled_coordinates(&self, factor: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        if factor == 0 {
            return Err(LensFitError::config("supersampling factor must be at least 1"));
        }
        let rows = self.ny * factor;
        let cols = self.nx * factor;
        let f = factor as f64;
        let mut ra = Vec::with_capacity(rows * cols);
        let mut dec = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            let y = (row as f64 + 0.5) / f - 0.5;
            for col in 0..cols {
                let x = (col as f64 + 0.5) / f - 0.5;
                let (r, d) = self.pixel_to_angle(x, y);
                ra.push(r);
                dec.push(d);
            }
        }
        Ok((ra, dec))
    }

    /// Transform of the supersampled grid (pixel size divided by `factor`).
    pub fn supersampled(&self, factor: usize) -> Result<PixelGrid> {
        if factor == 0 {
            return Err(LensFitError::config("supersampling factor must be at least 1"));
        }
        let f = factor as f64;
        let t = self.transform;
        let scaled = [[t[0][0] / f, t[0][1] / f], [t[1][0] / f, t[1][1] / f]];
        let offset = 0.5 / f - 0.5;
        let (ra0, dec0) = self.pixel_to_angle(offset, offset);
        PixelGrid::new(self.nx * factor, self.ny * factor, scaled, ra0, dec0)
    }
}
