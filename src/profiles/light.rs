//! Surface brightness profiles.
//!
//! Every built-in profile is linear in its `amp` parameter, which makes it
//! eligible for linear inversion: rendering with `amp = 1` gives the basis
//! image of the profile.

use std::f64::consts::PI;
use std::fmt::Debug;

use super::phi_q_from_ellipticity;
use crate::parameters::ParamSpec;

/// Minimal radius at which the Sersic cusp is evaluated.
const SERSIC_MIN_RADIUS: f64 = 1e-5;

/// Smallest accepted width for Gaussian and Sersic scales.
const MIN_SCALE: f64 = 1e-8;

/// A parametric surface brightness distribution.
pub trait LightProfile: Send + Sync + Debug {
    /// Registry name, e.g. `SERSIC`.
    fn name(&self) -> &str;

    /// Declared parameters, in evaluation order. Linear amplitudes are flagged.
    fn param_specs(&self) -> &[ParamSpec];

    /// Surface brightness at `(x, y)` per unit solid angle.
    fn surface_brightness(&self, x: f64, y: f64, params: &[f64]) -> f64;

    /// Position of the linear amplitude in the parameter list, if any.
    fn amplitude_index(&self) -> Option<usize> {
        self.param_specs().iter().position(|s| s.linear)
    }
}

/// Sersic `b_n` approximation, valid for `0.5 < n < 10`.
pub fn sersic_b_n(n_sersic: f64) -> f64 {
    1.9992 * n_sersic - 0.3271
}

fn sersic(radius: f64, amp: f64, r_sersic: f64, n_sersic: f64) -> f64 {
    let r = radius.max(SERSIC_MIN_RADIUS);
    let r_s = r_sersic.max(MIN_SCALE);
    let b_n = sersic_b_n(n_sersic);
    amp * (-b_n * ((r / r_s).powf(1.0 / n_sersic) - 1.0)).exp()
}

/// Circular Gaussian normalised to total flux `amp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gaussian;

impl Gaussian {
    const PARAMS: [ParamSpec; 4] = [
        ParamSpec::amplitude("amp"),
        ParamSpec::nonlinear("sigma"),
        ParamSpec::nonlinear("center_x"),
        ParamSpec::nonlinear("center_y"),
    ];
}

impl LightProfile for Gaussian {
    fn name(&self) -> &str {
        "GAUSSIAN"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn surface_brightness(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        let sigma = p[1].abs().max(MIN_SCALE);
        let (dx, dy) = (x - p[2], y - p[3]);
        let r2 = dx * dx + dy * dy;
        p[0] / (2.0 * PI * sigma * sigma) * (-r2 / (2.0 * sigma * sigma)).exp()
    }
}

/// Circular Sersic profile; `amp` is the surface brightness at `R_sersic`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sersic;

impl Sersic {
    const PARAMS: [ParamSpec; 5] = [
        ParamSpec::amplitude("amp"),
        ParamSpec::nonlinear("R_sersic"),
        ParamSpec::nonlinear("n_sersic"),
        ParamSpec::nonlinear("center_x"),
        ParamSpec::nonlinear("center_y"),
    ];
}

impl LightProfile for Sersic {
    fn name(&self) -> &str {
        "SERSIC"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn surface_brightness(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        let r = (x - p[3]).hypot(y - p[4]);
        sersic(r, p[0], p[1], p[2])
    }
}

/// Elliptical Sersic profile.
///
/// The elliptical radius is `sqrt(q x'² + y'²/q)` in the frame aligned with
/// the major axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct SersicEllipse;

impl SersicEllipse {
    const PARAMS: [ParamSpec; 7] = [
        ParamSpec::amplitude("amp"),
        ParamSpec::nonlinear("R_sersic"),
        ParamSpec::nonlinear("n_sersic"),
        ParamSpec::nonlinear("e1"),
        ParamSpec::nonlinear("e2"),
        ParamSpec::nonlinear("center_x"),
        ParamSpec::nonlinear("center_y"),
    ];
}

impl LightProfile for SersicEllipse {
    fn name(&self) -> &str {
        "SERSIC_ELLIPSE"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn surface_brightness(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        let (phi, q) = phi_q_from_ellipticity(p[3], p[4]);
        let (sin, cos) = phi.sin_cos();
        let (dx, dy) = (x - p[5], y - p[6]);
        let xp = cos * dx + sin * dy;
        let yp = -sin * dx + cos * dy;
        let r = (q * xp * xp + yp * yp / q).sqrt();
        sersic(r, p[0], p[1], p[2])
    }
}

/// Constant surface brightness.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl Uniform {
    const PARAMS: [ParamSpec; 1] = [ParamSpec::amplitude("amp")];
}

impl LightProfile for Uniform {
    fn name(&self) -> &str {
        "UNIFORM"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn surface_brightness(&self, _x: f64, _y: f64, p: &[f64]) -> f64 {
        p[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_total_flux() {
        let p = [3.0, 0.2, 0.1, -0.1];
        let step = 0.01;
        let mut total = 0.0;
        for i in -200..200 {
            for j in -200..200 {
                let x = 0.1 + (i as f64 + 0.5) * step;
                let y = -0.1 + (j as f64 + 0.5) * step;
                total += Gaussian.surface_brightness(x, y, &p) * step * step;
            }
        }
        assert_relative_eq!(total, 3.0, max_relative = 1e-4);
    }

    #[test]
    fn test_sersic_amplitude_at_effective_radius() {
        let p = [2.5, 0.8, 3.0, 0.0, 0.0];
        assert_relative_eq!(Sersic.surface_brightness(0.8, 0.0, &p), 2.5, epsilon = 1e-12);
        assert!(Sersic.surface_brightness(0.0, 0.0, &p).is_finite());
        assert!(Sersic.surface_brightness(0.1, 0.0, &p) > 2.5);
    }

    #[test]
    fn test_round_sersic_ellipse_matches_sersic() {
        let circ = [1.0, 0.5, 1.5, 0.2, 0.1];
        let ell = [1.0, 0.5, 1.5, 0.0, 0.0, 0.2, 0.1];
        for &(x, y) in &[(0.3, 0.4), (-0.6, 0.2), (1.0, -1.0)] {
            assert_relative_eq!(
                Sersic.surface_brightness(x, y, &circ),
                SersicEllipse.surface_brightness(x, y, &ell),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_linear_in_amplitude() {
        let unit = [1.0, 0.3, 0.0, 0.0];
        let scaled = [4.0, 0.3, 0.0, 0.0];
        assert_relative_eq!(
            4.0 * Gaussian.surface_brightness(0.2, 0.1, &unit),
            Gaussian.surface_brightness(0.2, 0.1, &scaled),
            epsilon = 1e-12
        );
        assert_eq!(Gaussian.amplitude_index(), Some(0));
        assert_eq!(Uniform.surface_brightness(5.0, -3.0, &[0.7]), 0.7);
    }
}
