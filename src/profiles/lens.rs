//! Lens (deflector) profiles.
//!
//! Every profile evaluates its lensing potential, deflection angle and the
//! Hessian of the potential at a position in arcseconds, given its parameter
//! values in the order declared by [`LensProfile::param_specs`].

use std::fmt::Debug;

use super::{phi_q_from_ellipticity, rotate_hessian};
use crate::parameters::ParamSpec;
use crate::utils::finite_difference::hessian_from_gradient;

/// Smallest radius at which singular profiles are evaluated.
const MIN_RADIUS: f64 = 1e-10;

/// Axis-ratio distance from 1 below which the SIE is evaluated as an SIS.
const ROUND_LIMIT: f64 = 1e-4;

/// A parametric mass distribution.
pub trait LensProfile: Send + Sync + Debug {
    /// Registry name, e.g. `SIS`.
    fn name(&self) -> &str;

    /// Declared parameters, in evaluation order.
    fn param_specs(&self) -> &[ParamSpec];

    /// Lensing potential ψ.
    fn function(&self, x: f64, y: f64, params: &[f64]) -> f64;

    /// Deflection angle `(∂ψ/∂x, ∂ψ/∂y)`.
    fn derivatives(&self, x: f64, y: f64, params: &[f64]) -> (f64, f64);

    /// Hessian of ψ as `[f_xx, f_xy, f_yx, f_yy]`.
    ///
    /// Defaults to central finite differences of the deflection.
    fn hessian(&self, x: f64, y: f64, params: &[f64]) -> [f64; 4] {
        hessian_from_gradient(|x, y| self.derivatives(x, y, params), x, y, None)
    }
}

/// Singular isothermal sphere.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sis;

impl Sis {
    const PARAMS: [ParamSpec; 3] = [
        ParamSpec::nonlinear("theta_E"),
        ParamSpec::nonlinear("center_x"),
        ParamSpec::nonlinear("center_y"),
    ];
}

impl LensProfile for Sis {
    fn name(&self) -> &str {
        "SIS"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn function(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        let (dx, dy) = (x - p[1], y - p[2]);
        p[0] * dx.hypot(dy)
    }

    fn derivatives(&self, x: f64, y: f64, p: &[f64]) -> (f64, f64) {
        let (dx, dy) = (x - p[1], y - p[2]);
        let r = dx.hypot(dy).max(MIN_RADIUS);
        (p[0] * dx / r, p[0] * dy / r)
    }

    fn hessian(&self, x: f64, y: f64, p: &[f64]) -> [f64; 4] {
        let (dx, dy) = (x - p[1], y - p[2]);
        let r = dx.hypot(dy).max(MIN_RADIUS);
        let r3 = r * r * r;
        let f_xy = -p[0] * dx * dy / r3;
        [p[0] * dy * dy / r3, f_xy, f_xy, p[0] * dx * dx / r3]
    }
}

/// Singular isothermal ellipsoid.
///
/// In the frame aligned with the major axis, with `ψ = sqrt(q² x² + y²)` and
/// `e = sqrt(1 − q²)`, the deflection is `(b/e · atan(e x / ψ), b/e · atanh(e y / ψ))`
/// where `b = θ_E / sqrt((1 + q²) / (2q))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sie;

impl Sie {
    const PARAMS: [ParamSpec; 5] = [
        ParamSpec::nonlinear("theta_E"),
        ParamSpec::nonlinear("e1"),
        ParamSpec::nonlinear("e2"),
        ParamSpec::nonlinear("center_x"),
        ParamSpec::nonlinear("center_y"),
    ];

    /// Position in the principal frame, plus `(b, q, cos φ, sin φ)`.
    fn frame(x: f64, y: f64, p: &[f64]) -> ((f64, f64), (f64, f64, f64, f64)) {
        let (phi, q) = phi_q_from_ellipticity(p[1], p[2]);
        let b = p[0] / ((1.0 + q * q) / (2.0 * q)).sqrt();
        let (sin, cos) = phi.sin_cos();
        let (dx, dy) = (x - p[3], y - p[4]);
        let xp = cos * dx + sin * dy;
        let yp = -sin * dx + cos * dy;
        ((xp, yp), (b, q, cos, sin))
    }

    fn principal_deflection(xp: f64, yp: f64, b: f64, q: f64) -> (f64, f64) {
        let psi = (q * q * xp * xp + yp * yp).sqrt().max(MIN_RADIUS);
        let e = (1.0 - q * q).sqrt();
        if e < ROUND_LIMIT {
            return (b * xp / psi, b * yp / psi);
        }
        (
            b / e * (e * xp / psi).atan(),
            b / e * (e * yp / psi).atanh(),
        )
    }
}

impl LensProfile for Sie {
    fn name(&self) -> &str {
        "SIE"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn function(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        // Isothermal potentials are homogeneous of degree one: ψ = x·α
        let ((xp, yp), (b, q, _, _)) = Self::frame(x, y, p);
        let (ax, ay) = Self::principal_deflection(xp, yp, b, q);
        xp * ax + yp * ay
    }

    fn derivatives(&self, x: f64, y: f64, p: &[f64]) -> (f64, f64) {
        let ((xp, yp), (b, q, cos, sin)) = Self::frame(x, y, p);
        let (ax, ay) = Self::principal_deflection(xp, yp, b, q);
        (cos * ax - sin * ay, sin * ax + cos * ay)
    }

    fn hessian(&self, x: f64, y: f64, p: &[f64]) -> [f64; 4] {
        let ((xp, yp), (b, q, cos, sin)) = Self::frame(x, y, p);
        let psi = (q * q * xp * xp + yp * yp).sqrt().max(MIN_RADIUS);
        let r2 = (xp * xp + yp * yp).max(MIN_RADIUS * MIN_RADIUS);
        let norm = b / (psi * r2);
        let f_xy = -norm * xp * yp;
        rotate_hessian([norm * yp * yp, f_xy, f_xy, norm * xp * xp], cos, sin)
    }
}

/// Point mass with Einstein radius θ_E.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointMass;

impl PointMass {
    const PARAMS: [ParamSpec; 3] = [
        ParamSpec::nonlinear("theta_E"),
        ParamSpec::nonlinear("center_x"),
        ParamSpec::nonlinear("center_y"),
    ];
}

impl LensProfile for PointMass {
    fn name(&self) -> &str {
        "POINT_MASS"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn function(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        let r = (x - p[1]).hypot(y - p[2]).max(MIN_RADIUS);
        p[0] * p[0] * r.ln()
    }

    fn derivatives(&self, x: f64, y: f64, p: &[f64]) -> (f64, f64) {
        let (dx, dy) = (x - p[1], y - p[2]);
        let r2 = (dx * dx + dy * dy).max(MIN_RADIUS * MIN_RADIUS);
        let te2 = p[0] * p[0];
        (te2 * dx / r2, te2 * dy / r2)
    }

    fn hessian(&self, x: f64, y: f64, p: &[f64]) -> [f64; 4] {
        let (dx, dy) = (x - p[1], y - p[2]);
        let r2 = (dx * dx + dy * dy).max(MIN_RADIUS * MIN_RADIUS);
        let c = p[0] * p[0] / (r2 * r2);
        let f_xy = -2.0 * c * dx * dy;
        [c * (dy * dy - dx * dx), f_xy, f_xy, c * (dx * dx - dy * dy)]
    }
}

/// External shear.
#[derive(Debug, Clone, Copy, Default)]
pub struct Shear;

impl Shear {
    const PARAMS: [ParamSpec; 4] = [
        ParamSpec::nonlinear("gamma1"),
        ParamSpec::nonlinear("gamma2"),
        ParamSpec::nonlinear("ra_0"),
        ParamSpec::nonlinear("dec_0"),
    ];
}

impl LensProfile for Shear {
    fn name(&self) -> &str {
        "SHEAR"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn function(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        let (dx, dy) = (x - p[2], y - p[3]);
        0.5 * p[0] * (dx * dx - dy * dy) + p[1] * dx * dy
    }

    fn derivatives(&self, x: f64, y: f64, p: &[f64]) -> (f64, f64) {
        let (dx, dy) = (x - p[2], y - p[3]);
        (p[0] * dx + p[1] * dy, p[1] * dx - p[0] * dy)
    }

    fn hessian(&self, _x: f64, _y: f64, p: &[f64]) -> [f64; 4] {
        [p[0], p[1], p[1], -p[0]]
    }
}

/// Uniform mass sheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct Convergence;

impl Convergence {
    const PARAMS: [ParamSpec; 3] = [
        ParamSpec::nonlinear("kappa"),
        ParamSpec::nonlinear("ra_0"),
        ParamSpec::nonlinear("dec_0"),
    ];
}

impl LensProfile for Convergence {
    fn name(&self) -> &str {
        "CONVERGENCE"
    }

    fn param_specs(&self) -> &[ParamSpec] {
        &Self::PARAMS
    }

    fn function(&self, x: f64, y: f64, p: &[f64]) -> f64 {
        let (dx, dy) = (x - p[1], y - p[2]);
        0.5 * p[0] * (dx * dx + dy * dy)
    }

    fn derivatives(&self, x: f64, y: f64, p: &[f64]) -> (f64, f64) {
        (p[0] * (x - p[1]), p[0] * (y - p[2]))
    }

    fn hessian(&self, _x: f64, _y: f64, p: &[f64]) -> [f64; 4] {
        [p[0], 0.0, 0.0, p[0]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::ellipticity_from_phi_q;
    use approx::assert_relative_eq;

    const POINTS: [(f64, f64); 4] = [(0.7, 0.2), (-1.1, 0.45), (0.3, -1.6), (-0.25, -0.8)];

    /// Analytic deflection and Hessian agree with finite differences.
    fn check_consistency(profile: &dyn LensProfile, params: &[f64]) {
        for &(x, y) in &POINTS {
            let numeric_alpha = {
                let h = 1e-6;
                (
                    (profile.function(x + h, y, params) - profile.function(x - h, y, params)) / (2.0 * h),
                    (profile.function(x, y + h, params) - profile.function(x, y - h, params)) / (2.0 * h),
                )
            };
            let alpha = profile.derivatives(x, y, params);
            assert_relative_eq!(alpha.0, numeric_alpha.0, epsilon = 1e-6);
            assert_relative_eq!(alpha.1, numeric_alpha.1, epsilon = 1e-6);

            let numeric = hessian_from_gradient(|x, y| profile.derivatives(x, y, params), x, y, None);
            let analytic = profile.hessian(x, y, params);
            for k in 0..4 {
                assert_relative_eq!(analytic[k], numeric[k], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_sis_deflection_is_constant_magnitude() {
        let p = [1.3, 0.1, -0.2];
        let (ax, ay) = Sis.derivatives(2.0, 1.5, &p);
        assert_relative_eq!(ax.hypot(ay), 1.3, epsilon = 1e-12);
        check_consistency(&Sis, &p);
    }

    #[test]
    fn test_sie_consistency() {
        let (e1, e2) = ellipticity_from_phi_q(0.4, 0.7);
        check_consistency(&Sie, &[1.1, e1, e2, 0.05, -0.1]);
    }

    #[test]
    fn test_sie_round_limit_matches_sis() {
        let sis = [1.0, 0.2, 0.1];
        let sie = [1.0, 0.0, 0.0, 0.2, 0.1];
        for &(x, y) in &POINTS {
            let a = Sis.derivatives(x, y, &sis);
            let b = Sie.derivatives(x, y, &sie);
            assert_relative_eq!(a.0, b.0, epsilon = 1e-12);
            assert_relative_eq!(a.1, b.1, epsilon = 1e-12);
            assert_relative_eq!(Sis.function(x, y, &sis), Sie.function(x, y, &sie), epsilon = 1e-12);

            // Nearly round ellipse stays close to the sphere
            let c = Sie.derivatives(x, y, &[1.0, 1e-3, 0.0, 0.2, 0.1]);
            assert_relative_eq!(a.0, c.0, epsilon = 1e-2);
            assert_relative_eq!(a.1, c.1, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_sie_convergence_is_elliptical() {
        // κ = (f_xx + f_yy) / 2 is larger along the major axis at equal radius
        let (e1, e2) = ellipticity_from_phi_q(0.0, 0.6);
        let p = [1.0, e1, e2, 0.0, 0.0];
        let along = Sie.hessian(1.0, 0.0, &p);
        let across = Sie.hessian(0.0, 1.0, &p);
        assert!(along[0] + along[3] > across[0] + across[3]);
    }

    #[test]
    fn test_point_mass_and_external_fields() {
        check_consistency(&PointMass, &[0.9, 0.1, 0.2]);
        check_consistency(&Shear, &[0.05, -0.03, 0.0, 0.0]);
        check_consistency(&Convergence, &[0.2, 0.0, 0.0]);

        let h = Shear.hessian(0.3, 0.4, &[0.05, -0.03, 0.0, 0.0]);
        assert_relative_eq!(h[0] + h[3], 0.0);
    }

    #[derive(Debug)]
    struct Plummer;

    impl LensProfile for Plummer {
        fn name(&self) -> &str {
            "PLUMMER"
        }

        fn param_specs(&self) -> &[ParamSpec] {
            const P: [ParamSpec; 1] = [ParamSpec::nonlinear("scale")];
            &P
        }

        fn function(&self, x: f64, y: f64, p: &[f64]) -> f64 {
            0.5 * (x * x + y * y + p[0] * p[0]).ln()
        }

        fn derivatives(&self, x: f64, y: f64, p: &[f64]) -> (f64, f64) {
            let d = x * x + y * y + p[0] * p[0];
            (x / d, y / d)
        }
    }

    #[test]
    fn test_default_hessian_uses_finite_differences() {
        let p = [0.5];
        let (x, y) = (0.4, -0.3);
        let d = x * x + y * y + 0.25;
        let h = Plummer.hessian(x, y, &p);
        assert_relative_eq!(h[0], (d - 2.0 * x * x) / (d * d), epsilon = 1e-6);
        assert_relative_eq!(h[1], -2.0 * x * y / (d * d), epsilon = 1e-6);
        assert_relative_eq!(h[3], (d - 2.0 * y * y) / (d * d), epsilon = 1e-6);
    }
}
