//! # Profiles
//!
//! Parametric lens and light profiles, and the registry that resolves
//! profile names from configuration into shared trait objects.
//!
//! ```rust
//! use lensfit_rs::profiles::ProfileRegistry;
//!
//! let registry = ProfileRegistry::default();
//! let sis = registry.lens("SIS").unwrap();
//! let (ax, ay) = sis.derivatives(2.0, 0.0, &[1.0, 0.0, 0.0]);
//! assert!((ax - 1.0).abs() < 1e-12 && ay.abs() < 1e-12);
//! ```

pub mod lens;
pub mod light;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use lens::{Convergence, LensProfile, PointMass, Shear, Sie, Sis};
pub use light::{Gaussian, LightProfile, Sersic, SersicEllipse, Uniform};

use crate::error::{LensFitError, Result};

/// Largest ellipticity modulus accepted before clamping, keeps `q > 0`.
const MAX_ELLIPTICITY: f64 = 0.9999;

/// Position angle and axis ratio from ellipticity components.
///
/// `q = (1 − |e|) / (1 + |e|)` and `φ = atan2(e2, e1) / 2`.
pub fn phi_q_from_ellipticity(e1: f64, e2: f64) -> (f64, f64) {
    let c = e1.hypot(e2).min(MAX_ELLIPTICITY);
    let phi = e2.atan2(e1) / 2.0;
    (phi, (1.0 - c) / (1.0 + c))
}

/// Ellipticity components from position angle and axis ratio.
pub fn ellipticity_from_phi_q(phi: f64, q: f64) -> (f64, f64) {
    let e = (1.0 - q) / (1.0 + q);
    (e * (2.0 * phi).cos(), e * (2.0 * phi).sin())
}

/// Rotate a Hessian `[f_xx, f_xy, f_yx, f_yy]` from the principal frame back
/// to the sky frame, for a frame rotated by φ with `(cos φ, sin φ)`.
pub(crate) fn rotate_hessian(h: [f64; 4], cos: f64, sin: f64) -> [f64; 4] {
    let [h11, h12, h21, h22] = h;
    let (c2, s2, cs) = (cos * cos, sin * sin, cos * sin);
    [
        c2 * h11 - cs * (h12 + h21) + s2 * h22,
        cs * h11 + c2 * h12 - s2 * h21 - cs * h22,
        cs * h11 - s2 * h12 + c2 * h21 - cs * h22,
        s2 * h11 + cs * (h12 + h21) + c2 * h22,
    ]
}

/// Named lens and light profiles.
///
/// `Default` returns the registry with every built-in profile; custom
/// profiles are added with [`ProfileRegistry::register_lens`] and
/// [`ProfileRegistry::register_light`].
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    lens: BTreeMap<String, Arc<dyn LensProfile>>,
    light: BTreeMap<String, Arc<dyn LightProfile>>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_lens(Arc::new(Sis));
        registry.register_lens(Arc::new(Sie));
        registry.register_lens(Arc::new(PointMass));
        registry.register_lens(Arc::new(Shear));
        registry.register_lens(Arc::new(Convergence));
        registry.register_light(Arc::new(Gaussian));
        registry.register_light(Arc::new(Sersic));
        registry.register_light(Arc::new(SersicEllipse));
        registry.register_light(Arc::new(Uniform));
        registry
    }
}

impl ProfileRegistry {
    /// A registry without any profile.
    pub fn empty() -> Self {
        Self {
            lens: BTreeMap::new(),
            light: BTreeMap::new(),
        }
    }

    /// Register a lens profile under its name, replacing any previous entry.
    pub fn register_lens(&mut self, profile: Arc<dyn LensProfile>) {
        self.lens.insert(profile.name().to_string(), profile);
    }

    /// Register a light profile under its name, replacing any previous entry.
    pub fn register_light(&mut self, profile: Arc<dyn LightProfile>) {
        self.light.insert(profile.name().to_string(), profile);
    }

    pub fn lens(&self, name: &str) -> Result<Arc<dyn LensProfile>> {
        self.lens
            .get(name)
            .cloned()
            .ok_or_else(|| LensFitError::config(format!("unknown lens profile '{}'", name)))
    }

    pub fn light(&self, name: &str) -> Result<Arc<dyn LightProfile>> {
        self.light
            .get(name)
            .cloned()
            .ok_or_else(|| LensFitError::config(format!("unknown light profile '{}'", name)))
    }

    pub fn lens_names(&self) -> impl Iterator<Item = &str> {
        self.lens.keys().map(String::as_str)
    }

    pub fn light_names(&self) -> impl Iterator<Item = &str> {
        self.light.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_builtins_registered() {
        let registry = ProfileRegistry::default();
        let lens: Vec<&str> = registry.lens_names().collect();
        assert_eq!(lens, vec!["CONVERGENCE", "POINT_MASS", "SHEAR", "SIE", "SIS"]);
        assert!(registry.light("SERSIC_ELLIPSE").is_ok());
        assert!(matches!(registry.lens("NFW"), Err(LensFitError::ConfigError(_))));
        assert!(ProfileRegistry::empty().light("GAUSSIAN").is_err());
    }

    #[test]
    fn test_ellipticity_conversion() {
        let (e1, e2) = ellipticity_from_phi_q(0.3, 0.6);
        let (phi, q) = phi_q_from_ellipticity(e1, e2);
        assert_relative_eq!(phi, 0.3, epsilon = 1e-12);
        assert_relative_eq!(q, 0.6, epsilon = 1e-12);

        // Unphysical ellipticities are clamped to a valid axis ratio
        let (_, q) = phi_q_from_ellipticity(1.5, 0.0);
        assert!(q > 0.0);
    }

    #[test]
    fn test_rotate_hessian_preserves_trace() {
        let h = [0.3, -0.1, -0.1, 0.7];
        let (sin, cos) = 0.8_f64.sin_cos();
        let r = rotate_hessian(h, cos, sin);
        assert_relative_eq!(r[0] + r[3], 1.0, epsilon = 1e-12);
        assert_relative_eq!(r[1], r[2], epsilon = 1e-12);
        assert_relative_eq!(r[0] * r[3] - r[1] * r[2], 0.3 * 0.7 - 0.01, epsilon = 1e-12);
    }
}
