//! Superposition of surface brightness profiles.
//!
//! Profiles whose `amp` is absent from their kwargs are in linear mode: they
//! contribute nothing to [`BoundLightModel::surface_brightness`] and are
//! exposed as unit-amplitude basis functions for the linear solver instead.

use std::sync::Arc;

use crate::error::{LensFitError, Result};
use crate::parameters::{Kwargs, ParamSpec};
use crate::profiles::LightProfile;

/// An ordered list of light profiles.
#[derive(Debug, Clone, Default)]
pub struct LightModel {
    profiles: Vec<Arc<dyn LightProfile>>,
}

impl LightModel {
    pub fn new(profiles: Vec<Arc<dyn LightProfile>>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[Arc<dyn LightProfile>] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Parameter declarations of every profile, in order.
    pub fn param_specs(&self) -> Vec<Vec<ParamSpec>> {
        self.profiles.iter().map(|p| p.param_specs().to_vec()).collect()
    }

    /// Validate parameter values and bind them to the model.
    ///
    /// Linear amplitudes may be absent; every other parameter must be present
    /// and no unknown key is accepted.
    pub fn bind(&self, kwargs: &[Kwargs]) -> Result<BoundLightModel<'_>> {
        if kwargs.len() != self.profiles.len() {
            return Err(LensFitError::config(format!(
                "{} light kwargs given for {} light profiles",
                kwargs.len(),
                self.profiles.len()
            )));
        }

        let mut params = Vec::with_capacity(kwargs.len());
        let mut linear = Vec::with_capacity(kwargs.len());
        for (profile, kw) in self.profiles.iter().zip(kwargs) {
            let specs = profile.param_specs();
            let values = kw.ordered_values(specs, profile.name(), Some(1.0))?;
            let missing_amp = specs.iter().any(|s| s.linear && !kw.contains(s.name));
            params.push(values);
            linear.push(missing_amp);
        }

        Ok(BoundLightModel {
            model: self,
            params,
            linear,
        })
    }
}

/// A light model with validated parameter values.
#[derive(Debug, Clone)]
pub struct BoundLightModel<'a> {
    model: &'a LightModel,
    /// Values in schema order, absent amplitudes set to one
    params: Vec<Vec<f64>>,
    /// Whether each profile is in linear mode
    linear: Vec<bool>,
}

impl<'a> BoundLightModel<'a> {
    /// Brightness of the profiles with known amplitude.
    pub fn surface_brightness(&self, x: f64, y: f64) -> f64 {
        self.model
            .profiles
            .iter()
            .zip(&self.params)
            .zip(&self.linear)
            .filter(|(_, linear)| !**linear)
            .map(|((profile, p), _)| profile.surface_brightness(x, y, p))
            .sum()
    }

    /// Indices of the profiles whose amplitude is solved linearly.
    pub fn linear_indices(&self) -> Vec<usize> {
        self.linear
            .iter()
            .enumerate()
            .filter_map(|(i, &linear)| linear.then_some(i))
            .collect()
    }

    pub fn num_linear(&self) -> usize {
        self.linear.iter().filter(|&&l| l).count()
    }

    /// Brightness of profile `index` with unit amplitude.
    pub fn basis_brightness(&self, index: usize, x: f64, y: f64) -> f64 {
        let profile = &self.model.profiles[index];
        let mut p = self.params[index].clone();
        if let Some(k) = profile.amplitude_index() {
            p[k] = 1.0;
        }
        profile.surface_brightness(x, y, &p)
    }

    /// Name of the linear amplitude of profile `index`.
    pub fn amplitude_name(&self, index: usize) -> Option<&'static str> {
        self.model.profiles[index]
            .param_specs()
            .iter()
            .find(|s| s.linear)
            .map(|s| s.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::{Gaussian, Sersic};
    use approx::assert_relative_eq;

    fn model() -> LightModel {
        LightModel::new(vec![Arc::new(Gaussian), Arc::new(Sersic)])
    }

    fn kwargs() -> Vec<Kwargs> {
        vec![
            Kwargs::from([("amp", 2.0), ("sigma", 0.3), ("center_x", 0.0), ("center_y", 0.0)]),
            Kwargs::from([
                ("amp", 1.5),
                ("R_sersic", 0.5),
                ("n_sersic", 2.0),
                ("center_x", 0.1),
                ("center_y", 0.0),
            ]),
        ]
    }

    #[test]
    fn test_superposition() {
        let model = model();
        let kw = kwargs();
        let bound = model.bind(&kw).unwrap();
        let (x, y) = (0.2, -0.1);
        let expected = Gaussian.surface_brightness(x, y, &[2.0, 0.3, 0.0, 0.0])
            + Sersic.surface_brightness(x, y, &[1.5, 0.5, 2.0, 0.1, 0.0]);
        assert_relative_eq!(bound.surface_brightness(x, y), expected, epsilon = 1e-12);
        assert_eq!(bound.num_linear(), 0);
    }

    #[test]
    fn test_linear_mode_profiles() {
        let model = model();
        let mut kw = kwargs();
        kw[1].remove("amp");
        let bound = model.bind(&kw).unwrap();
        assert_eq!(bound.linear_indices(), vec![1]);
        assert_eq!(bound.amplitude_name(1), Some("amp"));

        let (x, y) = (0.4, 0.3);
        let gauss = Gaussian.surface_brightness(x, y, &[2.0, 0.3, 0.0, 0.0]);
        assert_relative_eq!(bound.surface_brightness(x, y), gauss, epsilon = 1e-12);
        assert_relative_eq!(
            bound.basis_brightness(1, x, y),
            Sersic.surface_brightness(x, y, &[1.0, 0.5, 2.0, 0.1, 0.0]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_bind_rejects_unknown_keys() {
        let model = model();
        let mut kw = kwargs();
        kw[0].insert("q", 0.5);
        assert!(model.bind(&kw).is_err());
        assert!(model.bind(&kw[..1]).is_err());

        let mut kw = kwargs();
        kw[0].remove("sigma");
        assert!(model.bind(&kw).is_err());
    }
}
