//! Structured parameter values.
//!
//! [`Kwargs`] holds the named parameters of one profile, [`ModelKwargs`] the
//! parameters of a full model grouped as lens, source light, lens light,
//! point source and special. Both serialise to the plain nested-map JSON
//! shape used by configuration files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::schema::{ModelGroup, ParamSpec};
use crate::error::{LensFitError, Result};

/// Value of a named parameter: a scalar or an array (image lists).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(f64),
    Array(Vec<f64>),
}

impl ParamValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ParamValue::Scalar(v) => Some(*v),
            ParamValue::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[f64]> {
        match self {
            ParamValue::Scalar(_) => None,
            ParamValue::Array(v) => Some(v),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Scalar(value)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(values: Vec<f64>) -> Self {
        ParamValue::Array(values)
    }
}

impl From<&[f64]> for ParamValue {
    fn from(values: &[f64]) -> Self {
        ParamValue::Array(values.to_vec())
    }
}

/// Named parameters of a single profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kwargs(BTreeMap<String, ParamValue>);

impl Kwargs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    ///
    /// ```
    /// use lensfit_rs::parameters::Kwargs;
    ///
    /// let kw = Kwargs::new().with("theta_E", 1.0).with("center_x", 0.0);
    /// assert_eq!(kw.scalar("theta_E").unwrap(), 1.0);
    /// ```
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Get a scalar parameter, failing if it is missing or an array.
    pub fn scalar(&self, name: &str) -> Result<f64> {
        match self.0.get(name) {
            Some(ParamValue::Scalar(v)) => Ok(*v),
            Some(ParamValue::Array(_)) => Err(LensFitError::config(format!(
                "parameter '{}' must be a scalar",
                name
            ))),
            None => Err(LensFitError::config(format!("missing parameter '{}'", name))),
        }
    }

    /// Get an array parameter, failing if it is missing or a scalar.
    pub fn array(&self, name: &str) -> Result<&[f64]> {
        match self.0.get(name) {
            Some(ParamValue::Array(v)) => Ok(v),
            Some(ParamValue::Scalar(_)) => Err(LensFitError::config(format!(
                "parameter '{}' must be an array",
                name
            ))),
            None => Err(LensFitError::config(format!("missing parameter '{}'", name))),
        }
    }

    /// Check that the keys match a declared schema exactly.
    ///
    /// Unknown keys are always rejected. Missing keys are rejected unless the
    /// parameter is linear and `allow_missing_linear` is set (the linear-mode
    /// sentinel). Array parameters must have the declared length.
    pub fn validate(&self, specs: &[ParamSpec], profile: &str, allow_missing_linear: bool) -> Result<()> {
        for key in self.0.keys() {
            if !specs.iter().any(|s| s.name == key) {
                return Err(LensFitError::config(format!(
                    "unknown parameter '{}' for profile {}",
                    key, profile
                )));
            }
        }

        for spec in specs {
            match (self.0.get(spec.name), spec.len) {
                (None, _) if spec.linear && allow_missing_linear => {}
                (None, _) => {
                    return Err(LensFitError::config(format!(
                        "missing parameter '{}' for profile {}",
                        spec.name, profile
                    )))
                }
                (Some(ParamValue::Scalar(_)), None) => {}
                (Some(ParamValue::Array(v)), Some(n)) if v.len() == n => {}
                (Some(_), _) => {
                    return Err(LensFitError::config(format!(
                        "parameter '{}' of profile {} has the wrong shape",
                        spec.name, profile
                    )))
                }
            }
        }

        Ok(())
    }

    /// Scalar values in schema order.
    ///
    /// Missing linear parameters are replaced by `linear_fill` when given.
    pub fn ordered_values(
        &self,
        specs: &[ParamSpec],
        profile: &str,
        linear_fill: Option<f64>,
    ) -> Result<Vec<f64>> {
        self.validate(specs, profile, linear_fill.is_some())?;
        specs
            .iter()
            .map(|spec| match self.0.get(spec.name) {
                Some(value) => value.as_scalar().ok_or_else(|| {
                    LensFitError::config(format!("parameter '{}' must be a scalar", spec.name))
                }),
                None => linear_fill.ok_or_else(|| {
                    LensFitError::config(format!("missing parameter '{}'", spec.name))
                }),
            })
            .collect()
    }
}

impl<const N: usize> From<[(&str, f64); N]> for Kwargs {
    fn from(pairs: [(&str, f64); N]) -> Self {
        let mut kw = Kwargs::new();
        for (name, value) in pairs {
            kw.insert(name, value);
        }
        kw
    }
}

/// Parameters of a complete model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelKwargs {
    pub lens: Vec<Kwargs>,
    pub source_light: Vec<Kwargs>,
    pub lens_light: Vec<Kwargs>,
    pub point_source: Vec<Kwargs>,
    pub special: Kwargs,
}

impl ModelKwargs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profiles of a group; the special group is a single entry.
    pub fn group(&self, group: ModelGroup) -> &[Kwargs] {
        match group {
            ModelGroup::Lens => &self.lens,
            ModelGroup::SourceLight => &self.source_light,
            ModelGroup::LensLight => &self.lens_light,
            ModelGroup::PointSource => &self.point_source,
            ModelGroup::Special => std::slice::from_ref(&self.special),
        }
    }

    pub fn profile(&self, group: ModelGroup, index: usize) -> Option<&Kwargs> {
        self.group(group).get(index)
    }

    pub fn profile_mut(&mut self, group: ModelGroup, index: usize) -> Option<&mut Kwargs> {
        match group {
            ModelGroup::Lens => self.lens.get_mut(index),
            ModelGroup::SourceLight => self.source_light.get_mut(index),
            ModelGroup::LensLight => self.lens_light.get_mut(index),
            ModelGroup::PointSource => self.point_source.get_mut(index),
            ModelGroup::Special if index == 0 => Some(&mut self.special),
            ModelGroup::Special => None,
        }
    }

    /// Look up a single value.
    pub fn value(&self, group: ModelGroup, index: usize, name: &str) -> Option<&ParamValue> {
        self.profile(group, index).and_then(|kw| kw.get(name))
    }

    /// Empty kwargs with the given number of profiles per group.
    pub fn with_counts(lens: usize, source_light: usize, lens_light: usize, point_source: usize) -> Self {
        Self {
            lens: vec![Kwargs::new(); lens],
            source_light: vec![Kwargs::new(); source_light],
            lens_light: vec![Kwargs::new(); lens_light],
            point_source: vec![Kwargs::new(); point_source],
            special: Kwargs::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIS: [ParamSpec; 3] = [
        ParamSpec::nonlinear("theta_E"),
        ParamSpec::nonlinear("center_x"),
        ParamSpec::nonlinear("center_y"),
    ];

    const GAUSS: [ParamSpec; 2] = [ParamSpec::amplitude("amp"), ParamSpec::nonlinear("sigma")];

    #[test]
    fn test_ordered_values_follow_schema() {
        let kw = Kwargs::from([("center_y", 0.3), ("theta_E", 1.2), ("center_x", -0.1)]);
        let values = kw.ordered_values(&SIS, "SIS", None).unwrap();
        assert_eq!(values, vec![1.2, -0.1, 0.3]);
    }

    #[test]
    fn test_exact_key_matching() {
        let missing = Kwargs::from([("theta_E", 1.0), ("center_x", 0.0)]);
        assert!(missing.validate(&SIS, "SIS", false).is_err());

        let extra = Kwargs::from([("theta_E", 1.0), ("center_x", 0.0), ("center_y", 0.0), ("q", 0.7)]);
        assert!(extra.validate(&SIS, "SIS", false).is_err());
    }

    #[test]
    fn test_linear_sentinel() {
        let kw = Kwargs::from([("sigma", 0.5)]);
        assert!(kw.validate(&GAUSS, "GAUSSIAN", false).is_err());
        assert!(kw.validate(&GAUSS, "GAUSSIAN", true).is_ok());
        assert_eq!(kw.ordered_values(&GAUSS, "GAUSSIAN", Some(1.0)).unwrap(), vec![1.0, 0.5]);
    }

    #[test]
    fn test_array_shape_checked() {
        let specs = [ParamSpec::nonlinear("ra_image").array(2)];
        let good = Kwargs::new().with("ra_image", vec![1.0, -1.0]);
        assert!(good.validate(&specs, "LENSED_POSITION", false).is_ok());

        let bad = Kwargs::new().with("ra_image", vec![1.0]);
        assert!(bad.validate(&specs, "LENSED_POSITION", false).is_err());

        let scalar = Kwargs::new().with("ra_image", 1.0);
        assert!(scalar.validate(&specs, "LENSED_POSITION", false).is_err());
    }

    #[test]
    fn test_model_kwargs_json() {
        let json = r#"{
            "lens": [{"theta_E": 1.0, "center_x": 0.0, "center_y": 0.0}],
            "point_source": [{"ra_image": [1.0, -1.0], "dec_image": [0.0, 0.0]}]
        }"#;
        let kwargs = ModelKwargs::from_json(json).unwrap();
        assert_eq!(kwargs.lens.len(), 1);
        assert!(kwargs.source_light.is_empty());
        assert_eq!(kwargs.point_source[0].array("ra_image").unwrap(), &[1.0, -1.0]);

        let back = ModelKwargs::from_json(&kwargs.to_json().unwrap()).unwrap();
        assert_eq!(back, kwargs);
    }

    #[test]
    fn test_special_group_is_single_profile() {
        let mut kwargs = ModelKwargs::new();
        kwargs.special.insert("D_dt", 3000.0);
        assert_eq!(kwargs.group(ModelGroup::Special).len(), 1);
        assert!(kwargs.profile_mut(ModelGroup::Special, 1).is_none());
        assert_eq!(
            kwargs.value(ModelGroup::Special, 0, "D_dt"),
            Some(&ParamValue::Scalar(3000.0))
        );
    }
}
