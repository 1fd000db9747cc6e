//! Declared parameter schemas.
//!
//! A profile family declares its parameters once, in a fixed order, together
//! with a flag telling whether the parameter enters the model linearly (an
//! amplitude that may be solved by least squares instead of being sampled).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declaration of a single named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name as used in kwargs
    pub name: &'static str,

    /// Whether the parameter is a linear amplitude
    pub linear: bool,

    /// `None` for scalars, `Some(n)` for arrays of length n
    pub len: Option<usize>,
}

impl ParamSpec {
    /// A non-linear scalar parameter.
    pub const fn nonlinear(name: &'static str) -> Self {
        Self {
            name,
            linear: false,
            len: None,
        }
    }

    /// A linear amplitude parameter.
    pub const fn amplitude(name: &'static str) -> Self {
        Self {
            name,
            linear: true,
            len: None,
        }
    }

    /// Turn the declaration into an array of `len` elements.
    pub const fn array(self, len: usize) -> Self {
        Self {
            name: self.name,
            linear: self.linear,
            len: Some(len),
        }
    }

    /// Number of flat-vector slots this parameter occupies when sampled.
    pub fn width(&self) -> usize {
        self.len.unwrap_or(1)
    }

    pub fn is_array(&self) -> bool {
        self.len.is_some()
    }
}

/// The model groups of a lens model, in flat-vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelGroup {
    Lens,
    SourceLight,
    LensLight,
    PointSource,
    Special,
}

impl ModelGroup {
    /// All groups in marshaling order.
    pub const ALL: [ModelGroup; 5] = [
        ModelGroup::Lens,
        ModelGroup::SourceLight,
        ModelGroup::LensLight,
        ModelGroup::PointSource,
        ModelGroup::Special,
    ];

    /// Suffix used in flat parameter names, e.g. `theta_E_lens0`.
    pub fn suffix(&self) -> &'static str {
        match self {
            ModelGroup::Lens => "lens",
            ModelGroup::SourceLight => "source_light",
            ModelGroup::LensLight => "lens_light",
            ModelGroup::PointSource => "ps",
            ModelGroup::Special => "special",
        }
    }

    fn index(&self) -> usize {
        match self {
            ModelGroup::Lens => 0,
            ModelGroup::SourceLight => 1,
            ModelGroup::LensLight => 2,
            ModelGroup::PointSource => 3,
            ModelGroup::Special => 4,
        }
    }
}

impl fmt::Display for ModelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Parameter schemas of every profile of a full model, grouped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSchema {
    groups: [Vec<Vec<ParamSpec>>; 5],
}

impl ModelSchema {
    /// Assemble a schema from per-group profile declarations.
    ///
    /// The special group is a single pseudo-profile.
    pub fn new(
        lens: Vec<Vec<ParamSpec>>,
        source_light: Vec<Vec<ParamSpec>>,
        lens_light: Vec<Vec<ParamSpec>>,
        point_source: Vec<Vec<ParamSpec>>,
        special: Vec<ParamSpec>,
    ) -> Self {
        Self {
            groups: [lens, source_light, lens_light, point_source, vec![special]],
        }
    }

    /// Profile declarations of a group.
    pub fn profiles(&self, group: ModelGroup) -> &[Vec<ParamSpec>] {
        &self.groups[group.index()]
    }

    /// Look up the declaration of a named parameter.
    pub fn spec(&self, group: ModelGroup, index: usize, name: &str) -> Option<&ParamSpec> {
        self.profiles(group)
            .get(index)
            .and_then(|specs| specs.iter().find(|s| s.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_constructors() {
        let amp = ParamSpec::amplitude("point_amp").array(4);
        assert!(amp.linear);
        assert_eq!(amp.width(), 4);
        assert!(amp.is_array());

        let theta = ParamSpec::nonlinear("theta_E");
        assert!(!theta.linear);
        assert_eq!(theta.width(), 1);
    }

    #[test]
    fn test_schema_lookup() {
        let schema = ModelSchema::new(
            vec![vec![ParamSpec::nonlinear("theta_E")]],
            vec![],
            vec![vec![ParamSpec::amplitude("amp")]],
            vec![],
            vec![ParamSpec::nonlinear("D_dt")],
        );

        assert!(schema.spec(ModelGroup::Lens, 0, "theta_E").is_some());
        assert!(schema.spec(ModelGroup::Lens, 1, "theta_E").is_none());
        assert!(schema.spec(ModelGroup::LensLight, 0, "amp").unwrap().linear);
        assert!(schema.spec(ModelGroup::Special, 0, "D_dt").is_some());
        assert!(schema.profiles(ModelGroup::SourceLight).is_empty());
    }
}
