//! Conversion between structured kwargs and flat parameter vectors.
//!
//! The optimizers work on plain `Array1<f64>` vectors while the models are
//! evaluated from [`ModelKwargs`]. [`Param`] owns the mapping between the two:
//! a deterministic ordering of the free parameters, the values of the fixed
//! ones, joint constraints that tie one parameter to another, and whether
//! linear amplitudes are sampled or left to the linear solver.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::bounds::Bounds;
use super::kwargs::{Kwargs, ModelKwargs, ParamValue};
use super::schema::{ModelGroup, ModelSchema, ParamSpec};
use crate::error::{LensFitError, Result};

/// Reference to a scalar parameter of one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamRef {
    pub group: ModelGroup,
    pub index: usize,
    pub name: String,
}

impl ParamRef {
    pub fn new(group: ModelGroup, index: usize, name: &str) -> Self {
        Self {
            group,
            index,
            name: name.to_string(),
        }
    }
}

/// Two parameters forced to share a value.
///
/// Only the leader appears in the flat vector; on expansion the follower is
/// populated with the leader's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointConstraint {
    pub leader: ParamRef,
    pub follower: ParamRef,
}

impl JointConstraint {
    pub fn new(leader: ParamRef, follower: ParamRef) -> Self {
        Self { leader, follower }
    }
}

/// A sampled entry of the flat vector.
#[derive(Debug, Clone)]
struct Slot {
    group: ModelGroup,
    index: usize,
    name: &'static str,
    len: Option<usize>,
}

/// Parameter marshaling for a complete model.
#[derive(Debug, Clone)]
pub struct Param {
    schema: ModelSchema,
    fixed: ModelKwargs,
    joints: Vec<JointConstraint>,
    linear_solver: bool,
    slots: Vec<Slot>,
    names: Vec<String>,
}

impl Param {
    /// Build the marshaling layout.
    ///
    /// # Arguments
    ///
    /// * `schema` - Parameter declarations of every profile
    /// * `fixed` - Values held fixed; they never appear in the vector
    /// * `joints` - Joint constraints between scalar parameters
    /// * `linear_solver` - When true, linear amplitudes that are not fixed are
    ///   left out of the vector and solved by least squares
    ///
    /// # Errors
    ///
    /// `ConfigError` when a fixed or joint parameter does not exist in the
    /// schema, has the wrong shape, or the joint constraints are inconsistent.
    pub fn new(
        schema: ModelSchema,
        fixed: ModelKwargs,
        joints: Vec<JointConstraint>,
        linear_solver: bool,
    ) -> Result<Self> {
        for group in ModelGroup::ALL {
            let profiles = schema.profiles(group);
            for (index, kw) in fixed.group(group).iter().enumerate() {
                if kw.is_empty() {
                    continue;
                }
                let specs = profiles.get(index).ok_or_else(|| {
                    LensFitError::config(format!(
                        "fixed parameters given for {} profile {} which does not exist",
                        group, index
                    ))
                })?;
                for (name, value) in kw.iter() {
                    let spec = specs.iter().find(|s| s.name == name).ok_or_else(|| {
                        LensFitError::config(format!(
                            "fixed parameter '{}' is not declared by {} profile {}",
                            name, group, index
                        ))
                    })?;
                    check_shape(spec, value)?;
                }
            }
        }

        let mut param = Self {
            schema,
            fixed,
            joints,
            linear_solver,
            slots: Vec::new(),
            names: Vec::new(),
        };
        param.validate_joints()?;
        param.build_slots();
        Ok(param)
    }

    /// Layout without fixed parameters or joints.
    pub fn free(schema: ModelSchema, linear_solver: bool) -> Result<Self> {
        Self::new(schema, ModelKwargs::default(), Vec::new(), linear_solver)
    }

    fn validate_joints(&self) -> Result<()> {
        for joint in &self.joints {
            for side in [&joint.leader, &joint.follower] {
                let spec = self
                    .schema
                    .spec(side.group, side.index, &side.name)
                    .ok_or_else(|| {
                        LensFitError::config(format!(
                            "joint parameter '{}' of {} profile {} does not exist",
                            side.name, side.group, side.index
                        ))
                    })?;
                if spec.is_array() {
                    return Err(LensFitError::config(format!(
                        "joint parameter '{}' must be a scalar",
                        side.name
                    )));
                }
                if spec.linear {
                    return Err(LensFitError::config(format!(
                        "linear amplitude '{}' cannot take part in a joint constraint",
                        side.name
                    )));
                }
            }

            let follower = &joint.follower;
            if self.fixed_value(follower.group, follower.index, &follower.name).is_some() {
                return Err(LensFitError::config(format!(
                    "joint follower '{}' of {} profile {} is also fixed",
                    follower.name, follower.group, follower.index
                )));
            }
            if joint.leader == joint.follower {
                return Err(LensFitError::config("a parameter cannot be joined to itself"));
            }
            if self.is_follower(joint.leader.group, joint.leader.index, &joint.leader.name) {
                return Err(LensFitError::config(format!(
                    "joint leader '{}' is itself a follower",
                    joint.leader.name
                )));
            }
        }

        for (i, a) in self.joints.iter().enumerate() {
            if self.joints[i + 1..].iter().any(|b| b.follower == a.follower) {
                return Err(LensFitError::config(format!(
                    "parameter '{}' follows more than one leader",
                    a.follower.name
                )));
            }
        }

        Ok(())
    }

    fn build_slots(&mut self) {
        let mut slots = Vec::new();
        let mut names = Vec::new();

        for group in ModelGroup::ALL {
            for (index, specs) in self.schema.profiles(group).iter().enumerate() {
                for spec in specs {
                    if !self.is_sampled(group, index, spec) {
                        continue;
                    }
                    let base = match group {
                        ModelGroup::Special => spec.name.to_string(),
                        _ => format!("{}_{}{}", spec.name, group.suffix(), index),
                    };
                    match spec.len {
                        None => names.push(base),
                        Some(n) => names.extend((0..n).map(|k| format!("{}[{}]", base, k))),
                    }
                    slots.push(Slot {
                        group,
                        index,
                        name: spec.name,
                        len: spec.len,
                    });
                }
            }
        }

        self.slots = slots;
        self.names = names;
    }

    fn is_sampled(&self, group: ModelGroup, index: usize, spec: &ParamSpec) -> bool {
        if self.fixed_value(group, index, spec.name).is_some() {
            return false;
        }
        if self.is_follower(group, index, spec.name) {
            return false;
        }
        !(spec.linear && self.linear_solver)
    }

    fn fixed_value(&self, group: ModelGroup, index: usize, name: &str) -> Option<&ParamValue> {
        self.fixed.value(group, index, name)
    }

    fn is_follower(&self, group: ModelGroup, index: usize, name: &str) -> bool {
        self.joints
            .iter()
            .any(|j| j.follower.group == group && j.follower.index == index && j.follower.name == name)
    }

    /// Number of entries of the flat vector.
    pub fn num_params(&self) -> usize {
        self.names.len()
    }

    /// Names of the flat vector entries, e.g. `theta_E_lens0`, `ra_image_ps0[1]`.
    pub fn param_names(&self) -> &[String] {
        &self.names
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn fixed(&self) -> &ModelKwargs {
        &self.fixed
    }

    pub fn linear_solver(&self) -> bool {
        self.linear_solver
    }

    /// Flatten the free parameters of `kwargs`.
    ///
    /// Values of fixed parameters and joint followers in `kwargs` are ignored.
    pub fn to_vector(&self, kwargs: &ModelKwargs) -> Result<(Array1<f64>, Vec<String>)> {
        let mut values = Vec::with_capacity(self.names.len());

        for slot in &self.slots {
            let value = kwargs.value(slot.group, slot.index, slot.name).ok_or_else(|| {
                LensFitError::config(format!(
                    "missing free parameter '{}' of {} profile {}",
                    slot.name, slot.group, slot.index
                ))
            })?;
            match (slot.len, value) {
                (None, ParamValue::Scalar(v)) => values.push(*v),
                (Some(n), ParamValue::Array(v)) if v.len() == n => values.extend_from_slice(v),
                _ => {
                    return Err(LensFitError::config(format!(
                        "parameter '{}' of {} profile {} has the wrong shape",
                        slot.name, slot.group, slot.index
                    )))
                }
            }
        }

        Ok((Array1::from_vec(values), self.names.clone()))
    }

    /// Expand a flat vector back into structured kwargs.
    ///
    /// Fixed values are inserted unchanged, joint followers copy their leader
    /// and linear amplitudes handled by the linear solver stay absent.
    ///
    /// # Errors
    ///
    /// `ParameterCountMismatch` when the vector length differs from
    /// [`Param::num_params`].
    pub fn from_vector(&self, x: &Array1<f64>) -> Result<ModelKwargs> {
        if x.len() != self.num_params() {
            return Err(LensFitError::ParameterCountMismatch {
                expected: self.num_params(),
                got: x.len(),
            });
        }

        let counts = |g: ModelGroup| self.schema.profiles(g).len();
        let mut kwargs = ModelKwargs::with_counts(
            counts(ModelGroup::Lens),
            counts(ModelGroup::SourceLight),
            counts(ModelGroup::LensLight),
            counts(ModelGroup::PointSource),
        );

        for group in ModelGroup::ALL {
            for (index, fixed) in self.fixed.group(group).iter().enumerate() {
                if let Some(target) = kwargs.profile_mut(group, index) {
                    for (name, value) in fixed.iter() {
                        target.insert(name, value.clone());
                    }
                }
            }
        }

        let mut cursor = 0;
        for slot in &self.slots {
            let target = profile_mut(&mut kwargs, slot.group, slot.index)?;
            match slot.len {
                None => {
                    target.insert(slot.name, x[cursor]);
                    cursor += 1;
                }
                Some(n) => {
                    let values: Vec<f64> = x.iter().skip(cursor).take(n).copied().collect();
                    target.insert(slot.name, values);
                    cursor += n;
                }
            }
        }

        for joint in &self.joints {
            let leader = &joint.leader;
            let value = kwargs
                .value(leader.group, leader.index, &leader.name)
                .cloned()
                .ok_or_else(|| {
                    LensFitError::config(format!(
                        "joint leader '{}' has no value (neither free nor fixed)",
                        leader.name
                    ))
                })?;
            let follower = &joint.follower;
            profile_mut(&mut kwargs, follower.group, follower.index)?.insert(&follower.name, value);
        }

        Ok(kwargs)
    }

    /// Marshal lower and upper kwargs into per-slot bounds.
    pub fn bounds(&self, lower: &ModelKwargs, upper: &ModelKwargs) -> Result<Vec<Bounds>> {
        let (lo, _) = self.to_vector(lower)?;
        let (hi, _) = self.to_vector(upper)?;
        lo.iter()
            .zip(hi.iter())
            .map(|(&min, &max)| Ok(Bounds::new(min, max)?))
            .collect()
    }

    /// Drop linear amplitudes that the linear solver would determine.
    ///
    /// Useful to turn a fully specified truth model into the shape returned
    /// by [`Param::from_vector`].
    pub fn strip_linear(&self, kwargs: &ModelKwargs) -> ModelKwargs {
        let mut stripped = kwargs.clone();
        if !self.linear_solver {
            return stripped;
        }
        for group in ModelGroup::ALL {
            for (index, specs) in self.schema.profiles(group).iter().enumerate() {
                for spec in specs.iter().filter(|s| s.linear) {
                    if self.fixed_value(group, index, spec.name).is_some() {
                        continue;
                    }
                    if let Some(kw) = stripped.profile_mut(group, index) {
                        kw.remove(spec.name);
                    }
                }
            }
        }
        stripped
    }
}

fn profile_mut(kwargs: &mut ModelKwargs, group: ModelGroup, index: usize) -> Result<&mut Kwargs> {
    kwargs.profile_mut(group, index).ok_or_else(|| {
        LensFitError::config(format!("{} profile {} does not exist", group, index))
    })
}

fn check_shape(spec: &ParamSpec, value: &ParamValue) -> Result<()> {
    match (spec.len, value) {
        (None, ParamValue::Scalar(_)) => Ok(()),
        (Some(n), ParamValue::Array(v)) if v.len() == n => Ok(()),
        _ => Err(LensFitError::config(format!(
            "fixed parameter '{}' has the wrong shape",
            spec.name
        ))),
    }
}
