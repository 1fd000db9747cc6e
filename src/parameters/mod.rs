//! # Parameter System
//!
//! Structured model parameters and their flat-vector representation.
//!
//! ## Core Components
//!
//! - [`Kwargs`] / [`ModelKwargs`]: named parameter values per profile and per model group
//! - [`ParamSpec`] / [`ModelSchema`]: the declared, ordered parameters of each profile,
//!   with a linear flag for amplitudes
//! - [`Param`]: marshaling between kwargs and flat vectors with fixed values,
//!   joint constraints and linear-amplitude handling
//! - [`Bounds`]: per-slot limits used by the likelihood and the optimizers
//!
//! ## Example Usage
//!
//! ```rust
//! use lensfit_rs::parameters::{Kwargs, ModelKwargs, ModelSchema, Param, ParamSpec};
//!
//! let schema = ModelSchema::new(
//!     vec![vec![ParamSpec::nonlinear("theta_E"), ParamSpec::nonlinear("center_x"), ParamSpec::nonlinear("center_y")]],
//!     vec![],
//!     vec![],
//!     vec![],
//!     vec![],
//! );
//!
//! // Hold the lens centre fixed
//! let mut fixed = ModelKwargs::with_counts(1, 0, 0, 0);
//! fixed.lens[0] = Kwargs::from([("center_x", 0.0), ("center_y", 0.0)]);
//! let param = Param::new(schema, fixed, vec![], true).unwrap();
//! assert_eq!(param.param_names(), &["theta_E_lens0".to_string()]);
//!
//! let kwargs = param.from_vector(&ndarray::array![1.2]).unwrap();
//! assert_eq!(kwargs.lens[0].scalar("center_x").unwrap(), 0.0);
//! ```

pub mod bounds;
pub mod kwargs;
pub mod param;
pub mod schema;

// Re-export key types
pub use bounds::{Bounds, BoundsError};
pub use kwargs::{Kwargs, ModelKwargs, ParamValue};
pub use param::{JointConstraint, Param, ParamRef};
pub use schema::{ModelGroup, ModelSchema, ParamSpec};
