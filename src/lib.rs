//! # lensfit-rs
//!
//! `lensfit-rs` simulates strong gravitational lens images and fits lens
//! models to pixel data.
//!
//! The library provides:
//! - Pixel grids with affine pixel↔angle transforms and supersampling
//! - Single-plane and multi-plane lens deflection, magnification and Fermat
//!   potential, with a lens-equation solver
//! - Analytic light profiles, point sources and PSF convolution
//! - Joint linear inversion of amplitude parameters
//! - Parameter marshaling with fixed and joint parameters
//! - A likelihood that never fails and parallel particle swarm / simplex
//!   optimizers
//!
//! ## Basic Usage
//!
//! ```
//! use lensfit_rs::grid::PixelGrid;
//! use lensfit_rs::image_model::{ImageModel, ModelComponents, NumericsConfig};
//! use lensfit_rs::lens_model::LensModel;
//! use lensfit_rs::light_model::LightModel;
//! use lensfit_rs::parameters::{Kwargs, ModelKwargs};
//! use lensfit_rs::profiles::{Gaussian, Sis};
//! use lensfit_rs::psf::Psf;
//! use std::sync::Arc;
//!
//! let grid = PixelGrid::centered(40, 0.05).unwrap();
//! let components = ModelComponents {
//!     lens_model: LensModel::new(vec![Arc::new(Sis)]),
//!     source_light: LightModel::new(vec![Arc::new(Gaussian)]),
//!     ..ModelComponents::default()
//! };
//! let psf = Psf::gaussian(0.1, 0.05, 3.0).unwrap();
//! let model = ImageModel::new(grid, psf, NumericsConfig::default(), components).unwrap();
//!
//! let kwargs = ModelKwargs {
//!     lens: vec![Kwargs::from([("theta_E", 0.6), ("center_x", 0.0), ("center_y", 0.0)])],
//!     source_light: vec![Kwargs::from([("amp", 1.0), ("sigma", 0.05), ("center_x", 0.02), ("center_y", 0.0)])],
//!     ..ModelKwargs::default()
//! };
//! let image = model.image(&kwargs).unwrap();
//! assert_eq!(image.dim(), (40, 40));
//! ```

pub mod error;

pub mod cosmology;
pub mod grid;
pub mod parameters;
pub mod profiles;
pub mod utils;

pub mod lens_equation;
pub mod lens_model;
pub mod light_model;
pub mod point_source;

pub mod data;
pub mod image_model;
pub mod linear_solver;
pub mod psf;

pub mod config;
pub mod fitting;
pub mod likelihood;
pub mod problem;
pub mod simulation;

// Re-exports for convenience
pub use error::{LensFitError, Result};
pub use fitting::{FitResult, FittingSequence, NelderMead, ParticleSwarm};
pub use grid::PixelGrid;
pub use image_model::ImageModel;
pub use lens_model::LensModel;
pub use likelihood::LikelihoodModule;
pub use parameters::{ModelKwargs, Param};
pub use problem::FitProblem;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
