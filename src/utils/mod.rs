//! Utility functions and helpers for the lensfit-rs library.

pub mod finite_difference;

pub use finite_difference::{hessian_from_gradient, jacobian_2d};
