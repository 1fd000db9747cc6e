use thiserror::Error;

/// Error types for the lensfit-rs library.
#[derive(Error, Debug)]
pub enum LensFitError {
    /// Malformed or invalid static configuration, surfaced at construction.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The lens-mapping Jacobian determinant vanished at the given position.
    #[error("Degenerate magnification at ({ra}, {dec}): det(A) = {det:e}")]
    DegenerateMagnification { ra: f64, dec: f64, det: f64 },

    /// The linear design matrix does not have full column rank.
    #[error("Singular design matrix: rank {rank} for {size} linear parameters")]
    SingularDesignMatrix { rank: usize, size: usize },

    /// A caller required lensed images but the solver found none.
    #[error("No lens equation solution found: {0}")]
    NoSolutionFound(String),

    /// A flat parameter vector had the wrong length.
    #[error("Parameter count mismatch: expected {expected}, got {got}")]
    ParameterCountMismatch { expected: usize, got: usize },

    /// Array shapes that must agree do not.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A computation produced NaN or infinity.
    #[error("Non-finite value: {0}")]
    NonFiniteValue(String),

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<crate::parameters::bounds::BoundsError> for LensFitError {
    fn from(err: crate::parameters::bounds::BoundsError) -> Self {
        LensFitError::ConfigError(format!("{}", err))
    }
}

/// Result type alias for lensfit-rs operations.
pub type Result<T> = std::result::Result<T, LensFitError>;

impl LensFitError {
    /// Shorthand for building a [`LensFitError::ConfigError`].
    pub fn config(msg: impl Into<String>) -> Self {
        LensFitError::ConfigError(msg.into())
    }

    /// Whether the caller may recover from this error through a fallback path.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LensFitError::DegenerateMagnification { .. }
                | LensFitError::SingularDesignMatrix { .. }
                | LensFitError::NoSolutionFound(_)
        )
    }
}
