use thiserror::Error;

/// A result type for GP posterior regression
pub type Result<T> = std::result::Result<T, RegressionError>;

/// Error raised by the regression engine and its building blocks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    /// Unrecognised kernel tag or invalid jitter settings
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Inputs whose dimensions do not line up
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Diagonal jitter reached its ceiling without a positive definite matrix
    #[error("Unable to make matrix positive definite (jitter reached {jitter:e})")]
    FactorizationFailed {
        /// jitter value at which the loop gave up
        jitter: f64,
    },
    /// A hyperparameter required by the kernel is absent
    #[error("Missing kernel parameter: {0}")]
    MissingParameter(String),
    /// A hyperparameter is present but out of its domain
    #[error("Invalid value {value} for kernel parameter {name}")]
    InvalidParameter {
        /// parameter name
        name: String,
        /// offending value
        value: f64,
    },
    /// The kernel does not know the named hyperparameter
    #[error("Unknown kernel parameter: {0}")]
    UnknownParameter(String),
    /// A feature or target is NaN or infinite
    #[error("Non finite input: {0}")]
    NonFiniteInput(String),
}
