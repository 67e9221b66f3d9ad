//! This library computes the Gaussian process (GP) posterior predictive distribution
//! for a fixed kernel and hyperparameter set.
//!
//! GP regression treats the unknown function values at all training and test points
//! as jointly Gaussian, with covariance given by a kernel $k(x_{1}, x_{2})$.
//! Conditioning on the training outputs $y$ yields, at the test points, a predictive
//! mean, a full predictive covariance and pointwise standard deviations.
//!
//! # Implementation
//!
//! * Based on [Faer](https://github.com/sarah-ek/faer-rs) for the Cholesky factorization and triangular solves
//! * GP mean is 0
//! * Kernel chosen from a [KernelType] tag, or any [Kernel] implementation
//! * Training covariance regularised with adaptive diagonal jitter before factorization ([jitter_cholesky])
//! * Covariance fills and standard deviations computed in parallel with [rayon](https://docs.rs/rayon)
//! * Dimensionality issue : scales as $O(n^{3})$ in size of training data
//!
//! # Reference
//!
//! Gaussian Processes for Machine Learning, C. E. Rasmussen & C. K. I. Williams, 2006

#![warn(
    clippy::pedantic,
    clippy::suspicious,
    clippy::perf,
    clippy::complexity,
    clippy::style
)]
#![forbid(unsafe_code)]
#![allow(clippy::doc_markdown)]

mod cholesky;
mod covariance;
mod data;
mod errors;
mod kernel;
mod params;
mod regressor;

pub use cholesky::{
    cholesky_solve, jitter_cholesky, JitterConfig, JitteredFactor, DEFAULT_INITIAL_JITTER,
    DEFAULT_JITTER_CEILING, DEFAULT_JITTER_GROWTH,
};
pub use covariance::{build_covariance_matrix, covariance_matrix, derivative_matrix};
pub use data::FeatureMatrix;
pub use errors::{RegressionError, Result};
pub use kernel::{Kernel, KernelType, SquaredExponential, LENGTH_SCALE, SIGNAL_VARIANCE};
pub use params::ParameterSet;
pub use regressor::{GpRegressor, RegressionBuffers};
