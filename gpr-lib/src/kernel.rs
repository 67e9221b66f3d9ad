//! Covariance functions consumed by the regression engine.
//!
//! A kernel is selected at construction time from a [KernelType] tag; new kernels are
//! added as new variants whose implementation satisfies the [Kernel] contract.

use std::{fmt, str::FromStr};

use crate::errors::{RegressionError, Result};
use crate::params::ParameterSet;

/// Name of the length scale hyperparameter $\ell$
pub const LENGTH_SCALE: &str = "length_scale";
/// Name of the signal variance hyperparameter $\sigma^{2}$
pub const SIGNAL_VARIANCE: &str = "signal_variance";

/// Covariance function $k: (\mathbb{R}^{d}, \mathbb{R}^{d}, \theta) \to \mathbb{R}$
///
/// Implementations must be symmetric and positive semi-definite, defined for `a == b`,
/// deterministic, and free of side effects: the builder evaluates them concurrently.
///
/// # Examples
///
/// A constant kernel
/// ```
/// use gpr_lib::{Kernel, ParameterSet, RegressionError};
///
/// #[derive(Debug)]
/// struct Constant;
///
/// impl Kernel for Constant {
///     fn name(&self) -> &'static str {
///         "constant"
///     }
///     fn parameter_names(&self) -> &'static [&'static str] {
///         &["level"]
///     }
///     fn evaluate(&self, _a: &[f64], _b: &[f64], params: &ParameterSet) -> f64 {
///         params.get("level").unwrap_or(f64::NAN)
///     }
///     fn derivative(&self, _a: &[f64], _b: &[f64], _params: &ParameterSet, var: &str) -> Result<f64, RegressionError> {
///         match var {
///             "level" => Ok(1.),
///             _ => Err(RegressionError::UnknownParameter(var.to_string())),
///         }
///     }
/// }
///
/// let params = ParameterSet::new().with("level", 2.);
/// assert!(Constant.verify(&params).is_ok());
/// assert_eq!(Constant.evaluate(&[0.], &[5.], &params), 2.);
/// ```
pub trait Kernel: fmt::Debug + Send + Sync {
    /// Human readable kernel name
    fn name(&self) -> &'static str;

    /// Hyperparameters read by [Kernel::evaluate], in gradient order
    fn parameter_names(&self) -> &'static [&'static str];

    /// Covariance between `a` and `b`; both must have the same length
    ///
    /// Parameters are assumed to have passed [Kernel::verify]
    fn evaluate(&self, a: &[f64], b: &[f64], params: &ParameterSet) -> f64;

    /// Partial derivative of [Kernel::evaluate] with respect to hyperparameter `var`
    ///
    /// # Errors
    ///
    /// [`RegressionError::UnknownParameter`] if the kernel has no such parameter
    fn derivative(&self, a: &[f64], b: &[f64], params: &ParameterSet, var: &str) -> Result<f64>;

    /// Checks that every parameter in [Kernel::parameter_names] is present and finite
    ///
    /// # Errors
    ///
    /// [`RegressionError::MissingParameter`] or [`RegressionError::InvalidParameter`]
    fn verify(&self, params: &ParameterSet) -> Result<()> {
        for name in self.parameter_names() {
            params.require(name)?;
        }
        Ok(())
    }
}

/// Available kernel types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum KernelType {
    /// See [SquaredExponential]
    #[default]
    SquaredExponential,
}

impl KernelType {
    /// Instantiate the kernel this tag names
    #[must_use]
    pub fn build(self) -> Box<dyn Kernel> {
        match self {
            KernelType::SquaredExponential => Box::new(SquaredExponential),
        }
    }
}

impl fmt::Display for KernelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelType::SquaredExponential => write!(f, "squared_exponential"),
        }
    }
}

impl FromStr for KernelType {
    type Err = RegressionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "squared_exponential" | "squaredexponential" | "squared exponential" | "se" => {
                Ok(KernelType::SquaredExponential)
            }
            _ => Err(RegressionError::InvalidConfiguration(format!(
                "invalid kernel choice: {s:?}"
            ))),
        }
    }
}

/// Integer codes used across flat-buffer boundaries
impl TryFrom<i32> for KernelType {
    type Error = RegressionError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(KernelType::SquaredExponential),
            _ => Err(RegressionError::InvalidConfiguration(format!(
                "invalid kernel code: {code}"
            ))),
        }
    }
}

/// Squared exponential (RBF) kernel
///
/// $k(a, b) = \sigma^{2} \exp\left(-\frac{\lVert a - b \rVert^{2}}{2\ell^{2}}\right)$
///
/// reading $\ell$ from [LENGTH_SCALE] and $\sigma^{2}$ from [SIGNAL_VARIANCE].
///
/// ```
/// use gpr_lib::{Kernel, SquaredExponential};
///
/// let params = SquaredExponential::params(1., 1.);
/// assert_eq!(SquaredExponential.evaluate(&[0., 0.], &[0., 0.], &params), 1.);
/// assert!(SquaredExponential.evaluate(&[0., 0.], &[1., 1.], &params) < 1.);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SquaredExponential;

impl SquaredExponential {
    /// Parameter set holding a length scale and a signal variance
    #[must_use]
    pub fn params(length_scale: f64, signal_variance: f64) -> ParameterSet {
        ParameterSet::new()
            .with(LENGTH_SCALE, length_scale)
            .with(SIGNAL_VARIANCE, signal_variance)
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "feature vectors of different length");
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

impl Kernel for SquaredExponential {
    fn name(&self) -> &'static str {
        "squared exponential"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &[LENGTH_SCALE, SIGNAL_VARIANCE]
    }

    fn evaluate(&self, a: &[f64], b: &[f64], params: &ParameterSet) -> f64 {
        // unverified parameters propagate as NaN
        let l = params.get(LENGTH_SCALE).unwrap_or(f64::NAN);
        let s2 = params.get(SIGNAL_VARIANCE).unwrap_or(f64::NAN);
        s2 * (-0.5 * squared_distance(a, b) / (l * l)).exp()
    }

    fn derivative(&self, a: &[f64], b: &[f64], params: &ParameterSet, var: &str) -> Result<f64> {
        let l = params.require(LENGTH_SCALE)?;
        let s2 = params.require(SIGNAL_VARIANCE)?;
        let r2 = squared_distance(a, b);
        let e = (-0.5 * r2 / (l * l)).exp();
        match var {
            LENGTH_SCALE => Ok(s2 * e * r2 / l.powi(3)),
            SIGNAL_VARIANCE => Ok(e),
            _ => Err(RegressionError::UnknownParameter(var.to_string())),
        }
    }

    fn verify(&self, params: &ParameterSet) -> Result<()> {
        let l = params.require(LENGTH_SCALE)?;
        if l <= 0. {
            return Err(RegressionError::InvalidParameter {
                name: LENGTH_SCALE.to_string(),
                value: l,
            });
        }
        let s2 = params.require(SIGNAL_VARIANCE)?;
        if s2 < 0. {
            return Err(RegressionError::InvalidParameter {
                name: SIGNAL_VARIANCE.to_string(),
                value: s2,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn tags_select_squared_exponential() {
        for tag in ["squared_exponential", "SquaredExponential", " SE ", "squared exponential"] {
            assert_eq!(tag.parse::<KernelType>(), Ok(KernelType::SquaredExponential));
        }
        assert_eq!(KernelType::try_from(0), Ok(KernelType::SquaredExponential));
        assert_eq!(
            KernelType::SquaredExponential.to_string().parse::<KernelType>(),
            Ok(KernelType::SquaredExponential)
        );
    }

    #[test]
    fn unknown_tags_are_invalid_configuration() {
        assert!(matches!(
            "matern52".parse::<KernelType>(),
            Err(RegressionError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            KernelType::try_from(3),
            Err(RegressionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn squared_exponential_values() {
        let kernel = KernelType::SquaredExponential.build();
        let params = SquaredExponential::params(2., 3.);

        assert_approx_eq!(kernel.evaluate(&[1., 1.], &[1., 1.], &params), 3.);
        // |a - b|^2 = 8, l^2 = 4
        assert_approx_eq!(
            kernel.evaluate(&[0., 0.], &[2., 2.], &params),
            3. * (-1f64).exp()
        );
        assert_approx_eq!(
            kernel.evaluate(&[0.3, -1.], &[2., 0.5], &params),
            kernel.evaluate(&[2., 0.5], &[0.3, -1.], &params)
        );
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let a = [0.2, -0.4];
        let b = [1.1, 0.3];
        let h = 1e-6;
        for (name, value) in [(LENGTH_SCALE, 0.8), (SIGNAL_VARIANCE, 1.7)] {
            let base = SquaredExponential::params(0.8, 1.7);
            let up = base.clone().with(name, value + h);
            let down = base.clone().with(name, value - h);
            let fd = (SquaredExponential.evaluate(&a, &b, &up)
                - SquaredExponential.evaluate(&a, &b, &down))
                / (2. * h);
            let analytic = SquaredExponential.derivative(&a, &b, &base, name).unwrap();
            assert_approx_eq!(analytic, fd, 1e-6);
        }
    }

    #[test]
    fn derivative_of_unknown_parameter_fails() {
        let params = SquaredExponential::params(1., 1.);
        assert_eq!(
            SquaredExponential.derivative(&[0.], &[1.], &params, "period"),
            Err(RegressionError::UnknownParameter("period".to_string()))
        );
    }

    #[test]
    fn verify_checks_domain() {
        assert!(SquaredExponential
            .verify(&SquaredExponential::params(1., 0.))
            .is_ok());
        assert!(matches!(
            SquaredExponential.verify(&SquaredExponential::params(0., 1.)),
            Err(RegressionError::InvalidParameter { .. })
        ));
        assert!(matches!(
            SquaredExponential.verify(&SquaredExponential::params(1., -1.)),
            Err(RegressionError::InvalidParameter { .. })
        ));
        assert_eq!(
            SquaredExponential.verify(&ParameterSet::new().with(LENGTH_SCALE, 1.)),
            Err(RegressionError::MissingParameter(SIGNAL_VARIANCE.to_string()))
        );
    }
}
