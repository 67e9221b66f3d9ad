//! Covariance matrices between two sets of samples.
//!
//! Every cell $C_{i, j} = k(a_{i}, b_{j}, \theta)$ is independent, so columns are
//! filled in place on the rayon pool.

use faer::Mat;
use rayon::prelude::*;

use crate::data::FeatureMatrix;
use crate::errors::{RegressionError, Result};
use crate::kernel::Kernel;
use crate::params::ParameterSet;

/// Fill `out` with the covariance between the rows of `a` and the rows of `b`
///
/// `out` is resized to `a.nrows() x b.nrows()`, reusing its allocation where possible.
/// The caller is responsible for `a` and `b` having the same number of columns.
pub fn build_covariance_matrix(
    a: &FeatureMatrix,
    b: &FeatureMatrix,
    params: &ParameterSet,
    kernel: &dyn Kernel,
    out: &mut Mat<f64>,
) {
    out.resize_with(a.nrows(), b.nrows(), |_, _| 0.);
    out.par_col_chunks_mut(1)
        .enumerate()
        .for_each(|(j, mut col)| {
            let b_j = b.row(j);
            for i in 0..col.nrows() {
                col.write(i, 0, kernel.evaluate(a.row(i), b_j, params));
            }
        });
}

/// Allocating form of [build_covariance_matrix]
///
/// ```
/// use gpr_lib::{covariance_matrix, FeatureMatrix, KernelType, SquaredExponential};
///
/// let x = FeatureMatrix::from_rows(vec![vec![0.], vec![1.], vec![2.]]).unwrap();
/// let kernel = KernelType::SquaredExponential.build();
/// let k = covariance_matrix(&x, &x, &SquaredExponential::params(1., 1.), kernel.as_ref());
/// assert_eq!(k.nrows(), 3);
/// assert_eq!(k[(1, 1)], 1.);
/// ```
#[must_use]
pub fn covariance_matrix(
    a: &FeatureMatrix,
    b: &FeatureMatrix,
    params: &ParameterSet,
    kernel: &dyn Kernel,
) -> Mat<f64> {
    let mut out = Mat::zeros(0, 0);
    build_covariance_matrix(a, b, params, kernel, &mut out);
    out
}

/// Matrix of $\partial k(a_{i}, b_{j}, \theta) / \partial \theta_{var}$
///
/// # Errors
///
/// [`RegressionError::UnknownParameter`] if the kernel has no parameter `var`,
/// or any error the kernel raises while differentiating
pub fn derivative_matrix(
    a: &FeatureMatrix,
    b: &FeatureMatrix,
    params: &ParameterSet,
    kernel: &dyn Kernel,
    var: &str,
) -> Result<Mat<f64>> {
    if !kernel.parameter_names().contains(&var) {
        return Err(RegressionError::UnknownParameter(var.to_string()));
    }
    let mut out = Mat::zeros(a.nrows(), b.nrows());
    out.par_col_chunks_mut(1)
        .enumerate()
        .try_for_each(|(j, mut col)| -> Result<()> {
            let b_j = b.row(j);
            for i in 0..col.nrows() {
                col.write(i, 0, kernel.derivative(a.row(i), b_j, params, var)?);
            }
            Ok(())
        })?;
    Ok(out)
}
