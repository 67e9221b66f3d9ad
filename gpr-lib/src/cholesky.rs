//! Cholesky (LLT) factorization with adaptive diagonal jitter, and the triangular
//! solves run against the resulting factor.
//!
//! Kernel matrices over near-duplicate or densely clustered points are often
//! numerically singular. [jitter_cholesky] factorizes $A + \epsilon I$, growing
//! $\epsilon$ geometrically from a small start until the factorization succeeds.

use dyn_stack::{GlobalPodBuffer, PodStack};
use faer::Mat;
use faer_cholesky::llt::compute::LltParams;
use faer_core::{Conj, Parallelism};
use log::{trace, warn};

use crate::errors::{RegressionError, Result};

/// Default starting jitter
pub const DEFAULT_INITIAL_JITTER: f64 = 1e-8;
/// Default factor applied to the jitter after each failed attempt
pub const DEFAULT_JITTER_GROWTH: f64 = 1.1;
/// Default jitter value at which factorization is abandoned
pub const DEFAULT_JITTER_CEILING: f64 = 1e4;

/// Jitter schedule of [jitter_cholesky]
///
/// ```
/// use gpr_lib::JitterConfig;
///
/// let config = JitterConfig::default().with_initial(1e-10).with_growth(2.);
/// assert!(config.validate().is_ok());
/// assert!(JitterConfig::default().with_growth(1.).validate().is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JitterConfig {
    pub(crate) initial: f64,
    pub(crate) growth: f64,
    pub(crate) ceiling: f64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        JitterConfig {
            initial: DEFAULT_INITIAL_JITTER,
            growth: DEFAULT_JITTER_GROWTH,
            ceiling: DEFAULT_JITTER_CEILING,
        }
    }
}

impl JitterConfig {
    /// Set the first jitter tried
    #[must_use]
    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }

    /// Set the multiplicative growth between attempts
    #[must_use]
    pub fn with_growth(mut self, growth: f64) -> Self {
        self.growth = growth;
        self
    }

    /// Set the jitter at which factorization gives up
    #[must_use]
    pub fn with_ceiling(mut self, ceiling: f64) -> Self {
        self.ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn initial(&self) -> f64 {
        self.initial
    }

    #[must_use]
    pub fn growth(&self) -> f64 {
        self.growth
    }

    #[must_use]
    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    /// # Errors
    ///
    /// [`RegressionError::InvalidConfiguration`] unless `0 < initial < ceiling`,
    /// `growth > 1` and all values are finite
    pub fn validate(&self) -> Result<()> {
        let finite = self.initial.is_finite() && self.growth.is_finite() && self.ceiling.is_finite();
        if !finite || self.initial <= 0. || self.growth <= 1. || self.ceiling <= self.initial {
            return Err(RegressionError::InvalidConfiguration(format!(
                "jitter schedule {self:?} must satisfy 0 < initial < ceiling and growth > 1"
            )));
        }
        Ok(())
    }
}

/// Result of [jitter_cholesky]
#[derive(Clone, Debug)]
pub struct JitteredFactor {
    /// Lower triangular $L$ with $LL^{\intercal} = A + \epsilon I$
    pub l: Mat<f64>,
    /// The $\epsilon$ that was added to the diagonal
    pub jitter: f64,
    /// Number of factorizations tried, 1 if the initial jitter sufficed
    pub attempts: usize,
}

/// Factorize the symmetric matrix `a` as $LL^{\intercal} = A + \epsilon I$ for the
/// smallest $\epsilon$ of the schedule in `config` that makes it positive definite
///
/// # Errors
///
/// [`RegressionError::ShapeMismatch`] if `a` is not square,
/// [`RegressionError::FactorizationFailed`] if the jitter reaches its ceiling
///
/// # Examples
///
/// ```
/// use faer::mat;
/// use gpr_lib::{jitter_cholesky, JitterConfig};
///
/// // singular: both rows identical
/// let a = mat!([1., 1.], [1., 1.]);
/// let factor = jitter_cholesky(&a, &JitterConfig::default()).unwrap();
/// assert!(factor.jitter > 0.);
/// ```
pub fn jitter_cholesky(a: &Mat<f64>, config: &JitterConfig) -> Result<JitteredFactor> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(RegressionError::ShapeMismatch(format!(
            "cannot take the Cholesky decomposition of a non square {n}x{} matrix",
            a.ncols()
        )));
    }

    let req = faer_cholesky::llt::compute::cholesky_in_place_req::<f64>(
        n,
        Parallelism::None,
        LltParams::default(),
    )
    .map_err(|_| {
        RegressionError::ShapeMismatch(format!("workspace for a {n}x{n} factorization overflows"))
    })?;
    let mut mem = GlobalPodBuffer::new(req);

    // single-threaded LLT in place; each attempt refills the lower triangle
    let mut l = Mat::zeros(n, n);
    let mut jitter = config.initial;
    let mut attempts = 0;
    while jitter < config.ceiling {
        attempts += 1;
        for j in 0..n {
            for i in j..n {
                l.write(i, j, if i == j { a.read(i, j) + jitter } else { a.read(i, j) });
            }
        }
        let factorized = faer_cholesky::llt::compute::cholesky_in_place(
            l.as_mut(),
            Parallelism::None,
            PodStack::new(&mut mem),
            LltParams::default(),
        );
        if factorized.is_ok() {
            // the strict upper triangle holds leftovers of the factorization
            for j in 1..n {
                for i in 0..j {
                    l.write(i, j, 0.);
                }
            }
            if attempts > 1 {
                warn!("Cholesky needed jitter {jitter:e} after {attempts} attempts (n = {n})");
            }
            return Ok(JitteredFactor { l, jitter, attempts });
        }
        trace!("Cholesky failed with jitter {jitter:e}");
        jitter *= config.growth;
    }

    Err(RegressionError::FactorizationFailed { jitter })
}

fn check_rhs(l: &Mat<f64>, rhs: &Mat<f64>) -> Result<()> {
    if l.nrows() == rhs.nrows() {
        Ok(())
    } else {
        Err(RegressionError::ShapeMismatch(format!(
            "right hand side has {} rows, factor has {}",
            rhs.nrows(),
            l.nrows()
        )))
    }
}

/// Solve $LX = B$ in place, overwriting `rhs` with $X$
pub(crate) fn solve_lower_in_place(l: &Mat<f64>, rhs: &mut Mat<f64>) -> Result<()> {
    check_rhs(l, rhs)?;
    faer_core::solve::solve_lower_triangular_in_place(l.as_ref(), rhs.as_mut(), Parallelism::None);
    Ok(())
}

/// Solve $L^{\intercal}X = B$ in place, overwriting `rhs` with $X$
pub(crate) fn solve_lower_transpose_in_place(l: &Mat<f64>, rhs: &mut Mat<f64>) -> Result<()> {
    check_rhs(l, rhs)?;
    faer_core::solve::solve_upper_triangular_in_place(l.transpose(), rhs.as_mut(), Parallelism::None);
    Ok(())
}

/// Find $X$, the solution to $AX = B$ where $A = LL^{\intercal}$ is positive definite,
/// given its Cholesky factor `l`
///
/// # Errors
///
/// [`RegressionError::ShapeMismatch`] if `b` does not have as many rows as `l`
pub fn cholesky_solve(l: &Mat<f64>, b: &Mat<f64>) -> Result<Mat<f64>> {
    check_rhs(l, b)?;
    let mut x = b.clone();
    let req = faer_cholesky::llt::solve::solve_in_place_req::<f64>(
        l.nrows(),
        x.ncols(),
        Parallelism::None,
    )
    .map_err(|_| {
        RegressionError::ShapeMismatch(format!(
            "workspace for a {}x{} solve overflows",
            l.nrows(),
            x.ncols()
        ))
    })?;

    faer_cholesky::llt::solve::solve_in_place_with_conj(
        l.as_ref(),
        Conj::No,
        x.as_mut(),
        Parallelism::None,
        PodStack::new(&mut GlobalPodBuffer::new(req)),
    );

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::{assert_matrix_eq, mat};

    fn reconstruct(l: &Mat<f64>) -> Mat<f64> {
        l * l.transpose()
    }

    #[test]
    fn positive_definite_needs_no_extra_jitter() {
        let a = mat!([4., 12., -16.], [12., 37., -43.], [-16., -43., 98.]);
        let factor = jitter_cholesky(&a, &JitterConfig::default()).unwrap();

        assert_eq!(factor.attempts, 1);
        assert_eq!(factor.jitter, DEFAULT_INITIAL_JITTER);
        let expected = mat!([2., 0., 0.], [6., 1., 0.], [-8., 5., 3.]);
        assert_matrix_eq!(factor.l, expected, comp = abs, tol = 1e-6);
        assert_matrix_eq!(reconstruct(&factor.l), a, comp = abs, tol = 1e-6);
        for i in 0..3 {
            for j in (i + 1)..3 {
                assert_eq!(factor.l[(i, j)], 0.);
            }
        }
    }

    #[test]
    fn duplicated_rows_are_regularised() {
        // rank one covariance of three identical samples
        let a = Mat::from_fn(3, 3, |_, _| 1.);
        let factor = jitter_cholesky(&a, &JitterConfig::default()).unwrap();

        assert!(factor.jitter > 0.);
        let jittered = Mat::from_fn(3, 3, |i, j| a[(i, j)] + if i == j { factor.jitter } else { 0. });
        assert_matrix_eq!(reconstruct(&factor.l), jittered, comp = abs, tol = 1e-9);
        assert_matrix_eq!(reconstruct(&factor.l), a, comp = abs, tol = 1e-6);
    }

    #[test]
    fn jitter_grows_until_positive_definite() {
        let a = mat!([1., 0.], [0., -1e-6]);
        let factor = jitter_cholesky(&a, &JitterConfig::default()).unwrap();

        assert!(factor.attempts > 1);
        assert!(factor.jitter > 1e-6);
        assert!(factor.jitter < 1e-5);
        // the buffer reused across attempts holds the last factor only
        let jittered = mat!([1. + factor.jitter, 0.], [0., factor.jitter - 1e-6]);
        assert_matrix_eq!(reconstruct(&factor.l), jittered, comp = abs, tol = 1e-12);
        assert_eq!(factor.l[(0, 1)], 0.);
    }

    #[test]
    fn jitter_budget_is_bounded() {
        let a = mat!([1., 0.], [0., -1e5]);
        match jitter_cholesky(&a, &JitterConfig::default()) {
            Err(RegressionError::FactorizationFailed { jitter }) => assert!(jitter >= 1e4),
            other => panic!("expected factorization failure, got {other:?}"),
        }

        let tight = JitterConfig::default().with_ceiling(1e-3);
        let b = mat!([1., 0.], [0., -1.]);
        assert!(matches!(
            jitter_cholesky(&b, &tight),
            Err(RegressionError::FactorizationFailed { .. })
        ));
    }

    #[test]
    fn non_square_is_rejected() {
        let a = Mat::<f64>::zeros(2, 3);
        assert!(matches!(
            jitter_cholesky(&a, &JitterConfig::default()),
            Err(RegressionError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn config_validation() {
        assert!(JitterConfig::default().validate().is_ok());
        assert!(JitterConfig::default().with_initial(0.).validate().is_err());
        assert!(JitterConfig::default().with_initial(1e5).validate().is_err());
        assert!(JitterConfig::default().with_growth(0.9).validate().is_err());
        assert!(JitterConfig::default()
            .with_ceiling(f64::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn cholesky_solve_test() {
        let decomp = mat!([2., 0.], [6., 1.]);
        let target = mat!([1., 2.], [3., 4.]);
        let res = cholesky_solve(&decomp, &target).unwrap();
        let expected_res = mat!([0.25, 6.5], [0., -2.]);
        assert_matrix_eq!(res, expected_res, comp = abs, tol = 1e-12);

        let decomp = mat!([2., 0., 0.], [6., 1., 0.], [-8., 5., 3.]);
        let target = mat!([3., 6., 2.], [4., 3., 6.], [0., 1., 3.]);
        let res = cholesky_solve(&decomp, &target).unwrap();
        let expected_res = mat!(
            [3379. / 36., 4637. / 18., 427. / 18.],
            [-230. / 9., -635. / 9., -55. / 9.],
            [37. / 9., 100. / 9., 11. / 9.]
        );
        assert_matrix_eq!(res, expected_res, comp = abs, tol = 1e-9);

        assert!(cholesky_solve(&decomp, &Mat::zeros(2, 1)).is_err());
    }

    #[test]
    fn two_triangular_solves_match_cholesky_solve() {
        let l = mat!([2., 0., 0.], [6., 1., 0.], [-8., 5., 3.]);
        let b = mat!([1.], [-2.], [0.5]);

        let mut x = b.clone();
        solve_lower_in_place(&l, &mut x).unwrap();
        // forward substitution alone
        assert_matrix_eq!((&l * x.as_ref()), b, comp = abs, tol = 1e-12);
        solve_lower_transpose_in_place(&l, &mut x).unwrap();

        assert_matrix_eq!(x, cholesky_solve(&l, &b).unwrap(), comp = abs, tol = 1e-12);
    }
}
