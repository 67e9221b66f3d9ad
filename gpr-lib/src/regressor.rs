use std::{f64::consts::PI, time::Instant};

use faer::Mat;
use faer_core::MatRef;
use log::debug;
use rayon::prelude::*;

use crate::cholesky::{
    cholesky_solve, jitter_cholesky, solve_lower_in_place, solve_lower_transpose_in_place,
    JitterConfig,
};
use crate::covariance::{build_covariance_matrix, covariance_matrix, derivative_matrix};
use crate::data::FeatureMatrix;
use crate::errors::{RegressionError, Result};
use crate::kernel::{Kernel, KernelType};
use crate::params::ParameterSet;

/// Flat-buffer form of a regression call, as marshalled across a foreign boundary
///
/// Feature buffers are column-major with the given row and column counts.
#[derive(Clone, Copy, Debug)]
pub struct RegressionBuffers<'a> {
    pub train_features: &'a [f64],
    pub train_targets: &'a [f64],
    pub train_rows: usize,
    pub train_cols: usize,
    pub test_features: &'a [f64],
    pub test_targets: &'a [f64],
    pub test_rows: usize,
    pub test_cols: usize,
}

#[derive(Debug)]
/// Computes the GP posterior predictive distribution at a set of test points
///
/// Given training inputs $X$ with outputs $y$ and test inputs $X_{*}$, the kernel
/// gives the covariance blocks
///
/// $\bm{K} = k(X, X)$, $\bm{K_{*}} = k(X, X_{*})$, $\bm{K_{**}} = k(X_{*}, X_{*})$
///
/// $\bm{K}$ is factorized as $LL^{\intercal}$ (see [jitter_cholesky]) and two triangular
/// solves give $\alpha = \bm{K}^{-1}y$ without forming $\bm{K}^{-1}$. Then (eq 2.25, 2.26)
///
/// $\mu_{*} = \bm{K_{*}}^{\intercal}\alpha$
///
/// $\Sigma_{*} = \bm{K_{**}} - v^{\intercal}v$ where $Lv = \bm{K_{*}}$
///
/// The regressor owns its intermediate matrices and reuses them across calls, so
/// calls on one instance are serialized by `&mut self`. Results of the last
/// successful call stay readable until the next call.
///
/// # Examples
///
/// ```
/// use gpr_lib::{FeatureMatrix, GpRegressor, KernelType, SquaredExponential};
///
/// let train = FeatureMatrix::from_rows(vec![vec![0.], vec![1.], vec![2.], vec![3.]]).unwrap();
/// let test = FeatureMatrix::from_rows(vec![vec![0.5], vec![1.5]]).unwrap();
///
/// let mut gp = GpRegressor::new(KernelType::SquaredExponential);
/// let mse = gp
///     .run_regression(&train, &[0., 1., 2., 3.], &test, &[0.5, 1.5], &SquaredExponential::params(1., 1.))
///     .unwrap();
///
/// assert!(mse >= 0.);
/// assert_eq!(gp.means().unwrap().len(), 2);
/// assert_eq!(gp.std_devs().unwrap().len(), 2);
/// ```
pub struct GpRegressor {
    kernel: Box<dyn Kernel>,
    jitter_config: JitterConfig,
    // workspace
    k: Mat<f64>,
    k_s: Mat<f64>,
    k_ss: Mat<f64>,
    cholesky_l: Mat<f64>,
    alpha: Mat<f64>,
    v: Mat<f64>,
    // results of the last successful call
    means: Vec<f64>,
    covariances: Mat<f64>,
    std_devs: Vec<f64>,
    mse: f64,
    jitter: f64,
    log_likelihood: f64,
    fitted: bool,
}

impl GpRegressor {
    /// Creates a regressor using the kernel named by `kernel_type`
    #[must_use]
    pub fn new(kernel_type: KernelType) -> Self {
        Self::with_kernel(kernel_type.build())
    }

    /// Creates a regressor from a textual kernel tag such as `"squared_exponential"`
    ///
    /// # Errors
    ///
    /// [`RegressionError::InvalidConfiguration`] if the tag names no known kernel
    pub fn from_tag(tag: &str) -> Result<Self> {
        Ok(Self::new(tag.parse()?))
    }

    /// Creates a regressor around any [Kernel] implementation
    #[must_use]
    pub fn with_kernel(kernel: Box<dyn Kernel>) -> Self {
        GpRegressor {
            kernel,
            jitter_config: JitterConfig::default(),
            k: Mat::zeros(0, 0),
            k_s: Mat::zeros(0, 0),
            k_ss: Mat::zeros(0, 0),
            cholesky_l: Mat::zeros(0, 0),
            alpha: Mat::zeros(0, 0),
            v: Mat::zeros(0, 0),
            means: Vec::new(),
            covariances: Mat::zeros(0, 0),
            std_devs: Vec::new(),
            mse: 0.,
            jitter: 0.,
            log_likelihood: 0.,
            fitted: false,
        }
    }

    /// Replace the jitter schedule used to factorize the training covariance
    ///
    /// # Errors
    ///
    /// [`RegressionError::InvalidConfiguration`] if the schedule is invalid
    pub fn with_jitter_config(mut self, config: JitterConfig) -> Result<Self> {
        config.validate()?;
        self.jitter_config = config;
        Ok(self)
    }

    #[must_use]
    pub fn kernel(&self) -> &dyn Kernel {
        self.kernel.as_ref()
    }

    #[must_use]
    pub fn jitter_config(&self) -> &JitterConfig {
        &self.jitter_config
    }

    /// Check one sample set: non empty, one target per row, finite values throughout
    fn check_set(set: &str, features: &FeatureMatrix, targets: &[f64]) -> Result<()> {
        if features.nrows() == 0 {
            return Err(RegressionError::ShapeMismatch(format!(
                "{set} set must be non empty"
            )));
        }
        if features.nrows() != targets.len() {
            return Err(RegressionError::ShapeMismatch(format!(
                "{set} set has {} rows but {} targets",
                features.nrows(),
                targets.len()
            )));
        }
        if let Some((i, j)) = features.find_non_finite() {
            return Err(RegressionError::NonFiniteInput(format!(
                "{set} feature ({i}, {j}) is {}",
                features.row(i)[j]
            )));
        }
        if let Some(i) = targets.iter().position(|y| !y.is_finite()) {
            return Err(RegressionError::NonFiniteInput(format!(
                "{set} target {i} is {}",
                targets[i]
            )));
        }
        Ok(())
    }

    fn validate(
        &self,
        train: &FeatureMatrix,
        train_targets: &[f64],
        test: &FeatureMatrix,
        test_targets: &[f64],
        params: &ParameterSet,
    ) -> Result<()> {
        if train.ncols() != test.ncols() {
            return Err(RegressionError::ShapeMismatch(format!(
                "train and test sets must have the same number of columns ({} != {})",
                train.ncols(),
                test.ncols()
            )));
        }
        Self::check_set("train", train, train_targets)?;
        Self::check_set("test", test, test_targets)?;
        self.kernel.verify(params)
    }

    /// Runs the regression and returns the mean squared error of the predictive means
    /// against `test_targets`
    ///
    /// Posterior means, covariances and standard deviations are then available from
    /// [GpRegressor::means], [GpRegressor::covariances] and [GpRegressor::std_devs].
    ///
    /// # Errors
    ///
    /// [`RegressionError::ShapeMismatch`] if train and test column counts differ, a target
    /// vector does not match its feature matrix, or either set is empty;
    /// [`RegressionError::NonFiniteInput`] if a feature or target is NaN or infinite;
    /// parameter errors from [Kernel::verify];
    /// [`RegressionError::FactorizationFailed`] if the training covariance cannot be made
    /// positive definite.
    ///
    /// On error no results are readable until the next successful call.
    pub fn run_regression(
        &mut self,
        train: &FeatureMatrix,
        train_targets: &[f64],
        test: &FeatureMatrix,
        test_targets: &[f64],
        params: &ParameterSet,
    ) -> Result<f64> {
        self.fitted = false;
        self.validate(train, train_targets, test, test_targets, params)?;

        let now = Instant::now();
        let n = train.nrows();
        let m = test.nrows();
        debug!(
            "GP regression with {} kernel: {n} train, {m} test, {} features",
            self.kernel.name(),
            train.ncols()
        );

        let kernel = self.kernel.as_ref();
        let (k, k_s, k_ss) = (&mut self.k, &mut self.k_s, &mut self.k_ss);
        rayon::join(
            || build_covariance_matrix(train, train, params, kernel, k),
            || {
                rayon::join(
                    || build_covariance_matrix(train, test, params, kernel, k_s),
                    || build_covariance_matrix(test, test, params, kernel, k_ss),
                )
            },
        );
        debug!("covariance matrices built in {:?}", now.elapsed());

        let factor = jitter_cholesky(&self.k, &self.jitter_config)?;
        self.cholesky_l = factor.l;

        // alpha = K^-1 y by forward then back substitution
        self.alpha.resize_with(n, 1, |_, _| 0.);
        for (i, y) in train_targets.iter().enumerate() {
            self.alpha[(i, 0)] = *y;
        }
        solve_lower_in_place(&self.cholesky_l, &mut self.alpha)?;
        solve_lower_transpose_in_place(&self.cholesky_l, &mut self.alpha)?;

        let f_s = self.k_s.transpose() * &self.alpha;
        self.means.clear();
        self.means.extend((0..m).map(|i| f_s[(i, 0)]));

        // Schur complement K_ss - v^T v with L v = K_s
        self.v.clone_from(&self.k_s);
        solve_lower_in_place(&self.cholesky_l, &mut self.v)?;
        let vtv = self.v.transpose() * &self.v;
        self.covariances.resize_with(m, m, |_, _| 0.);
        for j in 0..m {
            for i in 0..m {
                self.covariances[(i, j)] = self.k_ss[(i, j)] - vtv[(i, j)];
            }
        }

        // round-off can push a variance slightly below zero
        self.std_devs.clear();
        self.std_devs.extend((0..m).map(|i| self.covariances[(i, i)]));
        self.std_devs
            .par_iter_mut()
            .for_each(|var| *var = var.max(0.).sqrt());

        self.mse = mean_squared_error(test_targets, &self.means);
        self.log_likelihood = self.compute_log_likelihood(train_targets);
        self.jitter = factor.jitter;
        self.fitted = true;

        debug!(
            "GP regression done in {:?} (jitter {:e}, mse {})",
            now.elapsed(),
            self.jitter,
            self.mse
        );
        Ok(self.mse)
    }

    /// [GpRegressor::run_regression] over flat column-major buffers
    ///
    /// # Errors
    ///
    /// [`RegressionError::ShapeMismatch`] if column counts differ or a buffer does not
    /// hold `rows * cols` values, plus every error of [GpRegressor::run_regression]
    pub fn run_regression_buffers(
        &mut self,
        buffers: &RegressionBuffers,
        params: &ParameterSet,
    ) -> Result<f64> {
        self.fitted = false;
        if buffers.train_cols != buffers.test_cols {
            return Err(RegressionError::ShapeMismatch(format!(
                "train and test sets must have the same number of columns ({} != {})",
                buffers.train_cols, buffers.test_cols
            )));
        }
        let train = FeatureMatrix::from_column_major(
            buffers.train_features,
            buffers.train_rows,
            buffers.train_cols,
        )?;
        let test = FeatureMatrix::from_column_major(
            buffers.test_features,
            buffers.test_rows,
            buffers.test_cols,
        )?;
        self.run_regression(
            &train,
            buffers.train_targets,
            &test,
            buffers.test_targets,
            params,
        )
    }

    /// The log marginal likelihood (eq 2.30)
    ///
    /// $\ln p(y | X, \theta) = -\frac{1}{2}y^{\intercal}\alpha - \sum_{i}\ln L_{ii} - \frac{n}{2}\ln 2\pi$
    #[allow(clippy::cast_precision_loss)]
    fn compute_log_likelihood(&self, train_targets: &[f64]) -> f64 {
        let n = train_targets.len();
        let data_fit: f64 = train_targets
            .iter()
            .enumerate()
            .map(|(i, y)| y * self.alpha[(i, 0)])
            .sum();
        // the determinant of K is the square of the determinant of L
        let half_log_det: f64 = (0..n).map(|i| self.cholesky_l[(i, i)].ln()).sum();
        -0.5 * data_fit - half_log_det - 0.5 * (n as f64) * (2. * PI).ln()
    }

    /// Gradient of the log marginal likelihood with respect to the kernel
    /// hyperparameters, in [Kernel::parameter_names] order
    ///
    /// $\frac{\partial}{\partial \theta_{i}}\ln p(y | X, \theta) = \frac{1}{2}\left(\alpha^{\intercal}\frac{\partial \bm{K}}{\partial \theta_{i}}\alpha - \text{Tr}\left(\bm{K}^{-1}\frac{\partial \bm{K}}{\partial \theta_{i}}\right)\right)$
    ///
    /// $\bm{K}$ and $\alpha$ are rebuilt from `train`, `train_targets` and `params`, with
    /// this regressor's kernel and jitter schedule. The regression workspace and
    /// results are left untouched.
    ///
    /// # Errors
    ///
    /// The validation errors of [GpRegressor::run_regression] for the training set and
    /// `params`, and [`RegressionError::FactorizationFailed`]
    pub fn log_marginal_likelihood_gradient(
        &self,
        train: &FeatureMatrix,
        train_targets: &[f64],
        params: &ParameterSet,
    ) -> Result<Vec<f64>> {
        Self::check_set("train", train, train_targets)?;
        self.kernel.verify(params)?;

        let n = train.nrows();
        let kernel = self.kernel.as_ref();
        let k = covariance_matrix(train, train, params, kernel);
        let factor = jitter_cholesky(&k, &self.jitter_config)?;
        let l = &factor.l;
        let mut alpha = Mat::from_fn(n, 1, |i, _| train_targets[i]);
        solve_lower_in_place(l, &mut alpha)?;
        solve_lower_transpose_in_place(l, &mut alpha)?;

        kernel
            .parameter_names()
            .iter()
            .map(|var| -> Result<f64> {
                let dk = derivative_matrix(train, train, params, kernel, var)?;
                let kinv_dk = cholesky_solve(l, &dk)?;
                let trace: f64 = (0..n).map(|i| kinv_dk[(i, i)]).sum();
                let quad: f64 = (0..n)
                    .flat_map(|i| (0..n).map(move |j| (i, j)))
                    .map(|(i, j)| alpha[(i, 0)] * dk[(i, j)] * alpha[(j, 0)])
                    .sum();
                Ok(0.5 * (quad - trace))
            })
            .collect()
    }

    /// Predictive means of the last successful regression
    #[must_use]
    pub fn means(&self) -> Option<&[f64]> {
        self.fitted.then_some(self.means.as_slice())
    }

    /// Predictive covariance of the last successful regression (test x test)
    #[must_use]
    pub fn covariances(&self) -> Option<MatRef<'_, f64>> {
        self.fitted.then(|| self.covariances.as_ref())
    }

    /// Predictive covariance flattened column-major, `test_rows^2` values
    #[must_use]
    pub fn covariance_buffer(&self) -> Option<Vec<f64>> {
        let m = self.covariances.nrows();
        self.fitted.then(|| {
            (0..m)
                .flat_map(|j| (0..m).map(move |i| (i, j)))
                .map(|(i, j)| self.covariances[(i, j)])
                .collect()
        })
    }

    /// Predictive standard deviations of the last successful regression
    #[must_use]
    pub fn std_devs(&self) -> Option<&[f64]> {
        self.fitted.then_some(self.std_devs.as_slice())
    }

    #[must_use]
    pub fn mse(&self) -> Option<f64> {
        self.fitted.then_some(self.mse)
    }

    /// Diagonal jitter added to the training covariance by the last successful call
    #[must_use]
    pub fn jitter(&self) -> Option<f64> {
        self.fitted.then_some(self.jitter)
    }

    #[must_use]
    pub fn log_marginal_likelihood(&self) -> Option<f64> {
        self.fitted.then_some(self.log_likelihood)
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean_squared_error(targets: &[f64], predictions: &[f64]) -> f64 {
    let sum: f64 = targets
        .iter()
        .zip(predictions)
        .map(|(y, f)| (y - f).powi(2))
        .sum();
    sum / targets.len() as f64
}
