use std::error::Error;
use std::time::Instant;

use env_logger::{Builder, Env};
use gpr_lib::{FeatureMatrix, GpRegressor, KernelType, SquaredExponential};
use itertools::Itertools;
use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{ContinuousCDF, Normal};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Environment variable holding the log filter
const GPR_LOG: &str = "GPR_LOG";

// test function from sfu test functions
// lim et al nonpolynomial function
fn lim_nonpoly(x: &[f64]) -> f64 {
    ((30. + 5. * x[0] * (5. * x[0]).sin()) * (4. + (-5. * x[1]).exp()) - 100.) / 6.
}

fn main() -> Result<(), Box<dyn Error>> {
    let env = Env::new().filter_or(GPR_LOG, "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();

    // training grid on the unit square
    let n: usize = 20;
    let range: Vec<f64> = (0..(n + 1)).map(|i| i as f64 / (n as f64)).collect();
    let train = FeatureMatrix::from_rows(
        range
            .clone()
            .into_iter()
            .cartesian_product(range)
            .map(|(i, j)| vec![i, j])
            .collect(),
    )?;
    let train_targets: Vec<f64> = train.rows().map(lim_nonpoly).collect();

    // random test points
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let n_test = 200;
    let test = FeatureMatrix::from_fn(n_test, 2, |_, _| rng.gen_range(0.0..1.0));
    let test_targets: Vec<f64> = test.rows().map(lim_nonpoly).collect();

    info!("{} training points, {} test points", train.nrows(), test.nrows());

    let params = SquaredExponential::params(0.1, 25.);
    let mut gp = GpRegressor::new(KernelType::SquaredExponential);

    let now = Instant::now();
    let mse = gp.run_regression(&train, &train_targets, &test, &test_targets, &params)?;
    info!("Elapsed, regression: {:.2?}", now.elapsed());
    info!("MSE: {mse:e}");

    let (means, std_devs) = match (gp.means(), gp.std_devs()) {
        (Some(means), Some(std_devs)) => (means, std_devs),
        _ => return Err("regression produced no posterior".into()),
    };

    // share of test targets inside the 95% credible interval
    let z = Normal::new(0., 1.)?.inverse_cdf(0.975);
    let covered = test_targets
        .iter()
        .zip(means.iter().zip(std_devs))
        .filter(|(y, (mu, sd))| (*y - *mu).abs() <= z * *sd)
        .count();
    info!(
        "{covered}/{} test targets within the 95% interval",
        test.nrows()
    );

    for ((x, y), (mu, sd)) in test.rows().zip(&test_targets).zip(means.iter().zip(std_devs)).take(5) {
        info!("f({:.3}, {:.3}) = {y:.4}, predicted {mu:.4} +/- {sd:.2e}", x[0], x[1]);
    }

    if let Some(jitter) = gp.jitter() {
        info!("jitter added to the training covariance: {jitter:e}");
    }
    if let Some(lml) = gp.log_marginal_likelihood() {
        info!("log marginal likelihood: {lml:.4}");
    }

    let now = Instant::now();
    let grad = gp.log_marginal_likelihood_gradient(&train, &train_targets, &params)?;
    info!("Elapsed, likelihood gradient: {:.2?}", now.elapsed());
    for (name, g) in gp.kernel().parameter_names().iter().zip(grad) {
        info!("d lml / d {name} = {g:.4}");
    }

    Ok(())
}
