//! Metropolis–Hastings on a correlated 2D Gaussian: the sample mean and covariance must match
//! the target, and must not match a different target.

use mcmc_engine::core::ChainRunner;
use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_engine::metropolis_hastings::MetropolisHastings;
use ndarray::{arr1, arr2, Array2, Axis};
use ndarray_stats::CorrelationExt;

const SAMPLE_SIZE: usize = 20_000;
const BURNIN: usize = 2_500;
const SEED: u64 = 42;

fn true_target() -> Gaussian2D {
    Gaussian2D {
        mean: arr1(&[0.0, 0.0]),
        cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
    }
}

/// Runs one chain from (10, 12) and returns its draws as a `[draw, parameter]` array.
fn sample(target: Gaussian2D) -> Array2<f64> {
    let mut mh = MetropolisHastings::new(target, IsotropicGaussian::new(1.0), &[10.0, 12.0], 1)
        .unwrap()
        .set_seed(SEED);
    mh.run(SAMPLE_SIZE, BURNIN)
        .unwrap()
        .index_axis_move(Axis(0), 0)
}

#[test]
fn test_two_d_gaussian_accept() {
    let _ = env_logger::builder().is_test(true).try_init();
    let target = true_target();
    let samples = sample(target.clone());
    assert_eq!(samples.shape(), &[SAMPLE_SIZE, 2]);

    let mean = samples.mean_axis(Axis(0)).unwrap();
    for d in 0..2 {
        assert!(
            (mean[d] - target.mean[d]).abs() < 0.5,
            "Mean deviation too large: {mean}"
        );
    }

    let cov = samples.t().cov(1.0).unwrap();
    for i in 0..2 {
        for j in 0..2 {
            let diff = (cov[(i, j)] - target.cov[(i, j)]).abs();
            assert!(diff < 0.5, "Covariance deviation at ({i}, {j}) too large: {diff}");
        }
    }
}

#[test]
fn test_two_d_gaussian_reject() {
    let false_target = Gaussian2D {
        mean: arr1(&[0.0, 0.0]),
        cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
    };
    let samples = sample(false_target);
    let cov = samples.t().cov(1.0).unwrap();
    let max_diff = (&cov - &true_target().cov)
        .iter()
        .fold(0.0f64, |m, d| m.max(d.abs()));
    assert!(
        max_diff > 1.0,
        "Covariance of false target samples is unexpectedly close to the true covariance: {max_diff}"
    );
}
