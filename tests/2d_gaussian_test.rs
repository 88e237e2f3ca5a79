//! Tests verifying that both samplers recover a correlated 2D Gaussian.
//!
//! 1. `test_two_d_gaussian_random_walk`: random-walk Metropolis with a covariance proposal.
//! 2. `test_two_d_gaussian_ensemble`: the stretch-move ensemble from a tight initial ball.
//! 3. `test_two_d_gaussian_wrong_target`: samples of a different target are told apart.

use approx::assert_abs_diff_eq;
use metropolis_mcmc::core::gaussian_ball;
use metropolis_mcmc::log_prob::LogProbOracle;
use metropolis_mcmc::metropolis::{EnsembleSampler, MetropolisSampler};
use ndarray::{arr1, arr2, Array1, Array2, Axis};
use ndarray_stats::CorrelationExt;

const SEED: u64 = 42;

/// Log-density of `N(mean, cov)` up to a constant, from its precision matrix.
fn gaussian_2d(mean: Array1<f64>, cov: &Array2<f64>) -> LogProbOracle {
    let det = cov[[0, 0]] * cov[[1, 1]] - cov[[0, 1]] * cov[[1, 0]];
    let prec = arr2(&[
        [cov[[1, 1]] / det, -cov[[0, 1]] / det],
        [-cov[[1, 0]] / det, cov[[0, 0]] / det],
    ]);
    LogProbOracle::with_args(
        |x: &[f64], (mean, prec): &(Array1<f64>, Array2<f64>)| {
            let d = arr1(x) - mean;
            -0.5 * d.dot(&prec.dot(&d))
        },
        (mean, prec),
    )
}

fn target_cov() -> Array2<f64> {
    arr2(&[[4.0, 2.0], [2.0, 3.0]])
}

#[test]
fn test_two_d_gaussian_random_walk() {
    const SAMPLE_SIZE: usize = 50_000;
    const BURNIN: usize = 2_500;

    let cov = target_cov();
    let proposal_cov = &cov * (2.38 * 2.38 / 2.0);
    let target = gaussian_2d(arr1(&[0.0, 0.0]), &cov);
    let mut sampler = MetropolisSampler::new(proposal_cov, 2, target)
        .unwrap()
        .set_seed(SEED);
    let chain = sampler.run(&[10.0, 12.0], SAMPLE_SIZE + BURNIN).unwrap();
    let samples = chain.discard_burn_in(BURNIN).positions();
    assert_eq!(samples.nrows(), SAMPLE_SIZE);

    // Validate mean & covariance
    let mean_mcmc = samples.mean_axis(Axis(0)).unwrap();
    let cov_mcmc = samples.t().cov(1.0).unwrap();
    assert_abs_diff_eq!(mean_mcmc, arr1(&[0.0, 0.0]), epsilon = 0.3);
    assert_abs_diff_eq!(cov_mcmc, cov, epsilon = 0.5);
}

#[test]
fn test_two_d_gaussian_ensemble() {
    const NWALKERS: usize = 20;
    const N_STEPS: usize = 5_000;
    const BURNIN: usize = 1_000;

    let cov = target_cov();
    let mean = arr1(&[1.0, -2.0]);
    let mut sampler = EnsembleSampler::new(NWALKERS, 2, gaussian_2d(mean.clone(), &cov))
        .unwrap()
        .set_seed(SEED);
    let init = gaussian_ball(&[0.0, 0.0], 1e-2, NWALKERS, SEED);
    sampler.run(init.view(), N_STEPS).unwrap();

    let flat = sampler.flat_chain(BURNIN, 2).unwrap();
    assert_eq!(flat.nrows(), NWALKERS * (N_STEPS - BURNIN) / 2);

    let mean_mcmc = flat.mean_axis(Axis(0)).unwrap();
    let cov_mcmc = flat.t().cov(1.0).unwrap();
    assert_abs_diff_eq!(mean_mcmc, mean, epsilon = 0.3);
    assert_abs_diff_eq!(cov_mcmc, cov, epsilon = 0.5);
}

/// Checks that samples from a standard normal target are clearly distinguishable from the
/// correlated target.
#[test]
fn test_two_d_gaussian_wrong_target() {
    const SAMPLE_SIZE: usize = 20_000;
    const BURNIN: usize = 1_000;

    let false_cov = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
    let mut sampler =
        MetropolisSampler::isotropic(1.0, 2, gaussian_2d(arr1(&[0.0, 0.0]), &false_cov))
            .unwrap()
            .set_seed(SEED);
    let chain = sampler.run(&[10.0, 12.0], SAMPLE_SIZE + BURNIN).unwrap();
    let cov_mcmc = chain.discard_burn_in(BURNIN).positions().t().cov(1.0).unwrap();

    let diff = &cov_mcmc - &target_cov();
    assert!(
        diff.iter().any(|d| d.abs() > 1.0),
        "covariance {cov_mcmc} should not match the correlated target"
    );
}
