//! A small MCMC demo: several random-walk Metropolis chains sample a correlated 2D Gaussian
//! in parallel, then report summary statistics and convergence diagnostics.

use metropolis_mcmc::core::{gaussian_ball, ParallelChains};
use metropolis_mcmc::log_prob::LogProbOracle;
use metropolis_mcmc::metropolis::MetropolisSampler;
use metropolis_mcmc::stats;

use ndarray::{arr1, arr2, Array1, Array2, Axis};
use ndarray_stats::CorrelationExt;
use rand::{thread_rng, Rng};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    const SAMPLE_SIZE: usize = 100_000;
    const BURNIN: usize = 5_000;
    const N_CHAINS: usize = 8;
    let seed: u64 = thread_rng().gen();

    let mean = arr1(&[0.0, 0.0]);
    let prec = arr2(&[[2.0 / 3.0, -1.0 / 3.0], [-1.0 / 3.0, 2.0 / 3.0]]);
    let target = LogProbOracle::with_args(
        |x: &[f64], (mean, prec): &(Array1<f64>, Array2<f64>)| {
            let d = arr1(x) - mean;
            -0.5 * d.dot(&prec.dot(&d))
        },
        (mean, prec),
    );

    let proposal_cov = arr2(&[[2.0, 1.0], [1.0, 2.0]]) * (2.38 * 2.38 / 2.0);
    let template = MetropolisSampler::new(proposal_cov, 2, target)?;
    let mut chains = ParallelChains::new(&template, N_CHAINS)?.set_seed(seed);

    // Generate samples
    let init = gaussian_ball(&[0.0, 0.0], 3.0, N_CHAINS, seed);
    chains.run_progress(init.view(), (SAMPLE_SIZE + BURNIN * N_CHAINS) / N_CHAINS)?;
    let sample = chains.sample(BURNIN)?;
    let (n_chains, n_steps, ndim) = sample.dim();
    let pooled = sample.to_shape((n_chains * n_steps, ndim))?;
    println!("Generated {} samples", pooled.nrows());

    // Basic statistics
    let row_mean = pooled.mean_axis(Axis(0)).ok_or("no samples")?;
    println!(
        "Mean after burn-in: ({:.2}, {:.2})",
        row_mean[0], row_mean[1]
    );
    println!("Covariance after burn-in:\n{:.2}", pooled.t().cov(1.0)?);

    // Diagnostics
    println!("R-hat: {:.4}", chains.rhat(BURNIN)?);
    let first = chains.chains()[0].chain().discard_burn_in(BURNIN);
    println!(
        "Chain 0: acceptance {:.3}, ESS {:.0}",
        first.acceptance_fraction()?,
        stats::effective_sample_size(first.positions())?
    );

    Ok(())
}
