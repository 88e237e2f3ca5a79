//! Samples the 2D Rosenbrock density with the affine-invariant ensemble sampler, a target on
//! which a random walk with fixed covariance mixes poorly.

use metropolis_mcmc::core::gaussian_ball;
use metropolis_mcmc::log_prob::LogProbOracle;
use metropolis_mcmc::metropolis::EnsembleSampler;
use metropolis_mcmc::stats;

use ndarray::Axis;
use std::error::Error;

/// `-((a - x)² + b (y - x²)²) / 20`
fn rosenbrock(x: &[f64], (a, b): &(f64, f64)) -> f64 {
    let (x, y) = (x[0], x[1]);
    -((a - x).powi(2) + b * (y - x * x).powi(2)) / 20.0
}

fn main() -> Result<(), Box<dyn Error>> {
    const NWALKERS: usize = 50;
    const N_STEPS: usize = 4_000;
    const BURNIN: usize = 1_000;
    const SEED: u64 = 42;

    let target = LogProbOracle::with_args(rosenbrock, (1.0, 100.0));
    let mut sampler = EnsembleSampler::new(NWALKERS, 2, target)?
        .set_stretch_scale(2.0)?
        .set_seed(SEED);

    let init = gaussian_ball(&[0.0, 0.0], 1e-2, NWALKERS, SEED);
    // Place the walkers, then step through the run one iteration at a time.
    sampler.run(init.view(), 0)?;
    let mut accepted = 0;
    for outcome in sampler.sample(N_STEPS)? {
        accepted += outcome?.n_accepted;
    }
    println!(
        "{} iterations, overall acceptance {:.3}",
        N_STEPS,
        accepted as f64 / (NWALKERS * N_STEPS) as f64
    );

    let flat = sampler.flat_chain(BURNIN, 10)?;
    let mean = flat.mean_axis(Axis(0)).ok_or("no samples")?;
    println!(
        "Kept {} samples, mean ({:.2}, {:.2})",
        flat.nrows(),
        mean[0],
        mean[1]
    );

    let tau = stats::integrated_times(
        sampler.chains()[0].discard_burn_in(BURNIN).positions(),
        stats::DEFAULT_WINDOW_CONSTANT,
    )?;
    println!("Autocorrelation time of walker 0: {:.1}", tau);

    Ok(())
}
