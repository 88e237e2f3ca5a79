/*!
Independent chains run in parallel, and initial positions for populations of walkers.

[`ParallelChains`] clones a configured [`MetropolisSampler`] into `n_chains` copies. Each
copy gets its own random source seeded `seed + i`; the proposal's Cholesky factor and the
log-density are shared. The copies run on the `rayon` thread pool, optionally with one
`indicatif` progress bar per chain.

# Examples

```rust
use metropolis_mcmc::core::{gaussian_ball, ParallelChains};
use metropolis_mcmc::log_prob::LogProbOracle;
use metropolis_mcmc::metropolis::MetropolisSampler;

let oracle = LogProbOracle::new(|x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>());
let template = MetropolisSampler::isotropic(1.0, 2, oracle).unwrap();
let mut chains = ParallelChains::new(&template, 4).unwrap().set_seed(42);

let init = gaussian_ball(&[0.0, 0.0], 1.0, 4, 7);
let sample = chains.run(init.view(), 500).unwrap();
assert_eq!(sample.shape(), &[4, 500, 2]);
assert!(chains.max_rhat(100).unwrap() < 1.2);
```
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{stack, Array1, Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::{Result, SamplerError};
use crate::metropolis::MetropolisSampler;
use crate::random::RandomSource;
use crate::stats;

/// Steps between refreshes of a chain's progress message.
const PROGRESS_MESSAGE_INTERVAL: usize = 50;

/// `n_chains` independent random-walk chains sharing one proposal and target.
#[derive(Debug, Clone)]
pub struct ParallelChains {
    chains: Vec<MetropolisSampler>,
    seed: u64,
}

impl ParallelChains {
    /**
    Clones `template` into `n_chains` chains.

    Existing chain records of the template are dropped. The chains are seeded from the
    template's seed as if [`set_seed`](Self::set_seed) had been called with it.
    */
    pub fn new(template: &MetropolisSampler, n_chains: usize) -> Result<Self> {
        if n_chains == 0 {
            return Err(SamplerError::Configuration(
                "at least one chain is required".into(),
            ));
        }
        let mut fresh = template.clone();
        fresh.reset();
        let chains = vec![fresh; n_chains];
        Ok(Self {
            chains,
            seed: template.seed(),
        }
        .set_seed(template.seed()))
    }

    /**
    Sets a new global seed; chain `i` is seeded with `seed + i`.

    # Examples

    ```rust
    use metropolis_mcmc::core::ParallelChains;
    use metropolis_mcmc::log_prob::LogProbOracle;
    use metropolis_mcmc::metropolis::MetropolisSampler;

    let oracle = LogProbOracle::new(|x: &[f64]| -x[0] * x[0]);
    let template = MetropolisSampler::isotropic(1.0, 1, oracle).unwrap();
    let chains = ParallelChains::new(&template, 3).unwrap().set_seed(42);
    assert_eq!(chains.chains()[0].seed(), 42);
    assert_eq!(chains.chains()[2].seed(), 44);
    ```
    */
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            chain.set_random_source(RandomSource::new(seed.wrapping_add(i as u64)));
        }
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn chains(&self) -> &[MetropolisSampler] {
        &self.chains
    }

    /// Clears every chain's records.
    pub fn reset(&mut self) {
        self.chains.iter_mut().for_each(MetropolisSampler::reset);
    }

    fn check_initial(&self, initial_positions: ArrayView2<f64>) -> Result<Vec<Vec<f64>>> {
        if initial_positions.nrows() != self.chains.len() {
            return Err(SamplerError::Validation(format!(
                "expected one initial position per chain ({}), got {}",
                self.chains.len(),
                initial_positions.nrows()
            )));
        }
        Ok(initial_positions.rows().into_iter().map(|r| r.to_vec()).collect())
    }

    /**
    Runs every chain for `n_steps` from its row of `initial_positions` (`n_chains × ndim`).

    Returns the positions visited during this run with shape `(n_chains, n_steps, ndim)`.
    If any chain fails, the first error in chain order is returned; the other chains keep
    their records.
    */
    pub fn run(
        &mut self,
        initial_positions: ArrayView2<f64>,
        n_steps: usize,
    ) -> Result<Array3<f64>> {
        let initial = self.check_initial(initial_positions)?;
        log::debug!(
            "running {} chain(s) for {n_steps} step(s) in parallel",
            self.chains.len()
        );
        let results: Vec<Result<Array2<f64>>> = self
            .chains
            .par_iter_mut()
            .zip(initial.par_iter())
            .map(|(chain, x0)| -> Result<Array2<f64>> {
                let store = chain.run(x0, n_steps)?;
                let start = store.len() - n_steps;
                Ok(store.discard_burn_in(start).to_array())
            })
            .collect();
        stack_chains(results)
    }

    /// Same as [`run`](Self::run), drawing one progress bar per chain that shows the
    /// chain's running acceptance rate.
    pub fn run_progress(
        &mut self,
        initial_positions: ArrayView2<f64>,
        n_steps: usize,
    ) -> Result<Array3<f64>> {
        let initial = self.check_initial(initial_positions)?;
        let multi = MultiProgress::new();
        let style = progress_style();

        let results: Vec<Result<Array2<f64>>> = self
            .chains
            .par_iter_mut()
            .zip(initial.par_iter())
            .enumerate()
            .map(|(i, (chain, x0))| -> Result<Array2<f64>> {
                let pb = multi.add(ProgressBar::new(n_steps as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(style.clone());

                let start = chain.run(x0, 0)?.len();
                let mut n_accepted = 0;
                for (step, outcome) in chain.sample(n_steps)?.enumerate() {
                    n_accepted += outcome?.n_accepted;
                    pb.inc(1);
                    if step % PROGRESS_MESSAGE_INTERVAL == 0 {
                        let rate = n_accepted as f64 / (step + 1) as f64;
                        pb.set_message(format!("AcceptRate={rate:.3}"));
                    }
                }
                let rate = chain
                    .chain()
                    .discard_burn_in(start)
                    .acceptance_fraction()
                    .unwrap_or(0.0);
                pb.finish_with_message(format!("AcceptRate={rate:.3}"));
                Ok(chain.chain().discard_burn_in(start).to_array())
            })
            .collect();
        stack_chains(results)
    }

    /// All records of every chain after discarding `discard` steps, with shape
    /// `(n_chains, steps, ndim)`.
    pub fn sample(&self, discard: usize) -> Result<Array3<f64>> {
        let views: Vec<ArrayView2<f64>> = self
            .chains
            .iter()
            .map(|chain| chain.chain().discard_burn_in(discard).positions())
            .collect();
        Ok(stack(Axis(0), &views)?)
    }

    /// Per-parameter R-hat over all chains after discarding `discard` steps.
    pub fn rhat(&self, discard: usize) -> Result<Array1<f64>> {
        stats::rhat(self.sample(discard)?.view())
    }

    /// The largest per-parameter R-hat.
    pub fn max_rhat(&self, discard: usize) -> Result<f64> {
        stats::max_rhat(self.sample(discard)?.view())
    }
}

/// Stacks per-chain results into `(chains, steps, ndim)`, returning the first error.
fn stack_chains(results: Vec<Result<Array2<f64>>>) -> Result<Array3<f64>> {
    let samples = results.into_iter().collect::<Result<Vec<_>>>()?;
    let views: Vec<ArrayView2<f64>> = samples.iter().map(|s| s.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|e| {
            log::warn!("invalid progress bar template: {e}");
            ProgressStyle::default_bar()
        })
        .progress_chars("##-")
}

/**
Draws `n` positions from `N(center, sigma² I)`, one per row.

Typical use is to start an ensemble in a small ball around a point estimate.

# Examples

```rust
use metropolis_mcmc::core::gaussian_ball;

let init = gaussian_ball(&[1.0, -1.0, 0.0], 1e-3, 32, 42);
assert_eq!(init.dim(), (32, 3));
assert!(init.iter().all(|v| v.abs() < 1.1));
```
*/
pub fn gaussian_ball(center: &[f64], sigma: f64, n: usize, seed: u64) -> Array2<f64> {
    let mut rng = RandomSource::new(seed);
    let mut out = Array2::zeros((n, center.len()));
    for mut row in out.rows_mut() {
        let z = rng.standard_normal(center.len());
        row.iter_mut()
            .zip(center.iter().zip(z.iter()))
            .for_each(|(x, (c, z))| *x = c + sigma * z);
    }
    out
}
