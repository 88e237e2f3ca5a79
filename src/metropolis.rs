/*!
# Metropolis Sampler

This module implements the accept/reject engine shared by every sampler in the crate. The
engine, [`MetropolisCore`], is generic over a [`Proposal`] and drives a population of one
or more walkers through a fixed number of iterations:

1. evaluate the walker's log-probability if it is not cached yet (first step only);
2. draw a candidate from the proposal;
3. evaluate the candidate's log-probability;
4. compute `Δ = log p(candidate) - log p(current) + log_correction`;
5. accept if `Δ ≥ 0` or `ln(u) < Δ` for `u ~ U[0, 1)`; a candidate at `-inf` is rejected
   outright;
6. record the resulting state (the old one on rejection) in the walker's [`ChainStore`].

Two instantiations are exported:

- [`MetropolisSampler`]: one walker with a [`GaussianRandomWalk`] proposal.
- [`EnsembleSampler`]: `nwalkers` walkers with the affine-invariant [`StretchMove`].

## Example Usage

```rust
use metropolis_mcmc::log_prob::LogProbOracle;
use metropolis_mcmc::metropolis::MetropolisSampler;
use ndarray::arr2;

// Standard bivariate normal target.
let oracle = LogProbOracle::new(|x: &[f64]| -0.5 * (x[0] * x[0] + x[1] * x[1]));
let cov = arr2(&[[1.0, 0.0], [0.0, 1.0]]);

let mut sampler = MetropolisSampler::new(cov, 2, oracle).unwrap().set_seed(42);
let chain = sampler.run(&[0.0, 0.0], 1_000).unwrap();

assert_eq!(chain.len(), 1_000);
let acceptance = chain.acceptance_fraction().unwrap();
assert!(acceptance > 0.0 && acceptance < 1.0);
```
*/

use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};

use crate::chain::ChainStore;
use crate::error::{Result, SamplerError};
use crate::log_prob::LogProbOracle;
use crate::proposal::{GaussianRandomWalk, Proposal, StretchMove};
use crate::random::RandomSource;

/// Random-walk Metropolis with a fixed Gaussian proposal covariance.
pub type MetropolisSampler = MetropolisCore<GaussianRandomWalk>;

/// Affine-invariant ensemble sampler using the stretch move.
pub type EnsembleSampler = MetropolisCore<StretchMove>;

/// Lifecycle of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerStatus {
    /// Constructed or reset; no position has been supplied.
    Ready,
    /// Currently executing steps.
    Running,
    /// The last run performed all of its requested steps, or was stopped by its caller.
    Completed,
    /// The last run failed. The chain up to the failing step is kept and the run can be
    /// resumed from the last valid state.
    Aborted,
}

/// The mutable state of one walker.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerState {
    pub position: Array1<f64>,
    /// `None` until the log-probability at `position` has been evaluated.
    pub log_prob: Option<f64>,
    pub n_accepted: usize,
    pub n_steps: usize,
}

impl SamplerState {
    /// A fresh state at `position` with no steps taken.
    pub fn new(position: Array1<f64>) -> Self {
        Self {
            position,
            log_prob: None,
            n_accepted: 0,
            n_steps: 0,
        }
    }
}

/// Result of one iteration over the whole population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Zero-based index of the iteration since the last reset.
    pub iteration: usize,
    /// Number of walkers whose proposal was accepted in this iteration.
    pub n_accepted: usize,
}

/**
The Metropolis accept/reject state machine, generic over the proposal `P`.

Each sampler owns its [`RandomSource`], its walkers' [`SamplerState`]s and one
[`ChainStore`] per walker. Runs append to the stores; [`reset`](Self::reset) clears them.
*/
#[derive(Debug, Clone)]
pub struct MetropolisCore<P> {
    ndim: usize,
    nwalkers: usize,
    proposal: P,
    log_prob: LogProbOracle,
    rng: RandomSource,
    states: Vec<SamplerState>,
    chains: Vec<ChainStore>,
    status: SamplerStatus,
}

impl<P: Proposal> MetropolisCore<P> {
    /// Builds a sampler for `nwalkers` walkers in `ndim` dimensions.
    ///
    /// The random source is seeded from entropy; use [`set_seed`](Self::set_seed) for
    /// reproducible chains.
    pub fn with_proposal(
        proposal: P,
        nwalkers: usize,
        ndim: usize,
        log_prob: LogProbOracle,
    ) -> Result<Self> {
        if ndim == 0 {
            return Err(SamplerError::Configuration(
                "the parameter space needs at least one dimension".into(),
            ));
        }
        if nwalkers < proposal.min_walkers() {
            return Err(SamplerError::Configuration(format!(
                "this proposal needs at least {} walkers, got {nwalkers}",
                proposal.min_walkers()
            )));
        }
        Ok(Self {
            ndim,
            nwalkers,
            proposal,
            log_prob,
            rng: RandomSource::from_entropy(),
            states: Vec::new(),
            chains: (0..nwalkers).map(|_| ChainStore::new(ndim)).collect(),
            status: SamplerStatus::Ready,
        })
    }

    /// Reseeds the sampler's random source.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = RandomSource::new(seed);
        self
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn nwalkers(&self) -> usize {
        self.nwalkers
    }

    pub fn status(&self) -> SamplerStatus {
        self.status
    }

    pub fn proposal(&self) -> &P {
        &self.proposal
    }

    /// The current random source. Cloning it snapshots the generator state.
    pub fn random_source(&self) -> &RandomSource {
        &self.rng
    }

    /// Replaces the random source, e.g. with a snapshot taken earlier.
    pub fn set_random_source(&mut self, rng: RandomSource) {
        self.rng = rng;
    }

    /// The current state of every walker; empty before the first run.
    pub fn states(&self) -> &[SamplerState] {
        &self.states
    }

    /// One chain per walker.
    pub fn chains(&self) -> &[ChainStore] {
        &self.chains
    }

    /// Clears every chain and walker state. The random source keeps its position.
    pub fn reset(&mut self) {
        self.states.clear();
        self.chains.iter_mut().for_each(ChainStore::clear);
        self.status = SamplerStatus::Ready;
    }

    /// Places the walkers at the rows of `initial` (one row per walker). Step counts are
    /// kept so that the chains stay aligned with the per-walker counters.
    fn start(&mut self, initial: ArrayView2<f64>) -> Result<()> {
        let (rows, cols) = initial.dim();
        if rows != self.nwalkers || cols != self.ndim {
            return Err(SamplerError::Validation(format!(
                "expected {} initial position(s) of dimension {}, got {rows}x{cols}",
                self.nwalkers, self.ndim
            )));
        }
        if initial.iter().any(|v| !v.is_finite()) {
            return Err(SamplerError::Validation(
                "initial positions must be finite".into(),
            ));
        }

        if self.states.is_empty() {
            self.states = initial
                .rows()
                .into_iter()
                .map(|row| SamplerState::new(row.to_owned()))
                .collect();
        } else {
            for (state, row) in self.states.iter_mut().zip(initial.rows()) {
                state.position = row.to_owned();
                state.log_prob = None;
            }
        }
        Ok(())
    }

    /// Runs `n_steps` iterations starting from the rows of `initial`.
    pub fn run_walkers(&mut self, initial: ArrayView2<f64>, n_steps: usize) -> Result<()> {
        self.start(initial)?;
        self.advance_by(n_steps)
    }

    /// Continues the chains for `n_steps` more iterations from where the last run stopped,
    /// reusing the cached log-probabilities.
    pub fn resume(&mut self, n_steps: usize) -> Result<()> {
        if self.states.is_empty() {
            return Err(SamplerError::Validation(
                "cannot resume a sampler that has never been run".into(),
            ));
        }
        self.advance_by(n_steps)
    }

    /// Returns an iterator performing one iteration per call to `next`, continuing from
    /// the current walker states.
    ///
    /// Dropping the iterator early stops the run after the last completed iteration.
    pub fn sample(&mut self, n_steps: usize) -> Result<Steps<'_, P>> {
        if self.states.is_empty() {
            return Err(SamplerError::Validation(
                "cannot sample before initial positions are set; call `run` first".into(),
            ));
        }
        self.status = SamplerStatus::Running;
        Ok(Steps {
            core: self,
            remaining: n_steps,
        })
    }

    fn advance_by(&mut self, n_steps: usize) -> Result<()> {
        log::debug!(
            "running {n_steps} iteration(s) over {} walker(s) in {} dimension(s)",
            self.nwalkers,
            self.ndim
        );
        self.status = SamplerStatus::Running;
        for _ in 0..n_steps {
            if let Err(e) = self.iterate() {
                self.status = SamplerStatus::Aborted;
                log::debug!("run aborted after {} iteration(s): {e}", self.iterations());
                return Err(e);
            }
        }
        self.status = SamplerStatus::Completed;
        log::debug!(
            "run completed: {} iteration(s) recorded, {} accepted move(s)",
            self.iterations(),
            self.states.iter().map(|s| s.n_accepted).sum::<usize>()
        );
        Ok(())
    }

    /// Number of iterations recorded for the first walker.
    fn iterations(&self) -> usize {
        self.chains.first().map_or(0, ChainStore::len)
    }

    /// One pass over all walkers, in order.
    ///
    /// An iteration is all or nothing: if any walker fails, the walkers already updated in
    /// this pass get their previous state back and their record for it is dropped, so every
    /// chain keeps the same length. The random source is not rewound.
    fn iterate(&mut self) -> Result<StepOutcome> {
        let iteration = self.iterations();
        let mut n_accepted = 0;
        // States of the walkers stepped so far, before their step. The last walker never
        // needs restoring.
        let mut undo: Vec<(SamplerState, usize)> = Vec::new();
        for walker in 0..self.nwalkers {
            let before = (walker + 1 < self.nwalkers)
                .then(|| (self.states[walker].clone(), self.chains[walker].len()));
            match self.step_walker(walker) {
                Ok(accepted) => {
                    if accepted {
                        n_accepted += 1;
                    }
                    undo.extend(before);
                }
                Err(e) => {
                    self.roll_back(undo);
                    return Err(e);
                }
            }
        }
        log::trace!("iteration {iteration}: {n_accepted} accepted");
        Ok(StepOutcome {
            iteration,
            n_accepted,
        })
    }

    fn roll_back(&mut self, undo: Vec<(SamplerState, usize)>) {
        if !undo.is_empty() {
            log::debug!("rolling back {} walker(s) of a failed iteration", undo.len());
        }
        for (walker, (state, len)) in undo.into_iter().enumerate() {
            self.states[walker] = state;
            self.chains[walker].truncate(len);
        }
    }

    /// Like [`start`](Self::start), with the log-probability of every starting position
    /// supplied by the caller so that none of them is evaluated.
    fn start_with_log_probs(
        &mut self,
        initial: ArrayView2<f64>,
        log_probs: &[f64],
    ) -> Result<()> {
        if log_probs.len() != self.nwalkers {
            return Err(SamplerError::Validation(format!(
                "expected {} initial log-probabilities, got {}",
                self.nwalkers,
                log_probs.len()
            )));
        }
        if log_probs.iter().any(|lp| lp.is_nan() || *lp == f64::INFINITY) {
            return Err(SamplerError::Validation(
                "initial log-probabilities must not be NaN or +inf".into(),
            ));
        }
        self.start(initial)?;
        for (state, &lp) in self.states.iter_mut().zip(log_probs) {
            state.log_prob = Some(lp);
        }
        Ok(())
    }

    fn step_walker(&mut self, walker: usize) -> Result<bool> {
        let current_lp = match self.states[walker].log_prob {
            Some(lp) => lp,
            None => {
                let lp = self.log_prob.evaluate(self.states[walker].position.view())?;
                self.states[walker].log_prob = Some(lp);
                lp
            }
        };

        let candidate = self
            .proposal
            .propose(walker, &self.states, &mut self.rng);
        let candidate_lp = self.log_prob.evaluate(candidate.position.view())?;

        let accepted = if candidate_lp == f64::NEG_INFINITY {
            false
        } else {
            let delta = candidate_lp - current_lp + candidate.log_correction;
            delta >= 0.0 || self.rng.uniform().ln() < delta
        };

        let state = &mut self.states[walker];
        let recorded_lp = if accepted {
            state.position = candidate.position;
            state.log_prob = Some(candidate_lp);
            state.n_accepted += 1;
            candidate_lp
        } else {
            current_lp
        };
        state.n_steps += 1;
        self.chains[walker].push(state.position.view(), recorded_lp, accepted)?;
        Ok(accepted)
    }
}

/// Iterator returned by [`MetropolisCore::sample`].
pub struct Steps<'a, P: Proposal> {
    core: &'a mut MetropolisCore<P>,
    remaining: usize,
}

impl<P: Proposal> Iterator for Steps<'_, P> {
    type Item = Result<StepOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.core.status == SamplerStatus::Aborted {
            return None;
        }
        self.remaining -= 1;
        match self.core.iterate() {
            Ok(outcome) => {
                if self.remaining == 0 {
                    self.core.status = SamplerStatus::Completed;
                }
                Some(Ok(outcome))
            }
            Err(e) => {
                self.core.status = SamplerStatus::Aborted;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl<P: Proposal> Drop for Steps<'_, P> {
    fn drop(&mut self) {
        if self.core.status == SamplerStatus::Running {
            self.core.status = SamplerStatus::Completed;
        }
    }
}

impl MetropolisCore<GaussianRandomWalk> {
    /**
    Builds a random-walk Metropolis sampler.

    # Arguments

    * `covariance` - `ndim × ndim` symmetric positive definite proposal covariance.
    * `ndim` - Dimension of the parameter space.
    * `log_prob` - The target's unnormalized log-density, with any auxiliary arguments
      already bound.

    Fails with [`SamplerError::Configuration`] if the covariance has the wrong shape or is
    not symmetric positive definite.
    */
    pub fn new(covariance: Array2<f64>, ndim: usize, log_prob: LogProbOracle) -> Result<Self> {
        let proposal = GaussianRandomWalk::new(covariance.view(), ndim)?;
        Self::with_proposal(proposal, 1, ndim, log_prob)
    }

    /// Builds a sampler whose proposal adds independent `N(0, variance)` noise to each
    /// coordinate. With `ndim == 1` this is the scalar-variance form.
    pub fn isotropic(variance: f64, ndim: usize, log_prob: LogProbOracle) -> Result<Self> {
        let proposal = GaussianRandomWalk::isotropic(variance, ndim)?;
        Self::with_proposal(proposal, 1, ndim, log_prob)
    }

    /**
    Runs the chain for `n_steps` iterations from `initial_position` and returns it.

    Records are appended to any chain left by earlier runs; call [`reset`](Self::reset) to
    start over, or [`resume`](Self::resume) to continue without a new position.
    With `n_steps == 0` the log-probability is not evaluated at all.

    # Examples

    ```rust
    use metropolis_mcmc::log_prob::LogProbOracle;
    use metropolis_mcmc::metropolis::MetropolisSampler;

    let oracle = LogProbOracle::new(|x: &[f64]| -x[0].abs());
    let mut sampler = MetropolisSampler::isotropic(0.5, 1, oracle).unwrap().set_seed(3);
    assert_eq!(sampler.run(&[0.0], 0).unwrap().len(), 0);
    assert_eq!(sampler.run(&[0.0], 250).unwrap().len(), 250);
    assert!(sampler.run(&[0.0, 1.0], 10).is_err());
    ```
    */
    pub fn run(&mut self, initial_position: &[f64], n_steps: usize) -> Result<&ChainStore> {
        if initial_position.len() != self.ndim {
            return Err(SamplerError::Validation(format!(
                "initial position has dimension {}, expected {}",
                initial_position.len(),
                self.ndim
            )));
        }
        let initial = ArrayView2::from_shape((1, self.ndim), initial_position)?;
        self.run_walkers(initial, n_steps)?;
        Ok(self.chain())
    }

    /**
    Same as [`run`](Self::run), with the log-probability at `initial_position` already
    known. The start position is then never evaluated.

    `initial_log_prob` must be the log-density at `initial_position`; it may be `-inf` but
    not NaN or `+inf`.
    */
    pub fn run_with_log_prob(
        &mut self,
        initial_position: &[f64],
        initial_log_prob: f64,
        n_steps: usize,
    ) -> Result<&ChainStore> {
        if initial_position.len() != self.ndim {
            return Err(SamplerError::Validation(format!(
                "initial position has dimension {}, expected {}",
                initial_position.len(),
                self.ndim
            )));
        }
        let initial = ArrayView2::from_shape((1, self.ndim), initial_position)?;
        self.start_with_log_probs(initial, &[initial_log_prob])?;
        self.advance_by(n_steps)?;
        Ok(self.chain())
    }

    /// The chain of the single walker.
    pub fn chain(&self) -> &ChainStore {
        &self.chains[0]
    }

    /// The walker's current state, `None` before the first run.
    pub fn state(&self) -> Option<&SamplerState> {
        self.states.first()
    }

    /// Fraction of accepted proposals over every recorded step.
    pub fn acceptance_fraction(&self) -> Result<f64> {
        self.chain().acceptance_fraction()
    }
}

impl MetropolisCore<StretchMove> {
    /// Builds an ensemble sampler with `nwalkers` walkers and stretch scale 2.
    ///
    /// At least two walkers are required. Fewer than `2 * ndim` walkers is allowed but
    /// mixes poorly, since the ensemble may not span the parameter space.
    pub fn new(nwalkers: usize, ndim: usize, log_prob: LogProbOracle) -> Result<Self> {
        if nwalkers < 2 * ndim {
            log::warn!(
                "{nwalkers} walkers for {ndim} dimensions; at least {} are recommended",
                2 * ndim
            );
        }
        Self::with_proposal(StretchMove::default(), nwalkers, ndim, log_prob)
    }

    /// Sets the stretch scale `a` of the move; must exceed 1.
    pub fn set_stretch_scale(mut self, a: f64) -> Result<Self> {
        self.proposal = StretchMove::new(a)?;
        Ok(self)
    }

    /// Runs every walker for `n_steps` iterations from the rows of `initial_positions`
    /// (`nwalkers × ndim`).
    pub fn run(
        &mut self,
        initial_positions: ArrayView2<f64>,
        n_steps: usize,
    ) -> Result<&[ChainStore]> {
        self.run_walkers(initial_positions, n_steps)?;
        Ok(self.chains())
    }

    /// Same as [`run`](Self::run), with `log_probs[k]` the known log-probability of row `k`
    /// of `initial_positions`. The starting positions are then never evaluated.
    pub fn run_with_log_probs(
        &mut self,
        initial_positions: ArrayView2<f64>,
        log_probs: &[f64],
        n_steps: usize,
    ) -> Result<&[ChainStore]> {
        self.start_with_log_probs(initial_positions, log_probs)?;
        self.advance_by(n_steps)?;
        Ok(self.chains())
    }

    /// Acceptance fraction of each walker.
    pub fn acceptance_fractions(&self) -> Result<Array1<f64>> {
        self.chains
            .iter()
            .map(ChainStore::acceptance_fraction)
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from)
    }

    /// All walkers' positions after discarding `discard` steps and keeping every `thin`-th,
    /// stacked walker after walker.
    pub fn flat_chain(&self, discard: usize, thin: usize) -> Result<Array2<f64>> {
        let views = self
            .chains
            .iter()
            .map(|chain| -> Result<ArrayView2<f64>> {
                Ok(chain.discard_burn_in(discard).thin(thin)?.positions())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(concatenate(Axis(0), &views)?)
    }
}
