/*!
Storage for the states visited by one walker.

A [`ChainStore`] only ever grows: every iteration appends one record (position,
log-probability, accepted flag), and stored rows are never modified afterwards. Burn-in
removal and thinning go through [`ChainView`], a borrowed window onto the store. The raw
chain therefore stays available for re-analysis with different choices.

# Examples

```rust
use metropolis_mcmc::log_prob::LogProbOracle;
use metropolis_mcmc::metropolis::MetropolisSampler;

let oracle = LogProbOracle::new(|x: &[f64]| -0.5 * x[0] * x[0]);
let mut sampler = MetropolisSampler::isotropic(1.0, 1, oracle).unwrap().set_seed(1);
let chain = sampler.run(&[0.0], 1_000).unwrap();

let kept = chain.discard_burn_in(200).thin(4).unwrap();
assert_eq!(kept.len(), 200);
assert_eq!(chain.len(), 1_000);
```
*/

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, SamplerError};

/// One step of a chain, borrowed from its [`ChainStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainRecord<'a> {
    pub position: ArrayView1<'a, f64>,
    pub log_prob: f64,
    pub accepted: bool,
}

/// The ordered records of one walker, over all runs since the last reset.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStore {
    positions: Array2<f64>,
    log_probs: Vec<f64>,
    accepted: Vec<bool>,
    n_accepted: usize,
}

impl ChainStore {
    /// An empty chain over an `ndim`-dimensional parameter space.
    pub fn new(ndim: usize) -> Self {
        Self {
            positions: Array2::zeros((0, ndim)),
            log_probs: Vec::new(),
            accepted: Vec::new(),
            n_accepted: 0,
        }
    }

    pub(crate) fn push(
        &mut self,
        position: ArrayView1<f64>,
        log_prob: f64,
        accepted: bool,
    ) -> Result<()> {
        self.positions.push_row(position)?;
        self.log_probs.push(log_prob);
        self.accepted.push(accepted);
        if accepted {
            self.n_accepted += 1;
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::new(self.ndim());
    }

    /// Drops every record from step `len` on. No-op if the chain is not longer than `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        if len >= self.len() {
            return;
        }
        self.positions = self.positions.slice(s![..len, ..]).to_owned();
        self.log_probs.truncate(len);
        self.accepted.truncate(len);
        self.n_accepted = self.accepted.iter().filter(|&&a| a).count();
    }

    pub fn ndim(&self) -> usize {
        self.positions.ncols()
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.log_probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_probs.is_empty()
    }

    pub fn n_accepted(&self) -> usize {
        self.n_accepted
    }

    /// All positions, one row per step.
    pub fn positions(&self) -> ArrayView2<f64> {
        self.positions.view()
    }

    pub fn log_probs(&self) -> ArrayView1<f64> {
        ArrayView1::from(&self.log_probs[..])
    }

    pub fn accepted(&self) -> ArrayView1<bool> {
        ArrayView1::from(&self.accepted[..])
    }

    pub fn record(&self, step: usize) -> Option<ChainRecord<'_>> {
        (step < self.len()).then(|| ChainRecord {
            position: self.positions.row(step),
            log_prob: self.log_probs[step],
            accepted: self.accepted[step],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = ChainRecord<'_>> + '_ {
        self.positions
            .axis_iter(Axis(0))
            .zip(self.log_probs.iter().zip(&self.accepted))
            .map(|(position, (&log_prob, &accepted))| ChainRecord {
                position,
                log_prob,
                accepted,
            })
    }

    /// Fraction of steps whose proposal was accepted.
    ///
    /// Fails with [`SamplerError::DivisionUndefined`] when no step has been recorded.
    pub fn acceptance_fraction(&self) -> Result<f64> {
        if self.is_empty() {
            return Err(SamplerError::DivisionUndefined);
        }
        Ok(self.n_accepted as f64 / self.len() as f64)
    }

    /// A view of the whole chain.
    pub fn view(&self) -> ChainView<'_> {
        ChainView {
            positions: self.positions(),
            log_probs: self.log_probs(),
            accepted: self.accepted(),
        }
    }

    /// The chain without its first `k` steps.
    pub fn discard_burn_in(&self, k: usize) -> ChainView<'_> {
        self.view().discard_burn_in(k)
    }

    /// Every `stride`-th step, starting with the first.
    pub fn thin(&self, stride: usize) -> Result<ChainView<'_>> {
        self.view().thin(stride)
    }
}

/// A read-only window onto a [`ChainStore`], produced by burn-in removal and thinning.
#[derive(Debug, Clone, Copy)]
pub struct ChainView<'a> {
    positions: ArrayView2<'a, f64>,
    log_probs: ArrayView1<'a, f64>,
    accepted: ArrayView1<'a, bool>,
}

impl<'a> ChainView<'a> {
    pub fn len(&self) -> usize {
        self.log_probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_probs.is_empty()
    }

    pub fn positions(&self) -> ArrayView2<'a, f64> {
        self.positions
    }

    pub fn log_probs(&self) -> ArrayView1<'a, f64> {
        self.log_probs
    }

    pub fn accepted(&self) -> ArrayView1<'a, bool> {
        self.accepted
    }

    /// Drops the first `k` steps of the view. Dropping more steps than exist leaves an
    /// empty view.
    pub fn discard_burn_in(self, k: usize) -> ChainView<'a> {
        let k = k.min(self.len());
        ChainView {
            positions: self.positions.slice_move(s![k.., ..]),
            log_probs: self.log_probs.slice_move(s![k..]),
            accepted: self.accepted.slice_move(s![k..]),
        }
    }

    /// Keeps every `stride`-th step of the view.
    pub fn thin(self, stride: usize) -> Result<ChainView<'a>> {
        if stride == 0 {
            return Err(SamplerError::Validation(
                "thinning stride must be at least 1".into(),
            ));
        }
        let step = stride as isize;
        Ok(ChainView {
            positions: self.positions.slice_move(s![..;step, ..]),
            log_probs: self.log_probs.slice_move(s![..;step]),
            accepted: self.accepted.slice_move(s![..;step]),
        })
    }

    /// Fraction of the retained steps that were accepted moves.
    pub fn acceptance_fraction(&self) -> Result<f64> {
        if self.is_empty() {
            return Err(SamplerError::DivisionUndefined);
        }
        let n_accepted = self.accepted.iter().filter(|&&a| a).count();
        Ok(n_accepted as f64 / self.len() as f64)
    }

    /// Per-axis sample mean, `None` for an empty view.
    pub fn mean(&self) -> Option<Array1<f64>> {
        self.positions.mean_axis(Axis(0))
    }

    /// Per-axis sample variance with `ddof` delta degrees of freedom, `None` when the view
    /// holds no more than `ddof` steps.
    pub fn variance(&self, ddof: f64) -> Option<Array1<f64>> {
        if (self.len() as f64) <= ddof {
            return None;
        }
        Some(self.positions.var_axis(Axis(0), ddof))
    }

    /// Copies the retained positions into an owned array.
    pub fn to_array(&self) -> Array2<f64> {
        self.positions.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn sample_store() -> ChainStore {
        let mut store = ChainStore::new(2);
        for i in 0..10 {
            let x = i as f64;
            store
                .push(arr1(&[x, -x]).view(), -x, i % 3 == 0)
                .unwrap();
        }
        store
    }

    #[test]
    fn push_keeps_order() {
        let store = sample_store();
        assert_eq!(store.len(), 10);
        assert_eq!(store.ndim(), 2);
        assert_eq!(store.positions().row(4), arr1(&[4.0, -4.0]));
        assert_eq!(store.log_probs()[7], -7.0);
        let record = store.record(3).unwrap();
        assert!(record.accepted);
        assert_eq!(record.position, arr1(&[3.0, -3.0]));
        assert!(store.record(10).is_none());
        assert_eq!(store.iter().count(), 10);
        assert!(store
            .iter()
            .enumerate()
            .all(|(i, r)| r.log_prob == -(i as f64)));
    }

    #[test]
    fn rejects_wrong_dimension() {
        let mut store = ChainStore::new(2);
        assert!(store.push(arr1(&[1.0]).view(), 0.0, true).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn acceptance_fraction_counts_flags() {
        let store = sample_store();
        // Accepted at steps 0, 3, 6 and 9.
        assert_eq!(store.n_accepted(), 4);
        assert_abs_diff_eq!(store.acceptance_fraction().unwrap(), 0.4);
    }

    #[test]
    fn empty_chain_has_no_acceptance_fraction() {
        let store = ChainStore::new(3);
        assert!(matches!(
            store.acceptance_fraction(),
            Err(SamplerError::DivisionUndefined)
        ));
        assert!(matches!(
            store.view().acceptance_fraction(),
            Err(SamplerError::DivisionUndefined)
        ));
    }

    #[test]
    fn views_do_not_mutate_the_store() {
        let store = sample_store();
        let before = store.clone();

        let burned = store.discard_burn_in(4);
        assert_eq!(burned.len(), 6);
        assert_eq!(burned.positions().row(0), arr1(&[4.0, -4.0]));

        let thinned = store.thin(3).unwrap();
        assert_eq!(thinned.log_probs(), arr1(&[0.0, -3.0, -6.0, -9.0]));
        assert_abs_diff_eq!(thinned.acceptance_fraction().unwrap(), 1.0);

        let both = store.discard_burn_in(1).thin(4).unwrap();
        assert_eq!(both.to_array(), arr2(&[[1.0, -1.0], [5.0, -5.0], [9.0, -9.0]]));

        assert_eq!(store, before);
    }

    #[test]
    fn oversized_burn_in_is_empty() {
        let store = sample_store();
        let view = store.discard_burn_in(25);
        assert!(view.is_empty());
        assert!(view.mean().is_none());
        assert!(view.variance(1.0).is_none());
    }

    #[test]
    fn zero_stride_is_invalid() {
        let store = sample_store();
        assert!(matches!(store.thin(0), Err(SamplerError::Validation(_))));
    }

    #[test]
    fn view_moments() {
        let store = sample_store();
        let view = store.view();
        assert_abs_diff_eq!(view.mean().unwrap(), arr1(&[4.5, -4.5]), epsilon = 1e-12);
        // Variance of 0..10 with ddof = 1 is 55 / 6.
        assert_abs_diff_eq!(
            view.variance(1.0).unwrap(),
            arr1(&[55.0 / 6.0, 55.0 / 6.0]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn truncate_drops_the_tail() {
        let mut store = sample_store();
        store.truncate(5);
        assert_eq!(store.len(), 5);
        assert_eq!(store.positions().nrows(), 5);
        // Accepted at steps 0 and 3.
        assert_eq!(store.n_accepted(), 2);
        store.push(arr1(&[7.0, -7.0]).view(), -7.0, true).unwrap();
        assert_eq!(store.record(5).unwrap().position, arr1(&[7.0, -7.0]));
        assert_eq!(store.n_accepted(), 3);

        store.truncate(100);
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn clear_resets_everything() {
        let mut store = sample_store();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.n_accepted(), 0);
        assert_eq!(store.ndim(), 2);
    }
}
