/*!
Proposal distributions for the Metropolis core.

Two moves share the [`Proposal`] trait and thus the same accept/reject loop:

- [`GaussianRandomWalk`]: `x' = x + L z` with `L` the lower Cholesky factor of a fixed
  covariance and `z ~ N(0, I)`. Symmetric, so it needs no Hastings correction.
- [`StretchMove`]: the affine-invariant move of Goodman & Weare. A walker is stretched
  towards or away from a randomly chosen partner, `x' = p + z (x - p)` with
  `z ~ g(z) ∝ 1/√z` on `[1/a, a]`. Not symmetric; the correction is `(ndim - 1) ln z`.

# Examples

```rust
use metropolis_mcmc::metropolis::SamplerState;
use metropolis_mcmc::proposal::{GaussianRandomWalk, Proposal};
use metropolis_mcmc::random::RandomSource;
use ndarray::{arr1, arr2};

let walk = GaussianRandomWalk::new(arr2(&[[4.0, 2.0], [2.0, 3.0]]).view(), 2).unwrap();
let state = SamplerState::new(arr1(&[0.0, 0.0]));
let mut rng = RandomSource::new(42);
let candidate = walk.propose(0, &[state], &mut rng);
assert_eq!(candidate.position.len(), 2);
assert_eq!(candidate.log_correction, 0.0);
```
*/

use std::sync::Arc;

use approx::relative_eq;
use nalgebra::{Cholesky, DMatrix};
use ndarray::{Array1, Array2, ArrayView2};

use crate::error::{Result, SamplerError};
use crate::metropolis::SamplerState;
use crate::random::RandomSource;

/// Default stretch scale `a` of the affine-invariant move.
pub const DEFAULT_STRETCH_SCALE: f64 = 2.0;

/// A proposed position together with the log Hastings correction
/// `ln q(x | x') - ln q(x' | x)` of the move that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub position: Array1<f64>,
    pub log_correction: f64,
}

/// A trait for generating candidate positions for one walker of a population.
///
/// `states` holds the current state of every walker; `walker` indexes the one being moved.
/// Single-chain proposals only look at `states[walker]`.
pub trait Proposal {
    /// Draws a candidate for `states[walker]`.
    ///
    /// Callers must pass at least [`min_walkers`](Self::min_walkers) states; the samplers
    /// enforce this at construction.
    fn propose(&self, walker: usize, states: &[SamplerState], rng: &mut RandomSource)
        -> Candidate;

    /// The smallest population this move can operate on.
    fn min_walkers(&self) -> usize {
        1
    }
}

/// Lower-triangular Cholesky factor `L` of a covariance matrix, `L Lᵀ = Σ`.
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyFactor {
    lower: Array2<f64>,
}

impl CholeskyFactor {
    /// Factorizes `covariance` after checking that it is a finite, symmetric, positive
    /// definite `ndim × ndim` matrix.
    pub fn new(covariance: ArrayView2<f64>, ndim: usize) -> Result<Self> {
        if ndim == 0 {
            return Err(SamplerError::Configuration(
                "the parameter space needs at least one dimension".into(),
            ));
        }
        let (rows, cols) = covariance.dim();
        if (rows, cols) != (ndim, ndim) {
            return Err(SamplerError::Configuration(format!(
                "covariance must be {ndim}x{ndim}, got {rows}x{cols}"
            )));
        }
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(SamplerError::Configuration(
                "covariance contains non-finite entries".into(),
            ));
        }
        for i in 0..ndim {
            for j in 0..i {
                let (upper, lower) = (covariance[[j, i]], covariance[[i, j]]);
                if !relative_eq!(upper, lower, epsilon = 1e-12, max_relative = 1e-9) {
                    return Err(SamplerError::Configuration(format!(
                        "covariance is not symmetric: [{i}, {j}] = {lower} but [{j}, {i}] = {upper}"
                    )));
                }
            }
        }

        let matrix = DMatrix::from_fn(ndim, ndim, |i, j| covariance[[i, j]]);
        let cholesky = Cholesky::new(matrix).ok_or_else(|| {
            SamplerError::Configuration("covariance is not positive definite".into())
        })?;
        let l = cholesky.l();
        let lower = Array2::from_shape_fn((ndim, ndim), |(i, j)| l[(i, j)]);
        Ok(Self { lower })
    }

    /// The factor of `variance · I`.
    pub fn isotropic(variance: f64, ndim: usize) -> Result<Self> {
        if ndim == 0 {
            return Err(SamplerError::Configuration(
                "the parameter space needs at least one dimension".into(),
            ));
        }
        if !(variance.is_finite() && variance > 0.0) {
            return Err(SamplerError::Configuration(format!(
                "proposal variance must be positive and finite, got {variance}"
            )));
        }
        Ok(Self {
            lower: Array2::eye(ndim) * variance.sqrt(),
        })
    }

    pub fn ndim(&self) -> usize {
        self.lower.nrows()
    }

    pub fn lower(&self) -> ArrayView2<f64> {
        self.lower.view()
    }

    /// Maps standard-normal draws `z` to a correlated step `L z`.
    pub fn scale(&self, z: &Array1<f64>) -> Array1<f64> {
        self.lower.dot(z)
    }
}

/**
A Gaussian random-walk proposal with fixed covariance.

The Cholesky factor is computed once and shared behind an [`Arc`], so cloning the proposal
(e.g. to run several chains in parallel) does not copy or refactor the matrix.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianRandomWalk {
    factor: Arc<CholeskyFactor>,
}

impl GaussianRandomWalk {
    /// A random walk with step covariance `covariance`.
    pub fn new(covariance: ArrayView2<f64>, ndim: usize) -> Result<Self> {
        Ok(Self {
            factor: Arc::new(CholeskyFactor::new(covariance, ndim)?),
        })
    }

    /// A random walk adding independent `N(0, variance)` noise to each coordinate.
    pub fn isotropic(variance: f64, ndim: usize) -> Result<Self> {
        Ok(Self {
            factor: Arc::new(CholeskyFactor::isotropic(variance, ndim)?),
        })
    }

    pub fn factor(&self) -> &CholeskyFactor {
        &self.factor
    }

    pub fn ndim(&self) -> usize {
        self.factor.ndim()
    }
}

impl Proposal for GaussianRandomWalk {
    fn propose(
        &self,
        walker: usize,
        states: &[SamplerState],
        rng: &mut RandomSource,
    ) -> Candidate {
        let z = rng.standard_normal(self.factor.ndim());
        let step = self.factor.scale(&z);
        Candidate {
            position: &states[walker].position + &step,
            log_correction: 0.0,
        }
    }
}

/// The affine-invariant stretch move with scale parameter `a > 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchMove {
    a: f64,
}

impl StretchMove {
    pub fn new(a: f64) -> Result<Self> {
        if !(a.is_finite() && a > 1.0) {
            return Err(SamplerError::Configuration(format!(
                "stretch scale must be finite and greater than 1, got {a}"
            )));
        }
        Ok(Self { a })
    }

    pub fn scale(&self) -> f64 {
        self.a
    }
}

impl Default for StretchMove {
    fn default() -> Self {
        Self {
            a: DEFAULT_STRETCH_SCALE,
        }
    }
}

impl Proposal for StretchMove {
    fn propose(
        &self,
        walker: usize,
        states: &[SamplerState],
        rng: &mut RandomSource,
    ) -> Candidate {
        debug_assert!(
            states.len() >= self.min_walkers(),
            "the stretch move needs at least two walkers"
        );
        // Uniform over every walker except `walker` itself.
        let mut partner = rng.index(states.len() - 1);
        if partner >= walker {
            partner += 1;
        }
        let z = rng.stretch(self.a);

        let current = &states[walker].position;
        let anchor = &states[partner].position;
        let ndim = current.len();
        Candidate {
            position: anchor + &((current - anchor) * z),
            log_correction: (ndim as f64 - 1.0) * z.ln(),
        }
    }

    fn min_walkers(&self) -> usize {
        2
    }
}
