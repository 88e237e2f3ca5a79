//! Metropolis–Hastings sampling of user-supplied log-densities.
//!
//! [`metropolis::MetropolisSampler`] is a random-walk sampler with a fixed Gaussian proposal
//! covariance; [`metropolis::EnsembleSampler`] moves a population of walkers with the
//! affine-invariant stretch move. Both record every step in a [`chain::ChainStore`].
//! [`core::ParallelChains`] runs independent chains in parallel and [`stats`] provides the
//! usual convergence diagnostics.

pub mod chain;
pub mod core;
pub mod error;
pub mod log_prob;
pub mod metropolis;
pub mod proposal;
pub mod random;
pub mod stats;
