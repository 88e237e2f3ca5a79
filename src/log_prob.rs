/*!
The caller's log-density, bound once at construction.

A [`LogProbOracle`] turns any of the usual calling conventions (plain closure, closure plus
auxiliary arguments, fallible closure) into a single `position -> log p` capability with
uniform failure handling:

- a returned `-inf` is a valid value and means "outside the support";
- a returned `NaN` or `+inf`, or an error raised by the function, becomes
  [`SamplerError::ChainEvaluation`] carrying the offending position.
*/

use std::fmt;
use std::sync::Arc;

use ndarray::ArrayView1;

use crate::error::{BoxError, EvaluationFailure, Result, SamplerError};

type FnResult = std::result::Result<f64, BoxError>;
type LogProbFn = dyn Fn(&[f64]) -> FnResult + Send + Sync;

/// A bound, shareable log-density function.
///
/// Clones share the same underlying closure, so an oracle can be handed to several
/// independent chains running on different threads.
///
/// # Examples
///
/// ```rust
/// use metropolis_mcmc::log_prob::LogProbOracle;
/// use ndarray::arr1;
///
/// // Independent Gaussian with per-axis precision `ivar`, passed as an auxiliary argument.
/// let ivar = vec![1.0, 4.0];
/// let oracle = LogProbOracle::with_args(
///     |x: &[f64], ivar: &Vec<f64>| {
///         -0.5 * x.iter().zip(ivar).map(|(x, w)| w * x * x).sum::<f64>()
///     },
///     ivar,
/// );
/// let lp = oracle.evaluate(arr1(&[1.0, 0.5]).view()).unwrap();
/// assert_eq!(lp, -1.0);
/// ```
#[derive(Clone)]
pub struct LogProbOracle {
    func: Arc<LogProbFn>,
}

impl LogProbOracle {
    /// Wraps an infallible log-density.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(move |x: &[f64]| -> FnResult { Ok(f(x)) }),
        }
    }

    /// Wraps a log-density that takes fixed auxiliary arguments in addition to the position.
    pub fn with_args<F, A>(f: F, args: A) -> Self
    where
        F: Fn(&[f64], &A) -> f64 + Send + Sync + 'static,
        A: Send + Sync + 'static,
    {
        Self {
            func: Arc::new(move |x: &[f64]| -> FnResult { Ok(f(x, &args)) }),
        }
    }

    /// Wraps a log-density that can fail. Any error aborts the run it occurs in.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn(&[f64]) -> std::result::Result<f64, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            func: Arc::new(move |x: &[f64]| -> FnResult { f(x).map_err(Into::into) }),
        }
    }

    /// Evaluates the log-density at `position`.
    pub fn evaluate(&self, position: ArrayView1<f64>) -> Result<f64> {
        let outcome = match position.as_slice() {
            Some(slice) => (self.func)(slice),
            None => (self.func)(&position.to_vec()),
        };
        let reason = match outcome {
            Ok(lp) if lp.is_nan() => EvaluationFailure::NaN,
            Ok(lp) if lp == f64::INFINITY => EvaluationFailure::PositiveInfinity,
            Ok(lp) => return Ok(lp),
            Err(e) => EvaluationFailure::Failed(e),
        };
        Err(SamplerError::ChainEvaluation {
            position: position.to_vec(),
            reason,
        })
    }
}

impl fmt::Debug for LogProbOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogProbOracle").finish_non_exhaustive()
    }
}
