//! Error types shared by every sampler in the crate.

use thiserror::Error;

/// Boxed error returned by fallible user log-density functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a log-probability evaluation was rejected.
#[derive(Error, Debug)]
pub enum EvaluationFailure {
    #[error("log-probability function returned NaN")]
    NaN,
    #[error("log-probability function returned +inf")]
    PositiveInfinity,
    #[error("log-probability function failed: {0}")]
    Failed(#[source] BoxError),
}

#[derive(Error, Debug)]
pub enum SamplerError {
    /// The sampler could not be built from the given settings.
    #[error("invalid sampler configuration: {0}")]
    Configuration(String),

    /// An input to a run was rejected before any step executed.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The log-density could not be evaluated at `position`. The run is aborted and the
    /// chain recorded so far is kept.
    #[error("log-probability evaluation failed at {position:?}: {reason}")]
    ChainEvaluation {
        position: Vec<f64>,
        #[source]
        reason: EvaluationFailure,
    },

    /// The acceptance fraction of a chain without steps.
    #[error("acceptance fraction is undefined for an empty chain")]
    DivisionUndefined,

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, SamplerError>;
