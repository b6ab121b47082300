//! Error type shared by all samplers and diagnostics.

use thiserror::Error;

/// Failures surfaced to the immediate caller of a constructor, a step, or a
/// diagnostic function.
///
/// A rejected Metropolis–Hastings proposal is not an error, and neither is a
/// divergent leapfrog trajectory: both end up as a rejected step.
#[derive(Error, Debug)]
pub enum McmcError {
    /// The initial state lies outside the support of the target.
    #[error("initial state has log-density {log_density}; it must lie inside the support of the target")]
    InvalidInitialState { log_density: f64 },

    /// The current state has an undefined density and the candidate could not
    /// move the chain back into the support.
    #[error("current state has undefined density and the proposed state is outside the support")]
    InvalidState,

    /// A diagnostic was given input it cannot summarize, e.g. a constant chain.
    #[error("degenerate diagnostic input: {0}")]
    DegenerateDiagnosticInput(String),

    #[error("at least {required} chains are required, got {found}")]
    InsufficientChains { required: usize, found: usize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Block specifications overlap or refer to coordinates that do not exist.
    #[error("invalid block layout: {0}")]
    InvalidBlocks(String),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, McmcError>;
