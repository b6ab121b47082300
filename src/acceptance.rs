//! Acceptance-probability rules for Metropolis–Hastings style engines.
//!
//! An [`Acceptance`] maps the Hastings ratio `R = Q(x|y) p(y) / (Q(y|x) p(x))` to the
//! probability of moving to the candidate. Every rule satisfies `0 <= accept(R) <= min(1, R)`,
//! which is what keeps detailed balance intact.

use std::fmt;
use std::sync::Arc;

/// A user supplied rule: maps `R >= 0` to a probability in `[0, min(1, R)]`.
pub type AcceptanceFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

#[derive(Clone, Default)]
pub enum Acceptance {
    /// `min(1, R)`.
    #[default]
    Metropolis,
    /// `R / (1 + R)`.
    Barker,
    Custom(AcceptanceFn),
}

impl Acceptance {
    /// Wraps a custom rule.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Probability of accepting a candidate with Hastings ratio `ratio`.
    pub fn probability(&self, ratio: f64) -> f64 {
        match self {
            Self::Metropolis => ratio.min(1.0),
            Self::Barker => {
                if ratio.is_infinite() {
                    1.0
                } else {
                    ratio / (1.0 + ratio)
                }
            }
            Self::Custom(f) => f(ratio).clamp(0.0, 1.0),
        }
    }

    /// [`Acceptance::probability`] for a ratio given on the log scale.
    pub fn probability_from_log(&self, log_ratio: f64) -> f64 {
        match self {
            Self::Metropolis => log_ratio.min(0.0).exp(),
            // R / (1 + R) == 1 / (1 + exp(-log R)), which does not overflow for large R.
            Self::Barker => 1.0 / (1.0 + (-log_ratio).exp()),
            Self::Custom(_) => self.probability(log_ratio.exp()),
        }
    }

    /// Decides acceptance given the log Hastings ratio and a uniform draw `u` in `[0, 1)`.
    ///
    /// A NaN or `-inf` log ratio is always rejected.
    pub fn accepts(&self, log_ratio: f64, u: f64) -> bool {
        if log_ratio.is_nan() || log_ratio == f64::NEG_INFINITY {
            return false;
        }
        match self {
            Self::Metropolis => u.ln() <= log_ratio,
            _ => u <= self.probability_from_log(log_ratio),
        }
    }
}

impl fmt::Debug for Acceptance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metropolis => write!(f, "Metropolis"),
            Self::Barker => write!(f, "Barker"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
