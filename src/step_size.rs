//! Step-size providers shared by random-walk proposals and HMC.
//!
//! Engines ask their provider for a step size once per step, so a randomized step size is a
//! constructor argument rather than a separate engine type.

use rand::{Rng, RngCore};

use crate::error::{McmcError, Result};

pub trait StepSizeProvider {
    /// The step size to use for the next transition.
    fn next_step_size(&mut self, rng: &mut dyn RngCore) -> f64;
}

/// Always the same step size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedStepSize(pub f64);

impl From<f64> for FixedStepSize {
    fn from(eps: f64) -> Self {
        Self(eps)
    }
}

impl StepSizeProvider for FixedStepSize {
    fn next_step_size(&mut self, _rng: &mut dyn RngCore) -> f64 {
        self.0
    }
}

/// A step size drawn independently from `Uniform[lower, upper]` at every call.
///
/// Jittering the step size breaks up periodic trajectories of HMC on targets with a
/// characteristic period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformStepSize {
    lower: f64,
    upper: f64,
}

impl UniformStepSize {
    /// Requires `0 < lower <= upper < inf`.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(lower > 0.0 && lower <= upper && upper.is_finite()) {
            return Err(McmcError::InvalidParameter(format!(
                "uniform step size needs 0 < lower <= upper < inf, got [{lower}, {upper}]"
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }
}

impl StepSizeProvider for UniformStepSize {
    fn next_step_size(&mut self, rng: &mut dyn RngCore) -> f64 {
        if self.lower == self.upper {
            return self.lower;
        }
        rng.gen_range(self.lower..self.upper)
    }
}
