//! The random variates consumed by the samplers.
//!
//! Every chain owns its own generator (a seeded [`rand::rngs::SmallRng`]) and
//! hands it to proposals and conditional samplers as `&mut dyn RngCore`.
//! [`RandomSource`] adds the handful of variates the samplers need on top of
//! any such generator.

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Gamma, StandardNormal};

use crate::error::{McmcError, Result};

pub trait RandomSource: RngCore {
    /// A draw from `Uniform[0, 1)`.
    fn uniform(&mut self) -> f64 {
        self.gen::<f64>()
    }

    /// `dim` independent standard normal draws.
    fn standard_normal(&mut self, dim: usize) -> Vec<f64> {
        (0..dim).map(|_| self.sample(StandardNormal)).collect()
    }

    /// Overwrites `out` with independent standard normal draws.
    fn fill_standard_normal(&mut self, out: &mut [f64]) {
        out.iter_mut().for_each(|x| *x = self.sample(StandardNormal));
    }

    /// A draw from `Gamma(shape, rate)`, i.e. with density proportional to
    /// `x^(shape - 1) exp(-rate x)`.
    fn gamma(&mut self, shape: f64, rate: f64) -> Result<f64> {
        let gamma = Gamma::new(shape, 1.0 / rate).map_err(|e| {
            McmcError::InvalidParameter(format!("gamma(shape={shape}, rate={rate}): {e}"))
        })?;
        Ok(gamma.sample(self))
    }
}

impl<R: RngCore + ?Sized> RandomSource for R {}
