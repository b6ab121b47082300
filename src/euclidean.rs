use rand::RngCore;

use crate::rng::RandomSource;

/// In-place vector operations needed by the Hamiltonian integrators.
pub trait EuclideanVector: Clone {
    /// Creates a zero-initialized vector with the same shape.
    fn zeros_like(&self) -> Self;

    /// In-place fused multiply-add: `self += alpha * other`.
    fn add_scaled_assign(&mut self, other: &Self, alpha: f64);

    /// Dot product between two vectors.
    fn dot(&self, other: &Self) -> f64;

    /// Squared Euclidean norm.
    fn norm_sq(&self) -> f64 {
        self.dot(self)
    }

    /// Fills the vector with samples from N(0, 1) in-place.
    fn fill_standard_normal(&mut self, rng: &mut dyn RngCore);
}

impl EuclideanVector for Vec<f64> {
    fn zeros_like(&self) -> Self {
        vec![0.0; self.len()]
    }

    fn add_scaled_assign(&mut self, other: &Self, alpha: f64) {
        self.iter_mut().zip(other).for_each(|(a, b)| *a += alpha * b);
    }

    fn dot(&self, other: &Self) -> f64 {
        self.iter().zip(other).map(|(a, b)| a * b).sum()
    }

    fn fill_standard_normal(&mut self, rng: &mut dyn RngCore) {
        rng.fill_standard_normal(self);
    }
}
