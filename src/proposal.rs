/*!
Proposal kernels: how a Metropolis–Hastings engine generates a candidate from the current
state.

A kernel samples a candidate with the chain's own random number generator and can evaluate
its log transition density `log Q(to | from)`. Kernels that report
[`Proposal::is_symmetric`] are never asked for densities; the engine then uses the simplified
ratio `p(y) / p(x)`.

Irreducibility, i.e. being able to reach every state of the support in finitely many
proposals, is an obligation of the caller and is not checked.
*/

use nalgebra::DMatrix;
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::distributions::IsotropicGaussian;
use crate::error::{McmcError, Result};
use crate::step_size::{FixedStepSize, StepSizeProvider};

pub trait Proposal<S> {
    /// Draws a candidate given the current state.
    fn sample(&mut self, current: &[S], rng: &mut dyn RngCore) -> Vec<S>;

    /// `log Q(to | from)`, up to a constant that does not depend on either state.
    fn logp(&self, from: &[S], to: &[S]) -> f64;

    /// Whether `Q(y | x) == Q(x | y)` for all states.
    fn is_symmetric(&self) -> bool {
        false
    }
}

impl<S, Q: Proposal<S> + ?Sized> Proposal<S> for Box<Q> {
    fn sample(&mut self, current: &[S], rng: &mut dyn RngCore) -> Vec<S> {
        (**self).sample(current, rng)
    }

    fn logp(&self, from: &[S], to: &[S]) -> f64 {
        (**self).logp(from, to)
    }

    fn is_symmetric(&self) -> bool {
        (**self).is_symmetric()
    }
}

/// Gaussian random walk: `y = x + std * z` with `z ~ N(0, I)`.
impl Proposal<f64> for IsotropicGaussian {
    fn sample(&mut self, current: &[f64], rng: &mut dyn RngCore) -> Vec<f64> {
        current
            .iter()
            .map(|x| x + self.std * rng.sample::<f64, _>(StandardNormal))
            .collect()
    }

    fn logp(&self, from: &[f64], to: &[f64]) -> f64 {
        let var = self.std * self.std;
        let sq: f64 = from.iter().zip(to).map(|(a, b)| (a - b).powi(2)).sum();
        -0.5 * from.len() as f64 * (2.0 * PI * var).ln() - 0.5 * sq / var
    }

    fn is_symmetric(&self) -> bool {
        true
    }
}

/// Gaussian random walk whose scale comes from a [`StepSizeProvider`] at every proposal.
///
/// With a random scale the kernel is a scale mixture of Gaussians. It is symmetric, so
/// [`Proposal::logp`] is never consulted and returns `0.0`.
#[derive(Debug, Clone)]
pub struct RandomWalk<P = FixedStepSize> {
    step_size: P,
}

impl<P: StepSizeProvider> RandomWalk<P> {
    pub fn new(step_size: P) -> Self {
        Self { step_size }
    }
}

impl<P: StepSizeProvider> Proposal<f64> for RandomWalk<P> {
    fn sample(&mut self, current: &[f64], rng: &mut dyn RngCore) -> Vec<f64> {
        let scale = self.step_size.next_step_size(rng);
        current
            .iter()
            .map(|x| x + scale * rng.sample::<f64, _>(StandardNormal))
            .collect()
    }

    fn logp(&self, _from: &[f64], _to: &[f64]) -> f64 {
        0.0
    }

    fn is_symmetric(&self) -> bool {
        true
    }
}

/// What a [`NeighborProposal`] does with offsets that leave `0..n_states`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The candidate is the current state.
    Reject,
    /// Bounce back off the edge: `-1` becomes `1`, `n` becomes `n - 2`.
    Reflect,
    /// Periodic state space.
    Wrap,
}

/// Moves an index into `0..n_states` by a uniformly chosen offset from
/// `{-width, .., -1, 1, .., width}`.
///
/// Symmetric for [`Boundary::Reject`] and [`Boundary::Wrap`]. With [`Boundary::Reflect`] the
/// states next to an edge are reachable by two offsets from one side and only one from the
/// other, so the kernel is not symmetric and the engine evaluates both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborProposal {
    n_states: usize,
    width: usize,
    boundary: Boundary,
}

impl NeighborProposal {
    pub fn new(n_states: usize, width: usize, boundary: Boundary) -> Result<Self> {
        if n_states < 2 {
            return Err(McmcError::InvalidParameter(format!(
                "neighbor proposal needs at least two states, got {n_states}"
            )));
        }
        if width == 0 {
            return Err(McmcError::InvalidParameter(
                "neighbor proposal width must be at least 1".into(),
            ));
        }
        Ok(Self {
            n_states,
            width,
            boundary,
        })
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn offsets(&self) -> impl Iterator<Item = i64> {
        let w = self.width as i64;
        (-w..=w).filter(|o| *o != 0)
    }

    /// Where offset `offset` takes state `from`.
    fn target(&self, from: usize, offset: i64) -> usize {
        let n = self.n_states as i64;
        let raw = from as i64 + offset;
        let idx = match self.boundary {
            Boundary::Reject if raw < 0 || raw >= n => from as i64,
            Boundary::Reject => raw,
            Boundary::Wrap => raw.rem_euclid(n),
            Boundary::Reflect => {
                let period = 2 * (n - 1);
                let r = raw.rem_euclid(period);
                if r >= n {
                    period - r
                } else {
                    r
                }
            }
        };
        idx as usize
    }

    /// `Q(to | from)`.
    fn probability(&self, from: usize, to: usize) -> f64 {
        let hits = self
            .offsets()
            .filter(|o| self.target(from, *o) == to)
            .count();
        hits as f64 / (2 * self.width) as f64
    }

    /// The column-stochastic proposal matrix: entry `(y, x)` is `Q(y | x)`.
    pub fn transition_matrix(&self) -> DMatrix<f64> {
        let n = self.n_states;
        let mut q = DMatrix::zeros(n, n);
        let p = 1.0 / (2 * self.width) as f64;
        for from in 0..n {
            for offset in self.offsets() {
                q[(self.target(from, offset), from)] += p;
            }
        }
        q
    }
}

impl Proposal<usize> for NeighborProposal {
    fn sample(&mut self, current: &[usize], rng: &mut dyn RngCore) -> Vec<usize> {
        let w = self.width as i64;
        let mut offset = rng.gen_range(-w..w);
        // Skip zero: map [-w, w) onto {-w, .., -1, 1, .., w}.
        if offset >= 0 {
            offset += 1;
        }
        vec![self.target(current[0], offset)]
    }

    fn logp(&self, from: &[usize], to: &[usize]) -> f64 {
        self.probability(from[0], to[0]).ln()
    }

    fn is_symmetric(&self) -> bool {
        self.boundary != Boundary::Reflect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn gaussian_walk_density_is_normalized() {
        let q = IsotropicGaussian::new(0.5);
        let xs: Vec<f64> = (0..4001).map(|i| -5.0 + i as f64 * 0.0025).collect();
        let mass: f64 = xs.iter().map(|x| q.logp(&[0.0], &[*x]).exp() * 0.0025).sum();
        assert_abs_diff_eq!(mass, 1.0, epsilon = 1e-6);
        assert!(Proposal::<f64>::is_symmetric(&q));
    }

    #[test]
    fn gaussian_walk_moves_every_coordinate() {
        let mut q = IsotropicGaussian::new(1.0);
        let mut rng = SmallRng::seed_from_u64(2);
        let y = q.sample(&[0.0, 0.0, 0.0], &mut rng);
        assert_eq!(y.len(), 3);
        assert!(y.iter().all(|v| *v != 0.0));
    }

    #[test]
    fn random_walk_uses_its_step_size() {
        let mut q = RandomWalk::new(FixedStepSize(0.0));
        let mut rng = SmallRng::seed_from_u64(2);
        assert_eq!(q.sample(&[1.5], &mut rng), vec![1.5]);
    }

    fn assert_column_stochastic(q: &DMatrix<f64>) {
        for col in q.column_iter() {
            assert_abs_diff_eq!(col.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn neighbor_matrices_are_column_stochastic() {
        for boundary in [Boundary::Reject, Boundary::Reflect, Boundary::Wrap] {
            for width in [1, 3, 9] {
                let q = NeighborProposal::new(10, width, boundary).unwrap();
                assert_column_stochastic(&q.transition_matrix());
            }
        }
    }

    #[test]
    fn reject_boundary_stays_put() {
        let q = NeighborProposal::new(5, 2, Boundary::Reject).unwrap();
        let m = q.transition_matrix();
        assert_abs_diff_eq!(m[(0, 0)], 0.5);
        assert_abs_diff_eq!(m[(1, 0)], 0.25);
        assert_abs_diff_eq!(m[(2, 0)], 0.25);
        assert!(q.is_symmetric());
        assert_eq!(m, m.transpose());
    }

    #[test]
    fn reflect_boundary_is_asymmetric_at_the_edge() {
        let q = NeighborProposal::new(5, 1, Boundary::Reflect).unwrap();
        assert_eq!(q.target(0, -1), 1);
        assert_eq!(q.target(4, 1), 3);
        assert_abs_diff_eq!(q.logp(&[0], &[1]).exp(), 1.0);
        assert_abs_diff_eq!(q.logp(&[1], &[0]).exp(), 0.5);
        assert!(!q.is_symmetric());
    }

    #[test]
    fn wrap_boundary_is_periodic() {
        let q = NeighborProposal::new(5, 1, Boundary::Wrap).unwrap();
        assert_eq!(q.target(0, -1), 4);
        assert_eq!(q.target(4, 1), 0);
        let m = q.transition_matrix();
        assert_eq!(m, m.transpose());
    }

    #[test]
    fn neighbor_samples_match_the_matrix() {
        let mut q = NeighborProposal::new(6, 2, Boundary::Reflect).unwrap();
        let m = q.transition_matrix();
        let mut rng = SmallRng::seed_from_u64(4);
        let n = 40_000;
        let mut counts = [0usize; 6];
        for _ in 0..n {
            counts[q.sample(&[1], &mut rng)[0]] += 1;
        }
        for (to, c) in counts.iter().enumerate() {
            assert_abs_diff_eq!(*c as f64 / n as f64, m[(to, 1)], epsilon = 0.01);
        }
        // Offset -2 reflects off the edge back onto state 1.
        assert!(counts[1] > 0);
    }

    #[test]
    fn neighbor_rejects_bad_parameters() {
        assert!(NeighborProposal::new(1, 1, Boundary::Wrap).is_err());
        assert!(NeighborProposal::new(5, 0, Boundary::Wrap).is_err());
    }
}
