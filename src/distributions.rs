/*!
Traits for the distributions the samplers consume, plus a few reference targets.

- [`Target`]: an (unnormalized) log-density over states made of `S` elements.
- [`GradientTarget`]: a real-valued target that also knows the gradient of its energy
  `U(x) = -log p(x)`, as needed by Hamiltonian Monte Carlo.
- [`Conditional`]: coordinate-wise full conditionals for Gibbs sampling.

The reference targets are [`IsotropicGaussian`] (which doubles as the unit-mass harmonic
oscillator), [`Gaussian2D`], [`GaussianMixture1D`], [`BivariateGaussian`] and the finite
[`DiscreteTarget`].

# Examples

```rust
use mcmc_engine::distributions::{GaussianMixture1D, Target};

let target = GaussianMixture1D::bimodal();
let near_narrow_mode = target.unnorm_logp(&[-4.0]);
let in_the_valley = target.unnorm_logp(&[-2.5]);
assert!(near_narrow_mode > in_the_valley);
```
*/

use ndarray::{arr1, arr2, Array1, Array2};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::error::{McmcError, Result};

/// A distribution we want to sample from.
///
/// Implementations must be deterministic in `theta` and defined everywhere; states outside
/// the support return `f64::NEG_INFINITY`.
pub trait Target<S> {
    /// Returns the log of the unnormalized density for state `theta`.
    fn unnorm_logp(&self, theta: &[S]) -> f64;
}

/// A target over real vectors that also provides the gradient of its energy.
pub trait GradientTarget: Target<f64> {
    /// Writes `∇U(theta)` into `grad`, where `U = -unnorm_logp`.
    fn energy_gradient(&self, theta: &[f64], grad: &mut [f64]);

    /// The potential energy `U(theta) = -unnorm_logp(theta)`.
    fn energy(&self, theta: &[f64]) -> f64 {
        -self.unnorm_logp(theta)
    }
}

/// Full conditional distributions of a joint target, one coordinate at a time.
pub trait Conditional<S> {
    /// Samples coordinate `i` given the current values of all coordinates in `given`.
    /// The value at `given[i]` must be ignored.
    fn sample(&self, i: usize, given: &[S], rng: &mut dyn RngCore) -> S;
}

/**
A zero-mean isotropic Gaussian with standard deviation `std` in every coordinate.

As an HMC target it is the harmonic oscillator with spring constant `k = 1 / std²`:
the energy is `k/2 |x|²` and its gradient `k x`. It is also a symmetric random-walk
proposal, see [`crate::proposal`].
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicGaussian {
    pub std: f64,
}

impl IsotropicGaussian {
    pub fn new(std: f64) -> Self {
        Self { std }
    }

    /// The harmonic oscillator with spring constant `k`.
    pub fn harmonic_oscillator(k: f64) -> Self {
        Self {
            std: 1.0 / k.sqrt(),
        }
    }
}

impl Target<f64> for IsotropicGaussian {
    fn unnorm_logp(&self, theta: &[f64]) -> f64 {
        let sum: f64 = theta.iter().map(|x| x * x).sum();
        -0.5 * sum / (self.std * self.std)
    }
}

impl GradientTarget for IsotropicGaussian {
    fn energy_gradient(&self, theta: &[f64], grad: &mut [f64]) {
        let k = 1.0 / (self.std * self.std);
        grad.iter_mut().zip(theta).for_each(|(g, x)| *g = k * x);
    }
}

/**
A 2D Gaussian distribution parameterized by a mean vector and a 2×2 covariance matrix.

# Examples

```rust
use mcmc_engine::distributions::{Gaussian2D, Target};
use ndarray::{arr1, arr2};

let gauss = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
assert_eq!(gauss.unnorm_logp(&[0.0, 0.0]), 0.0);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian2D {
    pub mean: Array1<f64>,
    pub cov: Array2<f64>,
}

impl Gaussian2D {
    fn precision(&self) -> Array2<f64> {
        let (a, b, c, d) = (
            self.cov[[0, 0]],
            self.cov[[0, 1]],
            self.cov[[1, 0]],
            self.cov[[1, 1]],
        );
        let det = a * d - b * c;
        arr2(&[[d, -b], [-c, a]]) / det
    }

    /// The fully normalized log-density.
    pub fn log_prob(&self, theta: &[f64]) -> f64 {
        let det = self.cov[[0, 0]] * self.cov[[1, 1]] - self.cov[[0, 1]] * self.cov[[1, 0]];
        -(2.0 * PI).ln() - 0.5 * det.abs().ln() + self.unnorm_logp(theta)
    }
}

impl Target<f64> for Gaussian2D {
    fn unnorm_logp(&self, theta: &[f64]) -> f64 {
        let Some(x) = theta.get(..2) else {
            return f64::NEG_INFINITY;
        };
        let diff = arr1(x) - &self.mean;
        -0.5 * diff.dot(&self.precision().dot(&diff))
    }
}

impl GradientTarget for Gaussian2D {
    fn energy_gradient(&self, theta: &[f64], grad: &mut [f64]) {
        let diff = arr1(&theta[..2]) - &self.mean;
        let g = self.precision().dot(&diff);
        grad[0] = g[0];
        grad[1] = g[1];
    }
}

/**
A weighted mixture of one-dimensional Gaussians.

The log-density is evaluated with the log-sum-exp trick so that points far in the tails stay
finite.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture1D {
    centers: Vec<f64>,
    widths: Vec<f64>,
    log_weights: Vec<f64>,
}

impl GaussianMixture1D {
    /// Weights are normalized; widths must be positive.
    pub fn new(centers: Vec<f64>, widths: Vec<f64>, weights: Vec<f64>) -> Result<Self> {
        if centers.is_empty() || centers.len() != widths.len() || centers.len() != weights.len() {
            return Err(McmcError::InvalidParameter(format!(
                "mixture needs equally many centers, widths and weights (got {}, {}, {})",
                centers.len(),
                widths.len(),
                weights.len()
            )));
        }
        if widths.iter().any(|w| !(*w > 0.0)) || weights.iter().any(|w| !(*w >= 0.0)) {
            return Err(McmcError::InvalidParameter(
                "mixture widths must be positive and weights non-negative".into(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return Err(McmcError::InvalidParameter(
                "mixture weights must not all be zero".into(),
            ));
        }
        let log_weights = weights.iter().map(|w| (w / total).ln()).collect();
        Ok(Self {
            centers,
            widths,
            log_weights,
        })
    }

    /// The strongly bimodal example: centers `[-4, 4]`, widths `[0.2, 2.0]`, equal weights.
    pub fn bimodal() -> Self {
        Self {
            centers: vec![-4.0, 4.0],
            widths: vec![0.2, 2.0],
            log_weights: vec![0.5f64.ln(), 0.5f64.ln()],
        }
    }

    fn component_logps(&self, x: f64) -> Vec<f64> {
        self.centers
            .iter()
            .zip(&self.widths)
            .zip(&self.log_weights)
            .map(|((c, w), lw)| {
                let z = (x - c) / w;
                lw - 0.5 * z * z - w.ln() - 0.5 * (2.0 * PI).ln()
            })
            .collect()
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

impl Target<f64> for GaussianMixture1D {
    fn unnorm_logp(&self, theta: &[f64]) -> f64 {
        theta
            .first()
            .map_or(f64::NEG_INFINITY, |x| log_sum_exp(&self.component_logps(*x)))
    }
}

impl GradientTarget for GaussianMixture1D {
    fn energy_gradient(&self, theta: &[f64], grad: &mut [f64]) {
        let x = theta[0];
        let logps = self.component_logps(x);
        let total = log_sum_exp(&logps);
        // Responsibility-weighted sum of the component energy gradients.
        grad[0] = logps
            .iter()
            .zip(&self.centers)
            .zip(&self.widths)
            .map(|((lp, c), w)| (lp - total).exp() * (x - c) / (w * w))
            .sum();
    }
}

/**
A bivariate Gaussian with means `mu`, standard deviations `sigma` and correlation `rho`.

Its full conditionals are Gaussian,
`x_i | x_j ~ N(mu_i + rho sigma_i / sigma_j (x_j - mu_j), sigma_i² (1 - rho²))`,
which makes it the standard example for Gibbs sampling.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BivariateGaussian {
    pub mu: [f64; 2],
    pub sigma: [f64; 2],
    pub rho: f64,
}

impl BivariateGaussian {
    pub fn new(mu: [f64; 2], sigma: [f64; 2], rho: f64) -> Result<Self> {
        if !(sigma[0] > 0.0 && sigma[1] > 0.0) || !(rho.abs() < 1.0) {
            return Err(McmcError::InvalidParameter(format!(
                "bivariate Gaussian needs positive sigmas and |rho| < 1 (got {sigma:?}, {rho})"
            )));
        }
        Ok(Self { mu, sigma, rho })
    }

    /// Mean and standard deviation of coordinate `i` given the other coordinate's value.
    pub fn conditional_moments(&self, i: usize, other: f64) -> (f64, f64) {
        let j = 1 - i;
        let mean = self.mu[i] + self.rho * self.sigma[i] / self.sigma[j] * (other - self.mu[j]);
        let std = self.sigma[i] * (1.0 - self.rho * self.rho).sqrt();
        (mean, std)
    }
}

impl Target<f64> for BivariateGaussian {
    fn unnorm_logp(&self, theta: &[f64]) -> f64 {
        let [x0, x1, ..] = theta else {
            return f64::NEG_INFINITY;
        };
        let z0 = (x0 - self.mu[0]) / self.sigma[0];
        let z1 = (x1 - self.mu[1]) / self.sigma[1];
        -(z0 * z0 - 2.0 * self.rho * z0 * z1 + z1 * z1) / (2.0 * (1.0 - self.rho * self.rho))
    }
}

impl Conditional<f64> for BivariateGaussian {
    fn sample(&self, i: usize, given: &[f64], rng: &mut dyn RngCore) -> f64 {
        let (mean, std) = self.conditional_moments(i, given[1 - i]);
        let z: f64 = rng.sample(StandardNormal);
        mean + std * z
    }
}

/**
A probability vector over the finite state space `0..n`.

States are single indices, i.e. a state is the one-element slice `[i]`. Indices outside
`0..n`, and states with zero probability, have log-density `-inf`.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteTarget {
    probs: Vec<f64>,
}

impl DiscreteTarget {
    /// Normalizes `weights`, which must be non-negative and not all zero.
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if weights.is_empty() || weights.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) {
            return Err(McmcError::InvalidParameter(
                "discrete target weights must be finite and non-negative".into(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return Err(McmcError::InvalidParameter(
                "discrete target weights must not all be zero".into(),
            ));
        }
        Ok(Self {
            probs: weights.into_iter().map(|w| w / total).collect(),
        })
    }

    /// Evaluates a one-dimensional target on `grid` and normalizes the result.
    pub fn discretize<D: Target<f64>>(target: &D, grid: &[f64]) -> Result<Self> {
        let logps: Vec<f64> = grid.iter().map(|x| target.unnorm_logp(&[*x])).collect();
        let max = logps.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return Err(McmcError::InvalidParameter(
                "target has no finite density on the grid".into(),
            ));
        }
        Self::new(logps.iter().map(|lp| (lp - max).exp()).collect())
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }
}

/// `n` evenly spaced points from `lo` to `hi`, both included.
pub fn grid(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![lo],
        _ => (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

impl Target<usize> for DiscreteTarget {
    fn unnorm_logp(&self, theta: &[usize]) -> f64 {
        theta
            .first()
            .and_then(|i| self.probs.get(*i))
            .map_or(f64::NEG_INFINITY, |p| p.ln())
    }
}

#[cfg(test)]
mod distributions_tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn iso_gauss_normalizes_to_standard_density() {
        let distr = IsotropicGaussian::new(1.0);
        let p = (distr.unnorm_logp(&[1.0]) - 0.5 * (2.0 * PI).ln()).exp();
        assert_abs_diff_eq!(p, 0.24197072451914337, epsilon = 1e-12);
    }

    #[test]
    fn harmonic_oscillator_gradient_is_spring_force() {
        let osc = IsotropicGaussian::harmonic_oscillator(4.0);
        let mut grad = [0.0; 2];
        osc.energy_gradient(&[1.0, -0.5], &mut grad);
        assert_abs_diff_eq!(grad[0], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[1], -2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(osc.energy(&[1.0, 0.0]), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_2d_log_prob_at_mean() {
        let gauss = Gaussian2D {
            mean: arr1(&[1.0, -1.0]),
            cov: arr2(&[[2.0, 0.5], [0.5, 1.0]]),
        };
        let expected = -(2.0 * PI).ln() - 0.5 * 1.75f64.ln();
        assert_abs_diff_eq!(gauss.log_prob(&[1.0, -1.0]), expected, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_2d_gradient_matches_finite_differences() {
        let gauss = Gaussian2D {
            mean: arr1(&[0.5, 0.0]),
            cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
        };
        let x = [1.3, -0.7];
        let mut grad = [0.0; 2];
        gauss.energy_gradient(&x, &mut grad);
        let h = 1e-6;
        for i in 0..2 {
            let mut up = x;
            let mut down = x;
            up[i] += h;
            down[i] -= h;
            let fd = (gauss.energy(&up) - gauss.energy(&down)) / (2.0 * h);
            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn mixture_gradient_matches_finite_differences() {
        let mix = GaussianMixture1D::bimodal();
        let h = 1e-6;
        for x in [-4.3, -1.0, 0.0, 3.2, 7.5] {
            let mut grad = [0.0];
            mix.energy_gradient(&[x], &mut grad);
            let fd = (mix.energy(&[x + h]) - mix.energy(&[x - h])) / (2.0 * h);
            assert_abs_diff_eq!(grad[0], fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn mixture_is_normalized_on_a_fine_grid() {
        let mix = GaussianMixture1D::new(vec![-1.0, 2.0], vec![0.5, 1.0], vec![1.0, 3.0]).unwrap();
        let xs = grid(-10.0, 12.0, 22_001);
        let h = xs[1] - xs[0];
        let mass: f64 = xs.iter().map(|x| mix.unnorm_logp(&[*x]).exp() * h).sum();
        assert_abs_diff_eq!(mass, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn mixture_rejects_bad_parameters() {
        assert!(GaussianMixture1D::new(vec![0.0], vec![-1.0], vec![1.0]).is_err());
        assert!(GaussianMixture1D::new(vec![0.0, 1.0], vec![1.0], vec![1.0]).is_err());
        assert!(GaussianMixture1D::new(vec![0.0], vec![1.0], vec![0.0]).is_err());
    }

    #[test]
    fn bivariate_conditional_moments() {
        let g = BivariateGaussian::new([0.0, 0.0], [1.0, 1.0], 0.5).unwrap();
        let (m, s) = g.conditional_moments(0, 2.0);
        assert_abs_diff_eq!(m, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s, 0.75f64.sqrt(), epsilon = 1e-12);
        assert!(BivariateGaussian::new([0.0, 0.0], [1.0, 1.0], 1.0).is_err());
    }

    #[test]
    fn bivariate_conditional_sample_moments() {
        let g = BivariateGaussian::new([1.0, -1.0], [2.0, 1.0], -0.3).unwrap();
        let mut rng = SmallRng::seed_from_u64(11);
        let n = 50_000;
        let draws: Vec<f64> = (0..n).map(|_| g.sample(0, &[0.0, 0.5], &mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        let (m, s) = g.conditional_moments(0, 0.5);
        assert_abs_diff_eq!(mean, m, epsilon = 0.05);
        assert_abs_diff_eq!(var, s * s, epsilon = 0.1);
    }

    #[test]
    fn discretized_target_is_normalized() {
        let target =
            DiscreteTarget::discretize(&GaussianMixture1D::bimodal(), &grid(-10.0, 10.0, 101))
                .unwrap();
        assert_eq!(target.len(), 101);
        assert_abs_diff_eq!(target.probs().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_eq!(target.unnorm_logp(&[101]), f64::NEG_INFINITY);
        // Grid point 30 is x = -4, the narrow mode.
        let argmax = target
            .probs()
            .iter()
            .enumerate()
            .fold((0, 0.0), |acc, (i, p)| if *p > acc.1 { (i, *p) } else { acc })
            .0;
        assert_eq!(argmax, 30);
    }

    #[test]
    fn too_short_states_have_no_density() {
        let gauss = Gaussian2D {
            mean: arr1(&[0.0, 0.0]),
            cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
        };
        assert_eq!(gauss.unnorm_logp(&[0.0]), f64::NEG_INFINITY);
        assert_eq!(
            GaussianMixture1D::bimodal().unnorm_logp(&[]),
            f64::NEG_INFINITY
        );
        let bivariate = BivariateGaussian::new([0.0, 0.0], [1.0, 1.0], 0.5).unwrap();
        assert_eq!(bivariate.unnorm_logp(&[1.0]), f64::NEG_INFINITY);
        let discrete = DiscreteTarget::new(vec![1.0, 1.0]).unwrap();
        assert_eq!(discrete.unnorm_logp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn grid_endpoints() {
        let g = grid(-1.0, 1.0, 5);
        assert_eq!(g, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert!(grid(0.0, 1.0, 0).is_empty());
    }
}
