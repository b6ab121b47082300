/*!
Numerical integrators for Hamiltonian dynamics with unit mass,

```text
dx/dt = v,    dv/dt = -∇U(x),
```

where `U` is the energy of a [`GradientTarget`].

[`leapfrog`] is the integrator used by HMC. It is time reversible and volume preserving
for any step size, and it needs `n_steps + 1` gradient evaluations because neighbouring
half steps of the momentum are fused into full steps. [`Scheme::Euler`] and
[`Scheme::ModifiedEuler`] are kept as comparison schemes; neither preserves volume.

# Examples

```rust
use mcmc_engine::distributions::{GradientTarget, IsotropicGaussian};
use mcmc_engine::integrator::leapfrog;

let oscillator = IsotropicGaussian::harmonic_oscillator(1.0);
let traj = leapfrog(&oscillator, &[1.0], &[0.0], 0.1, 10);
assert_eq!(traj.gradient_evaluations, 11);

let h = |x: &[f64], v: &[f64]| oscillator.energy(x) + 0.5 * v[0] * v[0];
assert!((h(&traj.position, &traj.momentum) - h(&[1.0], &[0.0])).abs() < 1e-2);
```
*/

use nalgebra::Matrix2;

use crate::distributions::{GradientTarget, IsotropicGaussian};
use crate::euclidean::EuclideanVector;

/// End point of a simulated trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub position: Vec<f64>,
    pub momentum: Vec<f64>,
    /// Number of calls to [`GradientTarget::energy_gradient`].
    pub gradient_evaluations: usize,
}

/// The available integration schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Explicit Euler: both updates use the values at the start of the step.
    Euler,
    /// Improved Euler (Heun): an Euler predictor followed by a trapezoidal corrector.
    ModifiedEuler,
    /// Störmer–Verlet leapfrog.
    Leapfrog,
}

/// Gradient of the energy at `x`, counting evaluations.
struct CountingGradient<'a, G: ?Sized> {
    target: &'a G,
    evaluations: usize,
}

impl<'a, G: GradientTarget + ?Sized> CountingGradient<'a, G> {
    fn new(target: &'a G) -> Self {
        Self {
            target,
            evaluations: 0,
        }
    }

    fn eval(&mut self, x: &[f64], out: &mut [f64]) {
        self.evaluations += 1;
        self.target.energy_gradient(x, out);
    }
}

/**
Leapfrog integration of `n_steps` steps of size `eps` from `(x0, v0)`.

1. half step of the momentum: `v ← v - eps/2 ∇U(x)`
2. `n_steps - 1` times: `x ← x + eps v`, then `v ← v - eps ∇U(x)`
3. last position step `x ← x + eps v` and half step `v ← v - eps/2 ∇U(x)`

Non-finite positions or momenta are returned as they are; HMC rejects them through the
energy test. With `n_steps == 0` the start point is returned without evaluating the
gradient.
*/
pub fn leapfrog<G: GradientTarget + ?Sized>(
    target: &G,
    x0: &[f64],
    v0: &[f64],
    eps: f64,
    n_steps: usize,
) -> Trajectory {
    let mut x = x0.to_vec();
    let mut v = v0.to_vec();
    if n_steps == 0 {
        return Trajectory {
            position: x,
            momentum: v,
            gradient_evaluations: 0,
        };
    }
    let mut grad = CountingGradient::new(target);
    let mut g = x.zeros_like();

    grad.eval(&x, &mut g);
    v.add_scaled_assign(&g, -0.5 * eps);
    for _ in 1..n_steps {
        x.add_scaled_assign(&v, eps);
        grad.eval(&x, &mut g);
        v.add_scaled_assign(&g, -eps);
    }
    x.add_scaled_assign(&v, eps);
    grad.eval(&x, &mut g);
    v.add_scaled_assign(&g, -0.5 * eps);

    Trajectory {
        position: x,
        momentum: v,
        gradient_evaluations: grad.evaluations,
    }
}

fn euler<G: GradientTarget + ?Sized>(
    grad: &mut CountingGradient<'_, G>,
    x: &mut Vec<f64>,
    v: &mut Vec<f64>,
    eps: f64,
) {
    let mut g = x.zeros_like();
    grad.eval(x, &mut g);
    x.add_scaled_assign(v, eps);
    v.add_scaled_assign(&g, -eps);
}

fn modified_euler<G: GradientTarget + ?Sized>(
    grad: &mut CountingGradient<'_, G>,
    x: &mut Vec<f64>,
    v: &mut Vec<f64>,
    eps: f64,
) {
    let mut g0 = x.zeros_like();
    grad.eval(x, &mut g0);

    let mut x_pred = x.clone();
    x_pred.add_scaled_assign(v, eps);
    let mut v_pred = v.clone();
    v_pred.add_scaled_assign(&g0, -eps);

    let mut g1 = x.zeros_like();
    grad.eval(&x_pred, &mut g1);

    x.add_scaled_assign(v, 0.5 * eps);
    x.add_scaled_assign(&v_pred, 0.5 * eps);
    v.add_scaled_assign(&g0, -0.5 * eps);
    v.add_scaled_assign(&g1, -0.5 * eps);
}

impl Scheme {
    /// Integrates `n_steps` steps of size `eps` from `(x0, v0)` with this scheme.
    pub fn integrate<G: GradientTarget + ?Sized>(
        self,
        target: &G,
        x0: &[f64],
        v0: &[f64],
        eps: f64,
        n_steps: usize,
    ) -> Trajectory {
        let step: fn(&mut CountingGradient<'_, G>, &mut Vec<f64>, &mut Vec<f64>, f64) = match self
        {
            Scheme::Leapfrog => return leapfrog(target, x0, v0, eps, n_steps),
            Scheme::Euler => euler,
            Scheme::ModifiedEuler => modified_euler,
        };
        let mut grad = CountingGradient::new(target);
        let mut x = x0.to_vec();
        let mut v = v0.to_vec();
        for _ in 0..n_steps {
            step(&mut grad, &mut x, &mut v, eps);
        }
        Trajectory {
            position: x,
            momentum: v,
            gradient_evaluations: grad.evaluations,
        }
    }
}

/**
The matrix of one step of `scheme` with size `eps` on the unit harmonic oscillator
`U(x) = x²/2`, acting on column vectors `(x, v)`.

All three schemes are linear on this system, so the determinant of the matrix is the factor
by which one step scales phase-space volume.

```rust
use mcmc_engine::integrator::{linear_step_map, Scheme};

let eps = 0.3;
assert!((linear_step_map(Scheme::Leapfrog, eps).determinant() - 1.0).abs() < 1e-12);
assert!(linear_step_map(Scheme::Euler, eps).determinant() > 1.0);
```
*/
pub fn linear_step_map(scheme: Scheme, eps: f64) -> Matrix2<f64> {
    let oscillator = IsotropicGaussian::harmonic_oscillator(1.0);
    let col_x = scheme.integrate(&oscillator, &[1.0], &[0.0], eps, 1);
    let col_v = scheme.integrate(&oscillator, &[0.0], &[1.0], eps, 1);
    Matrix2::new(
        col_x.position[0],
        col_v.position[0],
        col_x.momentum[0],
        col_v.momentum[0],
    )
}
