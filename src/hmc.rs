/*!
# Hamiltonian Monte Carlo

A Metropolis–Hastings sampler on the phase space `(x, v)` of positions and momenta. Every
step:

1. draws a fresh momentum `v ~ N(0, I)`; nothing of the previous momentum survives,
2. computes `H_start = U(x) + |v|²/2` with the energy `U = -log p`,
3. integrates the dynamics with [`leapfrog`] for `n_steps` steps of size `eps`,
4. negates the final momentum, which makes the proposal its own inverse,
5. accepts the end point iff `ln u < H_start - H_end`.

A trajectory whose energy blows up (too large a step size) is simply rejected. Such
divergent transitions are counted and logged at debug level; they are never an error.

The step size comes from a [`StepSizeProvider`], by default a [`FixedStepSize`]. A
[`UniformStepSize`](crate::step_size::UniformStepSize) redraws it at every step.

# Examples

```rust
use mcmc_engine::core::ChainRunner;
use mcmc_engine::distributions::IsotropicGaussian;
use mcmc_engine::hmc::HMC;

let target = IsotropicGaussian::new(1.0);
let mut sampler = HMC::new(target, &vec![vec![0.0, 0.0]; 4], 0.1, 10)
    .unwrap()
    .set_seed(42);
let samples = sampler.run(500, 50).unwrap();
assert_eq!(samples.shape(), &[4, 500, 2]);
```
*/

use log::debug;
use rand::prelude::*;

use crate::core::{check_same_dim, AcceptanceStats, HasChains, MarkovChain};
use crate::distributions::GradientTarget;
use crate::error::{McmcError, Result};
use crate::euclidean::EuclideanVector;
use crate::integrator::leapfrog;
use crate::rng::RandomSource;
use crate::step_size::{FixedStepSize, StepSizeProvider};

/// Energy errors above this count as divergent.
const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// What happened in the most recent HMC step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub h_start: f64,
    pub h_end: f64,
    pub step_size: f64,
    pub accepted: bool,
}

impl Transition {
    /// Whether the trajectory left the region where the integrator is stable.
    pub fn is_divergent(&self) -> bool {
        let error = self.h_end - self.h_start;
        !error.is_finite() || error > DIVERGENCE_THRESHOLD
    }
}

/// A single Hamiltonian Monte Carlo chain.
#[derive(Debug, Clone)]
pub struct HMCMarkovChain<D, P = FixedStepSize> {
    /// The target distribution, which also provides the energy gradient.
    pub target: D,
    /// The current position.
    pub current_state: Vec<f64>,
    /// Number of leapfrog steps per transition.
    pub n_steps: usize,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for momenta and acceptance draws.
    pub rng: SmallRng,
    step_size: P,
    stats: AcceptanceStats,
    divergences: u64,
    last: Option<Transition>,
}

fn check_initial<D: GradientTarget>(target: &D, initial_state: &[f64]) -> Result<()> {
    let log_density = target.unnorm_logp(initial_state);
    if log_density.is_finite() {
        Ok(())
    } else {
        Err(McmcError::InvalidInitialState { log_density })
    }
}

fn check_integration(step_size: f64, n_steps: usize) -> Result<()> {
    if !(step_size > 0.0 && step_size.is_finite()) {
        return Err(McmcError::InvalidParameter(format!(
            "step size must be positive and finite, got {step_size}"
        )));
    }
    if n_steps == 0 {
        return Err(McmcError::InvalidParameter(
            "HMC needs at least one leapfrog step".into(),
        ));
    }
    Ok(())
}

impl<D: GradientTarget> HMCMarkovChain<D> {
    /**
    Creates a chain at `initial_state` with a fixed step size.

    # Errors

    - [`McmcError::InvalidInitialState`] if `initial_state` has non-finite log-density.
    - [`McmcError::InvalidParameter`] if `step_size` is not positive or `n_steps == 0`.
    */
    pub fn new(target: D, initial_state: &[f64], step_size: f64, n_steps: usize) -> Result<Self> {
        check_initial(&target, initial_state)?;
        check_integration(step_size, n_steps)?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            current_state: initial_state.to_vec(),
            n_steps,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            step_size: FixedStepSize(step_size),
            stats: AcceptanceStats::default(),
            divergences: 0,
            last: None,
        })
    }
}

impl<D: GradientTarget, P: StepSizeProvider> HMCMarkovChain<D, P> {
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Replaces the step size with `provider`, consulted once per transition.
    pub fn with_step_size<P2: StepSizeProvider>(self, provider: P2) -> HMCMarkovChain<D, P2> {
        HMCMarkovChain {
            target: self.target,
            current_state: self.current_state,
            n_steps: self.n_steps,
            seed: self.seed,
            rng: self.rng,
            step_size: provider,
            stats: self.stats,
            divergences: self.divergences,
            last: self.last,
        }
    }

    pub fn stats(&self) -> AcceptanceStats {
        self.stats
    }

    /// Number of divergent transitions since the last reset.
    pub fn divergences(&self) -> u64 {
        self.divergences
    }

    /// The most recent transition, `None` before the first step.
    pub fn last_transition(&self) -> Option<&Transition> {
        self.last.as_ref()
    }

    fn hamiltonian<V: EuclideanVector>(&self, x: &[f64], v: &V) -> f64 {
        self.target.energy(x) + 0.5 * v.norm_sq()
    }
}

impl<D: GradientTarget, P: StepSizeProvider> MarkovChain<f64> for HMCMarkovChain<D, P> {
    /// Performs one HMC transition. Never fails: a divergent trajectory is rejected.
    fn step(&mut self) -> Result<&Vec<f64>> {
        let eps = self.step_size.next_step_size(&mut self.rng);
        let mut momentum = self.current_state.zeros_like();
        momentum.fill_standard_normal(&mut self.rng);

        let h_start = self.hamiltonian(&self.current_state, &momentum);
        let traj = leapfrog(
            &self.target,
            &self.current_state,
            &momentum,
            eps,
            self.n_steps,
        );
        let proposed_momentum: Vec<f64> = traj.momentum.iter().map(|v| -v).collect();
        let h_end = self.hamiltonian(&traj.position, &proposed_momentum);

        // NaN energies compare false and are rejected.
        let accepted = self.rng.uniform().ln() < h_start - h_end;
        let transition = Transition {
            h_start,
            h_end,
            step_size: eps,
            accepted,
        };
        if transition.is_divergent() {
            self.divergences += 1;
            debug!("divergent transition: eps = {eps}, H {h_start:.3e} -> {h_end:.3e}");
        }
        self.stats.record(accepted);
        self.last = Some(transition);
        if accepted {
            self.current_state = traj.position;
        }
        Ok(&self.current_state)
    }

    fn current_state(&self) -> &Vec<f64> {
        &self.current_state
    }

    fn acceptance_rate(&self) -> f64 {
        self.stats.rate()
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
        self.divergences = 0;
    }

    fn log_summary(&self) {
        if self.divergences > 0 {
            debug!(
                "hmc chain {}: {} of {} transitions diverged",
                self.seed, self.divergences, self.stats.proposed
            );
        }
    }
}

/// Several independent [`HMCMarkovChain`]s sharing a target.
///
/// Chain `i` is seeded with `seed + i`.
#[derive(Debug, Clone)]
pub struct HMC<D, P = FixedStepSize> {
    pub target: D,
    pub chains: Vec<HMCMarkovChain<D, P>>,
    pub seed: u64,
}

impl<D: GradientTarget + Clone> HMC<D> {
    /// Creates one chain per entry of `initial_states`.
    ///
    /// Fails with [`McmcError::ShapeMismatch`] if the initial states differ in length.
    pub fn new(
        target: D,
        initial_states: &[Vec<f64>],
        step_size: f64,
        n_steps: usize,
    ) -> Result<Self> {
        check_same_dim(initial_states.iter().map(Vec::len))?;
        let chains = initial_states
            .iter()
            .map(|x0| HMCMarkovChain::new(target.clone(), x0, step_size, n_steps))
            .collect::<Result<Vec<_>>>()?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            chains,
            seed,
        }
        .set_seed(seed))
    }
}

impl<D: GradientTarget + Clone, P: StepSizeProvider> HMC<D, P> {
    /// Sets a new global seed; chain `i` is reseeded with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            let chain_seed = seed.wrapping_add(i as u64);
            chain.seed = chain_seed;
            chain.rng = SmallRng::seed_from_u64(chain_seed);
        }
        self
    }

    /// Gives every chain its own copy of `provider`.
    pub fn with_step_size<P2: StepSizeProvider + Clone>(self, provider: P2) -> HMC<D, P2> {
        HMC {
            target: self.target,
            chains: self
                .chains
                .into_iter()
                .map(|c| c.with_step_size(provider.clone()))
                .collect(),
            seed: self.seed,
        }
    }
}

impl<D, P> HasChains<f64> for HMC<D, P>
where
    D: GradientTarget + Clone + Send,
    P: StepSizeProvider + Send,
{
    type Chain = HMCMarkovChain<D, P>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}
