/*!
# Metropolis–Hastings Sampler

This module implements a generic Metropolis–Hastings sampler that works with any target
distribution `D` and proposal kernel `Q` implementing [`Target`] and [`Proposal`].

## Overview

- **[`MHMarkovChain`]**: a single chain. Every step draws a candidate `y` from the proposal,
  computes the Hastings ratio in log space,
  `log R = log p(y) - log p(x) + log Q(x | y) - log Q(y | x)`,
  and accepts with the probability given by its [`Acceptance`] rule. A rejected step records
  the unchanged state again.
- **[`MetropolisHastings`]**: several independent chains run in parallel through
  [`ChainRunner`](crate::core::ChainRunner). Chain `i` is seeded with `seed + i`.
- **[`MetropolisWithinGibbs`]**: a composite chain whose step is one MH sub-step per
  [`Block`] of coordinates, in a fixed order.

## Example Usage

```rust
use mcmc_engine::core::ChainRunner;
use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_engine::metropolis_hastings::MetropolisHastings;
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
let proposal = IsotropicGaussian::new(1.0);

let mut mh = MetropolisHastings::new(target, proposal, &[0.0, 0.0], 4)
    .unwrap()
    .set_seed(42);
let samples = mh.run(1000, 100).unwrap();
assert_eq!(samples.shape(), &[4, 1000, 2]);
```
*/

use log::{debug, warn};
use rand::prelude::*;
use std::collections::HashSet;

use crate::acceptance::Acceptance;
use crate::core::{check_same_dim, AcceptanceStats, HasChains, MarkovChain};
use crate::distributions::Target;
use crate::error::{McmcError, Result};
use crate::proposal::Proposal;
use crate::rng::RandomSource;

/// Log Hastings ratio of moving from `current` to `proposed`.
fn log_hastings_ratio<S, Q: Proposal<S> + ?Sized>(
    proposal: &Q,
    current: &[S],
    proposed: &[S],
    current_lp: f64,
    proposed_lp: f64,
) -> f64 {
    let mut log_ratio = proposed_lp - current_lp;
    if !proposal.is_symmetric() {
        log_ratio += proposal.logp(proposed, current) - proposal.logp(current, proposed);
    }
    log_ratio
}

/// Whether to move to a candidate when the current state may be outside the support.
///
/// A current state with undefined density is left for any candidate inside the support;
/// if the candidate is outside as well the chain cannot continue.
fn decide(
    acceptance: &Acceptance,
    current_lp: f64,
    proposed_lp: f64,
    log_ratio: impl FnOnce() -> f64,
    rng: &mut SmallRng,
) -> Result<bool> {
    if current_lp > f64::NEG_INFINITY {
        let u = rng.uniform();
        return Ok(acceptance.accepts(log_ratio(), u));
    }
    if proposed_lp > f64::NEG_INFINITY {
        warn!("current state has log-density {current_lp}; moving to a candidate inside the support");
        Ok(true)
    } else {
        Err(McmcError::InvalidState)
    }
}

fn check_initial<S, D: Target<S>>(target: &D, initial_state: &[S]) -> Result<()> {
    let log_density = target.unnorm_logp(initial_state);
    if log_density.is_finite() {
        Ok(())
    } else {
        Err(McmcError::InvalidInitialState { log_density })
    }
}

/**
The Metropolis–Hastings sampler: several independent [`MHMarkovChain`]s sharing a target and a
proposal.

A global seed is kept and chain `i` is seeded with `seed + i`, so a run is reproducible from
the seed alone.

# Examples

```rust
use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_engine::metropolis_hastings::MetropolisHastings;
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
let proposal = IsotropicGaussian::new(1.0);
let mh = MetropolisHastings::new(target, proposal, &[0.0, 0.0], 2)
    .unwrap()
    .set_seed(42);
assert_eq!(mh.chains[0].seed, 42);
assert_eq!(mh.chains[1].seed, 43);
```
*/
#[derive(Debug, Clone)]
pub struct MetropolisHastings<S, D, Q> {
    /// The target distribution we want to sample from.
    pub target: D,
    /// The proposal kernel used to generate candidate states.
    pub proposal: Q,
    /// The independent Markov chains.
    pub chains: Vec<MHMarkovChain<S, D, Q>>,
    /// The global random seed.
    pub seed: u64,
}

/// A single Markov chain for the Metropolis–Hastings algorithm.
///
/// Each chain stores its own copy of the target and proposal, its current state, its
/// acceptance counters and a chain-specific random number generator.
#[derive(Debug, Clone)]
pub struct MHMarkovChain<S, D, Q> {
    /// The target distribution to sample from.
    pub target: D,
    /// The proposal kernel used to generate candidate states.
    pub proposal: Q,
    /// The current state of the chain.
    pub current_state: Vec<S>,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for this chain.
    pub rng: SmallRng,
    acceptance: Acceptance,
    stats: AcceptanceStats,
}

impl<S, D, Q> MetropolisHastings<S, D, Q>
where
    D: Target<S> + Clone + Send,
    Q: Proposal<S> + Clone + Send,
    S: Clone + Send,
{
    /// Creates `n_chains` chains, all starting at `initial_state`.
    ///
    /// Fails with [`McmcError::InvalidInitialState`] if `initial_state` lies outside the
    /// support of `target`.
    pub fn new(target: D, proposal: Q, initial_state: &[S], n_chains: usize) -> Result<Self> {
        let initial_states = vec![initial_state.to_vec(); n_chains];
        Self::from_initial_states(target, proposal, &initial_states)
    }

    /// Creates one chain per entry of `initial_states`.
    ///
    /// Fails with [`McmcError::ShapeMismatch`] if the initial states differ in length.
    pub fn from_initial_states(target: D, proposal: Q, initial_states: &[Vec<S>]) -> Result<Self> {
        check_same_dim(initial_states.iter().map(Vec::len))?;
        let chains = initial_states
            .iter()
            .map(|x0| MHMarkovChain::new(target.clone(), proposal.clone(), x0))
            .collect::<Result<Vec<_>>>()?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            proposal,
            chains,
            seed,
        }
        .set_seed(seed))
    }

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

    /// Uses `acceptance` in every chain.
    pub fn with_acceptance(mut self, acceptance: Acceptance) -> Self {
        for chain in self.chains.iter_mut() {
            chain.acceptance = acceptance.clone();
        }
        self
    }
}

impl<S, D, Q> HasChains<S> for MetropolisHastings<S, D, Q>
where
    D: Target<S> + Clone + Send,
    Q: Proposal<S> + Clone + Send,
    S: Clone + Send,
{
    type Chain = MHMarkovChain<S, D, Q>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

impl<S, D, Q> MHMarkovChain<S, D, Q>
where
    D: Target<S>,
    Q: Proposal<S>,
    S: Clone,
{
    /**
    Creates a new Metropolis–Hastings chain with the [`Acceptance::Metropolis`] rule and an
    entropy seeded generator.

    # Examples

    ```rust
    use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
    use mcmc_engine::metropolis_hastings::MHMarkovChain;
    use ndarray::{arr1, arr2};

    let target = Gaussian2D {
        mean: arr1(&[0.0, 0.0]),
        cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
    };
    let proposal = IsotropicGaussian::new(1.0);
    let chain = MHMarkovChain::new(target, proposal, &[0.0, 0.0]).unwrap();
    assert_eq!(chain.current_state, vec![0.0, 0.0]);
    ```
    */
    pub fn new(target: D, proposal: Q, initial_state: &[S]) -> Result<Self> {
        check_initial(&target, initial_state)?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            proposal,
            current_state: initial_state.to_vec(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            acceptance: Acceptance::default(),
            stats: AcceptanceStats::default(),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn with_acceptance(mut self, acceptance: Acceptance) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn stats(&self) -> AcceptanceStats {
        self.stats
    }
}

impl<S, D, Q> MarkovChain<S> for MHMarkovChain<S, D, Q>
where
    D: Target<S>,
    Q: Proposal<S>,
    S: Clone,
{
    /**
    Performs one Metropolis–Hastings update step.

    The current state's density is evaluated afresh every step rather than cached, so the
    chain stays correct if `current_state` is modified from outside between steps.

    # Errors

    [`McmcError::InvalidState`] if the current state has undefined density and the candidate
    lies outside the support as well.
    */
    fn step(&mut self) -> Result<&Vec<S>> {
        let proposed = self.proposal.sample(&self.current_state, &mut self.rng);
        let current_lp = self.target.unnorm_logp(&self.current_state);
        let proposed_lp = self.target.unnorm_logp(&proposed);
        let (proposal, current) = (&self.proposal, &self.current_state);
        let accepted = decide(
            &self.acceptance,
            current_lp,
            proposed_lp,
            || log_hastings_ratio(proposal, current, &proposed, current_lp, proposed_lp),
            &mut self.rng,
        )?;
        self.stats.record(accepted);
        if accepted {
            self.current_state = proposed;
        }
        Ok(&self.current_state)
    }

    fn current_state(&self) -> &Vec<S> {
        &self.current_state
    }

    fn acceptance_rate(&self) -> f64 {
        self.stats.rate()
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

/// A proposal restricted to a subset of coordinates.
///
/// The proposal sees only the block's coordinates, in the order of `indices`, and must return
/// a candidate of the same length. All other coordinates stay fixed.
pub struct Block<S> {
    indices: Vec<usize>,
    proposal: Box<dyn Proposal<S> + Send>,
    stats: AcceptanceStats,
}

impl<S> Block<S> {
    pub fn new<Q>(indices: Vec<usize>, proposal: Q) -> Self
    where
        Q: Proposal<S> + Send + 'static,
    {
        Self {
            indices,
            proposal: Box::new(proposal),
            stats: AcceptanceStats::default(),
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn acceptance_rate(&self) -> f64 {
        self.stats.rate()
    }
}

impl<S> std::fmt::Debug for Block<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("indices", &self.indices)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Checks that blocks are non-empty, disjoint and inside `0..dim`.
pub(crate) fn validate_blocks<'a>(
    blocks: impl IntoIterator<Item = &'a [usize]>,
    dim: usize,
) -> Result<()> {
    let mut seen = HashSet::new();
    let mut any = false;
    for (b, indices) in blocks.into_iter().enumerate() {
        any = true;
        if indices.is_empty() {
            return Err(McmcError::InvalidBlocks(format!("block {b} is empty")));
        }
        for &i in indices {
            if i >= dim {
                return Err(McmcError::InvalidBlocks(format!(
                    "block {b} refers to coordinate {i} of a {dim}-dimensional state"
                )));
            }
            if !seen.insert(i) {
                return Err(McmcError::InvalidBlocks(format!(
                    "coordinate {i} appears in more than one block"
                )));
            }
        }
    }
    if !any {
        return Err(McmcError::InvalidBlocks("no blocks given".into()));
    }
    Ok(())
}

/**
Metropolis-within-Gibbs: one step performs one Metropolis–Hastings sub-step per [`Block`].

Blocks are visited in the order given at construction. Each sub-step conditions on the current
values of all other coordinates, including blocks already updated earlier in the same step.
Reordering the blocks changes the transition kernel but not its stationary distribution.

Coordinates not covered by any block are never moved.

# Examples

```rust
use mcmc_engine::core::run_chain;
use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_engine::metropolis_hastings::{Block, MetropolisWithinGibbs};
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.5], [0.5, 1.0]]),
};
let blocks = vec![
    Block::new(vec![0], IsotropicGaussian::new(1.0)),
    Block::new(vec![1], IsotropicGaussian::new(1.0)),
];
let mut chain = MetropolisWithinGibbs::new(target, &[0.0, 0.0], blocks)
    .unwrap()
    .set_seed(1);
let draws = run_chain(&mut chain, 100, 10).unwrap();
assert_eq!(draws.shape(), &[100, 2]);
```
*/
#[derive(Debug)]
pub struct MetropolisWithinGibbs<S, D> {
    pub target: D,
    pub current_state: Vec<S>,
    pub seed: u64,
    pub rng: SmallRng,
    blocks: Vec<Block<S>>,
    acceptance: Acceptance,
}

impl<S, D> MetropolisWithinGibbs<S, D>
where
    D: Target<S>,
    S: Clone,
{
    /// Fails with [`McmcError::InvalidBlocks`] if blocks overlap, are empty or point outside
    /// the state, and with [`McmcError::InvalidInitialState`] if the initial state lies outside
    /// the support.
    pub fn new(target: D, initial_state: &[S], blocks: Vec<Block<S>>) -> Result<Self> {
        validate_blocks(blocks.iter().map(|b| b.indices.as_slice()), initial_state.len())?;
        check_initial(&target, initial_state)?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            current_state: initial_state.to_vec(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            blocks,
            acceptance: Acceptance::default(),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn with_acceptance(mut self, acceptance: Acceptance) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn blocks(&self) -> &[Block<S>] {
        &self.blocks
    }

    /// Acceptance rate of every block, in block order.
    pub fn block_acceptance_rates(&self) -> Vec<f64> {
        self.blocks.iter().map(|b| b.stats.rate()).collect()
    }

    fn sub_step(&mut self, b: usize) -> Result<()> {
        let block = &mut self.blocks[b];
        let current_sub: Vec<S> = block
            .indices
            .iter()
            .map(|&i| self.current_state[i].clone())
            .collect();
        let proposed_sub = block.proposal.sample(&current_sub, &mut self.rng);
        if proposed_sub.len() != current_sub.len() {
            return Err(McmcError::ShapeMismatch(format!(
                "block {b} proposal returned {} values for {} coordinates",
                proposed_sub.len(),
                current_sub.len()
            )));
        }
        let mut proposed = self.current_state.clone();
        for (&i, value) in block.indices.iter().zip(&proposed_sub) {
            proposed[i] = value.clone();
        }
        let current_lp = self.target.unnorm_logp(&self.current_state);
        let proposed_lp = self.target.unnorm_logp(&proposed);
        let proposal = &block.proposal;
        let accepted = decide(
            &self.acceptance,
            current_lp,
            proposed_lp,
            || log_hastings_ratio(proposal, &current_sub, &proposed_sub, current_lp, proposed_lp),
            &mut self.rng,
        )?;
        block.stats.record(accepted);
        if accepted {
            self.current_state = proposed;
        }
        Ok(())
    }
}

impl<S, D> MarkovChain<S> for MetropolisWithinGibbs<S, D>
where
    D: Target<S>,
    S: Clone,
{
    fn step(&mut self) -> Result<&Vec<S>> {
        for b in 0..self.blocks.len() {
            self.sub_step(b)?;
        }
        Ok(&self.current_state)
    }

    fn current_state(&self) -> &Vec<S> {
        &self.current_state
    }

    /// Accepted over proposed sub-steps, pooled across blocks.
    fn acceptance_rate(&self) -> f64 {
        let mut total = AcceptanceStats::default();
        for b in &self.blocks {
            total.proposed += b.stats.proposed;
            total.accepted += b.stats.accepted;
        }
        total.rate()
    }

    fn reset_stats(&mut self) {
        self.blocks.iter_mut().for_each(|b| b.stats.reset());
    }

    fn log_summary(&self) {
        for (b, block) in self.blocks.iter().enumerate() {
            debug!(
                "block {b} {:?}: {} proposed, acceptance rate {:.3}",
                block.indices,
                block.stats.proposed,
                block.stats.rate()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{run_chain, ChainRunner};
    use crate::distributions::{DiscreteTarget, Gaussian2D, IsotropicGaussian};
    use crate::proposal::{Boundary, NeighborProposal};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Axis};
    use ndarray_stats::CorrelationExt;

    /// Checks that samples from a 2D Gaussian match its mean and covariance.
    fn run_gaussian_2d_test(sample_size: usize, n_chains: usize, use_progress: bool) {
        const BURNIN: usize = 2_000;
        const SEED: u64 = 42;

        let target = Gaussian2D {
            mean: arr1(&[0.0, 1.0]),
            cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
        };

        let initial_state = [0.0, 0.0];
        let proposal = IsotropicGaussian::new(1.0);
        let mut mh = MetropolisHastings::new(target.clone(), proposal, &initial_state, n_chains)
            .unwrap()
            .set_seed(SEED);

        let samples = if use_progress {
            mh.run_progress(sample_size / n_chains, BURNIN).unwrap()
        } else {
            mh.run(sample_size / n_chains, BURNIN).unwrap()
        };

        let stacked = samples
            .into_shape_with_order((sample_size, 2))
            .expect("Failed to reshape samples");

        let mean = stacked.mean_axis(Axis(0)).unwrap();
        let cov = stacked.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(mean, target.mean, epsilon = 0.3);
        assert_abs_diff_eq!(cov, target.cov, epsilon = 0.5);
    }

    #[test]
    fn test_single_1_chain() {
        run_gaussian_2d_test(50_000, 1, false);
    }

    #[test]
    fn test_4_chains() {
        run_gaussian_2d_test(100_000, 4, false);
    }

    #[test]
    fn test_progress_4_chains() {
        run_gaussian_2d_test(100_000, 4, true);
    }

    #[test]
    fn same_seed_same_draws() {
        let target = IsotropicGaussian::new(1.0);
        let run = || {
            MetropolisHastings::new(target, IsotropicGaussian::new(1.0), &[0.0], 2)
                .unwrap()
                .set_seed(7)
                .run(200, 10)
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    /// Accepts nothing but the initial state.
    #[derive(Debug, Clone)]
    struct Spike;

    impl Target<f64> for Spike {
        fn unnorm_logp(&self, theta: &[f64]) -> f64 {
            if theta[0] == 0.5 {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        }
    }

    /// Always proposes the current state.
    #[derive(Debug, Clone)]
    struct Stay;

    impl Proposal<f64> for Stay {
        fn sample(&mut self, current: &[f64], _rng: &mut dyn RngCore) -> Vec<f64> {
            current.to_vec()
        }

        fn logp(&self, _from: &[f64], _to: &[f64]) -> f64 {
            0.0
        }

        fn is_symmetric(&self) -> bool {
            true
        }
    }

    /// Always proposes the same point.
    #[derive(Debug, Clone)]
    struct Jump(f64);

    impl Proposal<f64> for Jump {
        fn sample(&mut self, _current: &[f64], _rng: &mut dyn RngCore) -> Vec<f64> {
            vec![self.0]
        }

        fn logp(&self, _from: &[f64], _to: &[f64]) -> f64 {
            0.0
        }

        fn is_symmetric(&self) -> bool {
            true
        }
    }

    /// Adds a constant; treated as symmetric.
    #[derive(Debug, Clone)]
    struct Shift(f64);

    impl Proposal<f64> for Shift {
        fn sample(&mut self, current: &[f64], _rng: &mut dyn RngCore) -> Vec<f64> {
            current.iter().map(|x| x + self.0).collect()
        }

        fn logp(&self, _from: &[f64], _to: &[f64]) -> f64 {
            0.0
        }

        fn is_symmetric(&self) -> bool {
            true
        }
    }

    #[test]
    fn zero_density_candidates_repeat_the_initial_state() {
        let mut chain = MHMarkovChain::new(Spike, IsotropicGaussian::new(1.0), &[0.5])
            .unwrap()
            .set_seed(3);
        let draws = run_chain(&mut chain, 500, 0).unwrap();
        assert!(draws.iter().all(|x| *x == 0.5));
        assert_eq!(chain.acceptance_rate(), 0.0);
        assert_eq!(chain.stats().proposed, 500);
    }

    #[test]
    fn initial_states_must_share_a_dimension() {
        let iso = IsotropicGaussian::new(1.0);
        let mh = MetropolisHastings::from_initial_states(iso, iso, &[vec![0.0], vec![0.0, 0.0]]);
        assert!(matches!(mh, Err(McmcError::ShapeMismatch(_))));
    }

    #[test]
    fn empty_initial_state_has_no_density() {
        let target = DiscreteTarget::new(vec![1.0, 1.0]).unwrap();
        let proposal = NeighborProposal::new(2, 1, Boundary::Wrap).unwrap();
        assert!(matches!(
            MHMarkovChain::new(target, proposal, &[]),
            Err(McmcError::InvalidInitialState { .. })
        ));
    }

    #[test]
    fn identity_proposal_always_accepts() {
        let mut chain = MHMarkovChain::new(IsotropicGaussian::new(1.0), Stay, &[0.25, -1.0])
            .unwrap()
            .set_seed(3);
        let draws = run_chain(&mut chain, 300, 0).unwrap();
        assert!(draws.rows().into_iter().all(|r| r.to_vec() == vec![0.25, -1.0]));
        assert_eq!(chain.acceptance_rate(), 1.0);
    }

    #[test]
    fn initial_state_outside_support_is_rejected() {
        let err = MHMarkovChain::new(Spike, Stay, &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            McmcError::InvalidInitialState { log_density } if log_density == f64::NEG_INFINITY
        ));
        assert!(MetropolisHastings::new(Spike, Stay, &[1.0], 2).is_err());
    }

    #[test]
    fn undefined_current_state_recovers_or_fails() {
        let mut chain = MHMarkovChain::new(Spike, Jump(0.5), &[0.5]).unwrap();
        chain.current_state = vec![2.0];
        assert_eq!(chain.step().unwrap(), &vec![0.5]);

        let mut chain = MHMarkovChain::new(Spike, Jump(3.0), &[0.5]).unwrap();
        chain.current_state = vec![2.0];
        assert!(matches!(chain.step(), Err(McmcError::InvalidState)));
    }

    #[test]
    fn barker_accepts_less_often_than_metropolis() {
        let rate = |acceptance: Acceptance| {
            let mut chain =
                MHMarkovChain::new(IsotropicGaussian::new(1.0), IsotropicGaussian::new(2.4), &[0.0])
                    .unwrap()
                    .with_acceptance(acceptance)
                    .set_seed(5);
            let draws = run_chain(&mut chain, 20_000, 500).unwrap();
            let mean = draws.mean().unwrap();
            assert!(mean.abs() < 0.1, "mean = {mean}");
            chain.acceptance_rate()
        };
        let metropolis = rate(Acceptance::Metropolis);
        let barker = rate(Acceptance::Barker);
        assert!(barker < metropolis, "barker {barker} vs metropolis {metropolis}");
    }

    #[test]
    fn asymmetric_neighbor_kernel_keeps_the_target() {
        let target = DiscreteTarget::new(vec![1.0, 2.0, 3.0, 2.0, 4.0]).unwrap();
        let proposal = NeighborProposal::new(5, 1, Boundary::Reflect).unwrap();
        let mut chain = MHMarkovChain::new(target.clone(), proposal, &[0])
            .unwrap()
            .set_seed(11);
        let draws = run_chain(&mut chain, 100_000, 1_000).unwrap();
        let mut counts = [0usize; 5];
        draws.iter().for_each(|i| counts[*i] += 1);
        for (c, p) in counts.iter().zip(target.probs()) {
            assert_abs_diff_eq!(*c as f64 / 100_000.0, *p, epsilon = 0.015);
        }
    }

    #[test]
    fn block_validation() {
        let make = |blocks: Vec<Block<f64>>| {
            MetropolisWithinGibbs::new(IsotropicGaussian::new(1.0), &[0.0, 0.0, 0.0], blocks)
        };
        assert!(matches!(
            make(vec![Block::new(vec![0, 1], Stay), Block::new(vec![1], Stay)]),
            Err(McmcError::InvalidBlocks(_))
        ));
        assert!(matches!(
            make(vec![Block::new(vec![3], Stay)]),
            Err(McmcError::InvalidBlocks(_))
        ));
        assert!(matches!(
            make(vec![Block::new(vec![], Stay)]),
            Err(McmcError::InvalidBlocks(_))
        ));
        assert!(matches!(make(vec![]), Err(McmcError::InvalidBlocks(_))));
        assert!(make(vec![Block::new(vec![2, 0], Stay)]).is_ok());
    }

    /// Uniform over the half-plane `x1 <= x0`.
    #[derive(Debug)]
    struct Lagging;

    impl Target<f64> for Lagging {
        fn unnorm_logp(&self, theta: &[f64]) -> f64 {
            if theta[1] <= theta[0] {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        }
    }

    #[test]
    fn blocks_condition_on_updates_earlier_in_the_step() {
        let blocks = vec![
            Block::new(vec![0], Shift(1.0)),
            Block::new(vec![1], Shift(1.0)),
        ];
        let mut chain = MetropolisWithinGibbs::new(Lagging, &[0.0, 0.0], blocks).unwrap();
        for _ in 0..3 {
            chain.step().unwrap();
        }
        assert_eq!(chain.current_state, vec![3.0, 3.0]);
        assert_eq!(chain.block_acceptance_rates(), vec![1.0, 1.0]);

        // The reverse order proposes coordinate 1 before coordinate 0 has moved.
        let blocks = vec![
            Block::new(vec![1], Shift(1.0)),
            Block::new(vec![0], Shift(1.0)),
        ];
        let mut chain = MetropolisWithinGibbs::new(Lagging, &[0.0, 0.0], blocks).unwrap();
        for _ in 0..3 {
            chain.step().unwrap();
        }
        assert_eq!(chain.current_state, vec![3.0, 2.0]);
        assert_abs_diff_eq!(chain.acceptance_rate(), 5.0 / 6.0);
    }

    /// Joint weights on `0..5 x 0..3`, with extra mass on the diagonal.
    #[derive(Debug)]
    struct Table;

    impl Table {
        fn weight(i: usize, j: usize) -> f64 {
            let row = [1.0, 2.0, 3.0, 2.0, 4.0];
            let col = [3.0, 1.0, 2.0];
            row[i] * col[j] * if i == j { 2.0 } else { 1.0 }
        }
    }

    impl Target<usize> for Table {
        fn unnorm_logp(&self, theta: &[usize]) -> f64 {
            match theta {
                [i, j] if *i < 5 && *j < 3 => Self::weight(*i, *j).ln(),
                _ => f64::NEG_INFINITY,
            }
        }
    }

    #[test]
    fn reflecting_blocks_keep_the_joint_target() {
        let blocks = vec![
            Block::new(vec![1], NeighborProposal::new(3, 1, Boundary::Reflect).unwrap()),
            Block::new(vec![0], NeighborProposal::new(5, 1, Boundary::Reflect).unwrap()),
        ];
        let mut chain = MetropolisWithinGibbs::new(Table, &[0, 0], blocks)
            .unwrap()
            .set_seed(17);
        let n = 200_000;
        let draws = run_chain(&mut chain, n, 1_000).unwrap();

        let mut counts = [[0usize; 3]; 5];
        for row in draws.rows() {
            counts[row[0]][row[1]] += 1;
        }
        let total: f64 = (0..5)
            .flat_map(|i| (0..3).map(move |j| Table::weight(i, j)))
            .sum();
        for (i, row) in counts.iter().enumerate() {
            for (j, c) in row.iter().enumerate() {
                let expected = Table::weight(i, j) / total;
                assert_abs_diff_eq!(*c as f64 / n as f64, expected, epsilon = 0.01);
            }
        }
    }

    #[test]
    fn componentwise_gaussian_moments() {
        let target = Gaussian2D {
            mean: arr1(&[1.0, -1.0]),
            cov: arr2(&[[2.0, 0.8], [0.8, 1.0]]),
        };
        let blocks = vec![
            Block::new(vec![0], IsotropicGaussian::new(1.5)),
            Block::new(vec![1], IsotropicGaussian::new(1.0)),
        ];
        let mut chain = MetropolisWithinGibbs::new(target.clone(), &[0.0, 0.0], blocks)
            .unwrap()
            .set_seed(21);
        let draws = run_chain(&mut chain, 50_000, 1_000).unwrap();
        let mean = draws.mean_axis(Axis(0)).unwrap();
        let cov = draws.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(mean, target.mean, epsilon = 0.1);
        assert_abs_diff_eq!(cov, target.cov, epsilon = 0.2);
        let rates = chain.block_acceptance_rates();
        assert!(rates.iter().all(|r| *r > 0.2 && *r < 0.9), "{rates:?}");
    }
}
