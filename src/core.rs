/*!
# Core MCMC Utilities.

This module provides the pieces every sampler in this crate shares:
- The [`MarkovChain<S>`] trait, the explicit state machine behind every engine: one call to
  [`MarkovChain::step`] performs exactly one transition and records nothing on its own.
- [`AcceptanceStats`], the `{proposed, accepted}` counters owned by a single chain.
- [`Draws`], a finite lazy sequence over the next `n` states of a chain.
- [`run_chain`] and [`run_chain_progress`] for collecting a single chain into a [`Chain`].
- The [`HasChains<S>`] trait for types that own multiple Markov chains, and the
  [`ChainRunner<S>`] trait that runs them in parallel with Rayon, discarding burn-in and
  optionally displaying a progress bar.

Any type implementing [`HasChains<S>`] automatically implements [`ChainRunner<S>`] via a
blanket implementation.

Chains never share mutable state: each one owns its random number generator, its copy of the
target and proposal, and its acceptance counters. They only meet again when their recorded
draws are stacked into one array for the diagnostics in [`crate::stats`].
*/

use std::marker::PhantomData;

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use ndarray::{stack, Array2, Array3, ArrayView2, Axis};
use num_traits::ToPrimitive;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::error::{McmcError, Result};
use crate::stats::RhatTracker;

/// The recorded history of one run: row `i` holds the state after step `i`.
///
/// States are copied into the chain when recorded, so later moves of the live state never
/// alter what was recorded.
pub type Chain<S> = Array2<S>;

/// Counts of proposed and accepted moves of a single chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptanceStats {
    pub proposed: u64,
    pub accepted: u64,
}

impl AcceptanceStats {
    pub fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    /// `accepted / proposed`, or `0.0` before the first proposal.
    pub fn rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A trait that abstracts a single MCMC chain.
///
/// A type implementing [`MarkovChain<S>`] must provide:
/// - `step()`: advances the chain one iteration and returns a reference to the updated state.
///   A rejected proposal still completes the step; the returned state is then the unchanged
///   previous one.
/// - `current_state()`: returns a reference to the current state without modifying the chain.
/// - `acceptance_rate()` and `reset_stats()`: access to the chain's acceptance bookkeeping.
pub trait MarkovChain<S> {
    /// Performs one iteration of the chain and returns a reference to the new state.
    fn step(&mut self) -> Result<&Vec<S>>;

    /// Returns a reference to the current state of the chain without advancing it.
    fn current_state(&self) -> &Vec<S>;

    /// Fraction of proposals accepted since the last reset.
    fn acceptance_rate(&self) -> f64;

    /// Clears the acceptance counters. Called at the start of every run.
    fn reset_stats(&mut self);

    /// Logs engine specific statistics of the run so far. Called at the end of every run.
    fn log_summary(&self) {}

    /// A lazy sequence over the next `n` states of the chain.
    ///
    /// Each item is an owned copy of the state after one step. The sequence ends after `n`
    /// items or right after the first error, whichever comes first.
    fn draws(&mut self, n: usize) -> Draws<'_, S, Self>
    where
        Self: Sized,
    {
        Draws {
            chain: self,
            remaining: n,
            failed: false,
            phantom: PhantomData,
        }
    }
}

/// Iterator returned by [`MarkovChain::draws`].
pub struct Draws<'a, S, M: ?Sized> {
    chain: &'a mut M,
    remaining: usize,
    failed: bool,
    phantom: PhantomData<S>,
}

impl<S, M> Iterator for Draws<'_, S, M>
where
    S: Clone,
    M: MarkovChain<S>,
{
    type Item = Result<Vec<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }
        self.remaining -= 1;
        match self.chain.step() {
            Ok(state) => Some(Ok(state.clone())),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.remaining))
        }
    }
}

/// Runs a single MCMC chain for `n_discard + n_collect` steps.
///
/// The acceptance counters are reset first, and the first `n_discard` states are thrown away
/// (burn-in). The result has shape `[n_collect, D]`.
pub fn run_chain<S, M>(chain: &mut M, n_collect: usize, n_discard: usize) -> Result<Chain<S>>
where
    M: MarkovChain<S>,
    S: Clone,
{
    let dim = chain.current_state().len();
    let mut data = Vec::with_capacity(n_collect * dim);
    chain.reset_stats();

    for i in 0..(n_discard + n_collect) {
        let state = chain.step()?;
        if i >= n_discard {
            data.extend_from_slice(state);
        }
    }
    chain.log_summary();

    Array2::from_shape_vec((n_collect, dim), data)
        .map_err(|e| McmcError::ShapeMismatch(format!("chain changed dimension mid-run: {e}")))
}

/// Runs a single MCMC chain for `n_discard + n_collect` steps while displaying progress.
///
/// Same as [`run_chain`], but the given [`ProgressBar`] is advanced as the chain moves and
/// shows the running acceptance rate.
pub fn run_chain_progress<S, M>(
    chain: &mut M,
    n_collect: usize,
    n_discard: usize,
    pb: &ProgressBar,
) -> Result<Chain<S>>
where
    M: MarkovChain<S>,
    S: Clone,
{
    let dim = chain.current_state().len();
    let total = n_discard + n_collect;
    let mut data = Vec::with_capacity(n_collect * dim);
    chain.reset_stats();
    pb.set_length(total as u64);

    for i in 0..total {
        let state = chain.step()?;
        if i >= n_discard {
            data.extend_from_slice(state);
        }
        pb.inc(1);
        if i % 100 == 0 || i + 1 == total {
            pb.set_message(format!("p(accept)≈{:.2}", chain.acceptance_rate()));
        }
    }
    chain.log_summary();

    Array2::from_shape_vec((n_collect, dim), data)
        .map_err(|e| McmcError::ShapeMismatch(format!("chain changed dimension mid-run: {e}")))
}

/// A trait for types that own multiple MCMC chains.
///
/// - `S` is the type of the state elements (e.g., `f64` or `usize`).
/// - `Chain` is the concrete type of the individual chain, which must implement [`MarkovChain<S>`]
///   and be [`Send`].
pub trait HasChains<S> {
    type Chain: MarkovChain<S> + Send;

    /// Returns a mutable reference to the vector of chains.
    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

/// An extension trait for types that own multiple MCMC chains.
///
/// [`ChainRunner<S>`] extends [`HasChains<S>`] with methods that run all chains, collect
/// `n_collect` observations per chain and discard `n_discard` initial burn-in observations.
/// The result is an [`Array3`] with axes `[chain, draw, parameter]`.
pub trait ChainRunner<S>: HasChains<S>
where
    S: Clone + Send,
{
    /// Runs all chains in parallel, discarding the first `n_discard` iterations (burn-in).
    fn run(&mut self, n_collect: usize, n_discard: usize) -> Result<Array3<S>> {
        let results: Vec<Chain<S>> = self
            .chains_mut()
            .par_iter_mut()
            .map(|chain| run_chain(chain, n_collect, n_discard))
            .collect::<Result<_>>()?;
        log_acceptance::<S, _>(self.chains_mut());
        stack_chains(&results)
    }

    /// Runs all chains in lock-step, displaying a progress bar with the mean acceptance rate
    /// and the largest online R-hat across parameters.
    ///
    /// Every iteration advances all chains by one step (in parallel), so the R-hat shown is
    /// always computed over chains of equal length.
    fn run_progress(&mut self, n_collect: usize, n_discard: usize) -> Result<Array3<S>>
    where
        S: ToPrimitive,
    {
        let chains = self.chains_mut();
        let n_chains = chains.len();
        if n_chains == 0 {
            return Err(McmcError::InsufficientChains {
                required: 1,
                found: 0,
            });
        }
        let dim = check_same_dim(chains.iter().map(|c| c.current_state().len()))?;
        chains.iter_mut().for_each(|c| c.reset_stats());

        let pb = ProgressBar::new((n_discard + n_collect) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.cyan/blue} {pos}/{len} ({eta}) | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_prefix("MCMC");

        let mut tracker = RhatTracker::new(n_chains, dim);
        let mut per_chain: Vec<Vec<S>> = vec![Vec::with_capacity(n_collect * dim); n_chains];
        let mut flat = vec![0.0; n_chains * dim];

        for i in 0..(n_discard + n_collect) {
            let states: Vec<Vec<S>> = chains
                .par_iter_mut()
                .map(|chain| chain.step().map(|s| s.clone()))
                .collect::<Result<_>>()?;

            if i >= n_discard {
                for (c, state) in states.iter().enumerate() {
                    per_chain[c].extend_from_slice(state);
                    for (d, x) in state.iter().enumerate() {
                        flat[c * dim + d] = x.to_f64().unwrap_or(f64::NAN);
                    }
                }
                tracker.step(&flat)?;
            }

            if i % 50 == 0 || i + 1 == n_discard + n_collect {
                let p_accept =
                    chains.iter().map(|c| c.acceptance_rate()).sum::<f64>() / n_chains as f64;
                let msg = match tracker.max() {
                    Ok(rhat) => format!("p(accept)≈{p_accept:.2} max(rhat)≈{rhat:.2}"),
                    Err(_) => format!("p(accept)≈{p_accept:.2}"),
                };
                pb.set_message(msg);
            }
            pb.inc(1);
        }
        pb.finish_with_message("Done!");
        chains.iter().for_each(|c| c.log_summary());
        log_acceptance::<S, _>(chains);

        let results = per_chain
            .into_iter()
            .map(|data| {
                Array2::from_shape_vec((n_collect, dim), data)
                    .map_err(|e| McmcError::ShapeMismatch(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        stack_chains(&results)
    }
}

impl<S, T> ChainRunner<S> for T
where
    S: Clone + Send,
    T: HasChains<S>,
{
}

fn stack_chains<S: Clone>(results: &[Chain<S>]) -> Result<Array3<S>> {
    if results.is_empty() {
        return Err(McmcError::InsufficientChains {
            required: 1,
            found: 0,
        });
    }
    let views: Vec<ArrayView2<S>> = results.iter().map(|x| x.view()).collect();
    stack(Axis(0), &views).map_err(|e| McmcError::ShapeMismatch(e.to_string()))
}

/// Checks that all chains have the same number of coordinates and returns it.
pub(crate) fn check_same_dim(lengths: impl IntoIterator<Item = usize>) -> Result<usize> {
    let mut lengths = lengths.into_iter();
    let Some(dim) = lengths.next() else {
        return Ok(0);
    };
    for (c, len) in lengths.enumerate() {
        if len != dim {
            return Err(McmcError::ShapeMismatch(format!(
                "chain {} has {len} coordinates but chain 0 has {dim}",
                c + 1
            )));
        }
    }
    Ok(dim)
}

fn log_acceptance<S, M: MarkovChain<S>>(chains: &[M]) {
    let rates: Vec<f64> = chains.iter().map(|c| c.acceptance_rate()).collect();
    if rates.iter().any(|r| *r == 0.0) {
        warn!("at least one chain accepted no proposals: {rates:.3?}");
    }
    info!(
        "finished {} chains, acceptance rates {:.3?}",
        chains.len(),
        rates
    );
}

/// Generates `n` pseudo-random starting points from the `d` dimensional standard normal
/// distribution, seeded from entropy.
pub fn init(n: usize, d: usize) -> Vec<Vec<f64>> {
    let seed = rand::thread_rng().gen::<u64>();
    init_with_seed(n, d, seed)
}

/// Same as [`init`] with the fixed seed 42.
pub fn init_det(n: usize, d: usize) -> Vec<Vec<f64>> {
    init_with_seed(n, d, 42)
}

/// Same as [`init`] but deterministic given `seed`.
pub fn init_with_seed(n: usize, d: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..d).map(|_| rng.sample(StandardNormal)).collect())
        .collect()
}
