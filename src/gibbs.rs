/*!
# Gibbs Sampler

Rejection-free sampling for targets whose full conditionals can be sampled directly.

One step of a [`GibbsMarkovChain`] is a *systematic scan*: the coordinates in its schedule are
visited in a fixed order and each new value overwrites the old one immediately, so coordinate
`i` is drawn given the already updated values of the coordinates visited before it and the old
values of those visited after it.

Several coordinates can be drawn jointly as one block, see [`Update::Block`]. A coordinate or
block may be *collapsed*: instead of its full conditional it is drawn from a marginal
distribution that integrates out some of the other coordinates. See [`Update::Collapsed`] and
[`Update::CollapsedBlock`].

There is no accept/reject decision, so [`MarkovChain::acceptance_rate`] is always `1.0`.
*/

use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, RngCore, SeedableRng};
use std::fmt;
use std::sync::Arc;

use crate::core::{HasChains, MarkovChain};
use crate::distributions::Conditional;
use crate::error::{McmcError, Result};
use crate::metropolis_hastings::validate_blocks;

/// A distribution for one coordinate given a subset of the others.
pub trait Marginal<S> {
    /// Samples the coordinate given the values of the conditioning coordinates, in the order
    /// they were listed in [`Update::Collapsed`].
    fn sample(&self, conditioning: &[S], rng: &mut dyn RngCore) -> S;
}

/// A joint distribution for a block of coordinates.
///
/// Returns one value per block coordinate, in the order of the block's indices.
pub trait BlockSampler<S> {
    /// Samples the block given `given`: the full state for [`Update::Block`], or the
    /// conditioning coordinates for [`Update::CollapsedBlock`]. Block entries of the full
    /// state must be ignored.
    fn sample(&self, given: &[S], rng: &mut dyn RngCore) -> Vec<S>;
}

/// One entry of a Gibbs schedule.
pub enum Update<S> {
    /// Draw coordinate `i` from the target's full conditional.
    Conditional(usize),
    /// Draw coordinate `index` from `marginal`, which only sees the coordinates listed in
    /// `conditioning`.
    Collapsed {
        index: usize,
        conditioning: Vec<usize>,
        marginal: Arc<dyn Marginal<S> + Send + Sync>,
    },
    /// Draw the coordinates in `indices` jointly from their conditional given the rest of
    /// the state.
    Block {
        indices: Vec<usize>,
        sampler: Arc<dyn BlockSampler<S> + Send + Sync>,
    },
    /// Draw the coordinates in `indices` jointly from a marginal that only sees the
    /// coordinates listed in `conditioning`.
    CollapsedBlock {
        indices: Vec<usize>,
        conditioning: Vec<usize>,
        sampler: Arc<dyn BlockSampler<S> + Send + Sync>,
    },
}

impl<S> Update<S> {
    pub fn collapsed<M>(index: usize, conditioning: Vec<usize>, marginal: M) -> Self
    where
        M: Marginal<S> + Send + Sync + 'static,
    {
        Self::Collapsed {
            index,
            conditioning,
            marginal: Arc::new(marginal),
        }
    }

    pub fn block<B>(indices: Vec<usize>, sampler: B) -> Self
    where
        B: BlockSampler<S> + Send + Sync + 'static,
    {
        Self::Block {
            indices,
            sampler: Arc::new(sampler),
        }
    }

    pub fn collapsed_block<B>(indices: Vec<usize>, conditioning: Vec<usize>, sampler: B) -> Self
    where
        B: BlockSampler<S> + Send + Sync + 'static,
    {
        Self::CollapsedBlock {
            indices,
            conditioning,
            sampler: Arc::new(sampler),
        }
    }

    /// The coordinates this update overwrites.
    pub fn indices(&self) -> &[usize] {
        match self {
            Self::Conditional(i) => std::slice::from_ref(i),
            Self::Collapsed { index, .. } => std::slice::from_ref(index),
            Self::Block { indices, .. } | Self::CollapsedBlock { indices, .. } => indices,
        }
    }

    fn conditioning(&self) -> &[usize] {
        match self {
            Self::Collapsed { conditioning, .. } | Self::CollapsedBlock { conditioning, .. } => {
                conditioning
            }
            Self::Conditional(_) | Self::Block { .. } => &[],
        }
    }
}

impl<S> Clone for Update<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Conditional(i) => Self::Conditional(*i),
            Self::Collapsed {
                index,
                conditioning,
                marginal,
            } => Self::Collapsed {
                index: *index,
                conditioning: conditioning.clone(),
                marginal: Arc::clone(marginal),
            },
            Self::Block { indices, sampler } => Self::Block {
                indices: indices.clone(),
                sampler: Arc::clone(sampler),
            },
            Self::CollapsedBlock {
                indices,
                conditioning,
                sampler,
            } => Self::CollapsedBlock {
                indices: indices.clone(),
                conditioning: conditioning.clone(),
                sampler: Arc::clone(sampler),
            },
        }
    }
}

impl<S> fmt::Debug for Update<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conditional(i) => write!(f, "Conditional({i})"),
            Self::Collapsed {
                index,
                conditioning,
                ..
            } => write!(f, "Collapsed({index} | {conditioning:?})"),
            Self::Block { indices, .. } => write!(f, "Block({indices:?})"),
            Self::CollapsedBlock {
                indices,
                conditioning,
                ..
            } => write!(f, "CollapsedBlock({indices:?} | {conditioning:?})"),
        }
    }
}

fn validate_schedule<S>(schedule: &[Update<S>], dim: usize) -> Result<()> {
    validate_blocks(schedule.iter().map(Update::indices), dim)?;
    for update in schedule {
        let indices = update.indices();
        if let Some(j) = update
            .conditioning()
            .iter()
            .find(|&&j| j >= dim || indices.contains(&j))
        {
            return Err(McmcError::InvalidBlocks(format!(
                "collapsed update of {indices:?} cannot condition on coordinate {j}"
            )));
        }
    }
    Ok(())
}

fn overwrite<S>(state: &mut [S], indices: &[usize], values: Vec<S>) -> Result<()> {
    if values.len() != indices.len() {
        return Err(McmcError::ShapeMismatch(format!(
            "block sampler returned {} values for coordinates {indices:?}",
            values.len()
        )));
    }
    for (&i, value) in indices.iter().zip(values) {
        state[i] = value;
    }
    Ok(())
}

fn gather<S: Clone>(state: &[S], indices: &[usize]) -> Vec<S> {
    indices.iter().map(|&j| state[j].clone()).collect()
}

#[derive(Debug, Clone)]
pub struct GibbsMarkovChain<S, D> {
    /// The distribution that provides conditional samples.
    pub target: D,

    /// Current state of the Markov chain.
    pub current_state: Vec<S>,

    /// Random seed for reproducibility.
    pub seed: u64,

    /// RNG for this chain.
    pub rng: SmallRng,

    schedule: Vec<Update<S>>,
}

impl<S, D> GibbsMarkovChain<S, D>
where
    D: Conditional<S>,
    S: Clone,
{
    /// A chain that updates every coordinate from its full conditional, in index order.
    pub fn new(target: D, initial_state: &[S]) -> Self {
        let schedule = (0..initial_state.len()).map(Update::Conditional).collect();
        let seed = thread_rng().gen::<u64>();
        Self {
            target,
            current_state: initial_state.to_vec(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            schedule,
        }
    }

    /// A chain with an explicit schedule.
    ///
    /// Every coordinate may appear at most once. Coordinates missing from the schedule keep
    /// their initial values.
    pub fn with_schedule(target: D, initial_state: &[S], schedule: Vec<Update<S>>) -> Result<Self> {
        validate_schedule(&schedule, initial_state.len())?;
        Ok(Self {
            schedule,
            ..Self::new(target, initial_state)
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn schedule(&self) -> &[Update<S>] {
        &self.schedule
    }
}

impl<S, D> MarkovChain<S> for GibbsMarkovChain<S, D>
where
    D: Conditional<S>,
    S: Clone,
{
    /// Performs one systematic scan over the schedule.
    ///
    /// # Errors
    ///
    /// [`McmcError::ShapeMismatch`] if a block sampler returns the wrong number of values.
    fn step(&mut self) -> Result<&Vec<S>> {
        for update in &self.schedule {
            match update {
                Update::Conditional(i) => {
                    self.current_state[*i] =
                        self.target.sample(*i, &self.current_state, &mut self.rng);
                }
                Update::Collapsed {
                    index,
                    conditioning,
                    marginal,
                } => {
                    let given = gather(&self.current_state, conditioning);
                    self.current_state[*index] = marginal.sample(&given, &mut self.rng);
                }
                Update::Block { indices, sampler } => {
                    let values = sampler.sample(&self.current_state, &mut self.rng);
                    overwrite(&mut self.current_state, indices, values)?;
                }
                Update::CollapsedBlock {
                    indices,
                    conditioning,
                    sampler,
                } => {
                    let given = gather(&self.current_state, conditioning);
                    let values = sampler.sample(&given, &mut self.rng);
                    overwrite(&mut self.current_state, indices, values)?;
                }
            }
        }
        Ok(&self.current_state)
    }

    fn current_state(&self) -> &Vec<S> {
        &self.current_state
    }

    fn acceptance_rate(&self) -> f64 {
        1.0
    }

    fn reset_stats(&mut self) {}
}

/// Several independent [`GibbsMarkovChain`]s; chain `i` is seeded with `seed + i`.
#[derive(Debug, Clone)]
pub struct GibbsSampler<S, D> {
    pub target: D,
    pub chains: Vec<GibbsMarkovChain<S, D>>,
    pub seed: u64,
}

impl<S, D> GibbsSampler<S, D>
where
    D: Conditional<S> + Clone + Send,
    S: Clone + Send,
{
    /// Creates a new Gibbs sampler with `n_chains` parallel chains,
    /// all starting from `initial_state`.
    pub fn new(target: D, initial_state: &[S], n_chains: usize) -> Self {
        let chains = (0..n_chains)
            .map(|_| GibbsMarkovChain::new(target.clone(), initial_state))
            .collect();
        Self::from_chains(target, chains)
    }

    /// Like [`GibbsSampler::new`], with the same schedule in every chain.
    pub fn with_schedule(
        target: D,
        initial_state: &[S],
        schedule: Vec<Update<S>>,
        n_chains: usize,
    ) -> Result<Self> {
        let chains = (0..n_chains)
            .map(|_| GibbsMarkovChain::with_schedule(target.clone(), initial_state, schedule.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_chains(target, chains))
    }

    fn from_chains(target: D, chains: Vec<GibbsMarkovChain<S, D>>) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            target,
            chains,
            seed,
        }
        .set_seed(seed)
    }

    /// Sets a new seed, and updates the chains accordingly.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            let chain_seed = seed.wrapping_add(i as u64);
            chain.seed = chain_seed;
            chain.rng = SmallRng::seed_from_u64(chain_seed);
        }
        self
    }
}

impl<S, D> HasChains<S> for GibbsSampler<S, D>
where
    D: Conditional<S> + Clone + Send,
    S: Clone + Send,
{
    type Chain = GibbsMarkovChain<S, D>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}
