/*!
# mcmc-engine

Markov chain Monte Carlo samplers built around one explicit state machine,
[`core::MarkovChain`]:

- [`metropolis_hastings`]: generic Metropolis–Hastings with Metropolis, Barker or custom
  acceptance rules, and Metropolis-within-Gibbs over blocks of coordinates.
- [`gibbs`]: systematic-scan Gibbs sampling from full conditionals, with optional collapsed
  updates.
- [`hmc`]: Hamiltonian Monte Carlo with the leapfrog integrator from [`integrator`].

Chains are independent, each with its own seeded generator, and run in parallel through
[`core::ChainRunner`]. Their draws feed the diagnostics in [`stats`] (autocorrelation,
effective sample size, split R-hat) and, for finite state spaces, [`spectral`].

## Example

```rust
use mcmc_engine::core::ChainRunner;
use mcmc_engine::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_engine::metropolis_hastings::MetropolisHastings;
use mcmc_engine::stats::RunStats;
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.5], [0.5, 1.0]]),
};
let mut mh = MetropolisHastings::new(target, IsotropicGaussian::new(1.0), &[0.0, 0.0], 4)
    .unwrap()
    .set_seed(42);
let samples = mh.run(2000, 500).unwrap();
let stats = RunStats::try_from(samples.view()).unwrap();
println!("{stats}");
```

The library logs through the [`log`] facade and never installs a logger.
*/

pub mod acceptance;
pub mod core;
pub mod distributions;
pub mod error;
pub mod euclidean;
pub mod gibbs;
pub mod hmc;
pub mod integrator;
pub mod io;
pub mod metropolis_hastings;
pub mod proposal;
pub mod rng;
pub mod spectral;
pub mod stats;
pub mod step_size;
