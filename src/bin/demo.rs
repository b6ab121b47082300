//! Runs each sampler once on a small target and prints its diagnostics.

use mcmc_engine::core::ChainRunner;
use mcmc_engine::distributions::{BivariateGaussian, Gaussian2D, IsotropicGaussian};
use mcmc_engine::error::Result;
use mcmc_engine::gibbs::GibbsSampler;
use mcmc_engine::hmc::HMC;
use mcmc_engine::metropolis_hastings::MetropolisHastings;
use mcmc_engine::stats::RunStats;
use ndarray::{arr1, arr2};

const N_CHAINS: usize = 4;
const N_COLLECT: usize = 5_000;
const N_DISCARD: usize = 1_000;
const SEED: u64 = 42;

fn main() -> Result<()> {
    let target = Gaussian2D {
        mean: arr1(&[0.0, 0.0]),
        cov: arr2(&[[2.0, 1.0], [1.0, 2.0]]),
    };
    let mut mh = MetropolisHastings::new(
        target.clone(),
        IsotropicGaussian::new(1.0),
        &[10.0, 12.0],
        N_CHAINS,
    )?
    .set_seed(SEED);
    let samples = mh.run(N_COLLECT, N_DISCARD)?;
    println!("Metropolis-Hastings\n{}", RunStats::try_from(samples.view())?);

    let conditionals = BivariateGaussian::new([0.0, 0.0], [1.0, 1.0], 0.5)?;
    let mut gibbs = GibbsSampler::new(conditionals, &[0.0, 0.0], N_CHAINS).set_seed(SEED);
    let samples = gibbs.run(N_COLLECT, N_DISCARD)?;
    println!("Gibbs\n{}", RunStats::try_from(samples.view())?);

    let mut hmc = HMC::new(target, &vec![vec![10.0, 12.0]; N_CHAINS], 0.1, 20)?.set_seed(SEED);
    let samples = hmc.run_progress(N_COLLECT, N_DISCARD)?;
    println!("Hamiltonian Monte Carlo\n{}", RunStats::try_from(samples.view())?);
    Ok(())
}
