//! Chain diagnostics: autocorrelation, effective sample size and (split) R-hat.
//!
//! All functions here are read-only over recorded chains. A single chain is an array of shape
//! `[draw, param]`, a set of chains an array of shape `[chain, draw, param]`, matching what
//! [`crate::core::run_chain`] and [`crate::core::ChainRunner`] produce.

use std::{cmp::Ordering, fmt};

use log::warn;
use ndarray::{concatenate, prelude::*};
use ndarray_stats::QuantileExt;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::{McmcError, Result};

/// Online, non-split R-hat over several chains, updated one draw per chain at a time.
///
/// Keeps running per-chain means of `x` and `x²`, so memory does not grow with the number of
/// draws. Used by the progress display of [`crate::core::ChainRunner::run_progress`].
#[derive(Debug, Clone, PartialEq)]
pub struct RhatTracker {
    n: usize,
    mean: Array2<f64>,    // n_chains x dim
    mean_sq: Array2<f64>, // n_chains x dim
    n_chains: usize,
    dim: usize,
}

impl RhatTracker {
    pub fn new(n_chains: usize, dim: usize) -> Self {
        Self {
            n: 0,
            mean: Array2::zeros((n_chains, dim)),
            mean_sq: Array2::zeros((n_chains, dim)),
            n_chains,
            dim,
        }
    }

    /// Adds one draw per chain. `x` holds the current states of all chains back to back, i.e.
    /// it is a row-major `[n_chains, dim]` matrix.
    pub fn step(&mut self, x: &[f64]) -> Result<()> {
        let x_arr = ArrayView2::from_shape((self.n_chains, self.dim), x).map_err(|_| {
            McmcError::ShapeMismatch(format!(
                "expected {} chains x {} params = {} values, got {}",
                self.n_chains,
                self.dim,
                self.n_chains * self.dim,
                x.len()
            ))
        })?;
        self.n += 1;
        let n = self.n as f64;
        self.mean = (&self.mean * (n - 1.0) + &x_arr) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + &x_arr.mapv(|v| v * v)) / n;
        Ok(())
    }

    /// R-hat of every parameter.
    pub fn all(&self) -> Result<Array1<f64>> {
        if self.n_chains < 2 {
            return Err(McmcError::InsufficientChains {
                required: 2,
                found: self.n_chains,
            });
        }
        if self.n < 2 {
            return Err(McmcError::DegenerateDiagnosticInput(format!(
                "R-hat needs at least two draws per chain, got {}",
                self.n
            )));
        }
        let n = self.n as f64;
        let chain_mean = self.mean.mean_axis(Axis(0)).ok_or_else(|| {
            McmcError::DegenerateDiagnosticInput("mean across chains failed".into())
        })?;
        let between = (&self.mean - &chain_mean.insert_axis(Axis(0)))
            .mapv(|d| d * d)
            .sum_axis(Axis(0))
            * (n / (self.n_chains as f64 - 1.0));
        let sm2 = (&self.mean_sq - &self.mean.mapv(|m| m * m)) * (n / (n - 1.0));
        let within = sm2.mean_axis(Axis(0)).ok_or_else(|| {
            McmcError::DegenerateDiagnosticInput("mean of within-chain variances failed".into())
        })?;
        if within.iter().any(|w| !(*w > 0.0)) {
            return Err(McmcError::DegenerateDiagnosticInput(
                "a parameter has zero within-chain variance".into(),
            ));
        }
        let var = &within * ((n - 1.0) / n) + &between / n;
        Ok((var / &within).mapv(f64::sqrt))
    }

    /// The largest R-hat over all parameters.
    pub fn max(&self) -> Result<f64> {
        let all = self.all()?;
        all.max()
            .copied()
            .map_err(|e| McmcError::DegenerateDiagnosticInput(format!("max R-hat: {e}")))
    }
}

/// How many lags [`autocorrelation`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxLag {
    /// Lags `0..=n`, capped at the chain length minus one.
    Fixed(usize),
    /// Stop before the first lag `t >= 1` with `rho_t + rho_{t+1} < 0`.
    Auto,
}

/// Autocorrelation `rho_t = Cov(f(x_s), f(x_{s+t})) / Var(f)` of a scalar function of the
/// state, for `t = 0..` up to `max_lag`.
///
/// Uses the plug-in estimator with the full chain's mean and variance (normalized by the
/// chain length at every lag), so `rho_0 == 1`. Fails on chains shorter than two draws and on
/// chains along which `f` is constant.
pub fn autocorrelation<S, F>(chain: ArrayView2<S>, f: F, max_lag: MaxLag) -> Result<Array1<f64>>
where
    F: Fn(ArrayView1<S>) -> f64,
{
    let series: Vec<f64> = chain.rows().into_iter().map(f).collect();
    series_autocorrelation(&series, max_lag)
}

/// [`autocorrelation`] of an already scalar series.
pub fn series_autocorrelation(series: &[f64], max_lag: MaxLag) -> Result<Array1<f64>> {
    let n = series.len();
    if n < 2 {
        return Err(McmcError::DegenerateDiagnosticInput(format!(
            "autocorrelation needs at least two draws, got {n}"
        )));
    }
    if series.iter().any(|x| !x.is_finite()) {
        return Err(McmcError::DegenerateDiagnosticInput(
            "chain contains non-finite values".into(),
        ));
    }
    if series.iter().all(|x| *x == series[0]) {
        return Err(McmcError::DegenerateDiagnosticInput(
            "chain has zero variance".into(),
        ));
    }
    let view = ArrayView2::from_shape((n, 1), series)
        .map_err(|e| McmcError::ShapeMismatch(e.to_string()))?;
    let acov = autocov(view).column(0).to_owned();
    let var = acov[0];
    if !(var > 0.0) {
        return Err(McmcError::DegenerateDiagnosticInput(
            "chain has zero variance".into(),
        ));
    }
    let rho = acov / var;
    let last = match max_lag {
        MaxLag::Fixed(m) => m.min(n - 1),
        MaxLag::Auto => auto_cutoff(rho.view()),
    };
    Ok(rho.slice(s![..=last]).to_owned())
}

/// Last lag kept by [`MaxLag::Auto`].
fn auto_cutoff(rho: ArrayView1<f64>) -> usize {
    (1..rho.len().saturating_sub(1))
        .find(|&t| rho[t] + rho[t + 1] < 0.0)
        .map_or(rho.len() - 1, |t| t - 1)
}

/// Result of [`effective_sample_size`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveSampleSize {
    /// Never below 1.
    pub ess: f64,
    /// `1 + 2 Σ_{t≥1} rho_t` over the automatically truncated autocorrelations.
    pub denominator: f64,
    /// True when the raw estimate was below 1 (or undefined) and has been raised to 1.
    pub clipped: bool,
}

/// `S / (1 + 2 Σ_{t≥1} rho_t)` with the autocorrelation sum truncated by [`MaxLag::Auto`].
///
/// When the denominator is not positive the estimate is reported as 1 with `clipped` set and
/// a warning is logged.
pub fn effective_sample_size<S, F>(chain: ArrayView2<S>, f: F) -> Result<EffectiveSampleSize>
where
    F: Fn(ArrayView1<S>) -> f64,
{
    let series: Vec<f64> = chain.rows().into_iter().map(f).collect();
    series_effective_sample_size(&series)
}

/// [`effective_sample_size`] of an already scalar series.
pub fn series_effective_sample_size(series: &[f64]) -> Result<EffectiveSampleSize> {
    let rho = series_autocorrelation(series, MaxLag::Auto)?;
    Ok(ess_from_rho(series.len(), rho.view()))
}

fn ess_from_rho(n: usize, rho: ArrayView1<f64>) -> EffectiveSampleSize {
    let denominator = 1.0 + 2.0 * rho.iter().skip(1).sum::<f64>();
    if !(denominator > 0.0) {
        warn!("ESS denominator is {denominator:.3e} (not positive); reporting ESS = 1");
        return EffectiveSampleSize {
            ess: 1.0,
            denominator,
            clipped: true,
        };
    }
    let ess = n as f64 / denominator;
    if ess < 1.0 {
        warn!("ESS estimate {ess:.3} is below 1; reporting ESS = 1");
        return EffectiveSampleSize {
            ess: 1.0,
            denominator,
            clipped: true,
        };
    }
    EffectiveSampleSize {
        ess,
        denominator,
        clipped: false,
    }
}

/// Split R-hat of every parameter of `K >= 2` chains of shape `[chain, draw, param]`.
///
/// Each chain is split in half (dropping the middle draw of odd-length chains), the `2K`
/// halves of length `n` give the between-chain variance `B` and the mean within-chain
/// variance `W`, and the result is `sqrt(((n-1)/n W + B/n) / W)`.
///
/// Fails with [`McmcError::InsufficientChains`] for fewer than two chains and with
/// [`McmcError::DegenerateDiagnosticInput`] when `W == 0` for some parameter.
pub fn potential_scale_reduction<T>(chains: ArrayView3<T>) -> Result<Array1<f64>>
where
    T: ToPrimitive + Clone,
{
    let split = split_chains(chains)?;
    let (within, var) = withinvar(split.view())?;
    Ok(rhat(within.view(), var.view()))
}

/// Split R-hat and the multi-chain ESS of every parameter, following Stan's methodology.
///
/// The ESS combines the autocorrelations of all split chains and truncates the sum with
/// Geyer's initial monotone sequence.
pub fn split_rhat_mean_ess<T>(sample: ArrayView3<T>) -> Result<(Array1<f64>, Array1<f64>)>
where
    T: ToPrimitive + Clone,
{
    let split = split_chains(sample)?;
    let (within, var) = withinvar(split.view())?;
    Ok((
        rhat(within.view(), var.view()),
        ess(split.view(), within.view(), var.view())?,
    ))
}

/// Converts to `f64`, validates the shape and splits every chain in half.
fn split_chains<T>(sample: ArrayView3<T>) -> Result<Array3<f64>>
where
    T: ToPrimitive + Clone,
{
    let (n_chains, n_draws, n_params) = sample.dim();
    if n_chains < 2 {
        return Err(McmcError::InsufficientChains {
            required: 2,
            found: n_chains,
        });
    }
    if n_draws < 4 {
        return Err(McmcError::DegenerateDiagnosticInput(format!(
            "split R-hat needs at least four draws per chain, got {n_draws}"
        )));
    }
    if n_params == 0 {
        return Err(McmcError::ShapeMismatch("chains have no parameters".into()));
    }
    let values: Option<Vec<f64>> = sample.iter().map(|x| x.to_f64()).collect();
    let values = values.ok_or_else(|| {
        McmcError::DegenerateDiagnosticInput("draw not representable as f64".into())
    })?;
    let sample = Array3::from_shape_vec(sample.raw_dim(), values)
        .map_err(|e| McmcError::ShapeMismatch(e.to_string()))?;
    splitcat(sample.view())
}

/// Takes a `(chains, draws, params)` view and returns a `(2 * chains, draws / 2, params)`
/// array by splitting each chain in half.
fn splitcat(sample: ArrayView3<f64>) -> Result<Array3<f64>> {
    let n = sample.shape()[1];
    let half = n / 2;
    let first = sample.slice(s![.., ..half, ..]);
    let second = sample.slice(s![.., n - half.., ..]);
    concatenate(Axis(0), &[first, second]).map_err(|e| McmcError::ShapeMismatch(e.to_string()))
}

fn rhat(within: ArrayView1<f64>, var: ArrayView1<f64>) -> Array1<f64> {
    (var.to_owned() / within).mapv(f64::sqrt)
}

/// Mean within-chain variance `W` (unbiased per chain) and the pooled variance estimate
/// `(n-1)/n W + B/n` of every parameter.
fn withinvar(sample: ArrayView3<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
    let (m, n, p) = sample.dim();
    let (mf, nf) = (m as f64, n as f64);
    let pairs = (0..p)
        .into_par_iter()
        .map(|param| {
            let data = sample.slice(s![.., .., param]);
            let constant = data
                .outer_iter()
                .all(|row| row.iter().all(|v| *v == row[0]));
            let chain_means = data.mean_axis(Axis(1)).ok_or_else(|| {
                McmcError::DegenerateDiagnosticInput("empty chains".into())
            })?;
            let overall = chain_means.sum() / mf;
            let b = chain_means.mapv(|c| (c - overall).powi(2)).sum() * nf / (mf - 1.0);
            let w = data
                .outer_iter()
                .zip(chain_means.iter())
                .map(|(row, cm)| row.mapv(|v| (v - cm).powi(2)).sum() / (nf - 1.0))
                .sum::<f64>()
                / mf;
            if constant || !(w > 0.0) {
                return Err(McmcError::DegenerateDiagnosticInput(format!(
                    "parameter {param} has zero within-chain variance"
                )));
            }
            Ok((w, (nf - 1.0) / nf * w + b / nf))
        })
        .collect::<Result<Vec<(f64, f64)>>>()?;
    let (within, var): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
    Ok((Array1::from_vec(within), Array1::from_vec(var)))
}

fn ess(sample: ArrayView3<f64>, within: ArrayView1<f64>, var: ArrayView1<f64>) -> Result<Array1<f64>> {
    let (n_chains, n_steps, n_params) = sample.dim();
    let mut avg_acov = Array2::<f64>::zeros((n_steps, n_params));
    for chain in sample.outer_iter() {
        avg_acov += &autocov(chain);
    }
    avg_acov /= n_chains as f64;
    // rho_t = 1 - (W - mean autocovariance_t) / var
    let rho = 1.0 - (&within.insert_axis(Axis(0)) - &avg_acov) / &var.insert_axis(Axis(0));
    let total = (n_chains * n_steps) as f64;
    // Stan's lower bound on the integrated autocorrelation time.
    let tau_floor = 1.0 / total.log10();
    let tau: Vec<f64> = (0..n_params)
        .into_par_iter()
        .map(|d| {
            let rho_d = rho.column(d).to_vec();
            let mut min = match rho_d.as_slice() {
                [a, b, ..] => a + b,
                _ => 0.0,
            };
            let mut out = 0.0;
            for pair in rho_d.chunks_exact(2) {
                let mut p_t = pair[0] + pair[1];
                if p_t <= 0.0 {
                    break;
                }
                if p_t > min {
                    p_t = min;
                }
                min = p_t;
                out += p_t;
            }
            (-1.0 + 2.0 * out).max(tau_floor)
        })
        .collect();
    Ok(Array1::from_vec(tau).mapv(|t| total / t))
}

fn autocov(sample: ArrayView2<f64>) -> Array2<f64> {
    if sample.nrows() <= 100 {
        autocov_bf(sample)
    } else {
        autocov_fft(sample)
    }
}

/// Autocovariance of every column of an `(n, d)` array via zero-padded FFTs, normalized by
/// `n` at every lag.
fn autocov_fft(sample: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = sample.dim();
    let mut planner = FftPlanner::new();

    // Next power of 2 >= 2n - 1 so the circular correlation does not wrap around.
    let mut n_padded = 1;
    while n_padded < 2 * n - 1 {
        n_padded <<= 1;
    }
    let fft = planner.plan_fft_forward(n_padded);
    let ffti = planner.plan_fft_inverse(n_padded);
    let columns: Vec<Vec<f64>> = (0..d)
        .into_par_iter()
        .map(|col| {
            let traj = sample.column(col);
            let traj_mean = traj.sum() / n as f64;
            let mut x: Vec<Complex<f64>> = traj
                .iter()
                .map(|xi| Complex::new(xi - traj_mean, 0.0))
                .chain(std::iter::repeat(Complex::new(0.0, 0.0)).take(n_padded - n))
                .collect();
            fft.process(&mut x);
            x.iter_mut().for_each(|xi| *xi *= xi.conj());
            ffti.process(&mut x);
            // rustfft does not normalize the inverse transform
            x.iter()
                .take(n)
                .map(|xi| xi.re / n_padded as f64 / n as f64)
                .collect()
        })
        .collect();
    Array2::from_shape_fn((n, d), |(lag, col)| columns[col][lag])
}

/// Brute force autocovariance of every column of an `(n, d)` array:
/// `out[lag, col] = 1/n Σ_t (x[t] - mean) (x[t + lag] - mean)`.
fn autocov_bf(data: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = data.dim();
    let mut out = Array2::<f64>::zeros((n, d));
    for (col, mut out_col) in out.axis_iter_mut(Axis(1)).enumerate() {
        let col_data = data.column(col);
        let mean = col_data.sum() / n as f64;
        let centered = col_data.mapv(|v| v - mean);
        for lag in 0..n {
            let sum_lag: f64 = (0..n - lag).map(|t| centered[t] * centered[t + lag]).sum();
            out_col[lag] = sum_lag / n as f64;
        }
    }
    out
}

/// Summary of a diagnostic across parameters.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct BasicStats {
    pub name: String,
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl BasicStats {
    pub fn new(name: &str, data: &[f64]) -> Result<Self> {
        if data.is_empty() {
            return Err(McmcError::DegenerateDiagnosticInput(format!(
                "no values to summarize for {name}"
            )));
        }
        let mut sorted = data.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let len = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / len;
        let std = if sorted.len() > 1 {
            (sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (len - 1.0)).sqrt()
        } else {
            0.0
        };
        Ok(Self {
            name: name.to_string(),
            min: sorted[0],
            median: sorted[sorted.len() / 2],
            max: sorted[sorted.len() - 1],
            mean,
            std,
        })
    }
}

impl fmt::Display for BasicStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in [{:.2}, {:.2}], median: {:.2}, mean: {:.2} ± {:.2}",
            self.name, self.min, self.max, self.median, self.mean, self.std
        )
    }
}

/// ESS and split R-hat of a multi-chain run, summarized across parameters.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct RunStats {
    pub ess: BasicStats,
    pub rhat: BasicStats,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.ess, self.rhat)
    }
}

impl<T> TryFrom<ArrayView3<'_, T>> for RunStats
where
    T: ToPrimitive + Clone,
{
    type Error = McmcError;

    fn try_from(sample: ArrayView3<T>) -> Result<Self> {
        let (rhat, ess) = split_rhat_mean_ess(sample)?;
        Ok(RunStats {
            ess: BasicStats::new("ESS", &ess.to_vec())?,
            rhat: BasicStats::new("Split R-hat", &rhat.to_vec())?,
        })
    }
}
