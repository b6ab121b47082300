/*!
Convergence rates of Metropolis chains on finite state spaces.

On `n` states a Metropolis chain is a column-stochastic matrix `M` with `M(y, x)` the
probability of moving from `x` to `y`. Its largest eigenvalue is `1` (eigenvector: the
target), and the distance to stationarity shrinks like `|λ₂|^t`, where `λ₂` is the
eigenvalue of second largest modulus. [`second_eigenvalue_gap`] reports
`-ln |λ₂|`; larger is faster.

These diagnostics only exist for finite state spaces.

# Examples

```rust
use mcmc_engine::proposal::{Boundary, NeighborProposal};
use mcmc_engine::spectral::{metropolis_matrix, second_eigenvalue_gap};

let q = NeighborProposal::new(4, 1, Boundary::Wrap).unwrap().transition_matrix();
let m = metropolis_matrix(&q, &[1.0, 2.0, 3.0, 4.0]).unwrap();
assert!(second_eigenvalue_gap(&m).unwrap() > 0.0);
```
*/

use nalgebra::DMatrix;

use crate::error::{McmcError, Result};

const STOCHASTIC_TOLERANCE: f64 = 1e-9;

fn check_column_stochastic(m: &DMatrix<f64>, what: &str) -> Result<()> {
    if !m.is_square() {
        return Err(McmcError::ShapeMismatch(format!(
            "{what} must be square, got {}x{}",
            m.nrows(),
            m.ncols()
        )));
    }
    if m.iter().any(|q| !(q.is_finite() && *q >= 0.0)) {
        return Err(McmcError::InvalidParameter(format!(
            "{what} has negative or non-finite entries"
        )));
    }
    for (x, col) in m.column_iter().enumerate() {
        let total = col.sum();
        if (total - 1.0).abs() > STOCHASTIC_TOLERANCE {
            return Err(McmcError::InvalidParameter(format!(
                "column {x} of {what} sums to {total}, expected 1"
            )));
        }
    }
    Ok(())
}

/**
The Metropolis transition matrix for the proposal matrix `q` and the (unnormalized) target
weights `p`.

`q` must be column stochastic with `q(y, x) = Q(y | x)`. Off the diagonal
`M(y, x) = min(Q(y | x), Q(x | y) p(y) / p(x))`; the diagonal collects the rejected mass so
that every column sums to one. The result satisfies detailed balance with respect to `p`.

# Errors

- [`McmcError::ShapeMismatch`] if `q` is not square or does not match `p` in size.
- [`McmcError::InvalidParameter`] if `q` is not column stochastic or a weight is not
  positive and finite.
*/
pub fn metropolis_matrix(q: &DMatrix<f64>, p: &[f64]) -> Result<DMatrix<f64>> {
    check_column_stochastic(q, "proposal matrix")?;
    let n = q.nrows();
    if p.len() != n {
        return Err(McmcError::ShapeMismatch(format!(
            "proposal matrix has {n} states but the target has {}",
            p.len()
        )));
    }
    if p.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
        return Err(McmcError::InvalidParameter(
            "target weights must be positive and finite".into(),
        ));
    }

    let mut m = DMatrix::zeros(n, n);
    for x in 0..n {
        let mut moved = 0.0;
        for y in (0..n).filter(|y| *y != x) {
            let forward = q[(y, x)];
            let backward = q[(x, y)] * p[y] / p[x];
            m[(y, x)] = forward.min(backward);
            moved += m[(y, x)];
        }
        m[(x, x)] = 1.0 - moved;
    }
    Ok(m)
}

/// Modulus of the eigenvalue of `m` with second largest modulus.
pub fn second_eigenvalue_modulus(m: &DMatrix<f64>) -> Result<f64> {
    check_column_stochastic(m, "transition matrix")?;
    if m.nrows() < 2 {
        return Err(McmcError::DegenerateDiagnosticInput(
            "a single state has no second eigenvalue".into(),
        ));
    }
    let mut moduli: Vec<f64> = m
        .complex_eigenvalues()
        .iter()
        .map(|lambda| lambda.norm())
        .collect();
    moduli.sort_by(|a, b| b.total_cmp(a));
    Ok(moduli[1])
}

/**
The asymptotic convergence rate `-ln |λ₂|` of the chain with transition matrix `m`.

Zero for a chain that never forgets its start (reducible or periodic), infinite for a chain
that reaches stationarity in one step.

# Errors

[`McmcError::InvalidParameter`] or [`McmcError::ShapeMismatch`] if `m` is not a square
column-stochastic matrix, [`McmcError::DegenerateDiagnosticInput`] for fewer than two
states.
*/
pub fn second_eigenvalue_gap(m: &DMatrix<f64>) -> Result<f64> {
    let modulus = second_eigenvalue_modulus(m)?;
    // Round-off can push a unit eigenvalue slightly above one.
    Ok(-modulus.min(1.0).ln())
}

/// [`second_eigenvalue_gap`] of the Metropolis chain built from proposal `q` and target `p`.
pub fn convergence_rate(q: &DMatrix<f64>, p: &[f64]) -> Result<f64> {
    second_eigenvalue_gap(&metropolis_matrix(q, p)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{grid, DiscreteTarget, GaussianMixture1D};
    use crate::proposal::{Boundary, NeighborProposal};
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;
    use proptest::prelude::*;

    /// Random column-stochastic matrix with strictly positive entries, and positive weights.
    fn chain_inputs() -> impl Strategy<Value = (DMatrix<f64>, Vec<f64>)> {
        (2usize..7).prop_flat_map(|n| {
            (
                prop::collection::vec(0.01f64..1.0, n * n),
                prop::collection::vec(0.01f64..10.0, n),
            )
                .prop_map(move |(raw, p)| {
                    let mut q = DMatrix::from_vec(n, n, raw);
                    for mut col in q.column_iter_mut() {
                        let total = col.sum();
                        col /= total;
                    }
                    (q, p)
                })
        })
    }

    proptest! {
        #[test]
        fn metropolis_matrix_satisfies_detailed_balance((q, p) in chain_inputs()) {
            let m = metropolis_matrix(&q, &p).unwrap();
            let n = p.len();
            for x in 0..n {
                for y in 0..n {
                    let flow = m[(y, x)] * p[x];
                    let back = m[(x, y)] * p[y];
                    prop_assert!((flow - back).abs() < 1e-12 * (1.0 + flow.abs()));
                }
            }
        }

        #[test]
        fn target_is_stationary((q, p) in chain_inputs()) {
            let m = metropolis_matrix(&q, &p).unwrap();
            let total: f64 = p.iter().sum();
            let pi = DVector::from_iterator(p.len(), p.iter().map(|w| w / total));
            let moved = &m * &pi;
            for (a, b) in moved.iter().zip(pi.iter()) {
                prop_assert!((a - b).abs() < 1e-12);
            }
            for col in m.column_iter() {
                prop_assert!((col.sum() - 1.0).abs() < 1e-12);
                prop_assert!(col.iter().all(|v| *v >= -1e-15));
            }
        }
    }

    #[test]
    fn two_state_chain_by_hand() {
        // Always propose the other state; p = (1, 3).
        let q = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let m = metropolis_matrix(&q, &[1.0, 3.0]).unwrap();
        assert_abs_diff_eq!(m[(1, 0)], 1.0);
        assert_abs_diff_eq!(m[(0, 1)], 1.0 / 3.0);
        assert_abs_diff_eq!(m[(1, 1)], 2.0 / 3.0);
        // Eigenvalues 1 and -1/3.
        assert_abs_diff_eq!(second_eigenvalue_modulus(&m).unwrap(), 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            second_eigenvalue_gap(&m).unwrap(),
            3f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn identity_never_converges() {
        let m = DMatrix::<f64>::identity(3, 3);
        assert_abs_diff_eq!(second_eigenvalue_gap(&m).unwrap(), 0.0);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let q = DMatrix::from_row_slice(2, 2, &[0.5, 0.5, 0.4, 0.5]);
        assert!(matches!(
            metropolis_matrix(&q, &[1.0, 1.0]),
            Err(McmcError::InvalidParameter(_))
        ));
        let q = DMatrix::from_element(2, 2, 0.5);
        assert!(matches!(
            metropolis_matrix(&q, &[1.0, 1.0, 1.0]),
            Err(McmcError::ShapeMismatch(_))
        ));
        assert!(matches!(
            metropolis_matrix(&q, &[1.0, 0.0]),
            Err(McmcError::InvalidParameter(_))
        ));
        assert!(matches!(
            second_eigenvalue_gap(&DMatrix::from_element(2, 3, 0.5)),
            Err(McmcError::ShapeMismatch(_))
        ));
        assert!(matches!(
            second_eigenvalue_gap(&DMatrix::from_element(1, 1, 1.0)),
            Err(McmcError::DegenerateDiagnosticInput(_))
        ));
    }

    #[test]
    fn neighbor_width_has_a_sweet_spot_on_the_bimodal_target() {
        let target = DiscreteTarget::discretize(&GaussianMixture1D::bimodal(), &grid(-10.0, 10.0, 101))
            .unwrap();
        let rate = |width| {
            let q = NeighborProposal::new(target.len(), width, Boundary::Reject)
                .unwrap()
                .transition_matrix();
            convergence_rate(&q, target.probs()).unwrap()
        };
        let narrow = rate(1);
        let medium = rate(40);
        let wide = rate(100);
        assert!(narrow < 1e-3, "narrow {narrow}");
        assert!(narrow < medium, "narrow {narrow} medium {medium}");
        assert!(wide < medium, "wide {wide} medium {medium}");
    }
}
