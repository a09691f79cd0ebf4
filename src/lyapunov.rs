//! Discrete Lyapunov solver for stationary initialization.
//!
//! Stationary initialization needs the fixed point of the covariance
//! recursion, `P = T·P·Tᵀ + Q*`. The engine does not fix the algorithm:
//! callers supply any [`LyapunovSolver`], and the crate ships
//! [`KroneckerLyapunov`], which vectorizes the equation and solves the
//! resulting `m² × m²` linear system by pivoted LU.

use ndarray::{Array1, Array2, ArrayView2};
use num_traits::One;

use crate::error::KalmanError;
use crate::linalg;
use crate::scalar::Field;

/// Solves the discrete Lyapunov equation `P − T·P·Tᵀ = Q` for `P`.
pub trait LyapunovSolver<F: Field> {
    /// Returns `P` such that `P = T·P·Tᵀ + Q`.
    ///
    /// # Errors
    ///
    /// Implementations report an unsolvable system (e.g. a unit root in
    /// `T`) as [`KalmanError::LinAlg`].
    fn solve(&self, t: ArrayView2<'_, F>, q: ArrayView2<'_, F>) -> Result<Array2<F>, KalmanError>;
}

/// Direct Lyapunov solver via Kronecker-product vectorization.
///
/// Builds `I_{m²} − T ⊗ T` and solves `(I − T⊗T)·vec(P) = vec(Q)` with
/// pivoted LU. Exact and simple; the `O(m⁶)` cost is paid once per
/// initialization, not per filter step. A near-unit-root transition
/// makes the system singular and surfaces as an error — callers wanting
/// a diffuse fallback can catch it and initialize approximately instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct KroneckerLyapunov;

impl<F: Field> LyapunovSolver<F> for KroneckerLyapunov {
    fn solve(&self, t: ArrayView2<'_, F>, q: ArrayView2<'_, F>) -> Result<Array2<F>, KalmanError> {
        let m = t.nrows();
        let m2 = m * m;

        // lhs = I_{m²} − T ⊗ T
        let kron = kron_product(t, t);
        let mut lhs = Array2::<F>::zeros((m2, m2));
        for i in 0..m2 {
            lhs[[i, i]] = F::one();
        }
        lhs = &lhs - &kron;

        // vec(Q), column-major
        let mut q_vec = Array1::<F>::zeros(m2);
        for col in 0..m {
            for row in 0..m {
                q_vec[col * m + row] = q[[row, col]];
            }
        }

        let mut perm = vec![0usize; m2];
        linalg::getrf(lhs.view_mut(), &mut perm)
            .map_err(|kind| KalmanError::LinAlg { period: 0, kind })?;
        linalg::getrs(lhs.view(), &perm, q_vec.view_mut());

        // Reshape vec(P) back to m × m (column-major)
        let mut p = Array2::<F>::zeros((m, m));
        for col in 0..m {
            for row in 0..m {
                p[[row, col]] = q_vec[col * m + row];
            }
        }
        Ok(p)
    }
}

/// Computes the Kronecker product `A ⊗ B`.
fn kron_product<F: Field>(a: ArrayView2<'_, F>, b: ArrayView2<'_, F>) -> Array2<F> {
    let (ar, ac) = (a.nrows(), a.ncols());
    let (br, bc) = (b.nrows(), b.ncols());
    let mut result = Array2::<F>::zeros((ar * br, ac * bc));
    for i in 0..ar {
        for j in 0..ac {
            let a_ij = a[[i, j]];
            for k in 0..br {
                for l in 0..bc {
                    result[[i * br + k, j * bc + l]] = a_ij * b[[k, l]];
                }
            }
        }
    }
    result
}
