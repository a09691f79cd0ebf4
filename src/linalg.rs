//! Dense linear-algebra adapter for the filter kernel.
//!
//! A narrow, typed surface over the operations the recursion needs:
//! level-2/3 products delegate to [`ndarray::linalg`], while the
//! factorizations (`potrf`/`potrs`/`potri`, `getrf`/`getrs`/`getri`)
//! are implemented in place over column views, generically for every
//! [`Field`]. The Cholesky routines factor `A = L·Lᵀ` without
//! conjugation, so complex inputs are treated as symmetric rather than
//! Hermitian; the recursion relies on that contract.
//!
//! Factorization failures map onto [`LinAlgKind`]: a bad pivot in
//! `potrf` means the covariance was not positive definite, a zero pivot
//! in `getrf` means it was singular. The caller attaches the period.

use ndarray::linalg::{general_mat_mul, general_mat_vec_mul};
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};
use num_traits::{One, Zero};

use crate::error::LinAlgKind;
use crate::scalar::Field;

/// `C := alpha * A * B + beta * C`.
#[inline]
pub(crate) fn gemm<F: Field>(
    alpha: F,
    a: &ArrayView2<'_, F>,
    b: &ArrayView2<'_, F>,
    beta: F,
    c: &mut ArrayViewMut2<'_, F>,
) {
    general_mat_mul(alpha, a, b, beta, c);
}

/// `y := alpha * A * x + beta * y`.
#[inline]
pub(crate) fn gemv<F: Field>(
    alpha: F,
    a: &ArrayView2<'_, F>,
    x: &ArrayView1<'_, F>,
    beta: F,
    y: &mut ArrayViewMut1<'_, F>,
) {
    general_mat_vec_mul(alpha, a, x, beta, y);
}

/// Unconjugated inner product `xᵀ·y`.
#[inline]
pub(crate) fn dotu<F: Field>(x: ArrayView1<'_, F>, y: ArrayView1<'_, F>) -> F {
    let mut acc = F::zero();
    for (a, b) in x.iter().zip(y.iter()) {
        acc = acc + *a * *b;
    }
    acc
}

/// Symmetric Cholesky factorization in place: `A = L·Lᵀ`.
///
/// On return the lower triangle of `a` (including the diagonal) holds
/// `L`; the upper triangle is left unchanged. No conjugation is applied,
/// so a complex symmetric input factors the same way a real one does.
pub(crate) fn potrf<F: Field>(mut a: ArrayViewMut2<'_, F>) -> Result<(), LinAlgKind> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(LinAlgKind::InvalidArgument);
    }

    for j in 0..n {
        let mut d = a[[j, j]];
        for k in 0..j {
            let l = a[[j, k]];
            d = d - l * l;
        }
        let bad = if F::COMPLEX {
            d.modulus() <= F::Real::zero()
        } else {
            d.real() <= F::Real::zero()
        };
        if bad {
            return Err(LinAlgKind::NotPositiveDefinite);
        }
        let ljj = d.sqrt();
        a[[j, j]] = ljj;

        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s = s - a[[i, k]] * a[[j, k]];
            }
            a[[i, j]] = s / ljj;
        }
    }

    Ok(())
}

/// Solves `L·Lᵀ·x = b` in place given the factor from [`potrf`].
pub(crate) fn potrs<F: Field>(l: ArrayView2<'_, F>, mut b: ArrayViewMut1<'_, F>) {
    let n = l.nrows();

    // Forward: L*y = b
    for i in 0..n {
        let mut s = b[i];
        for j in 0..i {
            s = s - l[[i, j]] * b[j];
        }
        b[i] = s / l[[i, i]];
    }

    // Back: Lᵀ*x = y (unconjugated transpose)
    for i in (0..n).rev() {
        let mut s = b[i];
        for j in (i + 1)..n {
            s = s - l[[j, i]] * b[j];
        }
        b[i] = s / l[[i, i]];
    }
}

/// Solves `L·Lᵀ·X = B` column by column, in place.
pub(crate) fn potrs_multi<F: Field>(l: ArrayView2<'_, F>, mut b: ArrayViewMut2<'_, F>) {
    for col in 0..b.ncols() {
        potrs(l, b.column_mut(col));
    }
}

/// Computes the full inverse from a [`potrf`] factor into `out`.
pub(crate) fn potri<F: Field>(l: ArrayView2<'_, F>, mut out: ArrayViewMut2<'_, F>) {
    let n = l.nrows();
    out.fill(F::zero());
    for i in 0..n {
        out[[i, i]] = F::one();
    }
    potrs_multi(l, out);
}

/// Determinant of the matrix factored by [`potrf`]: `(∏ L_ii)²`.
pub(crate) fn det_from_potrf<F: Field>(l: ArrayView2<'_, F>) -> F {
    let mut d = F::one();
    for i in 0..l.nrows() {
        d = d * l[[i, i]];
    }
    d * d
}

/// LU factorization with partial pivoting, in place.
///
/// On return `a` holds L (strict lower triangle, unit diagonal implied)
/// and U (upper triangle) packed together, with rows physically swapped;
/// `perm` records the pivot order. Returns `true` if the number of row
/// swaps was even, which fixes the determinant's sign.
pub(crate) fn getrf<F: Field>(
    mut a: ArrayViewMut2<'_, F>,
    perm: &mut [usize],
) -> Result<bool, LinAlgKind> {
    let n = a.nrows();
    if a.ncols() != n || perm.len() < n {
        return Err(LinAlgKind::InvalidArgument);
    }

    for (i, p) in perm.iter_mut().enumerate().take(n) {
        *p = i;
    }
    let mut even = true;

    for col in 0..n {
        // Partial pivoting: largest modulus in this column
        let mut max_row = col;
        let mut max_val = a[[col, col]].modulus();
        for row in (col + 1)..n {
            let val = a[[row, col]].modulus();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }
        if max_val <= F::Real::zero() {
            return Err(LinAlgKind::Singular);
        }

        if max_row != col {
            perm.swap(col, max_row);
            for j in 0..n {
                let tmp = a[[col, j]];
                a[[col, j]] = a[[max_row, j]];
                a[[max_row, j]] = tmp;
            }
            even = !even;
        }

        let pivot = a[[col, col]];
        for row in (col + 1)..n {
            let factor = a[[row, col]] / pivot;
            a[[row, col]] = factor;
            for j in (col + 1)..n {
                let u = a[[col, j]];
                let cur = a[[row, j]];
                a[[row, j]] = cur - factor * u;
            }
        }
    }

    Ok(even)
}

/// Solves `A·x = b` in place given the packed factorization from [`getrf`].
pub(crate) fn getrs<F: Field>(
    lu: ArrayView2<'_, F>,
    perm: &[usize],
    mut b: ArrayViewMut1<'_, F>,
) {
    let n = lu.nrows();

    // Apply the permutation, then forward-substitute L*y = P*b
    let permuted: Vec<F> = (0..n).map(|i| b[perm[i]]).collect();
    for i in 0..n {
        let mut s = permuted[i];
        for j in 0..i {
            s = s - lu[[i, j]] * b[j];
        }
        b[i] = s;
    }

    // Back-substitute U*x = y
    for i in (0..n).rev() {
        let mut s = b[i];
        for j in (i + 1)..n {
            s = s - lu[[i, j]] * b[j];
        }
        b[i] = s / lu[[i, i]];
    }
}

/// Solves `A·X = B` column by column, in place.
pub(crate) fn getrs_multi<F: Field>(
    lu: ArrayView2<'_, F>,
    perm: &[usize],
    mut b: ArrayViewMut2<'_, F>,
) {
    for col in 0..b.ncols() {
        getrs(lu, perm, b.column_mut(col));
    }
}

/// Computes the full inverse from a [`getrf`] factorization into `out`.
pub(crate) fn getri<F: Field>(
    lu: ArrayView2<'_, F>,
    perm: &[usize],
    mut out: ArrayViewMut2<'_, F>,
) {
    let n = lu.nrows();
    out.fill(F::zero());
    for i in 0..n {
        out[[i, i]] = F::one();
    }
    getrs_multi(lu, perm, out);
}

/// Determinant from a [`getrf`] factorization: `±∏ U_ii`.
pub(crate) fn det_from_getrf<F: Field>(lu: ArrayView2<'_, F>, even: bool) -> F {
    let mut d = F::one();
    for i in 0..lu.nrows() {
        d = d * lu[[i, i]];
    }
    if even {
        d
    } else {
        -d
    }
}
