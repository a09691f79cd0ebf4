//! Per-step kernels of the conventional Kalman recursion.
//!
//! Each phase of a step is a free function over explicit array views:
//! the driver selects the variant (conventional / all-missing) and the
//! inversion kernel per period, then threads the effective observation
//! dimension through the views it slices. Covariance-producing work is
//! passed as an `Option` so the steady-state fast path can skip it while
//! the mean recursions keep running.
//!
//! All products use plain transposes; see [`crate::scalar`] for the
//! symmetry contract on complex fields.

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};
use num_traits::{One, Zero};

use crate::error::LinAlgKind;
use crate::linalg;
use crate::options::{INVERT_CHOLESKY, INVERT_LU, INVERT_UNIVARIATE, SOLVE_CHOLESKY, SOLVE_LU};
use crate::scalar::Field;

/// The closed set of forecast-error inversion kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Inversion {
    /// Scalar reciprocal (effective dimension 1).
    Univariate,
    /// Cholesky factorization, solve form.
    CholeskySolve,
    /// Cholesky factorization, explicit inverse.
    CholeskyInvert,
    /// LU factorization, solve form.
    LuSolve,
    /// LU factorization, explicit inverse.
    LuInvert,
}

impl Inversion {
    /// Picks the kernel for this period. First match wins:
    /// univariate (only when `p_eff == 1`), then Cholesky solve, LU
    /// solve, Cholesky invert, LU invert.
    pub(crate) fn select(mask: u32, p_eff: usize) -> Self {
        if p_eff == 1 && mask & INVERT_UNIVARIATE != 0 {
            Inversion::Univariate
        } else if mask & SOLVE_CHOLESKY != 0 {
            Inversion::CholeskySolve
        } else if mask & SOLVE_LU != 0 {
            Inversion::LuSolve
        } else if mask & INVERT_CHOLESKY != 0 {
            Inversion::CholeskyInvert
        } else {
            // Mask validity is checked at filter construction, so the
            // only remaining bit is INVERT_LU.
            Inversion::LuInvert
        }
    }
}

/// Phase F: one-step-ahead forecast.
///
/// Computes `ŷ = Z a + d`, `v = y − ŷ`, and `tmp1 = P Zᵀ`. When
/// `forecast_error_cov` is supplied (not converged) also forms
/// `F = Z·tmp1 + H`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn forecast_conventional<F: Field>(
    z: ArrayView2<'_, F>,
    d: ArrayView1<'_, F>,
    h: ArrayView2<'_, F>,
    y: ArrayView1<'_, F>,
    a: ArrayView1<'_, F>,
    p: ArrayView2<'_, F>,
    mut forecast: ArrayViewMut1<'_, F>,
    mut forecast_error: ArrayViewMut1<'_, F>,
    mut tmp1: ArrayViewMut2<'_, F>,
    forecast_error_cov: Option<ArrayViewMut2<'_, F>>,
) {
    forecast.assign(&d);
    linalg::gemv(F::one(), &z, &a, F::one(), &mut forecast);
    for (e, (yi, fi)) in forecast_error
        .iter_mut()
        .zip(y.iter().zip(forecast.iter()))
    {
        *e = *yi - *fi;
    }

    linalg::gemm(F::one(), &p, &z.t(), F::zero(), &mut tmp1);
    if let Some(mut fcov) = forecast_error_cov {
        fcov.assign(&h);
        linalg::gemm(F::one(), &z, &tmp1.view(), F::one(), &mut fcov);
    }
}

/// Phase F, all observations missing: forecast quantities are zero.
pub(crate) fn forecast_missing<F: Field>(
    mut forecast: ArrayViewMut1<'_, F>,
    mut forecast_error: ArrayViewMut1<'_, F>,
    mut forecast_error_cov: ArrayViewMut2<'_, F>,
) {
    forecast.fill(F::zero());
    forecast_error.fill(F::zero());
    forecast_error_cov.fill(F::zero());
}

/// Phase I, scalar case: `tmp2 = v/F`, `tmp3 = Z/F`, determinant `F`.
pub(crate) fn inverse_univariate<F: Field>(
    fcov: ArrayView2<'_, F>,
    v: ArrayView1<'_, F>,
    z: ArrayView2<'_, F>,
    mut tmp2: ArrayViewMut1<'_, F>,
    mut tmp3: ArrayViewMut2<'_, F>,
) -> Result<F, LinAlgKind> {
    let f = fcov[[0, 0]];
    if f.modulus() <= F::Real::zero() {
        return Err(LinAlgKind::Singular);
    }
    let inv = F::one() / f;
    tmp2[0] = v[0] * inv;
    for j in 0..z.ncols() {
        tmp3[[0, j]] = z[[0, j]] * inv;
    }
    Ok(f)
}

/// Phase I, Cholesky solve form.
///
/// When `refactor` is false the retained factor in `fac` is reused and
/// `prev_det` is returned unchanged; the solves always run since `v`
/// changes every period.
#[allow(clippy::too_many_arguments)]
pub(crate) fn inverse_cholesky_solve<F: Field>(
    fcov: ArrayView2<'_, F>,
    v: ArrayView1<'_, F>,
    z: ArrayView2<'_, F>,
    mut fac: ArrayViewMut2<'_, F>,
    mut tmp2: ArrayViewMut1<'_, F>,
    mut tmp3: ArrayViewMut2<'_, F>,
    refactor: bool,
    prev_det: F,
) -> Result<F, LinAlgKind> {
    let det = if refactor {
        fac.assign(&fcov);
        linalg::potrf(fac.view_mut())?;
        linalg::det_from_potrf(fac.view())
    } else {
        prev_det
    };
    tmp2.assign(&v);
    linalg::potrs(fac.view(), tmp2.view_mut());
    tmp3.assign(&z);
    linalg::potrs_multi(fac.view(), tmp3.view_mut());
    Ok(det)
}

/// Phase I, Cholesky explicit-inverse form. Leaves `F⁻¹` in `work`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn inverse_cholesky_invert<F: Field>(
    fcov: ArrayView2<'_, F>,
    v: ArrayView1<'_, F>,
    z: ArrayView2<'_, F>,
    mut fac: ArrayViewMut2<'_, F>,
    mut work: ArrayViewMut2<'_, F>,
    mut tmp2: ArrayViewMut1<'_, F>,
    mut tmp3: ArrayViewMut2<'_, F>,
    refactor: bool,
    prev_det: F,
) -> Result<F, LinAlgKind> {
    let det = if refactor {
        fac.assign(&fcov);
        linalg::potrf(fac.view_mut())?;
        linalg::potri(fac.view(), work.view_mut());
        linalg::det_from_potrf(fac.view())
    } else {
        prev_det
    };
    linalg::gemv(F::one(), &work.view(), &v, F::zero(), &mut tmp2);
    linalg::gemm(F::one(), &work.view(), &z, F::zero(), &mut tmp3);
    Ok(det)
}

/// Phase I, LU solve form.
#[allow(clippy::too_many_arguments)]
pub(crate) fn inverse_lu_solve<F: Field>(
    fcov: ArrayView2<'_, F>,
    v: ArrayView1<'_, F>,
    z: ArrayView2<'_, F>,
    mut fac: ArrayViewMut2<'_, F>,
    ipiv: &mut [usize],
    mut tmp2: ArrayViewMut1<'_, F>,
    mut tmp3: ArrayViewMut2<'_, F>,
    refactor: bool,
    prev_det: F,
) -> Result<F, LinAlgKind> {
    let det = if refactor {
        fac.assign(&fcov);
        let even = linalg::getrf(fac.view_mut(), ipiv)?;
        linalg::det_from_getrf(fac.view(), even)
    } else {
        prev_det
    };
    tmp2.assign(&v);
    linalg::getrs(fac.view(), ipiv, tmp2.view_mut());
    tmp3.assign(&z);
    linalg::getrs_multi(fac.view(), ipiv, tmp3.view_mut());
    Ok(det)
}

/// Phase I, LU explicit-inverse form. Leaves `F⁻¹` in `work`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn inverse_lu_invert<F: Field>(
    fcov: ArrayView2<'_, F>,
    v: ArrayView1<'_, F>,
    z: ArrayView2<'_, F>,
    mut fac: ArrayViewMut2<'_, F>,
    ipiv: &mut [usize],
    mut work: ArrayViewMut2<'_, F>,
    mut tmp2: ArrayViewMut1<'_, F>,
    mut tmp3: ArrayViewMut2<'_, F>,
    refactor: bool,
    prev_det: F,
) -> Result<F, LinAlgKind> {
    let det = if refactor {
        fac.assign(&fcov);
        let even = linalg::getrf(fac.view_mut(), ipiv)?;
        let d = linalg::det_from_getrf(fac.view(), even);
        linalg::getri(fac.view(), ipiv, work.view_mut());
        d
    } else {
        prev_det
    };
    linalg::gemv(F::one(), &work.view(), &v, F::zero(), &mut tmp2);
    linalg::gemm(F::one(), &work.view(), &z, F::zero(), &mut tmp3);
    Ok(det)
}

/// Phase U: posterior mean, and covariance unless converged.
///
/// `a_{t|t} = a + tmp1·tmp2`; with the covariance part,
/// `tmp0 = tmp1·tmp3` and `P_{t|t} = P − tmp0·P`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn updating_conventional<F: Field>(
    a: ArrayView1<'_, F>,
    p: ArrayView2<'_, F>,
    tmp1: ArrayView2<'_, F>,
    tmp2: ArrayView1<'_, F>,
    tmp3: ArrayView2<'_, F>,
    mut filtered_state: ArrayViewMut1<'_, F>,
    cov: Option<(ArrayViewMut2<'_, F>, ArrayViewMut2<'_, F>)>,
) {
    filtered_state.assign(&a);
    linalg::gemv(F::one(), &tmp1, &tmp2, F::one(), &mut filtered_state);

    if let Some((mut tmp0, mut filtered_cov)) = cov {
        linalg::gemm(F::one(), &tmp1, &tmp3, F::zero(), &mut tmp0);
        filtered_cov.assign(&p);
        linalg::gemm(-F::one(), &tmp0.view(), &p, F::one(), &mut filtered_cov);
    }
}

/// Phase U, all observations missing: the posterior equals the prior.
pub(crate) fn updating_missing<F: Field>(
    a: ArrayView1<'_, F>,
    p: ArrayView2<'_, F>,
    mut filtered_state: ArrayViewMut1<'_, F>,
    mut filtered_state_cov: ArrayViewMut2<'_, F>,
) {
    filtered_state.assign(&a);
    filtered_state_cov.assign(&p);
}

/// Phase L: `ℓ_t = −½ (p_eff·ln 2π + ln det + vᵀ·tmp2)`.
///
/// The quadratic form is the unconjugated `dotu`; for complex fields the
/// log-determinant takes the principal branch.
pub(crate) fn loglikelihood_conventional<F: Field>(
    p_eff: usize,
    det: F,
    v: ArrayView1<'_, F>,
    tmp2: ArrayView1<'_, F>,
) -> F {
    let ln_2pi = F::from_f64((2.0 * std::f64::consts::PI).ln());
    let quad = linalg::dotu(v, tmp2);
    -F::from_f64(0.5) * (F::from_f64(p_eff as f64) * ln_2pi + det.ln() + quad)
}

/// Phase P: next prior, and covariance unless converged.
///
/// `a_{t+1} = T·a_{t|t} + c`; with the covariance part,
/// `tmp0 = T·P_{t|t}` and `P_{t+1} = tmp0·Tᵀ + Q*`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn prediction_conventional<F: Field>(
    t_mat: ArrayView2<'_, F>,
    c: ArrayView1<'_, F>,
    filtered_state: ArrayView1<'_, F>,
    filtered_state_cov: ArrayView2<'_, F>,
    selected_state_cov: ArrayView2<'_, F>,
    mut predicted_state: ArrayViewMut1<'_, F>,
    cov: Option<(ArrayViewMut2<'_, F>, ArrayViewMut2<'_, F>)>,
) {
    predicted_state.assign(&c);
    linalg::gemv(F::one(), &t_mat, &filtered_state, F::one(), &mut predicted_state);

    if let Some((mut tmp0, mut predicted_cov)) = cov {
        linalg::gemm(F::one(), &t_mat, &filtered_state_cov, F::zero(), &mut tmp0);
        predicted_cov.assign(&selected_state_cov);
        linalg::gemm(F::one(), &tmp0.view(), &t_mat.t(), F::one(), &mut predicted_cov);
    }
}

/// Phase N: symmetrize `P` by averaging with its transpose, in place.
pub(crate) fn symmetrize<F: Field>(mut p: ArrayViewMut2<'_, F>) {
    let n = p.nrows();
    let half = F::from_f64(0.5);
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = (p[[i, j]] + p[[j, i]]) * half;
            p[[i, j]] = avg;
            p[[j, i]] = avg;
        }
    }
}

/// Squared Frobenius norm of `P₀ − P₁`, with conjugated magnitudes so
/// the statistic is real for every field.
pub(crate) fn cov_diff_norm_sq<F: Field>(
    p0: ArrayView2<'_, F>,
    p1: ArrayView2<'_, F>,
) -> F::Real {
    let mut acc = F::Real::zero();
    for (a, b) in p0.iter().zip(p1.iter()) {
        acc = acc + (*a - *b).abs_sq();
    }
    acc
}
