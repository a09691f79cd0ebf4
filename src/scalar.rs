//! Numeric field abstraction for the filter kernel.
//!
//! The recursion is written once, generically over [`Field`], and
//! instantiated for `f32`, `f64`, `Complex<f32>`, and `Complex<f64>`.
//! Complex instantiations deliberately mirror the real recursion: the
//! kernel uses plain (unconjugated) transposes and the symmetric
//! `L·Lᵀ` factorization, so symmetry rather than Hermitian symmetry is
//! the assumed structure. Conjugation appears only where a real
//! magnitude is required (missing detection, convergence norm).

use std::fmt::Debug;
use std::ops::Neg;

use ndarray::LinalgScalar;
use num_complex::Complex;
use num_traits::{Float, NumAssign};

/// Scalar field over which the filter operates.
///
/// Extends [`ndarray::LinalgScalar`] (what `general_mat_mul` needs) with
/// the handful of operations the kernel requires beyond ring arithmetic:
/// the principal logarithm and square root, magnitude, NaN detection for
/// the missing-data mask, and injection of real constants.
pub trait Field:
    LinalgScalar + NumAssign + Neg<Output = Self> + Debug + Send + Sync + 'static
{
    /// The underlying real type (`f32` or `f64`).
    type Real: Float + Debug + Send + Sync + 'static;

    /// Whether this field has a nonzero imaginary part.
    const COMPLEX: bool;

    /// Embeds a real scalar into the field.
    fn from_real(re: Self::Real) -> Self;

    /// Embeds an `f64` constant into the field (lossy for `f32`-based fields).
    fn from_f64(x: f64) -> Self;

    /// Converts an `f64` constant to the underlying real type.
    fn real_from_f64(x: f64) -> Self::Real;

    /// Real part.
    fn real(self) -> Self::Real;

    /// Modulus `|x|`.
    fn modulus(self) -> Self::Real;

    /// Squared modulus `|x|²` (conjugated product, always real).
    fn abs_sq(self) -> Self::Real;

    /// Complex conjugate (identity for real fields).
    fn conj(self) -> Self;

    /// Principal square root.
    fn sqrt(self) -> Self;

    /// Principal natural logarithm.
    fn ln(self) -> Self;

    /// NaN test; a NaN observation component marks it as missing.
    fn is_nan(self) -> bool;
}

macro_rules! impl_field_real {
    ($t:ty) => {
        impl Field for $t {
            type Real = $t;

            const COMPLEX: bool = false;

            #[inline(always)]
            fn from_real(re: $t) -> Self {
                re
            }

            #[inline(always)]
            fn from_f64(x: f64) -> Self {
                x as $t
            }

            #[inline(always)]
            fn real_from_f64(x: f64) -> $t {
                x as $t
            }

            #[inline(always)]
            fn real(self) -> $t {
                self
            }

            #[inline(always)]
            fn modulus(self) -> $t {
                <$t>::abs(self)
            }

            #[inline(always)]
            fn abs_sq(self) -> $t {
                self * self
            }

            #[inline(always)]
            fn conj(self) -> Self {
                self
            }

            #[inline(always)]
            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }

            #[inline(always)]
            fn ln(self) -> Self {
                <$t>::ln(self)
            }

            #[inline(always)]
            fn is_nan(self) -> bool {
                <$t>::is_nan(self)
            }
        }
    };
}

impl_field_real!(f32);
impl_field_real!(f64);

macro_rules! impl_field_complex {
    ($t:ty) => {
        impl Field for Complex<$t> {
            type Real = $t;

            const COMPLEX: bool = true;

            #[inline(always)]
            fn from_real(re: $t) -> Self {
                Complex::new(re, 0.0)
            }

            #[inline(always)]
            fn from_f64(x: f64) -> Self {
                Complex::new(x as $t, 0.0)
            }

            #[inline(always)]
            fn real_from_f64(x: f64) -> $t {
                x as $t
            }

            #[inline(always)]
            fn real(self) -> $t {
                self.re
            }

            #[inline(always)]
            fn modulus(self) -> $t {
                self.norm()
            }

            #[inline(always)]
            fn abs_sq(self) -> $t {
                self.norm_sqr()
            }

            #[inline(always)]
            fn conj(self) -> Self {
                Complex::conj(&self)
            }

            #[inline(always)]
            fn sqrt(self) -> Self {
                Complex::sqrt(self)
            }

            #[inline(always)]
            fn ln(self) -> Self {
                Complex::ln(self)
            }

            #[inline(always)]
            fn is_nan(self) -> bool {
                self.re.is_nan() || self.im.is_nan()
            }
        }
    };
}

impl_field_complex!(f32);
impl_field_complex!(f64);
