//! Filter configuration flags.
//!
//! The recognized bitmask values mirror the conventional taxonomy of
//! Kalman filter variants. Only the conventional filter is implemented;
//! every other filter-method bit is reserved and rejected up front.

use crate::error::KalmanError;

/// Conventional Kalman filter (the only implemented method).
pub const FILTER_CONVENTIONAL: u32 = 0x01;
/// Reserved: exact diffuse initialization.
pub const FILTER_EXACT_INITIAL: u32 = 0x02;
/// Reserved: augmented filter.
pub const FILTER_AUGMENTED: u32 = 0x04;
/// Reserved: square-root filter.
pub const FILTER_SQUARE_ROOT: u32 = 0x08;
/// Reserved: univariate treatment of multivariate observations.
pub const FILTER_UNIVARIATE: u32 = 0x10;
/// Reserved: collapsed observation vector.
pub const FILTER_COLLAPSED: u32 = 0x20;
/// Reserved: extended (nonlinear) filter.
pub const FILTER_EXTENDED: u32 = 0x40;
/// Reserved: unscented filter.
pub const FILTER_UNSCENTED: u32 = 0x80;

/// Scalar reciprocal when the effective observation dimension is 1.
pub const INVERT_UNIVARIATE: u32 = 0x01;
/// Solve against the LU factorization.
pub const SOLVE_LU: u32 = 0x02;
/// Form the explicit inverse via LU.
///
/// Prefer [`SOLVE_LU`] unless the explicit inverse is needed downstream;
/// the solve variant behaves better near singularity.
pub const INVERT_LU: u32 = 0x04;
/// Solve against the Cholesky factorization.
pub const SOLVE_CHOLESKY: u32 = 0x08;
/// Form the explicit inverse via Cholesky.
///
/// Prefer [`SOLVE_CHOLESKY`] unless the explicit inverse is needed
/// downstream; the solve variant behaves better near singularity.
pub const INVERT_CHOLESKY: u32 = 0x10;

pub(crate) const INVERSION_MULTIVARIATE: u32 =
    SOLVE_CHOLESKY | SOLVE_LU | INVERT_CHOLESKY | INVERT_LU;

/// Symmetrize the predicted state covariance after each step.
pub const STABILITY_FORCE_SYMMETRY: u32 = 0x01;

/// Collapse forecast / forecast-error storage to a rotating buffer.
pub const MEMORY_NO_FORECAST: u32 = 0x01;
/// Collapse predicted-state storage to a rotating buffer.
pub const MEMORY_NO_PREDICTED: u32 = 0x02;
/// Collapse filtered-state storage to a rotating buffer.
pub const MEMORY_NO_FILTERED: u32 = 0x04;
/// Accumulate the log-likelihood into a single scalar.
pub const MEMORY_NO_LIKELIHOOD: u32 = 0x08;

/// Everything conserved.
pub const MEMORY_CONSERVE: u32 =
    MEMORY_NO_FORECAST | MEMORY_NO_PREDICTED | MEMORY_NO_FILTERED | MEMORY_NO_LIKELIHOOD;

/// Default steady-state detection threshold.
pub const DEFAULT_TOLERANCE: f64 = 1e-19;

/// Runtime configuration for a [`KalmanFilter`](crate::KalmanFilter).
///
/// # Example
///
/// ```ignore
/// let opts = FilterOptions::new()
///     .with_inversion_method(SOLVE_LU)
///     .with_conserve_memory(MEMORY_CONSERVE)
///     .with_loglikelihood_burn(1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterOptions {
    /// Filter method bitmask; must equal [`FILTER_CONVENTIONAL`].
    pub filter_method: u32,
    /// Inversion method bitmask. The dispatcher picks, in precedence
    /// order: [`INVERT_UNIVARIATE`] (effective dimension 1 only), then
    /// [`SOLVE_CHOLESKY`], [`SOLVE_LU`], [`INVERT_CHOLESKY`],
    /// [`INVERT_LU`].
    pub inversion_method: u32,
    /// Numerical stability bitmask.
    pub stability_method: u32,
    /// Memory conservation bitmask.
    pub conserve_memory: u32,
    /// Steady-state detection threshold on `‖P_t − P_{t+1}‖²`.
    pub tolerance: f64,
    /// First period whose log-likelihood enters the accumulated total.
    pub loglikelihood_burn: usize,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            filter_method: FILTER_CONVENTIONAL,
            inversion_method: INVERT_UNIVARIATE | SOLVE_CHOLESKY,
            stability_method: STABILITY_FORCE_SYMMETRY,
            conserve_memory: 0,
            tolerance: DEFAULT_TOLERANCE,
            loglikelihood_burn: 0,
        }
    }
}

impl FilterOptions {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter method bitmask.
    pub fn with_filter_method(mut self, method: u32) -> Self {
        self.filter_method = method;
        self
    }

    /// Sets the inversion method bitmask.
    pub fn with_inversion_method(mut self, method: u32) -> Self {
        self.inversion_method = method;
        self
    }

    /// Sets the stability bitmask.
    pub fn with_stability_method(mut self, method: u32) -> Self {
        self.stability_method = method;
        self
    }

    /// Sets the memory conservation bitmask.
    pub fn with_conserve_memory(mut self, conserve: u32) -> Self {
        self.conserve_memory = conserve;
        self
    }

    /// Sets the steady-state detection threshold.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the log-likelihood burn-in.
    pub fn with_loglikelihood_burn(mut self, burn: usize) -> Self {
        self.loglikelihood_burn = burn;
        self
    }

    /// Whether a given conservation bit is set.
    pub(crate) fn conserves(&self, bit: u32) -> bool {
        self.conserve_memory & bit != 0
    }

    /// Validates the configuration against the observation dimension.
    pub(crate) fn validate(&self, k_endog: usize) -> Result<(), KalmanError> {
        if self.filter_method != FILTER_CONVENTIONAL {
            return Err(KalmanError::InvalidMethod {
                name: "filter_method",
                value: self.filter_method,
            });
        }
        // A univariate-only inversion mask cannot handle p > 1, and an
        // empty mask cannot handle anything.
        let multivariate_ok = self.inversion_method & INVERSION_MULTIVARIATE != 0;
        let univariate_ok = self.inversion_method & INVERT_UNIVARIATE != 0 && k_endog == 1;
        if !(multivariate_ok || univariate_ok) {
            return Err(KalmanError::InvalidMethod {
                name: "inversion_method",
                value: self.inversion_method,
            });
        }
        Ok(())
    }
}
