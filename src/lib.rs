//! # ssm-kalman
//!
//! Kalman filter engine for linear Gaussian state-space models,
//!
//! ```text
//! y_t     = Z_t α_t + d_t + ε_t      ε_t ~ N(0, H_t)
//! α_{t+1} = T_t α_t + c_t + R_t η_t  η_t ~ N(0, Q_t)
//! ```
//!
//! producing one-step-ahead forecasts, filtered and predicted state
//! estimates, and the incremental log-likelihood of the observations.
//! Built to sit inside a likelihood-maximization loop: the container is
//! constructed once, the caller mutates the system matrices between
//! filter invocations, and time-invariant models short-circuit all
//! covariance work once the recursion reaches its steady state.
//!
//! ## Workflow
//!
//! ```mermaid
//! graph LR
//!     A["StateSpace::new(Z, d, H, T, c, R, Q, y)"] --> B["initialize_*"]
//!     B --> C["KalmanFilter::new(&model, opts)"]
//!     C -->|".run(&model)?"| D["forecasts / states / log-likelihood"]
//!     D -->|"mutate matrices, .seek(0)"| C
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let mut model = StateSpace::new(design, d, h, transition, c, r, q, obs)?;
//! model.initialize_stationary(&KroneckerLyapunov)?;
//! let mut filter = KalmanFilter::new(&model, FilterOptions::default())?;
//! filter.run(&model)?;
//! println!("log L = {}", filter.loglikelihood_total());
//! ```
//!
//! ## Mathematical Glossary
//!
//! | Symbol | Accessor | Meaning |
//! |--------|----------|---------|
//! | `v_t` | [`KalmanFilter::forecast_error`] | one-step forecast error `y_t − Z_t a_t − d_t` |
//! | `F_t` | [`KalmanFilter::forecast_error_cov`] | forecast-error covariance `Z_t P_t Z_tᵀ + H_t` |
//! | `a_t, P_t` | [`KalmanFilter::predicted_state`], [`KalmanFilter::predicted_state_cov`] | prior (predicted) state distribution |
//! | `a_{t\|t}, P_{t\|t}` | [`KalmanFilter::filtered_state`], [`KalmanFilter::filtered_state_cov`] | posterior (filtered) state distribution |
//! | `Q*_t` | [`StateSpace::selected_state_cov_at`] | selected state covariance `R_t Q_t R_tᵀ` |
//! | `ℓ_t` | [`KalmanFilter::loglikelihood`] | period log-likelihood contribution |
//!
//! Missing observations are marked by NaN components of `y`; a period
//! may be fully observed, partially missing (the filter re-selects the
//! observed subsystem), or entirely missing (the posterior equals the
//! prior and the period contributes zero likelihood).

mod error;
mod filter;
mod lyapunov;
mod options;
mod represent;

pub(crate) mod kernel;
pub(crate) mod linalg;
pub(crate) mod scalar;

pub use error::{KalmanError, LinAlgKind};
pub use filter::KalmanFilter;
pub use lyapunov::{KroneckerLyapunov, LyapunovSolver};
pub use options::{
    FilterOptions, DEFAULT_TOLERANCE, FILTER_AUGMENTED, FILTER_COLLAPSED, FILTER_CONVENTIONAL,
    FILTER_EXACT_INITIAL, FILTER_EXTENDED, FILTER_SQUARE_ROOT, FILTER_UNIVARIATE,
    FILTER_UNSCENTED, INVERT_CHOLESKY, INVERT_LU, INVERT_UNIVARIATE, MEMORY_CONSERVE,
    MEMORY_NO_FILTERED, MEMORY_NO_FORECAST, MEMORY_NO_LIKELIHOOD, MEMORY_NO_PREDICTED,
    SOLVE_CHOLESKY, SOLVE_LU, STABILITY_FORCE_SYMMETRY,
};
pub use represent::{StateSpace, APPROXIMATE_DIFFUSE_VARIANCE};
pub use scalar::Field;
