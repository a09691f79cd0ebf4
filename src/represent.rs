//! State-space model container.
//!
//! Holds the system matrices of a (possibly time-varying) linear
//! Gaussian state-space model,
//!
//! ```text
//! y_t     = Z_t α_t + d_t + ε_t      ε_t ~ N(0, H_t)     (observation)
//! α_{t+1} = T_t α_t + c_t + R_t η_t  η_t ~ N(0, Q_t)     (state)
//! ```
//!
//! together with the observation sequence, the derived missing-data
//! mask, the selected state covariance `Q*_t = R_t Q_t R_tᵀ`, and the
//! initial state distribution. Each system matrix carries a trailing
//! time axis of extent 1 (time-invariant) or `nobs` (time-varying).
//!
//! The container validates shapes once at construction. Callers running
//! a likelihood search mutate the matrices in place between filter
//! invocations through the `*_mut` accessors, then re-`seek` their
//! filters; mutating `selection` or `state_cov` additionally requires
//! [`StateSpace::recompute_selected_state_cov`].

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut2, ArrayViewMut3, Axis};
use num_traits::{One, Zero};

use crate::error::KalmanError;
use crate::linalg;
use crate::lyapunov::LyapunovSolver;
use crate::scalar::Field;

/// Default prior variance for [`StateSpace::initialize_approximate_diffuse`].
pub const APPROXIMATE_DIFFUSE_VARIANCE: f64 = 1e2;

/// A linear Gaussian state-space model bound to one observation sequence.
///
/// Dimensions: `k_endog` observed series, `k_states` state elements,
/// `k_posdef` shock elements, `nobs` periods.
#[derive(Clone, Debug)]
pub struct StateSpace<F: Field> {
    k_endog: usize,
    k_states: usize,
    k_posdef: usize,
    nobs: usize,

    obs: Array2<F>,
    design: Array3<F>,
    obs_intercept: Array2<F>,
    obs_cov: Array3<F>,
    transition: Array3<F>,
    state_intercept: Array2<F>,
    selection: Array3<F>,
    state_cov: Array3<F>,
    selected_state_cov: Array3<F>,

    missing: Array2<u8>,
    nmissing: Vec<usize>,
    time_invariant: bool,

    initial_state: Option<Array1<F>>,
    initial_state_cov: Option<Array2<F>>,
}

fn check3<F: Field>(
    name: &'static str,
    a: &Array3<F>,
    d0: usize,
    d1: usize,
    nobs: usize,
) -> Result<(), KalmanError> {
    let sh = a.shape();
    if sh[0] != d0 || sh[1] != d1 || !(sh[2] == 1 || sh[2] == nobs) {
        return Err(KalmanError::InvalidShape {
            name,
            expected: format!("({d0}, {d1}, 1 or {nobs})"),
            got: format!("({}, {}, {})", sh[0], sh[1], sh[2]),
        });
    }
    Ok(())
}

fn check2<F: Field>(
    name: &'static str,
    a: &Array2<F>,
    d0: usize,
    nobs: usize,
) -> Result<(), KalmanError> {
    let sh = a.shape();
    if sh[0] != d0 || !(sh[1] == 1 || sh[1] == nobs) {
        return Err(KalmanError::InvalidShape {
            name,
            expected: format!("({d0}, 1 or {nobs})"),
            got: format!("({}, {})", sh[0], sh[1]),
        });
    }
    Ok(())
}

#[inline]
fn tdx(extent: usize, t: usize) -> usize {
    if extent == 1 {
        0
    } else {
        t
    }
}

impl<F: Field> StateSpace<F> {
    /// Builds a container from the system matrices and the observations.
    ///
    /// Dimensions are derived from the inputs: `k_endog` and `nobs` from
    /// `obs` (`k_endog × nobs`), `k_states` and `k_posdef` from
    /// `selection` (`k_states × k_posdef`). Every trailing time axis
    /// must have extent 1 or `nobs`. NaN entries of `obs` mark missing
    /// observations.
    ///
    /// The covariance matrices are assumed symmetric; this is not
    /// enforced.
    ///
    /// # Errors
    ///
    /// [`KalmanError::InvalidShape`] naming the first offending input.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        design: Array3<F>,
        obs_intercept: Array2<F>,
        obs_cov: Array3<F>,
        transition: Array3<F>,
        state_intercept: Array2<F>,
        selection: Array3<F>,
        state_cov: Array3<F>,
        obs: Array2<F>,
    ) -> Result<Self, KalmanError> {
        let k_endog = obs.nrows();
        let nobs = obs.ncols();
        if k_endog == 0 || nobs == 0 {
            return Err(KalmanError::InvalidShape {
                name: "obs",
                expected: "(k_endog >= 1, nobs >= 1)".into(),
                got: format!("({k_endog}, {nobs})"),
            });
        }
        let k_states = selection.shape()[0];
        let k_posdef = selection.shape()[1];
        if k_states == 0 || k_posdef == 0 {
            return Err(KalmanError::InvalidShape {
                name: "selection",
                expected: "(k_states >= 1, k_posdef >= 1, 1 or nobs)".into(),
                got: format!("{:?}", selection.shape()),
            });
        }

        check3("design", &design, k_endog, k_states, nobs)?;
        check2("obs_intercept", &obs_intercept, k_endog, nobs)?;
        check3("obs_cov", &obs_cov, k_endog, k_endog, nobs)?;
        check3("transition", &transition, k_states, k_states, nobs)?;
        check2("state_intercept", &state_intercept, k_states, nobs)?;
        check3("selection", &selection, k_states, k_posdef, nobs)?;
        check3("state_cov", &state_cov, k_posdef, k_posdef, nobs)?;

        let time_invariant = design.shape()[2] == 1
            && obs_intercept.shape()[1] == 1
            && obs_cov.shape()[2] == 1
            && transition.shape()[2] == 1
            && state_intercept.shape()[1] == 1
            && selection.shape()[2] == 1
            && state_cov.shape()[2] == 1;

        let missing = obs.mapv(|v| u8::from(v.is_nan()));
        let nmissing = (0..nobs)
            .map(|t| missing.column(t).iter().map(|&m| m as usize).sum())
            .collect();

        let mut model = Self {
            k_endog,
            k_states,
            k_posdef,
            nobs,
            obs,
            design,
            obs_intercept,
            obs_cov,
            transition,
            state_intercept,
            selection,
            state_cov,
            selected_state_cov: Array3::zeros((0, 0, 0)),
            missing,
            nmissing,
            time_invariant,
            initial_state: None,
            initial_state_cov: None,
        };
        model.recompute_selected_state_cov();
        Ok(model)
    }

    /// Recomputes `Q*_t = R_t Q_t R_tᵀ` for every stored time slice.
    ///
    /// Called automatically at construction. Callers that mutate
    /// `selection` or `state_cov` in place must call this before the
    /// next filter invocation.
    pub fn recompute_selected_state_cov(&mut self) {
        let m = self.k_states;
        let r = self.k_posdef;
        let n_r = self.selection.shape()[2];
        let n_q = self.state_cov.shape()[2];
        let n = n_r.max(n_q);

        if self.selected_state_cov.dim() != (m, m, n) {
            self.selected_state_cov = Array3::zeros((m, m, n));
        }
        let mut tmp = Array2::<F>::zeros((m, r));
        for t in 0..n {
            let r_t = self.selection.index_axis(Axis(2), tdx(n_r, t));
            let q_t = self.state_cov.index_axis(Axis(2), tdx(n_q, t));
            linalg::gemm(F::one(), &r_t, &q_t, F::zero(), &mut tmp.view_mut());
            let mut out = self.selected_state_cov.index_axis_mut(Axis(2), t);
            linalg::gemm(F::one(), &tmp.view(), &r_t.t(), F::zero(), &mut out);
        }
    }

    /// Observed series count `p`.
    pub fn k_endog(&self) -> usize {
        self.k_endog
    }

    /// State dimension `m`.
    pub fn k_states(&self) -> usize {
        self.k_states
    }

    /// Shock dimension `r`.
    pub fn k_posdef(&self) -> usize {
        self.k_posdef
    }

    /// Number of periods `T`.
    pub fn nobs(&self) -> usize {
        self.nobs
    }

    /// True iff every system matrix has trailing extent 1.
    pub fn time_invariant(&self) -> bool {
        self.time_invariant
    }

    /// Number of missing observation components at period `t`.
    pub fn nmissing(&self, t: usize) -> usize {
        self.nmissing[t]
    }

    /// Missing mask column at period `t` (1 = missing).
    pub fn missing_at(&self, t: usize) -> ArrayView1<'_, u8> {
        self.missing.column(t)
    }

    /// Observation column at period `t`.
    pub fn obs_at(&self, t: usize) -> ArrayView1<'_, F> {
        self.obs.column(t)
    }

    /// Design slice `Z_t`.
    pub fn design_at(&self, t: usize) -> ArrayView2<'_, F> {
        self.design.index_axis(Axis(2), tdx(self.design.shape()[2], t))
    }

    /// Observation intercept slice `d_t`.
    pub fn obs_intercept_at(&self, t: usize) -> ArrayView1<'_, F> {
        self.obs_intercept
            .column(tdx(self.obs_intercept.shape()[1], t))
    }

    /// Observation covariance slice `H_t`.
    pub fn obs_cov_at(&self, t: usize) -> ArrayView2<'_, F> {
        self.obs_cov.index_axis(Axis(2), tdx(self.obs_cov.shape()[2], t))
    }

    /// Transition slice `T_t`.
    pub fn transition_at(&self, t: usize) -> ArrayView2<'_, F> {
        self.transition
            .index_axis(Axis(2), tdx(self.transition.shape()[2], t))
    }

    /// State intercept slice `c_t`.
    pub fn state_intercept_at(&self, t: usize) -> ArrayView1<'_, F> {
        self.state_intercept
            .column(tdx(self.state_intercept.shape()[1], t))
    }

    /// Selection slice `R_t`.
    pub fn selection_at(&self, t: usize) -> ArrayView2<'_, F> {
        self.selection
            .index_axis(Axis(2), tdx(self.selection.shape()[2], t))
    }

    /// State covariance slice `Q_t`.
    pub fn state_cov_at(&self, t: usize) -> ArrayView2<'_, F> {
        self.state_cov
            .index_axis(Axis(2), tdx(self.state_cov.shape()[2], t))
    }

    /// Selected state covariance slice `Q*_t = R_t Q_t R_tᵀ`.
    pub fn selected_state_cov_at(&self, t: usize) -> ArrayView2<'_, F> {
        self.selected_state_cov
            .index_axis(Axis(2), tdx(self.selected_state_cov.shape()[2], t))
    }

    /// Mutable view of the design tensor.
    pub fn design_mut(&mut self) -> ArrayViewMut3<'_, F> {
        self.design.view_mut()
    }

    /// Mutable view of the observation intercept.
    pub fn obs_intercept_mut(&mut self) -> ArrayViewMut2<'_, F> {
        self.obs_intercept.view_mut()
    }

    /// Mutable view of the observation covariance tensor.
    pub fn obs_cov_mut(&mut self) -> ArrayViewMut3<'_, F> {
        self.obs_cov.view_mut()
    }

    /// Mutable view of the transition tensor.
    pub fn transition_mut(&mut self) -> ArrayViewMut3<'_, F> {
        self.transition.view_mut()
    }

    /// Mutable view of the state intercept.
    pub fn state_intercept_mut(&mut self) -> ArrayViewMut2<'_, F> {
        self.state_intercept.view_mut()
    }

    /// Mutable view of the selection tensor.
    ///
    /// Call [`StateSpace::recompute_selected_state_cov`] after mutating.
    pub fn selection_mut(&mut self) -> ArrayViewMut3<'_, F> {
        self.selection.view_mut()
    }

    /// Mutable view of the state covariance tensor.
    ///
    /// Call [`StateSpace::recompute_selected_state_cov`] after mutating.
    pub fn state_cov_mut(&mut self) -> ArrayViewMut3<'_, F> {
        self.state_cov.view_mut()
    }

    /// Whether an initial state distribution has been set.
    pub fn initialized(&self) -> bool {
        self.initial_state.is_some() && self.initial_state_cov.is_some()
    }

    /// Initial state mean `a₁`, if initialized.
    pub fn initial_state(&self) -> Option<&Array1<F>> {
        self.initial_state.as_ref()
    }

    /// Initial state covariance `P₁`, if initialized.
    pub fn initial_state_cov(&self) -> Option<&Array2<F>> {
        self.initial_state_cov.as_ref()
    }

    /// Initializes with a known state distribution.
    ///
    /// # Errors
    ///
    /// [`KalmanError::InvalidShape`] if `initial_state` is not length
    /// `k_states` or `initial_state_cov` is not `k_states × k_states`.
    pub fn initialize_known(
        &mut self,
        initial_state: Array1<F>,
        initial_state_cov: Array2<F>,
    ) -> Result<(), KalmanError> {
        let m = self.k_states;
        if initial_state.len() != m {
            return Err(KalmanError::InvalidShape {
                name: "initial_state",
                expected: format!("({m},)"),
                got: format!("({},)", initial_state.len()),
            });
        }
        if initial_state_cov.dim() != (m, m) {
            return Err(KalmanError::InvalidShape {
                name: "initial_state_cov",
                expected: format!("({m}, {m})"),
                got: format!(
                    "({}, {})",
                    initial_state_cov.nrows(),
                    initial_state_cov.ncols()
                ),
            });
        }
        self.initial_state = Some(initial_state);
        self.initial_state_cov = Some(initial_state_cov);
        Ok(())
    }

    /// Initializes with `a₁ = 0` and `P₁ = variance · I`.
    ///
    /// A crude stand-in for proper diffuse handling: combined with the
    /// conventional filter it carries a known loss of precision in the
    /// first periods, so treat it as an exploratory device (and consider
    /// burning those periods out of the likelihood). The conventional
    /// choice of `variance` is [`APPROXIMATE_DIFFUSE_VARIANCE`].
    pub fn initialize_approximate_diffuse(&mut self, variance: f64) {
        let m = self.k_states;
        let mut cov = Array2::<F>::zeros((m, m));
        let v = F::from_f64(variance);
        for i in 0..m {
            cov[[i, i]] = v;
        }
        self.initial_state = Some(Array1::zeros(m));
        self.initial_state_cov = Some(cov);
    }

    /// Initializes with the stationary distribution of the state.
    ///
    /// Sets `a₁ = 0` and solves `P₁ − T₀ P₁ T₀ᵀ = Q*₀` with the supplied
    /// solver. For time-varying models the `t = 0` slices of
    /// `transition`, `selection`, and `state_cov` are used.
    ///
    /// # Errors
    ///
    /// Propagates the solver's error for non-stationary systems.
    pub fn initialize_stationary(
        &mut self,
        solver: &dyn LyapunovSolver<F>,
    ) -> Result<(), KalmanError> {
        let p1 = solver.solve(self.transition_at(0), self.selected_state_cov_at(0))?;
        self.initial_state = Some(Array1::zeros(self.k_states));
        self.initial_state_cov = Some(p1);
        Ok(())
    }
}
