//! Kalman filter workspace and iteration driver.
//!
//! A [`KalmanFilter`] owns every output buffer and scratch matrix for
//! one pass over a [`StateSpace`]'s observations. The driver advances
//! strictly one period at a time: each step runs the five kernel phases
//! (forecast, inversion, update, likelihood, predict), handles missing
//! observations by re-selecting the effective observation subsystem,
//! and — for time-invariant models — detects the steady state of the
//! covariance recursion so later periods can skip all covariance work.
//!
//! The filter does not hold a borrow of the container: `seek`, `step`,
//! and `run` take `&StateSpace` per call, so a caller may mutate the
//! system matrices between invocations (the usual likelihood-search
//! loop) provided it seeks back to period 0 afterwards.

use ndarray::{s, Array1, Array2, Array3, Axis};
use num_traits::Zero;
use tracing::{debug, trace_span};

use crate::error::KalmanError;
use crate::kernel::{self, Inversion};
use crate::options::{
    FilterOptions, MEMORY_NO_FILTERED, MEMORY_NO_FORECAST, MEMORY_NO_LIKELIHOOD,
    MEMORY_NO_PREDICTED, STABILITY_FORCE_SYMMETRY,
};
use crate::represent::StateSpace;
use crate::scalar::Field;

/// Conventional Kalman filter bound to the dimensions of one model.
///
/// Outputs are stored per period, except that each memory-conservation
/// bit collapses its family to a rotating buffer (2 columns, or 3 for
/// the predicted family since predict writes period `t + 1`) and the
/// likelihood to a single burn-aware accumulator.
#[derive(Clone, Debug)]
pub struct KalmanFilter<F: Field> {
    k_endog: usize,
    k_states: usize,
    k_posdef: usize,
    nobs: usize,
    opts: FilterOptions,

    t: usize,

    forecast: Array2<F>,
    forecast_error: Array2<F>,
    forecast_error_cov: Array3<F>,
    filtered_state: Array2<F>,
    filtered_state_cov: Array3<F>,
    predicted_state: Array2<F>,
    predicted_state_cov: Array3<F>,
    loglikelihood: Array1<F>,

    converged: bool,
    period_converged: Option<usize>,
    converged_forecast_error_cov: Array2<F>,
    converged_filtered_state_cov: Array2<F>,
    converged_predicted_state_cov: Array2<F>,
    converged_determinant: F,

    determinant: F,
    forecast_error_fac: Array2<F>,
    forecast_error_ipiv: Vec<usize>,
    forecast_error_work: Array2<F>,
    tmp0: Array2<F>,
    tmp1: Array2<F>,
    tmp2: Array1<F>,
    tmp3: Array2<F>,
    selected_obs: Array1<F>,
    selected_obs_intercept: Array1<F>,
    selected_design: Array2<F>,
    selected_obs_cov: Array2<F>,
    // A partial-missing period factors a reduced block over the
    // factorization scratch; the retained steady-state factor must then
    // be rebuilt on the next full-dimension period.
    inversion_scratch_dirty: bool,
}

impl<F: Field> KalmanFilter<F> {
    /// Allocates a workspace for `model` and seeks to period 0.
    ///
    /// # Errors
    ///
    /// [`KalmanError::InvalidMethod`] for an unsupported configuration,
    /// [`KalmanError::NotInitialized`] if the model has no initial
    /// state distribution.
    pub fn new(model: &StateSpace<F>, opts: FilterOptions) -> Result<Self, KalmanError> {
        opts.validate(model.k_endog())?;
        if !model.initialized() {
            return Err(KalmanError::NotInitialized);
        }

        let p = model.k_endog();
        let m = model.k_states();
        let r = model.k_posdef();
        let nobs = model.nobs();

        let n_forecast = if opts.conserves(MEMORY_NO_FORECAST) { 2 } else { nobs };
        let n_filtered = if opts.conserves(MEMORY_NO_FILTERED) { 2 } else { nobs };
        let n_predicted = if opts.conserves(MEMORY_NO_PREDICTED) { 3 } else { nobs + 1 };
        let n_loglike = if opts.conserves(MEMORY_NO_LIKELIHOOD) { 1 } else { nobs };

        let mut filter = Self {
            k_endog: p,
            k_states: m,
            k_posdef: r,
            nobs,
            opts,
            t: 0,
            forecast: Array2::zeros((p, n_forecast)),
            forecast_error: Array2::zeros((p, n_forecast)),
            forecast_error_cov: Array3::zeros((p, p, n_forecast)),
            filtered_state: Array2::zeros((m, n_filtered)),
            filtered_state_cov: Array3::zeros((m, m, n_filtered)),
            predicted_state: Array2::zeros((m, n_predicted)),
            predicted_state_cov: Array3::zeros((m, m, n_predicted)),
            loglikelihood: Array1::zeros(n_loglike),
            converged: false,
            period_converged: None,
            converged_forecast_error_cov: Array2::zeros((p, p)),
            converged_filtered_state_cov: Array2::zeros((m, m)),
            converged_predicted_state_cov: Array2::zeros((m, m)),
            converged_determinant: F::zero(),
            determinant: F::zero(),
            forecast_error_fac: Array2::zeros((p, p)),
            forecast_error_ipiv: vec![0; p],
            forecast_error_work: Array2::zeros((p, p)),
            tmp0: Array2::zeros((m, m)),
            tmp1: Array2::zeros((m, p)),
            tmp2: Array1::zeros(p),
            tmp3: Array2::zeros((p, m)),
            selected_obs: Array1::zeros(p),
            selected_obs_intercept: Array1::zeros(p),
            selected_design: Array2::zeros((p, m)),
            selected_obs_cov: Array2::zeros((p, p)),
            inversion_scratch_dirty: false,
        };
        filter.seek(model, 0, true)?;
        Ok(filter)
    }

    /// Current period (the next one `step` will filter).
    pub fn period(&self) -> usize {
        self.t
    }

    /// One-step-ahead forecasts `ŷ_t` (`k_endog` × storage columns).
    pub fn forecast(&self) -> &Array2<F> {
        &self.forecast
    }

    /// Forecast errors `v_t`.
    pub fn forecast_error(&self) -> &Array2<F> {
        &self.forecast_error
    }

    /// Forecast-error covariances `F_t`.
    pub fn forecast_error_cov(&self) -> &Array3<F> {
        &self.forecast_error_cov
    }

    /// Filtered state means `a_{t|t}`.
    pub fn filtered_state(&self) -> &Array2<F> {
        &self.filtered_state
    }

    /// Filtered state covariances `P_{t|t}`.
    pub fn filtered_state_cov(&self) -> &Array3<F> {
        &self.filtered_state_cov
    }

    /// Predicted state means `a_{t+1}` (one more column than `nobs` in
    /// full storage; the first column is the initial state).
    pub fn predicted_state(&self) -> &Array2<F> {
        &self.predicted_state
    }

    /// Predicted state covariances `P_{t+1}`.
    pub fn predicted_state_cov(&self) -> &Array3<F> {
        &self.predicted_state_cov
    }

    /// Per-period log-likelihoods, or the single accumulator cell under
    /// `MEMORY_NO_LIKELIHOOD`.
    pub fn loglikelihood(&self) -> &Array1<F> {
        &self.loglikelihood
    }

    /// Total log-likelihood over periods `>= loglikelihood_burn`.
    pub fn loglikelihood_total(&self) -> F {
        if self.opts.conserves(MEMORY_NO_LIKELIHOOD) {
            self.loglikelihood[0]
        } else {
            let mut acc = F::zero();
            for t in self.opts.loglikelihood_burn..self.loglikelihood.len() {
                acc = acc + self.loglikelihood[t];
            }
            acc
        }
    }

    /// Determinant of the most recently factored `F_t`.
    pub fn determinant(&self) -> F {
        self.determinant
    }

    /// Whether the covariance recursion has reached its steady state.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Period at which the steady state was first detected.
    pub fn period_converged(&self) -> Option<usize> {
        self.period_converged
    }

    fn out_idx(&self, bit: u32, t: usize) -> usize {
        if self.opts.conserves(bit) {
            1
        } else {
            t
        }
    }

    fn prior_idx(&self, t: usize) -> usize {
        if self.opts.conserves(MEMORY_NO_PREDICTED) {
            1
        } else {
            t
        }
    }

    fn next_idx(&self, t: usize) -> usize {
        if self.opts.conserves(MEMORY_NO_PREDICTED) {
            2
        } else {
            t + 1
        }
    }

    fn check_model(&self, model: &StateSpace<F>) -> Result<(), KalmanError> {
        if model.k_endog() != self.k_endog
            || model.k_states() != self.k_states
            || model.k_posdef() != self.k_posdef
            || model.nobs() != self.nobs
        {
            return Err(KalmanError::InvalidShape {
                name: "model",
                expected: format!(
                    "(k_endog={}, k_states={}, k_posdef={}, nobs={})",
                    self.k_endog, self.k_states, self.k_posdef, self.nobs
                ),
                got: format!(
                    "(k_endog={}, k_states={}, k_posdef={}, nobs={})",
                    model.k_endog(),
                    model.k_states(),
                    model.k_posdef(),
                    model.nobs()
                ),
            });
        }
        Ok(())
    }

    /// Repositions the filter at period `t`.
    ///
    /// Seeking to 0 reloads the initial state distribution into the
    /// prior column and clears the likelihood accumulator; this is also
    /// how a caller resumes after a [`KalmanError::LinAlg`] failure or
    /// after mutating the model's matrices. With `reset_convergence`
    /// the steady-state flag and snapshots are discarded.
    ///
    /// # Errors
    ///
    /// [`KalmanError::EndOfSequence`] if `t > nobs`;
    /// [`KalmanError::InvalidMethod`] when seeking to `t > 0` while the
    /// predicted family is stored in a rotating buffer (the prior for
    /// an arbitrary period no longer exists).
    pub fn seek(
        &mut self,
        model: &StateSpace<F>,
        t: usize,
        reset_convergence: bool,
    ) -> Result<(), KalmanError> {
        self.check_model(model)?;
        if t > self.nobs {
            return Err(KalmanError::EndOfSequence { nobs: self.nobs });
        }
        if t > 0 && self.opts.conserves(MEMORY_NO_PREDICTED) {
            return Err(KalmanError::InvalidMethod {
                name: "conserve_memory",
                value: self.opts.conserve_memory,
            });
        }

        if reset_convergence {
            self.converged = false;
            self.period_converged = None;
            self.inversion_scratch_dirty = false;
        }
        if self.opts.conserves(MEMORY_NO_LIKELIHOOD) {
            self.loglikelihood[0] = F::zero();
        }

        if t == 0 {
            let (a1, p1) = match (model.initial_state(), model.initial_state_cov()) {
                (Some(a1), Some(p1)) => (a1, p1),
                _ => return Err(KalmanError::NotInitialized),
            };
            let pi = self.prior_idx(0);
            self.predicted_state.column_mut(pi).assign(a1);
            self.predicted_state_cov
                .index_axis_mut(Axis(2), pi)
                .assign(p1);
        }

        self.t = t;
        Ok(())
    }

    /// Filters one period and advances.
    ///
    /// # Errors
    ///
    /// [`KalmanError::EndOfSequence`] once all `nobs` periods have been
    /// filtered; [`KalmanError::LinAlg`] on a factorization failure, in
    /// which case the workspace holds complete results only through the
    /// previous period and `seek` is required before resuming.
    pub fn step(&mut self, model: &StateSpace<F>) -> Result<(), KalmanError> {
        self.check_model(model)?;
        if self.t >= self.nobs {
            return Err(KalmanError::EndOfSequence { nobs: self.nobs });
        }
        self.filter_period(model)?;
        self.migrate_storage();
        self.t += 1;
        Ok(())
    }

    /// Runs the filter over the whole observation sequence.
    ///
    /// Equivalent to `seek(0)` followed by `nobs` calls to `step`.
    #[tracing::instrument(
        skip(self, model),
        fields(
            nobs = model.nobs(),
            k_endog = model.k_endog(),
            k_states = model.k_states()
        )
    )]
    pub fn run(&mut self, model: &StateSpace<F>) -> Result<(), KalmanError> {
        self.seek(model, 0, true)?;
        while self.t < self.nobs {
            let _period = trace_span!("filter_period", t = self.t).entered();
            self.step(model)?;
        }
        Ok(())
    }

    fn filter_period(&mut self, model: &StateSpace<F>) -> Result<(), KalmanError> {
        let t = self.t;
        let p = self.k_endog;
        let nmissing = model.nmissing(t);
        let p_eff = p - nmissing;
        // The effective flag for this period: a missing period must run
        // the full covariance arithmetic (its observation equation is
        // degenerate), but the sticky flag and snapshots stay valid and
        // the short-circuit resumes on the next fully observed period.
        let conv = self.converged && nmissing == 0;

        let fi = self.out_idx(MEMORY_NO_FORECAST, t);
        let li = self.out_idx(MEMORY_NO_FILTERED, t);
        let pi = self.prior_idx(t);
        let ni = self.next_idx(t);

        if conv {
            self.forecast_error_cov
                .index_axis_mut(Axis(2), fi)
                .assign(&self.converged_forecast_error_cov);
            self.filtered_state_cov
                .index_axis_mut(Axis(2), li)
                .assign(&self.converged_filtered_state_cov);
            // The prior cell is rewritten too: a preceding all-missing
            // period inflates it, and the snapshot is what keeps the
            // short-circuit consistent once clean periods resume.
            self.predicted_state_cov
                .index_axis_mut(Axis(2), pi)
                .assign(&self.converged_predicted_state_cov);
            self.predicted_state_cov
                .index_axis_mut(Axis(2), ni)
                .assign(&self.converged_predicted_state_cov);
            self.determinant = self.converged_determinant;
        }

        if nmissing == p {
            // Degenerate period: zero forecast quantities, posterior
            // equals prior, zero likelihood. The state still evolves.
            kernel::forecast_missing(
                self.forecast.column_mut(fi),
                self.forecast_error.column_mut(fi),
                self.forecast_error_cov.index_axis_mut(Axis(2), fi),
            );
            self.determinant = F::zero();
            kernel::updating_missing(
                self.predicted_state.column(pi),
                self.predicted_state_cov.index_axis(Axis(2), pi),
                self.filtered_state.column_mut(li),
                self.filtered_state_cov.index_axis_mut(Axis(2), li),
            );
            if !self.opts.conserves(MEMORY_NO_LIKELIHOOD) {
                self.loglikelihood[t] = F::zero();
            }
            kernel::prediction_conventional(
                model.transition_at(t),
                model.state_intercept_at(t),
                self.filtered_state.column(li),
                self.filtered_state_cov.index_axis(Axis(2), li),
                model.selected_state_cov_at(t),
                self.predicted_state.column_mut(ni),
                Some((
                    self.tmp0.view_mut(),
                    self.predicted_state_cov.index_axis_mut(Axis(2), ni),
                )),
            );
            if self.opts.stability_method & STABILITY_FORCE_SYMMETRY != 0 {
                kernel::symmetrize(self.predicted_state_cov.index_axis_mut(Axis(2), ni));
            }
            return Ok(());
        }

        if nmissing > 0 {
            // Re-select the observed subsystem into the compact scratch
            // arrays and zero the stale storage cells this period will
            // only partially fill.
            let missing = model.missing_at(t);
            let y_full = model.obs_at(t);
            let z_full = model.design_at(t);
            let d_full = model.obs_intercept_at(t);
            let h_full = model.obs_cov_at(t);

            let mut k = 0;
            for i in 0..p {
                if missing[i] == 0 {
                    self.selected_obs[k] = y_full[i];
                    self.selected_obs_intercept[k] = d_full[i];
                    self.selected_design.row_mut(k).assign(&z_full.row(i));
                    k += 1;
                }
            }
            let mut kr = 0;
            for i in 0..p {
                if missing[i] != 0 {
                    continue;
                }
                let mut kc = 0;
                for j in 0..p {
                    if missing[j] == 0 {
                        self.selected_obs_cov[[kr, kc]] = h_full[[i, j]];
                        kc += 1;
                    }
                }
                kr += 1;
            }
            self.inversion_scratch_dirty = true;

            self.forecast.column_mut(fi).fill(F::zero());
            self.forecast_error.column_mut(fi).fill(F::zero());
            self.forecast_error_cov
                .index_axis_mut(Axis(2), fi)
                .fill(F::zero());
        }

        let (y, z, d, h) = if nmissing > 0 {
            (
                self.selected_obs.slice(s![..p_eff]),
                self.selected_design.slice(s![..p_eff, ..]),
                self.selected_obs_intercept.slice(s![..p_eff]),
                self.selected_obs_cov.slice(s![..p_eff, ..p_eff]),
            )
        } else {
            (
                model.obs_at(t),
                model.design_at(t),
                model.obs_intercept_at(t),
                model.obs_cov_at(t),
            )
        };

        // Phase F
        kernel::forecast_conventional(
            z,
            d,
            h,
            y,
            self.predicted_state.column(pi),
            self.predicted_state_cov.index_axis(Axis(2), pi),
            self.forecast.slice_mut(s![..p_eff, fi]),
            self.forecast_error.slice_mut(s![..p_eff, fi]),
            self.tmp1.slice_mut(s![.., ..p_eff]),
            if conv {
                None
            } else {
                Some(self.forecast_error_cov.slice_mut(s![..p_eff, ..p_eff, fi]))
            },
        );

        // Phase I
        let refactor = !conv || self.inversion_scratch_dirty;
        let det = match Inversion::select(self.opts.inversion_method, p_eff) {
            Inversion::Univariate => kernel::inverse_univariate(
                self.forecast_error_cov.slice(s![..1, ..1, fi]),
                self.forecast_error.slice(s![..1, fi]),
                z,
                self.tmp2.slice_mut(s![..1]),
                self.tmp3.slice_mut(s![..1, ..]),
            ),
            Inversion::CholeskySolve => kernel::inverse_cholesky_solve(
                self.forecast_error_cov.slice(s![..p_eff, ..p_eff, fi]),
                self.forecast_error.slice(s![..p_eff, fi]),
                z,
                self.forecast_error_fac.slice_mut(s![..p_eff, ..p_eff]),
                self.tmp2.slice_mut(s![..p_eff]),
                self.tmp3.slice_mut(s![..p_eff, ..]),
                refactor,
                self.determinant,
            ),
            Inversion::CholeskyInvert => kernel::inverse_cholesky_invert(
                self.forecast_error_cov.slice(s![..p_eff, ..p_eff, fi]),
                self.forecast_error.slice(s![..p_eff, fi]),
                z,
                self.forecast_error_fac.slice_mut(s![..p_eff, ..p_eff]),
                self.forecast_error_work.slice_mut(s![..p_eff, ..p_eff]),
                self.tmp2.slice_mut(s![..p_eff]),
                self.tmp3.slice_mut(s![..p_eff, ..]),
                refactor,
                self.determinant,
            ),
            Inversion::LuSolve => kernel::inverse_lu_solve(
                self.forecast_error_cov.slice(s![..p_eff, ..p_eff, fi]),
                self.forecast_error.slice(s![..p_eff, fi]),
                z,
                self.forecast_error_fac.slice_mut(s![..p_eff, ..p_eff]),
                &mut self.forecast_error_ipiv,
                self.tmp2.slice_mut(s![..p_eff]),
                self.tmp3.slice_mut(s![..p_eff, ..]),
                refactor,
                self.determinant,
            ),
            Inversion::LuInvert => kernel::inverse_lu_invert(
                self.forecast_error_cov.slice(s![..p_eff, ..p_eff, fi]),
                self.forecast_error.slice(s![..p_eff, fi]),
                z,
                self.forecast_error_fac.slice_mut(s![..p_eff, ..p_eff]),
                &mut self.forecast_error_ipiv,
                self.forecast_error_work.slice_mut(s![..p_eff, ..p_eff]),
                self.tmp2.slice_mut(s![..p_eff]),
                self.tmp3.slice_mut(s![..p_eff, ..]),
                refactor,
                self.determinant,
            ),
        }
        .map_err(|kind| KalmanError::LinAlg { period: t, kind })?;
        self.determinant = det;
        if nmissing == 0 && refactor {
            self.inversion_scratch_dirty = false;
        }

        // Phase U
        kernel::updating_conventional(
            self.predicted_state.column(pi),
            self.predicted_state_cov.index_axis(Axis(2), pi),
            self.tmp1.slice(s![.., ..p_eff]),
            self.tmp2.slice(s![..p_eff]),
            self.tmp3.slice(s![..p_eff, ..]),
            self.filtered_state.column_mut(li),
            if conv {
                None
            } else {
                Some((
                    self.tmp0.view_mut(),
                    self.filtered_state_cov.index_axis_mut(Axis(2), li),
                ))
            },
        );

        // Phase L
        let ll = kernel::loglikelihood_conventional(
            p_eff,
            self.determinant,
            self.forecast_error.slice(s![..p_eff, fi]),
            self.tmp2.slice(s![..p_eff]),
        );
        if self.opts.conserves(MEMORY_NO_LIKELIHOOD) {
            if t >= self.opts.loglikelihood_burn {
                self.loglikelihood[0] += ll;
            }
        } else {
            self.loglikelihood[t] = ll;
        }

        // Phase P
        kernel::prediction_conventional(
            model.transition_at(t),
            model.state_intercept_at(t),
            self.filtered_state.column(li),
            self.filtered_state_cov.index_axis(Axis(2), li),
            model.selected_state_cov_at(t),
            self.predicted_state.column_mut(ni),
            if conv {
                None
            } else {
                Some((
                    self.tmp0.view_mut(),
                    self.predicted_state_cov.index_axis_mut(Axis(2), ni),
                ))
            },
        );

        // Phase N
        if !conv && self.opts.stability_method & STABILITY_FORCE_SYMMETRY != 0 {
            kernel::symmetrize(self.predicted_state_cov.index_axis_mut(Axis(2), ni));
        }

        // Steady-state detection
        if model.time_invariant() && !self.converged && nmissing == 0 {
            let norm = kernel::cov_diff_norm_sq(
                self.predicted_state_cov.index_axis(Axis(2), pi),
                self.predicted_state_cov.index_axis(Axis(2), ni),
            );
            if norm < F::real_from_f64(self.opts.tolerance) {
                self.converged = true;
                self.period_converged = Some(t);
                self.converged_forecast_error_cov
                    .assign(&self.forecast_error_cov.index_axis(Axis(2), fi));
                self.converged_filtered_state_cov
                    .assign(&self.filtered_state_cov.index_axis(Axis(2), li));
                self.converged_predicted_state_cov
                    .assign(&self.predicted_state_cov.index_axis(Axis(2), ni));
                self.converged_determinant = self.determinant;
                debug!(period = t, "covariance recursion reached steady state");
            }
        }

        Ok(())
    }

    /// Slides the rotating buffers so the next period again writes the
    /// fixed columns: 1 → 0 for each conserved family, and 2 → 1 as
    /// well for the predicted family.
    fn migrate_storage(&mut self) {
        if self.opts.conserves(MEMORY_NO_FORECAST) {
            shift_column(&mut self.forecast, 1, 0);
            shift_column(&mut self.forecast_error, 1, 0);
            shift_slice(&mut self.forecast_error_cov, 1, 0);
        }
        if self.opts.conserves(MEMORY_NO_FILTERED) {
            shift_column(&mut self.filtered_state, 1, 0);
            shift_slice(&mut self.filtered_state_cov, 1, 0);
        }
        if self.opts.conserves(MEMORY_NO_PREDICTED) {
            shift_column(&mut self.predicted_state, 1, 0);
            shift_column(&mut self.predicted_state, 2, 1);
            shift_slice(&mut self.predicted_state_cov, 1, 0);
            shift_slice(&mut self.predicted_state_cov, 2, 1);
        }
    }
}

fn shift_column<F: Field>(a: &mut Array2<F>, from: usize, to: usize) {
    let (mut left, right) = a.view_mut().split_at(Axis(1), from);
    left.column_mut(to).assign(&right.column(0));
}

fn shift_slice<F: Field>(a: &mut Array3<F>, from: usize, to: usize) {
    let (mut left, right) = a.view_mut().split_at(Axis(2), from);
    left.index_axis_mut(Axis(2), to)
        .assign(&right.index_axis(Axis(2), 0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{INVERT_UNIVARIATE, MEMORY_CONSERVE, SOLVE_CHOLESKY};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Axis};
    use num_complex::Complex;

    fn tensor3(m: &Array2<f64>) -> Array3<f64> {
        m.clone().insert_axis(Axis(2))
    }

    fn local_level(y: &[f64], h: f64, q: f64, p1: f64) -> StateSpace<f64> {
        let nobs = y.len();
        let obs = Array2::from_shape_vec((1, nobs), y.to_vec()).unwrap();
        let mut model = StateSpace::new(
            tensor3(&arr2(&[[1.0]])),
            Array2::zeros((1, 1)),
            tensor3(&arr2(&[[h]])),
            tensor3(&arr2(&[[1.0]])),
            Array2::zeros((1, 1)),
            tensor3(&arr2(&[[1.0]])),
            tensor3(&arr2(&[[q]])),
            obs,
        )
        .unwrap();
        model
            .initialize_known(arr1(&[0.0]), arr2(&[[p1]]))
            .unwrap();
        model
    }

    #[test]
    fn uninitialized_model_rejected() {
        let y = Array2::from_shape_vec((1, 2), vec![1.0, 2.0]).unwrap();
        let model = StateSpace::<f64>::new(
            tensor3(&arr2(&[[1.0]])),
            Array2::zeros((1, 1)),
            tensor3(&arr2(&[[1.0]])),
            tensor3(&arr2(&[[1.0]])),
            Array2::zeros((1, 1)),
            tensor3(&arr2(&[[1.0]])),
            tensor3(&arr2(&[[1.0]])),
            y,
        )
        .unwrap();
        assert!(matches!(
            KalmanFilter::new(&model, FilterOptions::default()),
            Err(KalmanError::NotInitialized)
        ));
    }

    #[test]
    fn first_step_local_level() {
        // P1 = 2, H = 1, Q = 0.5: F_0 = 3, K = 2/3
        let model = local_level(&[1.5], 1.0, 0.5, 2.0);
        let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
        filter.step(&model).unwrap();

        assert_abs_diff_eq!(filter.forecast()[[0, 0]], 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(filter.forecast_error()[[0, 0]], 1.5, epsilon = 1e-14);
        assert_abs_diff_eq!(filter.forecast_error_cov()[[0, 0, 0]], 3.0, epsilon = 1e-14);
        // a_{0|0} = 0 + (2/3)*1.5 = 1, P_{0|0} = 2 - 4/3 = 2/3
        assert_abs_diff_eq!(filter.filtered_state()[[0, 0]], 1.0, epsilon = 1e-14);
        assert_abs_diff_eq!(
            filter.filtered_state_cov()[[0, 0, 0]],
            2.0 / 3.0,
            epsilon = 1e-14
        );
        // a_1 = 1, P_1 = 2/3 + 0.5
        assert_abs_diff_eq!(filter.predicted_state()[[0, 1]], 1.0, epsilon = 1e-14);
        assert_abs_diff_eq!(
            filter.predicted_state_cov()[[0, 0, 1]],
            2.0 / 3.0 + 0.5,
            epsilon = 1e-14
        );
        // ℓ_0 = -0.5 (ln 2π + ln 3 + 1.5²/3)
        let expected = -0.5 * ((2.0 * std::f64::consts::PI).ln() + 3.0f64.ln() + 0.75);
        assert_abs_diff_eq!(filter.loglikelihood()[0], expected, epsilon = 1e-14);
    }

    #[test]
    fn step_past_end_is_end_of_sequence() {
        let model = local_level(&[1.0, 2.0], 1.0, 1.0, 1.0);
        let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
        filter.run(&model).unwrap();
        assert!(matches!(
            filter.step(&model),
            Err(KalmanError::EndOfSequence { nobs: 2 })
        ));
    }

    #[test]
    fn seek_past_end_is_end_of_sequence() {
        let model = local_level(&[1.0, 2.0], 1.0, 1.0, 1.0);
        let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
        assert!(matches!(
            filter.seek(&model, 3, false),
            Err(KalmanError::EndOfSequence { nobs: 2 })
        ));
    }

    #[test]
    fn seek_nonzero_under_conservation_rejected() {
        let model = local_level(&[1.0, 2.0, 3.0], 1.0, 1.0, 1.0);
        let opts = FilterOptions::new().with_conserve_memory(MEMORY_NO_PREDICTED);
        let mut filter = KalmanFilter::new(&model, opts).unwrap();
        filter.run(&model).unwrap();
        assert!(matches!(
            filter.seek(&model, 1, false),
            Err(KalmanError::InvalidMethod { .. })
        ));
    }

    #[test]
    fn local_level_converges_to_golden_ratio() {
        let y: Vec<f64> = (1..=50).map(|v| v as f64).collect();
        let model = local_level(&y, 1.0, 1.0, 1e6);
        let mut filter =
            KalmanFilter::new(&model, FilterOptions::new().with_tolerance(1e-19)).unwrap();
        filter.run(&model).unwrap();

        assert!(filter.converged());
        let t_star = filter.period_converged().unwrap();
        assert!(t_star < 50);
        // Steady state: P = (1 + sqrt 5) / 2
        let golden = (1.0 + 5.0f64.sqrt()) / 2.0;
        assert_abs_diff_eq!(
            filter.predicted_state_cov()[[0, 0, 49]],
            golden,
            epsilon = 1e-9
        );
    }

    #[test]
    fn rerun_is_bit_exact() {
        let y: Vec<f64> = (0..30).map(|v| (v as f64 * 0.7).sin()).collect();
        let model = local_level(&y, 0.5, 0.3, 10.0);
        let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
        filter.run(&model).unwrap();
        let first_ll = filter.loglikelihood().clone();
        let first_filtered = filter.filtered_state().clone();

        filter.seek(&model, 0, true).unwrap();
        filter.run(&model).unwrap();
        assert_eq!(filter.loglikelihood(), &first_ll);
        assert_eq!(filter.filtered_state(), &first_filtered);
    }

    #[test]
    fn conserve_memory_accumulates_likelihood() {
        let y: Vec<f64> = (0..20).map(|v| (v as f64 * 0.3).cos()).collect();
        let model = local_level(&y, 1.0, 1.0, 5.0);

        let mut full = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
        full.run(&model).unwrap();

        let opts = FilterOptions::new().with_conserve_memory(MEMORY_CONSERVE);
        let mut small = KalmanFilter::new(&model, opts).unwrap();
        small.run(&model).unwrap();

        assert_abs_diff_eq!(
            small.loglikelihood_total(),
            full.loglikelihood_total(),
            epsilon = 1e-12
        );
        // Rotating buffers end holding the last period's values
        assert_abs_diff_eq!(
            small.filtered_state()[[0, 0]],
            full.filtered_state()[[0, 19]],
            epsilon = 1e-14
        );
    }

    #[test]
    fn loglikelihood_burn_drops_initial_periods() {
        let y: Vec<f64> = (0..10).map(|v| v as f64 * 0.1).collect();
        let model = local_level(&y, 1.0, 1.0, 1e6);

        let opts = FilterOptions::new().with_loglikelihood_burn(3);
        let mut filter = KalmanFilter::new(&model, opts).unwrap();
        filter.run(&model).unwrap();
        let manual: f64 = (3..10).map(|t| filter.loglikelihood()[t]).sum();
        assert_abs_diff_eq!(filter.loglikelihood_total(), manual, epsilon = 1e-14);

        let opts = FilterOptions::new()
            .with_conserve_memory(MEMORY_NO_LIKELIHOOD)
            .with_loglikelihood_burn(3);
        let mut conserved = KalmanFilter::new(&model, opts).unwrap();
        conserved.run(&model).unwrap();
        assert_abs_diff_eq!(conserved.loglikelihood_total(), manual, epsilon = 1e-12);
    }

    #[test]
    fn univariate_and_cholesky_paths_agree() {
        let y: Vec<f64> = (0..25).map(|v| ((v * 7 % 5) as f64) - 2.0).collect();
        let model = local_level(&y, 1.0, 0.5, 3.0);

        let mut uni = KalmanFilter::new(
            &model,
            FilterOptions::new().with_inversion_method(INVERT_UNIVARIATE),
        )
        .unwrap();
        uni.run(&model).unwrap();

        let mut chol = KalmanFilter::new(
            &model,
            FilterOptions::new().with_inversion_method(SOLVE_CHOLESKY),
        )
        .unwrap();
        chol.run(&model).unwrap();

        assert_abs_diff_eq!(
            uni.loglikelihood_total(),
            chol.loglikelihood_total(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn complex_run_mirrors_real() {
        let y = [0.9, 1.2, 0.8, 1.1];
        let model = local_level(&y, 0.2, 0.1, 1.0);
        let mut real = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
        real.run(&model).unwrap();

        let nobs = y.len();
        let obs =
            Array2::from_shape_vec((1, nobs), y.iter().map(|&v| Complex::new(v, 0.0)).collect())
                .unwrap();
        let one = Complex::new(1.0, 0.0);
        let cplx3 = |v: f64| {
            Array3::from_shape_vec((1, 1, 1), vec![Complex::new(v, 0.0)]).unwrap()
        };
        let mut cmodel = StateSpace::<Complex<f64>>::new(
            Array3::from_elem((1, 1, 1), one),
            Array2::zeros((1, 1)),
            cplx3(0.2),
            Array3::from_elem((1, 1, 1), one),
            Array2::zeros((1, 1)),
            Array3::from_elem((1, 1, 1), one),
            cplx3(0.1),
            obs,
        )
        .unwrap();
        cmodel
            .initialize_known(
                Array1::zeros(1),
                Array2::from_elem((1, 1), Complex::new(1.0, 0.0)),
            )
            .unwrap();
        let mut cfilter = KalmanFilter::new(&cmodel, FilterOptions::default()).unwrap();
        cfilter.run(&cmodel).unwrap();

        let rll = real.loglikelihood_total();
        let cll = cfilter.loglikelihood_total();
        assert_abs_diff_eq!(cll.re, rll, epsilon = 1e-12);
        assert_abs_diff_eq!(cll.im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn filter_is_send_and_sync() {
        fn assert_impl<T: Send + Sync>() {}
        assert_impl::<KalmanFilter<f64>>();
    }
}
