//! End-to-end filtering scenarios on small univariate models.

use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2, Array2, Array3, Axis};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use ssm_kalman::{
    FilterOptions, KalmanFilter, KroneckerLyapunov, StateSpace, INVERT_CHOLESKY, INVERT_LU,
    INVERT_UNIVARIATE, MEMORY_CONSERVE, SOLVE_CHOLESKY, SOLVE_LU,
};

fn tensor3(values: &[f64], rows: usize, cols: usize) -> Array3<f64> {
    Array2::from_shape_vec((rows, cols), values.to_vec())
        .unwrap()
        .insert_axis(Axis(2))
}

/// Local level model: y_t = α_t + ε_t, α_{t+1} = α_t + η_t.
fn local_level(y: &[f64], h: f64, q: f64, a1: f64, p1: f64) -> StateSpace<f64> {
    let nobs = y.len();
    let obs = Array2::from_shape_vec((1, nobs), y.to_vec()).unwrap();
    let mut model = StateSpace::new(
        tensor3(&[1.0], 1, 1),
        Array2::zeros((1, 1)),
        tensor3(&[h], 1, 1),
        tensor3(&[1.0], 1, 1),
        Array2::zeros((1, 1)),
        tensor3(&[1.0], 1, 1),
        tensor3(&[q], 1, 1),
        obs,
    )
    .unwrap();
    model.initialize_known(arr1(&[a1]), arr2(&[[p1]])).unwrap();
    model
}

fn generate_level_series(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let mut level = 0.0;
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        level += noise.sample(&mut rng);
        y.push(level + noise.sample(&mut rng));
    }
    y
}

#[test]
fn local_level_filtering_profile() {
    // Diffuse-ish prior, increasing data: the predicted variance falls
    // monotonically toward its fixed point while the filtered level
    // chases the observations upward.
    let y = [1.0, 2.0, 3.0, 4.0, 5.0];
    let model = local_level(&y, 1.0, 1.0, 0.0, 1e6);
    let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
    filter.run(&model).unwrap();

    for t in 1..5 {
        assert!(
            filter.predicted_state_cov()[[0, 0, t + 1]] < filter.predicted_state_cov()[[0, 0, t]],
            "P_{{t+1}} should decrease at t={t}"
        );
        assert!(
            filter.filtered_state()[[0, t]] > filter.filtered_state()[[0, t - 1]],
            "a_{{t|t}} should increase at t={t}"
        );
    }
    for t in 0..5 {
        let a = filter.filtered_state()[[0, t]];
        assert!(a > 0.0 && a < 5.0, "a_{{t|t}} = {a} outside observed range");
    }
}

#[test]
fn local_level_variance_reaches_golden_ratio() {
    // Fixed point of P = P - P²/(P+1) + 1 is (1+√5)/2.
    let y: Vec<f64> = (1..=20).map(|v| v as f64).collect();
    let model = local_level(&y, 1.0, 1.0, 0.0, 1e6);
    let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
    filter.run(&model).unwrap();

    let golden = (1.0 + 5.0f64.sqrt()) / 2.0;
    assert_abs_diff_eq!(
        filter.predicted_state_cov()[[0, 0, 20]],
        golden,
        epsilon = 1e-6
    );
}

#[test]
fn ar1_with_stationary_initialization() {
    // AR(1), phi = 0.5, Q = 1, H = 0: P1 = 1/(1-0.25) = 4/3.
    let y = [0.5, 0.25, 1.125, 0.5625, -0.21875];
    let obs = Array2::from_shape_vec((1, 5), y.to_vec()).unwrap();
    let mut model = StateSpace::new(
        tensor3(&[1.0], 1, 1),
        Array2::zeros((1, 1)),
        tensor3(&[0.0], 1, 1),
        tensor3(&[0.5], 1, 1),
        Array2::zeros((1, 1)),
        tensor3(&[1.0], 1, 1),
        tensor3(&[1.0], 1, 1),
        obs,
    )
    .unwrap();
    model.initialize_stationary(&KroneckerLyapunov).unwrap();

    let p1 = model.initial_state_cov().unwrap()[[0, 0]];
    assert_abs_diff_eq!(p1, 4.0 / 3.0, epsilon = 1e-12);

    let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
    filter.run(&model).unwrap();

    assert_abs_diff_eq!(filter.forecast_error()[[0, 0]], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(
        filter.forecast_error_cov()[[0, 0, 0]],
        4.0 / 3.0,
        epsilon = 1e-12
    );
    let expected_ll0 = -0.5
        * ((2.0 * std::f64::consts::PI).ln() + (4.0f64 / 3.0).ln() + 0.25 / (4.0 / 3.0));
    assert_abs_diff_eq!(filter.loglikelihood()[0], expected_ll0, epsilon = 1e-12);
}

#[test]
fn convergence_short_circuit_is_bit_exact_for_every_inversion_policy() {
    let y = generate_level_series(100, 42);
    let model = local_level(&y, 1.0, 1.0, 0.0, 1e6);

    let policies = [
        INVERT_UNIVARIATE,
        SOLVE_CHOLESKY,
        SOLVE_LU,
        INVERT_CHOLESKY,
        INVERT_LU,
    ];
    let mut totals = Vec::new();
    for &policy in &policies {
        let opts = FilterOptions::new().with_inversion_method(policy);
        let mut filter = KalmanFilter::new(&model, opts).unwrap();
        filter.run(&model).unwrap();

        assert!(filter.converged(), "policy {policy:#04x} did not converge");
        let t_star = filter.period_converged().unwrap();
        assert!(t_star < 100);

        let f_star = filter.forecast_error_cov()[[0, 0, t_star]];
        let p_star = filter.predicted_state_cov()[[0, 0, t_star + 1]];
        for t in t_star..100 {
            assert_eq!(
                filter.forecast_error_cov()[[0, 0, t]],
                f_star,
                "F_t drifted after convergence (policy {policy:#04x}, t={t})"
            );
            assert_eq!(
                filter.predicted_state_cov()[[0, 0, t + 1]],
                p_star,
                "P_t drifted after convergence (policy {policy:#04x}, t={t})"
            );
        }
        totals.push(filter.loglikelihood_total());
    }

    for total in &totals[1..] {
        assert_abs_diff_eq!(*total, totals[0], epsilon = 1e-10);
    }
}

#[test]
fn memory_conservation_matches_full_storage() {
    let y = [1.0, 2.0, 3.0, 4.0, 5.0];
    let model = local_level(&y, 1.0, 1.0, 0.0, 1e6);

    let mut full = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
    full.run(&model).unwrap();
    let per_step_sum: f64 = (0..5).map(|t| full.loglikelihood()[t]).sum();

    let opts = FilterOptions::new().with_conserve_memory(MEMORY_CONSERVE);
    let mut small = KalmanFilter::new(&model, opts).unwrap();
    small.run(&model).unwrap();

    assert_abs_diff_eq!(
        small.loglikelihood_total(),
        per_step_sum,
        epsilon = f64::EPSILON * 16.0
    );

    // The rotating buffers hold the last period on the cells shared
    // with the full layout, bit-for-bit.
    assert_eq!(small.forecast()[[0, 0]], full.forecast()[[0, 4]]);
    assert_eq!(small.forecast_error()[[0, 0]], full.forecast_error()[[0, 4]]);
    assert_eq!(
        small.filtered_state()[[0, 0]],
        full.filtered_state()[[0, 4]]
    );
    assert_eq!(
        small.predicted_state()[[0, 1]],
        full.predicted_state()[[0, 5]]
    );
    assert_eq!(
        small.predicted_state_cov()[[0, 0, 1]],
        full.predicted_state_cov()[[0, 0, 5]]
    );
}

#[test]
fn seek_zero_reproduces_run_bit_exactly() {
    let y = generate_level_series(40, 7);
    let model = local_level(&y, 0.8, 0.4, 0.0, 50.0);
    let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
    filter.run(&model).unwrap();

    let ll = filter.loglikelihood().clone();
    let filtered = filter.filtered_state().clone();
    let predicted_cov = filter.predicted_state_cov().clone();

    filter.seek(&model, 0, true).unwrap();
    filter.run(&model).unwrap();

    assert_eq!(filter.loglikelihood(), &ll);
    assert_eq!(filter.filtered_state(), &filtered);
    assert_eq!(filter.predicted_state_cov(), &predicted_cov);
}

#[test]
fn predicted_covariance_is_symmetric_bivariate() {
    // Local linear trend observed twice with correlated noise: the
    // predicted covariance must be exactly symmetric after each step.
    let y = generate_level_series(30, 11);
    let obs = Array2::from_shape_vec(
        (2, 15),
        y.iter().take(30).copied().collect::<Vec<f64>>(),
    )
    .unwrap();
    let mut model = StateSpace::new(
        tensor3(&[1.0, 0.0, 1.0, 0.3], 2, 2),
        Array2::zeros((2, 1)),
        tensor3(&[0.5, 0.1, 0.1, 0.4], 2, 2),
        tensor3(&[1.0, 1.0, 0.0, 1.0], 2, 2),
        Array2::zeros((2, 1)),
        tensor3(&[1.0, 0.0, 0.0, 1.0], 2, 2),
        tensor3(&[0.2, 0.05, 0.05, 0.1], 2, 2),
        obs,
    )
    .unwrap();
    model
        .initialize_known(arr1(&[0.0, 0.0]), arr2(&[[10.0, 0.0], [0.0, 10.0]]))
        .unwrap();

    let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
    filter.run(&model).unwrap();

    for t in 0..=15 {
        let p = filter.predicted_state_cov().index_axis(Axis(2), t);
        assert_eq!(
            p[[0, 1]],
            p[[1, 0]],
            "P not symmetric at t={t}"
        );
    }
}

#[test]
fn loglikelihood_decomposes_into_stacked_normal_density() {
    // The total log-likelihood must equal the log-density of the
    // stacked forecast errors under block-diagonal F_t.
    let y = generate_level_series(20, 3);
    let model = local_level(&y, 0.6, 0.9, 0.0, 4.0);
    let mut filter = KalmanFilter::new(&model, FilterOptions::default()).unwrap();
    filter.run(&model).unwrap();

    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let mut manual = 0.0;
    for t in 0..20 {
        let v = filter.forecast_error()[[0, t]];
        let f = filter.forecast_error_cov()[[0, 0, t]];
        manual += -0.5 * (ln_2pi + f.ln() + v * v / f);
    }
    assert_abs_diff_eq!(filter.loglikelihood_total(), manual, epsilon = 1e-10);
}
