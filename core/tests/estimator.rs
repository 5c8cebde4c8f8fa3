use underpower_core::{
    error::SimError,
    estimate::{fit, fit_ols_residuals, GroupColumn, NamedColumn, RegressionInput},
    rng::ReplicateRng,
    summary::normal_critical_value,
};

fn input(y: Vec<f64>, x: Vec<f64>) -> RegressionInput {
    RegressionInput {
        dependent: y,
        regressor: NamedColumn::new("x", x),
        instrument: None,
        controls: Vec::new(),
        fixed_effects: Vec::new(),
    }
}

/// OLS recovers a known slope with a tight, honest standard error.
#[test]
fn ols_recovers_known_slope() {
    let mut rng = ReplicateRng::from_seed(1);
    let x: Vec<f64> = (0..2_000).map(|_| rng.uniform(0.0, 10.0)).collect();
    let y: Vec<f64> = x.iter().map(|v| 2.0 + 3.0 * v + rng.normal(0.0, 1.0)).collect();

    let est = fit(&input(y, x)).unwrap();
    assert!((est.coefficient - 3.0).abs() < 0.05, "slope {}", est.coefficient);
    assert!(est.std_error > 0.0 && est.std_error < 0.02, "se {}", est.std_error);
    assert!(est.p_value < 1e-10);
    assert_eq!(est.n_obs, 2_000);
    assert_eq!(est.df_resid, 1_998);
    assert!(est.first_stage_f.is_none());

    let (lo, hi) = est.confidence_interval(normal_critical_value(0.05));
    assert!(lo < est.coefficient && est.coefficient < hi);
}

/// A perfect fit has zero residuals and reproduces the slope exactly.
#[test]
fn exact_line_has_no_residuals() {
    let x: Vec<f64> = (0..10).map(f64::from).collect();
    let y: Vec<f64> = x.iter().map(|v| 1.0 - 0.5 * v).collect();
    let (slope, residuals) = fit_ols_residuals(&input(y, x)).unwrap();
    assert!((slope + 0.5).abs() < 1e-10);
    assert!(residuals.iter().all(|r| r.abs() < 1e-10));
}

/// Group offsets correlated with the regressor bias pooled OLS;
/// fixed effects remove them.
#[test]
fn fixed_effects_absorb_group_offsets() {
    let mut rng = ReplicateRng::from_seed(2);
    let offsets = [("a", 0.0), ("b", 5.0), ("c", -3.0)];
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut labels = Vec::new();
    for (g, (name, offset)) in offsets.iter().enumerate() {
        for _ in 0..600 {
            let xi = rng.uniform(0.0, 1.0) + g as f64;
            x.push(xi);
            y.push(offset + 1.5 * xi + rng.normal(0.0, 0.2));
            labels.push(name.to_string());
        }
    }

    let pooled = fit(&input(y.clone(), x.clone())).unwrap();
    assert!((pooled.coefficient - 1.5).abs() > 0.5, "pooled slope {}", pooled.coefficient);

    let mut with_fe = input(y, x);
    with_fe.fixed_effects.push(GroupColumn {
        name: "group".to_string(),
        labels,
    });
    let est = fit(&with_fe).unwrap();
    assert!((est.coefficient - 1.5).abs() < 0.1, "fe slope {}", est.coefficient);
    // intercept + 2 dummies + slope
    assert_eq!(est.df_resid, 1_800 - 4);
}

/// A control that duplicates the regressor is reported by name.
#[test]
fn collinear_control_is_rank_deficient() {
    let mut rng = ReplicateRng::from_seed(3);
    let x: Vec<f64> = (0..200).map(|_| rng.normal(0.0, 1.0)).collect();
    let y: Vec<f64> = x.iter().map(|v| v + rng.normal(0.0, 1.0)).collect();
    let mut data = input(y, x.clone());
    data.controls.push(NamedColumn::new("double", x.iter().map(|v| 2.0 * v).collect()));

    let err = fit(&data).unwrap_err();
    assert!(
        matches!(err, SimError::RankDeficient { ref column } if column == "double"),
        "unexpected error {err}"
    );
    assert!(err.is_replicate_failure());
}

/// A constant regressor is collinear with the intercept.
#[test]
fn constant_regressor_is_rank_deficient() {
    let y: Vec<f64> = (0..50).map(f64::from).collect();
    let err = fit(&input(y, vec![1.0; 50])).unwrap_err();
    assert!(matches!(err, SimError::RankDeficient { .. }), "unexpected error {err}");
}

/// An outcome that is identically zero fits exactly: the coefficient
/// and its standard error are both zero, which must not read as a
/// significant estimate.
#[test]
fn zero_standard_error_is_degenerate() {
    let x: Vec<f64> = (0..20).map(f64::from).collect();
    let err = fit(&input(vec![0.0; 20], x)).unwrap_err();
    assert!(matches!(err, SimError::DegenerateFit { .. }), "unexpected error {err}");
    assert!(err.is_replicate_failure());
    assert_eq!(err.kind(), "degenerate_fit");
}

#[test]
fn too_few_observations_is_empty_sample() {
    let err = fit(&input(vec![1.0, 2.0], vec![0.0, 1.0])).unwrap_err();
    assert!(matches!(err, SimError::EmptySample { .. }));
}

#[test]
fn misaligned_columns_are_invalid_model() {
    let err = fit(&input(vec![1.0, 2.0, 3.0, 4.0], vec![0.0, 1.0])).unwrap_err();
    assert!(matches!(err, SimError::InvalidModel { .. }));
    assert!(!err.is_replicate_failure());
}

/// With an unobserved confounder OLS is biased upward; 2SLS with a
/// randomized instrument recovers the structural slope and reports a
/// large first-stage F.
#[test]
fn two_stage_least_squares_removes_confounding() {
    let mut rng = ReplicateRng::from_seed(4);
    let n = 5_000;
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    let mut z = Vec::with_capacity(n);
    for _ in 0..n {
        let u = rng.normal(0.0, 1.0);
        let zi = if rng.chance(0.5) { 1.0 } else { 0.0 };
        let xi = 1.0 + 2.0 * zi + u + rng.normal(0.0, 1.0);
        y.push(0.5 * xi + 2.0 * u + rng.normal(0.0, 1.0));
        x.push(xi);
        z.push(zi);
    }

    let ols = fit(&input(y.clone(), x.clone())).unwrap();
    assert!(ols.coefficient > 0.9, "ols slope {}", ols.coefficient);

    let mut iv = input(y, x);
    iv.instrument = Some(NamedColumn::new("z", z));
    let est = fit(&iv).unwrap();
    assert!((est.coefficient - 0.5).abs() < 0.15, "iv slope {}", est.coefficient);
    assert!(est.std_error > ols.std_error);
    let f = est.first_stage_f.expect("IV reports a first-stage F");
    assert!(f > 100.0, "first-stage F {f}");
}

/// An irrelevant instrument gives a small first-stage F.
#[test]
fn weak_instrument_has_small_first_stage_f() {
    let mut rng = ReplicateRng::from_seed(5);
    let n = 1_000;
    let z: Vec<f64> = (0..n).map(|_| if rng.chance(0.5) { 1.0 } else { 0.0 }).collect();
    let x: Vec<f64> = (0..n).map(|_| rng.normal(0.0, 1.0)).collect();
    let y: Vec<f64> = x.iter().map(|v| v + rng.normal(0.0, 1.0)).collect();
    let mut iv = input(y, x);
    iv.instrument = Some(NamedColumn::new("z", z));
    match fit(&iv) {
        Ok(est) => assert!(est.first_stage_f.unwrap() < 20.0),
        Err(e) => assert!(e.is_replicate_failure(), "unexpected error {e}"),
    }
}
