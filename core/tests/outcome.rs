use underpower_core::{
    model::{FixedEffect, IdentificationMethod, ModelSpec},
    outcome::{add_poisson_effect, generate},
    panel::{Column, Observation, Panel},
    replicate::estimate_synthetic,
    rng::ReplicateRng,
    stats,
    treatment::{assign, assign_bernoulli},
};

fn spec() -> ModelSpec {
    ModelSpec::new(
        Column::DeathTotal,
        Column::Pm10,
        vec![Column::Temperature],
        vec![FixedEffect::City, FixedEffect::Month, FixedEffect::DayOfWeek],
    )
    .unwrap()
}

fn deaths(rows: &[&Observation]) -> Vec<f64> {
    rows.iter().map(|r| r.deaths()).collect()
}

#[test]
fn poisson_effect_touches_treated_rows_only() {
    let mut rng = ReplicateRng::from_seed(1);
    let y = vec![50.0; 2_000];
    let assignments = assign_bernoulli(y.len(), 0.5, &mut rng);
    let (out, true_effect) = add_poisson_effect(&y, &assignments, 6.0, &mut rng);

    assert_eq!(out.len(), y.len());
    let mut added = Vec::new();
    for ((o, base), a) in out.iter().zip(&y).zip(&assignments) {
        if a.is_treated() {
            added.push(o - base);
        } else {
            assert_eq!(o, base);
        }
    }
    let mean_added = stats::mean(&added).unwrap();
    assert!((true_effect - mean_added).abs() < 1e-9);
    assert!((true_effect - 6.0).abs() < 0.5, "mean added {true_effect}");
}

/// Every method returns series aligned with the sample rows.
#[test]
fn outputs_line_up_with_rows() {
    let panel = Panel::synthetic(3, 300, 4).unwrap();
    let rows: Vec<&Observation> = panel.rows().iter().collect();
    for method in [
        IdentificationMethod::ReducedForm,
        IdentificationMethod::Rdd,
        IdentificationMethod::Ols,
        IdentificationMethod::Iv,
    ] {
        let mut rng = ReplicateRng::from_seed(9);
        let draw = assign(method.treatment_design(0.2, Column::Pm10), &rows, &mut rng).unwrap();
        let data = generate(&rows, draw, &spec(), method, 2.0, 0.5, &mut rng).unwrap();
        assert_eq!(data.len(), rows.len(), "{}", method.name());
        assert_eq!(data.exposure.len(), rows.len());
        assert_eq!(data.assignments.len(), rows.len());
        assert_eq!(data.threshold.is_some(), method == IdentificationMethod::Rdd);
        assert!(data.true_effect > 0.0, "{}", method.name());
    }
}

/// Under RDD, rows outside the band keep their observed outcome.
#[test]
fn undefined_rows_keep_observed_outcome() {
    let panel = Panel::synthetic(3, 300, 4).unwrap();
    let rows: Vec<&Observation> = panel.rows().iter().collect();
    let mut rng = ReplicateRng::from_seed(2);
    let method = IdentificationMethod::Rdd;
    let draw = assign(method.treatment_design(0.1, Column::Pm10), &rows, &mut rng).unwrap();
    let data = generate(&rows, draw, &spec(), method, 10.0, 0.5, &mut rng).unwrap();
    let y = deaths(&rows);
    let mut untouched = 0;
    for i in 0..rows.len() {
        if !data.assignments[i].is_treated() {
            assert_eq!(data.outcome[i], y[i]);
            untouched += 1;
        }
    }
    assert!(untouched > rows.len() / 2);
}

/// Reduced form: λ is the given share of the mean outcome.
#[test]
fn reduced_form_effect_scales_with_mean_outcome() {
    let panel = Panel::synthetic(4, 365, 8).unwrap();
    let rows: Vec<&Observation> = panel.rows().iter().collect();
    let mean_y = stats::mean(&deaths(&rows)).unwrap();
    let mut rng = ReplicateRng::from_seed(3);
    let method = IdentificationMethod::ReducedForm;
    let draw = assign(method.treatment_design(0.5, Column::Pm10), &rows, &mut rng).unwrap();
    let data = generate(&rows, draw, &spec(), method, 10.0, 0.5, &mut rng).unwrap();
    let lambda = 0.1 * mean_y;
    assert!(
        (data.true_effect - lambda).abs() < 0.2 * lambda,
        "true effect {} for lambda {lambda}",
        data.true_effect
    );
}

/// IV: the exposure moves by the same γ on every instrumented row,
/// and not at all elsewhere.
#[test]
fn iv_shifts_exposure_on_instrumented_rows() {
    let panel = Panel::synthetic(2, 365, 5).unwrap();
    let rows: Vec<&Observation> = panel.rows().iter().collect();
    let x: Vec<f64> = rows.iter().map(|r| r.value(Column::Pm10).unwrap()).collect();
    let sd = stats::sample_sd(&x).unwrap();
    let mut rng = ReplicateRng::from_seed(4);
    let method = IdentificationMethod::Iv;
    let draw = assign(method.treatment_design(0.5, Column::Pm10), &rows, &mut rng).unwrap();
    let data = generate(&rows, draw, &spec(), method, 1.0, 0.5, &mut rng).unwrap();
    for i in 0..rows.len() {
        let shift = data.exposure[i] - x[i];
        if data.assignments[i].is_treated() {
            assert!((shift - 0.5 * sd).abs() < 1e-9);
        } else {
            assert_eq!(shift, 0.0);
        }
    }
    let mean_y = stats::mean(&deaths(&rows)).unwrap();
    assert!((data.true_effect - 0.01 * mean_y / sd).abs() < 1e-12);
}

/// With no effect, re-estimates scatter around zero for every method.
#[test]
fn zero_effect_estimates_are_centred() {
    let panel = Panel::synthetic(3, 400, 6).unwrap();
    for method in [IdentificationMethod::ReducedForm, IdentificationMethod::Ols] {
        let mut estimates = Vec::new();
        for rep in 0..200 {
            let mut rng = ReplicateRng::new(77, 0, rep);
            let sample = underpower_core::sampler::sample_study(&panel, 200, 3, &mut rng).unwrap();
            let draw = assign(method.treatment_design(0.5, Column::Pm10), &sample.rows, &mut rng).unwrap();
            let data = generate(&sample.rows, draw, &spec(), method, 0.0, 0.5, &mut rng).unwrap();
            assert_eq!(data.true_effect, 0.0);
            let est = estimate_synthetic(&sample.rows, &data, &spec(), method).unwrap();
            estimates.push(est.coefficient);
        }
        let mean = stats::mean(&estimates).unwrap();
        let sd = stats::sample_sd(&estimates).unwrap();
        let bound = 4.0 * sd / (estimates.len() as f64).sqrt();
        assert!(
            mean.abs() < bound,
            "{}: mean estimate {mean} outside ±{bound}",
            method.name()
        );
    }
}
