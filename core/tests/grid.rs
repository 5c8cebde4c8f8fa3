use underpower_core::{
    grid::{build_grid, GridMode, ParameterCell, ParameterOverrides},
    model::IdentificationMethod,
};

fn baseline() -> ParameterCell {
    ParameterCell {
        n_days: 1_000,
        n_cities: 40,
        p_treat: 0.5,
        percent_effect: 1.0,
        method: IdentificationMethod::ReducedForm,
        iv_strength: 0.5,
        formula: "baseline".to_string(),
    }
}

#[test]
fn no_overrides_gives_the_baseline_alone() {
    for mode in [GridMode::Full, GridMode::OneAtATime] {
        let cells = build_grid(&baseline(), &ParameterOverrides::default(), mode);
        assert_eq!(cells, vec![baseline()]);
    }
}

#[test]
fn full_grid_is_the_cartesian_product() {
    let overrides = ParameterOverrides {
        n_days: Some(vec![100, 500]),
        n_cities: Some(vec![1, 5, 20]),
        method: Some(vec![
            IdentificationMethod::ReducedForm,
            IdentificationMethod::Ols,
        ]),
        ..ParameterOverrides::default()
    };
    let cells = build_grid(&baseline(), &overrides, GridMode::Full);
    assert_eq!(cells.len(), 2 * 3 * 2);
    // dimensions without a vector keep their baseline value
    assert!(cells.iter().all(|c| c.p_treat == 0.5 && c.formula == "baseline"));
    // first dimension varies slowest
    assert_eq!(cells[0].n_days, 100);
    assert_eq!(cells[0].n_cities, 1);
    assert_eq!(cells[0].method, IdentificationMethod::ReducedForm);
    assert_eq!(cells[11].n_days, 500);
    assert_eq!(cells[11].n_cities, 20);
    assert_eq!(cells[11].method, IdentificationMethod::Ols);
}

/// One-at-a-time varies a single dimension around the baseline;
/// a variation equal to the baseline collapses into it.
#[test]
fn one_at_a_time_varies_one_dimension() {
    let overrides = ParameterOverrides {
        n_days: Some(vec![100, 1_000, 5_000]),
        percent_effect: Some(vec![0.0, 5.0]),
        formula: Some(vec!["no_weather".to_string()]),
        ..ParameterOverrides::default()
    };
    let cells = build_grid(&baseline(), &overrides, GridMode::OneAtATime);
    assert_eq!(cells.len(), 1 + 2 + 2 + 1);
    assert_eq!(cells[0], baseline());
    for cell in &cells[1..] {
        let b = baseline();
        let changed = [
            cell.n_days != b.n_days,
            cell.n_cities != b.n_cities,
            cell.p_treat != b.p_treat,
            cell.percent_effect != b.percent_effect,
            cell.method != b.method,
            cell.iv_strength != b.iv_strength,
            cell.formula != b.formula,
        ];
        assert_eq!(changed.iter().filter(|c| **c).count(), 1, "{}", cell.key());
    }
}

#[test]
fn duplicates_are_removed_in_order() {
    let overrides = ParameterOverrides {
        p_treat: Some(vec![0.1, 0.5, 0.1]),
        ..ParameterOverrides::default()
    };
    let cells = build_grid(&baseline(), &overrides, GridMode::Full);
    let p: Vec<f64> = cells.iter().map(|c| c.p_treat).collect();
    assert_eq!(p, vec![0.1, 0.5]);
}

#[test]
fn keys_distinguish_cells() {
    let a = baseline();
    let mut b = baseline();
    b.iv_strength = 0.25;
    assert_ne!(a.key(), b.key());
    assert_eq!(a.key(), baseline().key());
}
