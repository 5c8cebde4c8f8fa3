use underpower_core::{config::IllustrationConfig, illustration::mad_scientist};

/// A tiny effect on one city-year: low power, significant estimates
/// wildly exaggerated and sometimes of the wrong sign.
#[test]
fn underpowered_study_exaggerates() {
    let config = IllustrationConfig {
        n_reps: 3_000,
        ..IllustrationConfig::default()
    };
    let summary = mad_scientist(&config, 2021, 0.05).unwrap();

    assert_eq!(summary.n_valid + summary.n_failed, 3_000);
    let power = summary.power.unwrap();
    let type_m = summary.type_m.unwrap();
    let type_s = summary.type_s.unwrap();
    assert!(power < 0.5, "power {power}");
    assert!(type_m > 2.0, "type M {type_m}");
    assert!(type_s > 0.01, "type S {type_s}");

    let coverage = summary.coverage_rate.unwrap();
    assert!((coverage - 0.95).abs() < 0.03, "coverage {coverage}");
    let treated = summary.mean_proportion_treated.unwrap();
    assert!((treated - 0.5).abs() < 0.01);
}

/// A large effect is detected almost every time without exaggeration.
#[test]
fn large_effect_is_well_powered() {
    let config = IllustrationConfig {
        effect: 30.0,
        n_reps: 300,
        ..IllustrationConfig::default()
    };
    let summary = mad_scientist(&config, 2021, 0.05).unwrap();
    assert!(summary.power.unwrap() > 0.95);
    let type_m = summary.type_m.unwrap();
    assert!((type_m - 1.0).abs() < 0.1, "type M {type_m}");
    assert_eq!(summary.type_s, Some(0.0));
}

#[test]
fn illustration_is_reproducible() {
    let config = IllustrationConfig {
        n_reps: 200,
        ..IllustrationConfig::default()
    };
    let a = mad_scientist(&config, 5, 0.05).unwrap();
    let b = mad_scientist(&config, 5, 0.05).unwrap();
    assert_eq!(a, b);
}

#[test]
fn degenerate_illustration_is_rejected() {
    let config = IllustrationConfig {
        n_days: 1,
        ..IllustrationConfig::default()
    };
    assert!(mad_scientist(&config, 1, 0.05).is_err());
}
