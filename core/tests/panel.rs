use chrono::NaiveDate;
use underpower_core::{
    error::SimError,
    panel::{self, Column, Panel, RawObservation},
    store::SimStore,
};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 3, d).unwrap()
}

fn raw(city: &str, d: u32, deaths: Option<f64>, pm10: Option<f64>) -> RawObservation {
    RawObservation {
        city: city.to_string(),
        date: day(d),
        death_total: deaths,
        pm10,
        temperature_f: Some(50.0),
        ..RawObservation::default()
    }
}

fn messy_records() -> Vec<RawObservation> {
    vec![
        raw("b", 2, Some(30.0), Some(5.0)),
        raw("a", 1, Some(10.0), Some(10.0)),
        raw("a", 2, Some(11.0), None),
        raw("a", 3, Some(12.0), None),
        raw("a", 4, Some(13.0), Some(40.0)),
        raw("a", 5, Some(14.0), None),
        // duplicate key: the first occurrence is kept
        raw("a", 1, Some(99.0), Some(99.0)),
        // no outcome: dropped
        raw("a", 6, None, Some(50.0)),
        raw("b", 1, Some(31.0), None),
    ]
}

#[test]
fn cleaning_drops_bad_rows_and_sorts() {
    let panel = Panel::clean(messy_records()).unwrap();
    assert_eq!(panel.len(), 7);
    assert_eq!(panel.cities(), &["a".to_string(), "b".to_string()]);
    assert_eq!(panel.first_date(), day(1));
    assert_eq!(panel.last_date(), day(5));

    let a = panel.city_rows(0);
    assert_eq!(a.len(), 5);
    assert_eq!(a[0].deaths(), 10.0, "first duplicate must win");
    assert!(a.windows(2).all(|w| w[0].date < w[1].date));
    assert_eq!(panel.city_rows(1).len(), 2);
}

#[test]
fn missing_exposures_are_interpolated_per_city() {
    let panel = Panel::clean(messy_records()).unwrap();
    let a: Vec<Option<f64>> = panel.city_rows(0).iter().map(|r| r.value(Column::Pm10)).collect();
    assert_eq!(a, vec![Some(10.0), Some(20.0), Some(30.0), Some(40.0), Some(40.0)]);

    // city b only knows day 2; day 1 takes the nearest value
    let b: Vec<Option<f64>> = panel.city_rows(1).iter().map(|r| r.value(Column::Pm10)).collect();
    assert_eq!(b, vec![Some(5.0), Some(5.0)]);

    // an exposure never measured stays missing
    assert!(panel.rows().iter().all(|r| r.value(Column::O3).is_none()));
    let err = panel.rows()[0].require(Column::O3).unwrap_err();
    assert!(matches!(err, SimError::MissingValue { ref column, .. } if column == "o3"));
}

#[test]
fn temperatures_are_converted_to_celsius() {
    let panel = Panel::clean(messy_records()).unwrap();
    for row in panel.rows() {
        assert!((row.value(Column::Temperature).unwrap() - 10.0).abs() < 1e-12);
    }
    assert_eq!(panel::fahrenheit_to_celsius(212.0), 100.0);
    assert_eq!(panel::fahrenheit_to_celsius(32.0), 0.0);
    assert!((panel::celsius_to_fahrenheit(panel::fahrenheit_to_celsius(71.3)) - 71.3).abs() < 1e-9);
}

#[test]
fn panel_without_outcomes_is_empty_sample() {
    let records = vec![raw("a", 1, None, Some(1.0)), raw("a", 2, None, Some(2.0))];
    assert!(matches!(Panel::clean(records), Err(SimError::EmptySample { .. })));
}

#[test]
fn json_file_loads_into_clean_panel() {
    let path = std::env::temp_dir().join(format!("underpower-panel-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string(&messy_records()).unwrap()).unwrap();
    let panel = panel::load_json(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(panel.len(), 7);
    assert_eq!(panel.city_rows(0)[1].value(Column::Pm10), Some(20.0));
}

/// Raw records survive a trip through the store unchanged.
#[test]
fn raw_records_round_trip_through_store() {
    let store = SimStore::in_memory().unwrap();
    store.migrate().unwrap();
    let records = messy_records();
    store.insert_raw_observations(&records).unwrap();
    assert_eq!(store.raw_observation_count().unwrap(), records.len() as i64);

    let loaded = store.load_raw_observations().unwrap();
    assert_eq!(loaded.len(), records.len());
    for (a, b) in records.iter().zip(&loaded) {
        assert_eq!(a.city, b.city);
        assert_eq!(a.date, b.date);
        assert_eq!(a.death_total, b.death_total);
        assert_eq!(a.pm10, b.pm10);
        assert_eq!(a.o3, b.o3);
    }
    let from_store = Panel::clean(loaded).unwrap();
    let direct = Panel::clean(records).unwrap();
    assert_eq!(from_store.rows(), direct.rows());
}

#[test]
fn synthetic_panel_is_complete_and_reproducible() {
    let a = Panel::synthetic(3, 90, 5).unwrap();
    let b = Panel::synthetic(3, 90, 5).unwrap();
    assert_eq!(a.len(), 270);
    assert_eq!(a.n_days(), 90);
    assert_eq!(a.rows(), b.rows());
    for row in a.rows() {
        assert!(row.deaths() >= 0.0);
        assert!(row.value(Column::Pm10).is_some(), "exposures are imputed");
    }
    let c = Panel::synthetic(3, 90, 6).unwrap();
    assert_ne!(a.rows(), c.rows());
}
