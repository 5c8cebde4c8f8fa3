//! The city-day panel: loading, cleaning and synthetic generation.
//!
//! RULE: A Panel is immutable once cleaned.
//! Every downstream step (sampling, assignment, synthetic outcomes)
//! borrows it and produces new values; nothing writes back.
//!
//! Cleaning follows three fixed steps, in order:
//!   1. Drop rows without the total-death outcome, then duplicated keys.
//!   2. Impute missing exposures and weather per city by linear
//!      interpolation over dates (nearest value at the series ends).
//!   3. Convert temperatures from °F to °C.

use crate::{
    error::{SimError, SimResult},
    rng::{SeedBank, StreamSlot},
    types::CityId,
};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;

/// A measured panel variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    DeathTotal,
    DeathCvd,
    DeathResp,
    #[serde(rename = "death_over_75")]
    DeathOver75,
    Pm10,
    Pm25,
    O3,
    No2,
    Co,
    So2,
    Temperature,
    Dewpoint,
}

impl Column {
    pub const COUNT: usize = 12;

    pub const ALL: [Column; Column::COUNT] = [
        Column::DeathTotal,
        Column::DeathCvd,
        Column::DeathResp,
        Column::DeathOver75,
        Column::Pm10,
        Column::Pm25,
        Column::O3,
        Column::No2,
        Column::Co,
        Column::So2,
        Column::Temperature,
        Column::Dewpoint,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DeathTotal => "death_total",
            Self::DeathCvd => "death_cvd",
            Self::DeathResp => "death_resp",
            Self::DeathOver75 => "death_over_75",
            Self::Pm10 => "pm10",
            Self::Pm25 => "pm25",
            Self::O3 => "o3",
            Self::No2 => "no2",
            Self::Co => "co",
            Self::So2 => "so2",
            Self::Temperature => "temperature",
            Self::Dewpoint => "dewpoint",
        }
    }

    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            Self::DeathTotal | Self::DeathCvd | Self::DeathResp | Self::DeathOver75
        )
    }

    pub fn is_pollutant(&self) -> bool {
        matches!(
            self,
            Self::Pm10 | Self::Pm25 | Self::O3 | Self::No2 | Self::Co | Self::So2
        )
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// One city-day as read from the source files. Every measurement may
/// be missing; temperatures are in degrees Fahrenheit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawObservation {
    pub city: CityId,
    pub date: NaiveDate,
    #[serde(default)]
    pub death_total: Option<f64>,
    #[serde(default)]
    pub death_cvd: Option<f64>,
    #[serde(default)]
    pub death_resp: Option<f64>,
    #[serde(default)]
    pub death_over_75: Option<f64>,
    #[serde(default)]
    pub pm10: Option<f64>,
    #[serde(default)]
    pub pm25: Option<f64>,
    #[serde(default)]
    pub o3: Option<f64>,
    #[serde(default)]
    pub no2: Option<f64>,
    #[serde(default)]
    pub co: Option<f64>,
    #[serde(default)]
    pub so2: Option<f64>,
    #[serde(default)]
    pub temperature_f: Option<f64>,
    #[serde(default)]
    pub dewpoint_f: Option<f64>,
}

impl RawObservation {
    fn values(&self) -> [Option<f64>; Column::COUNT] {
        [
            self.death_total,
            self.death_cvd,
            self.death_resp,
            self.death_over_75,
            self.pm10,
            self.pm25,
            self.o3,
            self.no2,
            self.co,
            self.so2,
            self.temperature_f,
            self.dewpoint_f,
        ]
    }
}

/// One cleaned city-day. Unique key: (city, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub city: CityId,
    pub date: NaiveDate,
    values: [Option<f64>; Column::COUNT],
}

impl Observation {
    pub fn value(&self, column: Column) -> Option<f64> {
        self.values[column.slot()]
    }

    /// Value of a column, or a `MissingValue` error naming this row.
    pub fn require(&self, column: Column) -> SimResult<f64> {
        self.value(column).ok_or_else(|| SimError::MissingValue {
            column: column.name().to_string(),
            city: self.city.clone(),
            date: self.date,
        })
    }

    /// Total deaths. Always present after cleaning.
    pub fn deaths(&self) -> f64 {
        self.values[Column::DeathTotal.slot()].unwrap_or(0.0)
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn weekday(&self) -> Weekday {
        self.date.weekday()
    }
}

/// The cleaned panel, sorted by (city, date).
#[derive(Debug, Clone)]
pub struct Panel {
    rows: Vec<Observation>,
    cities: Vec<CityId>,
    city_ranges: Vec<Range<usize>>,
    first_date: NaiveDate,
    last_date: NaiveDate,
}

impl Panel {
    /// Clean raw records into a panel. Data-quality problems are
    /// filtered and logged; only an empty result is an error.
    pub fn clean(mut raw: Vec<RawObservation>) -> SimResult<Self> {
        let input_len = raw.len();
        raw.sort_by(|a, b| a.city.cmp(&b.city).then(a.date.cmp(&b.date)));

        let mut seen: HashSet<(CityId, NaiveDate)> = HashSet::with_capacity(raw.len());
        let mut missing_outcome = 0usize;
        let mut duplicates = 0usize;
        let mut rows: Vec<Observation> = Vec::with_capacity(raw.len());
        for record in raw {
            if record.death_total.is_none() {
                missing_outcome += 1;
                continue;
            }
            if !seen.insert((record.city.clone(), record.date)) {
                duplicates += 1;
                continue;
            }
            let values = record.values();
            rows.push(Observation {
                city: record.city,
                date: record.date,
                values,
            });
        }
        if missing_outcome > 0 {
            log::warn!("panel: dropped {missing_outcome} rows without a death count");
        }
        if duplicates > 0 {
            log::warn!("panel: dropped {duplicates} duplicated (city, date) rows");
        }
        if rows.is_empty() {
            return Err(SimError::EmptySample {
                reason: format!("no usable rows among {input_len} raw observations"),
            });
        }

        let (cities, city_ranges) = index_cities(&rows);
        for range in &city_ranges {
            impute_city(&mut rows[range.clone()]);
        }
        for row in &mut rows {
            for column in [Column::Temperature, Column::Dewpoint] {
                if let Some(f) = row.values[column.slot()] {
                    row.values[column.slot()] = Some(fahrenheit_to_celsius(f));
                }
            }
        }

        let first_date = rows.iter().map(|r| r.date).min().unwrap_or_default();
        let last_date = rows.iter().map(|r| r.date).max().unwrap_or_default();

        log::info!(
            "panel: {} rows, {} cities, {first_date}..={last_date}",
            rows.len(),
            cities.len()
        );

        Ok(Self {
            rows,
            cities,
            city_ranges,
            first_date,
            last_date,
        })
    }

    /// An NMMAPS-like panel: seasonal negative-binomial death counts,
    /// seasonal log-normal pollutants and seasonal temperature, with a
    /// small share of missing exposures to exercise imputation.
    pub fn synthetic(n_cities: usize, n_days: usize, seed: u64) -> SimResult<Self> {
        let mut rng = SeedBank::new(seed).for_stream(StreamSlot::SyntheticPanel);
        let start = NaiveDate::from_ymd_opt(1987, 1, 1).unwrap_or_default();
        let mut raw = Vec::with_capacity(n_cities * n_days);

        for c in 0..n_cities {
            let city = format!("c{c:03}");
            let base_deaths = rng.uniform(15.0, 120.0);
            let base_pm10 = rng.uniform(20.0, 40.0);
            let base_o3 = rng.uniform(15.0, 30.0);
            let base_temp_c = rng.uniform(8.0, 22.0);
            for d in 0..n_days {
                let date = start + chrono::Duration::days(d as i64);
                let season = 2.0 * std::f64::consts::PI * f64::from(date.ordinal()) / 365.25;
                let temp_c = base_temp_c - 9.0 * season.cos() + rng.normal(0.0, 3.0);
                let deaths_mean = base_deaths * (1.0 + 0.12 * season.cos());
                let pm10 = (base_pm10.ln() + 0.15 * season.cos() + rng.normal(0.0, 0.45)).exp();
                let o3 = (base_o3.ln() - 0.35 * season.cos() + rng.normal(0.0, 0.35)).exp();
                let co = (0.2 * pm10.ln() + rng.normal(0.0, 0.3)).exp();
                let no2 = 0.8 * pm10 + rng.normal(0.0, 3.0).abs();
                let so2 = (1.5 + rng.normal(0.0, 0.5)).exp();
                let dewpoint_c = temp_c - rng.uniform(2.0, 8.0);
                let missing = |rng: &mut crate::rng::ReplicateRng, v: f64| {
                    if rng.chance(0.02) {
                        None
                    } else {
                        Some(v)
                    }
                };
                let death_total = rng.neg_binomial(deaths_mean, 38.0) as f64;
                raw.push(RawObservation {
                    city: city.clone(),
                    date,
                    death_total: Some(death_total),
                    death_cvd: Some((death_total * 0.4).round()),
                    death_resp: Some((death_total * 0.1).round()),
                    death_over_75: Some((death_total * 0.55).round()),
                    pm10: missing(&mut rng, pm10),
                    pm25: missing(&mut rng, pm10 * 0.6),
                    o3: missing(&mut rng, o3),
                    no2: missing(&mut rng, no2),
                    co: missing(&mut rng, co),
                    so2: missing(&mut rng, so2),
                    temperature_f: Some(celsius_to_fahrenheit(temp_c)),
                    dewpoint_f: Some(celsius_to_fahrenheit(dewpoint_c)),
                });
            }
        }
        Self::clean(raw)
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cities(&self) -> &[CityId] {
        &self.cities
    }

    /// Rows of the i-th city (in `cities()` order), sorted by date.
    pub fn city_rows(&self, city_index: usize) -> &[Observation] {
        &self.rows[self.city_ranges[city_index].clone()]
    }

    pub fn first_date(&self) -> NaiveDate {
        self.first_date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    /// Number of calendar days spanned by the panel, inclusive.
    pub fn n_days(&self) -> usize {
        (self.last_date - self.first_date).num_days() as usize + 1
    }
}

/// Load raw observations from a JSON array and clean them.
pub fn load_json(path: impl AsRef<Path>) -> SimResult<Panel> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let raw: Vec<RawObservation> = serde_json::from_str(&content)?;
    Panel::clean(raw)
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

fn index_cities(rows: &[Observation]) -> (Vec<CityId>, Vec<Range<usize>>) {
    let mut cities = Vec::new();
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].city != rows[start].city {
            cities.push(rows[start].city.clone());
            ranges.push(start..i);
            start = i;
        }
    }
    (cities, ranges)
}

/// Interpolate every non-outcome column of one city's date-sorted rows.
fn impute_city(rows: &mut [Observation]) {
    let days: Vec<i64> = rows
        .iter()
        .map(|r| r.date.num_days_from_ce() as i64)
        .collect();
    for column in Column::ALL.iter().filter(|c| !c.is_outcome()) {
        let mut series: Vec<Option<f64>> = rows.iter().map(|r| r.value(*column)).collect();
        impute_series(&days, &mut series);
        for (row, value) in rows.iter_mut().zip(series) {
            row.values[column.slot()] = value;
        }
    }
}

/// Fill gaps in `values` by linear interpolation over `days`.
/// Leading and trailing gaps take the nearest known value;
/// an all-missing series is left untouched.
fn impute_series(days: &[i64], values: &mut [Option<f64>]) {
    let known: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_some()).collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return;
    };
    let first_value = values[first];
    let last_value = values[last];
    for v in values[..first].iter_mut() {
        *v = first_value;
    }
    for v in values[last + 1..].iter_mut() {
        *v = last_value;
    }
    for pair in known.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b == a + 1 {
            continue;
        }
        let (Some(va), Some(vb)) = (values[a], values[b]) else {
            continue;
        };
        let span = (days[b] - days[a]) as f64;
        for i in a + 1..b {
            let w = (days[i] - days[a]) as f64 / span;
            values[i] = Some(va + w * (vb - va));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_fills_interior_and_edges() {
        let days = [0, 1, 2, 3, 4, 6];
        let mut values = [None, Some(2.0), None, None, Some(8.0), None];
        impute_series(&days, &mut values);
        assert_eq!(values[0], Some(2.0));
        assert_eq!(values[2], Some(4.0));
        assert_eq!(values[3], Some(6.0));
        assert_eq!(values[5], Some(8.0));
    }

    #[test]
    fn all_missing_series_stays_missing() {
        let days = [0, 1, 2];
        let mut values = [None, None, None];
        impute_series(&days, &mut values);
        assert!(values.iter().all(Option::is_none));
    }
}
